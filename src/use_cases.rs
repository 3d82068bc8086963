//! Application use cases over the [`AttachmentRepository`].
//!
//! Each use case runs one repository operation and summarizes its terminal
//! outcome as exactly one status message. Partial failures always report
//! their failure count, even when some items succeeded.

use anyhow::Result;
use tracing::warn;

use crate::cancel::CancelFlag;
use crate::documents;
use crate::error::Error;
use crate::models::{AttachmentRecord, BatchImport, CleanupResult};
use crate::repository::AttachmentRepository;
use crate::source::SourceHandle;
use crate::status::{StatusLevel, StatusSink};

/// Import `sources` as a batch, optionally binding the successes to `owner`.
pub async fn import_files(
    repo: &AttachmentRepository,
    status: &dyn StatusSink,
    sources: &[SourceHandle],
    owner: Option<&str>,
    cancel: &CancelFlag,
) -> Result<BatchImport> {
    let batch = repo.import_attachments(sources, cancel).await;

    if let Some(doc_id) = owner {
        if !batch.records.is_empty() {
            if let Err(e) = repo.bind_attachments_to_doc(&batch.ids(), doc_id).await {
                status.report(
                    StatusLevel::Error,
                    &format!(
                        "imported {} but could not attach them to {}: {}",
                        plural(batch.records.len(), "file"),
                        doc_id,
                        e
                    ),
                );
                return Err(e.into());
            }
        }
    }

    status.report(import_level(&batch), &import_summary(&batch));
    Ok(batch)
}

pub fn import_summary(batch: &BatchImport) -> String {
    let mut message = format!(
        "imported {}/{} files",
        batch.records.len(),
        batch.requested
    );
    if batch.error_count() > 0 {
        message.push_str(&format!(", {}", plural(batch.error_count(), "error")));
    }
    if batch.cancelled {
        message.push_str(" (cancelled)");
    }
    message
}

fn import_level(batch: &BatchImport) -> StatusLevel {
    if batch.error_count() == 0 && !batch.cancelled {
        StatusLevel::Success
    } else if batch.records.is_empty() && batch.requested > 0 {
        StatusLevel::Error
    } else {
        StatusLevel::Warning
    }
}

/// Delete one attachment, reporting whether its file and record went away.
pub async fn delete_attachment(
    repo: &AttachmentRepository,
    status: &dyn StatusSink,
    id: &str,
) -> bool {
    let known = matches!(repo.get_attachment(id).await, Ok(Some(_)));
    if !known {
        status.report(StatusLevel::Warning, &format!("attachment {} not found", id));
        return false;
    }

    let removed = repo.delete_attachment(id).await;
    if removed {
        status.report(StatusLevel::Success, &format!("deleted attachment {}", id));
    } else {
        status.report(
            StatusLevel::Warning,
            &format!("attachment {}: file was missing or could not be removed", id),
        );
    }
    removed
}

/// Eagerly remove every attachment of `doc_id`.
pub async fn delete_document_attachments(
    repo: &AttachmentRepository,
    status: &dyn StatusSink,
    doc_id: &str,
) -> bool {
    let count = repo.get_attachments_by_doc(doc_id).await.len();
    let ok = repo.delete_attachments_by_doc(doc_id).await;
    if ok {
        status.report(
            StatusLevel::Success,
            &format!("removed {} from {}", plural(count, "attachment"), doc_id),
        );
    } else {
        status.report(
            StatusLevel::Error,
            &format!("cleanup of {} finished with errors", doc_id),
        );
    }
    ok
}

/// Delete a document and, when `eager`, its attachments right away.
pub async fn delete_document(
    repo: &AttachmentRepository,
    status: &dyn StatusSink,
    doc_id: &str,
    eager: bool,
) -> Result<bool> {
    if !documents::delete_document(repo.metadata_store().pool(), doc_id).await? {
        status.report(StatusLevel::Warning, &format!("document {} not found", doc_id));
        return Ok(false);
    }

    if !eager {
        status.report(
            StatusLevel::Info,
            &format!("deleted document {}; attachments left for the next sweep", doc_id),
        );
        return Ok(true);
    }

    let result = repo.on_document_deleted(doc_id).await?;
    status.report(
        cleanup_level(&result),
        &format!("deleted document {}: {}", doc_id, cleanup_summary(&result)),
    );
    Ok(true)
}

/// Run the orphan sweep.
pub async fn cleanup_orphans(
    repo: &AttachmentRepository,
    status: &dyn StatusSink,
) -> Result<CleanupResult> {
    match repo.cleanup_orphans().await {
        Ok(result) => {
            if result == CleanupResult::default() {
                status.report(StatusLevel::Info, "no orphaned attachments");
            } else {
                status.report(
                    cleanup_level(&result),
                    &format!("cleanup {}", cleanup_summary(&result)),
                );
            }
            Ok(result)
        }
        Err(e) => {
            status.report(StatusLevel::Error, &format!("cleanup failed: {}", e));
            Err(e.into())
        }
    }
}

pub fn cleanup_summary(result: &CleanupResult) -> String {
    let mut message = format!(
        "removed {} and {}",
        plural(result.deleted_files, "file"),
        plural(result.deleted_records, "record")
    );
    if result.errors > 0 {
        message.push_str(&format!(", {}", plural(result.errors, "error")));
    }
    message
}

fn cleanup_level(result: &CleanupResult) -> StatusLevel {
    if result.is_clean() {
        StatusLevel::Success
    } else {
        StatusLevel::Warning
    }
}

/// A document whose content still lives outside the vault.
#[derive(Debug, Clone)]
pub struct ExternalReference {
    pub doc_id: String,
    pub sources: Vec<SourceHandle>,
}

#[derive(Debug, Default)]
pub struct MigrationReport {
    pub migrated: Vec<(String, Vec<AttachmentRecord>)>,
    pub failed: Vec<(String, Error)>,
}

impl MigrationReport {
    pub fn file_count(&self) -> usize {
        self.migrated.iter().map(|(_, records)| records.len()).sum()
    }
}

/// Copy each document's external references into the vault.
///
/// Documents are migrated independently: a document whose references
/// cannot all be imported keeps none of them and is reported as failed.
pub async fn migrate_external_references(
    repo: &AttachmentRepository,
    status: &dyn StatusSink,
    references: &[ExternalReference],
    cancel: &CancelFlag,
) -> MigrationReport {
    let mut report = MigrationReport::default();

    for reference in references {
        if cancel.is_cancelled() {
            break;
        }
        match repo.import_bundle(&reference.sources, &reference.doc_id).await {
            Ok(records) => report.migrated.push((reference.doc_id.clone(), records)),
            Err(e) => {
                warn!(owner = %reference.doc_id, error = %e, "migrate: document skipped");
                report.failed.push((reference.doc_id.clone(), e));
            }
        }
    }

    let mut message = format!(
        "migrated {}/{} documents ({})",
        report.migrated.len(),
        references.len(),
        plural(report.file_count(), "file")
    );
    if !report.failed.is_empty() {
        message.push_str(&format!(", {} failed", report.failed.len()));
    }
    let level = if report.failed.is_empty() {
        StatusLevel::Success
    } else if report.migrated.is_empty() {
        StatusLevel::Error
    } else {
        StatusLevel::Warning
    };
    status.report(level, &message);

    report
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{} {}", n, word)
    } else {
        format!("{} {}s", n, word)
    }
}
