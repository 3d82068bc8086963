//! Reconciliation of attachment records with physical storage.
//!
//! Every pass pairs a physical delete with a record delete. A failed file
//! delete is counted but never blocks the record delete, and one
//! attachment's failure never stops the rest of the pass.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::content_store::ContentStore;
use crate::error::Result;
use crate::metadata_store::AttachmentMetadataStore;
use crate::models::{AttachmentRecord, CleanupResult};

pub struct GarbageCollector {
    content: Arc<ContentStore>,
    metadata: Arc<AttachmentMetadataStore>,
}

impl GarbageCollector {
    pub fn new(content: Arc<ContentStore>, metadata: Arc<AttachmentMetadataStore>) -> Self {
        Self { content, metadata }
    }

    /// Remove every unbound attachment and every attachment whose owning
    /// document no longer exists.
    pub async fn cleanup_orphans(&self) -> Result<CleanupResult> {
        let orphans = self.metadata.list_orphans().await?;
        let result = self.remove_all(&orphans).await;
        info!(
            scanned = orphans.len(),
            deleted_files = result.deleted_files,
            deleted_records = result.deleted_records,
            errors = result.errors,
            "gc: orphan sweep"
        );
        Ok(result)
    }

    /// Eagerly remove the attachments of a deleted document.
    pub async fn cleanup_document_attachments(&self, doc_id: &str) -> Result<CleanupResult> {
        let attachments = self.metadata.list_by_owner(doc_id).await?;
        let result = self.remove_all(&attachments).await;
        info!(
            owner = %doc_id,
            deleted_files = result.deleted_files,
            deleted_records = result.deleted_records,
            errors = result.errors,
            "gc: document cleanup"
        );
        Ok(result)
    }

    /// Drop records whose backing file has disappeared. Records whose file
    /// cannot be checked are kept and counted as errors.
    pub async fn cleanup_missing_files(&self) -> Result<CleanupResult> {
        let mut result = CleanupResult::default();
        for record in self.metadata.list_all().await? {
            match self.content.try_exists(&record).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    warn!(attachment_id = %record.id, path = %record.storage_path.display(), error = %e, "gc: cannot tell whether file exists, keeping record");
                    result.errors += 1;
                    continue;
                }
            }
            match self.metadata.delete_by_id(&record.id).await {
                Ok(true) => result.deleted_records += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(attachment_id = %record.id, error = %e, "gc: record delete failed");
                    result.errors += 1;
                }
            }
        }
        info!(
            deleted_records = result.deleted_records,
            errors = result.errors,
            "gc: missing-file sweep"
        );
        Ok(result)
    }

    async fn remove_all(&self, records: &[AttachmentRecord]) -> CleanupResult {
        let mut result = CleanupResult::default();
        for record in records {
            self.remove_one(record, &mut result).await;
        }
        result
    }

    async fn remove_one(&self, record: &AttachmentRecord, result: &mut CleanupResult) {
        match self.content.delete_physical(record).await {
            Ok(true) => result.deleted_files += 1,
            Ok(false) => {
                debug!(attachment_id = %record.id, "gc: file already absent");
            }
            Err(e) => {
                warn!(attachment_id = %record.id, path = %record.storage_path.display(), error = %e, "gc: file delete failed");
                result.errors += 1;
            }
        }

        match self.metadata.delete_by_id(&record.id).await {
            Ok(true) => result.deleted_records += 1,
            Ok(false) => {
                debug!(attachment_id = %record.id, "gc: record already gone");
            }
            Err(e) => {
                warn!(attachment_id = %record.id, error = %e, "gc: record delete failed");
                result.errors += 1;
            }
        }
    }
}
