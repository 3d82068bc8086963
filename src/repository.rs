//! Attachment repository: the façade the rest of the application uses.
//!
//! Coordinates the [`ContentStore`], the [`AttachmentMetadataStore`] and the
//! [`GarbageCollector`], and is the only place the pairing rules are
//! enforced:
//!
//! - import writes and hashes the file first, then inserts the record; if
//!   the insert fails the file is removed again
//! - delete attempts the file first, then removes the record regardless of
//!   the file outcome
//! - batch import isolates every item and checks for cancellation between
//!   items
//!
//! ```text
//! Imported(unbound) ──bind──▶ Bound(doc) ──bind──▶ Bound(doc')
//!        │                        │
//!        │                 doc deleted, no eager cleanup
//!        ▼                        ▼
//!   orphan sweep ◀──────────── Orphaned
//!        │
//!        ▼
//!     Deleted (file + record)
//! ```

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use tokio::fs::File;
use tracing::{debug, info, warn};

use crate::cancel::CancelFlag;
use crate::config::Config;
use crate::content_store::ContentStore;
use crate::db;
use crate::documents;
use crate::error::{IntegrityViolation, PersistenceError, Result};
use crate::feeds::AttachmentFeed;
use crate::gc::GarbageCollector;
use crate::metadata_store::AttachmentMetadataStore;
use crate::migrate;
use crate::models::{AttachmentRecord, BatchImport, CleanupResult, ItemFailure};
use crate::source::SourceHandle;

pub struct AttachmentRepository {
    content: Arc<ContentStore>,
    metadata: Arc<AttachmentMetadataStore>,
    gc: GarbageCollector,
    last_created_at: AtomicI64,
}

impl AttachmentRepository {
    pub fn new(content: ContentStore, metadata: AttachmentMetadataStore) -> Self {
        let content = Arc::new(content);
        let metadata = Arc::new(metadata);
        let gc = GarbageCollector::new(Arc::clone(&content), Arc::clone(&metadata));
        Self {
            content,
            metadata,
            gc,
            last_created_at: AtomicI64::new(0),
        }
    }

    /// Connect to the configured database, make sure the schema exists and
    /// build a repository over the configured storage root.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply_schema(&pool).await?;
        Ok(Self::new(
            ContentStore::from_config(config),
            AttachmentMetadataStore::new(pool),
        ))
    }

    pub fn content_store(&self) -> &ContentStore {
        &self.content
    }

    pub fn metadata_store(&self) -> &AttachmentMetadataStore {
        &self.metadata
    }

    /// Import one source as a new unbound attachment.
    pub async fn import_attachment(&self, source: &SourceHandle) -> Result<AttachmentRecord> {
        let file = self.content.import_from_source(source).await?;
        let record = AttachmentRecord::from_imported(file.id.clone(), &file, self.next_created_at());

        if let Err(e) = self.metadata.insert(&record).await {
            self.discard_file(&record).await;
            return Err(e.into());
        }

        debug!(attachment_id = %record.id, hash = %record.content_hash, size = record.size_bytes, "repository: imported");
        Ok(record)
    }

    /// Import sources one at a time. Failed items are recorded and skipped;
    /// cancellation stops before the next item and keeps what succeeded.
    pub async fn import_attachments(
        &self,
        sources: &[SourceHandle],
        cancel: &CancelFlag,
    ) -> BatchImport {
        let mut batch = BatchImport {
            requested: sources.len(),
            ..Default::default()
        };

        for source in sources {
            if cancel.is_cancelled() {
                info!(
                    imported = batch.records.len(),
                    remaining = sources.len() - batch.records.len() - batch.failures.len(),
                    "repository: batch import cancelled"
                );
                batch.cancelled = true;
                break;
            }

            match self.import_attachment(source).await {
                Ok(record) => batch.records.push(record),
                Err(error) => {
                    warn!(source = %source, error = %error, "repository: import failed, skipping");
                    batch.failures.push(ItemFailure {
                        source: source.clone(),
                        error,
                    });
                }
            }
        }

        batch
    }

    /// Import every source bound to `doc_id` as one unit: either all
    /// records are inserted or none are and every copied file is removed.
    pub async fn import_bundle(
        &self,
        sources: &[SourceHandle],
        doc_id: &str,
    ) -> Result<Vec<AttachmentRecord>> {
        if !documents::document_exists(self.metadata.pool(), doc_id).await? {
            return Err(PersistenceError::UnknownDocument(doc_id.to_string()).into());
        }

        let mut records = Vec::with_capacity(sources.len());
        for source in sources {
            match self.content.import_from_source(source).await {
                Ok(file) => {
                    let mut record =
                        AttachmentRecord::from_imported(file.id.clone(), &file, self.next_created_at());
                    record.owner_doc_id = Some(doc_id.to_string());
                    records.push(record);
                }
                Err(e) => {
                    self.discard_files(&records).await;
                    return Err(e.into());
                }
            }
        }

        if let Err(e) = self.metadata.insert_batch(&records).await {
            self.discard_files(&records).await;
            return Err(e.into());
        }

        info!(owner = %doc_id, count = records.len(), "repository: bundle imported");
        Ok(records)
    }

    pub async fn get_attachment(&self, id: &str) -> Result<Option<AttachmentRecord>> {
        Ok(self.metadata.get_by_id(id).await?)
    }

    /// Current attachments of `doc_id`. Lookup failures yield an empty list.
    pub async fn get_attachments_by_doc(&self, doc_id: &str) -> Vec<AttachmentRecord> {
        match self.metadata.list_by_owner(doc_id).await {
            Ok(records) => records,
            Err(e) => {
                warn!(owner = %doc_id, error = %e, "repository: lookup failed");
                Vec::new()
            }
        }
    }

    pub async fn observe_attachments_by_doc(&self, doc_id: &str) -> Result<AttachmentFeed> {
        Ok(self.metadata.observe_by_owner(doc_id).await?)
    }

    /// Delete one attachment's file and record.
    ///
    /// Returns `true` only if the physical file was removed. Unknown ids and
    /// faults return `false`.
    pub async fn delete_attachment(&self, id: &str) -> bool {
        let record = match self.metadata.get_by_id(id).await {
            Ok(Some(record)) => record,
            Ok(None) => return false,
            Err(e) => {
                warn!(attachment_id = %id, error = %e, "repository: delete lookup failed");
                return false;
            }
        };

        let removed = match self.content.delete_physical(&record).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(attachment_id = %id, error = %e, "repository: file delete failed");
                false
            }
        };

        if let Err(e) = self.metadata.delete_by_id(id).await {
            warn!(attachment_id = %id, error = %e, "repository: record delete failed");
            return false;
        }

        debug!(attachment_id = %id, file_removed = removed, "repository: deleted");
        removed
    }

    /// Eagerly clean up every attachment of `doc_id`. `true` iff no step failed.
    pub async fn delete_attachments_by_doc(&self, doc_id: &str) -> bool {
        match self.gc.cleanup_document_attachments(doc_id).await {
            Ok(result) => result.is_clean(),
            Err(e) => {
                warn!(owner = %doc_id, error = %e, "repository: document cleanup failed");
                false
            }
        }
    }

    /// Hook for the document layer after it deleted `doc_id`.
    pub async fn on_document_deleted(&self, doc_id: &str) -> Result<CleanupResult> {
        self.gc.cleanup_document_attachments(doc_id).await
    }

    pub async fn bind_attachments_to_doc(&self, ids: &[String], doc_id: &str) -> Result<()> {
        Ok(self.metadata.bind_to_owner(ids, doc_id).await?)
    }

    pub async fn find_duplicates(&self, hash: &str) -> Result<Vec<AttachmentRecord>> {
        Ok(self.metadata.find_by_hash(hash).await?)
    }

    pub async fn cleanup_orphans(&self) -> Result<CleanupResult> {
        self.gc.cleanup_orphans().await
    }

    pub async fn purge_missing_files(&self) -> Result<CleanupResult> {
        self.gc.cleanup_missing_files().await
    }

    /// `true` iff the backing file still exists. The hash is not re-checked;
    /// see [`verify_content`](Self::verify_content) for that.
    pub async fn validate_attachment_integrity(&self, record: &AttachmentRecord) -> bool {
        self.content.exists(record).await
    }

    pub async fn check_integrity(
        &self,
        record: &AttachmentRecord,
    ) -> std::result::Result<(), IntegrityViolation> {
        if self.validate_attachment_integrity(record).await {
            Ok(())
        } else {
            Err(IntegrityViolation {
                attachment_id: record.id.clone(),
                storage_path: record.storage_path.clone(),
            })
        }
    }

    /// Every record whose backing file is missing.
    pub async fn find_integrity_violations(&self) -> Result<Vec<IntegrityViolation>> {
        let mut violations = Vec::new();
        for record in self.metadata.list_all().await? {
            if let Err(v) = self.check_integrity(&record).await {
                violations.push(v);
            }
        }
        Ok(violations)
    }

    /// Re-hash the stored bytes and compare with the recorded hash.
    pub async fn verify_content(&self, record: &AttachmentRecord) -> Result<bool> {
        self.check_integrity(record).await?;
        let actual = self.content.hash_stored(record).await?;
        Ok(actual == record.content_hash)
    }

    pub async fn open_attachment(&self, id: &str) -> Result<Option<File>> {
        match self.metadata.get_by_id(id).await? {
            Some(record) => Ok(self.content.open_for_read(&record).await?),
            None => Ok(None),
        }
    }

    async fn discard_file(&self, record: &AttachmentRecord) {
        if let Err(e) = self.content.delete_physical(record).await {
            warn!(path = %record.storage_path.display(), error = %e, "repository: could not remove unrecorded file");
        }
    }

    async fn discard_files(&self, records: &[AttachmentRecord]) {
        for record in records {
            self.discard_file(record).await;
        }
    }

    /// Wall-clock milliseconds, bumped so successive imports never share a
    /// timestamp within this process.
    fn next_created_at(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let mut last = self.last_created_at.load(Ordering::SeqCst);
        loop {
            let next = now.max(last + 1);
            match self.last_created_at.compare_exchange(
                last,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }
}
