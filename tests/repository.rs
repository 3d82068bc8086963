//! Library-level tests for the attachment repository, run against a real
//! SQLite file and storage root inside a temporary directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use attachment_vault::cancel::CancelFlag;
use attachment_vault::config::Config;
use attachment_vault::content_store::ContentStore;
use attachment_vault::db;
use attachment_vault::documents;
use attachment_vault::error::{Error, ImportError, PersistenceError};
use attachment_vault::metadata_store::AttachmentMetadataStore;
use attachment_vault::migrate;
use attachment_vault::repository::AttachmentRepository;
use attachment_vault::source::{FileSourceResolver, OpenedSource, SourceHandle, SourceResolver};
use attachment_vault::status::{MemoryStatus, StatusLevel};
use attachment_vault::use_cases::{self, ExternalReference};
use sha2::{Digest, Sha256};
use tempfile::TempDir;

struct Vault {
    _tmp: TempDir,
    inbox: PathBuf,
    config: Config,
    repo: AttachmentRepository,
}

impl Vault {
    async fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let inbox = tmp.path().join("inbox");
        fs::create_dir_all(&inbox).unwrap();
        let config = Config::for_root(&tmp.path().join("vault"));
        let repo = AttachmentRepository::open(&config).await.unwrap();
        Self {
            _tmp: tmp,
            inbox,
            config,
            repo,
        }
    }

    fn write(&self, name: &str, bytes: &[u8]) -> SourceHandle {
        let path = self.inbox.join(name);
        fs::write(&path, bytes).unwrap();
        SourceHandle::from_path(&path)
    }

    async fn create_doc(&self, title: &str) -> String {
        documents::create_document(self.repo.metadata_store().pool(), title)
            .await
            .unwrap()
    }

    fn stored_files(&self) -> usize {
        match fs::read_dir(&self.config.storage.root) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn missing_source(dir: &Path) -> SourceHandle {
    SourceHandle::from_path(&dir.join("does-not-exist.pdf"))
}

#[tokio::test]
async fn import_stores_hashed_copy() {
    let vault = Vault::new().await;
    let source = vault.write("notes.txt", b"Test content for integrity");

    let record = vault.repo.import_attachment(&source).await.unwrap();

    assert_eq!(record.content_hash, sha256_hex(b"Test content for integrity"));
    assert_eq!(record.size_bytes, 26);
    assert_eq!(record.display_name, "notes.txt");
    assert_eq!(record.mime_type, "text/plain");
    assert!(record.owner_doc_id.is_none());
    assert!(record.storage_path.starts_with(&vault.config.storage.root));
    assert!(record.source_uri.starts_with("content://vault.attachments/attachments/"));
    assert_eq!(fs::read(&record.storage_path).unwrap(), b"Test content for integrity");

    assert!(vault.repo.validate_attachment_integrity(&record).await);
    assert!(vault.repo.verify_content(&record).await.unwrap());

    let fetched = vault.repo.get_attachment(&record.id).await.unwrap();
    assert_eq!(fetched, Some(record));
}

#[tokio::test]
async fn importing_same_bytes_twice_keeps_two_copies() {
    let vault = Vault::new().await;
    let a = vault.write("a.txt", b"same bytes");
    let b = vault.write("b.txt", b"same bytes");

    let first = vault.repo.import_attachment(&a).await.unwrap();
    let second = vault.repo.import_attachment(&b).await.unwrap();

    assert_ne!(first.id, second.id);
    assert_ne!(first.storage_path, second.storage_path);
    assert_eq!(first.content_hash, second.content_hash);

    let dupes = vault.repo.find_duplicates(&first.content_hash).await.unwrap();
    assert_eq!(dupes.len(), 2);
    assert_eq!(vault.stored_files(), 2);
}

#[tokio::test]
async fn unreadable_source_leaves_nothing_behind() {
    let vault = Vault::new().await;
    let err = vault
        .repo
        .import_attachment(&missing_source(&vault.inbox))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Import(ImportError::SourceUnreadable { .. })
    ));
    assert_eq!(vault.stored_files(), 0);
    assert!(vault.repo.metadata_store().list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn batch_import_skips_failures() {
    let vault = Vault::new().await;
    let sources = vec![
        vault.write("one.txt", b"1"),
        missing_source(&vault.inbox),
        vault.write("two.txt", b"22"),
        vault.write("three.txt", b"333"),
    ];

    let batch = vault
        .repo
        .import_attachments(&sources, &CancelFlag::new())
        .await;

    assert_eq!(batch.requested, 4);
    assert_eq!(batch.records.len(), 3);
    assert_eq!(batch.error_count(), 1);
    assert!(!batch.cancelled);
    assert_eq!(batch.failures[0].source, sources[1]);
    assert_eq!(vault.stored_files(), 3);
}

#[tokio::test]
async fn cancelled_batch_stops_before_next_item() {
    let vault = Vault::new().await;
    let sources = vec![vault.write("one.txt", b"1"), vault.write("two.txt", b"2")];

    let cancel = CancelFlag::new();
    cancel.cancel();
    let batch = vault.repo.import_attachments(&sources, &cancel).await;

    assert!(batch.cancelled);
    assert!(batch.records.is_empty());
    assert_eq!(batch.error_count(), 0);
    assert_eq!(vault.stored_files(), 0);
}

#[tokio::test]
async fn unbound_imports_are_collected() {
    let vault = Vault::new().await;
    for name in ["a.txt", "b.txt", "c.txt"] {
        let source = vault.write(name, name.as_bytes());
        vault.repo.import_attachment(&source).await.unwrap();
    }

    let result = vault.repo.cleanup_orphans().await.unwrap();
    assert_eq!(result.deleted_files, 3);
    assert_eq!(result.deleted_records, 3);
    assert_eq!(result.errors, 0);
    assert_eq!(vault.stored_files(), 0);

    let again = vault.repo.cleanup_orphans().await.unwrap();
    assert_eq!(again.deleted_files, 0);
    assert_eq!(again.deleted_records, 0);
}

#[tokio::test]
async fn bound_attachments_survive_sweep_until_document_is_gone() {
    let vault = Vault::new().await;
    let doc = vault.create_doc("Receipts").await;
    let record = vault
        .repo
        .import_attachment(&vault.write("r.pdf", b"%PDF-1.4 receipt"))
        .await
        .unwrap();

    vault
        .repo
        .bind_attachments_to_doc(&[record.id.clone()], &doc)
        .await
        .unwrap();

    let swept = vault.repo.cleanup_orphans().await.unwrap();
    assert_eq!(swept.deleted_records, 0);

    let listed = vault.repo.get_attachments_by_doc(&doc).await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].owner_doc_id.as_deref(), Some(doc.as_str()));
    assert_eq!(listed[0].mime_type, "application/pdf");

    documents::delete_document(vault.repo.metadata_store().pool(), &doc)
        .await
        .unwrap();
    let swept = vault.repo.cleanup_orphans().await.unwrap();
    assert_eq!(swept.deleted_files, 1);
    assert_eq!(swept.deleted_records, 1);
    assert!(!record.storage_path.exists());
}

#[tokio::test]
async fn bind_is_all_or_nothing() {
    let vault = Vault::new().await;
    let doc = vault.create_doc("Taxes").await;
    let record = vault
        .repo
        .import_attachment(&vault.write("w2.pdf", b"w2"))
        .await
        .unwrap();

    let err = vault
        .repo
        .bind_attachments_to_doc(&[record.id.clone(), "no-such-id".to_string()], &doc)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Persistence(PersistenceError::UnknownAttachment(ref id)) if id == "no-such-id"
    ));
    assert!(vault.repo.get_attachments_by_doc(&doc).await.is_empty());

    let err = vault
        .repo
        .bind_attachments_to_doc(&[record.id.clone()], "missing-doc")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Persistence(PersistenceError::UnknownDocument(_))
    ));
}

#[tokio::test]
async fn rebinding_moves_attachment_between_documents() {
    let vault = Vault::new().await;
    let first = vault.create_doc("First").await;
    let second = vault.create_doc("Second").await;
    let record = vault
        .repo
        .import_attachment(&vault.write("photo.jpg", b"not really a jpeg"))
        .await
        .unwrap();

    vault
        .repo
        .bind_attachments_to_doc(&[record.id.clone()], &first)
        .await
        .unwrap();
    vault
        .repo
        .bind_attachments_to_doc(&[record.id.clone()], &second)
        .await
        .unwrap();

    assert!(vault.repo.get_attachments_by_doc(&first).await.is_empty());
    assert_eq!(vault.repo.get_attachments_by_doc(&second).await.len(), 1);
}

#[tokio::test]
async fn attachments_are_listed_newest_first() {
    let vault = Vault::new().await;
    let doc = vault.create_doc("Album").await;
    let sources = vec![
        vault.write("1.txt", b"one"),
        vault.write("2.txt", b"two"),
        vault.write("3.txt", b"three"),
    ];
    use_cases::import_files(
        &vault.repo,
        &MemoryStatus::new(),
        &sources,
        Some(&doc),
        &CancelFlag::new(),
    )
    .await
    .unwrap();

    let names: Vec<String> = vault
        .repo
        .get_attachments_by_doc(&doc)
        .await
        .into_iter()
        .map(|r| r.display_name)
        .collect();
    assert_eq!(names, vec!["3.txt", "2.txt", "1.txt"]);
}

#[tokio::test]
async fn deleting_unknown_attachment_returns_false() {
    let vault = Vault::new().await;
    assert!(!vault.repo.delete_attachment("nope").await);
}

#[tokio::test]
async fn delete_removes_record_even_when_file_is_gone() {
    let vault = Vault::new().await;
    let record = vault
        .repo
        .import_attachment(&vault.write("gone.txt", b"soon gone"))
        .await
        .unwrap();
    fs::remove_file(&record.storage_path).unwrap();

    assert!(!vault.repo.validate_attachment_integrity(&record).await);
    assert!(!vault.repo.delete_attachment(&record.id).await);
    assert!(vault.repo.get_attachment(&record.id).await.unwrap().is_none());
}

#[tokio::test]
async fn delete_removes_file_and_record() {
    let vault = Vault::new().await;
    let record = vault
        .repo
        .import_attachment(&vault.write("x.txt", b"x"))
        .await
        .unwrap();

    assert!(vault.repo.delete_attachment(&record.id).await);
    assert!(!record.storage_path.exists());
    assert!(vault.repo.get_attachment(&record.id).await.unwrap().is_none());
}

#[tokio::test]
async fn document_deletion_cleans_up_eagerly() {
    let vault = Vault::new().await;
    let doc = vault.create_doc("Trip").await;
    let sources = vec![vault.write("a.txt", b"a"), vault.write("b.txt", b"b")];
    use_cases::import_files(
        &vault.repo,
        &MemoryStatus::new(),
        &sources,
        Some(&doc),
        &CancelFlag::new(),
    )
    .await
    .unwrap();

    let status = MemoryStatus::new();
    let deleted = use_cases::delete_document(&vault.repo, &status, &doc, true)
        .await
        .unwrap();

    assert!(deleted);
    assert_eq!(vault.stored_files(), 0);
    assert!(vault.repo.get_attachments_by_doc(&doc).await.is_empty());
    let (level, message) = status.last().unwrap();
    assert_eq!(level, StatusLevel::Success);
    assert!(message.contains("removed 2 files and 2 records"), "{}", message);
}

#[tokio::test]
async fn missing_files_are_reported_and_purged() {
    let vault = Vault::new().await;
    let kept = vault
        .repo
        .import_attachment(&vault.write("kept.txt", b"kept"))
        .await
        .unwrap();
    let lost = vault
        .repo
        .import_attachment(&vault.write("lost.txt", b"lost"))
        .await
        .unwrap();
    fs::remove_file(&lost.storage_path).unwrap();

    let violations = vault.repo.find_integrity_violations().await.unwrap();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].attachment_id, lost.id);

    let result = vault.repo.purge_missing_files().await.unwrap();
    assert_eq!(result.deleted_files, 0);
    assert_eq!(result.deleted_records, 1);
    assert!(vault.repo.get_attachment(&kept.id).await.unwrap().is_some());
    assert!(vault.repo.get_attachment(&lost.id).await.unwrap().is_none());
}

#[tokio::test]
async fn altered_content_fails_verification() {
    let vault = Vault::new().await;
    let record = vault
        .repo
        .import_attachment(&vault.write("doc.txt", b"original"))
        .await
        .unwrap();
    fs::write(&record.storage_path, b"tampered").unwrap();

    assert!(vault.repo.validate_attachment_integrity(&record).await);
    assert!(!vault.repo.verify_content(&record).await.unwrap());
}

#[tokio::test]
async fn bundle_import_rolls_back_on_failure() {
    let vault = Vault::new().await;
    let doc = vault.create_doc("Legacy").await;
    let sources = vec![
        vault.write("ok.txt", b"fine"),
        missing_source(&vault.inbox),
    ];

    let err = vault.repo.import_bundle(&sources, &doc).await.unwrap_err();
    assert!(matches!(err, Error::Import(_)));
    assert_eq!(vault.stored_files(), 0);
    assert!(vault.repo.get_attachments_by_doc(&doc).await.is_empty());
}

#[tokio::test]
async fn migration_reports_per_document_outcome() {
    let vault = Vault::new().await;
    let good = vault.create_doc("Good").await;
    let bad = vault.create_doc("Bad").await;
    let references = vec![
        ExternalReference {
            doc_id: good.clone(),
            sources: vec![vault.write("g1.txt", b"g1"), vault.write("g2.txt", b"g2")],
        },
        ExternalReference {
            doc_id: bad.clone(),
            sources: vec![missing_source(&vault.inbox)],
        },
    ];

    let status = MemoryStatus::new();
    let report = use_cases::migrate_external_references(
        &vault.repo,
        &status,
        &references,
        &CancelFlag::new(),
    )
    .await;

    assert_eq!(report.migrated.len(), 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.file_count(), 2);
    assert_eq!(vault.repo.get_attachments_by_doc(&good).await.len(), 2);
    assert!(vault.repo.get_attachments_by_doc(&bad).await.is_empty());

    let (level, message) = status.last().unwrap();
    assert_eq!(level, StatusLevel::Warning);
    assert_eq!(message, "migrated 1/2 documents (2 files), 1 failed");
}

#[tokio::test]
async fn import_status_reports_partial_failure() {
    let vault = Vault::new().await;
    let status = MemoryStatus::new();
    let sources = vec![vault.write("a.txt", b"a"), missing_source(&vault.inbox)];

    use_cases::import_files(&vault.repo, &status, &sources, None, &CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(status.messages().len(), 1);
    let (level, message) = status.last().unwrap();
    assert_eq!(level, StatusLevel::Warning);
    assert_eq!(message, "imported 1/2 files, 1 error");
}

#[tokio::test]
async fn observed_feed_follows_binds_and_deletes() {
    let vault = Vault::new().await;
    let doc = vault.create_doc("Watched").await;

    let mut feed = vault.repo.observe_attachments_by_doc(&doc).await.unwrap();
    assert!(feed.current().is_empty());

    let record = vault
        .repo
        .import_attachment(&vault.write("w.txt", b"watch me"))
        .await
        .unwrap();
    vault
        .repo
        .bind_attachments_to_doc(&[record.id.clone()], &doc)
        .await
        .unwrap();

    let update = feed.changed().await.unwrap();
    assert_eq!(update.len(), 1);
    assert_eq!(update[0].id, record.id);

    assert!(vault.repo.delete_attachment(&record.id).await);
    let update = feed.changed().await.unwrap();
    assert!(update.is_empty());
}

#[tokio::test]
async fn too_large_source_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::for_root(tmp.path());
    config.import.max_file_bytes = 4;
    let repo = AttachmentRepository::open(&config).await.unwrap();

    let path = tmp.path().join("big.bin");
    fs::write(&path, b"0123456789").unwrap();
    let err = repo
        .import_attachment(&SourceHandle::from_path(&path))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Import(ImportError::TooLarge { limit: 4 })
    ));
    let leftover = fs::read_dir(&config.storage.root)
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftover, 0);
}

/// Opens local files, cancelling the batch while the `cancel_on`-th source
/// is being opened.
struct CancellingResolver {
    cancel: CancelFlag,
    cancel_on: usize,
    opened: AtomicUsize,
}

#[async_trait]
impl SourceResolver for CancellingResolver {
    async fn open(&self, source: &SourceHandle) -> Result<OpenedSource, ImportError> {
        if self.opened.fetch_add(1, Ordering::SeqCst) + 1 == self.cancel_on {
            self.cancel.cancel();
        }
        FileSourceResolver.open(source).await
    }
}

#[tokio::test]
async fn cancellation_mid_batch_keeps_completed_items() {
    let tmp = TempDir::new().unwrap();
    let inbox = tmp.path().join("inbox");
    fs::create_dir_all(&inbox).unwrap();
    let config = Config::for_root(&tmp.path().join("vault"));

    let cancel = CancelFlag::new();
    let resolver = Arc::new(CancellingResolver {
        cancel: cancel.clone(),
        cancel_on: 2,
        opened: AtomicUsize::new(0),
    });
    let pool = db::connect(&config).await.unwrap();
    migrate::apply_schema(&pool).await.unwrap();
    let repo = AttachmentRepository::new(
        ContentStore::from_config(&config).with_resolver(resolver),
        AttachmentMetadataStore::new(pool),
    );

    let sources: Vec<SourceHandle> = (1..=4)
        .map(|i| {
            let path = inbox.join(format!("{}.txt", i));
            fs::write(&path, format!("item {}", i)).unwrap();
            SourceHandle::from_path(&path)
        })
        .collect();

    let batch = repo.import_attachments(&sources, &cancel).await;

    assert!(batch.cancelled);
    assert_eq!(batch.requested, 4);
    assert_eq!(batch.records.len(), 2);
    assert_eq!(batch.error_count(), 0);
    assert_eq!(repo.metadata_store().list_all().await.unwrap().len(), 2);
    assert_eq!(fs::read_dir(&config.storage.root).unwrap().count(), 2);
}

/// Replace an attachment's file with a non-empty directory, which
/// `remove_file` refuses to delete.
fn make_undeletable(path: &Path) {
    fs::remove_file(path).unwrap();
    fs::create_dir_all(path).unwrap();
    fs::write(path.join("pinned"), b"pinned").unwrap();
}

#[tokio::test]
async fn failed_file_delete_still_removes_record() {
    let vault = Vault::new().await;
    let record = vault
        .repo
        .import_attachment(&vault.write("stuck.txt", b"stuck"))
        .await
        .unwrap();
    make_undeletable(&record.storage_path);

    let result = vault.repo.cleanup_orphans().await.unwrap();

    assert_eq!(result.deleted_files, 0);
    assert_eq!(result.deleted_records, 1);
    assert_eq!(result.errors, 1);
    assert!(vault.repo.get_attachment(&record.id).await.unwrap().is_none());
}

#[tokio::test]
async fn document_cleanup_reports_failed_file_delete() {
    let vault = Vault::new().await;
    let doc = vault.create_doc("Stuck").await;
    let record = vault
        .repo
        .import_attachment(&vault.write("stuck.txt", b"stuck"))
        .await
        .unwrap();
    vault
        .repo
        .bind_attachments_to_doc(&[record.id.clone()], &doc)
        .await
        .unwrap();
    make_undeletable(&record.storage_path);

    assert!(!vault.repo.delete_attachments_by_doc(&doc).await);
    assert!(vault.repo.get_attachments_by_doc(&doc).await.is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn unreadable_file_status_keeps_record_during_missing_sweep() {
    let vault = Vault::new().await;
    let record = vault
        .repo
        .import_attachment(&vault.write("loop.txt", b"loop"))
        .await
        .unwrap();
    // A self-referencing symlink makes the existence check fail with ELOOP.
    fs::remove_file(&record.storage_path).unwrap();
    std::os::unix::fs::symlink(&record.storage_path, &record.storage_path).unwrap();

    let result = vault.repo.purge_missing_files().await.unwrap();

    assert_eq!(result.deleted_records, 0);
    assert_eq!(result.errors, 1);
    assert!(vault.repo.get_attachment(&record.id).await.unwrap().is_some());
}
