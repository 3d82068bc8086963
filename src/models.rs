//! Core data models for attachment storage.
//!
//! These types describe the persisted attachment record and the values that
//! flow between the content store, metadata store and repository.

use std::path::PathBuf;

use serde::Serialize;

use crate::error::Error;
use crate::source::SourceHandle;

/// A persisted attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachmentRecord {
    pub id: String,
    /// `None` while unbound: freshly imported or detached.
    pub owner_doc_id: Option<String>,
    pub display_name: String,
    pub mime_type: String,
    pub size_bytes: i64,
    /// Lowercase hex SHA-256 of the stored bytes.
    pub content_hash: String,
    pub storage_path: PathBuf,
    pub source_uri: String,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
}

impl AttachmentRecord {
    /// Build an unbound record for a file the content store just wrote.
    pub fn from_imported(id: String, file: &ImportedFile, created_at: i64) -> Self {
        Self {
            id,
            owner_doc_id: None,
            display_name: file.name.clone(),
            mime_type: file.mime.clone(),
            size_bytes: file.size as i64,
            content_hash: file.hash.clone(),
            storage_path: file.absolute_path.clone(),
            source_uri: file.content_uri.clone(),
            created_at,
        }
    }

    pub fn is_bound(&self) -> bool {
        self.owner_doc_id.is_some()
    }
}

/// Result of streaming one external source into the storage root.
#[derive(Debug, Clone)]
pub struct ImportedFile {
    /// Fresh identifier the stored file name was derived from.
    pub id: String,
    pub name: String,
    pub mime: String,
    pub size: u64,
    pub hash: String,
    pub absolute_path: PathBuf,
    pub content_uri: String,
}

/// Outcome of a garbage collection pass. The three counts are independent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupResult {
    pub deleted_files: usize,
    pub deleted_records: usize,
    pub errors: usize,
}

impl CleanupResult {
    pub fn is_clean(&self) -> bool {
        self.errors == 0
    }
}

/// One source that failed inside a batch import.
#[derive(Debug)]
pub struct ItemFailure {
    pub source: SourceHandle,
    pub error: Error,
}

/// Outcome of a batch import: the success subset plus every skipped item.
#[derive(Debug, Default)]
pub struct BatchImport {
    pub records: Vec<AttachmentRecord>,
    pub failures: Vec<ItemFailure>,
    /// Set when the caller cancelled before every source was attempted.
    pub cancelled: bool,
    /// Number of sources handed to the batch.
    pub requested: usize,
}

impl BatchImport {
    pub fn error_count(&self) -> usize {
        self.failures.len()
    }

    pub fn ids(&self) -> Vec<String> {
        self.records.iter().map(|r| r.id.clone()).collect()
    }
}
