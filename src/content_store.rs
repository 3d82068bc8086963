//! Physical file storage for attachments.
//!
//! The content store owns the private storage root. Imports stream bytes
//! from an external source into a freshly named file while hashing them
//! in the same pass, so every import costs one read and one write.
//!
//! Stored files are named `{uuid}.{ext}` directly under the root, with the
//! extension taken from the source name (or sniffed content) when one can
//! be determined.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::ImportError;
use crate::models::{AttachmentRecord, ImportedFile};
use crate::source::{FileSourceResolver, SourceHandle, SourceResolver};

const FALLBACK_MIME: &str = "application/octet-stream";

pub struct ContentStore {
    root: PathBuf,
    authority: String,
    buffer_size: usize,
    size_limit: Option<u64>,
    resolver: Arc<dyn SourceResolver>,
}

impl ContentStore {
    /// Content store for `config`, resolving sources from the local filesystem.
    pub fn from_config(config: &Config) -> Self {
        Self {
            root: config.storage.root.clone(),
            authority: config.storage.content_authority.clone(),
            buffer_size: config.storage.copy_buffer_bytes.max(1),
            size_limit: config.import.size_limit(),
            resolver: Arc::new(FileSourceResolver),
        }
    }

    /// Replace the resolver used to open external sources.
    pub fn with_resolver(mut self, resolver: Arc<dyn SourceResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stream `source` into a new file under the storage root.
    ///
    /// On any failure the partially written destination is removed before
    /// the error is returned.
    pub async fn import_from_source(
        &self,
        source: &SourceHandle,
    ) -> Result<ImportedFile, ImportError> {
        let mut opened = self.resolver.open(source).await?;

        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| ImportError::Destination {
                path: self.root.clone(),
                reason: e.to_string(),
            })?;

        let mut head = vec![0u8; self.buffer_size];
        let head_len = read_full(&mut opened.reader, &mut head)
            .await
            .map_err(|e| unreadable(source, &e))?;
        head.truncate(head_len);

        let mime = detect_mime(&opened.display_name, &head, opened.declared_mime.as_deref());
        let id = Uuid::new_v4().to_string();
        let file_name = match extension_for(&opened.display_name, &head) {
            Some(ext) => format!("{}.{}", id, ext),
            None => id.clone(),
        };
        let dest = self.root.join(&file_name);

        debug!(source = %source, dest = %dest.display(), mime = %mime, "content_store: import");

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&dest)
            .await
            .map_err(|e| ImportError::Destination {
                path: dest.clone(),
                reason: e.to_string(),
            })?;

        let copied = self
            .copy_hashing(source, &head, &mut opened.reader, &mut file, &dest)
            .await;
        drop(file);

        let (size, hash) = match copied {
            Ok(done) => done,
            Err(e) => {
                if let Err(rm) = fs::remove_file(&dest).await {
                    warn!(dest = %dest.display(), error = %rm, "content_store: failed to remove partial file");
                }
                return Err(e);
            }
        };

        if let Some(expected) = opened.expected_len {
            if size < expected {
                if let Err(rm) = fs::remove_file(&dest).await {
                    warn!(dest = %dest.display(), error = %rm, "content_store: failed to remove truncated file");
                }
                return Err(ImportError::Truncated {
                    expected,
                    actual: size,
                });
            }
        }

        Ok(ImportedFile {
            id,
            name: opened.display_name,
            mime,
            size,
            hash,
            content_uri: self.content_uri(&file_name),
            absolute_path: dest,
        })
    }

    async fn copy_hashing(
        &self,
        source: &SourceHandle,
        head: &[u8],
        reader: &mut (dyn AsyncRead + Send + Unpin),
        file: &mut fs::File,
        dest: &Path,
    ) -> Result<(u64, String), ImportError> {
        let write_failed = |e: io::Error| ImportError::Destination {
            path: dest.to_path_buf(),
            reason: e.to_string(),
        };

        let mut hasher = Sha256::new();
        let mut size = head.len() as u64;
        self.check_limit(size)?;
        hasher.update(head);
        file.write_all(head).await.map_err(write_failed)?;

        let mut buf = vec![0u8; self.buffer_size];
        loop {
            let n = reader
                .read(&mut buf)
                .await
                .map_err(|e| unreadable(source, &e))?;
            if n == 0 {
                break;
            }
            size += n as u64;
            self.check_limit(size)?;
            hasher.update(&buf[..n]);
            file.write_all(&buf[..n]).await.map_err(write_failed)?;
        }

        file.flush().await.map_err(write_failed)?;
        file.sync_all().await.map_err(write_failed)?;

        Ok((size, hex::encode(hasher.finalize())))
    }

    fn check_limit(&self, size: u64) -> Result<(), ImportError> {
        match self.size_limit {
            Some(limit) if size > limit => Err(ImportError::TooLarge { limit }),
            _ => Ok(()),
        }
    }

    /// Delete the file behind `record`. Returns `false` if it was already gone.
    pub async fn delete_physical(&self, record: &AttachmentRecord) -> io::Result<bool> {
        match fs::remove_file(&record.storage_path).await {
            Ok(()) => {
                debug!(attachment_id = %record.id, path = %record.storage_path.display(), "content_store: deleted");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Open the stored file for reading, or `None` if it does not exist.
    pub async fn open_for_read(&self, record: &AttachmentRecord) -> io::Result<Option<fs::File>> {
        match fs::File::open(&record.storage_path).await {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn file_for(&self, record: &AttachmentRecord) -> PathBuf {
        record.storage_path.clone()
    }

    /// Like [`exists`](Self::exists), but surfaces errors other than absence
    /// (permissions, symlink loops, I/O faults) instead of reporting `false`.
    pub async fn try_exists(&self, record: &AttachmentRecord) -> io::Result<bool> {
        fs::try_exists(&record.storage_path).await
    }

    pub async fn exists(&self, record: &AttachmentRecord) -> bool {
        self.try_exists(record).await.unwrap_or(false)
    }

    /// Hash the bytes currently stored for `record`.
    pub async fn hash_stored(&self, record: &AttachmentRecord) -> io::Result<String> {
        let mut file = fs::File::open(&record.storage_path).await?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; self.buffer_size];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    }

    pub fn content_uri(&self, file_name: &str) -> String {
        format!("content://{}/attachments/{}", self.authority, file_name)
    }
}

fn unreadable(source: &SourceHandle, e: &io::Error) -> ImportError {
    ImportError::SourceUnreadable {
        source_uri: source.to_string(),
        reason: e.to_string(),
    }
}

/// Fill `buf` until it is full or the reader reaches EOF.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Pick a content type: magic bytes, then extension, then the declared type.
pub fn detect_mime(name: &str, head: &[u8], declared: Option<&str>) -> String {
    if let Some(kind) = infer::get(head) {
        return kind.mime_type().to_string();
    }
    if let Some(mime) = name_extension(name).and_then(|ext| mime_from_extension(&ext)) {
        return mime.to_string();
    }
    declared
        .filter(|d| !d.trim().is_empty())
        .unwrap_or(FALLBACK_MIME)
        .to_string()
}

fn extension_for(name: &str, head: &[u8]) -> Option<String> {
    name_extension(name).or_else(|| infer::get(head).map(|kind| kind.extension().to_string()))
}

fn name_extension(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() {
        return None;
    }
    let ext = ext.trim().to_lowercase();
    if ext.is_empty() || ext.len() >= 10 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext)
}

fn mime_from_extension(ext: &str) -> Option<&'static str> {
    let mime = match ext {
        "txt" | "text" | "log" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "csv" => "text/csv",
        "json" => "application/json",
        "xml" => "application/xml",
        "html" | "htm" => "text/html",
        "pdf" => "application/pdf",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "svg" => "image/svg+xml",
        _ => return None,
    };
    Some(mime)
}
