//! External source handles and the resolvers that open them.
//!
//! Callers identify external content with an opaque URI-like string. A
//! [`SourceResolver`] turns that handle into a byte stream plus whatever
//! the source knows about itself (name, declared type, length).

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::error::ImportError;

/// Opaque handle to external content, e.g. `file:///home/me/scan.pdf`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceHandle(String);

impl SourceHandle {
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    pub fn from_path(path: &Path) -> Self {
        Self(format!("file://{}", path.display()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Local filesystem path for `file://` handles and bare paths.
    pub fn local_path(&self) -> Option<PathBuf> {
        if let Some(rest) = self.0.strip_prefix("file://") {
            return Some(PathBuf::from(rest));
        }
        if self.0.contains("://") {
            return None;
        }
        Some(PathBuf::from(&self.0))
    }

    /// Last path segment, used as the display name when the source has none.
    pub fn file_name(&self) -> Option<&str> {
        self.0
            .rsplit(['/', '\\'])
            .next()
            .filter(|name| !name.is_empty())
    }
}

impl fmt::Display for SourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceHandle {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// An opened external source, ready to be streamed.
pub struct OpenedSource {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub display_name: String,
    pub declared_mime: Option<String>,
    /// Length the source announced up front, if it knows one. A stream that
    /// ends short of it is treated as truncated.
    pub expected_len: Option<u64>,
}

/// Opens external source handles for reading.
#[async_trait]
pub trait SourceResolver: Send + Sync {
    async fn open(&self, source: &SourceHandle) -> Result<OpenedSource, ImportError>;
}

/// Resolves `file://` handles and bare paths on the local filesystem.
#[derive(Debug, Default, Clone)]
pub struct FileSourceResolver;

#[async_trait]
impl SourceResolver for FileSourceResolver {
    async fn open(&self, source: &SourceHandle) -> Result<OpenedSource, ImportError> {
        let unreadable = |reason: String| ImportError::SourceUnreadable {
            source_uri: source.to_string(),
            reason,
        };

        let path = source
            .local_path()
            .ok_or_else(|| unreadable("unsupported scheme".to_string()))?;

        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| unreadable(e.to_string()))?;
        if !metadata.is_file() {
            return Err(unreadable("not a regular file".to_string()));
        }

        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| unreadable(e.to_string()))?;

        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "attachment".to_string());

        Ok(OpenedSource {
            reader: Box::new(file),
            display_name,
            declared_mime: None,
            expected_len: Some(metadata.len()),
        })
    }
}
