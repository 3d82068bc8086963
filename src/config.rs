//! TOML configuration for the attachment vault.
//!
//! A single file describes where the metadata database lives, where the
//! private storage root is, and the limits applied while importing.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub import: ImportConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Private directory holding every stored attachment file.
    pub root: PathBuf,
    /// Authority used when building `content://` handles for stored files.
    #[serde(default = "default_content_authority")]
    pub content_authority: String,
    #[serde(default = "default_copy_buffer_bytes")]
    pub copy_buffer_bytes: usize,
}

fn default_content_authority() -> String {
    "vault.attachments".to_string()
}
fn default_copy_buffer_bytes() -> usize {
    64 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImportConfig {
    /// Upper bound on a single imported file. `0` disables the limit.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_max_file_bytes() -> u64 {
    100 * 1024 * 1024
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*".to_string()]
}

impl ImportConfig {
    pub fn size_limit(&self) -> Option<u64> {
        (self.max_file_bytes > 0).then_some(self.max_file_bytes)
    }
}

impl Config {
    /// Configuration with the database and storage root placed under `dir`.
    pub fn for_root(dir: &Path) -> Self {
        Self {
            db: DbConfig {
                path: dir.join("vault.sqlite"),
            },
            storage: StorageConfig {
                root: dir.join("attachments"),
                content_authority: default_content_authority(),
                copy_buffer_bytes: default_copy_buffer_bytes(),
            },
            import: ImportConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;

    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.storage.copy_buffer_bytes == 0 {
        anyhow::bail!("storage.copy_buffer_bytes must be > 0");
    }

    let authority = config.storage.content_authority.trim();
    if authority.is_empty() {
        anyhow::bail!("storage.content_authority must not be empty");
    }
    if authority.contains('/') {
        anyhow::bail!(
            "storage.content_authority must not contain '/': '{}'",
            authority
        );
    }

    if config.db.path == config.storage.root {
        anyhow::bail!("db.path and storage.root must differ");
    }

    Ok(())
}
