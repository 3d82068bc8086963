//! Directory scanning for bulk imports.
//!
//! Walks a directory and turns every matching regular file into a
//! [`SourceHandle`], honoring the include/exclude globs from `[import]`.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use walkdir::WalkDir;

use crate::config::ImportConfig;
use crate::source::SourceHandle;

pub fn scan_directory(root: &Path, import: &ImportConfig) -> Result<Vec<SourceHandle>> {
    if !root.is_dir() {
        bail!("import directory does not exist: {}", root.display());
    }

    let include_set = build_globset(&import.include_globs)?;

    let mut default_excludes = vec!["**/.git/**".to_string(), "**/.DS_Store".to_string()];
    default_excludes.extend(import.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut paths = Vec::new();

    let walker = WalkDir::new(root).follow_links(import.follow_symlinks);
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) {
            continue;
        }
        if !include_set.is_match(&rel_str) {
            continue;
        }

        paths.push(path.to_path_buf());
    }

    // Sort for deterministic ordering
    paths.sort();

    Ok(paths.iter().map(|p| SourceHandle::from_path(p)).collect())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
