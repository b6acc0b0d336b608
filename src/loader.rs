//! Document source: every matching file under a directory.
//!
//! [`DirectorySource`] walks `documents.root`, applies include/exclude globs,
//! and turns each file into a [`Document`]. Text files are read as UTF-8;
//! PDF, DOCX, and PPTX go through [`crate::extract`]. Files that cannot be
//! read or extracted are skipped with a warning; a source that yields no text
//! at all is an ingestion error.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::config::DocumentsConfig;
use crate::error::{BuddyError, Result};
use crate::extract;
use crate::models::Document;

/// Produces the documents an index is built from.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Human-readable location, for logs and errors.
    fn describe(&self) -> String;
    /// Load every document. Returns [`BuddyError::Ingestion`] when nothing usable exists.
    async fn load(&self) -> Result<Vec<Document>>;
}

pub struct DirectorySource {
    config: DocumentsConfig,
}

impl DirectorySource {
    pub fn new(config: DocumentsConfig) -> Self {
        Self { config }
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }
}

#[async_trait]
impl DocumentSource for DirectorySource {
    fn describe(&self) -> String {
        self.config.root.display().to_string()
    }

    async fn load(&self) -> Result<Vec<Document>> {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || scan_directory(&config))
            .await
            .map_err(|e| BuddyError::Ingestion(format!("document scan failed: {}", e)))?
    }
}

/// Walk `config.root` and load every matching file, sorted by `source_id`.
pub fn scan_directory(config: &DocumentsConfig) -> Result<Vec<Document>> {
    let root = &config.root;
    if !root.is_dir() {
        return Err(BuddyError::Ingestion(format!(
            "document directory does not exist: {}",
            root.display()
        )));
    }

    let include_set = build_globset(&config.include_globs)?;
    let mut excludes = vec!["**/.git/**".to_string(), "**/.*".to_string()];
    excludes.extend(config.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut documents = Vec::new();
    let mut skipped = 0usize;

    for entry in WalkDir::new(root).follow_links(config.follow_symlinks) {
        let entry = entry.map_err(|e| BuddyError::Ingestion(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        match load_file(path, &rel_str) {
            Ok(Some(doc)) => documents.push(doc),
            Ok(None) => {
                tracing::debug!(file = %rel_str, "skipping file without text");
                skipped += 1;
            }
            Err(reason) => {
                tracing::warn!(file = %rel_str, %reason, "skipping unreadable document");
                skipped += 1;
            }
        }
    }

    if documents.is_empty() {
        return Err(BuddyError::Ingestion(format!(
            "no readable documents under {} ({} skipped)",
            root.display(),
            skipped
        )));
    }

    documents.sort_by(|a, b| a.source_id.cmp(&b.source_id));
    tracing::info!(
        root = %root.display(),
        documents = documents.len(),
        skipped,
        "documents loaded"
    );
    Ok(documents)
}

/// Read one file. `Ok(None)` means the file holds no text.
fn load_file(path: &Path, relative_path: &str) -> std::result::Result<Option<Document>, String> {
    let content_type = extract::content_type_for(path);
    let bytes = std::fs::read(path).map_err(|e| e.to_string())?;

    let body = if extract::is_binary(content_type) {
        extract::extract_text(&bytes, content_type).map_err(|e| e.to_string())?
    } else {
        String::from_utf8(bytes).map_err(|_| "not valid UTF-8".to_string())?
    };

    if body.trim().is_empty() {
        return Ok(None);
    }

    let updated_at = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(std::time::SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default();

    let title = path
        .file_stem()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| relative_path.to_string());

    Ok(Some(Document {
        id: document_id(relative_path),
        source_id: relative_path.to_string(),
        path: absolute(path),
        title,
        content_type: content_type.to_string(),
        body,
        updated_at,
    }))
}

/// Stable document id derived from the relative path.
fn document_id(source_id: &str) -> String {
    let digest = Sha256::digest(source_id.as_bytes());
    format!("{:x}", digest)[..16].to_string()
}

fn absolute(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| BuddyError::Ingestion(format!("invalid glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| BuddyError::Ingestion(format!("invalid glob set: {}", e)))
}
