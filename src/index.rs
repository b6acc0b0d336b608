//! Persistent vector index.
//!
//! An index is built once from a document source (chunk, embed, persist) or
//! restored once from disk, and is never mutated afterwards. On disk it is a
//! directory (default `storage/`) holding a single SQLite file,
//! `index.sqlite`, with four tables:
//!
//! | Table | Contents |
//! |-------|----------|
//! | `meta` | schema version, embedding model and dims, build time, chunk count |
//! | `documents` | one row per source document |
//! | `chunks` | chunk text, contiguous per document |
//! | `vectors` | one little-endian `f32` BLOB per chunk |
//!
//! # Atomic persistence
//!
//! A build writes into a sibling staging directory
//! (`.<name>.staging-<uuid>`), commits every row in one transaction, closes
//! the database, and renames the staging directory onto the index location.
//! If anything fails or the build is interrupted, the staging guard removes
//! the partial directory, so the index location is either absent or
//! complete. Stale staging directories from a crashed process are swept
//! before the next build.
//!
//! # Load validation
//!
//! Loading checks the schema version, the embedding model name and
//! dimensionality against the active embedder, every vector's size, and the
//! recorded chunk count. Any mismatch is a [`BuddyError::CorruptIndex`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sqlx::{Row, SqlitePool};

use crate::chunk::chunk_text;
use crate::config::{ChunkingConfig, Config};
use crate::db;
use crate::embedding::{blob_to_vec, vec_to_blob, Embedder};
use crate::error::{BuddyError, Result};
use crate::loader::DocumentSource;
use crate::migrate::{self, SCHEMA_VERSION};
use crate::models::{Chunk, Document, RetrievalHit};
use crate::progress::{BuildProgress, NoProgress, ProgressReporter};
use crate::search;
use crate::settings::Settings;

/// File name of the index database inside the index directory.
pub const INDEX_FILE: &str = "index.sqlite";

/// A chunk together with its embedding.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk: Chunk,
    /// `source_id` of the parent document.
    pub source_id: String,
    pub vector: Vec<f32>,
}

/// Document descriptor kept in the index (the body lives in the chunks).
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentInfo {
    pub id: String,
    pub source_id: String,
    pub path: String,
    pub title: String,
    pub content_type: String,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexMeta {
    pub schema_version: i64,
    pub embedding_model: String,
    pub embedding_dims: usize,
    /// Build time (Unix seconds).
    pub built_at: i64,
}

/// An immutable in-memory index.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    meta: IndexMeta,
    documents: Vec<DocumentInfo>,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    pub fn meta(&self) -> &IndexMeta {
        &self.meta
    }

    pub fn documents(&self) -> &[DocumentInfo] {
        &self.documents
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The `k` chunks most similar to `query`, best first.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<RetrievalHit> {
        search::top_k(&self.entries, query, k)
    }
}

/// How [`IndexStore::open_or_build`] obtained its index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOrigin {
    /// Restored from disk; the document source was not read.
    Loaded,
    /// Built from the document source because nothing was persisted.
    Built,
    /// The persisted index was corrupt and has been rebuilt.
    Rebuilt,
}

/// What to do when the persisted index cannot be loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorruptIndexPolicy {
    Rebuild,
    Fail,
}

impl CorruptIndexPolicy {
    pub fn from_config(config: &Config) -> Self {
        if config.index.rebuild_on_corrupt {
            Self::Rebuild
        } else {
            Self::Fail
        }
    }
}

/// Builds, loads, and destroys the index at one storage location.
pub struct IndexStore {
    dir: PathBuf,
    embedder: Arc<dyn Embedder>,
    chunking: ChunkingConfig,
    batch_size: usize,
    progress: Box<dyn ProgressReporter>,
}

impl IndexStore {
    pub fn new(dir: impl Into<PathBuf>, settings: &Settings) -> Self {
        Self {
            dir: dir.into(),
            embedder: Arc::clone(&settings.embedder),
            chunking: ChunkingConfig::default(),
            batch_size: 64,
            progress: Box::new(NoProgress),
        }
    }

    pub fn from_config(config: &Config, settings: &Settings) -> Self {
        Self::new(&config.index.dir, settings)
            .with_chunking(config.chunking.clone())
            .with_batch_size(config.embedding.batch_size)
    }

    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_progress(mut self, progress: Box<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn location(&self) -> &Path {
        &self.dir
    }

    /// Whether something is persisted at the storage location.
    pub fn exists(&self) -> bool {
        self.dir.symlink_metadata().is_ok()
    }

    /// Load the persisted index if present, otherwise build it from `source`.
    ///
    /// The document source is only read when a build is needed.
    pub async fn open_or_build(
        &self,
        source: &dyn DocumentSource,
        on_corrupt: CorruptIndexPolicy,
    ) -> Result<(VectorIndex, IndexOrigin)> {
        if self.exists() {
            match self.load().await {
                Ok(index) => return Ok((index, IndexOrigin::Loaded)),
                Err(err @ BuddyError::CorruptIndex { .. }) => {
                    if on_corrupt == CorruptIndexPolicy::Fail {
                        return Err(err);
                    }
                    tracing::warn!(error = %err, "persisted index unusable, rebuilding");
                    self.destroy()?;
                    let index = self.build_from(source).await?;
                    return Ok((index, IndexOrigin::Rebuilt));
                }
                Err(err) => return Err(err),
            }
        }

        let index = self.build_from(source).await?;
        Ok((index, IndexOrigin::Built))
    }

    async fn build_from(&self, source: &dyn DocumentSource) -> Result<VectorIndex> {
        self.progress.report(BuildProgress::Loading);
        tracing::info!(source = %source.describe(), "building index");
        let documents = source.load().await?;
        self.build(&documents).await
    }

    /// Chunk and embed `documents`, then persist the result.
    pub async fn build(&self, documents: &[Document]) -> Result<VectorIndex> {
        if documents.is_empty() {
            return Err(BuddyError::Ingestion("no documents to index".to_string()));
        }
        self.progress.report(BuildProgress::Chunking {
            documents: documents.len() as u64,
        });

        let mut pending: Vec<(Chunk, String)> = Vec::new();
        for doc in documents {
            for chunk in chunk_text(
                &doc.id,
                &doc.body,
                self.chunking.max_tokens,
                self.chunking.overlap_tokens,
            ) {
                if !chunk.text.trim().is_empty() {
                    pending.push((chunk, doc.source_id.clone()));
                }
            }
        }
        if pending.is_empty() {
            return Err(BuddyError::Ingestion(
                "documents contain no text".to_string(),
            ));
        }

        let total = pending.len() as u64;
        let mut entries = Vec::with_capacity(pending.len());
        for batch in pending.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|(c, _)| c.text.clone()).collect();
            let vectors = self.embedder.embed(&texts).await?;
            if vectors.len() != batch.len() {
                return Err(BuddyError::provider(
                    self.embedder.model_name(),
                    format!("expected {} embeddings, got {}", batch.len(), vectors.len()),
                ));
            }
            for ((chunk, source_id), vector) in batch.iter().zip(vectors) {
                entries.push(IndexEntry {
                    chunk: chunk.clone(),
                    source_id: source_id.clone(),
                    vector,
                });
            }
            self.progress.report(BuildProgress::Embedding {
                n: entries.len() as u64,
                total,
            });
        }

        let index = VectorIndex {
            meta: IndexMeta {
                schema_version: SCHEMA_VERSION,
                embedding_model: self.embedder.model_name().to_string(),
                embedding_dims: self.embedder.dims(),
                built_at: chrono::Utc::now().timestamp(),
            },
            documents: documents
                .iter()
                .map(|d| DocumentInfo {
                    id: d.id.clone(),
                    source_id: d.source_id.clone(),
                    path: d.path.display().to_string(),
                    title: d.title.clone(),
                    content_type: d.content_type.clone(),
                    updated_at: d.updated_at,
                })
                .collect(),
            entries,
        };

        self.progress.report(BuildProgress::Persisting { chunks: total });
        self.persist(&index).await?;
        tracing::info!(
            dir = %self.dir.display(),
            documents = index.documents.len(),
            chunks = index.len(),
            "index persisted"
        );
        Ok(index)
    }

    /// Restore the persisted index.
    pub async fn load(&self) -> Result<VectorIndex> {
        load_index(&self.dir, self.embedder.as_ref()).await
    }

    /// Delete the storage location. Returns whether anything was removed.
    pub fn destroy(&self) -> Result<bool> {
        destroy_index(&self.dir)
    }

    async fn persist(&self, index: &VectorIndex) -> Result<()> {
        let (parent, name) = split_location(&self.dir)?;
        std::fs::create_dir_all(&parent)?;
        sweep_stale_staging(&parent, &name);

        let staging = StagingDir::create(&parent, &name)?;
        let pool = db::connect(&staging.path().join(INDEX_FILE), true).await?;
        let written = write_index(&pool, index).await;
        pool.close().await;
        written?;

        if self.exists() {
            destroy_index(&self.dir)?;
        }
        staging.commit(&self.dir)?;
        Ok(())
    }
}

async fn write_index(pool: &SqlitePool, index: &VectorIndex) -> Result<()> {
    migrate::create_schema(pool).await?;
    let mut tx = pool.begin().await?;

    let meta = [
        ("schema_version", index.meta.schema_version.to_string()),
        ("embedding_model", index.meta.embedding_model.clone()),
        ("embedding_dims", index.meta.embedding_dims.to_string()),
        ("built_at", index.meta.built_at.to_string()),
        ("chunk_count", index.entries.len().to_string()),
    ];
    for (key, value) in meta {
        sqlx::query("INSERT INTO meta (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
    }

    for doc in &index.documents {
        sqlx::query(
            "INSERT INTO documents (id, source_id, path, title, content_type, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&doc.id)
        .bind(&doc.source_id)
        .bind(&doc.path)
        .bind(&doc.title)
        .bind(&doc.content_type)
        .bind(doc.updated_at)
        .execute(&mut *tx)
        .await?;
    }

    for entry in &index.entries {
        let chunk = &entry.chunk;
        sqlx::query(
            "INSERT INTO chunks (id, document_id, chunk_index, text, hash) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk.chunk_index)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO vectors (chunk_id, dims, embedding) VALUES (?, ?, ?)")
            .bind(&chunk.id)
            .bind(entry.vector.len() as i64)
            .bind(vec_to_blob(&entry.vector))
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Restore the index persisted under `dir`, validated against `embedder`.
pub async fn load_index(dir: &Path, embedder: &dyn Embedder) -> Result<VectorIndex> {
    let file = dir.join(INDEX_FILE);
    if !file.is_file() {
        return Err(BuddyError::corrupt(dir, format!("{} is missing", INDEX_FILE)));
    }

    let pool = db::connect(&file, false)
        .await
        .map_err(|e| BuddyError::corrupt(dir, e.to_string()))?;
    let result = read_index(&pool, dir, embedder).await;
    pool.close().await;

    let index = result?;
    tracing::info!(
        dir = %dir.display(),
        documents = index.documents.len(),
        chunks = index.len(),
        "index loaded"
    );
    Ok(index)
}

async fn read_index(pool: &SqlitePool, dir: &Path, embedder: &dyn Embedder) -> Result<VectorIndex> {
    let corrupt = |reason: String| BuddyError::corrupt(dir, reason);
    let sql_err = |e: sqlx::Error| BuddyError::corrupt(dir, e.to_string());

    let meta_rows = sqlx::query("SELECT key, value FROM meta")
        .fetch_all(pool)
        .await
        .map_err(sql_err)?;
    let mut meta: HashMap<String, String> = HashMap::new();
    for row in meta_rows {
        meta.insert(
            row.try_get("key").map_err(sql_err)?,
            row.try_get("value").map_err(sql_err)?,
        );
    }
    let meta_value = |key: &str| {
        meta.get(key)
            .cloned()
            .ok_or_else(|| corrupt(format!("meta.{} is missing", key)))
    };
    let meta_number = |key: &str| -> Result<i64> {
        meta_value(key)?
            .parse::<i64>()
            .map_err(|_| corrupt(format!("meta.{} is not a number", key)))
    };

    let schema_version = meta_number("schema_version")?;
    if schema_version != SCHEMA_VERSION {
        return Err(corrupt(format!(
            "schema version {} (expected {})",
            schema_version, SCHEMA_VERSION
        )));
    }

    let embedding_model = meta_value("embedding_model")?;
    let embedding_dims = meta_number("embedding_dims")? as usize;
    if embedding_model != embedder.model_name() || embedding_dims != embedder.dims() {
        return Err(corrupt(format!(
            "built with {} ({} dims) but the active embedder is {} ({} dims)",
            embedding_model,
            embedding_dims,
            embedder.model_name(),
            embedder.dims()
        )));
    }
    let built_at = meta_number("built_at")?;
    let chunk_count = meta_number("chunk_count")? as usize;

    let documents = sqlx::query(
        "SELECT id, source_id, path, title, content_type, updated_at \
         FROM documents ORDER BY source_id",
    )
    .fetch_all(pool)
    .await
    .map_err(sql_err)?
    .into_iter()
    .map(|row| -> std::result::Result<DocumentInfo, sqlx::Error> {
        Ok(DocumentInfo {
            id: row.try_get("id")?,
            source_id: row.try_get("source_id")?,
            path: row.try_get("path")?,
            title: row.try_get("title")?,
            content_type: row.try_get("content_type")?,
            updated_at: row.try_get("updated_at")?,
        })
    })
    .collect::<std::result::Result<Vec<_>, _>>()
    .map_err(sql_err)?;

    let rows = sqlx::query(
        r#"
        SELECT c.id, c.document_id, c.chunk_index, c.text, c.hash, d.source_id, v.embedding
        FROM chunks c
        JOIN documents d ON d.id = c.document_id
        LEFT JOIN vectors v ON v.chunk_id = c.id
        ORDER BY d.source_id, c.chunk_index
        "#,
    )
    .fetch_all(pool)
    .await
    .map_err(sql_err)?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        let id: String = row.try_get("id").map_err(sql_err)?;
        let blob: Option<Vec<u8>> = row.try_get("embedding").map_err(sql_err)?;
        let vector = blob
            .as_deref()
            .and_then(blob_to_vec)
            .ok_or_else(|| corrupt(format!("chunk {} has no readable vector", id)))?;
        if vector.len() != embedding_dims {
            return Err(corrupt(format!(
                "chunk {} has a {}-dimensional vector (expected {})",
                id,
                vector.len(),
                embedding_dims
            )));
        }
        entries.push(IndexEntry {
            chunk: Chunk {
                id,
                document_id: row.try_get("document_id").map_err(sql_err)?,
                chunk_index: row.try_get("chunk_index").map_err(sql_err)?,
                text: row.try_get("text").map_err(sql_err)?,
                hash: row.try_get("hash").map_err(sql_err)?,
            },
            source_id: row.try_get("source_id").map_err(sql_err)?,
            vector,
        });
    }

    if entries.len() != chunk_count {
        return Err(corrupt(format!(
            "{} chunks stored but {} recorded",
            entries.len(),
            chunk_count
        )));
    }
    if entries.is_empty() {
        return Err(corrupt("index holds no chunks".to_string()));
    }

    Ok(VectorIndex {
        meta: IndexMeta {
            schema_version,
            embedding_model,
            embedding_dims,
            built_at,
        },
        documents,
        entries,
    })
}

/// Delete the index at `dir`. Returns whether anything was removed.
pub fn destroy_index(dir: &Path) -> Result<bool> {
    let metadata = match dir.symlink_metadata() {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    if metadata.is_dir() {
        std::fs::remove_dir_all(dir)?;
    } else {
        std::fs::remove_file(dir)?;
    }
    tracing::info!(dir = %dir.display(), "index destroyed");
    Ok(true)
}

fn split_location(dir: &Path) -> Result<(PathBuf, String)> {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| {
            BuddyError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid index location: {}", dir.display()),
            ))
        })?;
    let parent = dir
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    Ok((parent, name))
}

fn staging_prefix(name: &str) -> String {
    format!(".{}.staging-", name)
}

/// Remove staging directories left behind by a crashed build.
fn sweep_stale_staging(parent: &Path, name: &str) {
    let prefix = staging_prefix(name);
    let Ok(entries) = std::fs::read_dir(parent) else {
        return;
    };
    for entry in entries.flatten() {
        if entry.file_name().to_string_lossy().starts_with(&prefix) {
            tracing::warn!(path = %entry.path().display(), "removing stale staging directory");
            let _ = std::fs::remove_dir_all(entry.path());
        }
    }
}

/// A staging directory that deletes itself unless committed.
struct StagingDir {
    path: PathBuf,
    committed: bool,
}

impl StagingDir {
    fn create(parent: &Path, name: &str) -> std::io::Result<Self> {
        let path = parent.join(format!("{}{}", staging_prefix(name), uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&path)?;
        Ok(Self {
            path,
            committed: false,
        })
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn commit(mut self, target: &Path) -> std::io::Result<()> {
        std::fs::rename(&self.path, target)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }
}
