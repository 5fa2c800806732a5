//! Streaming Processor (SPEC_FULL §4.6).
//!
//! Grounded on the donor original's `streaming_processor.py`
//! (`StreamingFileProcessor`): hash-based dedup, chunk-stream-embed-insert
//! loop with periodic snapshotting, directory walking, OOM downgrade-to-eco
//! retry, and the binary/float search scoring formulas.

use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};

use crate::chunker::{ChunkerSettings, ParagraphChunker};
use crate::embedder::{EncodedBatch, Embedder};
use crate::error::{EngineError, EngineResult};
use crate::lang::is_text_extension;
use crate::modes::{Mode, ModeSettings};
use crate::store::{Chunk, MetadataStore};
use crate::vector_index::{Backend, SearchHit, VectorIndex};

/// Chunks are flushed to the vector index snapshot every this-many insertions.
const SNAPSHOT_INTERVAL: usize = 100;

#[derive(Debug, Clone, serde::Serialize)]
pub struct IndexOutcome {
    pub file_path: String,
    pub file_hash: String,
    pub chunks_indexed: usize,
    pub skipped_duplicate: bool,
    /// Set when the file's extension is not one this engine extracts text
    /// from (SPEC_FULL §4.6 step 4 / §7 ExtractionError): skipped rather than
    /// read and chunked as garbage bytes.
    pub skipped_unsupported_type: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DirectoryOutcome {
    pub files_indexed: usize,
    pub files_skipped: usize,
    pub chunks_indexed: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SearchResult {
    pub id: i64,
    pub file_path: String,
    pub file_name: String,
    pub text: String,
    pub chunk_index: i64,
    pub total_chunks: i64,
    pub score: f64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct EngineStats {
    pub mode: String,
    pub total_chunks: i64,
    pub total_files: i64,
    pub index_total_vectors: usize,
    pub index_active_mappings: usize,
    pub backend: String,
}

/// Computes a file's content hash, falling back to a path+mtime+size
/// fingerprint when the content cannot be read in full up front (matches
/// the donor's `compute_file_hash` fallback for very large files).
pub fn compute_file_hash(path: &Path) -> EngineResult<String> {
    let metadata = std::fs::metadata(path)?;
    if metadata.len() > 50 * 1024 * 1024 {
        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let mut hasher = Sha256::new();
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update(modified.to_le_bytes());
        hasher.update(metadata.len().to_le_bytes());
        return Ok(format!("{:x}", hasher.finalize()));
    }

    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Orchestrates the chunker, embedder, vector index, and metadata store for
/// one mode's worth of ingestion and retrieval. Owns no mode-switch logic of
/// its own; callers (the adaptive pipeline) reconstruct a new processor when
/// the mode changes.
pub struct StreamingProcessor {
    mode: Mode,
    settings: ModeSettings,
    chunker: ParagraphChunker,
    embedder: Embedder,
    index: parking_lot::RwLock<VectorIndex>,
    store: MetadataStore,
    snapshot_path: PathBuf,
    next_id: AtomicI64,
}

impl StreamingProcessor {
    pub fn new(mode: Mode, store: MetadataStore, snapshot_path: PathBuf) -> EngineResult<Self> {
        let settings = mode.settings();
        let embedder = Embedder::new(mode)?;
        let backend = if settings.is_binary() {
            Backend::Binary
        } else {
            Backend::Float
        };

        let index = if snapshot_path.exists() {
            VectorIndex::load(&snapshot_path, backend, settings.embedding_dim)?
        } else {
            VectorIndex::new(backend, settings.embedding_dim)
        };

        let next_id = store.get_max_id()? + 1;

        Ok(Self {
            mode,
            chunker: ParagraphChunker::new(ChunkerSettings::from_mode_settings(&settings)),
            embedder,
            index: parking_lot::RwLock::new(index),
            store,
            snapshot_path,
            next_id: AtomicI64::new(next_id),
            settings,
        })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn backend_name(&self) -> &'static str {
        self.embedder.backend_name()
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    pub fn index(&self) -> &parking_lot::RwLock<VectorIndex> {
        &self.index
    }

    /// Indexes one file: hashes it, skips if the hash already exists, else
    /// streams chunks through the embedder and vector index, falling back to
    /// eco-mode batching once on an out-of-memory signal (SPEC_FULL §4.6).
    pub fn index_file(&self, path: &Path) -> EngineResult<IndexOutcome> {
        if !path.is_file() {
            return Err(EngineError::Input(format!("not a regular file: {}", path.display())));
        }

        let file_type = path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        if !is_text_extension(&file_type) {
            return Ok(IndexOutcome {
                file_path: path.to_string_lossy().to_string(),
                file_hash: String::new(),
                chunks_indexed: 0,
                skipped_duplicate: false,
                skipped_unsupported_type: true,
            });
        }

        let file_hash = compute_file_hash(path)?;
        if self.store.check_hash_exists(&file_hash)? {
            return Ok(IndexOutcome {
                file_path: path.to_string_lossy().to_string(),
                file_hash,
                chunks_indexed: 0,
                skipped_duplicate: true,
                skipped_unsupported_type: false,
            });
        }

        let metadata = std::fs::metadata(path)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let chunks = self.chunker.chunk_file(path)?;
        if chunks.is_empty() {
            return Ok(IndexOutcome {
                file_path: path.to_string_lossy().to_string(),
                file_hash,
                chunks_indexed: 0,
                skipped_duplicate: false,
                skipped_unsupported_type: false,
            });
        }

        let inserted_ids = match self.ingest_chunks(&chunks, &file_hash, path, &file_name, &file_type, metadata.len()) {
            Ok(ids) => ids,
            Err(EngineError::Resource(_)) if self.mode != Mode::Eco => {
                tracing::warn!("resource pressure indexing {}; retrying remaining work in eco batching", path.display());
                self.ingest_chunks_eco(&chunks, &file_hash, path, &file_name, &file_type, metadata.len())?
            }
            Err(e) => return Err(e),
        };

        self.store.update_total_chunks(&inserted_ids, inserted_ids.len() as i64)?;

        // The loop inside `ingest_chunks` already snapshots at every 100-chunk
        // boundary; a count that isn't a multiple of `SNAPSHOT_INTERVAL` means
        // either the whole file was under the threshold (the common case) or
        // a trailing remainder never hit a boundary. Either way it would
        // otherwise sit unpersisted until some later file's snapshot.
        if !inserted_ids.is_empty() && inserted_ids.len() % SNAPSHOT_INTERVAL != 0 {
            self.save_snapshot()?;
        }

        Ok(IndexOutcome {
            file_path: path.to_string_lossy().to_string(),
            file_hash,
            chunks_indexed: inserted_ids.len(),
            skipped_duplicate: false,
            skipped_unsupported_type: false,
        })
    }

    fn ingest_chunks(
        &self,
        chunks: &[String],
        file_hash: &str,
        path: &Path,
        file_name: &str,
        file_type: &str,
        file_size: u64,
    ) -> EngineResult<Vec<i64>> {
        let batch_size = self.settings.batch_size.max(1);
        let mut inserted_ids = Vec::with_capacity(chunks.len());
        let mut snapshot_countdown = SNAPSHOT_INTERVAL;

        for (batch_idx, batch) in chunks.chunks(batch_size).enumerate() {
            let texts: Vec<&str> = batch.iter().map(String::as_str).collect();
            let encoded = self.embedder.encode(&texts)?;
            let ids: Vec<i64> = (0..batch.len())
                .map(|_| self.next_id.fetch_add(1, Ordering::SeqCst))
                .collect();

            self.add_to_index(&encoded, &ids)?;

            let records: Vec<Chunk> = batch
                .iter()
                .zip(ids.iter())
                .enumerate()
                .map(|(i, (text, &id))| Chunk {
                    id,
                    file_hash: file_hash.to_string(),
                    file_path: path.to_string_lossy().to_string(),
                    file_name: file_name.to_string(),
                    file_type: file_type.to_string(),
                    file_size: file_size as i64,
                    text: text.clone(),
                    chunk_index: (batch_idx * batch_size + i) as i64,
                    total_chunks: -1,
                    modified_date: None,
                })
                .collect();
            self.store.batch_insert_chunks(&records)?;
            inserted_ids.extend(ids);

            if inserted_ids.len() >= snapshot_countdown {
                self.save_snapshot()?;
                snapshot_countdown += SNAPSHOT_INTERVAL;
            }
        }

        Ok(inserted_ids)
    }

    /// Retry path after a resource error: re-chunks the same text one chunk
    /// at a time under eco-mode's batch size of 1, never recursing again.
    fn ingest_chunks_eco(
        &self,
        chunks: &[String],
        file_hash: &str,
        path: &Path,
        file_name: &str,
        file_type: &str,
        file_size: u64,
    ) -> EngineResult<Vec<i64>> {
        let mut inserted_ids = Vec::with_capacity(chunks.len());
        for (i, text) in chunks.iter().enumerate() {
            let encoded = self.embedder.encode(&[text.as_str()])?;
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            self.add_to_index(&encoded, &[id])?;
            self.store.insert_chunk(&Chunk {
                id,
                file_hash: file_hash.to_string(),
                file_path: path.to_string_lossy().to_string(),
                file_name: file_name.to_string(),
                file_type: file_type.to_string(),
                file_size: file_size as i64,
                text: text.clone(),
                chunk_index: i as i64,
                total_chunks: -1,
                modified_date: None,
            })?;
            inserted_ids.push(id);
        }
        Ok(inserted_ids)
    }

    fn add_to_index(&self, encoded: &EncodedBatch, ids: &[i64]) -> EngineResult<()> {
        let mut index = self.index.write();
        match encoded {
            EncodedBatch::Float(rows) => index.add_float(rows, ids),
            EncodedBatch::Binary(rows) => index.add_binary(rows, ids),
        }
    }

    /// Walks a directory (respecting ignore files, matching the donor's use
    /// of `ignore::WalkBuilder`) and indexes every text-extension file found,
    /// in parallel over the discovered file list.
    pub fn index_directory(&self, dir: &Path, recursive: bool) -> EngineResult<DirectoryOutcome> {
        if !dir.is_dir() {
            return Err(EngineError::Input(format!("not a directory: {}", dir.display())));
        }

        let mut walker = ignore::WalkBuilder::new(dir);
        walker.max_depth(if recursive { None } else { Some(1) });
        let entries = walker.build();

        let files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_some_and(|t| t.is_file()))
            .map(|e| e.into_path())
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(is_text_extension)
            })
            .collect();

        let results: Vec<Result<IndexOutcome, String>> = files
            .par_iter()
            .map(|path| self.index_file(path).map_err(|e| format!("{}: {e}", path.display())))
            .collect();

        let mut outcome = DirectoryOutcome {
            files_indexed: 0,
            files_skipped: 0,
            chunks_indexed: 0,
            errors: Vec::new(),
        };
        for result in results {
            match result {
                Ok(r) if r.skipped_duplicate => outcome.files_skipped += 1,
                Ok(r) => {
                    outcome.files_indexed += 1;
                    outcome.chunks_indexed += r.chunks_indexed;
                }
                Err(e) => outcome.errors.push(e),
            }
        }

        self.save_snapshot()?;
        Ok(outcome)
    }

    /// Embeds `query`, searches the vector index for the top `k` neighbors,
    /// and hydrates each hit with its stored text. Scoring: binary backend
    /// reports `1 - hamming/dim` (similarity, higher is better); float
    /// backend reports `1 / (1 + squared_l2)` (also higher is better).
    pub fn search(&self, query: &str, k: usize) -> EngineResult<Vec<SearchResult>> {
        if query.trim().is_empty() {
            return Err(EngineError::Input("query must not be empty".into()));
        }

        let encoded = self.embedder.encode_one(query)?;
        let index = self.index.read();

        let hits: Vec<SearchHit> = match encoded {
            EncodedBatch::Float(rows) => index.search_float(&rows[0], k)?,
            EncodedBatch::Binary(rows) => index.search_binary(&rows[0], k)?,
        };
        drop(index);

        let dim = self.settings.embedding_dim as f64;
        let ids: Vec<i64> = hits.iter().map(|h| h.doc_id).collect();
        let records = self.store.fetch_by_id(&ids)?;
        let by_id: std::collections::HashMap<i64, Chunk> =
            records.into_iter().map(|c| (c.id, c)).collect();

        let results = hits
            .into_iter()
            .filter_map(|hit| {
                let chunk = by_id.get(&hit.doc_id)?;
                let score = if self.settings.is_binary() {
                    1.0 - (hit.distance / dim)
                } else {
                    1.0 / (1.0 + hit.distance)
                };
                Some(SearchResult {
                    id: chunk.id,
                    file_path: chunk.file_path.clone(),
                    file_name: chunk.file_name.clone(),
                    text: chunk.text.clone(),
                    chunk_index: chunk.chunk_index,
                    total_chunks: chunk.total_chunks,
                    score,
                })
            })
            .collect();

        Ok(results)
    }

    pub fn delete_by_hash(&self, file_hash: &str) -> EngineResult<usize> {
        let ids = self.store.get_ids_by_hashes(&[file_hash.to_string()])?;
        if ids.is_empty() {
            return Ok(0);
        }
        self.index.write().remove(&ids);
        let deleted = self.store.delete_by_hashes(&[file_hash.to_string()])?;
        self.save_snapshot()?;
        Ok(deleted)
    }

    pub fn clear(&self) -> EngineResult<()> {
        self.index.write().clear();
        self.store.clear_all()?;
        self.save_snapshot()
    }

    pub fn get_stats(&self) -> EngineResult<EngineStats> {
        let stats = self.index.read().stats();
        Ok(EngineStats {
            mode: self.mode.as_str().to_string(),
            total_chunks: self.store.count_chunks()?,
            total_files: self.store.count_unique_files()?,
            index_total_vectors: stats.total_vectors,
            index_active_mappings: stats.active_mappings,
            backend: format!("{:?}", stats.backend).to_lowercase(),
        })
    }

    pub fn save_snapshot(&self) -> EngineResult<()> {
        self.index.read().persist(&self.snapshot_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processor(dir: &Path, mode: Mode) -> StreamingProcessor {
        let store = MetadataStore::open_in_memory().unwrap();
        StreamingProcessor::new(mode, store, dir.join("index.bin")).unwrap()
    }

    #[test]
    fn indexing_same_file_twice_skips_as_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "hello world, this is a test document.").unwrap();

        let proc = processor(dir.path(), Mode::Eco);
        let first = proc.index_file(&file).unwrap();
        assert!(!first.skipped_duplicate);
        assert!(first.chunks_indexed > 0);

        let second = proc.index_file(&file).unwrap();
        assert!(second.skipped_duplicate);
        assert_eq!(second.chunks_indexed, 0);
    }

    #[test]
    fn search_returns_hydrated_results_with_scores() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("doc.txt");
        std::fs::write(&file, "the quick brown fox jumps over the lazy dog").unwrap();

        let proc = processor(dir.path(), Mode::Performance);
        proc.index_file(&file).unwrap();

        let results = proc.search("quick fox", 5).unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].file_name, "doc.txt");
        assert!(results[0].score.is_finite());
    }

    #[test]
    fn empty_query_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let proc = processor(dir.path(), Mode::Eco);
        assert!(proc.search("   ", 5).is_err());
    }

    #[test]
    fn delete_by_hash_removes_chunks_and_mappings() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "some content to index and then delete").unwrap();

        let proc = processor(dir.path(), Mode::Eco);
        let outcome = proc.index_file(&file).unwrap();
        let deleted = proc.delete_by_hash(&outcome.file_hash).unwrap();
        assert!(deleted > 0);
        assert_eq!(proc.store().count_chunks().unwrap(), 0);
    }

    #[test]
    fn index_directory_indexes_only_text_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "some readable text content here").unwrap();
        std::fs::write(dir.path().join("b.bin"), [0u8, 1, 2, 3]).unwrap();

        let proc = processor(dir.path(), Mode::Eco);
        let outcome = proc.index_directory(dir.path(), true).unwrap();
        assert_eq!(outcome.files_indexed, 1);
    }

    #[test]
    fn clear_empties_both_store_and_index() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "content for clearing test").unwrap();

        let proc = processor(dir.path(), Mode::Eco);
        proc.index_file(&file).unwrap();
        proc.clear().unwrap();

        let stats = proc.get_stats().unwrap();
        assert_eq!(stats.total_chunks, 0);
        assert_eq!(stats.index_active_mappings, 0);
    }
}
