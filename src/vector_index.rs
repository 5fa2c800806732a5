//! Vector Index (SPEC_FULL §4.4).
//!
//! Grounded on the donor original's `lightweight_faiss.py` (`LightweightFAISSIndex`):
//! a binary/float backend chosen at construction, an explicit `slot -> id` map
//! decoupling physical layout from logical identity, and append-only growth
//! with logical (non-reclaiming) removal. The on-disk snapshot format is the
//! explicit versioned binary layout mandated by Design Notes §9, replacing the
//! Python original's pickle file and the donor's usearch-native save/load.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

pub const EMBEDDING_DIM: usize = 384;
pub const BINARY_BYTES: usize = EMBEDDING_DIM / 8; // 48
pub const FLOAT_BYTES: usize = EMBEDDING_DIM * std::mem::size_of::<f32>(); // 1536

const SNAPSHOT_MAGIC: u32 = 0x4C_57_46_49; // "LWFI"
const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Binary,
    Float,
}

impl Backend {
    fn tag(self) -> u8 {
        match self {
            Backend::Binary => 0,
            Backend::Float => 1,
        }
    }

    fn from_tag(tag: u8) -> EngineResult<Self> {
        match tag {
            0 => Ok(Backend::Binary),
            1 => Ok(Backend::Float),
            other => Err(EngineError::Index(format!("unknown backend tag {other}"))),
        }
    }

    fn bytes_per_vector(self) -> usize {
        match self {
            Backend::Binary => BINARY_BYTES,
            Backend::Float => FLOAT_BYTES,
        }
    }
}

/// One `(doc_id, distance)` result row, non-decreasing by distance.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub doc_id: i64,
    pub distance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_vectors: usize,
    pub active_mappings: usize,
    pub next_internal_id: usize,
    pub backend: Backend,
    pub dim: usize,
    pub bytes_per_vector: usize,
    pub estimated_size_mb: f64,
}

/// Append-only vector store. Exactly one of the two backends is active per
/// instance; mixing binary and float rows within one instance is forbidden
/// (SPEC_FULL invariant 3) and is structurally impossible here since the
/// backend is fixed at construction and every `add` call is validated against it.
pub struct VectorIndex {
    backend: Backend,
    dim: usize,
    /// Raw row-major vector storage; row width is `backend.bytes_per_vector()`.
    data: Vec<u8>,
    slot_to_id: HashMap<usize, i64>,
    next_slot: usize,
}

impl VectorIndex {
    pub fn new(backend: Backend, dim: usize) -> Self {
        Self {
            backend,
            dim,
            data: Vec::new(),
            slot_to_id: HashMap::new(),
            next_slot: 0,
        }
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn ntotal(&self) -> usize {
        self.next_slot
    }

    pub fn len_active(&self) -> usize {
        self.slot_to_id.len()
    }

    /// Appends rows to the backend. `vectors` must be exactly
    /// `ids.len() * backend.bytes_per_vector()` bytes (already-packed binary
    /// rows, or little-endian f32 rows flattened to bytes).
    pub fn add(&mut self, vectors: &[u8], ids: &[i64]) -> EngineResult<()> {
        let row_bytes = self.backend.bytes_per_vector();
        if vectors.len() != ids.len() * row_bytes {
            return Err(EngineError::Index(format!(
                "dimension/dtype mismatch: expected {} bytes for {} ids, got {}",
                ids.len() * row_bytes,
                ids.len(),
                vectors.len()
            )));
        }

        self.data.extend_from_slice(vectors);
        for &id in ids {
            self.slot_to_id.insert(self.next_slot, id);
            self.next_slot += 1;
        }
        Ok(())
    }

    pub fn add_float(&mut self, rows: &[Vec<f32>], ids: &[i64]) -> EngineResult<()> {
        if self.backend != Backend::Float {
            return Err(EngineError::Index("add_float called on non-float backend".into()));
        }
        let mut bytes = Vec::with_capacity(rows.len() * FLOAT_BYTES);
        for row in rows {
            if row.len() != self.dim {
                return Err(EngineError::Index(format!(
                    "expected {}-dim float row, got {}",
                    self.dim,
                    row.len()
                )));
            }
            for v in row {
                bytes.extend_from_slice(&v.to_le_bytes());
            }
        }
        self.add(&bytes, ids)
    }

    pub fn add_binary(&mut self, rows: &[Vec<u8>], ids: &[i64]) -> EngineResult<()> {
        if self.backend != Backend::Binary {
            return Err(EngineError::Index("add_binary called on non-binary backend".into()));
        }
        let mut bytes = Vec::with_capacity(rows.len() * BINARY_BYTES);
        for row in rows {
            if row.len() != BINARY_BYTES {
                return Err(EngineError::Index(format!(
                    "expected {BINARY_BYTES}-byte packed row, got {}",
                    row.len()
                )));
            }
            bytes.extend_from_slice(row);
        }
        self.add(&bytes, ids)
    }

    /// Returns up to `k` hits in non-decreasing distance order, ties broken by
    /// ascending slot index. Slots whose mapping was removed are skipped.
    pub fn search_float(&self, query: &[f32], k: usize) -> EngineResult<Vec<SearchHit>> {
        if self.backend != Backend::Float {
            return Err(EngineError::Index("search_float called on non-float backend".into()));
        }
        if query.len() != self.dim {
            return Err(EngineError::Index(format!(
                "query dim {} does not match index dim {}",
                query.len(),
                self.dim
            )));
        }

        let mut scored: Vec<(usize, f64)> = Vec::new();
        for slot in 0..self.next_slot {
            if !self.slot_to_id.contains_key(&slot) {
                continue;
            }
            let row = self.float_row(slot);
            let dist: f64 = row
                .iter()
                .zip(query.iter())
                .map(|(a, b)| {
                    let d = (*a - *b) as f64;
                    d * d
                })
                .sum();
            scored.push((slot, dist));
        }
        Ok(self.finish_search(scored, k))
    }

    pub fn search_binary(&self, query: &[u8], k: usize) -> EngineResult<Vec<SearchHit>> {
        if self.backend != Backend::Binary {
            return Err(EngineError::Index("search_binary called on non-binary backend".into()));
        }
        if query.len() != BINARY_BYTES {
            return Err(EngineError::Index(format!(
                "query must be {BINARY_BYTES} packed bytes, got {}",
                query.len()
            )));
        }

        let mut scored: Vec<(usize, f64)> = Vec::new();
        for slot in 0..self.next_slot {
            if !self.slot_to_id.contains_key(&slot) {
                continue;
            }
            let row = self.binary_row(slot);
            let dist: u32 = row
                .iter()
                .zip(query.iter())
                .map(|(a, b)| (a ^ b).count_ones())
                .sum();
            scored.push((slot, dist as f64));
        }
        Ok(self.finish_search(scored, k))
    }

    fn finish_search(&self, mut scored: Vec<(usize, f64)>, k: usize) -> Vec<SearchHit> {
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap().then(a.0.cmp(&b.0)));
        scored
            .into_iter()
            .take(k)
            .map(|(slot, distance)| SearchHit {
                doc_id: self.slot_to_id[&slot],
                distance,
            })
            .collect()
    }

    fn float_row(&self, slot: usize) -> Vec<f32> {
        let start = slot * FLOAT_BYTES;
        let bytes = &self.data[start..start + FLOAT_BYTES];
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    fn binary_row(&self, slot: usize) -> &[u8] {
        let start = slot * BINARY_BYTES;
        &self.data[start..start + BINARY_BYTES]
    }

    /// Erases each id's slot mapping without reclaiming storage. Returns the
    /// count actually removed.
    pub fn remove(&mut self, ids: &[i64]) -> usize {
        let id_set: std::collections::HashSet<i64> = ids.iter().copied().collect();
        let dead: Vec<usize> = self
            .slot_to_id
            .iter()
            .filter(|(_, v)| id_set.contains(v))
            .map(|(k, _)| *k)
            .collect();
        for slot in &dead {
            self.slot_to_id.remove(slot);
        }
        dead.len()
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.slot_to_id.clear();
        self.next_slot = 0;
    }

    pub fn stats(&self) -> IndexStats {
        let bytes_per_vector = self.backend.bytes_per_vector();
        IndexStats {
            total_vectors: self.next_slot,
            active_mappings: self.slot_to_id.len(),
            next_internal_id: self.next_slot,
            backend: self.backend,
            dim: self.dim,
            bytes_per_vector,
            estimated_size_mb: (self.next_slot * bytes_per_vector) as f64 / (1024.0 * 1024.0),
        }
    }

    /// Writes the versioned binary snapshot described in Design Notes §9:
    /// `{magic, version, backend, dim, ntotal, next_slot, entries:[(slot,id)...]}`
    /// followed by the raw vector data blob.
    pub fn persist(&self, path: &Path) -> EngineResult<()> {
        let file = File::create(path)?;
        let mut w = BufWriter::new(file);

        w.write_all(&SNAPSHOT_MAGIC.to_le_bytes())?;
        w.write_all(&SNAPSHOT_VERSION.to_le_bytes())?;
        w.write_all(&[self.backend.tag()])?;
        w.write_all(&(self.dim as u32).to_le_bytes())?;
        w.write_all(&(self.next_slot as u64).to_le_bytes())?;
        w.write_all(&(self.slot_to_id.len() as u64).to_le_bytes())?;
        for (&slot, &id) in &self.slot_to_id {
            w.write_all(&(slot as u64).to_le_bytes())?;
            w.write_all(&id.to_le_bytes())?;
        }
        w.write_all(&(self.data.len() as u64).to_le_bytes())?;
        w.write_all(&self.data)?;
        w.flush()?;
        Ok(())
    }

    /// Loads a snapshot written by `persist`. On mismatched backend or
    /// dimension, the snapshot is discarded and an empty index of the
    /// requested `backend`/`dim` is returned (logged by the caller).
    pub fn load(path: &Path, backend: Backend, dim: usize) -> EngineResult<Self> {
        let file = File::open(path)?;
        let mut r = BufReader::new(file);

        let mut buf4 = [0u8; 4];
        let mut buf8 = [0u8; 8];

        r.read_exact(&mut buf4)?;
        if u32::from_le_bytes(buf4) != SNAPSHOT_MAGIC {
            return Err(EngineError::Index("snapshot magic mismatch".into()));
        }
        r.read_exact(&mut buf4)?;
        let version = u32::from_le_bytes(buf4);
        if version != SNAPSHOT_VERSION {
            return Err(EngineError::Index(format!("unsupported snapshot version {version}")));
        }

        let mut tag = [0u8; 1];
        r.read_exact(&mut tag)?;
        let snapshot_backend = Backend::from_tag(tag[0])?;

        r.read_exact(&mut buf4)?;
        let snapshot_dim = u32::from_le_bytes(buf4) as usize;

        r.read_exact(&mut buf8)?;
        let next_slot = u64::from_le_bytes(buf8) as usize;

        r.read_exact(&mut buf8)?;
        let entry_count = u64::from_le_bytes(buf8) as usize;

        let mut slot_to_id = HashMap::with_capacity(entry_count);
        for _ in 0..entry_count {
            r.read_exact(&mut buf8)?;
            let slot = u64::from_le_bytes(buf8) as usize;
            r.read_exact(&mut buf8)?;
            let id = i64::from_le_bytes(buf8);
            slot_to_id.insert(slot, id);
        }

        r.read_exact(&mut buf8)?;
        let data_len = u64::from_le_bytes(buf8) as usize;
        let mut data = vec![0u8; data_len];
        r.read_exact(&mut data)?;

        if snapshot_backend != backend || snapshot_dim != dim {
            tracing::warn!(
                "vector index snapshot backend/dim mismatch (snapshot: {:?}/{}, requested: {:?}/{}); discarding",
                snapshot_backend, snapshot_dim, backend, dim
            );
            return Ok(Self::new(backend, dim));
        }

        Ok(Self {
            backend,
            dim,
            data,
            slot_to_id,
            next_slot,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_search_float_orders_by_ascending_distance() {
        let mut idx = VectorIndex::new(Backend::Float, 3);
        idx.add_float(&[vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0], vec![0.9, 0.1, 0.0]], &[10, 20, 30])
            .unwrap();

        let hits = idx.search_float(&[1.0, 0.0, 0.0], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].doc_id, 10);
        assert!(hits[0].distance <= hits[1].distance);
    }

    #[test]
    fn remove_drops_mapping_without_reclaiming_slot() {
        let mut idx = VectorIndex::new(Backend::Float, 2);
        idx.add_float(&[vec![1.0, 0.0], vec![0.0, 1.0]], &[1, 2]).unwrap();
        assert_eq!(idx.remove(&[1]), 1);
        assert_eq!(idx.ntotal(), 2);
        assert_eq!(idx.len_active(), 1);

        let hits = idx.search_float(&[1.0, 0.0], 10).unwrap();
        assert!(hits.iter().all(|h| h.doc_id != 1));
    }

    #[test]
    fn clear_resets_everything() {
        let mut idx = VectorIndex::new(Backend::Binary, 8);
        idx.add_binary(&[vec![0xFF; BINARY_BYTES]], &[1]).unwrap();
        idx.clear();
        assert_eq!(idx.ntotal(), 0);
        assert_eq!(idx.len_active(), 0);
    }

    #[test]
    fn persist_then_load_round_trips_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.bin");

        let mut idx = VectorIndex::new(Backend::Float, 3);
        idx.add_float(&[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]], &[100, 200])
            .unwrap();
        idx.remove(&[100]);
        idx.persist(&path).unwrap();

        let loaded = VectorIndex::load(&path, Backend::Float, 3).unwrap();
        assert_eq!(loaded.ntotal(), idx.ntotal());
        assert_eq!(loaded.len_active(), idx.len_active());
        assert_eq!(loaded.next_slot, idx.next_slot);
    }

    #[test]
    fn load_discards_snapshot_on_backend_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.bin");

        let mut idx = VectorIndex::new(Backend::Float, 3);
        idx.add_float(&[vec![1.0, 2.0, 3.0]], &[1]).unwrap();
        idx.persist(&path).unwrap();

        let loaded = VectorIndex::load(&path, Backend::Binary, 3).unwrap();
        assert_eq!(loaded.ntotal(), 0);
        assert_eq!(loaded.backend(), Backend::Binary);
    }

    #[test]
    fn add_rejects_dimension_mismatch() {
        let mut idx = VectorIndex::new(Backend::Float, 3);
        let err = idx.add_float(&[vec![1.0, 2.0]], &[1]);
        assert!(err.is_err());
    }
}
