//! Metadata Store (SPEC_FULL §4.5).
//!
//! Grounded on the donor original's `lightweight_file_manager.py`
//! (`LightweightFileManager`): same `files`/`folders`/`index_metadata` schema,
//! same WAL pragmas, same operation set. Built on `rusqlite` (bundled SQLite)
//! rather than the donor crate's Tantivy dependency, since the donor's
//! full-text index is the superseded lexical path this spec drops — grounded
//! instead on `other_examples/wrightmikea-sqlite3-vecdb-poc`, the pack's only
//! example with an embedded SQLite store.

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

use crate::error::{EngineError, EngineResult};

/// The unit of retrieval (SPEC_FULL §3).
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: i64,
    pub file_hash: String,
    pub file_path: String,
    pub file_name: String,
    pub file_type: String,
    pub file_size: i64,
    pub text: String,
    pub chunk_index: i64,
    /// -1 is a legitimate transient sentinel during streaming ingestion
    /// (SPEC_FULL §9 open question, decided: observable).
    pub total_chunks: i64,
    pub modified_date: Option<String>,
}

/// Singleton diagnostic record (SPEC_FULL §3).
#[derive(Debug, Clone)]
pub struct IndexMetadataRecord {
    pub mode: String,
    pub use_binary: bool,
    pub dim: i64,
    pub total_vectors: i64,
    pub last_updated: String,
}

/// Durable ordered record store keyed by chunk id, with secondary lookups by
/// file hash and path prefix. Writes are serialized by `conn`'s mutex; SQLite
/// WAL mode lets readers proceed concurrently with an in-flight writer.
pub struct MetadataStore {
    conn: Mutex<Connection>,
}

impl MetadataStore {
    pub fn open(path: &Path) -> EngineResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::configure_wal(&conn)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_tables()?;
        Ok(store)
    }

    pub fn open_in_memory() -> EngineResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure_wal(&conn)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_tables()?;
        Ok(store)
    }

    fn configure_wal(conn: &Connection) -> EngineResult<()> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "mmap_size", 256i64 * 1024 * 1024)?;
        conn.pragma_update(None, "cache_size", -8192i64)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    }

    /// Schema creation failure at construction is fatal (SPEC_FULL §4.5).
    fn create_tables(&self) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS files (
                id INTEGER PRIMARY KEY,
                file_hash TEXT NOT NULL,
                file_path TEXT NOT NULL,
                file_name TEXT NOT NULL,
                file_type TEXT,
                file_size INTEGER,
                text TEXT,
                chunk_index INTEGER DEFAULT 0,
                total_chunks INTEGER DEFAULT 1,
                modified_date TEXT,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_files_hash ON files (file_hash);
            CREATE INDEX IF NOT EXISTS idx_files_path ON files (file_path);
            CREATE INDEX IF NOT EXISTS idx_files_name ON files (file_name);

            CREATE TABLE IF NOT EXISTS folders (
                id INTEGER PRIMARY KEY,
                path TEXT UNIQUE NOT NULL,
                name TEXT NOT NULL,
                recursive INTEGER DEFAULT 0,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP,
                last_indexed TEXT,
                indexed_count INTEGER DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_folders_path ON folders (path);

            CREATE TABLE IF NOT EXISTS index_metadata (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                mode TEXT NOT NULL,
                use_binary INTEGER DEFAULT 1,
                dim INTEGER DEFAULT 384,
                total_vectors INTEGER DEFAULT 0,
                last_updated TEXT DEFAULT CURRENT_TIMESTAMP
            );
            ",
        )?;
        Ok(())
    }

    pub fn insert_chunk(&self, chunk: &Chunk) -> EngineResult<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO files
                (id, file_hash, file_path, file_name, file_type, file_size,
                 text, chunk_index, total_chunks, modified_date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                chunk.id,
                chunk.file_hash,
                chunk.file_path,
                chunk.file_name,
                chunk.file_type,
                chunk.file_size,
                chunk.text,
                chunk.chunk_index,
                chunk.total_chunks,
                chunk.modified_date,
            ],
        )?;
        Ok(chunk.id)
    }

    pub fn batch_insert_chunks(&self, chunks: &[Chunk]) -> EngineResult<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO files
                    (id, file_hash, file_path, file_name, file_type, file_size,
                     text, chunk_index, total_chunks, modified_date)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            for chunk in chunks {
                stmt.execute(params![
                    chunk.id,
                    chunk.file_hash,
                    chunk.file_path,
                    chunk.file_name,
                    chunk.file_type,
                    chunk.file_size,
                    chunk.text,
                    chunk.chunk_index,
                    chunk.total_chunks,
                    chunk.modified_date,
                ])?;
            }
        }
        tx.commit()?;
        Ok(chunks.len())
    }

    pub fn check_hash_exists(&self, file_hash: &str) -> EngineResult<bool> {
        let conn = self.conn.lock();
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM files WHERE file_hash = ?1 LIMIT 1",
                params![file_hash],
                |row| row.get(0),
            )
            .optional()?;
        Ok(exists.is_some())
    }

    pub fn get_ids_by_hashes(&self, hashes: &[String]) -> EngineResult<Vec<i64>> {
        if hashes.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock();
        let placeholders = vec!["?"; hashes.len()].join(",");
        let sql = format!("SELECT id FROM files WHERE file_hash IN ({placeholders})");
        let mut stmt = conn.prepare(&sql)?;
        let params: Vec<&dyn rusqlite::ToSql> =
            hashes.iter().map(|h| h as &dyn rusqlite::ToSql).collect();
        let ids = stmt
            .query_map(params.as_slice(), |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    /// Case-sensitive path prefix lookup. Uses `substr` + `=` rather than `LIKE`:
    /// SQLite's `LIKE` is case-insensitive for ASCII by default, and a `LIKE`
    /// pattern would also need `%`/`_` in `path_prefix` escaped. Plain `=`
    /// comparison uses SQLite's default BINARY collation, which is
    /// case-sensitive, and treats `path_prefix` as a literal with no
    /// wildcard characters at all.
    pub fn get_ids_by_path(&self, path_prefix: &str) -> EngineResult<Vec<i64>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT id FROM files WHERE substr(file_path, 1, ?1) = ?2")?;
        let ids = stmt
            .query_map(params![path_prefix.len() as i64, path_prefix], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    /// Returns records in the same order as the input ids; ids with no match
    /// are silently skipped (the caller reassembles order-preserved results).
    pub fn fetch_by_id(&self, ids: &[i64]) -> EngineResult<Vec<Chunk>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock();
        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!(
            "SELECT id, file_hash, file_path, file_name, file_type, file_size,
                    text, chunk_index, total_chunks, modified_date
             FROM files WHERE id IN ({placeholders})"
        );
        let mut stmt = conn.prepare(&sql)?;
        let params: Vec<&dyn rusqlite::ToSql> = ids.iter().map(|i| i as &dyn rusqlite::ToSql).collect();
        let mut by_id = std::collections::HashMap::new();
        let rows = stmt.query_map(params.as_slice(), |row| {
            Ok(Chunk {
                id: row.get(0)?,
                file_hash: row.get(1)?,
                file_path: row.get(2)?,
                file_name: row.get(3)?,
                file_type: row.get(4)?,
                file_size: row.get(5)?,
                text: row.get(6)?,
                chunk_index: row.get(7)?,
                total_chunks: row.get(8)?,
                modified_date: row.get(9)?,
            })
        })?;
        for row in rows {
            let chunk = row?;
            by_id.insert(chunk.id, chunk);
        }
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    pub fn delete_by_ids(&self, ids: &[i64]) -> EngineResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let conn = self.conn.lock();
        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!("DELETE FROM files WHERE id IN ({placeholders})");
        let params: Vec<&dyn rusqlite::ToSql> = ids.iter().map(|i| i as &dyn rusqlite::ToSql).collect();
        Ok(conn.execute(&sql, params.as_slice())?)
    }

    pub fn delete_by_hashes(&self, hashes: &[String]) -> EngineResult<usize> {
        if hashes.is_empty() {
            return Ok(0);
        }
        let conn = self.conn.lock();
        let placeholders = vec!["?"; hashes.len()].join(",");
        let sql = format!("DELETE FROM files WHERE file_hash IN ({placeholders})");
        let params: Vec<&dyn rusqlite::ToSql> =
            hashes.iter().map(|h| h as &dyn rusqlite::ToSql).collect();
        Ok(conn.execute(&sql, params.as_slice())?)
    }

    pub fn get_max_id(&self) -> EngineResult<i64> {
        let conn = self.conn.lock();
        let max: Option<i64> = conn.query_row("SELECT MAX(id) FROM files", [], |row| row.get(0))?;
        Ok(max.unwrap_or(0))
    }

    pub fn count_chunks(&self) -> EngineResult<i64> {
        let conn = self.conn.lock();
        Ok(conn.query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?)
    }

    pub fn count_unique_files(&self) -> EngineResult<i64> {
        let conn = self.conn.lock();
        Ok(conn.query_row("SELECT COUNT(DISTINCT file_hash) FROM files", [], |row| row.get(0))?)
    }

    /// One-time fill-in of `total_chunks` for every row of a just-ingested
    /// file, once the final count is known (SPEC_FULL §4.6 step 6).
    pub fn update_total_chunks(&self, ids: &[i64], total_chunks: i64) -> EngineResult<()> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("UPDATE files SET total_chunks = ?1 WHERE id = ?2")?;
        for id in ids {
            stmt.execute(params![total_chunks, id])?;
        }
        Ok(())
    }

    pub fn update_index_metadata(
        &self,
        mode: &str,
        use_binary: bool,
        dim: i64,
        total_vectors: i64,
    ) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO index_metadata (id, mode, use_binary, dim, total_vectors, last_updated)
             VALUES (1, ?1, ?2, ?3, ?4, datetime('now'))",
            params![mode, use_binary, dim, total_vectors],
        )?;
        Ok(())
    }

    pub fn get_index_metadata(&self) -> EngineResult<Option<IndexMetadataRecord>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT mode, use_binary, dim, total_vectors, last_updated FROM index_metadata WHERE id = 1",
            [],
            |row| {
                Ok(IndexMetadataRecord {
                    mode: row.get(0)?,
                    use_binary: row.get(1)?,
                    dim: row.get(2)?,
                    total_vectors: row.get(3)?,
                    last_updated: row.get(4)?,
                })
            },
        )
        .optional()
        .map_err(EngineError::from)
    }

    pub fn clear_all(&self) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute_batch("DELETE FROM files; DELETE FROM folders; DELETE FROM index_metadata;")?;
        Ok(())
    }

    pub fn vacuum(&self) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute_batch("VACUUM")?;
        Ok(())
    }

    /// Forces journal truncation (SPEC_FULL §4.5).
    pub fn checkpoint(&self) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.pragma_update(None, "wal_checkpoint", "TRUNCATE")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_chunk(id: i64, hash: &str, path: &str, idx: i64) -> Chunk {
        Chunk {
            id,
            file_hash: hash.to_string(),
            file_path: path.to_string(),
            file_name: "file.txt".to_string(),
            file_type: "txt".to_string(),
            file_size: 100,
            text: format!("chunk {id}"),
            chunk_index: idx,
            total_chunks: -1,
            modified_date: None,
        }
    }

    #[test]
    fn insert_then_fetch_preserves_all_fields() {
        let store = MetadataStore::open_in_memory().unwrap();
        let chunk = sample_chunk(1, "hash1", "/tmp/a.txt", 0);
        store.insert_chunk(&chunk).unwrap();

        let fetched = store.fetch_by_id(&[1]).unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0], chunk);
    }

    #[test]
    fn fetch_by_id_preserves_input_order() {
        let store = MetadataStore::open_in_memory().unwrap();
        store.insert_chunk(&sample_chunk(1, "h1", "/a.txt", 0)).unwrap();
        store.insert_chunk(&sample_chunk(2, "h2", "/b.txt", 0)).unwrap();
        store.insert_chunk(&sample_chunk(3, "h3", "/c.txt", 0)).unwrap();

        let fetched = store.fetch_by_id(&[3, 1, 2]).unwrap();
        let ids: Vec<i64> = fetched.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    #[test]
    fn duplicate_hash_is_detected() {
        let store = MetadataStore::open_in_memory().unwrap();
        assert!(!store.check_hash_exists("dup").unwrap());
        store.insert_chunk(&sample_chunk(1, "dup", "/a.txt", 0)).unwrap();
        assert!(store.check_hash_exists("dup").unwrap());
    }

    #[test]
    fn delete_by_hash_removes_all_matching_rows() {
        let store = MetadataStore::open_in_memory().unwrap();
        store.insert_chunk(&sample_chunk(1, "h2", "/b.txt", 0)).unwrap();
        store.insert_chunk(&sample_chunk(2, "h2", "/b.txt", 1)).unwrap();
        store.insert_chunk(&sample_chunk(3, "h3", "/c.txt", 0)).unwrap();

        let deleted = store.delete_by_hashes(&["h2".to_string()]).unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.count_chunks().unwrap(), 1);
    }

    #[test]
    fn clear_all_resets_counts() {
        let store = MetadataStore::open_in_memory().unwrap();
        store.insert_chunk(&sample_chunk(1, "h1", "/a.txt", 0)).unwrap();
        store.clear_all().unwrap();
        assert_eq!(store.count_chunks().unwrap(), 0);
        assert_eq!(store.get_max_id().unwrap(), 0);
    }

    #[test]
    fn path_prefix_lookup_is_case_sensitive() {
        let store = MetadataStore::open_in_memory().unwrap();
        store.insert_chunk(&sample_chunk(1, "h1", "/workspace/src/a.txt", 0)).unwrap();
        store.insert_chunk(&sample_chunk(2, "h2", "/Workspace/src/b.txt", 0)).unwrap();

        let ids = store.get_ids_by_path("/workspace").unwrap();
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn open_on_disk_creates_schema_and_persists_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.sqlite3");
        {
            let store = MetadataStore::open(&path).unwrap();
            store.insert_chunk(&sample_chunk(1, "h1", "/a.txt", 0)).unwrap();
            store.checkpoint().unwrap();
        }
        let reopened = MetadataStore::open(&path).unwrap();
        assert_eq!(reopened.count_chunks().unwrap(), 1);
    }
}
