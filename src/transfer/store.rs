//! # Durable Chunk Store
//!
//! Receive-side staging for file-transfer chunks.
//!
//! ## Storage Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       CHUNK STORE SCHEMA                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  chunks                                                                 │
//! │  ──────                                                                 │
//! │  transfer_id  TEXT      ─┐                                              │
//! │  chunk_index  INTEGER   ─┴─ composite PRIMARY KEY                       │
//! │  data         BLOB         decrypted chunk bytes                        │
//! │                                                                         │
//! │  idx_chunks_transfer(transfer_id)   secondary index for per-transfer   │
//! │                                     counting and purging               │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Writes are idempotent: a duplicate chunk index replaces the previous row,
//! so re-delivery never skews the received count. The sender side never
//! persists anything; only inbound chunks are staged here.

use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::sync::Arc;

use crate::error::{Error, Result};

/// SQL to create the chunk table and its secondary index
const CREATE_TABLES: &str = r#"
-- Staged chunks for in-flight inbound transfers
CREATE TABLE IF NOT EXISTS chunks (
    -- UUID of the transfer this chunk belongs to
    transfer_id TEXT NOT NULL,
    -- Zero-based position within the file
    chunk_index INTEGER NOT NULL,
    -- Decrypted chunk bytes
    data BLOB NOT NULL,
    PRIMARY KEY (transfer_id, chunk_index)
);

CREATE INDEX IF NOT EXISTS idx_chunks_transfer ON chunks (transfer_id);
"#;

/// The durable chunk store
///
/// Wraps a SQLite connection. In-memory when no path is configured
/// (tests); file-backed in production so a crash mid-transfer does not
/// silently lose staged chunks.
pub struct ChunkStore {
    conn: Arc<Mutex<Connection>>,
}

impl ChunkStore {
    /// Open or create the store. Schema is created lazily on first open.
    pub fn open(path: Option<&str>) -> Result<Self> {
        let conn = match path {
            Some(p) => Connection::open(p)
                .map_err(|e| Error::ChunkStore(format!("Failed to open chunk store: {}", e)))?,
            None => Connection::open_in_memory()
                .map_err(|e| Error::ChunkStore(format!("Failed to open in-memory store: {}", e)))?,
        };

        conn.execute_batch(CREATE_TABLES)
            .map_err(|e| Error::ChunkStore(format!("Failed to create schema: {}", e)))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Stage one decrypted chunk. Re-delivery of the same index overwrites.
    pub fn put_chunk(&self, transfer_id: &str, chunk_index: u32, data: &[u8]) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO chunks (transfer_id, chunk_index, data) VALUES (?1, ?2, ?3)",
            params![transfer_id, chunk_index, data],
        )?;
        Ok(())
    }

    /// How many distinct chunks are staged for a transfer.
    pub fn chunk_count(&self, transfer_id: &str) -> Result<u32> {
        let conn = self.conn.lock();
        let count: u32 = conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE transfer_id = ?1",
            params![transfer_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Read every staged chunk in index order and concatenate the bytes.
    pub fn read_assembled(&self, transfer_id: &str) -> Result<Vec<u8>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT data FROM chunks WHERE transfer_id = ?1 ORDER BY chunk_index ASC",
        )?;

        let mut assembled = Vec::new();
        let rows = stmt.query_map(params![transfer_id], |row| row.get::<_, Vec<u8>>(0))?;
        for chunk in rows {
            assembled.extend_from_slice(&chunk?);
        }
        Ok(assembled)
    }

    /// Delete every staged chunk for a transfer.
    pub fn delete_transfer(&self, transfer_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM chunks WHERE transfer_id = ?1",
            params![transfer_id],
        )?;
        Ok(())
    }

    /// Whether any chunks remain staged for a transfer.
    pub fn has_chunks(&self, transfer_id: &str) -> Result<bool> {
        Ok(self.chunk_count(transfer_id)? > 0)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_and_read_in_order() {
        let store = ChunkStore::open(None).unwrap();

        // Insert out of order
        store.put_chunk("t1", 1, b"BBB").unwrap();
        store.put_chunk("t1", 0, b"AAA").unwrap();
        store.put_chunk("t1", 2, b"CC").unwrap();

        assert_eq!(store.chunk_count("t1").unwrap(), 3);
        assert_eq!(store.read_assembled("t1").unwrap(), b"AAABBBCC");
    }

    #[test]
    fn test_duplicate_index_overwrites() {
        let store = ChunkStore::open(None).unwrap();

        store.put_chunk("t1", 0, b"old").unwrap();
        store.put_chunk("t1", 0, b"new").unwrap();

        assert_eq!(store.chunk_count("t1").unwrap(), 1);
        assert_eq!(store.read_assembled("t1").unwrap(), b"new");
    }

    #[test]
    fn test_transfers_are_isolated() {
        let store = ChunkStore::open(None).unwrap();

        store.put_chunk("t1", 0, b"one").unwrap();
        store.put_chunk("t2", 0, b"two").unwrap();

        store.delete_transfer("t1").unwrap();

        assert!(!store.has_chunks("t1").unwrap());
        assert!(store.has_chunks("t2").unwrap());
        assert_eq!(store.read_assembled("t2").unwrap(), b"two");
    }

    #[test]
    fn test_delete_is_complete() {
        let store = ChunkStore::open(None).unwrap();

        for i in 0..5u32 {
            store.put_chunk("t1", i, &[i as u8; 16]).unwrap();
        }
        store.delete_transfer("t1").unwrap();

        assert_eq!(store.chunk_count("t1").unwrap(), 0);
        assert!(store.read_assembled("t1").unwrap().is_empty());
    }

    #[test]
    fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunks.db");
        let path_str = path.to_str().unwrap();

        {
            let store = ChunkStore::open(Some(path_str)).unwrap();
            store.put_chunk("t1", 0, b"durable").unwrap();
        }

        let reopened = ChunkStore::open(Some(path_str)).unwrap();
        assert_eq!(reopened.read_assembled("t1").unwrap(), b"durable");
    }
}
