//! # File Transfer Sub-Engine
//!
//! Chunked file transfer layered on top of an active session.
//!
//! ## Transfer Flow
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     FILE TRANSFER PROTOCOL                              │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Sender                            Receiver                            │
//! │  ──────                            ────────                            │
//! │                                                                         │
//! │  1. Type 12 offer ────────────────►                                    │
//! │     (id, name, size, mime)         2. User decision (60 s deadline)    │
//! │                                                                         │
//! │                          ◄──────── 3. Type 13 accept / Type 14 reject  │
//! │                                                                         │
//! │  4. Type 15 chunk ────────────────►                                    │
//! │     (index, iv, ciphertext)        5. Decrypt (AAD-bound), stage in    │
//! │                                       the durable store, idempotent    │
//! │                                                                         │
//! │  6. Repeat 4-5, one 256 KiB        Out-of-order delivery tolerated;   │
//! │     chunk per coordinator turn     duplicates overwrite               │
//! │                                                                         │
//! │  7. Type 16 complete ─────────────►                                    │
//! │                                    8. Assemble when signal ∧ all       │
//! │                                       chunks staged; verify exact     │
//! │                                       length; surface artifact        │
//! │                                                                         │
//! │  Either side, any time: Type 17 ──► error / cancel, purge staging      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! AES-GCM's tag gives per-chunk integrity; the AAD binding of
//! `transfer_id || chunk_index` defeats chunk relocation, and assembly
//! re-checks the total byte length against the offered size.

mod store;

pub use store::ChunkStore;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{CHUNK_SIZE, MAX_FILE_SIZE};
use crate::error::{Error, Result};

// ============================================================================
// TRANSFER STATE
// ============================================================================

/// Current status of a file transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferStatus {
    /// Offer is being prepared locally (pre-flight passed)
    Initiating,
    /// Offer sent / received, awaiting the receiver's decision
    PendingAcceptance,
    /// Sender is streaming chunks
    Uploading,
    /// Receiver is staging chunks
    Receiving,
    /// All chunks staged, assembly is running
    AssemblyPending,
    /// Finished successfully
    Complete,
    /// Receiver declined the offer
    Rejected,
    /// Either side cancelled
    Cancelled,
    /// Failed (send error, corrupt chunk, size mismatch)
    Errored,
}

impl TransferStatus {
    /// Whether the transfer is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Complete | Self::Rejected | Self::Cancelled | Self::Errored
        )
    }
}

/// Direction of a transfer relative to us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferDirection {
    /// We are sending the file
    Sending,
    /// We are receiving the file
    Receiving,
}

// ============================================================================
// FILE SOURCE
// ============================================================================

/// The sender's handle to the file being offered.
#[derive(Debug, Clone)]
pub struct FileSource {
    /// Original file name
    pub name: String,
    /// MIME type
    pub mime_type: String,
    /// File bytes
    pub data: Vec<u8>,
}

impl FileSource {
    /// Pre-flight validation: empty files and oversized files fail locally
    /// before any message is sent.
    pub fn validate(&self) -> Result<()> {
        let size = self.data.len() as u64;
        if size == 0 {
            return Err(Error::EmptyFile);
        }
        if size > MAX_FILE_SIZE {
            return Err(Error::FileTooLarge {
                size,
                max: MAX_FILE_SIZE,
            });
        }
        Ok(())
    }
}

// ============================================================================
// CHUNK MATH
// ============================================================================

/// Number of chunks a file of `file_size` bytes splits into.
pub fn expected_chunk_count(file_size: u64) -> u32 {
    ((file_size + CHUNK_SIZE as u64 - 1) / CHUNK_SIZE as u64) as u32
}

/// Byte range of chunk `index` within a file of `file_size` bytes.
pub fn chunk_range(index: u32, file_size: u64) -> std::ops::Range<usize> {
    let start = index as usize * CHUNK_SIZE;
    let end = ((index as usize + 1) * CHUNK_SIZE).min(file_size as usize);
    start..end
}

// ============================================================================
// TRANSFER BOOKKEEPING
// ============================================================================

/// One in-flight file transfer.
#[derive(Debug)]
pub struct Transfer {
    /// UUID identifying the transfer on both ends
    pub transfer_id: String,
    /// Upload or download
    pub direction: TransferDirection,
    /// Current status
    pub status: TransferStatus,
    /// Original file name
    pub file_name: String,
    /// Total size in bytes
    pub file_size: u64,
    /// MIME type as offered
    pub file_type: String,
    /// Sender only: the source bytes
    pub source: Option<FileSource>,
    /// Sender only: next chunk index to send
    pub next_chunk: u32,
    /// Total number of chunks
    pub total_chunks: u32,
    /// Receiver only: distinct chunks staged so far
    pub received_chunks: u32,
    /// Receiver only: Type 16 has arrived
    pub completion_signal_received: bool,
    /// Receiver only: an artifact handle has been surfaced to the UI
    pub artifact_surfaced: bool,
}

impl Transfer {
    /// Create the sender-side record for a validated file.
    pub fn new_outgoing(source: FileSource) -> Self {
        let file_size = source.data.len() as u64;
        Self {
            transfer_id: Uuid::new_v4().to_string(),
            direction: TransferDirection::Sending,
            status: TransferStatus::Initiating,
            file_name: source.name.clone(),
            file_size,
            file_type: source.mime_type.clone(),
            total_chunks: expected_chunk_count(file_size),
            source: Some(source),
            next_chunk: 0,
            received_chunks: 0,
            completion_signal_received: false,
            artifact_surfaced: false,
        }
    }

    /// Create the receiver-side record from an inbound offer.
    pub fn new_incoming(
        transfer_id: String,
        file_name: String,
        file_size: u64,
        file_type: String,
    ) -> Self {
        Self {
            transfer_id,
            direction: TransferDirection::Receiving,
            status: TransferStatus::PendingAcceptance,
            file_name,
            file_size,
            file_type,
            source: None,
            next_chunk: 0,
            total_chunks: expected_chunk_count(file_size),
            received_chunks: 0,
            completion_signal_received: false,
            artifact_surfaced: false,
        }
    }

    /// Progress percentage, 0-100.
    pub fn progress_percent(&self) -> u8 {
        if self.total_chunks == 0 {
            return 100;
        }
        let done = match self.direction {
            TransferDirection::Sending => self.next_chunk,
            TransferDirection::Receiving => self.received_chunks,
        };
        ((done as u64 * 100) / self.total_chunks as u64).min(100) as u8
    }

    /// Whether the receive side may attempt assembly.
    pub fn ready_for_assembly(&self) -> bool {
        self.completion_signal_received && self.received_chunks == self.total_chunks
    }

    /// Assemble the file from the durable store and verify its exact length.
    ///
    /// Chunks are read in index order; out-of-order arrival has no effect on
    /// the result. A length mismatch returns `AssemblyFailed`.
    pub fn assemble(&self, store: &ChunkStore) -> Result<Vec<u8>> {
        let assembled = store.read_assembled(&self.transfer_id)?;
        if assembled.len() as u64 != self.file_size {
            return Err(Error::AssemblyFailed(format!(
                "expected {} bytes, assembled {}",
                self.file_size,
                assembled.len()
            )));
        }
        Ok(assembled)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_count_math() {
        assert_eq!(expected_chunk_count(1), 1);
        assert_eq!(expected_chunk_count(CHUNK_SIZE as u64), 1);
        assert_eq!(expected_chunk_count(CHUNK_SIZE as u64 + 1), 2);
        // 700 KiB → two full chunks + one 188 KiB tail
        assert_eq!(expected_chunk_count(700 * 1024), 3);
    }

    #[test]
    fn test_chunk_ranges_cover_the_file() {
        let size = 700 * 1024u64;
        assert_eq!(chunk_range(0, size), 0..CHUNK_SIZE);
        assert_eq!(chunk_range(1, size), CHUNK_SIZE..2 * CHUNK_SIZE);
        assert_eq!(chunk_range(2, size), 2 * CHUNK_SIZE..size as usize);
    }

    #[test]
    fn test_empty_file_rejected() {
        let source = FileSource {
            name: "empty.bin".into(),
            mime_type: "application/octet-stream".into(),
            data: vec![],
        };
        assert!(matches!(source.validate(), Err(Error::EmptyFile)));
    }

    #[test]
    fn test_size_boundary() {
        let at_limit = FileSource {
            name: "limit.bin".into(),
            mime_type: "application/octet-stream".into(),
            data: vec![0u8; MAX_FILE_SIZE as usize],
        };
        assert!(at_limit.validate().is_ok());

        let over = FileSource {
            name: "over.bin".into(),
            mime_type: "application/octet-stream".into(),
            data: vec![0u8; MAX_FILE_SIZE as usize + 1],
        };
        assert!(matches!(over.validate(), Err(Error::FileTooLarge { .. })));
    }

    #[test]
    fn test_outgoing_transfer_bookkeeping() {
        let source = FileSource {
            name: "photo.png".into(),
            mime_type: "image/png".into(),
            data: vec![7u8; 700 * 1024],
        };
        let transfer = Transfer::new_outgoing(source);

        assert_eq!(transfer.direction, TransferDirection::Sending);
        assert_eq!(transfer.status, TransferStatus::Initiating);
        assert_eq!(transfer.total_chunks, 3);
        assert_eq!(transfer.progress_percent(), 0);
        // Transfer ids are UUID v4
        assert_eq!(transfer.transfer_id.len(), 36);
    }

    #[test]
    fn test_incoming_progress_and_assembly_gate() {
        let mut transfer = Transfer::new_incoming(
            "t-1".into(),
            "doc.pdf".into(),
            (CHUNK_SIZE * 2) as u64,
            "application/pdf".into(),
        );

        assert!(!transfer.ready_for_assembly());

        transfer.received_chunks = 2;
        assert!(!transfer.ready_for_assembly());

        transfer.completion_signal_received = true;
        assert!(transfer.ready_for_assembly());
        assert_eq!(transfer.progress_percent(), 100);
    }

    #[test]
    fn test_assembly_length_mismatch_detected() {
        let store = ChunkStore::open(None).unwrap();
        store.put_chunk("t-1", 0, b"short").unwrap();

        let transfer =
            Transfer::new_incoming("t-1".into(), "f.bin".into(), 100, "application/x".into());

        let result = transfer.assemble(&store);
        assert!(matches!(result, Err(Error::AssemblyFailed(_))));
    }

    #[test]
    fn test_assembly_out_of_order_chunks() {
        let store = ChunkStore::open(None).unwrap();
        store.put_chunk("t-1", 1, b"BBB").unwrap();
        store.put_chunk("t-1", 0, b"AAA").unwrap();

        let transfer =
            Transfer::new_incoming("t-1".into(), "f.bin".into(), 6, "application/x".into());

        assert_eq!(transfer.assemble(&store).unwrap(), b"AAABBB");
    }
}
