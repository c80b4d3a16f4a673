//! KV Checkpoint Manager.
//!
//! Token-cadenced, single-slot snapshot of engine state plus a bounded tail of
//! emitted token pieces. Grounded in `inference/kv_cache.rs`'s
//! `Arc<Mutex<_>>`-with-poison-recovery style, not its multi-entry LRU semantics —
//! this component retains at most one snapshot per session, never a pool.

use std::sync::Mutex;

use tracing::warn;

use crate::errors::{Result, ShardError};

pub const SNAPSHOT_MAGIC: u32 = 0x5348_524B; // "SHRK"
pub const SNAPSHOT_VERSION: u32 = 1;
const HEADER_LEN: usize = 16;

pub const DEFAULT_CHECKPOINT_EVERY_N_TOKENS: usize = 8;
pub const DEFAULT_CHECKPOINT_TAIL_LEN: usize = 256;
pub const MIN_CHECKPOINT_TAIL_LEN: usize = 16;

/// A framed snapshot: `magic | version | n_past | payload_len | payload`.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub n_past: u32,
    pub payload: Vec<u8>,
}

impl Snapshot {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&SNAPSHOT_MAGIC.to_le_bytes());
        buf.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
        buf.extend_from_slice(&self.n_past.to_le_bytes());
        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(ShardError::SnapshotInvalid(format!(
                "buffer too short: {} bytes",
                bytes.len()
            )));
        }
        let magic = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let version = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        let n_past = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
        let payload_len = u32::from_le_bytes(bytes[12..16].try_into().unwrap()) as usize;

        if magic != SNAPSHOT_MAGIC {
            return Err(ShardError::SnapshotInvalid(format!(
                "magic mismatch: expected {SNAPSHOT_MAGIC:#x}, got {magic:#x}"
            )));
        }
        if version != SNAPSHOT_VERSION {
            return Err(ShardError::SnapshotInvalid(format!(
                "version mismatch: expected {SNAPSHOT_VERSION}, got {version}"
            )));
        }
        if bytes.len() - HEADER_LEN != payload_len {
            return Err(ShardError::SnapshotInvalid(format!(
                "length mismatch: header says {payload_len}, buffer has {}",
                bytes.len() - HEADER_LEN
            )));
        }

        Ok(Snapshot {
            n_past,
            payload: bytes[HEADER_LEN..].to_vec(),
        })
    }
}

struct Checkpoint {
    snapshot: Snapshot,
    tail: Vec<String>,
}

/// Restored state handed back to the caller: both halves of the (engine, tail)
/// pair are always returned together — there is no partial restore.
pub struct Restored {
    pub snapshot: Snapshot,
    pub tail: Vec<String>,
}

pub struct CheckpointManager {
    every_n_tokens: usize,
    tail_len: usize,
    slot: Mutex<Option<Checkpoint>>,
}

impl CheckpointManager {
    pub fn new(every_n_tokens: usize, tail_len: usize) -> Self {
        Self {
            every_n_tokens: every_n_tokens.max(1),
            tail_len: tail_len.max(MIN_CHECKPOINT_TAIL_LEN),
            slot: Mutex::new(None),
        }
    }

    pub fn should_checkpoint(&self, tokens_emitted: usize) -> bool {
        tokens_emitted > 0 && tokens_emitted % self.every_n_tokens == 0
    }

    /// Captures a new snapshot, overwriting whatever was previously retained.
    pub fn capture(&self, n_past: u32, payload: Vec<u8>, generated: &[String]) {
        let tail_start = generated.len().saturating_sub(self.tail_len);
        let tail = generated[tail_start..].to_vec();
        let mut slot = self.slot.lock().unwrap_or_else(|p| p.into_inner());
        *slot = Some(Checkpoint {
            snapshot: Snapshot { n_past, payload },
            tail,
        });
    }

    /// Restores the retained (engine, tail) pair. Fails the whole restore — never
    /// partially — if no snapshot is retained or the header is invalid.
    pub fn restore(&self) -> Result<Restored> {
        let slot = self.slot.lock().unwrap_or_else(|p| p.into_inner());
        let checkpoint = slot
            .as_ref()
            .ok_or_else(|| ShardError::SnapshotInvalid("no checkpoint retained".to_string()))?;

        // Round-trip through encode/decode so a corrupted header is caught here
        // rather than deeper in the engine binding.
        let encoded = checkpoint.snapshot.encode();
        match Snapshot::decode(&encoded) {
            Ok(snapshot) => Ok(Restored {
                snapshot,
                tail: checkpoint.tail.clone(),
            }),
            Err(e) => {
                warn!("checkpoint restore rejected: {e}");
                Err(e)
            }
        }
    }

    pub fn clear(&self) {
        *self.slot.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }

    pub fn has_checkpoint(&self) -> bool {
        self.slot.lock().unwrap_or_else(|p| p.into_inner()).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cadence_fires_on_multiples_only() {
        let mgr = CheckpointManager::new(8, DEFAULT_CHECKPOINT_TAIL_LEN);
        assert!(!mgr.should_checkpoint(0));
        assert!(!mgr.should_checkpoint(7));
        assert!(mgr.should_checkpoint(8));
        assert!(mgr.should_checkpoint(16));
    }

    #[test]
    fn tail_len_has_a_floor() {
        let mgr = CheckpointManager::new(8, 2);
        assert_eq!(mgr.tail_len, MIN_CHECKPOINT_TAIL_LEN);
    }

    #[test]
    fn round_trip_preserves_n_past_and_payload() {
        let snap = Snapshot { n_past: 42, payload: vec![1, 2, 3, 4] };
        let encoded = snap.encode();
        let decoded = Snapshot::decode(&encoded).unwrap();
        assert_eq!(decoded.n_past, 42);
        assert_eq!(decoded.payload, vec![1, 2, 3, 4]);
    }

    #[test]
    fn magic_mismatch_is_rejected() {
        let mut bytes = Snapshot { n_past: 1, payload: vec![] }.encode();
        bytes[0] = 0xFF;
        assert!(Snapshot::decode(&bytes).is_err());
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let mut bytes = Snapshot { n_past: 1, payload: vec![1, 2, 3] }.encode();
        bytes.truncate(bytes.len() - 1);
        assert!(Snapshot::decode(&bytes).is_err());
    }

    #[test]
    fn restore_without_capture_fails_whole_call() {
        let mgr = CheckpointManager::new(8, DEFAULT_CHECKPOINT_TAIL_LEN);
        assert!(mgr.restore().is_err());
    }

    #[test]
    fn capture_then_restore_round_trips_tail() {
        let mgr = CheckpointManager::new(8, DEFAULT_CHECKPOINT_TAIL_LEN);
        let generated: Vec<String> = (0..300).map(|i| i.to_string()).collect();
        mgr.capture(300, vec![9, 9, 9], &generated);
        let restored = mgr.restore().unwrap();
        assert_eq!(restored.snapshot.n_past, 300);
        assert_eq!(restored.tail.len(), DEFAULT_CHECKPOINT_TAIL_LEN);
        assert_eq!(restored.tail.last().unwrap(), "299");
    }
}
