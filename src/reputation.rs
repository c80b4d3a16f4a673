//! Reputation Ledger.
//!
//! Persistent per-peer attempts/correct counters and a TTL'd ban table. Ported from
//! the original `SQLiteReputationLedger`/`ScoutReputation`/`BanEntry` (schema, the
//! `is_banned` elapsed-hours formula, auto-purge-then-log on expiry) with the
//! JSON-singleton variant left behind in favor of an explicit, injectable handle.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection};
use serde::Serialize;
use tracing::warn;

use crate::errors::{Result, ShardError};

pub const DEFAULT_REPUTATION_THRESHOLD: f64 = 0.70;
pub const DEFAULT_MIN_ATTEMPTS_BEFORE_BAN: u32 = 3;
pub const DEFAULT_BAN_DURATION_HOURS: f64 = 24.0;

#[derive(Debug, Clone, Serialize)]
pub struct ScoutReputation {
    pub peer_id: String,
    pub attempts: u32,
    pub correct: u32,
    pub first_seen: f64,
    pub last_seen: f64,
}

impl ScoutReputation {
    pub fn accuracy(&self) -> f64 {
        if self.attempts == 0 {
            1.0
        } else {
            self.correct as f64 / self.attempts as f64
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BanEntry {
    pub peer_id: String,
    pub banned_at: f64,
    pub duration_hours: f64,
    pub reason: String,
    pub failed_attempts: u32,
}

impl BanEntry {
    /// `0` duration hours means permanent.
    pub fn is_active(&self, now: f64) -> bool {
        if self.duration_hours <= 0.0 {
            return true;
        }
        (now - self.banned_at) / 3600.0 < self.duration_hours
    }
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

struct Inner {
    conn: Connection,
}

/// Thread-safe, persistent reputation/ban store. Threaded explicitly into
/// `GoldenTicketEngine` and the speculative loop rather than reached for as a
/// process-wide singleton, so tests can swap in a throwaway database file.
pub struct ReputationLedger {
    inner: Mutex<Inner>,
}

impl ReputationLedger {
    /// Opens (creating if absent) the embedded SQLite database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path: PathBuf = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)
            .map_err(|e| ShardError::PersistenceFailed(format!("open {}: {e}", path.display())))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS scout_reputation (
                peer_id TEXT PRIMARY KEY,
                attempts INTEGER NOT NULL DEFAULT 0,
                correct INTEGER NOT NULL DEFAULT 0,
                first_seen REAL NOT NULL,
                last_seen REAL NOT NULL
             );
             CREATE TABLE IF NOT EXISTS banned_scouts (
                peer_id TEXT PRIMARY KEY,
                banned_at REAL NOT NULL,
                duration_hours REAL NOT NULL,
                reason TEXT NOT NULL,
                failed_attempts INTEGER NOT NULL DEFAULT 0
             );",
        )
        .map_err(|e| ShardError::PersistenceFailed(format!("schema init: {e}")))?;

        Ok(Self {
            inner: Mutex::new(Inner { conn }),
        })
    }

    /// In-memory store, useful for tests and for processes that accept losing
    /// reputation history across restarts.
    pub fn open_in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, peer_id: &str) -> Option<ScoutReputation> {
        let inner = self.lock();
        inner
            .conn
            .query_row(
                "SELECT peer_id, attempts, correct, first_seen, last_seen
                 FROM scout_reputation WHERE peer_id = ?1",
                params![peer_id],
                |row| {
                    Ok(ScoutReputation {
                        peer_id: row.get(0)?,
                        attempts: row.get(1)?,
                        correct: row.get(2)?,
                        first_seen: row.get(3)?,
                        last_seen: row.get(4)?,
                    })
                },
            )
            .ok()
    }

    /// Increments `attempts`, conditionally `correct`, bans when the accuracy
    /// threshold is crossed past the minimum-attempts floor. Returns the updated
    /// reputation and, if this call triggered a ban, the new ban entry.
    pub fn upsert(
        &self,
        peer_id: &str,
        correct: bool,
        reputation_threshold: f64,
        min_attempts_before_ban: u32,
        ban_duration_hours: f64,
    ) -> (ScoutReputation, Option<BanEntry>) {
        let now = now_secs();
        let mut rep = self.get(peer_id).unwrap_or(ScoutReputation {
            peer_id: peer_id.to_string(),
            attempts: 0,
            correct: 0,
            first_seen: now,
            last_seen: now,
        });
        rep.attempts += 1;
        if correct {
            rep.correct += 1;
        }
        rep.last_seen = now;

        if let Err(e) = self.save_reputation(&rep) {
            warn!("reputation persistence failed for {peer_id}: {e}");
        }

        let should_ban =
            rep.attempts >= min_attempts_before_ban && rep.accuracy() < reputation_threshold;

        let ban = if should_ban {
            let failed = rep.attempts - rep.correct;
            let entry = BanEntry {
                peer_id: peer_id.to_string(),
                banned_at: now,
                duration_hours: ban_duration_hours,
                reason: "Failed Golden Ticket verification".to_string(),
                failed_attempts: failed,
            };
            if let Err(e) = self.save_ban(&entry) {
                warn!("ban persistence failed for {peer_id}: {e}");
            }
            warn!(
                "scout {peer_id} banned: accuracy {:.2} over {} attempts",
                rep.accuracy(),
                rep.attempts
            );
            Some(entry)
        } else {
            None
        };

        (rep, ban)
    }

    fn save_reputation(&self, rep: &ScoutReputation) -> Result<()> {
        let inner = self.lock();
        inner
            .conn
            .execute(
                "INSERT INTO scout_reputation (peer_id, attempts, correct, first_seen, last_seen)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(peer_id) DO UPDATE SET
                    attempts = excluded.attempts,
                    correct = excluded.correct,
                    last_seen = excluded.last_seen",
                params![rep.peer_id, rep.attempts, rep.correct, rep.first_seen, rep.last_seen],
            )
            .map_err(|e| ShardError::PersistenceFailed(e.to_string()))?;
        Ok(())
    }

    fn save_ban(&self, entry: &BanEntry) -> Result<()> {
        let inner = self.lock();
        inner
            .conn
            .execute(
                "INSERT INTO banned_scouts (peer_id, banned_at, duration_hours, reason, failed_attempts)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(peer_id) DO UPDATE SET
                    banned_at = excluded.banned_at,
                    duration_hours = excluded.duration_hours,
                    reason = excluded.reason,
                    failed_attempts = excluded.failed_attempts",
                params![
                    entry.peer_id,
                    entry.banned_at,
                    entry.duration_hours,
                    entry.reason,
                    entry.failed_attempts
                ],
            )
            .map_err(|e| ShardError::PersistenceFailed(e.to_string()))?;
        Ok(())
    }

    fn load_ban(&self, peer_id: &str) -> Option<BanEntry> {
        let inner = self.lock();
        inner
            .conn
            .query_row(
                "SELECT peer_id, banned_at, duration_hours, reason, failed_attempts
                 FROM banned_scouts WHERE peer_id = ?1",
                params![peer_id],
                |row| {
                    Ok(BanEntry {
                        peer_id: row.get(0)?,
                        banned_at: row.get(1)?,
                        duration_hours: row.get(2)?,
                        reason: row.get(3)?,
                        failed_attempts: row.get(4)?,
                    })
                },
            )
            .ok()
    }

    fn delete_ban(&self, peer_id: &str) -> Result<bool> {
        let inner = self.lock();
        let rows = inner
            .conn
            .execute("DELETE FROM banned_scouts WHERE peer_id = ?1", params![peer_id])
            .map_err(|e| ShardError::PersistenceFailed(e.to_string()))?;
        Ok(rows > 0)
    }

    /// Auto-purges an expired ban before answering. O(1): one row lookup.
    pub fn is_banned(&self, peer_id: &str) -> bool {
        let Some(ban) = self.load_ban(peer_id) else {
            return false;
        };
        if !ban.is_active(now_secs()) {
            if let Err(e) = self.delete_ban(peer_id) {
                warn!("failed to purge expired ban for {peer_id}: {e}");
            }
            return false;
        }
        true
    }

    pub fn ban(&self, peer_id: &str, reason: impl Into<String>, duration_hours: f64, failed_attempts: u32) {
        let entry = BanEntry {
            peer_id: peer_id.to_string(),
            banned_at: now_secs(),
            duration_hours,
            reason: reason.into(),
            failed_attempts,
        };
        if let Err(e) = self.save_ban(&entry) {
            warn!("ban persistence failed for {peer_id}: {e}");
        }
    }

    pub fn unban(&self, peer_id: &str) -> bool {
        self.delete_ban(peer_id).unwrap_or_else(|e| {
            warn!("unban persistence failed for {peer_id}: {e}");
            false
        })
    }

    pub fn reset(&self, peer_id: &str) -> bool {
        let inner = self.lock();
        let rows = inner
            .conn
            .execute("DELETE FROM scout_reputation WHERE peer_id = ?1", params![peer_id])
            .unwrap_or(0);
        drop(inner);
        let _ = self.delete_ban(peer_id);
        rows > 0
    }

    pub fn list_reputations(&self) -> Vec<ScoutReputation> {
        let inner = self.lock();
        let mut stmt = match inner
            .conn
            .prepare("SELECT peer_id, attempts, correct, first_seen, last_seen FROM scout_reputation")
        {
            Ok(s) => s,
            Err(_) => return Vec::new(),
        };
        stmt.query_map([], |row| {
            Ok(ScoutReputation {
                peer_id: row.get(0)?,
                attempts: row.get(1)?,
                correct: row.get(2)?,
                first_seen: row.get(3)?,
                last_seen: row.get(4)?,
            })
        })
        .map(|rows| rows.filter_map(|r| r.ok()).collect())
        .unwrap_or_default()
    }

    pub fn list_active_bans(&self) -> Vec<BanEntry> {
        let inner = self.lock();
        let mut stmt = match inner.conn.prepare(
            "SELECT peer_id, banned_at, duration_hours, reason, failed_attempts FROM banned_scouts",
        ) {
            Ok(s) => s,
            Err(_) => return Vec::new(),
        };
        let all: Vec<BanEntry> = stmt
            .query_map([], |row| {
                Ok(BanEntry {
                    peer_id: row.get(0)?,
                    banned_at: row.get(1)?,
                    duration_hours: row.get(2)?,
                    reason: row.get(3)?,
                    failed_attempts: row.get(4)?,
                })
            })
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default();
        let now = now_secs();
        all.into_iter().filter(|b| b.is_active(now)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> ReputationLedger {
        ReputationLedger::open_in_memory().unwrap()
    }

    #[test]
    fn new_peer_has_perfect_accuracy() {
        assert_eq!(
            ScoutReputation {
                peer_id: "p".into(),
                attempts: 0,
                correct: 0,
                first_seen: 0.0,
                last_seen: 0.0,
            }
            .accuracy(),
            1.0
        );
    }

    #[test]
    fn honest_scout_never_banned() {
        let l = ledger();
        for _ in 0..10 {
            let (_, ban) = l.upsert(
                "honest",
                true,
                DEFAULT_REPUTATION_THRESHOLD,
                DEFAULT_MIN_ATTEMPTS_BEFORE_BAN,
                DEFAULT_BAN_DURATION_HOURS,
            );
            assert!(ban.is_none());
        }
        assert!(!l.is_banned("honest"));
    }

    #[test]
    fn dishonest_scout_banned_after_min_attempts() {
        let l = ledger();
        let mut banned = None;
        for _ in 0..3 {
            let (_, ban) = l.upsert(
                "dishonest",
                false,
                DEFAULT_REPUTATION_THRESHOLD,
                DEFAULT_MIN_ATTEMPTS_BEFORE_BAN,
                DEFAULT_BAN_DURATION_HOURS,
            );
            if ban.is_some() {
                banned = ban;
            }
        }
        assert!(banned.is_some());
        assert_eq!(banned.unwrap().failed_attempts, 3);
        assert!(l.is_banned("dishonest"));
    }

    #[test]
    fn ban_auto_purges_after_duration() {
        let l = ledger();
        l.ban("expired", "test", 0.0000001, 1);
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(!l.is_banned("expired"));
        assert!(l.list_active_bans().is_empty());
    }

    #[test]
    fn unban_and_reset_roundtrip() {
        let l = ledger();
        l.ban("p", "test", 24.0, 1);
        assert!(l.is_banned("p"));
        assert!(l.unban("p"));
        assert!(!l.is_banned("p"));
        assert!(!l.unban("p"));

        l.upsert("p", true, 0.7, 3, 24.0);
        assert!(l.get("p").is_some());
        assert!(l.reset("p"));
        assert!(l.get("p").is_none());
    }
}
