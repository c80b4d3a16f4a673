//! Basic inference integration test.
//!
//! Exercises the pieces a client-visible generation actually touches —
//! reputation/ban bookkeeping, golden ticket injection+verification, and
//! checkpoint round-tripping — at the crate's public API boundary rather
//! than through the HTTP surface (out of scope for this crate, see §6).

use shard_engine::checkpoint::CheckpointManager;
use shard_engine::golden_ticket::{BroadcastContext, GoldenTicketEngine, GoldenTicketEngineConfig};
use shard_engine::reputation::ReputationLedger;

#[test]
fn reputation_ledger_tracks_attempts_and_correctness() {
    let ledger = ReputationLedger::open_in_memory().expect("in-memory ledger should open");

    let (rep, ban) = ledger.upsert("scout-a", true, 0.70, 3, 24.0);
    assert_eq!((rep.attempts, rep.correct), (1, 1));
    assert!(ban.is_none());
    assert!(!ledger.is_banned("scout-a"));
}

#[test]
fn golden_ticket_injection_and_verification_round_trip() {
    let engine = GoldenTicketEngine::new(GoldenTicketEngineConfig {
        injection_rate: 1.0,
        ..GoldenTicketEngineConfig::default()
    });
    let ledger = ReputationLedger::open_in_memory().unwrap();

    let ctx = engine.maybe_inject("req-1", "some broadcast context".to_string());
    let BroadcastContext::Ticket(ticket) = ctx else {
        panic!("injection_rate=1.0 must always inject a ticket");
    };

    let verdict = engine.verify("req-1", "scout-a", &ticket.expected_answer, &ledger);
    assert_eq!(verdict, Some(true));

    // A second verify attempt for the same request id finds no ticket —
    // it was removed on first verification.
    assert_eq!(engine.verify("req-1", "scout-a", "whatever", &ledger), None);
}

#[test]
fn checkpoint_capture_and_restore_round_trips_tail() {
    let mgr = CheckpointManager::new(8, 64);
    assert!(!mgr.has_checkpoint());

    let generated: Vec<String> = (0..20).map(|i| format!("tok{i}")).collect();
    mgr.capture(20, vec![1, 2, 3, 4], &generated);
    assert!(mgr.has_checkpoint());

    let restored = mgr.restore().expect("capture then restore should succeed");
    assert_eq!(restored.snapshot.n_past, 20);
    assert_eq!(restored.snapshot.payload, vec![1, 2, 3, 4]);
    assert_eq!(restored.tail, generated);
}
