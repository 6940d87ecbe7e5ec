//! Sync engine tests against a scripted authoritative store

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use crate::applier::MutationApplier;
use crate::config::EngineConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::db::{Database, RecordStore, StoreHandle};
use crate::models::{PassengerSnapshot, Role};
use crate::session::Sessions;
use crate::testing::{conductor_session, dec, passenger, MockRemote};

use super::{ConflictPolicy, SyncEngine};

struct Harness {
    engine: Arc<SyncEngine>,
    store: StoreHandle,
    remote: Arc<MockRemote>,
    applier: MutationApplier,
    sessions: Sessions,
    monitor: ConnectivityMonitor,
}

fn harness_with(config: EngineConfig, server: &[PassengerSnapshot]) -> Harness {
    let store = RecordStore::new(Database::open_in_memory().unwrap(), &config);
    // Start from the same cached view the last pull would have left
    store.write_snapshots(server);
    let store = store.into_handle();

    let remote = MockRemote::with_passengers(server);
    let sessions = Sessions::new();
    sessions.set(conductor_session());
    let monitor = ConnectivityMonitor::new(true);

    let engine = Arc::new(SyncEngine::new(
        store.clone(),
        remote.clone(),
        sessions.clone(),
        monitor.clone(),
        config,
    ));
    let applier = MutationApplier::new(store.clone());
    Harness {
        engine,
        store,
        remote,
        applier,
        sessions,
        monitor,
    }
}

fn harness(server: &[PassengerSnapshot]) -> Harness {
    harness_with(EngineConfig::default(), server)
}

// Scenario C: two pending entries, both accepted, then a full pull
#[tokio::test]
async fn test_sync_pushes_pending_then_pulls() {
    let h = harness(&[passenger("p-1", "r-1", "10.00"), passenger("p-2", "r-1", "5.00")]);
    h.applier.apply_boarding("p-1", "c-1", "r-1", dec("2.50")).await.unwrap();
    h.applier.apply_topup("p-2", dec("4.00"), "c-1", "r-1").await.unwrap();

    let report = h.engine.sync_now().await;

    assert!(report.success, "errors: {:?}", report.errors);
    assert_eq!(report.synced_transactions, 2);
    assert_eq!(report.synced_passengers, 2);

    let store = h.store.lock().await;
    assert!(store.read_log().iter().all(|t| t.synced));
    assert_eq!(store.pending_count(), 0);
    // Pull replaced local balances with the server's post-push truth
    assert_eq!(store.find_snapshot("p-1").unwrap().current_balance, dec("7.50"));
    assert_eq!(store.find_snapshot("p-2").unwrap().current_balance, dec("9.00"));
    assert_eq!(h.remote.balance("p-1"), dec("7.50"));
    assert_eq!(store.read_last_sync_time(), Some(report.timestamp));
}

#[tokio::test]
async fn test_push_reissues_stored_command_fields() {
    let h = harness(&[passenger("p-1", "r-1", "10.00")]);
    h.applier.apply_boarding("p-1", "c-1", "r-1", dec("2.50")).await.unwrap();

    h.engine.sync_now().await;

    let calls = h.remote.calls();
    assert_eq!(calls.len(), 1);
    // The boarding is re-issued as a positive fare, not the signed log delta
    assert_eq!(calls[0], ("board".to_string(), "p-1".to_string(), dec("2.50")));
}

// Scenario D: one entry targets a server-deleted passenger
#[tokio::test]
async fn test_deleted_passenger_entry_removed_not_errored() {
    let h = harness(&[passenger("p-1", "r-1", "10.00"), passenger("p-2", "r-1", "5.00")]);
    h.applier.apply_boarding("p-1", "c-1", "r-1", dec("2.50")).await.unwrap();
    h.applier.apply_topup("p-2", dec("4.00"), "c-1", "r-1").await.unwrap();
    h.remote.delete("p-1");

    let report = h.engine.sync_now().await;

    // Deletion is not an error; the pass still succeeds
    assert!(report.success, "errors: {:?}", report.errors);
    assert_eq!(report.synced_transactions, 1);

    let store = h.store.lock().await;
    let log = store.read_log();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].passenger_id, "p-2");
    assert!(log[0].synced);
}

#[tokio::test]
async fn test_transient_failure_retries_next_pass() {
    let h = harness(&[passenger("p-1", "r-1", "10.00")]);
    h.applier.apply_boarding("p-1", "c-1", "r-1", dec("2.50")).await.unwrap();

    h.remote.set_fail_pushes(true);
    let report = h.engine.sync_now().await;
    assert!(!report.success);
    assert_eq!(report.synced_transactions, 0);
    assert_eq!(report.errors.len(), 1);
    // Never silently dropped: the entry survives for the next pass
    assert_eq!(h.store.lock().await.pending_count(), 1);
    assert_eq!(h.store.lock().await.read_last_sync_time(), None);

    h.remote.set_fail_pushes(false);
    let report = h.engine.sync_now().await;
    assert!(report.success);
    assert_eq!(report.synced_transactions, 1);
    // Exactly one failed attempt and one successful retry reached the server
    assert_eq!(h.remote.calls().len(), 2);
}

#[tokio::test]
async fn test_failed_entry_does_not_block_later_entries() {
    let h = harness(&[passenger("p-1", "r-1", "10.00"), passenger("p-2", "r-1", "8.00")]);
    h.applier.apply_boarding("p-1", "c-1", "r-1", dec("2.50")).await.unwrap();
    h.applier.apply_boarding("p-2", "c-1", "r-1", dec("1.00")).await.unwrap();

    // p-1 now missing server-side triggers removal, p-2 still syncs
    h.remote.delete("p-1");
    let report = h.engine.sync_now().await;

    assert_eq!(report.synced_transactions, 1);
    let calls = h.remote.calls();
    assert_eq!(calls.len(), 2, "both entries must be attempted");
}

#[tokio::test]
async fn test_guards_reject_without_entering_sync() {
    let h = harness(&[passenger("p-1", "r-1", "10.00")]);

    h.monitor.set_online(false);
    let report = h.engine.sync_now().await;
    assert!(!report.success);
    assert!(report.errors[0].contains("Network unavailable"));

    h.monitor.set_online(true);
    h.sessions.clear();
    let report = h.engine.sync_now().await;
    assert!(!report.success);
    assert!(report.errors[0].contains("Not authenticated"));

    assert!(h.remote.calls().is_empty());
}

#[tokio::test]
async fn test_reentrant_sync_rejected() {
    let h = harness(&[passenger("p-1", "r-1", "10.00")]);

    let lock = h.engine.guard.lock().await;
    let report = h.engine.sync_now().await;
    drop(lock);

    assert!(!report.success);
    assert!(report.errors[0].contains("already in progress"));
}

// The guard is per-instance only: a second engine over the same store is
// not blocked (the documented multi-instance race)
#[tokio::test]
async fn test_guard_does_not_coordinate_across_instances() {
    let h = harness(&[passenger("p-1", "r-1", "10.00")]);
    let second = SyncEngine::new(
        h.store.clone(),
        h.remote.clone(),
        h.sessions.clone(),
        h.monitor.clone(),
        EngineConfig::default(),
    );

    let lock = h.engine.guard.lock().await;
    let report = second.sync_now().await;
    drop(lock);

    assert!(report.success, "errors: {:?}", report.errors);
}

#[tokio::test]
async fn test_pull_is_idempotent() {
    let h = harness(&[passenger("p-1", "r-1", "10.00"), passenger("p-3", "r-2", "2.00")]);

    let first = h.engine.sync_now().await;
    let after_first = h.store.lock().await.read_snapshots();
    let second = h.engine.sync_now().await;
    let after_second = h.store.lock().await.read_snapshots();

    assert!(first.success && second.success);
    assert_eq!(after_first, after_second);
    // Conductor scope pulls only the assigned route
    assert!(after_first.iter().all(|p| p.route_id == "r-1"));
}

#[tokio::test]
async fn test_admin_pulls_all_routes() {
    let h = harness(&[passenger("p-1", "r-1", "10.00"), passenger("p-3", "r-2", "2.00")]);
    let mut session = conductor_session();
    session.user.role = Role::Admin;
    h.sessions.set(session);

    let report = h.engine.sync_now().await;
    assert_eq!(report.synced_passengers, 2);
}

#[tokio::test]
async fn test_unknown_role_fails_pull_but_pushes() {
    let h = harness(&[passenger("p-1", "r-1", "10.00")]);
    h.applier.apply_boarding("p-1", "c-1", "r-1", dec("2.50")).await.unwrap();

    let mut session = conductor_session();
    session.user.role = Role::Unknown;
    h.sessions.set(session);

    let report = h.engine.sync_now().await;
    assert!(!report.success);
    assert_eq!(report.synced_transactions, 1, "push phase still ran");
    assert!(report.errors.iter().any(|e| e.starts_with("pull:")));
}

#[tokio::test]
async fn test_unknown_session_role_falls_back_to_server_lookup() {
    let h = harness(&[passenger("p-1", "r-1", "10.00"), passenger("p-3", "r-2", "2.00")]);
    let mut session = conductor_session();
    session.user.role = Role::Unknown;
    h.sessions.set(session);

    let mut admin = conductor_session().user;
    admin.role = Role::Admin;
    h.remote.set_user(Some(admin));

    let report = h.engine.sync_now().await;
    assert!(report.success, "errors: {:?}", report.errors);
    assert_eq!(report.synced_passengers, 2);
}

#[tokio::test]
async fn test_conductor_without_route_fails_pull() {
    let h = harness(&[passenger("p-1", "r-1", "10.00")]);
    let mut session = conductor_session();
    session.user.assigned_route_id = None;
    h.sessions.set(session);

    let report = h.engine.sync_now().await;
    assert!(!report.success);
    assert!(report.errors.iter().any(|e| e.contains("route assignment")));
}

#[tokio::test]
async fn test_observers_notified_after_pass() {
    let h = harness(&[passenger("p-1", "r-1", "10.00")]);
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = seen.clone();
    h.engine.subscribe(move |report| {
        sink.lock().unwrap().push(report.clone());
    });

    let report = h.engine.sync_now().await;

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0], report);
}

#[tokio::test]
async fn test_needs_sync_transitions() {
    let h = harness_with(
        EngineConfig::default().with_staleness_window(Duration::from_millis(1)),
        &[passenger("p-1", "r-1", "10.00")],
    );

    // Never synced yet
    assert!(h.engine.needs_sync().await);

    let report = h.engine.sync_now().await;
    assert!(report.success);
    // Staleness uses a strict "older than" comparison, so wait past the window
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert!(h.engine.needs_sync().await);

    h.sessions.clear();
    assert!(!h.engine.needs_sync().await);
}

#[tokio::test]
async fn test_needs_sync_false_when_fresh() {
    let h = harness(&[passenger("p-1", "r-1", "10.00")]);
    h.engine.sync_now().await;
    assert!(!h.engine.needs_sync().await);

    h.applier.apply_boarding("p-1", "c-1", "r-1", dec("1.00")).await.unwrap();
    assert!(h.engine.needs_sync().await);
}

#[tokio::test]
async fn test_force_sync_all_repushes_everything() {
    let h = harness(&[passenger("p-1", "r-1", "10.00")]);
    h.applier.apply_boarding("p-1", "c-1", "r-1", dec("2.50")).await.unwrap();

    let first = h.engine.sync_now().await;
    assert_eq!(first.synced_transactions, 1);

    let forced = h.engine.force_sync_all().await;
    assert_eq!(forced.synced_transactions, 1);
    // The same command reached the server twice: at-least-once, not exactly-once
    assert_eq!(h.remote.calls().len(), 2);
}

async fn age_entries(store: &StoreHandle, by_ms: i64) {
    let store = store.lock().await;
    let mut log = store.read_log();
    for entry in &mut log {
        entry.timestamp -= by_ms;
    }
    // Write back through the public surface
    for entry in &log {
        store.remove_log_entry(&entry.id);
    }
    for entry in log {
        store.append_log(entry).unwrap();
    }
}

#[tokio::test]
async fn test_conflict_flagging_is_advisory() {
    let h = harness_with(
        EngineConfig::default().with_conflict_age_threshold(Duration::from_secs(60)),
        &[passenger("p-1", "r-1", "10.00")],
    );
    h.applier.apply_boarding("p-1", "c-1", "r-1", dec("2.50")).await.unwrap();
    age_entries(&h.store, 120_000).await;

    let flagged = h.engine.resolve_stale(ConflictPolicy::FlagForReview).await;
    assert_eq!(flagged.len(), 1);
    // Advisory only: nothing removed
    assert_eq!(h.store.lock().await.pending_count(), 1);
}

#[tokio::test]
async fn test_conflict_discard_policy() {
    let h = harness_with(
        EngineConfig::default().with_conflict_age_threshold(Duration::from_secs(60)),
        &[passenger("p-1", "r-1", "10.00")],
    );
    h.applier.apply_boarding("p-1", "c-1", "r-1", dec("2.50")).await.unwrap();
    age_entries(&h.store, 120_000).await;

    let discarded = h.engine.resolve_stale(ConflictPolicy::Discard).await;
    assert_eq!(discarded.len(), 1);
    let store = h.store.lock().await;
    assert_eq!(store.pending_count(), 0);
    // The optimistic fare deduction is rolled back with the entry
    assert_eq!(
        store.find_snapshot("p-1").unwrap().current_balance,
        dec("10.00")
    );
}

#[tokio::test]
async fn test_conflict_revalidate_policy() {
    let h = harness_with(
        EngineConfig::default().with_conflict_age_threshold(Duration::from_secs(60)),
        &[passenger("p-1", "r-1", "10.00")],
    );
    // Valid boarding, then shrink the cached balance below the fare
    h.applier.apply_boarding("p-1", "c-1", "r-1", dec("2.50")).await.unwrap();
    age_entries(&h.store, 120_000).await;
    {
        let store = h.store.lock().await;
        let mut p = store.find_snapshot("p-1").unwrap();
        p.current_balance = dec("1.00");
        store.update_snapshot(&p);
    }

    let discarded = h.engine.resolve_stale(ConflictPolicy::Revalidate).await;
    assert_eq!(discarded.len(), 1);
    let store = h.store.lock().await;
    assert_eq!(store.pending_count(), 0);
    assert_eq!(
        store.find_snapshot("p-1").unwrap().current_balance,
        dec("3.50")
    );
}

#[tokio::test]
async fn test_conflict_revalidate_keeps_affordable_entry() {
    let h = harness_with(
        EngineConfig::default().with_conflict_age_threshold(Duration::from_secs(60)),
        &[passenger("p-1", "r-1", "10.00")],
    );
    h.applier.apply_boarding("p-1", "c-1", "r-1", dec("2.50")).await.unwrap();
    age_entries(&h.store, 120_000).await;

    let discarded = h.engine.resolve_stale(ConflictPolicy::Revalidate).await;
    assert!(discarded.is_empty());
    let store = h.store.lock().await;
    assert_eq!(store.pending_count(), 1);
    assert_eq!(
        store.find_snapshot("p-1").unwrap().current_balance,
        dec("7.50")
    );
}

#[tokio::test]
async fn test_fresh_entries_never_flagged() {
    let h = harness(&[passenger("p-1", "r-1", "10.00")]);
    h.applier.apply_boarding("p-1", "c-1", "r-1", dec("2.50")).await.unwrap();

    assert!(h.engine.stale_entries().await.is_empty());
}

#[tokio::test]
async fn test_sync_status_snapshot() {
    let h = harness(&[passenger("p-1", "r-1", "10.00")]);
    h.applier.apply_boarding("p-1", "c-1", "r-1", dec("2.50")).await.unwrap();

    let status = h.engine.sync_status().await;
    assert!(!status.is_syncing);
    assert!(status.is_online);
    assert!(status.is_authenticated);
    assert_eq!(status.pending_count, 1);
    assert_eq!(status.last_sync_time, None);
}

#[tokio::test]
async fn test_wait_idle_when_idle() {
    let h = harness(&[]);
    assert!(h.engine.wait_idle(Duration::from_millis(10)).await);
}

#[tokio::test]
async fn test_wait_idle_times_out_while_locked() {
    let h = harness(&[]);
    let lock = h.engine.guard.lock().await;
    assert!(!h.engine.wait_idle(Duration::from_millis(10)).await);
    drop(lock);
    assert!(h.engine.wait_idle(Duration::from_millis(10)).await);
}

#[tokio::test]
async fn test_auto_sync_triggers_on_online_edge() {
    let h = harness(&[passenger("p-1", "r-1", "10.00")]);
    h.monitor.set_online(false);
    h.applier.apply_boarding("p-1", "c-1", "r-1", dec("2.50")).await.unwrap();

    let driver = h.engine.spawn_auto_sync();
    // Offline: the timer tick must not sync
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.store.lock().await.pending_count(), 1);

    h.monitor.set_online(true);
    // Give the edge-triggered sync a moment to run
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if h.store.lock().await.pending_count() == 0 {
            break;
        }
    }
    assert_eq!(h.store.lock().await.pending_count(), 0);
    driver.abort();
}
