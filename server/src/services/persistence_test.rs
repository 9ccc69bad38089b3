use super::*;
use crate::state::test_helpers;

const WINDOW: Duration = Duration::from_millis(1000);

// =============================================================================
// env_parse
// =============================================================================

#[test]
fn env_parse_missing_returns_default() {
    let val: usize = env_parse("__TEST_NONEXISTENT_KEY_12345__", 42);
    assert_eq!(val, 42);
}

#[test]
fn env_parse_present_valid() {
    unsafe { std::env::set_var("__TEST_EP_VALID__", "99") };
    let val: usize = env_parse("__TEST_EP_VALID__", 0);
    assert_eq!(val, 99);
    unsafe { std::env::remove_var("__TEST_EP_VALID__") };
}

#[test]
fn env_parse_present_invalid_returns_default() {
    unsafe { std::env::set_var("__TEST_EP_INVALID__", "notanumber") };
    let val: usize = env_parse("__TEST_EP_INVALID__", 7);
    assert_eq!(val, 7);
    unsafe { std::env::remove_var("__TEST_EP_INVALID__") };
}

#[test]
fn persist_config_defaults_match_constants() {
    unsafe {
        std::env::remove_var("PERSIST_QUEUE_CAPACITY");
        std::env::remove_var("PERSIST_DEBOUNCE_MS");
        std::env::remove_var("PERSIST_TICK_MS");
    }
    let config = PersistConfig::from_env();
    assert_eq!(config.queue_capacity, DEFAULT_PERSIST_QUEUE_CAPACITY);
    assert_eq!(config.debounce_ms, DEFAULT_PERSIST_DEBOUNCE_MS);
    assert_eq!(config.tick_ms, DEFAULT_PERSIST_TICK_MS);
}

// =============================================================================
// WriteDebouncer
// =============================================================================

#[test]
fn debouncer_holds_snapshot_until_window_elapses() {
    let mut debouncer = WriteDebouncer::new(WINDOW);
    let room = Uuid::new_v4();
    let t0 = Instant::now();

    debouncer.schedule(room, test_helpers::log_of(vec![test_helpers::stroke("#a")]), t0);
    assert!(debouncer.take_due(t0 + Duration::from_millis(999)).is_empty());
    assert_eq!(debouncer.len(), 1);

    let due = debouncer.take_due(t0 + WINDOW);
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].0, room);
    assert!(debouncer.is_empty());
}

#[test]
fn debouncer_collapses_rapid_updates_to_latest() {
    let mut debouncer = WriteDebouncer::new(WINDOW);
    let room = Uuid::new_v4();
    let t0 = Instant::now();

    for (i, color) in ["#1", "#2", "#3"].iter().enumerate() {
        let at = t0 + Duration::from_millis(400 * u64::try_from(i).expect("small"));
        debouncer.schedule(room, test_helpers::log_of(vec![test_helpers::stroke(color)]), at);
    }

    // The last schedule (t0 + 800ms) pushed the deadline to t0 + 1800ms.
    assert!(debouncer.take_due(t0 + Duration::from_millis(1500)).is_empty());

    let due = debouncer.take_due(t0 + Duration::from_millis(1800));
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].1, test_helpers::log_of(vec![test_helpers::stroke("#3")]));
}

#[test]
fn debouncer_tracks_rooms_independently() {
    let mut debouncer = WriteDebouncer::new(WINDOW);
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let t0 = Instant::now();

    debouncer.schedule(a, EventLog::new(), t0);
    debouncer.schedule(b, EventLog::new(), t0 + Duration::from_millis(500));

    let due = debouncer.take_due(t0 + WINDOW);
    assert_eq!(due.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![a]);
    assert_eq!(debouncer.len(), 1);
}

#[test]
fn debouncer_drain_returns_everything() {
    let mut debouncer = WriteDebouncer::new(WINDOW);
    let t0 = Instant::now();
    debouncer.schedule(Uuid::new_v4(), EventLog::new(), t0);
    debouncer.schedule(Uuid::new_v4(), EventLog::new(), t0);

    assert_eq!(debouncer.drain().len(), 2);
    assert!(debouncer.is_empty());
}

// =============================================================================
// enqueue — these need tokio context because test_app_state uses PgPool
// =============================================================================

#[tokio::test]
async fn enqueue_no_sender_is_noop() {
    let state = test_helpers::test_app_state();
    assert!(state.persist_tx.is_none());
    enqueue(&state, Uuid::new_v4(), &EventLog::new());
}

#[tokio::test]
async fn enqueue_sends_to_channel() {
    let (state, mut rx) = test_helpers::test_app_state_with_queue(16);
    let room = Uuid::new_v4();
    let log = test_helpers::log_of(vec![test_helpers::stroke("#a")]);

    enqueue(&state, room, &log);

    let received = rx.try_recv().expect("queued");
    assert_eq!(received.room_id, room);
    assert_eq!(received.history, log);
}

#[tokio::test]
async fn enqueue_full_channel_drops_snapshot() {
    let (state, mut rx) = test_helpers::test_app_state_with_queue(1);
    let room = Uuid::new_v4();

    enqueue(&state, room, &test_helpers::log_of(vec![test_helpers::stroke("#1")]));
    enqueue(&state, room, &test_helpers::log_of(vec![test_helpers::stroke("#2")]));

    let first = rx.try_recv().expect("first queued");
    assert_eq!(first.history, test_helpers::log_of(vec![test_helpers::stroke("#1")]));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn enqueue_closed_channel_does_not_panic() {
    let (state, rx) = test_helpers::test_app_state_with_queue(4);
    drop(rx);
    enqueue(&state, Uuid::new_v4(), &EventLog::new());
}

// =============================================================================
// Worker — no live DB: writes fail and are dropped
// =============================================================================

#[tokio::test]
async fn save_room_without_database_errors() {
    let state = test_helpers::test_app_state();
    let result = save_room(&state.pool, Uuid::new_v4(), &EventLog::new()).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn worker_flushes_and_exits_when_queue_closes() {
    let state = test_helpers::test_app_state();
    let config = PersistConfig { queue_capacity: 8, debounce_ms: 60_000, tick_ms: 10 };
    let (tx, handle) = spawn_persistence_worker(state.pool.clone(), config);

    tx.send(PersistRequest { room_id: Uuid::new_v4(), history: EventLog::new() })
        .await
        .expect("worker should accept");
    drop(tx);

    // The pending write fails against the unreachable database, is logged,
    // and the worker still shuts down.
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker should stop after the queue closes")
        .expect("worker task should not panic");
}

#[tokio::test]
async fn worker_survives_failed_due_write() {
    let state = test_helpers::test_app_state();
    let config = PersistConfig { queue_capacity: 8, debounce_ms: 0, tick_ms: 5 };
    let (tx, handle) = spawn_persistence_worker(state.pool.clone(), config);

    tx.send(PersistRequest { room_id: Uuid::new_v4(), history: EventLog::new() })
        .await
        .expect("worker should accept");
    tokio::time::sleep(Duration::from_millis(300)).await;

    // Still accepting after the failed write.
    tx.send(PersistRequest { room_id: Uuid::new_v4(), history: EventLog::new() })
        .await
        .expect("worker should still accept");
    assert!(!handle.is_finished());

    drop(tx);
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker should stop")
        .expect("worker task should not panic");
}
