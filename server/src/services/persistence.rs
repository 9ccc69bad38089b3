//! Persistence service — debounced room snapshots.
//!
//! DESIGN
//! ======
//! Every `client:update` enqueues the room's new log on a bounded queue with
//! a non-blocking `try_send`, so websocket handling never waits on Postgres.
//! A background worker owns a [`WriteDebouncer`]: each snapshot replaces the
//! room's pending one and pushes its due time out by the debounce window.
//! A ticker drains due snapshots and writes them. Rapid updates to one room
//! therefore collapse into a single write once the room goes quiet.
//!
//! The debouncer knows nothing about websockets or `force`; forced updates
//! are scheduled like any other.
//!
//! ERROR HANDLING
//! ==============
//! A failed write is logged and the snapshot dropped. The next update for
//! the room schedules a fresh snapshot, which is the only retry. When the
//! queue closes the worker flushes everything still pending and exits.

use std::collections::HashMap;
use std::time::Duration;

use canvas::history::EventLog;
use sqlx::PgPool;
use sqlx::types::Json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::state::AppState;

const DEFAULT_PERSIST_QUEUE_CAPACITY: usize = 1024;
const DEFAULT_PERSIST_DEBOUNCE_MS: u64 = 1000;
const DEFAULT_PERSIST_TICK_MS: u64 = 100;

/// Tuning knobs for the persistence worker, loaded from environment variables.
#[derive(Debug, Clone, Copy)]
pub struct PersistConfig {
    /// Bounded channel capacity for the snapshot queue.
    pub queue_capacity: usize,
    /// Quiet period after the last update before a room is written.
    pub debounce_ms: u64,
    /// How often the worker checks for due snapshots.
    pub tick_ms: u64,
}

impl PersistConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            queue_capacity: env_parse("PERSIST_QUEUE_CAPACITY", DEFAULT_PERSIST_QUEUE_CAPACITY),
            debounce_ms: env_parse("PERSIST_DEBOUNCE_MS", DEFAULT_PERSIST_DEBOUNCE_MS),
            tick_ms: env_parse("PERSIST_TICK_MS", DEFAULT_PERSIST_TICK_MS),
        }
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// A room snapshot to persist.
#[derive(Debug, Clone)]
pub struct PersistRequest {
    pub room_id: Uuid,
    pub history: EventLog,
}

// =============================================================================
// DEBOUNCER
// =============================================================================

struct Pending {
    history: EventLog,
    due: Instant,
}

/// Latest-wins, per-room write coalescing. Time is passed in by the caller.
pub struct WriteDebouncer {
    window: Duration,
    pending: HashMap<Uuid, Pending>,
}

impl WriteDebouncer {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self { window, pending: HashMap::new() }
    }

    /// Record `history` as the room's next write, due `window` after `now`.
    /// Replaces any snapshot already pending for the room.
    pub fn schedule(&mut self, room_id: Uuid, history: EventLog, now: Instant) {
        self.pending.insert(room_id, Pending { history, due: now + self.window });
    }

    /// Remove and return every snapshot whose window has elapsed.
    pub fn take_due(&mut self, now: Instant) -> Vec<(Uuid, EventLog)> {
        let due: Vec<Uuid> = self
            .pending
            .iter()
            .filter(|(_, p)| p.due <= now)
            .map(|(id, _)| *id)
            .collect();
        due.into_iter()
            .filter_map(|id| self.pending.remove(&id).map(|p| (id, p.history)))
            .collect()
    }

    /// Remove and return everything pending, due or not.
    pub fn drain(&mut self) -> Vec<(Uuid, EventLog)> {
        self.pending.drain().map(|(id, p)| (id, p.history)).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

// =============================================================================
// WORKER
// =============================================================================

/// Spawn the persistence worker. Returns its queue sender and task handle;
/// the task ends once every sender is dropped and pending writes are flushed.
#[must_use]
pub fn spawn_persistence_worker(pool: PgPool, config: PersistConfig) -> (mpsc::Sender<PersistRequest>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<PersistRequest>(config.queue_capacity);

    info!(
        queue_capacity = config.queue_capacity,
        debounce_ms = config.debounce_ms,
        tick_ms = config.tick_ms,
        "room persistence worker configured"
    );

    let handle = tokio::spawn(async move {
        let mut debouncer = WriteDebouncer::new(Duration::from_millis(config.debounce_ms));
        let mut ticker = tokio::time::interval(Duration::from_millis(config.tick_ms.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                maybe_req = rx.recv() => {
                    if let Some(req) = maybe_req {
                        debouncer.schedule(req.room_id, req.history, Instant::now());
                    } else {
                        if !debouncer.is_empty() {
                            info!(pending = debouncer.len(), "persist queue closed; flushing pending rooms");
                        }
                        for (room_id, history) in debouncer.drain() {
                            write_snapshot(&pool, room_id, &history).await;
                        }
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let due = debouncer.take_due(Instant::now());
                    if due.is_empty() {
                        continue;
                    }
                    debug!(due = due.len(), pending = debouncer.len(), "writing due room snapshots");
                    for (room_id, history) in due {
                        write_snapshot(&pool, room_id, &history).await;
                    }
                }
            }
        }
        info!("room persistence worker stopped");
    });

    (tx, handle)
}

/// Best-effort, non-blocking enqueue of a room snapshot.
///
/// Uses `try_send` to avoid adding latency on websocket request handling.
pub fn enqueue(state: &AppState, room_id: Uuid, history: &EventLog) {
    let Some(tx) = &state.persist_tx else {
        return;
    };

    let req = PersistRequest { room_id, history: history.clone() };
    match tx.try_send(req) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(%room_id, "persist queue full; dropping snapshot");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            warn!(%room_id, "persist queue closed; dropping snapshot");
        }
    }
}

async fn write_snapshot(pool: &PgPool, room_id: Uuid, history: &EventLog) {
    match save_room(pool, room_id, history).await {
        Ok(()) => debug!(%room_id, events = history.len(), position = history.position(), "room persisted"),
        Err(e) => error!(error = %e, %room_id, "room persist failed; dropping snapshot"),
    }
}

/// Upsert a room's log.
///
/// # Errors
///
/// Returns a database error if the write fails.
pub async fn save_room(pool: &PgPool, room_id: Uuid, history: &EventLog) -> Result<(), sqlx::Error> {
    let position = i32::try_from(history.position()).unwrap_or(i32::MAX);
    sqlx::query(
        "INSERT INTO rooms (id, position, events)
         VALUES ($1, $2, $3)
         ON CONFLICT (id) DO UPDATE
         SET position = EXCLUDED.position, events = EXCLUDED.events, updated_at = now()",
    )
    .bind(room_id)
    .bind(position)
    .bind(Json(history.events()))
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
#[path = "persistence_test.rs"]
mod tests;
