//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It holds the database pool, the room registry and the persistence queue.
//! The registry lock is held only to look up or insert a room; each room's
//! log and members sit behind the room's own mutex, so traffic in one room
//! never waits on another.
//!
//! Rooms are never evicted. A room stays loaded for the life of the process
//! once it has been created or joined.

use std::collections::HashMap;
use std::sync::Arc;

use canvas::history::EventLog;
use frames::Frame;
use sqlx::PgPool;
use tokio::sync::{Mutex, RwLock, mpsc};
use uuid::Uuid;

use crate::services::persistence::PersistRequest;

// =============================================================================
// ROOM STATE
// =============================================================================

/// Per-room live state. The in-memory log is authoritative; Postgres lags
/// behind it through the debounced persistence worker.
#[derive(Default)]
pub struct RoomState {
    /// Canonical history. Replaced wholesale by every `client:update`.
    pub history: EventLog,
    /// Connected members: `client_id` -> sender for outgoing frames.
    pub clients: HashMap<Uuid, mpsc::Sender<Frame>>,
}

impl RoomState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_history(history: EventLog) -> Self {
        Self { history, clients: HashMap::new() }
    }
}

pub type SharedRoom = Arc<Mutex<RoomState>>;

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum; all inner fields are Arc-wrapped or Clone.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub rooms: Arc<RwLock<HashMap<Uuid, SharedRoom>>>,
    /// Debounced persistence queue. `None` disables persistence (tests).
    pub persist_tx: Option<mpsc::Sender<PersistRequest>>,
}

impl AppState {
    #[must_use]
    pub fn new(pool: PgPool, persist_tx: Option<mpsc::Sender<PersistRequest>>) -> Self {
        Self { pool, rooms: Arc::new(RwLock::new(HashMap::new())), persist_tx }
    }

    /// Look up a loaded room.
    pub async fn room(&self, room_id: Uuid) -> Option<SharedRoom> {
        self.rooms.read().await.get(&room_id).cloned()
    }

    /// Insert `state` for `room_id` unless the room is already loaded, and
    /// return whichever entry ends up registered.
    pub async fn load_room(&self, room_id: Uuid, state: RoomState) -> SharedRoom {
        let mut rooms = self.rooms.write().await;
        rooms.entry(room_id).or_insert_with(|| Arc::new(Mutex::new(state))).clone()
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
#[path = "state_helpers_test.rs"]
pub mod test_helpers;

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
