//! Room service — creation, join/part, last-writer-wins updates and relays.
//!
//! DESIGN
//! ======
//! A room's in-memory `EventLog` is the source of truth while the process
//! runs. Rooms are created by the `/draw` route, hydrated from Postgres on
//! first join, and never evicted.
//!
//! `client:update` replaces the canonical log wholesale. There is no merge
//! and no version check: whichever update the room mutex admits last wins.
//! Strokes, undo and reset are relayed to the other members without
//! touching the canonical log; the sender follows them with its own
//! `client:update`.
//!
//! Every mutation holds only the room's own mutex. Fan-out is best-effort
//! `try_send`, so a slow member never blocks the room.

use canvas::history::EventLog;
use frames::{Data, ErrorCode, Frame};
use serde_json::Value;
use sqlx::PgPool;
use sqlx::types::Json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::services::persistence;
use crate::state::{AppState, RoomState, SharedRoom};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("room not found: {0}")]
    NotFound(Uuid),
    #[error("not joined to room: {0}")]
    NotJoined(Uuid),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ErrorCode for RoomError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_ROOM_NOT_FOUND",
            Self::NotJoined(_) => "E_NOT_JOINED",
            Self::Database(_) => "E_DATABASE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

// =============================================================================
// CREATE / LOOKUP
// =============================================================================

/// Mint a new empty room, persist its row and register it in memory.
///
/// # Errors
///
/// Returns a database error if the insert fails.
pub async fn create_room(state: &AppState) -> Result<Uuid, RoomError> {
    let room_id = Uuid::new_v4();
    sqlx::query("INSERT INTO rooms (id) VALUES ($1)")
        .bind(room_id)
        .execute(&state.pool)
        .await?;

    state.load_room(room_id, RoomState::new()).await;
    info!(%room_id, "room created");
    Ok(room_id)
}

/// Whether a room is loaded or stored.
///
/// # Errors
///
/// Returns a database error if the room is not in memory and the lookup fails.
pub async fn room_exists(state: &AppState, room_id: Uuid) -> Result<bool, RoomError> {
    if state.room(room_id).await.is_some() {
        return Ok(true);
    }
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM rooms WHERE id = $1)")
        .bind(room_id)
        .fetch_one(&state.pool)
        .await?;
    Ok(exists)
}

// =============================================================================
// JOIN / PART
// =============================================================================

/// Join a room, hydrating it from Postgres if it is not loaded.
/// Returns a copy of the room's current log.
///
/// # Errors
///
/// Returns [`RoomError::NotFound`] for an unknown room and a database error
/// if hydration fails.
pub async fn join_room(
    state: &AppState,
    room_id: Uuid,
    client_id: Uuid,
    tx: mpsc::Sender<Frame>,
) -> Result<EventLog, RoomError> {
    let room = match state.room(room_id).await {
        Some(room) => room,
        None => {
            // Hydrate outside the registry lock; `load_room` keeps whichever
            // entry lands first if two joins race.
            let history = load_history(&state.pool, room_id)
                .await?
                .ok_or(RoomError::NotFound(room_id))?;
            info!(%room_id, events = history.len(), position = history.position(), "hydrated room from database");
            state.load_room(room_id, RoomState::with_history(history)).await
        }
    };

    let mut room = room.lock().await;
    room.clients.insert(client_id, tx);
    info!(%room_id, %client_id, clients = room.clients.len(), "client joined room");
    Ok(room.history.clone())
}

/// Leave a room. The room stays loaded after its last member leaves.
pub async fn part_room(state: &AppState, room_id: Uuid, client_id: Uuid) {
    let Some(room) = state.room(room_id).await else {
        return;
    };
    let mut room = room.lock().await;
    if room.clients.remove(&client_id).is_some() {
        info!(%room_id, %client_id, remaining = room.clients.len(), "client left room");
    }
}

// =============================================================================
// UPDATE / RELAY
// =============================================================================

/// Replace the room's log with `history` and schedule it for persistence.
/// When `force` is set the new log is broadcast to every other member.
///
/// # Errors
///
/// Returns [`RoomError::NotFound`] or [`RoomError::NotJoined`].
pub async fn submit_update(
    state: &AppState,
    room_id: Uuid,
    client_id: Uuid,
    history: EventLog,
    force: bool,
) -> Result<(), RoomError> {
    let room = loaded_room(state, room_id).await?;
    let mut room = room.lock().await;
    ensure_member(&room, room_id, client_id)?;

    room.history = history;
    persistence::enqueue(state, room_id, &room.history);
    debug!(%room_id, %client_id, events = room.history.len(), position = room.history.position(), force, "room log replaced");

    if force {
        let mut data = Data::new();
        data.insert("history".into(), canvas::sync::history_value(&room.history));
        let frame = notification(frames::SERVER_UPDATE, room_id, client_id, data);
        fanout(&room, &frame, Some(client_id));
    }
    Ok(())
}

/// Forward a live pen delta to the other members as `server:draw`.
/// `participantId` is always the sender's connection id.
///
/// # Errors
///
/// Returns [`RoomError::NotFound`] or [`RoomError::NotJoined`].
pub async fn relay_stroke(state: &AppState, room_id: Uuid, client_id: Uuid, delta: Data) -> Result<(), RoomError> {
    let mut data = delta;
    data.remove("roomId");
    data.insert("participantId".into(), Value::String(client_id.to_string()));
    relay(state, room_id, client_id, frames::SERVER_DRAW, data).await
}

/// Tell the other members the sender undid one step.
///
/// # Errors
///
/// Returns [`RoomError::NotFound`] or [`RoomError::NotJoined`].
pub async fn relay_undo(state: &AppState, room_id: Uuid, client_id: Uuid) -> Result<(), RoomError> {
    relay(state, room_id, client_id, frames::SERVER_UNDO, Data::new()).await
}

/// Tell the other members the sender cleared its history.
///
/// # Errors
///
/// Returns [`RoomError::NotFound`] or [`RoomError::NotJoined`].
pub async fn relay_reset(state: &AppState, room_id: Uuid, client_id: Uuid) -> Result<(), RoomError> {
    relay(state, room_id, client_id, frames::SERVER_RESET, Data::new()).await
}

async fn relay(state: &AppState, room_id: Uuid, client_id: Uuid, syscall: &str, data: Data) -> Result<(), RoomError> {
    let room = loaded_room(state, room_id).await?;
    let room = room.lock().await;
    ensure_member(&room, room_id, client_id)?;
    fanout(&room, &notification(syscall, room_id, client_id, data), Some(client_id));
    Ok(())
}

// =============================================================================
// BROADCAST
// =============================================================================

/// Send a frame to every member of a locked room, optionally excluding one.
fn fanout(room: &RoomState, frame: &Frame, exclude: Option<Uuid>) {
    for (client_id, tx) in &room.clients {
        if exclude == Some(*client_id) {
            continue;
        }
        // Best-effort: if a client's channel is full, skip it.
        if let Err(e) = tx.try_send(frame.clone()) {
            warn!(%client_id, syscall = %frame.syscall, error = %e, "dropping frame for slow or closed client");
        }
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn notification(syscall: &str, room_id: Uuid, client_id: Uuid, data: Data) -> Frame {
    Frame::request(syscall, data)
        .with_room_id(room_id.to_string())
        .with_from(client_id.to_string())
}

async fn loaded_room(state: &AppState, room_id: Uuid) -> Result<SharedRoom, RoomError> {
    state.room(room_id).await.ok_or(RoomError::NotFound(room_id))
}

fn ensure_member(room: &RoomState, room_id: Uuid, client_id: Uuid) -> Result<(), RoomError> {
    if room.clients.contains_key(&client_id) {
        Ok(())
    } else {
        Err(RoomError::NotJoined(room_id))
    }
}

/// Read a stored room's log. `None` if no row exists. A stored log that no
/// longer parses is logged and replaced by an empty one.
///
/// # Errors
///
/// Returns a database error if the query fails.
pub async fn load_history(pool: &PgPool, room_id: Uuid) -> Result<Option<EventLog>, sqlx::Error> {
    let row = sqlx::query_as::<_, (i32, Json<Value>)>("SELECT position, events FROM rooms WHERE id = $1")
        .bind(room_id)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|(position, Json(events))| {
        let raw = serde_json::json!({ "position": position, "events": events });
        serde_json::from_value(raw).unwrap_or_else(|e| {
            warn!(%room_id, error = %e, "stored room log unreadable; starting empty");
            EventLog::new()
        })
    }))
}

#[cfg(test)]
#[path = "room_test.rs"]
mod tests;
