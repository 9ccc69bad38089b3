//! WebSocket handler — room membership and frame relay.
//!
//! DESIGN
//! ======
//! On upgrade, generates a client ID and enters a `select!` loop:
//! - Incoming client frames → parse + dispatch by syscall prefix
//! - Frames fanned out by room peers → forward to client
//!
//! Handler functions validate the request, call into the room service and
//! return an `Outcome`. Only `room:join` is answered; the `client:*` frames
//! are fire-and-forget and produce a reply only when they fail.
//!
//! ENCODING
//! ========
//! Text messages carry JSON frames, binary messages carry protobuf frames.
//! A connection remembers the encoding of its last inbound message and
//! uses it for everything it sends back, including peer fan-out.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → send `session:connected` with `client_id`
//! 2. `room:join` → register as a member, reply with the room's log
//! 3. `client:*` frames → update or relay through the room
//! 4. Close → leave the room (the room itself stays loaded)

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use frames::{Data, ErrorCode, Frame, Status};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::services;
use crate::services::persistence::env_parse;
use crate::state::AppState;

const DEFAULT_CLIENT_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// TYPES
// =============================================================================

/// Result returned by handler functions. The dispatch layer turns it into
/// frames for the sender; peer fan-out happens inside the room service.
enum Outcome {
    /// Send done+data to sender only.
    Reply(Data),
    /// Nothing goes back to the sender.
    Silent,
}

#[derive(Debug, thiserror::Error)]
enum WsError {
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("not joined to a room")]
    NotJoined,
    #[error("unknown syscall: {0}")]
    UnknownSyscall(String),
}

impl ErrorCode for WsError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Malformed(_) | Self::UnknownSyscall(_) => "E_MALFORMED",
            Self::NotJoined => "E_NOT_JOINED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Json,
    Protobuf,
}

enum Inbound<'a> {
    Text(&'a str),
    Binary(&'a [u8]),
}

/// Per-connection state owned by the socket loop.
struct Connection {
    client_id: Uuid,
    room: Option<Uuid>,
    tx: mpsc::Sender<Frame>,
    encoding: Encoding,
}

impl Connection {
    fn new(client_id: Uuid, tx: mpsc::Sender<Frame>) -> Self {
        Self { client_id, room: None, tx, encoding: Encoding::Json }
    }
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let client_id = Uuid::new_v4();

    // Per-connection channel for receiving frames fanned out by peers.
    let capacity = env_parse("CLIENT_CHANNEL_CAPACITY", DEFAULT_CLIENT_CHANNEL_CAPACITY).max(1);
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(capacity);
    let mut conn = Connection::new(client_id, client_tx);

    let welcome = Frame::request(frames::SESSION_CONNECTED, Data::new()).with_data("client_id", client_id.to_string());
    if send_frame(&mut socket, &welcome, conn.encoding).await.is_err() {
        return;
    }

    info!(%client_id, "ws: client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                let Ok(msg) = msg else { break };
                let replies = match &msg {
                    Message::Text(text) => process_inbound(&state, &mut conn, Inbound::Text(text.as_str())).await,
                    Message::Binary(bytes) => process_inbound(&state, &mut conn, Inbound::Binary(bytes)).await,
                    Message::Close(_) => break,
                    _ => continue,
                };
                if send_all(&mut socket, &replies, conn.encoding).await.is_err() {
                    break;
                }
            }
            Some(frame) = client_rx.recv() => {
                if send_frame(&mut socket, &frame, conn.encoding).await.is_err() {
                    break;
                }
            }
        }
    }

    if let Some(room_id) = conn.room {
        services::room::part_room(&state, room_id, client_id).await;
    }
    info!(%client_id, "ws: client disconnected");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and process one inbound message and return frames for the sender.
///
/// This keeps the websocket transport concerns separate from frame handling,
/// so tests can drive whole conversations without a socket.
async fn process_inbound(state: &AppState, conn: &mut Connection, inbound: Inbound<'_>) -> Vec<Frame> {
    let parsed = match inbound {
        Inbound::Text(text) => {
            conn.encoding = Encoding::Json;
            serde_json::from_str::<Frame>(text).map_err(|e| WsError::Malformed(format!("invalid json: {e}")))
        }
        Inbound::Binary(bytes) => {
            conn.encoding = Encoding::Protobuf;
            frames::decode_frame(bytes).map_err(|e| WsError::Malformed(e.to_string()))
        }
    };

    let mut req = match parsed {
        Ok(req) => req,
        Err(e) => {
            warn!(client_id = %conn.client_id, error = %e, "ws: invalid inbound frame");
            let mut err = Frame::request("gateway:error", Data::new()).error_from(&e);
            err.parent_id = None;
            return vec![err];
        }
    };

    // Stamp the connection id as `from`; clients cannot choose it.
    req.from = Some(conn.client_id.to_string());

    if req.syscall == frames::CLIENT_DRAW {
        debug!(client_id = %conn.client_id, id = %req.id, syscall = %req.syscall, "ws: recv frame");
    } else {
        info!(client_id = %conn.client_id, id = %req.id, syscall = %req.syscall, status = ?req.status, "ws: recv frame");
    }

    let result = match req.prefix() {
        "room" => handle_room(state, conn, &req).await,
        "client" => handle_client(state, conn, &req).await,
        _ => Err(req.error_from(&WsError::UnknownSyscall(req.syscall.clone()))),
    };

    match result {
        Ok(Outcome::Reply(data)) => vec![req.done_with(data)],
        Ok(Outcome::Silent) => vec![],
        Err(err_frame) => vec![err_frame],
    }
}

// =============================================================================
// ROOM HANDLERS
// =============================================================================

async fn handle_room(state: &AppState, conn: &mut Connection, req: &Frame) -> Result<Outcome, Frame> {
    match req.op() {
        "join" => {
            let room_id = requested_room(req)?.ok_or_else(|| req.error_from(&WsError::Malformed("roomId required".into())))?;

            // One room per connection: switching rooms leaves the old one.
            if let Some(previous) = conn.room.take() {
                if previous != room_id {
                    services::room::part_room(state, previous, conn.client_id).await;
                }
            }

            let history = services::room::join_room(state, room_id, conn.client_id, conn.tx.clone())
                .await
                .map_err(|e| req.error_from(&e))?;
            conn.room = Some(room_id);

            let mut data = Data::new();
            data.insert("history".into(), canvas::sync::history_value(&history));
            Ok(Outcome::Reply(data))
        }
        _ => Err(req.error_from(&WsError::UnknownSyscall(req.syscall.clone()))),
    }
}

// =============================================================================
// CLIENT HANDLERS
// =============================================================================

async fn handle_client(state: &AppState, conn: &Connection, req: &Frame) -> Result<Outcome, Frame> {
    let Some(room_id) = conn.room else {
        return Err(req.error_from(&WsError::NotJoined));
    };
    if let Some(requested) = requested_room(req)? {
        if requested != room_id {
            return Err(req.error_from(&WsError::NotJoined));
        }
    }

    let client_id = conn.client_id;
    let result = match req.op() {
        "update" => {
            let history = canvas::sync::history_from(req).map_err(|e| req.error_from(&WsError::Malformed(e.to_string())))?;
            let force = req.get("force").and_then(Value::as_bool).unwrap_or(false);
            services::room::submit_update(state, room_id, client_id, history, force).await
        }
        "draw" => {
            let delta = req.data.as_object().cloned().unwrap_or_default();
            services::room::relay_stroke(state, room_id, client_id, delta).await
        }
        "undo" => services::room::relay_undo(state, room_id, client_id).await,
        "reset" => services::room::relay_reset(state, room_id, client_id).await,
        _ => return Err(req.error_from(&WsError::UnknownSyscall(req.syscall.clone()))),
    };

    result.map(|()| Outcome::Silent).map_err(|e| req.error_from(&e))
}

/// The room a frame names, from `room_id` or `data.roomId`.
fn requested_room(req: &Frame) -> Result<Option<Uuid>, Frame> {
    let raw = req
        .room_id
        .as_deref()
        .or_else(|| req.get("roomId").and_then(Value::as_str));
    let Some(raw) = raw else {
        return Ok(None);
    };
    raw.parse::<Uuid>()
        .map(Some)
        .map_err(|_| req.error_from(&WsError::Malformed(format!("invalid roomId: {raw}"))))
}

// =============================================================================
// SEND
// =============================================================================

async fn send_all(socket: &mut WebSocket, frames: &[Frame], encoding: Encoding) -> Result<(), ()> {
    for frame in frames {
        send_frame(socket, frame, encoding).await?;
    }
    Ok(())
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame, encoding: Encoding) -> Result<(), ()> {
    let message = match encoding {
        Encoding::Json => match serde_json::to_string(frame) {
            Ok(json) => Message::Text(json.into()),
            Err(e) => {
                warn!(error = %e, "ws: failed to serialize frame");
                return Err(());
            }
        },
        Encoding::Protobuf => Message::Binary(frames::encode_frame(frame).into()),
    };

    if frame.status == Status::Error {
        let code = frame.get(frames::FRAME_CODE).and_then(Value::as_str).unwrap_or("-");
        let message = frame.get(frames::FRAME_MESSAGE).and_then(Value::as_str).unwrap_or("-");
        warn!(id = %frame.id, syscall = %frame.syscall, code, message, "ws: send frame status=Error");
    } else if frame.syscall == frames::SERVER_DRAW {
        debug!(id = %frame.id, syscall = %frame.syscall, "ws: send frame");
    } else {
        info!(id = %frame.id, syscall = %frame.syscall, status = ?frame.status, "ws: send frame");
    }

    socket.send(message).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
