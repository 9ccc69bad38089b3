//! Client-side mirror of a room.
//!
//! [`SyncClient`] is the testable core of a participant: it owns the local pen,
//! the remote-pen registry, the local copy of the room's event log and the
//! replay engine. It never touches a socket. Every operation returns the
//! frames the host must send, and inbound frames are fed to
//! [`SyncClient::handle_frame`].
//!
//! DESIGN
//! ======
//! - Snapshots (`room:join` reply, `server:update`) replace the local log
//!   wholesale and replay it. Last writer wins; there is no merge.
//! - Remote strokes arrive as live deltas and are assembled by a per-sender
//!   pen. On pen-lift the stroke is committed to the local log only; the
//!   sender is the sole committer that checkpoints it to the server.
//! - Local commits send an unforced `client:update` checkpoint. Operations
//!   peers cannot reproduce from relays (redo, clear, paste, rectangles) send
//!   a forced update so the server broadcasts the full log.
//! - A press while the pen is already down restarts the local stroke, but the
//!   relayed deltas cannot say so and peers keep the discarded points. Such a
//!   stroke is checkpointed with a forced update on release.

#[cfg(test)]
#[path = "sync_test.rs"]
mod sync_test;

use frames::{Data, ErrorCode, Frame, Status};
use serde_json::Value;

use crate::history::{Event, EventLog};
use crate::pen::{Pen, PenRegistry, PenTool, StrokeDelta};
use crate::replay::ReplayEngine;
use crate::surface::Surface;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
    /// The room is unknown to the server. The host should return to the
    /// room-less entry point (`/draw`).
    #[error("room not found")]
    RoomNotFound,
    #[error("server error {code}: {message}")]
    Server { code: String, message: String },
    #[error("malformed frame: {0}")]
    Malformed(String),
}

impl ErrorCode for SyncError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::RoomNotFound => "E_ROOM_NOT_FOUND",
            Self::Server { .. } => "E_SERVER",
            Self::Malformed(_) => "E_MALFORMED",
        }
    }
}

/// What an inbound frame did to the mirror.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    /// `session:connected`: the server assigned this connection an id.
    Connected { client_id: String },
    /// Join reply adopted.
    Joined,
    /// `server:update` adopted.
    Updated,
    /// A remote pen moved. `committed` is set when it lifted and a stroke was
    /// added to the local log.
    Stroke { participant: String, committed: bool },
    Undone,
    Reset,
    /// Not addressed to the mirror (unrelated replies, unknown syscalls).
    Ignored,
}

// =============================================================================
// CLIENT
// =============================================================================

#[derive(Debug)]
pub struct SyncClient {
    room_id: String,
    client_id: Option<String>,
    joined: bool,
    pen: Pen,
    /// The current stroke was restarted by a press while down.
    restarted: bool,
    remotes: PenRegistry,
    history: EventLog,
    replay: ReplayEngine,
}

impl SyncClient {
    #[must_use]
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            client_id: None,
            joined: false,
            pen: Pen::new(),
            restarted: false,
            remotes: PenRegistry::new(),
            history: EventLog::new(),
            replay: ReplayEngine::new(),
        }
    }

    // --- Session ---

    /// The `room:join` request. Its `done` reply carries the snapshot.
    #[must_use]
    pub fn join_request(&self) -> Frame {
        self.frame(frames::ROOM_JOIN, Data::new())
    }

    /// Apply one inbound frame.
    ///
    /// # Errors
    ///
    /// Error frames from the server surface as [`SyncError`]; frames whose
    /// payload cannot be read yield [`SyncError::Malformed`] and leave the
    /// mirror unchanged.
    pub fn handle_frame(&mut self, frame: &Frame, surface: &mut dyn Surface) -> Result<Applied, SyncError> {
        match frame.status {
            Status::Error => Err(server_error(frame)),
            Status::Done => {
                if frame.syscall != frames::ROOM_JOIN {
                    return Ok(Applied::Ignored);
                }
                let log = history_from(frame)?;
                self.adopt(log, surface);
                self.joined = true;
                Ok(Applied::Joined)
            }
            Status::Request => self.handle_notification(frame, surface),
        }
    }

    fn handle_notification(&mut self, frame: &Frame, surface: &mut dyn Surface) -> Result<Applied, SyncError> {
        match frame.syscall.as_str() {
            frames::SESSION_CONNECTED => {
                let client_id = frame
                    .get("client_id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| SyncError::Malformed("session:connected without client_id".into()))?;
                self.client_id = Some(client_id.to_owned());
                Ok(Applied::Connected { client_id: client_id.to_owned() })
            }
            frames::SERVER_UPDATE => {
                let log = history_from(frame)?;
                self.adopt(log, surface);
                Ok(Applied::Updated)
            }
            frames::SERVER_DRAW => {
                let delta: StrokeDelta = serde_json::from_value(frame.data.clone())
                    .map_err(|e| SyncError::Malformed(format!("stroke delta: {e}")))?;
                let participant = delta
                    .participant_id
                    .clone()
                    .ok_or_else(|| SyncError::Malformed("stroke delta without participantId".into()))?;
                let pen = self.remotes.get_or_create(&participant);
                let committed = pen.apply_delta(&delta, &mut self.history, surface);
                Ok(Applied::Stroke { participant, committed })
            }
            frames::SERVER_UNDO => {
                self.history.undo();
                self.replay.replay(&self.history, surface);
                Ok(Applied::Undone)
            }
            frames::SERVER_RESET => {
                self.history.clear();
                surface.clear();
                Ok(Applied::Reset)
            }
            other => {
                tracing::debug!(syscall = other, "ignoring unhandled notification");
                Ok(Applied::Ignored)
            }
        }
    }

    fn adopt(&mut self, log: EventLog, surface: &mut dyn Surface) {
        let (events, position) = log.into_parts();
        self.history.set(events, position);
        self.replay.replay(&self.history, surface);
    }

    // --- Local pen ---

    pub fn set_color(&mut self, color: impl Into<String>) {
        self.pen.set_color(color);
    }

    pub fn set_width(&mut self, width: f64) {
        self.pen.set_width(width);
    }

    pub fn set_tool(&mut self, tool: PenTool) {
        self.pen.set_tool(tool);
    }

    pub fn pointer_down(&mut self, x: f64, y: f64) -> Vec<Frame> {
        if self.pen.is_down() && self.pen.tool() == PenTool::Freehand {
            self.restarted = true;
        }
        self.pen.put_down(x, y);
        self.stroke_frames()
    }

    /// Moves are relayed while up too, so peers can track the cursor.
    pub fn pointer_move(&mut self, x: f64, y: f64, surface: &mut dyn Surface) -> Vec<Frame> {
        self.pen.move_to(x, y, surface);
        self.stroke_frames()
    }

    /// Release the local pen. Also the handler for the pointer leaving the
    /// surface.
    pub fn pointer_up(&mut self, surface: &mut dyn Surface) -> Vec<Frame> {
        if !self.pen.is_down() {
            return Vec::new();
        }
        let committed = self.pen.pick_up(&mut self.history, surface);
        let restarted = std::mem::take(&mut self.restarted);
        let mut out = self.stroke_frames();
        // Peers cannot assemble rectangles or restarted strokes from relayed
        // deltas. A restart that commits nothing still leaves peers with the
        // stale stroke, so they get the log either way.
        if committed || restarted {
            out.push(self.update_frame(restarted || self.pen.tool() == PenTool::Rectangle));
        }
        out
    }

    // --- History operations ---

    /// Step back one event. Peers apply the same undo from the relay.
    pub fn undo(&mut self, surface: &mut dyn Surface) -> Vec<Frame> {
        if !self.history.undo() {
            return Vec::new();
        }
        self.replay.replay(&self.history, surface);
        vec![self.frame(frames::CLIENT_UNDO, Data::new()), self.update_frame(false)]
    }

    /// Step forward one event. There is no redo relay, so peers get the log.
    pub fn redo(&mut self, surface: &mut dyn Surface) -> Vec<Frame> {
        if !self.history.redo() {
            return Vec::new();
        }
        self.replay.replay(&self.history, surface);
        vec![self.update_frame(true)]
    }

    /// Wipe all history for everyone. Not undoable.
    pub fn reset(&mut self, surface: &mut dyn Surface) -> Vec<Frame> {
        self.history.clear();
        surface.clear();
        vec![self.frame(frames::CLIENT_RESET, Data::new()), self.update_frame(false)]
    }

    /// Blank the canvas with an undoable reset marker.
    pub fn clear_canvas(&mut self, surface: &mut dyn Surface) -> Vec<Frame> {
        self.history.add(Some(Event::Reset));
        surface.clear();
        vec![self.update_frame(true)]
    }

    /// Commit a pasted image (a `data:` URL) and paint it at the origin.
    pub fn paste_image(&mut self, data_url: impl Into<String>, surface: &mut dyn Surface) -> Vec<Frame> {
        let event = Event::Image { image: data_url.into() };
        self.replay.paint(&event, surface);
        self.history.add(Some(event));
        vec![self.update_frame(true)]
    }

    /// Rebuild the surface from the log, e.g. after a resize.
    pub fn redraw(&mut self, surface: &mut dyn Surface) {
        self.replay.replay(&self.history, surface);
    }

    // --- Queries ---

    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    #[must_use]
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    #[must_use]
    pub fn is_joined(&self) -> bool {
        self.joined
    }

    #[must_use]
    pub fn history(&self) -> &EventLog {
        &self.history
    }

    #[must_use]
    pub fn pen(&self) -> &Pen {
        &self.pen
    }

    #[must_use]
    pub fn remote_pens(&self) -> &PenRegistry {
        &self.remotes
    }

    // --- Outbound frames ---

    fn frame(&self, syscall: &str, mut data: Data) -> Frame {
        data.insert("roomId".into(), Value::String(self.room_id.clone()));
        Frame::request(syscall, data).with_room_id(self.room_id.clone())
    }

    /// `client:update` carrying the full local log.
    #[must_use]
    pub fn update_frame(&self, force: bool) -> Frame {
        let mut data = Data::new();
        data.insert("history".into(), history_value(&self.history));
        data.insert("force".into(), Value::Bool(force));
        self.frame(frames::CLIENT_UPDATE, data)
    }

    fn stroke_frames(&self) -> Vec<Frame> {
        if self.pen.tool() != PenTool::Freehand {
            return Vec::new();
        }
        let data = match serde_json::to_value(self.pen.delta()) {
            Ok(Value::Object(map)) => map,
            Ok(_) => return Vec::new(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode stroke delta");
                return Vec::new();
            }
        };
        vec![self.frame(frames::CLIENT_DRAW, data)]
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// Serialize a log into its wire shape `{position, events}`.
#[must_use]
pub fn history_value(log: &EventLog) -> Value {
    serde_json::to_value(log).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to encode event log");
        Value::Null
    })
}

/// Read the `history` payload of a snapshot frame.
///
/// # Errors
///
/// Returns [`SyncError::Malformed`] if the field is missing or not a log.
pub fn history_from(frame: &Frame) -> Result<EventLog, SyncError> {
    let value = frame
        .get("history")
        .cloned()
        .ok_or_else(|| SyncError::Malformed(format!("{} without history", frame.syscall)))?;
    serde_json::from_value(value).map_err(|e| SyncError::Malformed(format!("history: {e}")))
}

fn server_error(frame: &Frame) -> SyncError {
    let code = frame.get(frames::FRAME_CODE).and_then(Value::as_str).unwrap_or("E_UNKNOWN");
    let message = frame.get(frames::FRAME_MESSAGE).and_then(Value::as_str).unwrap_or_default();
    if code == "E_ROOM_NOT_FOUND" {
        return SyncError::RoomNotFound;
    }
    SyncError::Server { code: code.to_owned(), message: message.to_owned() }
}
