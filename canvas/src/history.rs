//! Event history: committed drawing operations and the undo/redo cursor.
//!
//! An [`EventLog`] is an ordered list of immutable [`Event`]s plus a
//! `position` that splits it in two: `events[..position]` is the live history
//! the replay engine draws, `events[position..]` is redoable but invisible.
//! Committing a new event after an undo discards the redoable tail for good.
//!
//! Logs arrive from the network as JSON. Entries with an unknown `type` are
//! dropped on the way in rather than failing the whole log, and the cursor is
//! re-counted over the surviving entries.

#[cfg(test)]
#[path = "history_test.rs"]
mod history_test;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A sampled pen location in surface coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[must_use]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A committed drawing operation. Never mutated once added to a log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Event {
    /// Completed freehand stroke. `points` is never empty.
    Draw { color: String, width: f64, points: Vec<Point> },
    /// Filled rectangle. `end_x`/`end_y` are extents relative to the start.
    #[serde(rename_all = "camelCase")]
    Rectangle { color: String, start_x: f64, start_y: f64, end_x: f64, end_y: f64 },
    /// Pasted bitmap placed at the origin. `image` is an opaque reference (a data URL).
    Image { image: String },
    /// Full-canvas clear marker.
    Reset,
}

impl Event {
    /// Build an event from a JSON value. Unrecognized or ill-shaped values
    /// yield `None`.
    #[must_use]
    pub fn from_value(value: Value) -> Option<Self> {
        match serde_json::from_value::<Self>(value) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::debug!(error = %e, "dropping malformed event");
                None
            }
        }
    }

    /// Build an event from a kind tag and its payload, the way the host
    /// layer names them (`"draw"`, `"rectangle"`, `"image"`, `"reset"`).
    ///
    /// An image payload may be the bare reference string.
    #[must_use]
    pub fn from_kind(kind: &str, data: Value) -> Option<Self> {
        let mut fields = match data {
            Value::Object(map) => map,
            Value::String(image) if kind == "image" => {
                return Some(Self::Image { image });
            }
            Value::Null => serde_json::Map::new(),
            _ => return None,
        };
        fields.insert("type".into(), Value::String(kind.to_owned()));
        Self::from_value(Value::Object(fields))
    }

    /// The tag this event carries on the wire.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Draw { .. } => "draw",
            Self::Rectangle { .. } => "rectangle",
            Self::Image { .. } => "image",
            Self::Reset => "reset",
        }
    }
}

/// Ordered history of committed events with an undo/redo cursor.
///
/// Invariant: `0 <= position <= events.len()` after every operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawEventLog")]
pub struct EventLog {
    position: usize,
    events: Vec<Event>,
}

impl EventLog {
    /// Create an empty log with the cursor at 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the log wholesale, e.g. when adopting a server snapshot.
    /// A cursor past the end is pulled back to `events.len()`.
    pub fn set(&mut self, events: Vec<Event>, position: usize) {
        self.position = position.min(events.len());
        self.events = events;
    }

    /// Split into `(events, position)`, the arguments [`Self::set`] takes.
    #[must_use]
    pub fn into_parts(self) -> (Vec<Event>, usize) {
        (self.events, self.position)
    }

    /// Commit `event`. `None` is a no-op.
    ///
    /// Drops every redoable event first, so after an undo the superseded
    /// branch is gone permanently.
    pub fn add(&mut self, event: Option<Event>) {
        let Some(event) = event else {
            return;
        };
        self.events.truncate(self.position);
        self.events.push(event);
        self.position += 1;
    }

    /// Step the cursor back one event. Returns `false` at the lower bound.
    pub fn undo(&mut self) -> bool {
        if self.position == 0 {
            return false;
        }
        self.position -= 1;
        true
    }

    /// Step the cursor forward one event. Returns `false` at the upper bound.
    pub fn redo(&mut self) -> bool {
        if self.position >= self.events.len() {
            return false;
        }
        self.position += 1;
        true
    }

    /// Wipe all history, live and redoable.
    pub fn clear(&mut self) {
        self.events.clear();
        self.position = 0;
    }

    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Every stored event, including the redoable tail.
    #[must_use]
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// The live prefix `events[..position]`.
    #[must_use]
    pub fn active(&self) -> &[Event] {
        &self.events[..self.position]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.position > 0
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.position < self.events.len()
    }
}

/// Lenient wire shape. Events stay untyped until filtered, and the cursor is
/// accepted as any JSON number.
#[derive(Deserialize)]
struct RawEventLog {
    #[serde(default)]
    position: Option<f64>,
    #[serde(default)]
    events: Vec<Value>,
}

impl From<RawEventLog> for EventLog {
    fn from(raw: RawEventLog) -> Self {
        let raw_len = raw.events.len();
        let raw_position = raw.position.map_or(raw_len, |p| clamp_index(p, raw_len));

        let mut events = Vec::with_capacity(raw_len);
        let mut position = 0;
        for (index, value) in raw.events.into_iter().enumerate() {
            let Some(event) = Event::from_value(value) else {
                continue;
            };
            events.push(event);
            if index < raw_position {
                position += 1;
            }
        }

        if events.len() < raw_len {
            tracing::warn!(dropped = raw_len - events.len(), "event log contained malformed events");
        }

        let mut log = Self::new();
        log.set(events, position);
        log
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn clamp_index(value: f64, len: usize) -> usize {
    if !value.is_finite() || value <= 0.0 {
        return 0;
    }
    if value >= len as f64 {
        return len;
    }
    value.floor() as usize
}
