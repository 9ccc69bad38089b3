//! Drawing core for the collaborative canvas.
//!
//! This crate holds everything a participant needs to draw, undo and stay in
//! sync with a room, independent of any browser API: the event log with its
//! undo/redo cursor, pens that assemble pointer samples into strokes, the
//! replay engine that rebuilds the canvas from history, and the client-side
//! room mirror. The server reuses [`history`] as its canonical room log.
//! Compiled to WebAssembly, [`web`] binds the mirror to a `<canvas>` element.
//!
//! ## Module layout
//!
//! | Module | Role |
//! |--------|------|
//! | [`history`] | Events and the branch-truncating [`history::EventLog`] |
//! | [`pen`] | Stroke assembly for local and remote pens |
//! | [`replay`] | Deterministic log-to-surface replay |
//! | [`image`] | Data URL decoding and the memoized image cache |
//! | [`surface`] | Painting primitives and a recording surface for tests |
//! | [`sync`] | Client-side room mirror ([`sync::SyncClient`]) |
//! | `web` | wasm32 only: `<canvas>` binding |
//! | [`consts`] | Pen defaults and shared constants |

pub mod consts;
pub mod history;
pub mod image;
pub mod pen;
pub mod replay;
pub mod surface;
pub mod sync;
#[cfg(target_arch = "wasm32")]
pub mod web;
