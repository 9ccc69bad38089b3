//! Domain services used by websocket and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own room state transitions and persistence so route
//! handlers can stay focused on protocol translation.

pub mod persistence;
pub mod room;
