//! Shared defaults for pens and the drawing surface.

// ── Pen ─────────────────────────────────────────────────────────

/// Stroke width of a freshly created pen, in surface pixels.
pub const DEFAULT_PEN_WIDTH: f64 = 5.0;

/// Stroke color of a freshly created pen.
pub const DEFAULT_PEN_COLOR: &str = "#000000";

/// Line cap used for every stroke segment, live or replayed.
pub const LINE_CAP: &str = "round";

// ── Images ──────────────────────────────────────────────────────

/// Prefix every pasted image reference carries.
pub const DATA_URL_PREFIX: &str = "data:";

/// Decoded bitmaps (and browser image handles) kept per replay engine.
pub const MAX_CACHED_IMAGES: usize = 16;
