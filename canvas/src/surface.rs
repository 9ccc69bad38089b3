//! Drawing surface abstraction.
//!
//! Everything that paints goes through [`Surface`], so pen assembly and replay
//! never touch a browser context directly. The wasm build binds it to a
//! `CanvasRenderingContext2d` (see `web`); tests and the CLI use
//! [`RecordingSurface`], which keeps the painted operations as data.

use crate::history::Point;
use crate::image::Bitmap;

/// The painting primitives the drawing core needs.
pub trait Surface {
    /// Blank the whole surface.
    fn clear(&mut self);

    /// Stroke one line segment with a round cap.
    fn stroke_segment(&mut self, from: Point, to: Point, color: &str, width: f64);

    /// Fill an axis-aligned rectangle. `w`/`h` may be negative.
    fn fill_rect(&mut self, x: f64, y: f64, w: f64, h: f64, color: &str);

    /// Composite a decoded bitmap over the surface with its top-left corner
    /// at `(x, y)`. `reference` is the image's source string; surfaces that
    /// build their own image handles may key them by it.
    fn draw_image(&mut self, reference: &str, bitmap: &Bitmap, x: f64, y: f64);
}

/// A painted operation, as captured by [`RecordingSurface`].
#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    Clear,
    Segment { from: Point, to: Point, color: String, width: f64 },
    Rect { x: f64, y: f64, w: f64, h: f64, color: String },
    Image { width: u32, height: u32, x: f64, y: f64 },
}

/// In-memory surface that records every call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordingSurface {
    ops: Vec<DrawOp>,
}

impl RecordingSurface {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every operation since construction (or the last [`Self::reset_ops`]).
    #[must_use]
    pub fn ops(&self) -> &[DrawOp] {
        &self.ops
    }

    /// Operations after the most recent `Clear`: what is currently visible.
    #[must_use]
    pub fn visible(&self) -> &[DrawOp] {
        let start = self.ops.iter().rposition(|op| *op == DrawOp::Clear).map_or(0, |i| i + 1);
        &self.ops[start..]
    }

    pub fn reset_ops(&mut self) {
        self.ops.clear();
    }
}

impl Surface for RecordingSurface {
    fn clear(&mut self) {
        self.ops.push(DrawOp::Clear);
    }

    fn stroke_segment(&mut self, from: Point, to: Point, color: &str, width: f64) {
        self.ops.push(DrawOp::Segment { from, to, color: color.to_owned(), width });
    }

    fn fill_rect(&mut self, x: f64, y: f64, w: f64, h: f64, color: &str) {
        self.ops.push(DrawOp::Rect { x, y, w, h, color: color.to_owned() });
    }

    fn draw_image(&mut self, _reference: &str, bitmap: &Bitmap, x: f64, y: f64) {
        self.ops.push(DrawOp::Image { width: bitmap.width, height: bitmap.height, x, y });
    }
}
