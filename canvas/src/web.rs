//! Browser binding: wraps [`SyncClient`] around a `<canvas>` 2D context.
//!
//! The host page owns the websocket and DOM listeners. It forwards pointer
//! input and inbound JSON frames to [`Engine`] and sends every JSON frame the
//! engine returns. Failed canvas calls are logged and skipped; one bad image
//! must not stop the rest of a replay.

use frames::{ErrorCode, Frame};
use js_sys::Array;
use wasm_bindgen::prelude::*;
use wasm_bindgen::{Clamped, JsCast};
use web_sys::{CanvasRenderingContext2d, Document, HtmlCanvasElement, ImageData};

use crate::consts::{LINE_CAP, MAX_CACHED_IMAGES};
use crate::history::Point;
use crate::image::{Bitmap, RecentCache};
use crate::pen::PenTool;
use crate::surface::Surface;
use crate::sync::SyncClient;

/// [`Surface`] over a browser 2D context.
///
/// Bitmaps are composited with `drawImage` from a per-image offscreen canvas,
/// so transparent pixels keep what is already painted underneath. The
/// offscreen canvases are built once per reference and kept in a bounded
/// recent cache.
pub struct ContextSurface {
    ctx: CanvasRenderingContext2d,
    document: Document,
    images: RecentCache<HtmlCanvasElement>,
    width: f64,
    height: f64,
}

impl ContextSurface {
    /// Bind to the 2D context of `canvas`.
    ///
    /// # Errors
    ///
    /// Fails if the canvas has no 2D context or is not attached to a document.
    pub fn new(canvas: &HtmlCanvasElement) -> Result<Self, JsValue> {
        let ctx = context_2d(canvas)?;
        let document = canvas
            .owner_document()
            .ok_or_else(|| JsValue::from_str("canvas has no owner document"))?;
        Ok(Self {
            ctx,
            document,
            images: RecentCache::new(MAX_CACHED_IMAGES),
            width: f64::from(canvas.width()),
            height: f64::from(canvas.height()),
        })
    }

    pub fn set_size(&mut self, width: f64, height: f64) {
        self.width = width;
        self.height = height;
    }

    fn image_handle(&mut self, reference: &str, bitmap: &Bitmap) -> Option<HtmlCanvasElement> {
        if self.images.touch(reference) {
            return self.images.get(reference).cloned();
        }
        match self.build_handle(bitmap) {
            Ok(handle) => {
                self.images.insert(reference.to_owned(), handle.clone());
                Some(handle)
            }
            Err(e) => {
                tracing::warn!(error = ?e, "failed to build image canvas");
                None
            }
        }
    }

    fn build_handle(&self, bitmap: &Bitmap) -> Result<HtmlCanvasElement, JsValue> {
        let offscreen = self
            .document
            .create_element("canvas")?
            .dyn_into::<HtmlCanvasElement>()
            .map_err(JsValue::from)?;
        offscreen.set_width(bitmap.width);
        offscreen.set_height(bitmap.height);
        let data = ImageData::new_with_u8_clamped_array_and_sh(Clamped(bitmap.rgba.as_slice()), bitmap.width, bitmap.height)?;
        context_2d(&offscreen)?.put_image_data(&data, 0.0, 0.0)?;
        Ok(offscreen)
    }
}

impl Surface for ContextSurface {
    fn clear(&mut self) {
        self.ctx.clear_rect(0.0, 0.0, self.width, self.height);
    }

    fn stroke_segment(&mut self, from: Point, to: Point, color: &str, width: f64) {
        self.ctx.set_line_cap(LINE_CAP);
        self.ctx.set_stroke_style_str(color);
        self.ctx.set_line_width(width);
        self.ctx.begin_path();
        self.ctx.move_to(from.x, from.y);
        self.ctx.line_to(to.x, to.y);
        self.ctx.stroke();
    }

    fn fill_rect(&mut self, x: f64, y: f64, w: f64, h: f64, color: &str) {
        self.ctx.set_fill_style_str(color);
        self.ctx.fill_rect(x, y, w, h);
    }

    fn draw_image(&mut self, reference: &str, bitmap: &Bitmap, x: f64, y: f64) {
        let Some(handle) = self.image_handle(reference, bitmap) else {
            return;
        };
        if let Err(e) = self.ctx.draw_image_with_html_canvas_element(&handle, x, y) {
            tracing::warn!(error = ?e, "failed to paint image");
        }
    }
}

fn context_2d(canvas: &HtmlCanvasElement) -> Result<CanvasRenderingContext2d, JsValue> {
    canvas
        .get_context("2d")?
        .ok_or_else(|| JsValue::from_str("canvas has no 2d context"))?
        .dyn_into::<CanvasRenderingContext2d>()
        .map_err(JsValue::from)
}

/// The browser-facing engine. Outbound frames are returned as arrays of JSON
/// strings for the host to send as websocket text messages.
#[wasm_bindgen]
pub struct Engine {
    client: SyncClient,
    surface: ContextSurface,
}

#[wasm_bindgen]
impl Engine {
    /// Bind to `canvas` for room `room_id`.
    ///
    /// # Errors
    ///
    /// Fails if the canvas has no 2D context or no owner document.
    #[wasm_bindgen(constructor)]
    pub fn new(canvas: HtmlCanvasElement, room_id: String) -> Result<Engine, JsValue> {
        let surface = ContextSurface::new(&canvas)?;
        Ok(Self { client: SyncClient::new(room_id), surface })
    }

    /// The `room:join` frame to send once the socket is open.
    ///
    /// # Errors
    ///
    /// Fails if the frame cannot be serialized.
    pub fn join(&self) -> Result<String, JsValue> {
        to_json(&self.client.join_request())
    }

    /// Apply an inbound JSON frame.
    ///
    /// # Errors
    ///
    /// Rejects with the error code (e.g. `E_ROOM_NOT_FOUND`, on which the host
    /// navigates back to `/draw`).
    pub fn handle_message(&mut self, text: &str) -> Result<(), JsValue> {
        let frame: Frame = serde_json::from_str(text).map_err(|e| {
            tracing::warn!(error = %e, "unparseable frame");
            JsValue::from_str("E_MALFORMED")
        })?;
        match self.client.handle_frame(&frame, &mut self.surface) {
            Ok(applied) => {
                tracing::trace!(?applied, "frame applied");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, code = e.error_code(), "frame rejected");
                Err(JsValue::from_str(e.error_code()))
            }
        }
    }

    /// # Errors
    ///
    /// Fails if an outbound frame cannot be serialized.
    pub fn pointer_down(&mut self, x: f64, y: f64) -> Result<Array, JsValue> {
        outbound(&self.client.pointer_down(x, y))
    }

    /// # Errors
    ///
    /// Fails if an outbound frame cannot be serialized.
    pub fn pointer_move(&mut self, x: f64, y: f64) -> Result<Array, JsValue> {
        outbound(&self.client.pointer_move(x, y, &mut self.surface))
    }

    /// Also call on pointer leave.
    ///
    /// # Errors
    ///
    /// Fails if an outbound frame cannot be serialized.
    pub fn pointer_up(&mut self) -> Result<Array, JsValue> {
        outbound(&self.client.pointer_up(&mut self.surface))
    }

    pub fn set_color(&mut self, color: String) {
        self.client.set_color(color);
    }

    pub fn set_width(&mut self, width: f64) {
        self.client.set_width(width);
    }

    /// `"freehand"` or `"rectangle"`. Unknown names select freehand.
    pub fn set_tool(&mut self, tool: &str) {
        let tool = match tool {
            "rectangle" => PenTool::Rectangle,
            _ => PenTool::Freehand,
        };
        self.client.set_tool(tool);
    }

    /// # Errors
    ///
    /// Fails if an outbound frame cannot be serialized.
    pub fn undo(&mut self) -> Result<Array, JsValue> {
        outbound(&self.client.undo(&mut self.surface))
    }

    /// # Errors
    ///
    /// Fails if an outbound frame cannot be serialized.
    pub fn redo(&mut self) -> Result<Array, JsValue> {
        outbound(&self.client.redo(&mut self.surface))
    }

    /// # Errors
    ///
    /// Fails if an outbound frame cannot be serialized.
    pub fn reset(&mut self) -> Result<Array, JsValue> {
        outbound(&self.client.reset(&mut self.surface))
    }

    /// # Errors
    ///
    /// Fails if an outbound frame cannot be serialized.
    pub fn clear_canvas(&mut self) -> Result<Array, JsValue> {
        outbound(&self.client.clear_canvas(&mut self.surface))
    }

    /// # Errors
    ///
    /// Fails if an outbound frame cannot be serialized.
    pub fn paste_image(&mut self, data_url: String) -> Result<Array, JsValue> {
        outbound(&self.client.paste_image(data_url, &mut self.surface))
    }

    /// Track a canvas resize and repaint from history.
    pub fn resize(&mut self, width: f64, height: f64) {
        self.surface.set_size(width, height);
        self.client.redraw(&mut self.surface);
    }

    #[wasm_bindgen(getter)]
    pub fn client_id(&self) -> Option<String> {
        self.client.client_id().map(str::to_owned)
    }
}

fn to_json(frame: &Frame) -> Result<String, JsValue> {
    serde_json::to_string(frame).map_err(|e| JsValue::from_str(&e.to_string()))
}

fn outbound(frames: &[Frame]) -> Result<Array, JsValue> {
    let out = Array::new();
    for frame in frames {
        out.push(&JsValue::from_str(&to_json(frame)?));
    }
    Ok(out)
}
