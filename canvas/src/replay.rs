//! Replay: rebuild the visible canvas from the live prefix of an event log.
//!
//! Replay always starts from a blank surface and paints `events[..position]`
//! in order, so the same prefix produces the same sequence of surface calls
//! every time. The only state carried between replays is the image cache,
//! which is itself a pure function of the image reference.

#[cfg(test)]
#[path = "replay_test.rs"]
mod replay_test;

use crate::history::{Event, EventLog};
use crate::image::ImageCache;
use crate::surface::Surface;

#[derive(Debug, Default)]
pub struct ReplayEngine {
    images: ImageCache,
}

impl ReplayEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear `surface` and paint every live event of `log`.
    pub fn replay(&mut self, log: &EventLog, surface: &mut dyn Surface) {
        surface.clear();
        for event in log.active() {
            self.paint(event, surface);
        }
    }

    /// Paint a single event on top of whatever is already on `surface`.
    pub fn paint(&mut self, event: &Event, surface: &mut dyn Surface) {
        match event {
            Event::Draw { color, width, points } => {
                for pair in points.windows(2) {
                    surface.stroke_segment(pair[0], pair[1], color, *width);
                }
            }
            Event::Rectangle { color, start_x, start_y, end_x, end_y } => {
                surface.fill_rect(*start_x, *start_y, *end_x, *end_y, color);
            }
            Event::Image { image } => {
                if let Some(bitmap) = self.images.get_or_decode(image) {
                    surface.draw_image(image, bitmap, 0.0, 0.0);
                }
            }
            Event::Reset => surface.clear(),
        }
    }

    #[must_use]
    pub fn images(&self) -> &ImageCache {
        &self.images
    }
}
