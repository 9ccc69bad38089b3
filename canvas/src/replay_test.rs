use std::io::Cursor;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use ::image::{DynamicImage, ImageFormat, Rgba, RgbaImage};

use super::*;
use crate::history::Point;
use crate::image::Bitmap;
use crate::surface::{DrawOp, RecordingSurface};

// =============================================================
// Helpers
// =============================================================

fn line(color: &str, points: &[(f64, f64)]) -> Event {
    Event::Draw {
        color: color.to_owned(),
        width: 4.0,
        points: points.iter().map(|&(x, y)| Point::new(x, y)).collect(),
    }
}

fn png_data_url(width: u32, height: u32) -> String {
    let img = RgbaImage::from_pixel(width, height, Rgba([10, 20, 30, 255]));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode png");
    format!("data:image/png;base64,{}", STANDARD.encode(bytes))
}

fn log_of(events: Vec<Event>) -> EventLog {
    let mut log = EventLog::new();
    for event in events {
        log.add(Some(event));
    }
    log
}

// =============================================================
// Replay
// =============================================================

#[test]
fn replay_starts_from_blank_surface() {
    let mut surface = RecordingSurface::new();
    surface.fill_rect(0.0, 0.0, 5.0, 5.0, "#stale");

    ReplayEngine::new().replay(&EventLog::new(), &mut surface);
    assert_eq!(surface.ops().last(), Some(&DrawOp::Clear));
    assert!(surface.visible().is_empty());
}

#[test]
fn draw_event_strokes_consecutive_pairs() {
    let log = log_of(vec![line("#f00", &[(0.0, 0.0), (1.0, 1.0), (2.0, 0.0)])]);
    let mut surface = RecordingSurface::new();
    ReplayEngine::new().replay(&log, &mut surface);

    assert_eq!(
        surface.visible(),
        &[
            DrawOp::Segment { from: Point::new(0.0, 0.0), to: Point::new(1.0, 1.0), color: "#f00".into(), width: 4.0 },
            DrawOp::Segment { from: Point::new(1.0, 1.0), to: Point::new(2.0, 0.0), color: "#f00".into(), width: 4.0 },
        ]
    );
}

#[test]
fn single_point_stroke_paints_nothing() {
    let log = log_of(vec![line("#f00", &[(3.0, 3.0)])]);
    let mut surface = RecordingSurface::new();
    ReplayEngine::new().replay(&log, &mut surface);
    assert!(surface.visible().is_empty());
}

#[test]
fn only_live_prefix_is_painted() {
    let mut log = log_of(vec![
        line("#a", &[(0.0, 0.0), (1.0, 0.0)]),
        line("#b", &[(0.0, 0.0), (1.0, 0.0)]),
    ]);
    log.undo();

    let mut surface = RecordingSurface::new();
    ReplayEngine::new().replay(&log, &mut surface);

    assert_eq!(surface.visible().len(), 1);
    assert!(matches!(&surface.visible()[0], DrawOp::Segment { color, .. } if color == "#a"));
}

#[test]
fn rectangle_paints_stored_origin_and_extent() {
    let log = log_of(vec![Event::Rectangle {
        color: "#00f".into(),
        start_x: 10.0,
        start_y: 10.0,
        end_x: 30.0,
        end_y: 15.0,
    }]);
    let mut surface = RecordingSurface::new();
    ReplayEngine::new().replay(&log, &mut surface);

    assert_eq!(surface.visible(), &[DrawOp::Rect { x: 10.0, y: 10.0, w: 30.0, h: 15.0, color: "#00f".into() }]);
}

#[test]
fn reset_blanks_accumulation_but_later_events_still_paint() {
    let log = log_of(vec![
        line("#before", &[(0.0, 0.0), (1.0, 1.0)]),
        Event::Reset,
        line("#after", &[(2.0, 2.0), (3.0, 3.0)]),
    ]);
    let mut surface = RecordingSurface::new();
    ReplayEngine::new().replay(&log, &mut surface);

    assert_eq!(surface.visible().len(), 1);
    assert!(matches!(&surface.visible()[0], DrawOp::Segment { color, .. } if color == "#after"));
    // Reset does not truncate the log.
    assert_eq!(log.len(), 3);
}

#[test]
fn replay_is_deterministic_and_idempotent() {
    let log = log_of(vec![
        line("#1", &[(0.0, 0.0), (5.0, 5.0), (9.0, 1.0)]),
        Event::Rectangle { color: "#2".into(), start_x: 1.0, start_y: 2.0, end_x: -3.0, end_y: 4.0 },
        Event::Image { image: png_data_url(2, 2) },
    ]);
    let mut engine = ReplayEngine::new();

    let mut first = RecordingSurface::new();
    engine.replay(&log, &mut first);
    let mut second = RecordingSurface::new();
    engine.replay(&log, &mut second);
    assert_eq!(first, second);

    let mut fresh_engine_surface = RecordingSurface::new();
    ReplayEngine::new().replay(&log, &mut fresh_engine_surface);
    assert_eq!(first, fresh_engine_surface);

    // Replaying over an already painted surface yields the same visible state.
    engine.replay(&log, &mut first);
    assert_eq!(first.visible(), second.visible());
}

// =============================================================
// Images
// =============================================================

#[test]
fn image_paints_at_origin() {
    let log = log_of(vec![Event::Image { image: png_data_url(4, 3) }]);
    let mut surface = RecordingSurface::new();
    ReplayEngine::new().replay(&log, &mut surface);

    assert_eq!(surface.visible(), &[DrawOp::Image { width: 4, height: 3, x: 0.0, y: 0.0 }]);
}

#[test]
fn image_decode_is_memoized_across_replays() {
    let url = png_data_url(1, 1);
    let log = log_of(vec![Event::Image { image: url.clone() }, Event::Image { image: url }]);
    let mut engine = ReplayEngine::new();
    let mut surface = RecordingSurface::new();

    engine.replay(&log, &mut surface);
    engine.replay(&log, &mut surface);

    assert_eq!(engine.images().decode_count(), 1);
}

#[test]
fn undecodable_image_is_skipped() {
    let log = log_of(vec![
        Event::Image { image: "data:image/png;base64,AAAA".into() },
        line("#ok", &[(0.0, 0.0), (1.0, 1.0)]),
    ]);
    let mut engine = ReplayEngine::new();
    let mut surface = RecordingSurface::new();
    engine.replay(&log, &mut surface);
    engine.replay(&log, &mut surface);

    assert_eq!(surface.visible().len(), 1);
    assert_eq!(engine.images().decode_count(), 1);
}

/// Records the image references handed to the surface.
#[derive(Default)]
struct ReferenceSurface {
    calls: Vec<String>,
}

impl Surface for ReferenceSurface {
    fn clear(&mut self) {
        self.calls.push("clear".into());
    }

    fn stroke_segment(&mut self, _from: Point, _to: Point, _color: &str, _width: f64) {
        self.calls.push("segment".into());
    }

    fn fill_rect(&mut self, _x: f64, _y: f64, _w: f64, _h: f64, _color: &str) {
        self.calls.push("rect".into());
    }

    fn draw_image(&mut self, reference: &str, _bitmap: &Bitmap, _x: f64, _y: f64) {
        self.calls.push(reference.to_owned());
    }
}

#[test]
fn image_is_layered_over_earlier_strokes_with_its_reference() {
    let url = png_data_url(2, 2);
    let log = log_of(vec![line("#000", &[(0.0, 0.0), (5.0, 5.0)]), Event::Image { image: url.clone() }]);
    let mut surface = ReferenceSurface::default();

    ReplayEngine::new().replay(&log, &mut surface);

    assert_eq!(surface.calls, vec!["clear".to_owned(), "segment".to_owned(), url]);
}
