//! Pen: assembles raw pointer samples into committed drawing events.
//!
//! A pen is either up or down. While down, each move paints a live segment
//! immediately and records the sample; lifting the pen commits the collected
//! points as one [`Event::Draw`] to the owning log. A press and release with no
//! movement in between commits nothing.
//!
//! Remote participants get a pen each in a [`PenRegistry`], driven by the
//! [`StrokeDelta`]s their client relays. Remote pens paint and commit into the
//! local mirror only; they never re-broadcast.

#[cfg(test)]
#[path = "pen_test.rs"]
mod pen_test;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::consts::{DEFAULT_PEN_COLOR, DEFAULT_PEN_WIDTH};
use crate::history::{Event, EventLog, Point};
use crate::surface::Surface;

/// What a press-drag-release produces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PenTool {
    #[default]
    Freehand,
    Rectangle,
}

/// A live, uncommitted pointer sample as relayed between participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrokeDelta {
    pub x: f64,
    pub y: f64,
    pub color: String,
    pub width: f64,
    pub is_down: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pen {
    x: f64,
    y: f64,
    width: f64,
    color: String,
    tool: PenTool,
    is_down: bool,
    points: Vec<Point>,
    origin: Point,
}

impl Default for Pen {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: DEFAULT_PEN_WIDTH,
            color: DEFAULT_PEN_COLOR.to_owned(),
            tool: PenTool::Freehand,
            is_down: false,
            points: Vec::new(),
            origin: Point::new(0.0, 0.0),
        }
    }
}

impl Pen {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // --- Settings ---

    /// Applies to in-progress live painting and the next committed event.
    pub fn set_color(&mut self, color: impl Into<String>) {
        self.color = color.into();
    }

    pub fn set_width(&mut self, width: f64) {
        self.width = width;
    }

    pub fn set_tool(&mut self, tool: PenTool) {
        self.tool = tool;
    }

    // --- State machine ---

    /// Press at `(x, y)`. Restarts the stroke if the pen is already down.
    pub fn put_down(&mut self, x: f64, y: f64) {
        self.x = x;
        self.y = y;
        self.origin = Point::new(x, y);
        self.points.clear();
        self.points.push(self.origin);
        self.is_down = true;
    }

    /// Move to `(x, y)`. While up this only tracks the cursor. While down a
    /// freehand pen records the sample and paints the segment from the
    /// previous position; a rectangle pen paints nothing until release.
    pub fn move_to(&mut self, x: f64, y: f64, surface: &mut dyn Surface) {
        let from = self.position();
        self.x = x;
        self.y = y;
        if !self.is_down || self.tool == PenTool::Rectangle {
            return;
        }
        let to = self.position();
        self.points.push(to);
        surface.stroke_segment(from, to, &self.color, self.width);
    }

    /// Release the pen and commit what was drawn into `log`.
    ///
    /// Returns `true` if an event was committed. No-op while already up.
    pub fn pick_up(&mut self, log: &mut EventLog, surface: &mut dyn Surface) -> bool {
        if !self.is_down {
            return false;
        }
        self.is_down = false;
        let points = std::mem::take(&mut self.points);

        let event = match self.tool {
            PenTool::Freehand => {
                // The press point alone is not a stroke.
                if points.len() < 2 {
                    return false;
                }
                Event::Draw { color: self.color.clone(), width: self.width, points }
            }
            PenTool::Rectangle => {
                let end_x = self.x - self.origin.x;
                let end_y = self.y - self.origin.y;
                if end_x == 0.0 || end_y == 0.0 {
                    return false;
                }
                surface.fill_rect(self.origin.x, self.origin.y, end_x, end_y, &self.color);
                Event::Rectangle {
                    color: self.color.clone(),
                    start_x: self.origin.x,
                    start_y: self.origin.y,
                    end_x,
                    end_y,
                }
            }
        };
        log.add(Some(event));
        true
    }

    /// Drive this pen from a relayed remote sample.
    ///
    /// Returns `true` if the sample lifted the pen and committed a stroke.
    pub fn apply_delta(&mut self, delta: &StrokeDelta, log: &mut EventLog, surface: &mut dyn Surface) -> bool {
        self.set_width(delta.width);
        self.set_color(delta.color.as_str());

        if delta.is_down {
            if self.is_down {
                self.move_to(delta.x, delta.y, surface);
            } else {
                self.put_down(delta.x, delta.y);
            }
            return false;
        }

        let committed = self.pick_up(log, surface);
        self.x = delta.x;
        self.y = delta.y;
        committed
    }

    /// The sample to relay for the pen's current state.
    #[must_use]
    pub fn delta(&self) -> StrokeDelta {
        StrokeDelta {
            x: self.x,
            y: self.y,
            color: self.color.clone(),
            width: self.width,
            is_down: self.is_down,
            participant_id: None,
        }
    }

    // --- Queries ---

    #[must_use]
    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }

    #[must_use]
    pub fn is_down(&self) -> bool {
        self.is_down
    }

    #[must_use]
    pub fn color(&self) -> &str {
        &self.color
    }

    #[must_use]
    pub fn width(&self) -> f64 {
        self.width
    }

    #[must_use]
    pub fn tool(&self) -> PenTool {
        self.tool
    }

    /// Samples recorded for the stroke in progress.
    #[must_use]
    pub fn points(&self) -> &[Point] {
        &self.points
    }
}

/// Remote pens keyed by participant id. Created on first sight and kept for
/// the rest of the session.
#[derive(Debug, Default)]
pub struct PenRegistry {
    pens: HashMap<String, Pen>,
}

impl PenRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&mut self, participant: &str) -> &mut Pen {
        self.pens.entry(participant.to_owned()).or_default()
    }

    #[must_use]
    pub fn get(&self, participant: &str) -> Option<&Pen> {
        self.pens.get(participant)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pens.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pens.is_empty()
    }
}
