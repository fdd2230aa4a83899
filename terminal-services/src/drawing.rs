//! Chart drawing overlay
//!
//! Drawing tools operate on a value-type [`DrawingState`] driven by pointer
//! events in screen-pixel space. [`render`] turns a state into a flat list
//! of primitives for whatever surface draws the overlay.

use serde::{Deserialize, Serialize};

/// Horizontal/vertical lines and rays extend this far (px)
pub const EXTENT_PX: f64 = 5000.0;

/// Fibonacci retracement levels
pub const FIB_LEVELS: [f64; 7] = [0.0, 0.236, 0.382, 0.5, 0.618, 0.786, 1.0];

const LINE_COLOR: &str = "#60a5fa";
const TRENDLINE_COLOR: &str = "#3b82f6";
const GUIDE_COLOR: &str = "#f97316";
const RECT_STROKE: &str = "#f59e0b";
const RECT_FILL: &str = "rgba(245,158,11,0.12)";
const RANGE_STROKE: &str = "#10b981";
const RANGE_FILL: &str = "rgba(16,185,129,0.1)";
const BRUSH_COLOR: &str = "#a78bfa";
const FIB_COLOR: &str = "#f59e0b";
const TEXT_COLOR: &str = "white";
const TEXT_SIZE: u32 = 12;

/// Drawing tools
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    #[default]
    Cursor,
    Segment,
    Ray,
    Trendline,
    Hline,
    Vline,
    Rect,
    Fib,
    Brush,
    Text,
    Pricerange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y, label: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Drawing {
    pub id: u64,
    pub tool: Tool,
    pub points: Vec<Point>,
}

/// Overlay state for one chart view
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DrawingState {
    pub tool: Tool,
    pub drawings: Vec<Drawing>,
    pub active: Option<Drawing>,
    pub next_id: u64,
}

impl DrawingState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch tools, abandoning any drawing in progress
    pub fn set_tool(&mut self, tool: Tool) {
        self.tool = tool;
        self.active = None;
    }

    pub fn pointer_down(&mut self, x: f64, y: f64) {
        if self.tool == Tool::Cursor {
            return;
        }

        let mut points = vec![Point::new(x, y)];
        if self.tool == Tool::Brush {
            points.push(Point::new(x, y));
        }

        self.active = Some(Drawing {
            id: self.next_id,
            tool: self.tool,
            points,
        });
        self.next_id += 1;
    }

    pub fn pointer_move(&mut self, x: f64, y: f64) {
        let Some(active) = self.active.as_mut() else {
            return;
        };

        if active.tool == Tool::Brush {
            active.points.push(Point::new(x, y));
        } else if active.points.len() == 1 {
            active.points.push(Point::new(x, y));
        } else {
            active.points[1] = Point::new(x, y);
        }
    }

    /// Commit the drawing in progress
    pub fn pointer_up(&mut self, x: f64, y: f64) {
        let Some(mut active) = self.active.take() else {
            return;
        };

        if active.points.len() == 1 {
            active.points.push(Point::new(x, y));
        }
        self.drawings.push(active);
    }

    /// Attach a text label to a committed drawing's anchor point
    pub fn set_label(&mut self, id: u64, label: impl Into<String>) -> bool {
        match self
            .drawings
            .iter_mut()
            .find(|d| d.id == id)
            .and_then(|d| d.points.first_mut())
        {
            Some(anchor) => {
                anchor.label = Some(label.into());
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: u64) -> Option<Drawing> {
        let index = self.drawings.iter().position(|d| d.id == id)?;
        Some(self.drawings.remove(index))
    }

    pub fn clear(&mut self) {
        self.drawings.clear();
        self.active = None;
    }
}

/// Render primitive
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Shape {
    Line {
        x1: f64,
        y1: f64,
        x2: f64,
        y2: f64,
        stroke: &'static str,
        width: u32,
        dashed: bool,
    },
    Rect {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        stroke: &'static str,
        fill: &'static str,
    },
    Path {
        points: Vec<(f64, f64)>,
        stroke: &'static str,
        width: u32,
    },
    Text {
        x: f64,
        y: f64,
        text: String,
        fill: &'static str,
        size: u32,
    },
}

fn line(x1: f64, y1: f64, x2: f64, y2: f64, stroke: &'static str, dashed: bool) -> Shape {
    Shape::Line {
        x1,
        y1,
        x2,
        y2,
        stroke,
        width: 2,
        dashed,
    }
}

fn rect(x1: f64, y1: f64, x2: f64, y2: f64, stroke: &'static str, fill: &'static str) -> Shape {
    Shape::Rect {
        x: x1.min(x2),
        y: y1.min(y2),
        width: (x2 - x1).abs(),
        height: (y2 - y1).abs(),
        stroke,
        fill,
    }
}

/// Committed drawings first, then the one in progress
pub fn render(state: &DrawingState) -> Vec<Shape> {
    let mut shapes = Vec::new();
    for drawing in state.drawings.iter().chain(state.active.as_ref()) {
        render_drawing(drawing, &mut shapes);
    }
    shapes
}

fn render_drawing(drawing: &Drawing, shapes: &mut Vec<Shape>) {
    let p1 = drawing.points.first();
    let p2 = drawing.points.get(1);

    match (drawing.tool, p1, p2) {
        (Tool::Segment, Some(a), Some(b)) => {
            shapes.push(line(a.x, a.y, b.x, b.y, LINE_COLOR, false))
        }
        (Tool::Ray, Some(a), Some(b)) => {
            let (dx, dy) = (b.x - a.x, b.y - a.y);
            let len = match dx.hypot(dy) {
                l if l == 0.0 => 1.0,
                l => l,
            };
            shapes.push(line(
                a.x,
                a.y,
                a.x + dx / len * EXTENT_PX,
                a.y + dy / len * EXTENT_PX,
                LINE_COLOR,
                false,
            ));
        }
        (Tool::Trendline, Some(a), Some(b)) => {
            shapes.push(line(a.x, a.y, b.x, b.y, TRENDLINE_COLOR, false))
        }
        (Tool::Hline, Some(a), _) => shapes.push(line(0.0, a.y, EXTENT_PX, a.y, GUIDE_COLOR, true)),
        (Tool::Vline, Some(a), _) => shapes.push(line(a.x, 0.0, a.x, EXTENT_PX, GUIDE_COLOR, true)),
        (Tool::Rect, Some(a), Some(b)) => {
            shapes.push(rect(a.x, a.y, b.x, b.y, RECT_STROKE, RECT_FILL))
        }
        (Tool::Brush, _, _) => shapes.push(Shape::Path {
            points: drawing.points.iter().map(|p| (p.x, p.y)).collect(),
            stroke: BRUSH_COLOR,
            width: 2,
        }),
        (Tool::Text, Some(a), _) => {
            if let Some(text) = &a.label {
                shapes.push(Shape::Text {
                    x: a.x,
                    y: a.y,
                    text: text.clone(),
                    fill: TEXT_COLOR,
                    size: TEXT_SIZE,
                });
            }
        }
        (Tool::Pricerange, Some(a), Some(b)) => shapes.push(rect(
            a.x,
            a.y.min(b.y),
            b.x,
            a.y.max(b.y),
            RANGE_STROKE,
            RANGE_FILL,
        )),
        (Tool::Fib, Some(a), Some(b)) => {
            for level in FIB_LEVELS {
                let y = a.y + (b.y - a.y) * level;
                shapes.push(line(a.x, y, b.x, y, FIB_COLOR, false));
            }
        }
        _ => {}
    }
}
