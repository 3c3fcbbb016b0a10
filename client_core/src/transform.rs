//! Affine mapping between simulation space and a padded display viewport.
//!
//! The mapping is axis-independent and exactly invertible wherever the
//! bounds have extent, so positions can round-trip between picking (display
//! to sim) and rendering (sim to display) without drift.

/// A point in simulation coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimPoint {
    pub x: f64,
    pub y: f64,
}

impl SimPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A point in display coordinates (viewport pixels).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DisplayPoint {
    pub x: f64,
    pub y: f64,
}

impl DisplayPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Target surface for the transform: an outer size plus an inner padding
/// that simulation extremes map onto.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
    pub padding: f64,
}

impl Viewport {
    pub fn new(width: f64, height: f64, padding: f64) -> Self {
        Self {
            width,
            height,
            padding,
        }
    }

    /// Map a simulation point into this viewport.
    pub fn to_display(&self, point: SimPoint, bounds: &SimBounds) -> DisplayPoint {
        DisplayPoint {
            x: project(point.x, bounds.min_x, bounds.max_x, self.width, self.padding),
            y: project(point.y, bounds.min_y, bounds.max_y, self.height, self.padding),
        }
    }

    /// Exact algebraic inverse of [`Viewport::to_display`].
    pub fn to_sim(&self, point: DisplayPoint, bounds: &SimBounds) -> SimPoint {
        SimPoint {
            x: unproject(point.x, bounds.min_x, bounds.max_x, self.width, self.padding),
            y: unproject(point.y, bounds.min_y, bounds.max_y, self.height, self.padding),
        }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 400.0,
            height: 300.0,
            padding: 20.0,
        }
    }
}

/// Axis-aligned extent of the playable area, taken from the min/max of a
/// point set on each axis.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimBounds {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl SimBounds {
    /// Bounds used when fewer than two points exist. The viewport must
    /// always render something, so an empty or single-node world maps into
    /// a fixed origin-centered square.
    pub const FALLBACK: SimBounds = SimBounds {
        min_x: -50.0,
        max_x: 50.0,
        min_y: -50.0,
        max_y: 50.0,
    };

    pub fn from_points(points: &[SimPoint]) -> SimBounds {
        if points.len() < 2 {
            return Self::FALLBACK;
        }
        let mut bounds = SimBounds {
            min_x: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            min_y: f64::INFINITY,
            max_y: f64::NEG_INFINITY,
        };
        for point in points {
            bounds.min_x = bounds.min_x.min(point.x);
            bounds.max_x = bounds.max_x.max(point.x);
            bounds.min_y = bounds.min_y.min(point.y);
            bounds.max_y = bounds.max_y.max(point.y);
        }
        bounds
    }
}

fn project(value: f64, min: f64, max: f64, size: f64, padding: f64) -> f64 {
    if max == min {
        // Zero-width axis: every simulation value sits at the padding edge.
        return padding;
    }
    padding + (value - min) / (max - min) * (size - 2.0 * padding)
}

fn unproject(value: f64, min: f64, max: f64, size: f64, padding: f64) -> f64 {
    if max == min {
        return min;
    }
    min + (value - padding) / (size - 2.0 * padding) * (max - min)
}
