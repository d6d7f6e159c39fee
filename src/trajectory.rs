//! Drag capture, smoothing and fixed-length resampling of motion paths.

use crate::geometry::Point;
use serde::{Deserialize, Serialize};

/// A committed motion path; `points.len()` is the target frame count
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trajectory {
    pub points: Vec<Point>,
    pub is_visible: bool,
}

impl Trajectory {
    pub fn frame_count(&self) -> usize {
        self.points.len()
    }

    pub fn start(&self) -> Option<Point> {
        self.points.first().copied()
    }

    pub fn end(&self) -> Option<Point> {
        self.points.last().copied()
    }
}

/// Pointer-driven recorder of an object's center while it is dragged
#[derive(Debug, Default)]
pub struct TrajectoryRecorder {
    points: Vec<Point>,
    active: bool,
}

impl TrajectoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_recording(&self) -> bool {
        self.active
    }

    /// Raw points captured so far
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Start a fresh recording at the object's current center
    pub fn pointer_down(&mut self, center: Point) {
        self.points.clear();
        self.points.push(center);
        self.active = true;
    }

    pub fn pointer_move(&mut self, center: Point) {
        if self.active {
            self.points.push(center);
        }
    }

    pub fn pointer_up(&mut self, center: Point) {
        if self.active {
            self.points.push(center);
            self.active = false;
        }
    }

    /// Smooth and resample the recording into a trajectory of `frames` points
    ///
    /// Returns `None` when nothing was recorded. The recorder is emptied
    /// either way.
    pub fn commit(&mut self, frames: usize, smoothing_factor: f32) -> Option<Trajectory> {
        self.active = false;
        let raw = std::mem::take(&mut self.points);
        if raw.is_empty() {
            return None;
        }

        let smoothed = smooth(&raw, smoothing_factor);
        let points = resample(&smoothed, frames);
        tracing::debug!(
            "Trajectory committed: {} raw points -> {} frames",
            raw.len(),
            points.len()
        );

        Some(Trajectory {
            points,
            is_visible: true,
        })
    }
}

/// Blend every interior point toward the midpoint of its neighbors
///
/// `factor` 0 leaves the path unchanged, 1 replaces each interior point with
/// the midpoint. Endpoints are never moved.
pub fn smooth(points: &[Point], factor: f32) -> Vec<Point> {
    if points.len() < 3 {
        return points.to_vec();
    }

    let mut out = Vec::with_capacity(points.len());
    out.push(points[0]);
    for window in points.windows(3) {
        let (prev, curr, next) = (window[0], window[1], window[2]);
        out.push(curr.lerp(prev.midpoint(next), factor));
    }
    out.push(points[points.len() - 1]);
    out
}

/// Resample to exactly `count` points spaced evenly along the path
///
/// The first and last output points are the exact input endpoints. A single
/// point, or a path of zero length, is replicated.
pub fn resample(points: &[Point], count: usize) -> Vec<Point> {
    let Some(&first) = points.first() else {
        return Vec::new();
    };
    if count == 0 {
        return Vec::new();
    }

    let mut cumulative = Vec::with_capacity(points.len());
    let mut total = 0.0f32;
    cumulative.push(0.0);
    for pair in points.windows(2) {
        total += pair[0].distance(pair[1]);
        cumulative.push(total);
    }

    if points.len() == 1 || total == 0.0 || count == 1 {
        return vec![first; count];
    }

    let last = points[points.len() - 1];
    let mut out = Vec::with_capacity(count);
    let mut segment = 0;
    for i in 0..count {
        if i == count - 1 {
            out.push(last);
            break;
        }
        let target = total * i as f32 / (count - 1) as f32;
        while segment + 1 < points.len() - 1 && cumulative[segment + 1] < target {
            segment += 1;
        }

        let length = cumulative[segment + 1] - cumulative[segment];
        let t = if length > 0.0 {
            ((target - cumulative[segment]) / length).clamp(0.0, 1.0)
        } else {
            0.0
        };
        out.push(points[segment].lerp(points[segment + 1], t));
    }
    out
}
