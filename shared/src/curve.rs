//! Received-value curves.
//!
//! Each replicated primitive member keeps its own scalar curve of received
//! `(timestamp, value)` control points, so members can be gated and filled
//! in independently. The curve is baked into an evaluation table at 50 ms
//! steps; sampling interpolates the table and extrapolates past its end
//! with the final segment's slope.

use serde::{Deserialize, Serialize};

/// Interpolation basis used between control points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CurveType {
    #[default]
    Linear,
    CatmullRom,
}

/// Bake-table step, in seconds.
const BAKE_STEP: f32 = 0.05;

/// A scalar curve over received samples for one primitive member.
#[derive(Debug, Clone)]
pub struct SampleCurve {
    curve_type: CurveType,
    control_points: Vec<(f32, f32)>,
    baked: Vec<(f32, f32)>,
}

impl SampleCurve {
    pub fn new(curve_type: CurveType) -> Self {
        Self {
            curve_type,
            control_points: Vec::new(),
            baked: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.baked.is_empty()
    }

    pub fn control_point_count(&self) -> usize {
        self.control_points.len()
    }

    pub fn control_times(&self) -> impl Iterator<Item = f32> + '_ {
        self.control_points.iter().map(|(time, _)| *time)
    }

    /// Inserts a control point, keeping the set sorted by time. Inserting
    /// at an existing timestamp replaces nothing.
    pub fn insert(&mut self, time: f32, value: f32) {
        let mut index = self.control_points.len();
        loop {
            if index == 0 {
                self.control_points.insert(0, (time, value));
                return;
            }
            index -= 1;
            let (existing_time, _) = self.control_points[index];
            if existing_time == time {
                return;
            }
            if existing_time < time {
                self.control_points.insert(index + 1, (time, value));
                return;
            }
        }
    }

    /// Drops leading control points older than `min_time`, always keeping
    /// the last point before the window so sampling near the window edge
    /// still has a left neighbor.
    pub fn collect_garbage(&mut self, min_time: f32) {
        while self.control_points.len() > 2
            && self.control_points[0].0 < min_time
            && self.control_points[1].0 < min_time
        {
            self.control_points.remove(0);
        }
    }

    /// Rebuilds the evaluation table from the control points.
    pub fn bake(&mut self) {
        self.baked.clear();
        match self.control_points.len() {
            0 => {}
            1 => self.baked.push(self.control_points[0]),
            _ => {
                let last = self.control_points[self.control_points.len() - 1].0;
                // The live window is about a second; a two-point set can
                // still span an arbitrary gap, so bound the table.
                let first = self.control_points[0].0.max(last - 5.0);
                let mut time = first;
                while time < last {
                    self.baked.push((time, self.evaluate(time)));
                    time += BAKE_STEP;
                }
                self.baked
                    .push((last, self.control_points[self.control_points.len() - 1].1));
            }
        }
    }

    /// Samples the baked table. Before the table clamps to the first value;
    /// past the table extrapolates along the final segment.
    pub fn sample(&self, time: f32) -> Option<f32> {
        let first = self.baked.first()?;
        let last = self.baked[self.baked.len() - 1];
        if time <= first.0 {
            return Some(first.1);
        }
        if time >= last.0 {
            if self.baked.len() < 2 {
                return Some(last.1);
            }
            let previous = self.baked[self.baked.len() - 2];
            let slope = (last.1 - previous.1) / (last.0 - previous.0);
            return Some(last.1 + (time - last.0) * slope);
        }
        let upper = self.baked.partition_point(|(t, _)| *t <= time);
        let (t0, y0) = self.baked[upper - 1];
        let (t1, y1) = self.baked[upper];
        let u = (time - t0) / (t1 - t0);
        Some(y0 + (y1 - y0) * u)
    }

    /// Evaluates the configured basis directly against the control points.
    fn evaluate(&self, time: f32) -> f32 {
        let points = &self.control_points;
        let upper = points.partition_point(|(t, _)| *t <= time);
        if upper == 0 {
            return points[0].1;
        }
        if upper >= points.len() {
            return points[points.len() - 1].1;
        }
        let i1 = upper - 1;
        let i2 = upper;
        let (t1, y1) = points[i1];
        let (t2, y2) = points[i2];
        let u = (time - t1) / (t2 - t1);
        match self.curve_type {
            CurveType::Linear => y1 + (y2 - y1) * u,
            CurveType::CatmullRom => {
                let y0 = points[i1.saturating_sub(1)].1;
                let y3 = points[(i2 + 1).min(points.len() - 1)].1;
                catmull_rom(y0, y1, y2, y3, u)
            }
        }
    }
}

fn catmull_rom(y0: f32, y1: f32, y2: f32, y3: f32, u: f32) -> f32 {
    0.5 * ((2.0 * y1)
        + (-y0 + y2) * u
        + (2.0 * y0 - 5.0 * y1 + 4.0 * y2 - y3) * u * u
        + (-y0 + 3.0 * y1 - 3.0 * y2 + y3) * u * u * u)
}
