use serde::{Deserialize, Serialize};

use crate::{geo_point::GeoPoint, interpolation::PathInterpolator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointKind {
    /// Reported by the device.
    Fix,
    /// Synthesized between two fixes.
    Interpolated,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PathPoint {
    pub point: GeoPoint,
    pub kind: PointKind,
}

/// The chronological trail of a hike. Timestamps never decrease.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HikePath {
    points: Vec<PathPoint>,
}

impl HikePath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[PathPoint] {
        &self.points
    }

    pub fn last(&self) -> Option<&GeoPoint> {
        self.points.last().map(|path_point| &path_point.point)
    }

    pub fn fix_count(&self) -> usize {
        self.points.iter().filter(|p| p.kind == PointKind::Fix).count()
    }

    /// Appends a new fix, preceded by the interpolated points between the
    /// current last point and the fix. Returns how many points were appended,
    /// or `None` if the fix is not later than the last point and was rejected.
    pub fn extend_to(&mut self, fix: GeoPoint, interpolator: &PathInterpolator) -> Option<usize> {
        let Some(last) = self.last().copied() else {
            self.points.push(PathPoint { point: fix, kind: PointKind::Fix });
            return Some(1);
        };

        if fix.timestamp_ms() <= last.timestamp_ms() {
            return None;
        }

        let before = self.points.len();
        self.points.extend(
            interpolator
                .interpolate(&last, &fix)
                .into_iter()
                .map(|point| PathPoint { point, kind: PointKind::Interpolated }),
        );
        self.points.push(PathPoint { point: fix, kind: PointKind::Fix });

        Some(self.points.len() - before)
    }

    /// The plain positions of the path, optionally without the synthetic ones.
    pub fn geo_points(&self, include_interpolated: bool) -> Vec<GeoPoint> {
        self.points
            .iter()
            .filter(|p| include_interpolated || p.kind == PointKind::Fix)
            .map(|p| p.point)
            .collect()
    }

    /// Walked distance in meters along the real fixes.
    pub fn distance_m(&self) -> f64 {
        let fixes = self.geo_points(false);
        fixes.windows(2).map(|pair| pair[0].distance_to(&pair[1])).sum()
    }
}
