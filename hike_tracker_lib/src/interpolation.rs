use crate::geo_point::GeoPoint;

pub const DEFAULT_INTERPOLATION_POINTS: usize = 4;

/// Fills the gap between two sparse fixes with evenly spaced synthetic points,
/// so a rendered polyline doesn't jump between isolated positions.
///
/// This is linear in latitude, longitude and time. It is a smoothing aid, not a
/// reconstruction of the walked trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathInterpolator {
    points: usize,
}

impl Default for PathInterpolator {
    fn default() -> Self {
        Self::new(DEFAULT_INTERPOLATION_POINTS)
    }
}

impl PathInterpolator {
    pub fn new(points: usize) -> Self {
        Self { points }
    }

    pub fn points(&self) -> usize {
        self.points
    }

    /// Returns the synthetic points strictly between `from` and `to`, ordered from `from`.
    /// Expects `from` to be earlier than `to`.
    pub fn interpolate(&self, from: &GeoPoint, to: &GeoPoint) -> Vec<GeoPoint> {
        interpolate(from, to, self.points)
    }
}

/// Point i of n sits at fraction i/(n+1) of the segment. Timestamps are whole
/// milliseconds, rounded down.
pub fn interpolate(from: &GeoPoint, to: &GeoPoint, count: usize) -> Vec<GeoPoint> {
    let divisor = count as f64 + 1.;
    let time_span = (to.timestamp_ms() - from.timestamp_ms()) as i128;

    (1..=count)
        .map(|i| {
            let step = i as f64;
            let latitude = from.latitude() + (to.latitude() - from.latitude()) * step / divisor;
            let longitude = from.longitude() + (to.longitude() - from.longitude()) * step / divisor;
            let offset = time_span * i as i128 / (count as i128 + 1);

            GeoPoint::new(latitude, longitude, from.timestamp_ms() + offset as i64)
        })
        .collect()
}
