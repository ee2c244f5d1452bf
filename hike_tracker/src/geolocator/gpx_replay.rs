use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::DateTime;
use hike_tracker_lib::geo_point::GeoPoint;

use super::{FixSink, Geolocator, Permission, Subscription, WatchOptions};
use crate::TrackerError;

/// Slowest replay allowed, so the wait between two fixes stays representable.
pub const MIN_REPLAY_SPEED: f64 = 0.01;

/// Plays back a recorded GPX track as if it were a live device, honouring the
/// sampling policy of the subscription. `speed` compresses time, so a speed of
/// 60 replays an hour long hike in a minute.
pub struct GpxReplayGeolocator {
    track: Vec<GeoPoint>,
    speed: f64,
}

impl GpxReplayGeolocator {
    pub fn from_points(track: Vec<GeoPoint>) -> Self {
        Self { track, speed: 1. }
    }

    pub fn from_file(path: &Path) -> Result<Self, TrackerError> {
        let file = std::fs::File::open(path)
            .map_err(|err| TrackerError::Location(format!("Failed to open {}: {err}", path.display())))?;
        let reader = std::io::BufReader::new(file);
        let gpx = gpx::read(reader)
            .map_err(|err| TrackerError::Location(format!("Failed to parse {}: {err}", path.display())))?;

        let mut track = Vec::new();
        for gpx_track in gpx.tracks {
            for segment in gpx_track.segments {
                for waypoint in segment.points {
                    let Some(time) = waypoint.time else {
                        tracing::warn!("Skipping GPX point without time in {}", path.display());
                        continue;
                    };
                    let Some(timestamp) = time.format().ok().and_then(|t| DateTime::parse_from_rfc3339(&t).ok()) else {
                        tracing::warn!("Skipping GPX point with unreadable time in {}", path.display());
                        continue;
                    };
                    track.push(GeoPoint::from_position(waypoint.point(), timestamp.to_utc()));
                }
            }
        }

        tracing::info!("Loaded {} points from {}", track.len(), path.display());
        Ok(Self::from_points(track))
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = if speed.is_finite() && speed > 0. {
            speed.max(MIN_REPLAY_SPEED)
        } else {
            1.
        };
        self
    }

    pub fn len(&self) -> usize {
        self.track.len()
    }

    pub fn is_empty(&self) -> bool {
        self.track.is_empty()
    }
}

/// Picks the points a device would have reported under `options`.
fn sample(track: &[GeoPoint], options: &WatchOptions) -> Vec<GeoPoint> {
    let mut sampled: Vec<GeoPoint> = Vec::new();
    for point in track {
        let due = match sampled.last() {
            None => true,
            Some(last) => {
                let waited = point.timestamp_ms() - last.timestamp_ms();
                waited >= options.min_interval_ms as i64 && last.distance_to(point) >= options.min_distance_m
            }
        };
        if due {
            sampled.push(*point);
        }
    }
    sampled
}

#[async_trait]
impl Geolocator for GpxReplayGeolocator {
    async fn request_permission(&self) -> Permission {
        Permission::Granted
    }

    async fn current_position(&self) -> Result<GeoPoint, TrackerError> {
        self.track
            .first()
            .copied()
            .ok_or_else(|| TrackerError::Location("GPX track has no points".into()))
    }

    async fn subscribe(&self, options: WatchOptions, sink: FixSink) -> Result<Subscription, TrackerError> {
        let fixes = sample(&self.track, &options);
        let speed = self.speed;
        let cancelled = Arc::new(AtomicBool::new(false));

        tracing::debug!("Replaying {} of {} GPX points at {}x", fixes.len(), self.track.len(), speed);

        let task_cancelled = cancelled.clone();
        let handle = tokio::spawn(async move {
            let mut previous: Option<GeoPoint> = None;
            for fix in fixes {
                if let Some(previous) = previous {
                    let gap_ms = (fix.timestamp_ms() - previous.timestamp_ms()).max(0) as f64 / speed;
                    let Ok(gap) = Duration::try_from_secs_f64(gap_ms / 1000.) else {
                        tracing::warn!("Stopping replay, gap of {} ms cannot be waited for", gap_ms);
                        return;
                    };
                    tokio::time::sleep(gap).await;
                }
                if task_cancelled.load(Ordering::Acquire) || sink.send(fix).is_err() {
                    return;
                }
                previous = Some(fix);
            }
            // Dropping the sink closes the stream
        });

        Ok(Subscription::new(move || {
            cancelled.store(true, Ordering::Release);
            handle.abort();
        }))
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

    fn walk() -> Vec<GeoPoint> {
        // A point every 10 seconds, roughly 11 meters apart
        (0..7)
            .map(|i| GeoPoint::new(37.5 + i as f64 * 0.0001, 127.0, i * 10_000))
            .collect()
    }

    #[test]
    fn sampling_respects_interval_and_distance() {
        let options = WatchOptions { min_interval_ms: 20_000, min_distance_m: 5. };
        let sampled = sample(&walk(), &options);
        let times: Vec<i64> = sampled.iter().map(|p| p.timestamp_ms()).collect();
        assert_eq!(times, vec![0, 20_000, 40_000, 60_000]);

        let far = WatchOptions { min_interval_ms: 0, min_distance_m: 30. };
        let sampled = sample(&walk(), &far);
        let times: Vec<i64> = sampled.iter().map(|p| p.timestamp_ms()).collect();
        assert_eq!(times, vec![0, 30_000, 60_000]);
    }

    #[tokio::test(start_paused = true)]
    async fn replays_then_closes_stream() {
        let geolocator = GpxReplayGeolocator::from_points(walk()).with_speed(10.);
        let options = WatchOptions { min_interval_ms: 20_000, min_distance_m: 5. };
        let (sink, mut fixes) = mpsc::unbounded_channel();

        let _subscription = geolocator.subscribe(options, sink).await.unwrap();

        let mut received = Vec::new();
        while let Some(fix) = fixes.recv().await {
            received.push(fix.timestamp_ms());
        }
        assert_eq!(received, vec![0, 20_000, 40_000, 60_000]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_delivery() {
        let geolocator = GpxReplayGeolocator::from_points(walk());
        let options = WatchOptions { min_interval_ms: 0, min_distance_m: 0. };
        let (sink, mut fixes) = mpsc::unbounded_channel();

        let subscription = geolocator.subscribe(options, sink).await.unwrap();
        assert_eq!(fixes.recv().await.map(|f| f.timestamp_ms()), Some(0));

        subscription.cancel();
        assert_eq!(fixes.recv().await, None);
    }

    #[test]
    fn speed_is_clamped() {
        assert_eq!(GpxReplayGeolocator::from_points(walk()).with_speed(1e-300).speed, MIN_REPLAY_SPEED);
        assert_eq!(GpxReplayGeolocator::from_points(walk()).with_speed(-2.).speed, 1.);
        assert_eq!(GpxReplayGeolocator::from_points(walk()).with_speed(f64::NAN).speed, 1.);
        assert_eq!(GpxReplayGeolocator::from_points(walk()).with_speed(60.).speed, 60.);
    }

    #[tokio::test(start_paused = true)]
    async fn slowest_replay_still_delivers() {
        let track = vec![GeoPoint::new(37.5, 127.0, 0), GeoPoint::new(37.6, 127.0, i64::MAX / 2)];
        let geolocator = GpxReplayGeolocator::from_points(track).with_speed(1e-300);
        let options = WatchOptions { min_interval_ms: 0, min_distance_m: 0. };
        let (sink, mut fixes) = mpsc::unbounded_channel();

        let subscription = geolocator.subscribe(options, sink).await.unwrap();
        assert_eq!(fixes.recv().await.map(|f| f.timestamp_ms()), Some(0));

        subscription.cancel();
        assert_eq!(fixes.recv().await, None);
    }

    #[tokio::test]
    async fn empty_track_has_no_position() {
        let geolocator = GpxReplayGeolocator::from_points(Vec::new());
        assert!(matches!(geolocator.current_position().await, Err(TrackerError::Location(_))));
    }

    #[test]
    fn reads_gpx_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hike.gpx");
        std::fs::write(&path, r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="test" xmlns="http://www.topografix.com/GPX/1/1">
  <trk><trkseg>
    <trkpt lat="37.5" lon="127.0"><time>2024-05-01T08:00:00Z</time></trkpt>
    <trkpt lat="37.501" lon="127.001"><time>2024-05-01T08:00:30Z</time></trkpt>
    <trkpt lat="37.502" lon="127.002"></trkpt>
  </trkseg></trk>
</gpx>"#).unwrap();

        let geolocator = GpxReplayGeolocator::from_file(&path).unwrap();
        assert_eq!(geolocator.len(), 2);
        assert_eq!(geolocator.track[0].latitude(), 37.5);
        assert_eq!(geolocator.track[1].timestamp_ms() - geolocator.track[0].timestamp_ms(), 30_000);
    }
}
