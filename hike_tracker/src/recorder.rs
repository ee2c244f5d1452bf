use std::sync::Arc;

use hike_tracker_lib::{geo_point::GeoPoint, interpolation::PathInterpolator, path::HikePath};
use tokio::sync::mpsc;

use crate::{
    geolocator::{Geolocator, Permission, Subscription, WatchOptions},
    TrackerError,
};

enum RecorderState {
    Idle,
    Tracking {
        subscription: Subscription,
        fixes: mpsc::UnboundedReceiver<GeoPoint>,
        stream_open: bool,
        path: HikePath,
    },
}

/// Turns the geolocator's position stream into a hiking path.
///
/// The recorder is either idle or tracking. While tracking it owns the
/// subscription and the path being built; stopping cancels the subscription
/// before handing the path out, so nothing delivered afterwards can reach it.
pub struct TrackRecorder {
    geolocator: Arc<dyn Geolocator>,
    options: WatchOptions,
    interpolator: PathInterpolator,
    state: RecorderState,
}

impl TrackRecorder {
    pub fn new(geolocator: Arc<dyn Geolocator>, options: WatchOptions, interpolator: PathInterpolator) -> Self {
        Self {
            geolocator,
            options,
            interpolator,
            state: RecorderState::Idle,
        }
    }

    pub fn is_tracking(&self) -> bool {
        matches!(self.state, RecorderState::Tracking { .. })
    }

    /// The path recorded so far, if tracking.
    pub fn path(&self) -> Option<&HikePath> {
        match &self.state {
            RecorderState::Tracking { path, .. } => Some(path),
            RecorderState::Idle => None,
        }
    }

    pub async fn start(&mut self) -> Result<(), TrackerError> {
        if self.is_tracking() {
            return Err(TrackerError::AlreadyTracking);
        }

        if self.geolocator.request_permission().await == Permission::Denied {
            tracing::warn!("Location permission denied, not tracking");
            return Err(TrackerError::PermissionDenied);
        }

        let (sink, fixes) = mpsc::unbounded_channel();
        let subscription = self.geolocator.subscribe(self.options, sink).await?;

        tracing::info!(
            "Tracking started (every {} ms / {} m)",
            self.options.min_interval_ms,
            self.options.min_distance_m
        );

        self.state = RecorderState::Tracking {
            subscription,
            fixes,
            stream_open: true,
            path: HikePath::new(),
        };

        Ok(())
    }

    /// Waits for the next fix. Returns `None` once, when the geolocator closes
    /// the stream. Never completes while idle.
    pub async fn next_fix(&mut self) -> Option<GeoPoint> {
        let RecorderState::Tracking { fixes, stream_open, .. } = &mut self.state else {
            return std::future::pending().await;
        };

        if !*stream_open {
            return std::future::pending().await;
        }

        let fix = fixes.recv().await;
        if fix.is_none() {
            *stream_open = false;
        }
        fix
    }

    /// Applies a fix to the path. Returns how many points were appended,
    /// which is zero for a fix arriving while idle or out of order.
    pub fn record(&mut self, fix: GeoPoint) -> usize {
        let RecorderState::Tracking { path, .. } = &mut self.state else {
            tracing::debug!("Dropping fix received while idle");
            return 0;
        };

        match path.extend_to(fix, &self.interpolator) {
            Some(appended) => appended,
            None => {
                tracing::warn!(
                    "Dropping out of order fix at {} (last point at {:?})",
                    fix.timestamp_ms(),
                    path.last().map(|p| p.timestamp_ms())
                );
                0
            }
        }
    }

    /// Cancels the subscription, then hands out the finished path.
    pub fn stop(&mut self) -> HikePath {
        match std::mem::replace(&mut self.state, RecorderState::Idle) {
            RecorderState::Tracking { subscription, fixes, path, .. } => {
                subscription.cancel();
                drop(fixes);
                tracing::info!("Tracking stopped with {} points", path.len());
                path
            }
            RecorderState::Idle => HikePath::new(),
        }
    }
}
