use std::fmt::{self, Debug};

use async_trait::async_trait;
use hike_tracker_lib::geo_point::GeoPoint;
use tokio::sync::mpsc;

use crate::TrackerError;

mod gpx_replay;

pub use gpx_replay::GpxReplayGeolocator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
}

/// Sampling policy for a position subscription. A new fix is only reported
/// once both thresholds have been passed since the previous one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatchOptions {
    pub min_interval_ms: u64,
    pub min_distance_m: f64,
}

/// Where a subscription delivers its fixes.
pub type FixSink = mpsc::UnboundedSender<GeoPoint>;

/// Handle to an active position subscription. Cancelling (or dropping) it
/// tells the geolocator to stop delivering fixes.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Subscription {{ active: {} }}", self.cancel.is_some())
    }
}

/// The device location provider.
#[async_trait]
pub trait Geolocator: Send + Sync {
    async fn request_permission(&self) -> Permission;

    async fn current_position(&self) -> Result<GeoPoint, TrackerError>;

    /// Starts delivering fixes into `sink` until the returned subscription is cancelled.
    async fn subscribe(&self, options: WatchOptions, sink: FixSink) -> Result<Subscription, TrackerError>;
}
