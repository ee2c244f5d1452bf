use const_format::concatcp;

pub mod api;
pub mod buffer;
pub mod configuration;
mod controller;
pub mod database;
mod error;
pub mod geolocator;
mod recorder;
pub mod reports;
mod uploader;
mod user_store;

pub use controller::*;
pub use error::TrackerError;
pub use recorder::TrackRecorder;
pub use uploader::*;
pub use user_store::UserStore;

pub const DATABASE_FILE: &str = "hike_tracker.db";
pub const PENDING_DIR: &str = "pending_sessions";
pub const LOG_DIR: &str = "log";
pub const LOG_FILE: &str = concatcp!(LOG_DIR, "/hike_tracker.log");

pub const HIKING_RECORDS_ENDPOINT: &str = "/hiking-records";
pub const TRAIL_REPORTS_ENDPOINT: &str = "/trail-reports";
