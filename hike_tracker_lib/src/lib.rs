pub mod geo_point;
pub mod hike_session;
pub mod interpolation;
pub mod path;
pub mod trail_report;
pub mod user;
