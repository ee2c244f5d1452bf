use chrono::{DateTime, Utc};
use serde::{de::IgnoredAny, Deserialize, Deserializer, Serialize};

use super::{geo_point::GeoPoint, path::HikePath};

/// One finished start-to-stop hike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HikeSession {
    pub mountain_id: i64,
    pub started_at_ms: i64,
    pub saved_at_ms: i64,
    pub path: HikePath,
}

impl HikeSession {
    pub fn new(mountain_id: i64, started_at_ms: i64, saved_at_ms: i64, path: HikePath) -> Self {
        Self {
            mountain_id,
            started_at_ms,
            saved_at_ms,
            path,
        }
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.started_at_ms)
    }

    pub fn saved_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.saved_at_ms)
    }

    pub fn to_record(&self, include_interpolated: bool) -> HikingRecord {
        HikingRecord {
            mountain_id: self.mountain_id,
            path: self.path.geo_points(include_interpolated),
            saved_at_ms: self.saved_at_ms,
        }
    }
}

/// Request body of the hiking record upload, and what the backend lists back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HikingRecord {
    #[serde(alias = "mtid")]
    pub mountain_id: i64,
    #[serde(default, alias = "hikingTrailData", deserialize_with = "lenient_path")]
    pub path: Vec<GeoPoint>,
    pub saved_at_ms: i64,
}

impl HikingRecord {
    pub fn saved_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.saved_at_ms)
    }

    /// Walked distance along the stored path, in meters.
    pub fn distance_m(&self) -> f64 {
        self.path.windows(2).map(|pair| pair[0].distance_to(&pair[1])).sum()
    }
}

/// Stored paths come back either as an array or as a JSON encoded string.
/// Anything unreadable gives an empty path rather than failing the whole list.
fn lenient_path<'de, D>(deserializer: D) -> Result<Vec<GeoPoint>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StoredPath {
        Points(Vec<GeoPoint>),
        Encoded(String),
        Unreadable(IgnoredAny),
    }

    Ok(match StoredPath::deserialize(deserializer)? {
        StoredPath::Points(points) => points,
        StoredPath::Encoded(text) => serde_json::from_str(&text).unwrap_or_default(),
        StoredPath::Unreadable(_) => Vec::new(),
    })
}
