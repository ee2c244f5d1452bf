use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize};

use crate::geo_point::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportCategory {
    TrailIssue,
    Construction,
    NaturalDisaster,
    Wildlife,
    Other,
}

impl ReportCategory {
    pub const ALL: [ReportCategory; 5] = [
        ReportCategory::TrailIssue,
        ReportCategory::Construction,
        ReportCategory::NaturalDisaster,
        ReportCategory::Wildlife,
        ReportCategory::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportCategory::TrailIssue => "trail_issue",
            ReportCategory::Construction => "construction",
            ReportCategory::NaturalDisaster => "natural_disaster",
            ReportCategory::Wildlife => "wildlife",
            ReportCategory::Other => "other",
        }
    }
}

impl fmt::Display for ReportCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        ReportCategory::ALL
            .into_iter()
            .find(|category| category.as_str() == normalized)
            .ok_or_else(|| format!("Unknown report category: {s}"))
    }
}

/// A user-submitted incident marker on the map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrailReport {
    #[serde(deserialize_with = "lenient_f64")]
    pub latitude: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub longitude: f64,
    pub category: ReportCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub timestamp_ms: i64,
    /// Where the backend stored the photo, once submitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
}

impl TrailReport {
    pub fn new(position: GeoPoint, category: ReportCategory, note: Option<String>) -> Self {
        Self {
            latitude: position.latitude(),
            longitude: position.longitude(),
            category,
            note: note.filter(|note| !note.trim().is_empty()),
            timestamp_ms: position.timestamp_ms(),
            photo_url: None,
        }
    }

    pub fn position(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude, self.timestamp_ms)
    }
}

// Some backends echo coordinates back as strings.
fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrText {
        Number(f64),
        Text(String),
    }

    match NumberOrText::deserialize(deserializer)? {
        NumberOrText::Number(value) => Ok(value),
        NumberOrText::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid coordinate {text:?}"))),
    }
}
