use std::{path::{Path, PathBuf}, time::Duration};

use hike_tracker_lib::interpolation::DEFAULT_INTERPOLATION_POINTS;
use serde::Deserialize;

use crate::{geolocator::WatchOptions, TrackerError, DATABASE_FILE, LOG_FILE, PENDING_DIR};

/// Upper bound on interpolated points between two fixes.
pub const MAX_INTERPOLATION_POINTS: usize = 100;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub data_dir: PathBuf,
    pub interpolation_points: usize,
    pub backend: BackendConfig,
    pub sampling: SamplingConfig,
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

/// How often the device should report a new position while tracking.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub min_interval_ms: u64,
    pub min_distance_m: f64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub on_failure: FailurePolicy,
    pub include_interpolated: bool,
}

/// What happens to a finished hike whose upload fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Keep it on disk until a later resubmission succeeds.
    Retain,
    /// Drop it.
    Discard,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            interpolation_points: DEFAULT_INTERPOLATION_POINTS,
            backend: BackendConfig::default(),
            sampling: SamplingConfig::default(),
            upload: UploadConfig::default(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            timeout_secs: 10,
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 20_000,
            min_distance_m: 5.,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            on_failure: FailurePolicy::Retain,
            include_interpolated: true,
        }
    }
}

impl SamplingConfig {
    pub fn watch_options(&self) -> WatchOptions {
        WatchOptions {
            min_interval_ms: self.min_interval_ms,
            min_distance_m: self.min_distance_m,
        }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl TrackerConfig {
    /// Reads a TOML file. Missing keys fall back to their defaults.
    pub fn load(path: &Path) -> Result<Self, TrackerError> {
        let content = std::fs::read_to_string(path)
            .map_err(|err| TrackerError::Config(format!("Failed to read {}: {err}", path.display())))?;
        let config = Self::parse(&content)?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, TrackerError> {
        let config: TrackerConfig = toml::from_str(content).map_err(|err| TrackerError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), TrackerError> {
        if self.interpolation_points > MAX_INTERPOLATION_POINTS {
            return Err(TrackerError::Config(format!(
                "interpolation_points must be at most {}",
                MAX_INTERPOLATION_POINTS
            )));
        }
        if self.backend.base_url.trim().is_empty() {
            return Err(TrackerError::Config("backend.base_url must not be empty".into()));
        }
        if self.backend.timeout_secs == 0 {
            return Err(TrackerError::Config("backend.timeout_secs must be positive".into()));
        }
        if self.sampling.min_distance_m < 0. {
            return Err(TrackerError::Config("sampling.min_distance_m must not be negative".into()));
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }

    pub fn pending_dir(&self) -> PathBuf {
        self.data_dir.join(PENDING_DIR)
    }

    pub fn log_file(&self) -> PathBuf {
        self.data_dir.join(LOG_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = TrackerConfig::parse("").unwrap();
        assert_eq!(config.interpolation_points, 4);
        assert_eq!(config.sampling.min_interval_ms, 20_000);
        assert_eq!(config.backend.timeout(), Duration::from_secs(10));
        assert_eq!(config.upload.on_failure, FailurePolicy::Retain);
        assert!(config.upload.include_interpolated);
    }

    #[test]
    fn partial_sections() {
        let config = TrackerConfig::parse(
            r#"
            data_dir = "/tmp/hikes"

            [backend]
            base_url = "https://hike.example.com/api/v1"

            [upload]
            on_failure = "discard"
            "#,
        )
        .unwrap();

        assert_eq!(config.backend.base_url, "https://hike.example.com/api/v1");
        assert_eq!(config.backend.timeout_secs, 10);
        assert_eq!(config.upload.on_failure, FailurePolicy::Discard);
        assert_eq!(config.database_path(), PathBuf::from("/tmp/hikes/hike_tracker.db"));
        assert_eq!(config.pending_dir(), PathBuf::from("/tmp/hikes/pending_sessions"));
    }

    #[test]
    fn invalid_values() {
        assert!(TrackerConfig::parse("[backend]\ntimeout_secs = 0").is_err());
        assert!(TrackerConfig::parse("[upload]\non_failure = \"sometimes\"").is_err());
        assert!(TrackerConfig::parse("interpolation_points = -1").is_err());
    }

    #[test]
    fn interpolation_points_are_capped() {
        assert_eq!(TrackerConfig::parse("interpolation_points = 100").unwrap().interpolation_points, 100);
        assert_eq!(TrackerConfig::parse("interpolation_points = 0").unwrap().interpolation_points, 0);
        assert!(matches!(
            TrackerConfig::parse("interpolation_points = 1000000000"),
            Err(TrackerError::Config(_))
        ));
    }
}
