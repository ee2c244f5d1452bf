use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrackerError {
    #[error("Location permission was denied")]
    PermissionDenied,

    #[error("A hike is already being tracked")]
    AlreadyTracking,

    #[error("Upload failed: {cause}")]
    Upload { cause: String },

    #[error("Request failed: {cause}")]
    Fetch { cause: String },

    #[error("Malformed response from backend: {0}")]
    MalformedResponse(String),

    #[error("Location error: {0}")]
    Location(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Hike controller is not running")]
    ActorStopped,
}

impl TrackerError {
    pub fn upload(cause: impl ToString) -> Self {
        TrackerError::Upload { cause: cause.to_string() }
    }

    pub fn fetch(cause: impl ToString) -> Self {
        TrackerError::Fetch { cause: cause.to_string() }
    }

    /// True when the backend answered 2xx but the body could not be read,
    /// so the request itself was accepted.
    pub fn reached_backend(&self) -> bool {
        matches!(self, TrackerError::MalformedResponse(_))
    }
}

impl From<sqlx::Error> for TrackerError {
    fn from(err: sqlx::Error) -> Self {
        TrackerError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_upload() {
        assert_eq!(TrackerError::upload("connection refused").to_string(), "Upload failed: connection refused");
    }

    #[test]
    fn display_malformed() {
        let e = TrackerError::MalformedResponse("expected object".to_string());
        assert_eq!(e.to_string(), "Malformed response from backend: expected object");
    }

    #[test]
    fn only_malformed_responses_reached_backend() {
        assert!(TrackerError::MalformedResponse("Saved!".to_string()).reached_backend());
        assert!(!TrackerError::upload("503").reached_backend());
        assert!(!TrackerError::ActorStopped.reached_backend());
    }
}
