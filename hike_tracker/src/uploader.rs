use async_trait::async_trait;
use hike_tracker_lib::hike_session::{HikeSession, HikingRecord};
use serde::{Deserialize, Serialize};

use crate::{api::ApiClient, TrackerError, HIKING_RECORDS_ENDPOINT};

/// The backend's acknowledgment of an uploaded hike.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    #[serde(default, alias = "id")]
    pub record_id: Option<i64>,
}

/// Hands finished hikes to whatever stores them.
#[async_trait]
pub trait SessionUploader: Send + Sync {
    async fn submit(&self, session: &HikeSession) -> Result<Ack, TrackerError>;
}

/// Posts finished hikes to the backend's hiking record endpoint, one request per hike.
pub struct HttpSessionUploader {
    api: ApiClient,
    include_interpolated: bool,
}

impl HttpSessionUploader {
    pub fn new(api: ApiClient, include_interpolated: bool) -> Self {
        Self { api, include_interpolated }
    }

    /// The signed in user's uploaded hikes, as the backend lists them.
    pub async fn fetch_records(&self) -> Result<Vec<HikingRecord>, TrackerError> {
        let body = self.api.get(HIKING_RECORDS_ENDPOINT).await?;
        let records: Vec<HikingRecord> = serde_json::from_slice(&body)
            .map_err(|err| TrackerError::MalformedResponse(err.to_string()))?;

        tracing::debug!("Fetched {} hiking records", records.len());
        Ok(records)
    }
}

#[async_trait]
impl SessionUploader for HttpSessionUploader {
    async fn submit(&self, session: &HikeSession) -> Result<Ack, TrackerError> {
        let record = session.to_record(self.include_interpolated);
        tracing::debug!(
            "Uploading hike on mountain {} with {} points",
            record.mountain_id,
            record.path.len()
        );

        let body = self.api.post_json(HIKING_RECORDS_ENDPOINT, &record).await?;
        parse_ack(&body)
    }
}

fn parse_ack(body: &[u8]) -> Result<Ack, TrackerError> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(Ack::default());
    }

    serde_json::from_slice(body).map_err(|err| TrackerError::MalformedResponse(err.to_string()))
}
