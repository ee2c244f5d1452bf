use hike_tracker_lib::trail_report::{ReportCategory, TrailReport};
use reqwest::multipart::{Form, Part};

use crate::{api::ApiClient, database::KeyValueStore, geolocator::Geolocator, TrackerError, TRAIL_REPORTS_ENDPOINT};

const TRAIL_REPORTS_KEY: &str = "trail_reports";
const PHOTO_FILE_NAME: &str = "report.jpg";
const PHOTO_MIME: &str = "image/jpeg";

/// Last known set of trail reports, kept so map markers can be shown at launch
/// before the backend has answered.
#[derive(Clone)]
pub struct ReportCache {
    store: KeyValueStore,
}

impl ReportCache {
    pub fn new(store: KeyValueStore) -> Self {
        Self { store }
    }

    pub async fn cached(&self) -> Result<Vec<TrailReport>, TrackerError> {
        Ok(self.store.get(TRAIL_REPORTS_KEY).await?.unwrap_or_default())
    }

    pub async fn replace(&self, reports: &[TrailReport]) -> Result<(), TrackerError> {
        self.store.set(TRAIL_REPORTS_KEY, &reports).await
    }

    pub async fn append(&self, report: TrailReport) -> Result<(), TrackerError> {
        let mut reports = self.cached().await?;
        reports.push(report);
        self.replace(&reports).await
    }
}

pub struct TrailReportClient {
    api: ApiClient,
    cache: ReportCache,
}

impl TrailReportClient {
    pub fn new(api: ApiClient, cache: ReportCache) -> Self {
        Self { api, cache }
    }

    /// Sends a report with its photo. The report the backend returns (or the
    /// submitted one, if the reply is empty) is added to the cache.
    pub async fn submit(&self, draft: &TrailReport, photo: Vec<u8>) -> Result<TrailReport, TrackerError> {
        let json = serde_json::to_string(draft)
            .map_err(|err| TrackerError::upload(format!("Failed to serialize trail report: {err}")))?;

        let photo = Part::bytes(photo)
            .file_name(PHOTO_FILE_NAME)
            .mime_str(PHOTO_MIME)
            .map_err(TrackerError::upload)?;
        let report = Part::text(json)
            .mime_str("application/json")
            .map_err(TrackerError::upload)?;
        let form = Form::new().part("photo", photo).part("trailReport", report);

        let body = self.api.post_multipart(TRAIL_REPORTS_ENDPOINT, form).await?;

        let saved = if body.iter().all(|b| b.is_ascii_whitespace()) {
            draft.clone()
        } else {
            serde_json::from_slice::<TrailReport>(&body)
                .map_err(|err| TrackerError::MalformedResponse(err.to_string()))?
        };

        tracing::info!(
            "Submitted {} report at ({}, {})",
            saved.category,
            saved.latitude,
            saved.longitude
        );

        self.cache.append(saved.clone()).await?;
        Ok(saved)
    }

    /// Downloads every report and makes it the new cache.
    pub async fn fetch_all(&self) -> Result<Vec<TrailReport>, TrackerError> {
        let body = self.api.get(TRAIL_REPORTS_ENDPOINT).await?;
        let reports: Vec<TrailReport> = serde_json::from_slice(&body)
            .map_err(|err| TrackerError::MalformedResponse(err.to_string()))?;

        tracing::debug!("Fetched {} trail reports", reports.len());
        self.cache.replace(&reports).await?;
        Ok(reports)
    }

    pub async fn cached(&self) -> Result<Vec<TrailReport>, TrackerError> {
        self.cache.cached().await
    }

    /// Files a report at wherever the device is right now.
    pub async fn report_at_current_position(
        &self,
        geolocator: &dyn Geolocator,
        category: ReportCategory,
        note: Option<String>,
        photo: Vec<u8>,
    ) -> Result<TrailReport, TrackerError> {
        let position = geolocator.current_position().await?;
        self.submit(&TrailReport::new(position, category, note), photo).await
    }
}

#[cfg(test)]
mod tests {
    use hike_tracker_lib::geo_point::GeoPoint;

    use super::*;

    #[tokio::test]
    async fn cache_append_and_replace() {
        let cache = ReportCache::new(KeyValueStore::in_memory().await.unwrap());
        assert!(cache.cached().await.unwrap().is_empty());

        let rockfall = TrailReport::new(GeoPoint::new(37.66, 126.98, 1_000), ReportCategory::NaturalDisaster, None);
        let bear = TrailReport::new(GeoPoint::new(35.33, 127.73, 2_000), ReportCategory::Wildlife, Some("Bear".into()));

        cache.append(rockfall.clone()).await.unwrap();
        cache.append(bear.clone()).await.unwrap();
        assert_eq!(cache.cached().await.unwrap(), vec![rockfall, bear.clone()]);

        cache.replace(&[bear.clone()]).await.unwrap();
        assert_eq!(cache.cached().await.unwrap(), vec![bear]);
    }
}
