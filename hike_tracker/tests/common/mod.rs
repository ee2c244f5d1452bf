#![allow(dead_code)]

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    extract::{Multipart, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    routing::post,
    Router,
};
use hike_tracker::{
    api::ApiClient,
    configuration::BackendConfig,
    database::KeyValueStore,
    geolocator::{FixSink, Geolocator, Permission, Subscription, WatchOptions},
    Ack, HikeEvent, SessionUploader, TrackerError, UserStore,
};
use hike_tracker_lib::{geo_point::GeoPoint, hike_session::HikeSession, user::UserInfo};
use tokio::sync::broadcast;

pub const ACCESS_TOKEN: &str = "secret-token";

/// A geolocator driven by the test: fixes are pushed with `emit`.
pub struct ScriptedGeolocator {
    permission: Permission,
    position: GeoPoint,
    sink: Mutex<Option<FixSink>>,
    options: Mutex<Option<WatchOptions>>,
    subscribe_calls: AtomicUsize,
    cancelled: Arc<AtomicBool>,
}

impl ScriptedGeolocator {
    pub fn granted() -> Arc<Self> {
        Arc::new(Self::with_permission(Permission::Granted))
    }

    pub fn denied() -> Arc<Self> {
        Arc::new(Self::with_permission(Permission::Denied))
    }

    fn with_permission(permission: Permission) -> Self {
        Self {
            permission,
            position: GeoPoint::new(37.6586, 126.9780, 1_700_000_000_000),
            sink: Mutex::new(None),
            options: Mutex::new(None),
            subscribe_calls: AtomicUsize::new(0),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Delivers a fix. Returns false if nobody is listening anymore.
    pub fn emit(&self, fix: GeoPoint) -> bool {
        match self.sink.lock().unwrap().as_ref() {
            Some(sink) => sink.send(fix).is_ok(),
            None => false,
        }
    }

    /// Ends the position stream, like a device that lost its provider.
    pub fn close(&self) {
        self.sink.lock().unwrap().take();
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn options(&self) -> Option<WatchOptions> {
        *self.options.lock().unwrap()
    }

    pub fn position(&self) -> GeoPoint {
        self.position
    }
}

#[async_trait]
impl Geolocator for ScriptedGeolocator {
    async fn request_permission(&self) -> Permission {
        self.permission
    }

    async fn current_position(&self) -> Result<GeoPoint, TrackerError> {
        Ok(self.position)
    }

    async fn subscribe(&self, options: WatchOptions, sink: FixSink) -> Result<Subscription, TrackerError> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        self.cancelled.store(false, Ordering::SeqCst);
        *self.options.lock().unwrap() = Some(options);
        *self.sink.lock().unwrap() = Some(sink);

        let cancelled = self.cancelled.clone();
        Ok(Subscription::new(move || cancelled.store(true, Ordering::SeqCst)))
    }
}

/// Keeps every submitted session; fails or stalls on demand.
#[derive(Default)]
pub struct RecordingUploader {
    sessions: Mutex<Vec<HikeSession>>,
    error: Mutex<Option<TrackerError>>,
    delay: Mutex<Duration>,
}

impl RecordingUploader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, fail: bool) {
        self.set_error(fail.then(|| TrackerError::upload("backend unavailable")));
    }

    /// The error every following submit answers with, `None` to succeed.
    pub fn set_error(&self, error: Option<TrackerError>) {
        *self.error.lock().unwrap() = error;
    }

    /// How long each submit takes before it answers.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn sessions(&self) -> Vec<HikeSession> {
        self.sessions.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}

#[async_trait]
impl SessionUploader for RecordingUploader {
    async fn submit(&self, session: &HikeSession) -> Result<Ack, TrackerError> {
        let call = {
            let mut sessions = self.sessions.lock().unwrap();
            sessions.push(session.clone());
            sessions.len()
        };

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match self.error.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(Ack { record_id: Some(call as i64) }),
        }
    }
}

/// Waits for the first event matching `predicate`, skipping the others.
pub async fn wait_for<F>(events: &mut broadcast::Receiver<HikeEvent>, mut predicate: F) -> HikeEvent
where
    F: FnMut(&HikeEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Waits until `count` fixes have reached the path.
pub async fn wait_for_fixes(events: &mut broadcast::Receiver<HikeEvent>, count: usize) {
    for _ in 0..count {
        wait_for(events, |event| matches!(event, HikeEvent::PathExtended { .. })).await;
    }
}

#[derive(Debug, Clone)]
pub struct ReceivedPhoto {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub len: usize,
}

/// What the mock backend saw and how it should answer.
#[derive(Default)]
pub struct BackendState {
    pub records: Mutex<Vec<(Option<String>, serde_json::Value)>>,
    pub reports: Mutex<Vec<(Option<String>, serde_json::Value)>>,
    pub photos: Mutex<Vec<ReceivedPhoto>>,
    pub fail_uploads: AtomicBool,
    pub ack_body: Mutex<String>,
    pub records_body: Mutex<String>,
    pub reports_body: Mutex<String>,
    pub record_listings: Mutex<Vec<Option<String>>>,
}

pub struct MockBackend {
    pub base_url: String,
    pub state: Arc<BackendState>,
}

impl MockBackend {
    pub async fn start() -> Self {
        let state = Arc::new(BackendState::default());
        *state.ack_body.lock().unwrap() = r#"{"recordId": 1}"#.to_string();
        *state.records_body.lock().unwrap() = "[]".to_string();
        *state.reports_body.lock().unwrap() = "[]".to_string();

        let app = Router::new()
            .route("/hiking-records", post(hiking_records).get(list_records))
            .route("/trail-reports", post(submit_report).get(list_reports))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
        }
    }

    pub fn config(&self) -> BackendConfig {
        BackendConfig {
            base_url: self.base_url.clone(),
            timeout_secs: 5,
        }
    }

    /// An API client logged in as a test user.
    pub async fn api(&self) -> ApiClient {
        let users = UserStore::load(KeyValueStore::in_memory().await.unwrap()).await.unwrap();
        users
            .login(UserInfo {
                user_id: 42,
                name: "Jiwoo".to_string(),
                access_token: ACCESS_TOKEN.to_string(),
            })
            .await
            .unwrap();
        ApiClient::new(&self.config(), Arc::new(users)).unwrap()
    }

    pub fn records(&self) -> Vec<(Option<String>, serde_json::Value)> {
        self.state.records.lock().unwrap().clone()
    }
}

fn authorization(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

async fn hiking_records(State(state): State<Arc<BackendState>>, headers: HeaderMap, body: String) -> (StatusCode, String) {
    if state.fail_uploads.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "database is down".to_string());
    }

    let record = serde_json::from_str(&body).unwrap_or(serde_json::Value::Null);
    state.records.lock().unwrap().push((authorization(&headers), record));
    (StatusCode::CREATED, state.ack_body.lock().unwrap().clone())
}

async fn list_records(State(state): State<Arc<BackendState>>, headers: HeaderMap) -> (StatusCode, String) {
    state.record_listings.lock().unwrap().push(authorization(&headers));
    (StatusCode::OK, state.records_body.lock().unwrap().clone())
}

async fn submit_report(State(state): State<Arc<BackendState>>, headers: HeaderMap, mut multipart: Multipart) -> (StatusCode, String) {
    let mut report = serde_json::Value::Null;

    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let data = field.bytes().await.unwrap();

        match name.as_str() {
            "photo" => {
                state.photos.lock().unwrap().push(ReceivedPhoto {
                    file_name,
                    content_type,
                    len: data.len(),
                });
            }
            "trailReport" => report = serde_json::from_slice(&data).unwrap_or(serde_json::Value::Null),
            _ => {}
        }
    }

    state.reports.lock().unwrap().push((authorization(&headers), report.clone()));

    // Echo the report back the way the backend does, coordinates as strings
    let mut saved = report;
    if let Some(object) = saved.as_object_mut() {
        for key in ["latitude", "longitude"] {
            if let Some(value) = object.get(key).cloned() {
                object.insert(key.to_string(), serde_json::Value::String(value.to_string()));
            }
        }
        object.insert("photoUrl".to_string(), serde_json::Value::String("/photos/1.jpg".to_string()));
    }
    (StatusCode::CREATED, saved.to_string())
}

async fn list_reports(State(state): State<Arc<BackendState>>) -> (StatusCode, String) {
    (StatusCode::OK, state.reports_body.lock().unwrap().clone())
}
