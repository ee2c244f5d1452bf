use std::sync::Arc;

use reqwest::{multipart::Form, Client, RequestBuilder, StatusCode};
use serde::Serialize;

use crate::{configuration::BackendConfig, TrackerError, UserStore};

/// Thin wrapper around the backend. Every request carries the logged in
/// user's bearer token, when there is one.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    user_store: Arc<UserStore>,
}

impl ApiClient {
    pub fn new(config: &BackendConfig, user_store: Arc<UserStore>) -> Result<Self, TrackerError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|err| TrackerError::Config(format!("Failed to create HTTP client: {err}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            user_store,
        })
    }

    pub fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    async fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match self.user_store.bearer_token().await {
            Some(token) => request.bearer_auth(token),
            None => {
                tracing::debug!("No user logged in, sending request without token");
                request
            }
        }
    }

    /// Sends the request and returns the raw response body of a 2xx reply.
    async fn send(
        &self,
        request: RequestBuilder,
        fail: fn(String) -> TrackerError,
    ) -> Result<Vec<u8>, TrackerError> {
        let response = self.authorized(request).await
            .send()
            .await
            .map_err(|err| fail(err.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            tracing::warn!("Backend rejected the access token of {}", response.url());
        }
        if !status.is_success() {
            return Err(fail(format!("{} responded {status}", response.url())));
        }

        response
            .bytes()
            .await
            .map(|bytes| bytes.to_vec())
            .map_err(|err| fail(err.to_string()))
    }

    pub async fn post_json<T: Serialize + ?Sized>(&self, endpoint: &str, body: &T) -> Result<Vec<u8>, TrackerError> {
        let request = self.client.post(self.url(endpoint)).json(body);
        self.send(request, |cause| TrackerError::Upload { cause }).await
    }

    pub async fn post_multipart(&self, endpoint: &str, form: Form) -> Result<Vec<u8>, TrackerError> {
        let request = self.client.post(self.url(endpoint)).multipart(form);
        self.send(request, |cause| TrackerError::Upload { cause }).await
    }

    pub async fn get(&self, endpoint: &str) -> Result<Vec<u8>, TrackerError> {
        let request = self.client.get(self.url(endpoint));
        self.send(request, |cause| TrackerError::Fetch { cause }).await
    }
}
