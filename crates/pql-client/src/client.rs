use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::debug;

use pql_core::{Config, Error};

use crate::wire::{CancelAck, ContinueThreadRequest, CreateThreadRequest, ThreadState};

const THREADS_PATH: &str = "threads/v2";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const BODY_EXCERPT_LEN: usize = 200;

/// Thin transport wrapper over the query service's thread API.
///
/// One HTTP call per operation, authentication headers injected from the
/// configured credentials, non-2xx statuses translated into the error
/// taxonomy. No retries here; retry policy lives in the coordinator.
#[derive(Debug)]
pub struct QueryServiceClient {
    client: Client,
    base_url: String,
    api_key: String,
    auth_token: Option<String>,
}

impl QueryServiceClient {
    pub fn new(api_key: impl Into<String>, service_url: impl Into<String>) -> Self {
        Self::with_timeout(api_key, service_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        api_key: impl Into<String>,
        service_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        let mut base_url = service_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }

        Self {
            client,
            base_url,
            api_key: api_key.into(),
            auth_token: None,
        }
    }

    pub fn with_auth_token(mut self, auth_token: impl Into<String>) -> Self {
        self.auth_token = Some(auth_token.into());
        self
    }

    /// Build a client from validated credentials; fails fast with a
    /// configuration error before any network traffic.
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        if !config.is_valid() {
            return Err(Error::config(format!(
                "Query service credentials are not configured (missing: {}). Use the setup_config tool.",
                config.missing_fields().join(", ")
            )));
        }

        let mut client = Self::new(
            config.api_key.clone().unwrap_or_default(),
            config.service_url.clone().unwrap_or_default(),
        );
        if let Some(token) = &config.auth_token {
            client = client.with_auth_token(token);
        }
        Ok(client)
    }

    pub async fn create_thread(&self, request: &CreateThreadRequest) -> Result<ThreadState, Error> {
        debug!(url = %self.url(""), "Creating thread");
        let builder = self.client.post(self.url("")).json(request);
        self.send_json(builder).await
    }

    pub async fn fetch_thread(&self, thread_id: &str) -> Result<ThreadState, Error> {
        debug!(thread_id, "Fetching thread status");
        let builder = self.client.get(self.url(thread_id));
        self.send_json(builder).await
    }

    pub async fn continue_thread(
        &self,
        thread_id: &str,
        request: &ContinueThreadRequest,
    ) -> Result<ThreadState, Error> {
        debug!(thread_id, "Continuing thread");
        let builder = self
            .client
            .post(self.url(&format!("{}/continue", thread_id)))
            .json(request);
        self.send_json(builder).await
    }

    pub async fn cancel_interaction(&self, thread_id: &str) -> Result<CancelAck, Error> {
        debug!(thread_id, "Cancelling latest interaction");
        let builder = self.client.post(self.url(&format!("{}/cancel", thread_id)));
        self.send_json(builder).await
    }

    fn url(&self, suffix: &str) -> String {
        if suffix.is_empty() {
            format!("{}/{}", self.base_url, THREADS_PATH)
        } else {
            format!("{}/{}/{}", self.base_url, THREADS_PATH, suffix)
        }
    }

    fn with_headers(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder.header("Authorization", format!("Bearer {}", self.api_key));
        match &self.auth_token {
            Some(token) => builder.header("x-ddn-auth-token", token),
            None => builder,
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, Error> {
        let response = self
            .with_headers(builder)
            .send()
            .await
            .map_err(|e| Error::transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(translate_status(status.as_u16(), &body));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::transport(e.to_string()))?;
        serde_json::from_str(&body).map_err(|e| {
            Error::malformed(format!("Failed to decode response: {} - body: {}", e, excerpt(&body)))
        })
    }
}

fn translate_status(status: u16, body: &str) -> Error {
    let message = extract_error_message(body);
    match status {
        401 | 403 => Error::auth(message),
        404 => Error::not_found(message),
        _ => Error::service(status, message),
    }
}

/// Pull a readable message out of an error body, falling back to a bounded
/// excerpt of the raw text.
fn extract_error_message(body: &str) -> String {
    #[derive(serde::Deserialize)]
    struct ErrorBody {
        error: Option<String>,
        message: Option<String>,
        details: Option<String>,
    }

    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(message) = parsed.error.or(parsed.message) {
            return match parsed.details {
                Some(details) if !details.is_empty() => format!("{}: {}", message, details),
                _ => message,
            };
        }
    }
    excerpt(body)
}

fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "(empty body)".to_string();
    }
    match trimmed.char_indices().nth(BODY_EXCERPT_LEN) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
