//! Async transcription provider client.
//!
//! Submitting a job returns immediately with the provider's reference id;
//! the result arrives later on our webhook endpoint.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ProviderError, ProviderResult};

/// Configuration for the transcription provider client.
#[derive(Debug, Clone)]
pub struct TranscriptionConfig {
    /// Base URL of the provider API
    pub base_url: String,
    /// API key sent as a bearer token
    pub api_key: String,
    /// Request timeout
    pub timeout: Duration,
    /// Max retries for the submission call
    pub max_retries: u32,
}

impl TranscriptionConfig {
    /// Create config from environment variables.
    pub fn from_env() -> ProviderResult<Self> {
        Ok(Self {
            base_url: std::env::var("TRANSCRIPTION_API_URL")
                .unwrap_or_else(|_| "https://api.transcription.example".to_string()),
            api_key: std::env::var("TRANSCRIPTION_API_KEY")
                .map_err(|_| ProviderError::config_error("TRANSCRIPTION_API_KEY not set"))?,
            timeout: Duration::from_secs(
                std::env::var("TRANSCRIPTION_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            max_retries: std::env::var("TRANSCRIPTION_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
        })
    }
}

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    audio_url: &'a str,
    webhook_url: &'a str,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: String,
}

/// Client for the transcription provider.
pub struct TranscriptionClient {
    http: Client,
    config: TranscriptionConfig,
}

impl TranscriptionClient {
    /// Create a new client.
    pub fn new(config: TranscriptionConfig) -> ProviderResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ProviderError::Network)?;

        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> ProviderResult<Self> {
        Self::new(TranscriptionConfig::from_env()?)
    }

    /// Submit a transcription job. Returns the provider's reference id; the
    /// transcript itself is delivered later to `webhook_url`.
    pub async fn start_transcription(
        &self,
        media_url: &str,
        webhook_url: &str,
    ) -> ProviderResult<String> {
        let url = format!("{}/v1/transcripts", self.config.base_url);
        debug!("Submitting transcription job to {}", url);

        let body = SubmitRequest {
            audio_url: media_url,
            webhook_url,
        };

        let response = self
            .with_retry(|| async {
                self.http
                    .post(&url)
                    .bearer_auth(&self.config.api_key)
                    .json(&body)
                    .send()
                    .await
                    .map_err(ProviderError::Network)
            })
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            if status.is_server_error() {
                return Err(ProviderError::ServiceUnavailable(format!(
                    "transcription provider returned {}: {}",
                    status, text
                )));
            }
            return Err(ProviderError::RequestFailed(format!(
                "transcription provider returned {}: {}",
                status, text
            )));
        }

        let submitted: SubmitResponse = response.json().await?;
        info!(provider_ref = %submitted.id, "Transcription job submitted");
        Ok(submitted.id)
    }

    /// Execute with retry logic for transient failures.
    async fn with_retry<F, Fut, T>(&self, operation: F) -> ProviderResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = ProviderResult<T>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = Duration::from_millis(500 * 2u64.pow(attempt));
                    warn!(
                        "Transcription request failed (attempt {}), retrying in {:?}: {}",
                        attempt + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or(ProviderError::RequestFailed("Unknown error".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: String) -> TranscriptionConfig {
        TranscriptionConfig {
            base_url,
            api_key: "test-key".to_string(),
            timeout: Duration::from_secs(5),
            max_retries: 0,
        }
    }

    #[tokio::test]
    async fn submit_returns_provider_reference() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/transcripts"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(serde_json::json!({
                "audio_url": "https://cdn.example/video.mp4"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "tr_abc123"
            })))
            .mount(&server)
            .await;

        let client = TranscriptionClient::new(test_config(server.uri())).unwrap();
        let reference = client
            .start_transcription(
                "https://cdn.example/video.mp4",
                "https://api.example/webhooks/transcription?token=t",
            )
            .await
            .unwrap();

        assert_eq!(reference, "tr_abc123");
    }

    #[tokio::test]
    async fn server_error_maps_to_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/transcripts"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = TranscriptionClient::new(test_config(server.uri())).unwrap();
        let result = client
            .start_transcription("https://cdn.example/v.mp4", "https://cb.example")
            .await;

        assert!(matches!(
            result,
            Err(ProviderError::ServiceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn client_error_is_not_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/transcripts"))
            .respond_with(ResponseTemplate::new(422))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = test_config(server.uri());
        config.max_retries = 3;
        let client = TranscriptionClient::new(config).unwrap();
        let result = client
            .start_transcription("https://cdn.example/v.mp4", "https://cb.example")
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, ProviderError::RequestFailed(_)));
        assert!(!err.is_retryable());
    }
}
