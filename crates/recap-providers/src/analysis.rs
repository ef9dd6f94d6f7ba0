//! Synchronous analysis provider client.
//!
//! Takes the transcript (when one settled) and the extracted frame URLs and
//! returns the provider's structured analysis document.

use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{ProviderError, ProviderResult};

/// Configuration for the analysis provider client.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// Base URL of the provider API
    pub base_url: String,
    /// API key sent as a bearer token
    pub api_key: String,
    /// Request timeout; analysis runs long
    pub timeout: Duration,
    /// Max retries
    pub max_retries: u32,
}

impl AnalysisConfig {
    /// Create config from environment variables.
    pub fn from_env() -> ProviderResult<Self> {
        Ok(Self {
            base_url: std::env::var("ANALYSIS_API_URL")
                .unwrap_or_else(|_| "https://api.analysis.example".to_string()),
            api_key: std::env::var("ANALYSIS_API_KEY")
                .map_err(|_| ProviderError::config_error("ANALYSIS_API_KEY not set"))?,
            timeout: Duration::from_secs(
                std::env::var("ANALYSIS_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
            max_retries: std::env::var("ANALYSIS_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
        })
    }
}

#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    transcript: Option<&'a str>,
    frame_urls: &'a [String],
}

/// Client for the analysis provider.
pub struct AnalysisClient {
    http: Client,
    config: AnalysisConfig,
}

impl AnalysisClient {
    /// Create a new client.
    pub fn new(config: AnalysisConfig) -> ProviderResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ProviderError::Network)?;

        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> ProviderResult<Self> {
        Self::new(AnalysisConfig::from_env()?)
    }

    /// Run analysis over the settled inputs. `transcript` is `None` when the
    /// course degraded to frames-only.
    pub async fn analyze(
        &self,
        transcript: Option<&str>,
        frame_urls: &[String],
    ) -> ProviderResult<serde_json::Value> {
        if frame_urls.is_empty() && transcript.is_none() {
            return Err(ProviderError::invalid_response(
                "nothing to analyze: no transcript and no frames",
            ));
        }

        let url = format!("{}/v1/analyze", self.config.base_url);
        debug!(
            frames = frame_urls.len(),
            has_transcript = transcript.is_some(),
            "Sending analysis request"
        );

        let body = AnalyzeRequest {
            transcript,
            frame_urls,
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
                    "analysis provider returned {}: {}",
                    status, text
                )));
            }
            return Err(ProviderError::RequestFailed(format!(
                "analysis provider returned {}: {}",
                status, text
            )));
        }

        let analysis: serde_json::Value = response.json().await?;
        Ok(analysis)
    }

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
                        "Analysis request failed (attempt {}), retrying in {:?}: {}",
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
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: String) -> AnalysisConfig {
        AnalysisConfig {
            base_url,
            api_key: "test-key".to_string(),
            timeout: Duration::from_secs(5),
            max_retries: 0,
        }
    }

    #[tokio::test]
    async fn analyze_returns_provider_document() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/analyze"))
            .and(body_partial_json(serde_json::json!({
                "transcript": "[00:00:01] hello",
                "frame_urls": ["https://cdn.example/f0.jpg"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sections": [{"title": "Intro", "start": 0.0}]
            })))
            .mount(&server)
            .await;

        let client = AnalysisClient::new(test_config(server.uri())).unwrap();
        let analysis = client
            .analyze(
                Some("[00:00:01] hello"),
                &["https://cdn.example/f0.jpg".to_string()],
            )
            .await
            .unwrap();

        assert!(analysis["sections"].is_array());
    }

    #[tokio::test]
    async fn transcript_field_omitted_when_degraded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/analyze"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let client = AnalysisClient::new(test_config(server.uri())).unwrap();
        let result = client
            .analyze(None, &["https://cdn.example/f0.jpg".to_string()])
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn empty_inputs_are_rejected_locally() {
        let client = AnalysisClient::new(test_config("http://unused".to_string())).unwrap();
        let result = client.analyze(None, &[]).await;
        assert!(matches!(result, Err(ProviderError::InvalidResponse(_))));
    }
}
