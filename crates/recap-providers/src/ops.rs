//! Operator notifications for jobs escalated to manual review.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{info, warn};

use recap_models::Job;

use crate::error::{ProviderError, ProviderResult};

/// Notifies operators when a job needs human attention. Notification
/// failures are logged by callers, never surfaced into job state.
#[async_trait]
pub trait OpsNotifier: Send + Sync {
    async fn notify_manual_review(&self, job: &Job) -> ProviderResult<()>;
}

/// Posts escalation events to an operator webhook (Slack-compatible shape).
pub struct WebhookOpsNotifier {
    http: Client,
    webhook_url: String,
}

#[derive(Debug, Serialize)]
struct EscalationPayload<'a> {
    text: String,
    job_id: &'a str,
    course_id: &'a str,
    step: String,
    attempt_count: u32,
}

impl WebhookOpsNotifier {
    pub fn new(webhook_url: impl Into<String>) -> ProviderResult<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(ProviderError::Network)?;
        Ok(Self {
            http,
            webhook_url: webhook_url.into(),
        })
    }

    /// Create from `OPS_WEBHOOK_URL`; `None` when unset.
    pub fn from_env() -> ProviderResult<Option<Self>> {
        match std::env::var("OPS_WEBHOOK_URL") {
            Ok(url) if !url.is_empty() => Ok(Some(Self::new(url)?)),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl OpsNotifier for WebhookOpsNotifier {
    async fn notify_manual_review(&self, job: &Job) -> ProviderResult<()> {
        let payload = EscalationPayload {
            text: format!(
                "Job {} ({} for course {}) escalated to manual review after {} attempts: {}",
                job.id,
                job.step,
                job.course_id,
                job.attempt_count,
                job.error_message.as_deref().unwrap_or("no error recorded"),
            ),
            job_id: job.id.as_str(),
            course_id: job.course_id.as_str(),
            step: job.step.to_string(),
            attempt_count: job.attempt_count,
        };

        let response = self
            .http
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            warn!(
                status = %response.status(),
                job_id = %job.id,
                "Ops webhook rejected escalation notification"
            );
            return Err(ProviderError::RequestFailed(format!(
                "ops webhook returned {}",
                response.status()
            )));
        }

        info!(job_id = %job.id, "Escalation notification delivered");
        Ok(())
    }
}

/// No-op notifier for deployments without an ops webhook.
pub struct NoopOpsNotifier;

#[async_trait]
impl OpsNotifier for NoopOpsNotifier {
    async fn notify_manual_review(&self, job: &Job) -> ProviderResult<()> {
        info!(job_id = %job.id, step = %job.step, "Job escalated to manual review");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recap_models::{CourseId, PipelineStep};
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn escalation_payload_reaches_webhook() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({
                "step": "transcribe",
                "attempt_count": 3
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut job = Job::new(CourseId::from_string("course-1"), PipelineStep::Transcribe);
        job.attempt_count = 3;
        job.error_message = Some("provider timeout".to_string());

        let notifier = WebhookOpsNotifier::new(server.uri()).unwrap();
        notifier.notify_manual_review(&job).await.unwrap();
    }
}
