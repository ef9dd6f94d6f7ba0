//! Queue configuration and key layout.

use std::time::Duration;

use recap_models::{CourseId, JobId};

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Key namespace prefix
    pub key_prefix: String,
    /// Retry ceiling: attempts before a job is parked for manual review
    pub max_attempts: u32,
    /// TTL for enqueue idempotency keys
    pub dedup_ttl: Duration,
    /// TTL for worker heartbeat keys
    pub heartbeat_ttl: Duration,
    /// TTL for webhook continuation tokens
    pub token_ttl: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "recap".to_string(),
            max_attempts: 3,
            dedup_ttl: Duration::from_secs(24 * 3600),
            heartbeat_ttl: Duration::from_secs(90),
            token_ttl: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            key_prefix: std::env::var("QUEUE_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            max_attempts: std::env::var("QUEUE_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_attempts),
            dedup_ttl: Duration::from_secs(
                std::env::var("QUEUE_DEDUP_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.dedup_ttl.as_secs()),
            ),
            heartbeat_ttl: Duration::from_secs(
                std::env::var("QUEUE_HEARTBEAT_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.heartbeat_ttl.as_secs()),
            ),
            token_ttl: Duration::from_secs(
                std::env::var("QUEUE_TOKEN_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.token_ttl.as_secs()),
            ),
        }
    }

    pub fn job_key(&self, id: &JobId) -> String {
        format!("{}:job:{}", self.key_prefix, id)
    }

    pub fn pending_key(&self) -> String {
        format!("{}:jobs:pending", self.key_prefix)
    }

    pub fn processing_key(&self) -> String {
        format!("{}:jobs:processing", self.key_prefix)
    }

    pub fn review_key(&self) -> String {
        format!("{}:jobs:review", self.key_prefix)
    }

    pub fn course_key(&self, id: &CourseId) -> String {
        format!("{}:course:{}", self.key_prefix, id)
    }

    pub fn course_jobs_key(&self, id: &CourseId) -> String {
        format!("{}:course:{}:jobs", self.key_prefix, id)
    }

    pub fn dedup_key(&self, idempotency_key: &str) -> String {
        format!("{}:dedup:{}", self.key_prefix, idempotency_key)
    }

    pub fn token_key(&self, token: &str) -> String {
        format!("{}:token:{}", self.key_prefix, token)
    }

    pub fn heartbeat_key(&self, id: &JobId) -> String {
        format!("{}:heartbeat:{}", self.key_prefix, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout_uses_prefix() {
        let config = QueueConfig::default();
        let job_id = JobId::from_string("j1");
        let course_id = CourseId::from_string("c1");

        assert_eq!(config.job_key(&job_id), "recap:job:j1");
        assert_eq!(config.pending_key(), "recap:jobs:pending");
        assert_eq!(config.course_jobs_key(&course_id), "recap:course:c1:jobs");
        assert_eq!(config.dedup_key("analyze:c1"), "recap:dedup:analyze:c1");
        assert_eq!(config.heartbeat_key(&job_id), "recap:heartbeat:j1");
    }
}
