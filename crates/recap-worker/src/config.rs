//! Worker configuration.

use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// Jobs claimed per poll tick
    pub claim_batch: usize,
    /// Queue poll interval
    pub poll_interval: Duration,
    /// Visibility timeout stamped at claim
    pub visibility: Duration,
    /// Visibility timeout while awaiting an external callback
    pub async_visibility: Duration,
    /// Per-step execution timeout
    pub job_timeout: Duration,
    /// Interval for refreshing job ownership while processing
    pub heartbeat_interval: Duration,
    /// Visibility-expiry sweep interval
    pub expiry_sweep_interval: Duration,
    /// Heartbeat-loss sweep interval
    pub stall_sweep_interval: Duration,
    /// Minimum age before a heartbeat-less job is considered stalled
    pub stall_grace: Duration,
    /// Graceful shutdown drain timeout
    pub shutdown_timeout: Duration,
    /// Work directory for temporary files
    pub work_dir: String,
    /// Base URL the transcription provider calls back on
    pub callback_base_url: String,
    /// Requested extraction pool size
    pub extraction_workers: usize,
    /// Extraction chunk length in seconds
    pub chunk_duration_seconds: f64,
    /// Extraction frame sampling rate
    pub target_fps: f64,
    /// Frames per sink flush
    pub frame_batch_size: usize,
    /// Per-chunk decode timeout
    pub chunk_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            claim_batch: 5,
            poll_interval: Duration::from_secs(5),
            visibility: Duration::from_secs(600),
            async_visibility: Duration::from_secs(3600),
            job_timeout: Duration::from_secs(1800),
            heartbeat_interval: Duration::from_secs(30),
            expiry_sweep_interval: Duration::from_secs(60),
            stall_sweep_interval: Duration::from_secs(300),
            stall_grace: Duration::from_secs(120),
            shutdown_timeout: Duration::from_secs(30),
            work_dir: "/tmp/recap".to_string(),
            callback_base_url: "http://localhost:8080".to_string(),
            extraction_workers: 4,
            chunk_duration_seconds: 60.0,
            target_fps: 0.2,
            frame_batch_size: 10,
            chunk_timeout_secs: 300,
        }
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_f64(name: &str, default: f64) -> f64 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            max_concurrent_jobs: env_usize("WORKER_MAX_JOBS", d.max_concurrent_jobs),
            claim_batch: env_usize("WORKER_CLAIM_BATCH", d.claim_batch),
            poll_interval: Duration::from_secs(env_u64(
                "WORKER_POLL_INTERVAL_SECS",
                d.poll_interval.as_secs(),
            )),
            visibility: Duration::from_secs(env_u64(
                "WORKER_VISIBILITY_SECS",
                d.visibility.as_secs(),
            )),
            async_visibility: Duration::from_secs(env_u64(
                "WORKER_ASYNC_VISIBILITY_SECS",
                d.async_visibility.as_secs(),
            )),
            job_timeout: Duration::from_secs(env_u64(
                "WORKER_JOB_TIMEOUT_SECS",
                d.job_timeout.as_secs(),
            )),
            heartbeat_interval: Duration::from_secs(env_u64(
                "WORKER_HEARTBEAT_SECS",
                d.heartbeat_interval.as_secs(),
            )),
            expiry_sweep_interval: Duration::from_secs(env_u64(
                "WORKER_EXPIRY_SWEEP_SECS",
                d.expiry_sweep_interval.as_secs(),
            )),
            stall_sweep_interval: Duration::from_secs(env_u64(
                "WORKER_STALL_SWEEP_SECS",
                d.stall_sweep_interval.as_secs(),
            )),
            stall_grace: Duration::from_secs(env_u64(
                "WORKER_STALL_GRACE_SECS",
                d.stall_grace.as_secs(),
            )),
            shutdown_timeout: Duration::from_secs(env_u64(
                "WORKER_SHUTDOWN_TIMEOUT_SECS",
                d.shutdown_timeout.as_secs(),
            )),
            work_dir: std::env::var("WORKER_WORK_DIR").unwrap_or(d.work_dir),
            callback_base_url: std::env::var("CALLBACK_BASE_URL").unwrap_or(d.callback_base_url),
            extraction_workers: env_usize("EXTRACTION_WORKERS", d.extraction_workers),
            chunk_duration_seconds: env_f64(
                "EXTRACTION_CHUNK_DURATION_SECS",
                d.chunk_duration_seconds,
            ),
            target_fps: env_f64("EXTRACTION_TARGET_FPS", d.target_fps),
            frame_batch_size: env_usize("EXTRACTION_BATCH_SIZE", d.frame_batch_size),
            chunk_timeout_secs: env_u64("EXTRACTION_CHUNK_TIMEOUT_SECS", d.chunk_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = WorkerConfig::default();
        assert_eq!(config.claim_batch, 5);
        assert!(config.async_visibility > config.visibility);
        assert!(config.heartbeat_interval < config.visibility);
    }
}
