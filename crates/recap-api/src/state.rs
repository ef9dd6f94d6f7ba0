//! Shared application state.

use std::sync::Arc;

use recap_queue::{CourseStore, JobStore};

use crate::config::ApiConfig;
use crate::error::ApiResult;

/// State shared across request handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub store: Arc<JobStore>,
    pub courses: Arc<CourseStore>,
}

impl AppState {
    /// Build state from environment configuration.
    pub async fn new(config: ApiConfig) -> ApiResult<Self> {
        let store = Arc::new(JobStore::from_env()?);
        let courses = Arc::new(CourseStore::from_env()?);
        Ok(Self {
            config,
            store,
            courses,
        })
    }
}
