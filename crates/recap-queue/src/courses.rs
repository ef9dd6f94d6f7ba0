//! Course (parent entity) persistence.
//!
//! Courses are JSON blobs keyed by id. Only the Step Executor (and the
//! webhook continuation, acting as an executor entry point) mutates them;
//! steps for one course are sequential, so read-modify-write with
//! last-write-wins is sufficient.

use redis::AsyncCommands;
use tracing::debug;

use recap_models::{Course, CourseId};

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};

/// Course store client.
pub struct CourseStore {
    client: redis::Client,
    config: QueueConfig,
}

impl CourseStore {
    /// Create a new course store.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    /// Persist a course record.
    pub async fn put(&self, course: &Course) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(course)?;
        conn.set::<_, _, ()>(self.config.course_key(&course.id), payload)
            .await?;
        debug!(course_id = %course.id, status = %course.status, "Stored course");
        Ok(())
    }

    /// Load a course by id.
    pub async fn get(&self, id: &CourseId) -> QueueResult<Option<Course>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload: Option<String> = conn.get(self.config.course_key(id)).await?;
        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Load a course, failing when it does not exist.
    pub async fn require(&self, id: &CourseId) -> QueueResult<Course> {
        self.get(id)
            .await?
            .ok_or_else(|| QueueError::CourseNotFound(id.to_string()))
    }

    /// Read-modify-write update.
    pub async fn update<F>(&self, id: &CourseId, mutate: F) -> QueueResult<Course>
    where
        F: FnOnce(&mut Course),
    {
        let mut course = self.require(id).await?;
        mutate(&mut course);
        course.updated_at = chrono::Utc::now();
        self.put(&course).await?;
        Ok(course)
    }
}
