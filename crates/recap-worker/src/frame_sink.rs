//! Object-store adapter for the extraction pool's frame sink.

use std::sync::Arc;

use async_trait::async_trait;

use recap_media::{FrameSink, MediaError, MediaResult};
use recap_models::{CourseId, Frame};
use recap_storage::ObjectStoreClient;

/// Uploads flushed frame batches under `frames/{course_id}/`.
pub struct ObjectStoreFrameSink {
    storage: Arc<ObjectStoreClient>,
    course_id: CourseId,
}

impl ObjectStoreFrameSink {
    pub fn new(storage: Arc<ObjectStoreClient>, course_id: CourseId) -> Self {
        Self { storage, course_id }
    }

    fn frame_key(&self, frame: &Frame) -> String {
        format!(
            "frames/{}/chunk{:04}_frame{:05}.jpg",
            self.course_id, frame.chunk_index, frame.frame_index
        )
    }
}

#[async_trait]
impl FrameSink for ObjectStoreFrameSink {
    async fn store_batch(&self, frames: &[Frame]) -> MediaResult<Vec<String>> {
        let mut urls = Vec::with_capacity(frames.len());
        for frame in frames {
            let key = self.frame_key(frame);
            let url = self
                .storage
                .upload_bytes(frame.image_bytes.clone(), &key, "image/jpeg")
                .await
                .map_err(|e| MediaError::sink_failed(e.to_string()))?;
            urls.push(url);
        }
        Ok(urls)
    }
}
