//! Bounded parallel frame extraction pool.
//!
//! Chunks are processed in waves of at most the pool size, each chunk owned
//! by one task. Decoded frames are flushed to the sink in fixed-size batches
//! and their local files removed right after a successful flush, so peak
//! memory stays bounded by `batch_size * worker_count` frames regardless of
//! source length. Results are reassembled strictly in chunk-index order.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use recap_models::{Chunk, ExtractionReport, ExtractionRequest, Frame};

use crate::chunks::{effective_workers, plan_chunks};
use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::probe::probe_video;

/// One decoded frame sitting on local disk, not yet flushed.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    /// Position within the chunk
    pub frame_index: u32,
    /// Timestamp in the source video, seconds
    pub timestamp: f64,
    /// Local file holding the encoded image
    pub path: PathBuf,
}

/// Decodes one chunk of the source into frames on local disk.
#[async_trait]
pub trait ChunkDecoder: Send + Sync {
    async fn decode(
        &self,
        chunk: &Chunk,
        cancel: watch::Receiver<bool>,
    ) -> MediaResult<Vec<DecodedFrame>>;
}

/// Persists a batch of frames; returns one URL per frame in batch order.
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn store_batch(&self, frames: &[Frame]) -> MediaResult<Vec<String>>;
}

/// FFmpeg-backed [`ChunkDecoder`]. Each chunk decodes into its own
/// subdirectory of the work dir as a numbered JPEG sequence.
pub struct FfmpegChunkDecoder {
    source: PathBuf,
    work_dir: PathBuf,
    target_fps: f64,
    chunk_timeout_secs: u64,
}

impl FfmpegChunkDecoder {
    pub fn new(
        source: impl AsRef<Path>,
        work_dir: impl AsRef<Path>,
        target_fps: f64,
        chunk_timeout_secs: u64,
    ) -> Self {
        Self {
            source: source.as_ref().to_path_buf(),
            work_dir: work_dir.as_ref().to_path_buf(),
            target_fps,
            chunk_timeout_secs,
        }
    }
}

#[async_trait]
impl ChunkDecoder for FfmpegChunkDecoder {
    async fn decode(
        &self,
        chunk: &Chunk,
        cancel: watch::Receiver<bool>,
    ) -> MediaResult<Vec<DecodedFrame>> {
        let chunk_dir = self.work_dir.join(format!("chunk_{:04}", chunk.index));
        tokio::fs::create_dir_all(&chunk_dir).await?;

        let pattern = chunk_dir.join("%05d.jpg");
        let cmd = FfmpegCommand::new(&self.source, &pattern)
            .seek(chunk.start_time)
            .duration(chunk.duration)
            .sample_fps(self.target_fps)
            .image_sequence(4)
            .no_audio();

        FfmpegRunner::new()
            .with_cancel(cancel)
            .with_timeout(self.chunk_timeout_secs)
            .run(&cmd)
            .await?;

        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&chunk_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.path());
        }
        names.sort();

        let frames = names
            .into_iter()
            .enumerate()
            .map(|(i, path)| DecodedFrame {
                frame_index: i as u32,
                timestamp: chunk.start_time + i as f64 / self.target_fps,
                path,
            })
            .collect();

        Ok(frames)
    }
}

/// The pool itself. Generic over decoder and sink so the scheduling,
/// batching, and ordering logic is testable without FFmpeg or a network.
pub struct FrameExtractor {
    decoder: Arc<dyn ChunkDecoder>,
    sink: Arc<dyn FrameSink>,
    batch_size: usize,
    cancel_rx: watch::Receiver<bool>,
}

/// Raw pool result before timing/report assembly.
#[derive(Debug, Default)]
pub struct PoolOutcome {
    /// Frame URLs ordered by chunk index, then frame index
    pub frame_urls: Vec<String>,
    /// Chunks that failed to decode or flush
    pub partial_failures: u32,
}

impl FrameExtractor {
    pub fn new(
        decoder: Arc<dyn ChunkDecoder>,
        sink: Arc<dyn FrameSink>,
        batch_size: usize,
        cancel_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            decoder,
            sink,
            batch_size: batch_size.max(1),
            cancel_rx,
        }
    }

    /// Run the pool over a chunk plan with at most `workers` concurrent
    /// chunk tasks. A failed chunk is counted and skipped; the rest of the
    /// run proceeds. Cancellation stops scheduling before the next wave.
    pub async fn run(&self, chunks: &[Chunk], workers: usize) -> MediaResult<PoolOutcome> {
        let workers = workers.max(1);
        let mut results: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        let mut partial_failures = 0u32;

        for wave in chunks.chunks(workers) {
            if *self.cancel_rx.borrow() {
                info!("Extraction cancelled before next wave");
                return Err(MediaError::Cancelled);
            }

            let tasks = wave.iter().map(|chunk| {
                let chunk = *chunk;
                let decoder = Arc::clone(&self.decoder);
                let sink = Arc::clone(&self.sink);
                let cancel = self.cancel_rx.clone();
                let batch_size = self.batch_size;

                tokio::spawn(async move {
                    let outcome =
                        process_chunk(decoder.as_ref(), sink.as_ref(), &chunk, batch_size, cancel)
                            .await;
                    (chunk.index, outcome)
                })
            });

            for joined in join_all(tasks).await {
                let (index, outcome) = joined
                    .map_err(|e| MediaError::sink_failed(format!("chunk task panicked: {e}")))?;
                match outcome {
                    Ok(urls) => {
                        debug!(chunk = index, frames = urls.len(), "Chunk complete");
                        results.insert(index, urls);
                    }
                    Err(MediaError::Cancelled) => return Err(MediaError::Cancelled),
                    Err(e) => {
                        warn!(chunk = index, error = %e, "Chunk failed, continuing");
                        partial_failures += 1;
                    }
                }
            }
        }

        Ok(PoolOutcome {
            frame_urls: results.into_values().flatten().collect(),
            partial_failures,
        })
    }
}

/// Decode one chunk, then flush its frames through the sink in batches,
/// removing the local files after each successful flush.
async fn process_chunk(
    decoder: &dyn ChunkDecoder,
    sink: &dyn FrameSink,
    chunk: &Chunk,
    batch_size: usize,
    cancel: watch::Receiver<bool>,
) -> MediaResult<Vec<String>> {
    let decoded = decoder.decode(chunk, cancel).await?;
    let mut urls = Vec::with_capacity(decoded.len());

    for batch in decoded.chunks(batch_size) {
        let mut frames = Vec::with_capacity(batch.len());
        for item in batch {
            let image_bytes = tokio::fs::read(&item.path).await?;
            frames.push(Frame {
                chunk_index: chunk.index,
                frame_index: item.frame_index,
                timestamp: item.timestamp,
                image_bytes,
            });
        }

        urls.extend(sink.store_batch(&frames).await?);
        drop(frames);

        for item in batch {
            let _ = tokio::fs::remove_file(&item.path).await;
        }
    }

    Ok(urls)
}

/// Full extraction run against a local source file: probe, plan, pool,
/// report. The sink decides where frames end up.
pub async fn extract(
    source: impl AsRef<Path>,
    request: &ExtractionRequest,
    sink: Arc<dyn FrameSink>,
    work_dir: impl AsRef<Path>,
    batch_size: usize,
    chunk_timeout_secs: u64,
    cancel_rx: watch::Receiver<bool>,
) -> MediaResult<ExtractionReport> {
    let started = Instant::now();
    let source = source.as_ref();

    let info = probe_video(source).await?;
    let chunks = plan_chunks(info.duration, request.chunk_duration_seconds);
    let workers = effective_workers(request.worker_count);

    info!(
        duration = info.duration,
        chunks = chunks.len(),
        workers,
        target_fps = request.target_fps,
        "Starting frame extraction"
    );

    let decoder = Arc::new(FfmpegChunkDecoder::new(
        source,
        work_dir,
        request.target_fps,
        chunk_timeout_secs,
    ));
    let pool = FrameExtractor::new(decoder, sink, batch_size, cancel_rx);
    let outcome = pool.run(&chunks, workers).await?;

    info!(
        frames = outcome.frame_urls.len(),
        partial_failures = outcome.partial_failures,
        elapsed_secs = started.elapsed().as_secs_f64(),
        "Frame extraction complete"
    );

    Ok(ExtractionReport {
        frame_urls: outcome.frame_urls,
        duration_seconds: info.duration,
        processing_time_seconds: started.elapsed().as_secs_f64(),
        partial_failures: outcome.partial_failures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Decoder that materializes synthetic frames as temp files, with an
    /// artificial delay so later chunks can finish before earlier ones.
    struct FakeDecoder {
        dir: tempfile::TempDir,
        frames_per_chunk: u32,
        fail_chunks: Vec<usize>,
        invert_delay: bool,
    }

    impl FakeDecoder {
        fn new(frames_per_chunk: u32) -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
                frames_per_chunk,
                fail_chunks: Vec::new(),
                invert_delay: false,
            }
        }
    }

    #[async_trait]
    impl ChunkDecoder for FakeDecoder {
        async fn decode(
            &self,
            chunk: &Chunk,
            _cancel: watch::Receiver<bool>,
        ) -> MediaResult<Vec<DecodedFrame>> {
            if self.invert_delay {
                // Earlier chunks sleep longer, so completion order is the
                // reverse of chunk order.
                let delay = 40u64.saturating_sub(chunk.index as u64 * 10);
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            if self.fail_chunks.contains(&chunk.index) {
                return Err(MediaError::ffmpeg_failed("synthetic decode error", None, Some(1)));
            }

            let mut frames = Vec::new();
            for i in 0..self.frames_per_chunk {
                let path = self.dir.path().join(format!("c{}_f{}.jpg", chunk.index, i));
                tokio::fs::write(&path, format!("frame-{}-{}", chunk.index, i)).await?;
                frames.push(DecodedFrame {
                    frame_index: i,
                    timestamp: chunk.start_time + i as f64,
                    path,
                });
            }
            Ok(frames)
        }
    }

    /// Sink that records URLs and the largest batch it ever saw.
    #[derive(Default)]
    struct CollectingSink {
        max_batch: Mutex<usize>,
    }

    #[async_trait]
    impl FrameSink for CollectingSink {
        async fn store_batch(&self, frames: &[Frame]) -> MediaResult<Vec<String>> {
            let mut max = self.max_batch.lock().unwrap();
            *max = (*max).max(frames.len());
            Ok(frames
                .iter()
                .map(|f| format!("mem://chunk{}/frame{}", f.chunk_index, f.frame_index))
                .collect())
        }
    }

    fn test_chunks(n: usize) -> Vec<Chunk> {
        plan_chunks(n as f64 * 60.0, 60.0)
    }

    #[tokio::test]
    async fn frames_are_ordered_by_chunk_index_not_completion() {
        let mut decoder = FakeDecoder::new(2);
        decoder.invert_delay = true;
        let sink = Arc::new(CollectingSink::default());
        let (_tx, rx) = watch::channel(false);

        let pool = FrameExtractor::new(Arc::new(decoder), sink, 10, rx);
        let outcome = pool.run(&test_chunks(4), 4).await.unwrap();

        let expected: Vec<String> = (0..4)
            .flat_map(|c| (0..2).map(move |f| format!("mem://chunk{c}/frame{f}")))
            .collect();
        assert_eq!(outcome.frame_urls, expected);
        assert_eq!(outcome.partial_failures, 0);
    }

    #[tokio::test]
    async fn failed_chunk_is_skipped_and_counted() {
        let mut decoder = FakeDecoder::new(2);
        decoder.fail_chunks = vec![1];
        let sink = Arc::new(CollectingSink::default());
        let (_tx, rx) = watch::channel(false);

        let pool = FrameExtractor::new(Arc::new(decoder), sink, 10, rx);
        let outcome = pool.run(&test_chunks(3), 2).await.unwrap();

        assert_eq!(outcome.partial_failures, 1);
        assert_eq!(outcome.frame_urls.len(), 4);
        assert!(outcome.frame_urls.iter().all(|u| !u.contains("chunk1/")));
    }

    #[tokio::test]
    async fn sink_batches_never_exceed_batch_size() {
        let decoder = FakeDecoder::new(7);
        let sink = Arc::new(CollectingSink::default());
        let sink_dyn: Arc<dyn FrameSink> = sink.clone();
        let (_tx, rx) = watch::channel(false);

        let pool = FrameExtractor::new(Arc::new(decoder), sink_dyn, 3, rx);
        let outcome = pool.run(&test_chunks(2), 2).await.unwrap();

        assert_eq!(outcome.frame_urls.len(), 14);
        assert!(*sink.max_batch.lock().unwrap() <= 3);
    }

    #[tokio::test]
    async fn local_files_are_removed_after_flush() {
        let decoder = FakeDecoder::new(3);
        let dir = decoder.dir.path().to_path_buf();
        let sink = Arc::new(CollectingSink::default());
        let (_tx, rx) = watch::channel(false);

        let pool = FrameExtractor::new(Arc::new(decoder), sink, 2, rx);
        pool.run(&test_chunks(1), 1).await.unwrap();

        let remaining = std::fs::read_dir(&dir).unwrap().count();
        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn cancellation_stops_before_next_wave() {
        let decoder = FakeDecoder::new(1);
        let sink = Arc::new(CollectingSink::default());
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let pool = FrameExtractor::new(Arc::new(decoder), sink, 10, rx);
        let result = pool.run(&test_chunks(4), 2).await;

        assert!(matches!(result, Err(MediaError::Cancelled)));
    }

    #[tokio::test]
    async fn empty_plan_yields_empty_outcome() {
        let decoder = FakeDecoder::new(1);
        let sink = Arc::new(CollectingSink::default());
        let (_tx, rx) = watch::channel(false);

        let pool = FrameExtractor::new(Arc::new(decoder), sink, 10, rx);
        let outcome = pool.run(&[], 2).await.unwrap();

        assert!(outcome.frame_urls.is_empty());
        assert_eq!(outcome.partial_failures, 0);
    }
}
