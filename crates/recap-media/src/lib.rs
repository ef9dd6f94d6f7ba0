//! FFmpeg-based media processing: probing, chunk planning, and the bounded
//! parallel frame extraction pool.

pub mod chunks;
pub mod command;
pub mod error;
pub mod extractor;
pub mod probe;

pub use chunks::{effective_workers, plan_chunks};
pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use extractor::{
    extract, ChunkDecoder, DecodedFrame, FfmpegChunkDecoder, FrameExtractor, FrameSink,
    PoolOutcome,
};
pub use probe::{probe_video, VideoInfo};
