//! FFmpeg CLI wrapper for frame sampling.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building with stdout capture
//! - FFprobe frame count / frame rate probing
//! - The four-point frame sampler
//! - In-memory zip packing of sampled frames

pub mod archive;
pub mod command;
pub mod error;
pub mod frames;
pub mod stream_info;

pub use archive::{build_archive, frame_entries, NamedImage};
pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use frames::{
    sample_ordinals, FfmpegDecoder, FrameExtractor, FrameSet, SampleFrame, VideoDecoder,
    SAMPLE_COUNT,
};
pub use stream_info::{read_stream_info, StreamInfo};
