//! Four-point frame sampling.
//!
//! A video of `T` frames is sampled at ordinals `0`, `T/3`, `2T/3` and
//! `T-1` (integer division), which always includes the first and last
//! frame. Short videos may produce repeated ordinals; each one is decoded
//! and kept, so a sample set always has exactly [`SAMPLE_COUNT`] frames.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::stream_info::{read_stream_info, StreamInfo};

/// Number of frames sampled from every video.
pub const SAMPLE_COUNT: usize = 4;

/// Ordinals to sample from a video with `total_frames` frames.
///
/// Returned in ascending order, each within `[0, total_frames - 1]`.
pub fn sample_ordinals(total_frames: i64) -> MediaResult<[u64; SAMPLE_COUNT]> {
    if total_frames <= 0 {
        return Err(MediaError::EmptyVideo(total_frames));
    }

    let t = total_frames as u64;
    Ok([0, t / 3, 2 * t / 3, t - 1])
}

/// One decoded sample.
#[derive(Debug)]
pub struct SampleFrame {
    /// 0-based frame ordinal in decode order
    pub ordinal: u64,
    /// Encoded JPEG image
    pub image: Vec<u8>,
}

/// The frames sampled from one video, in ascending ordinal order.
///
/// Consumed by value; a set is produced once per video and cannot be
/// replayed.
#[derive(Debug)]
pub struct FrameSet {
    stream: StreamInfo,
    frames: Vec<SampleFrame>,
}

impl FrameSet {
    /// Stream details the samples were computed from.
    pub fn stream(&self) -> StreamInfo {
        self.stream
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn ordinals(&self) -> Vec<u64> {
        self.frames.iter().map(|f| f.ordinal).collect()
    }
}

impl IntoIterator for FrameSet {
    type Item = SampleFrame;
    type IntoIter = std::vec::IntoIter<SampleFrame>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.into_iter()
    }
}

/// Decoding backend used by [`FrameExtractor`].
#[async_trait]
pub trait VideoDecoder: Send + Sync {
    /// Read the frame count and frame rate of the first video stream.
    async fn stream_info(&self, source: &Path) -> MediaResult<StreamInfo>;

    /// Decode the frame at `ordinal` into an encoded image. `stream` is what
    /// [`stream_info`](Self::stream_info) reported for the same source.
    async fn decode_frame(
        &self,
        source: &Path,
        stream: &StreamInfo,
        ordinal: u64,
    ) -> MediaResult<Vec<u8>>;
}

/// Decoder backed by the `ffprobe`/`ffmpeg` binaries.
#[derive(Debug, Default, Clone)]
pub struct FfmpegDecoder {
    runner: FfmpegRunner,
}

impl FfmpegDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VideoDecoder for FfmpegDecoder {
    async fn stream_info(&self, source: &Path) -> MediaResult<StreamInfo> {
        read_stream_info(source).await
    }

    async fn decode_frame(
        &self,
        source: &Path,
        stream: &StreamInfo,
        ordinal: u64,
    ) -> MediaResult<Vec<u8>> {
        let cmd = FfmpegCommand::to_stdout(source)
            .seek_frame(ordinal, stream.fps)
            .jpeg_image()
            .log_level("error");

        self.runner.run_capture(&cmd).await
    }
}

/// Samples [`SAMPLE_COUNT`] frames out of an in-memory video.
#[derive(Clone)]
pub struct FrameExtractor {
    decoder: Arc<dyn VideoDecoder>,
    work_dir: PathBuf,
}

impl FrameExtractor {
    /// Create an extractor that stages input under `work_dir`.
    pub fn new(decoder: Arc<dyn VideoDecoder>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            decoder,
            work_dir: work_dir.into(),
        }
    }

    /// Extractor using the system FFmpeg.
    pub fn ffmpeg(work_dir: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(FfmpegDecoder::new()), work_dir)
    }

    /// Decode `bytes` and return the four sample frames.
    ///
    /// The buffer is staged in a temporary file that is removed when this
    /// returns, whatever the outcome.
    pub async fn extract(&self, bytes: &[u8]) -> MediaResult<FrameSet> {
        if bytes.is_empty() {
            return Err(MediaError::invalid_video("empty input buffer"));
        }

        tokio::fs::create_dir_all(&self.work_dir).await?;
        let staged = tempfile::Builder::new()
            .prefix("clipzip-")
            .suffix(".video")
            .tempfile_in(&self.work_dir)?;
        tokio::fs::write(staged.path(), bytes).await?;

        let stream = self.decoder.stream_info(staged.path()).await?;
        info!(
            "Video loaded: {} frames, {:.2} fps",
            stream.frame_count, stream.fps
        );

        let ordinals = sample_ordinals(stream.frame_count)?;
        debug!("Sampling frames at {:?}", ordinals);

        let mut frames = Vec::with_capacity(SAMPLE_COUNT);
        for ordinal in ordinals {
            let image = self
                .decoder
                .decode_frame(staged.path(), &stream, ordinal)
                .await?;
            if image.is_empty() {
                return Err(MediaError::invalid_video(format!(
                    "frame {} could not be decoded",
                    ordinal
                )));
            }
            frames.push(SampleFrame { ordinal, image });
        }

        Ok(FrameSet { stream, frames })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_sample_ordinals_300() {
        assert_eq!(sample_ordinals(300).unwrap(), [0, 100, 200, 299]);
    }

    #[test]
    fn test_sample_ordinals_truncate() {
        assert_eq!(sample_ordinals(10).unwrap(), [0, 3, 6, 9]);
        assert_eq!(sample_ordinals(1001).unwrap(), [0, 333, 667, 1000]);
    }

    #[test]
    fn test_sample_ordinals_in_range_and_ascending() {
        for t in 1..=2000i64 {
            let ordinals = sample_ordinals(t).unwrap();
            assert!(ordinals.windows(2).all(|w| w[0] <= w[1]), "t={}", t);
            assert!(ordinals.iter().all(|&o| o <= (t - 1) as u64), "t={}", t);
            assert_eq!(ordinals[0], 0);
            assert_eq!(ordinals[3], (t - 1) as u64);
        }
    }

    #[test]
    fn test_sample_ordinals_short_videos_collide() {
        assert_eq!(sample_ordinals(1).unwrap(), [0, 0, 0, 0]);
        assert_eq!(sample_ordinals(2).unwrap(), [0, 0, 1, 1]);
        assert_eq!(sample_ordinals(3).unwrap(), [0, 1, 2, 2]);
    }

    #[test]
    fn test_sample_ordinals_rejects_empty() {
        assert!(matches!(sample_ordinals(0), Err(MediaError::EmptyVideo(0))));
        assert!(matches!(sample_ordinals(-5), Err(MediaError::EmptyVideo(-5))));
    }

    /// Decoder that reports a fixed frame count and records decode order.
    struct ScriptedDecoder {
        frame_count: i64,
        decoded: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl VideoDecoder for ScriptedDecoder {
        async fn stream_info(&self, source: &Path) -> MediaResult<StreamInfo> {
            assert!(source.exists());
            Ok(StreamInfo {
                frame_count: self.frame_count,
                fps: 30.0,
            })
        }

        async fn decode_frame(
            &self,
            _source: &Path,
            stream: &StreamInfo,
            ordinal: u64,
        ) -> MediaResult<Vec<u8>> {
            assert_eq!(stream.frame_count, self.frame_count);
            self.decoded.lock().unwrap().push(ordinal);
            Ok(format!("jpeg-{}", ordinal).into_bytes())
        }
    }

    #[tokio::test]
    async fn test_extract_decodes_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let decoder = Arc::new(ScriptedDecoder {
            frame_count: 300,
            decoded: Mutex::new(Vec::new()),
        });
        let extractor = FrameExtractor::new(decoder.clone(), dir.path());

        let frames = extractor.extract(b"fake video").await.unwrap();
        assert_eq!(frames.ordinals(), vec![0, 100, 200, 299]);
        assert_eq!(frames.stream().frame_count, 300);
        assert_eq!(frames.stream().fps, 30.0);
        assert_eq!(*decoder.decoded.lock().unwrap(), vec![0, 100, 200, 299]);

        let images: Vec<Vec<u8>> = frames.into_iter().map(|f| f.image).collect();
        assert_eq!(images[3], b"jpeg-299".to_vec());

        // staged input is cleaned up
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_extract_rejects_frameless_video() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = FrameExtractor::new(
            Arc::new(ScriptedDecoder {
                frame_count: 0,
                decoded: Mutex::new(Vec::new()),
            }),
            dir.path(),
        );

        assert!(matches!(
            extractor.extract(b"fake video").await,
            Err(MediaError::EmptyVideo(0))
        ));
    }

    #[tokio::test]
    async fn test_extract_rejects_empty_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = FrameExtractor::new(
            Arc::new(ScriptedDecoder {
                frame_count: 10,
                decoded: Mutex::new(Vec::new()),
            }),
            dir.path(),
        );

        assert!(matches!(
            extractor.extract(b"").await,
            Err(MediaError::InvalidVideo(_))
        ));
    }
}
