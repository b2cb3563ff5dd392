//! Zip packing of sampled frames.

use std::io::{Cursor, Write};

use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{MediaError, MediaResult};
use crate::frames::FrameSet;

/// Extension used for sampled frames inside the archive.
pub const FRAME_EXTENSION: &str = "jpg";

/// An archive entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedImage {
    pub name: String,
    pub data: Vec<u8>,
}

impl NamedImage {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

/// Name the frames `frame_1.jpg` .. `frame_N.jpg` in extraction order.
pub fn frame_entries(frames: FrameSet) -> Vec<NamedImage> {
    frames
        .into_iter()
        .enumerate()
        .map(|(i, frame)| NamedImage::new(format!("frame_{}.{}", i + 1, FRAME_EXTENSION), frame.image))
        .collect()
}

/// Pack `entries` into an in-memory zip, preserving their order.
///
/// Timestamps are pinned so identical input yields identical bytes.
pub fn build_archive(entries: &[NamedImage]) -> MediaResult<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default());

    for entry in entries {
        debug!("Adding to ZIP: {} ({} bytes)", entry.name, entry.data.len());

        zip.start_file(entry.name.as_str(), options)
            .map_err(|e| MediaError::archive(format!("Failed to start ZIP entry: {}", e)))?;

        zip.write_all(&entry.data)
            .map_err(|e| MediaError::archive(format!("Failed to write ZIP entry: {}", e)))?;
    }

    let cursor = zip
        .finish()
        .map_err(|e| MediaError::archive(format!("Failed to finalize ZIP archive: {}", e)))?;

    Ok(cursor.into_inner())
}
