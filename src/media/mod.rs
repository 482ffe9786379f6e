//! Media probing: the raw signals detectors work from.
//!
//! Detectors never talk to ffmpeg directly; they go through [`MediaProbe`].

pub mod audio;
pub mod video;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Output;

use crate::config::ToolsConfig;
use crate::error::ProbeError;
use crate::models::TimeRange;

/// Represents a single chapter marker in a media file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChapterInfo {
    /// Chapter title/name
    pub title: String,
    /// Timestamp in seconds from start of the file
    pub timestamp: f64,
}

/// A decoded frame whose black-pixel share passed the requested threshold
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlackFrame {
    /// Seconds from the start of the file
    pub time: f64,
    /// Percentage of black pixels in the frame
    pub percentage: u32,
}

/// Source of chapter, audio and luminance signals for a media file
#[async_trait]
pub trait MediaProbe: Send + Sync {
    /// Runtime in seconds
    async fn duration(&self, path: &Path) -> Result<f64, ProbeError>;

    /// Chapter markers ordered by timestamp
    async fn chapters(&self, path: &Path) -> Result<Vec<ChapterInfo>, ProbeError>;

    /// Raw 32-bit chromaprint points covering `window`
    async fn fingerprint(&self, path: &Path, window: TimeRange) -> Result<Vec<u32>, ProbeError>;

    /// Silent ranges inside `window`, in absolute seconds
    async fn silence(
        &self,
        path: &Path,
        window: TimeRange,
        noise_db: i32,
        min_duration: f64,
    ) -> Result<Vec<TimeRange>, ProbeError>;

    /// Frames inside `window` with at least `min_percentage` black pixels
    async fn black_frames(
        &self,
        path: &Path,
        window: TimeRange,
        min_percentage: u32,
    ) -> Result<Vec<BlackFrame>, ProbeError>;
}

/// [`MediaProbe`] backed by the ffmpeg/ffprobe command line tools
#[derive(Debug, Clone)]
pub struct FfmpegProbe {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegProbe {
    pub fn new(tools: &ToolsConfig) -> Self {
        Self {
            ffmpeg: tools.ffmpeg_path.clone(),
            ffprobe: tools.ffprobe_path.clone(),
        }
    }

    pub(crate) async fn run(
        program: &Path,
        tool: &'static str,
        media: &Path,
        args: Vec<String>,
    ) -> Result<Output, ProbeError> {
        let output = tokio::process::Command::new(program)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProbeError::ToolFailed {
                tool,
                path: media.to_path_buf(),
                message: stderr.lines().last().unwrap_or("unknown error").to_string(),
            });
        }

        Ok(output)
    }
}

impl Default for FfmpegProbe {
    fn default() -> Self {
        Self::new(&ToolsConfig::default())
    }
}

#[async_trait]
impl MediaProbe for FfmpegProbe {
    async fn duration(&self, path: &Path) -> Result<f64, ProbeError> {
        video::probe_duration(&self.ffprobe, path).await
    }

    async fn chapters(&self, path: &Path) -> Result<Vec<ChapterInfo>, ProbeError> {
        video::probe_chapters(&self.ffprobe, path).await
    }

    async fn fingerprint(&self, path: &Path, window: TimeRange) -> Result<Vec<u32>, ProbeError> {
        audio::fingerprint(&self.ffmpeg, path, window).await
    }

    async fn silence(
        &self,
        path: &Path,
        window: TimeRange,
        noise_db: i32,
        min_duration: f64,
    ) -> Result<Vec<TimeRange>, ProbeError> {
        audio::detect_silence(&self.ffmpeg, path, window, noise_db, min_duration).await
    }

    async fn black_frames(
        &self,
        path: &Path,
        window: TimeRange,
        min_percentage: u32,
    ) -> Result<Vec<BlackFrame>, ProbeError> {
        video::detect_black_frames(&self.ffmpeg, path, window, min_percentage).await
    }
}

pub(crate) fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}
