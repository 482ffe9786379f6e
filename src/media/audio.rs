use std::path::Path;
use tracing::debug;

use super::{path_arg, FfmpegProbe};
use crate::error::ProbeError;
use crate::models::TimeRange;

/// Seconds of audio covered by one chromaprint point
pub const SAMPLES_TO_SECONDS: f64 = 0.1238;

/// Fingerprint `window` with ffmpeg's chromaprint muxer in raw mode
pub async fn fingerprint(
    ffmpeg: &Path,
    media: &Path,
    window: TimeRange,
) -> Result<Vec<u32>, ProbeError> {
    let output = FfmpegProbe::run(
        ffmpeg,
        "ffmpeg",
        media,
        vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-ss".into(),
            format!("{:.3}", window.start),
            "-i".into(),
            path_arg(media),
            "-t".into(),
            format!("{:.3}", window.duration()),
            "-ac".into(),
            "2".into(),
            "-f".into(),
            "chromaprint".into(),
            "-fp_format".into(),
            "raw".into(),
            "-".into(),
        ],
    )
    .await?;

    let points = parse_raw_fingerprint(&output.stdout);
    if points.is_empty() {
        return Err(ProbeError::Fingerprint {
            path: media.to_path_buf(),
            reason: "ffmpeg produced no fingerprint points".to_string(),
        });
    }

    debug!("🎵 {} fingerprint points for {}", points.len(), media.display());
    Ok(points)
}

/// Run `silencedetect` over `window`
pub async fn detect_silence(
    ffmpeg: &Path,
    media: &Path,
    window: TimeRange,
    noise_db: i32,
    min_duration: f64,
) -> Result<Vec<TimeRange>, ProbeError> {
    let output = FfmpegProbe::run(
        ffmpeg,
        "ffmpeg",
        media,
        vec![
            "-hide_banner".into(),
            "-nostats".into(),
            "-ss".into(),
            format!("{:.3}", window.start),
            "-i".into(),
            path_arg(media),
            "-t".into(),
            format!("{:.3}", window.duration()),
            "-vn".into(),
            "-sn".into(),
            "-dn".into(),
            "-af".into(),
            format!("silencedetect=noise={}dB:duration={}", noise_db, min_duration),
            "-f".into(),
            "null".into(),
            "-".into(),
        ],
    )
    .await?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    let silence = parse_silence_output(&stderr, window.start);
    debug!("🔇 {} silence periods in {}", silence.len(), media.display());
    Ok(silence)
}

/// Decode little-endian 32-bit points; a trailing partial point is dropped
pub fn parse_raw_fingerprint(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Pair `silence_start`/`silence_end` log lines into ranges shifted by `offset`
pub fn parse_silence_output(stderr: &str, offset: f64) -> Vec<TimeRange> {
    let mut periods = Vec::new();
    let mut current_start: Option<f64> = None;

    for line in stderr.lines() {
        if let Some(start_str) = line.split("silence_start: ").nth(1) {
            if let Ok(start) = start_str.trim().parse::<f64>() {
                current_start = Some(start);
            }
        } else if let Some(end_str) = line.split("silence_end: ").nth(1) {
            let end = end_str
                .split_whitespace()
                .next()
                .and_then(|s| s.parse::<f64>().ok());

            if let (Some(start), Some(end)) = (current_start, end) {
                periods.push(TimeRange::new(offset + start, offset + end));
                current_start = None;
            }
        }
    }

    periods
}
