use std::path::Path;
use tracing::debug;

use super::{path_arg, BlackFrame, ChapterInfo, FfmpegProbe};
use crate::error::ProbeError;
use crate::models::TimeRange;

/// Read the container duration with ffprobe
pub async fn probe_duration(ffprobe: &Path, media: &Path) -> Result<f64, ProbeError> {
    let output = FfmpegProbe::run(
        ffprobe,
        "ffprobe",
        media,
        vec![
            "-v".into(),
            "quiet".into(),
            "-print_format".into(),
            "json".into(),
            "-show_format".into(),
            path_arg(media),
        ],
    )
    .await?;

    parse_duration_json(&String::from_utf8_lossy(&output.stdout))
}

/// Read chapter markers with ffprobe
pub async fn probe_chapters(ffprobe: &Path, media: &Path) -> Result<Vec<ChapterInfo>, ProbeError> {
    let output = FfmpegProbe::run(
        ffprobe,
        "ffprobe",
        media,
        vec![
            "-v".into(),
            "quiet".into(),
            "-print_format".into(),
            "json".into(),
            "-show_chapters".into(),
            path_arg(media),
        ],
    )
    .await?;

    let chapters = parse_chapters_json(&String::from_utf8_lossy(&output.stdout))?;
    debug!("📖 {} chapters in {}", chapters.len(), media.display());
    Ok(chapters)
}

/// Run the `blackframe` filter over `window`
pub async fn detect_black_frames(
    ffmpeg: &Path,
    media: &Path,
    window: TimeRange,
    min_percentage: u32,
) -> Result<Vec<BlackFrame>, ProbeError> {
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
            "-an".into(),
            "-dn".into(),
            "-sn".into(),
            "-vf".into(),
            format!("blackframe=amount={}", min_percentage),
            "-f".into(),
            "null".into(),
            "-".into(),
        ],
    )
    .await?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    Ok(parse_blackframe_output(&stderr, window.start, min_percentage))
}

pub fn parse_duration_json(json: &str) -> Result<f64, ProbeError> {
    let data: serde_json::Value =
        serde_json::from_str(json).map_err(|e| ProbeError::Parse(e.to_string()))?;

    data["format"]["duration"]
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| ProbeError::Parse("missing format.duration".to_string()))
}

pub fn parse_chapters_json(json: &str) -> Result<Vec<ChapterInfo>, ProbeError> {
    let data: serde_json::Value =
        serde_json::from_str(json).map_err(|e| ProbeError::Parse(e.to_string()))?;

    let mut chapters: Vec<ChapterInfo> = data["chapters"]
        .as_array()
        .map(|chapters| {
            chapters
                .iter()
                .filter_map(|chapter| {
                    let timestamp = chapter["start_time"].as_str()?.parse::<f64>().ok()?;
                    let title = chapter["tags"]["title"].as_str().unwrap_or("").to_string();
                    Some(ChapterInfo { title, timestamp })
                })
                .collect()
        })
        .unwrap_or_default();

    chapters.sort_by(|a, b| {
        a.timestamp
            .partial_cmp(&b.timestamp)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    Ok(chapters)
}

fn field_after<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    line.split(key).nth(1)?.split_whitespace().next()
}

/// Parse `blackframe` filter log lines, shifting times by `offset`
pub fn parse_blackframe_output(stderr: &str, offset: f64, min_percentage: u32) -> Vec<BlackFrame> {
    stderr
        .lines()
        .filter(|line| line.contains("blackframe"))
        .filter_map(|line| {
            let percentage = field_after(line, "pblack:")?.parse::<u32>().ok()?;
            let time = field_after(line, " t:")?.parse::<f64>().ok()?;
            Some(BlackFrame {
                time: offset + time,
                percentage,
            })
        })
        .filter(|frame| frame.percentage >= min_percentage)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chapters_sorted_with_blank_titles() {
        let json = r#"{
            "chapters": [
                {"id": 1, "start_time": "90.500000", "end_time": "1200.0", "tags": {"title": "Episode"}},
                {"id": 0, "start_time": "0.000000", "end_time": "90.5", "tags": {"title": "Opening"}},
                {"id": 2, "start_time": "1200.000000", "end_time": "1290.0"}
            ]
        }"#;

        let chapters = parse_chapters_json(json).unwrap();
        assert_eq!(chapters.len(), 3);
        assert_eq!(chapters[0].title, "Opening");
        assert_eq!(chapters[1].timestamp, 90.5);
        assert_eq!(chapters[2].title, "");
    }

    #[test]
    fn test_parse_chapters_missing_section() {
        assert!(parse_chapters_json("{}").unwrap().is_empty());
        assert!(parse_chapters_json("not json").is_err());
    }

    #[test]
    fn test_parse_duration() {
        let json = r#"{"format": {"filename": "a.mkv", "duration": "1425.312000"}}"#;
        assert_eq!(parse_duration_json(json).unwrap(), 1425.312);
        assert!(parse_duration_json(r#"{"format": {}}"#).is_err());
    }

    #[test]
    fn test_parse_blackframe_output() {
        let stderr = "\
[Parsed_blackframe_0 @ 0x55d] frame:12 pblack:99 pts:12012 t:0.500500 type:P last_keyframe:0
[Parsed_blackframe_0 @ 0x55d] frame:13 pblack:80 pts:13013 t:0.542208 type:B last_keyframe:0
frame=  240 fps=0.0 q=-0.0 size=N/A time=00:00:10.01
[Parsed_blackframe_0 @ 0x55d] frame:14 pblack:85 pts:14014 t:0.583917 type:B last_keyframe:0";

        let frames = parse_blackframe_output(stderr, 1200.0, 85);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].percentage, 99);
        assert!((frames[0].time - 1200.5005).abs() < 1e-9);
        assert_eq!(frames[1].percentage, 85);
    }
}
