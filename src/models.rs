use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Category of skippable range being searched for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SegmentKind {
    Intro,
    /// Ending credits
    #[serde(alias = "Credits")]
    Outro,
}

impl SegmentKind {
    pub fn all() -> [SegmentKind; 2] {
        [SegmentKind::Intro, SegmentKind::Outro]
    }
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentKind::Intro => write!(f, "Intro"),
            SegmentKind::Outro => write!(f, "Outro"),
        }
    }
}

impl std::str::FromStr for SegmentKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "intro" | "introduction" => Ok(SegmentKind::Intro),
            "outro" | "credits" => Ok(SegmentKind::Outro),
            other => Err(anyhow::anyhow!("Unknown segment kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    Episode,
    Movie,
}

/// Detector that produced a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnalyzerKind {
    Chapter,
    Chromaprint,
    BlackFrame,
}

impl fmt::Display for AnalyzerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalyzerKind::Chapter => write!(f, "Chapter"),
            AnalyzerKind::Chromaprint => write!(f, "Chromaprint"),
            AnalyzerKind::BlackFrame => write!(f, "BlackFrame"),
        }
    }
}

/// One analyzable media file, snapshotted from the library for a single run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMedia {
    pub item_id: Uuid,
    pub series_name: String,
    pub season_number: Option<u32>,
    pub episode_number: Option<u32>,
    pub name: String,
    pub kind: MediaKind,
    pub path: PathBuf,
    /// Runtime in seconds
    pub duration: f64,
    /// End of the audio window fingerprinted when searching for intros
    pub intro_fingerprint_end: f64,
    /// Start of the audio window fingerprinted when searching for credits
    pub credits_fingerprint_start: f64,
    /// Attempt analysis even if the item is blacklisted, and never blacklist it
    pub skip_prevent_analyzing: bool,
}

impl QueuedMedia {
    pub fn is_episode(&self) -> bool {
        self.kind == MediaKind::Episode
    }

    pub fn is_movie(&self) -> bool {
        self.kind == MediaKind::Movie
    }

    /// Audio window `(start, end)` used for fingerprinting in the given mode
    pub fn fingerprint_window(&self, kind: SegmentKind) -> TimeRange {
        match kind {
            SegmentKind::Intro => TimeRange::new(0.0, self.intro_fingerprint_end),
            SegmentKind::Outro => TimeRange::new(self.credits_fingerprint_start, self.duration),
        }
    }
}

/// Work unit key: one season of a show, or one movie
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GroupKey {
    /// `None` groups episodes whose season could not be determined
    Season { series: String, season: Option<u32> },
    Movie(Uuid),
}

impl GroupKey {
    pub fn for_item(item: &QueuedMedia) -> Self {
        match item.kind {
            MediaKind::Episode => GroupKey::Season {
                series: item.series_name.clone(),
                season: item.season_number,
            },
            MediaKind::Movie => GroupKey::Movie(item.item_id),
        }
    }
}

/// Human readable group identity used in log lines
pub fn describe_group(items: &[QueuedMedia]) -> String {
    match items.first() {
        Some(first) if first.is_episode() => match first.season_number {
            Some(season) => format!("{} season {}", first.series_name, season),
            None => format!("{} (unknown season)", first.series_name),
        },
        Some(first) => format!("movie {}", first.name),
        None => "empty group".to_string(),
    }
}

/// A detected skippable range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaSegment {
    pub id: Uuid,
    pub item_id: Uuid,
    pub kind: SegmentKind,
    pub analyzer: AnalyzerKind,
    /// Seconds from the start of the item
    pub start: f64,
    pub end: f64,
    pub note: String,
    pub series_name: String,
}

impl MediaSegment {
    pub fn new(
        item: &QueuedMedia,
        kind: SegmentKind,
        analyzer: AnalyzerKind,
        range: TimeRange,
        note: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            item_id: item.item_id,
            kind,
            analyzer,
            start: range.start,
            end: range.end,
            note: note.into(),
            series_name: item.series_name.clone(),
        }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Persisted analyzer bookkeeping row, shared by detections and blacklist entries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentMetadata {
    pub id: Uuid,
    pub item_id: Uuid,
    /// Nil for blacklist rows
    pub segment_id: Uuid,
    #[serde(rename = "type")]
    pub kind: SegmentKind,
    /// None for blacklist-only rows
    pub analyzer_type: Option<AnalyzerKind>,
    pub analyzer_note: String,
    pub name: String,
    pub series_name: String,
    pub prevent_analyzing: bool,
}

impl SegmentMetadata {
    pub fn for_segment(segment: &MediaSegment, name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            item_id: segment.item_id,
            segment_id: segment.id,
            kind: segment.kind,
            analyzer_type: Some(segment.analyzer),
            analyzer_note: segment.note.clone(),
            name: name.to_string(),
            series_name: segment.series_name.clone(),
            prevent_analyzing: false,
        }
    }

    pub fn blacklist(item: &QueuedMedia, kind: SegmentKind, note: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            item_id: item.item_id,
            segment_id: Uuid::nil(),
            kind,
            analyzer_type: None,
            analyzer_note: note.into(),
            name: item.name.clone(),
            series_name: item.series_name.clone(),
            prevent_analyzing: true,
        }
    }
}

/// Time range in seconds
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn intersects(&self, other: &TimeRange) -> bool {
        (other.start > self.start && other.start < self.end)
            || (other.end > self.start && other.end < self.end)
            || (other.start <= self.start && other.end >= self.end)
    }

    /// Inclusive check against `[min, max]` seconds
    pub fn is_within(&self, min: f64, max: f64) -> bool {
        let duration = self.duration();
        duration >= min && duration <= max
    }
}

/// Longest run of timestamps where neighbours are at most `max_gap` apart.
///
/// Returns `None` for an empty input. A single timestamp yields a zero-length range.
pub fn find_contiguous(times: &[f64], max_gap: f64) -> Option<TimeRange> {
    if times.is_empty() {
        return None;
    }

    let mut sorted = times.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let mut best = TimeRange::new(sorted[0], sorted[0]);
    let mut current = best;

    for pair in sorted.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        if next - prev <= max_gap {
            current.end = next;
        } else {
            current = TimeRange::new(next, next);
        }

        if current.duration() > best.duration() {
            best = current;
        }
    }

    Some(best)
}
