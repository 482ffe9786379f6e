use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{AnalysisResult, AnalysisStatus, MediaAnalyzer};
use crate::config::Config;
use crate::context::AnalysisContext;
use crate::media::{ChapterInfo, MediaProbe};
use crate::models::{AnalyzerKind, MediaSegment, QueuedMedia, SegmentKind, TimeRange};

/// Finds segments from chapter titles embedded in the container
pub struct ChapterAnalyzer {
    probe: Arc<dyn MediaProbe>,
    config: Arc<Config>,
    intro_pattern: Regex,
    credits_pattern: Regex,
}

impl ChapterAnalyzer {
    pub fn new(ctx: &AnalysisContext) -> Result<Self> {
        Ok(Self {
            probe: ctx.probe.clone(),
            config: ctx.config.clone(),
            intro_pattern: ctx.config.intro_chapter_regex()?,
            credits_pattern: ctx.config.credits_chapter_regex()?,
        })
    }

    fn pattern(&self, kind: SegmentKind) -> &Regex {
        match kind {
            SegmentKind::Intro => &self.intro_pattern,
            SegmentKind::Outro => &self.credits_pattern,
        }
    }
}

#[async_trait]
impl MediaAnalyzer for ChapterAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::Chapter
    }

    async fn analyze(
        &self,
        items: Vec<QueuedMedia>,
        kind: SegmentKind,
        cancel: &CancellationToken,
    ) -> Result<AnalysisResult> {
        let mut segments = HashMap::new();
        let mut status = AnalysisStatus::Completed;

        for item in &items {
            if cancel.is_cancelled() {
                status = AnalysisStatus::Cancelled;
                break;
            }

            let chapters = match self.probe.chapters(&item.path).await {
                Ok(chapters) => chapters,
                Err(e) => {
                    debug!("No chapters for {}: {}", item.name, e);
                    continue;
                }
            };

            let bounds = self.config.duration_bounds(kind, item.kind);
            if let Some((range, title)) =
                find_matching_chapter(&chapters, item.duration, kind, self.pattern(kind), bounds)
            {
                debug!(
                    "📖 {} {} from chapter '{}' ({:.1}s - {:.1}s)",
                    item.name, kind, title, range.start, range.end
                );
                let note = format!("Chapter '{}'", title);
                segments.insert(
                    item.item_id,
                    MediaSegment::new(item, kind, AnalyzerKind::Chapter, range, note),
                );
            }
        }

        Ok(AnalysisResult::partition(items, segments, status))
    }
}

/// Whether `title` names a segment. A keyword immediately followed by "End"
/// (e.g. "Intro End") marks a boundary, not the segment itself.
fn title_matches(pattern: &Regex, title: &str) -> bool {
    let title = title.trim();
    if title.is_empty() {
        return false;
    }

    pattern.find_iter(title).any(|m| {
        let rest = title[m.end()..].trim_start();
        !rest.to_lowercase().starts_with("end")
    })
}

/// First chapter (forward for intros, backward for credits) that names the
/// segment, fits `bounds` and is not followed by another match.
pub fn find_matching_chapter(
    chapters: &[ChapterInfo],
    duration: f64,
    kind: SegmentKind,
    pattern: &Regex,
    bounds: (f64, f64),
) -> Option<(TimeRange, String)> {
    let (min, max) = bounds;
    let range_of = |i: usize| {
        let end = chapters.get(i + 1).map_or(duration, |next| next.timestamp);
        TimeRange::new(chapters[i].timestamp, end)
    };
    let matches_at = |i: Option<usize>| {
        i.and_then(|i| chapters.get(i))
            .is_some_and(|c| title_matches(pattern, &c.title))
    };

    let order: Box<dyn Iterator<Item = usize>> = match kind {
        SegmentKind::Intro => Box::new(0..chapters.len()),
        SegmentKind::Outro => Box::new((0..chapters.len()).rev()),
    };

    for i in order {
        let chapter = &chapters[i];
        if chapter.title.trim().is_empty() {
            continue;
        }

        let range = range_of(i);
        if !range.is_within(min, max) || !title_matches(pattern, &chapter.title) {
            continue;
        }

        let adjacent = match kind {
            SegmentKind::Intro => Some(i + 1),
            SegmentKind::Outro => i.checked_sub(1),
        };
        if matches_at(adjacent) {
            debug!("Ignoring ambiguous chapter '{}'", chapter.title);
            continue;
        }

        return Some((range, chapter.title.clone()));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chapters(list: &[(&str, f64)]) -> Vec<ChapterInfo> {
        list.iter()
            .map(|(title, timestamp)| ChapterInfo {
                title: title.to_string(),
                timestamp: *timestamp,
            })
            .collect()
    }

    fn intro_pattern() -> Regex {
        Config::default().intro_chapter_regex().unwrap()
    }

    fn credits_pattern() -> Regex {
        Config::default().credits_chapter_regex().unwrap()
    }

    #[test]
    fn test_intro_chapter_found_forward() {
        let list = chapters(&[("Recap", 0.0), ("Opening", 60.0), ("Part A", 150.0), ("Part B", 800.0)]);
        let (range, title) =
            find_matching_chapter(&list, 1400.0, SegmentKind::Intro, &intro_pattern(), (15.0, 120.0))
                .unwrap();
        assert_eq!(title, "Opening");
        assert_eq!(range, TimeRange::new(60.0, 150.0));
    }

    #[test]
    fn test_credits_last_chapter_runs_to_duration() {
        let list = chapters(&[("Intro", 0.0), ("Episode", 90.0), ("Credits", 1310.0)]);
        let (range, _) =
            find_matching_chapter(&list, 1400.0, SegmentKind::Outro, &credits_pattern(), (15.0, 240.0))
                .unwrap();
        assert_eq!(range, TimeRange::new(1310.0, 1400.0));
    }

    #[test]
    fn test_final_end_chapter_is_credits() {
        let list = chapters(&[("Episode", 0.0), ("End", 1300.0)]);
        let (range, title) =
            find_matching_chapter(&list, 1400.0, SegmentKind::Outro, &credits_pattern(), (15.0, 240.0))
                .unwrap();
        assert_eq!(title, "End");
        assert_eq!(range, TimeRange::new(1300.0, 1400.0));

        assert!(title_matches(&credits_pattern(), "Ending"));
        assert!(!title_matches(&credits_pattern(), "Credits End"));
    }

    #[test]
    fn test_out_of_bounds_and_blank_titles_ignored() {
        // Intro chapter is 200s long, over the 120s maximum
        let list = chapters(&[("", 0.0), ("Intro", 10.0), ("Story", 210.0)]);
        assert!(
            find_matching_chapter(&list, 1400.0, SegmentKind::Intro, &intro_pattern(), (15.0, 120.0))
                .is_none()
        );
    }

    #[test]
    fn test_adjacent_match_is_ambiguous() {
        let list = chapters(&[("Intro", 0.0), ("Opening", 30.0), ("Story", 90.0)]);
        let (range, title) =
            find_matching_chapter(&list, 1400.0, SegmentKind::Intro, &intro_pattern(), (15.0, 120.0))
                .unwrap();
        // The first is followed by another intro chapter, so the second wins
        assert_eq!(title, "Opening");
        assert_eq!(range, TimeRange::new(30.0, 90.0));
    }

    #[test]
    fn test_title_matching() {
        let pattern = intro_pattern();
        assert!(title_matches(&pattern, "Intro"));
        assert!(title_matches(&pattern, "opening theme"));
        assert!(!title_matches(&pattern, "Intro End"));
        assert!(!title_matches(&pattern, "Introspection"));
        assert!(!title_matches(&pattern, "   "));
    }
}
