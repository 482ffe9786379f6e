use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{AnalysisResult, AnalysisStatus, MediaAnalyzer};
use crate::config::Config;
use crate::context::AnalysisContext;
use crate::media::{BlackFrame, MediaProbe};
use crate::models::{AnalyzerKind, MediaSegment, QueuedMedia, SegmentKind, TimeRange};

/// Largest gap between black frames that still counts as one run
const MAX_FRAME_GAP: f64 = 1.0;
/// A run must last this long to mark the start of credits
const MIN_RUN_LENGTH: f64 = 2.0;

/// Finds credits by the dark frames that usually surround them
pub struct BlackFrameAnalyzer {
    probe: Arc<dyn MediaProbe>,
    config: Arc<Config>,
}

impl BlackFrameAnalyzer {
    pub fn new(ctx: &AnalysisContext) -> Self {
        Self {
            probe: ctx.probe.clone(),
            config: ctx.config.clone(),
        }
    }

    async fn find_credits(&self, item: &QueuedMedia) -> Option<TimeRange> {
        let (min, max) = self.config.duration_bounds(SegmentKind::Outro, item.kind);
        let window = TimeRange::new((item.duration - max).max(0.0), item.duration);

        let frames = match self
            .probe
            .black_frames(
                &item.path,
                window,
                self.config.durations.black_frame_minimum_percentage,
            )
            .await
        {
            Ok(frames) => frames,
            Err(e) => {
                debug!("Black frame scan failed for {}: {}", item.name, e);
                return None;
            }
        };

        let start = first_black_run(&frames, MAX_FRAME_GAP, MIN_RUN_LENGTH)?;
        let credits = TimeRange::new(start, item.duration);
        credits.is_within(min, max).then_some(credits)
    }
}

#[async_trait]
impl MediaAnalyzer for BlackFrameAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::BlackFrame
    }

    async fn analyze(
        &self,
        items: Vec<QueuedMedia>,
        kind: SegmentKind,
        cancel: &CancellationToken,
    ) -> Result<AnalysisResult> {
        if kind != SegmentKind::Outro {
            return Ok(AnalysisResult::untouched(items));
        }

        let mut segments = HashMap::new();
        let mut status = AnalysisStatus::Completed;

        for item in &items {
            let credits = tokio::select! {
                _ = cancel.cancelled() => {
                    status = AnalysisStatus::Cancelled;
                    break;
                }
                credits = self.find_credits(item) => credits,
            };

            if let Some(range) = credits {
                debug!("🎬 {} credits from black frames at {:.1}s", item.name, range.start);
                segments.insert(
                    item.item_id,
                    MediaSegment::new(item, kind, AnalyzerKind::BlackFrame, range, "Black frame run"),
                );
            }
        }

        Ok(AnalysisResult::partition(items, segments, status))
    }
}

/// Start of the first run of frames spaced at most `max_gap` apart that lasts
/// at least `min_length` seconds
pub fn first_black_run(frames: &[BlackFrame], max_gap: f64, min_length: f64) -> Option<f64> {
    let mut times: Vec<f64> = frames.iter().map(|f| f.time).collect();
    times.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let mut iter = times.into_iter();
    let mut run_start = iter.next()?;
    let mut last = run_start;

    for time in iter {
        if time - last > max_gap {
            run_start = time;
        }
        last = time;

        if last - run_start >= min_length {
            return Some(run_start);
        }
    }

    None
}
