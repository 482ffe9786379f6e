use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::cache::FingerprintCache;
use super::{AnalysisResult, AnalysisStatus, MediaAnalyzer};
use crate::config::Config;
use crate::context::AnalysisContext;
use crate::media::audio::SAMPLES_TO_SECONDS;
use crate::media::MediaProbe;
use crate::models::{
    find_contiguous, AnalyzerKind, MediaKind, MediaSegment, QueuedMedia, SegmentKind, TimeRange,
};

/// Seconds before the end of an intro searched for a silence to snap to
const SILENCE_SEARCH_WINDOW: f64 = 15.0;

/// Tuning for pairwise fingerprint comparison
#[derive(Debug, Clone, Copy)]
pub struct ComparisonParams {
    /// Maximum differing bits for two points to match
    pub max_differences: u32,
    /// Largest gap in seconds bridged inside one contiguous range
    pub max_time_skip: f64,
    /// Tolerance in point value when probing the inverted index
    pub inverted_index_shift: u32,
    pub min_duration: f64,
    pub max_duration: f64,
}

impl ComparisonParams {
    pub fn from_config(config: &Config, kind: SegmentKind) -> Self {
        let (min_duration, max_duration) = config.duration_bounds(kind, MediaKind::Episode);
        Self {
            max_differences: config.algorithm.maximum_fingerprint_point_differences,
            max_time_skip: config.algorithm.maximum_time_skip,
            inverted_index_shift: config.algorithm.inverted_index_shift,
            min_duration,
            max_duration,
        }
    }
}

#[inline]
pub fn points_match(a: u32, b: u32, max_differences: u32) -> bool {
    (a ^ b).count_ones() <= max_differences
}

/// Point value -> last index it occurs at
pub fn build_inverted_index(fingerprint: &[u32]) -> HashMap<u32, usize> {
    fingerprint
        .iter()
        .enumerate()
        .map(|(index, point)| (*point, index))
        .collect()
}

/// Candidate alignments (`rhs index - lhs index`) between two fingerprints
fn candidate_shifts(lhs: &[u32], rhs: &[u32], value_shift: u32) -> BTreeSet<i64> {
    let rhs_index = build_inverted_index(rhs);
    let spread = value_shift as i32;

    let mut shifts = BTreeSet::new();
    for (lhs_index, point) in lhs.iter().enumerate() {
        for delta in -spread..=spread {
            if let Some(&rhs_index) = rhs_index.get(&point.wrapping_add_signed(delta)) {
                shifts.insert(rhs_index as i64 - lhs_index as i64);
            }
        }
    }

    if shifts.is_empty() {
        // No shared point values at all: try every alignment
        shifts.extend(-(lhs.len() as i64 - 1)..=(rhs.len() as i64 - 1));
    }
    shifts
}

/// Longest matching stretch of `lhs` and `rhs` when aligned at `shift`
fn contiguous_at_shift(
    lhs: &[u32],
    rhs: &[u32],
    shift: i64,
    params: &ComparisonParams,
) -> Option<(TimeRange, TimeRange)> {
    let (mut lhs_pos, mut rhs_pos) = if shift < 0 {
        (shift.unsigned_abs() as usize, 0)
    } else {
        (0, shift as usize)
    };

    let mut lhs_times = Vec::new();
    let mut rhs_times = Vec::new();
    while lhs_pos < lhs.len() && rhs_pos < rhs.len() {
        if points_match(lhs[lhs_pos], rhs[rhs_pos], params.max_differences) {
            lhs_times.push(lhs_pos as f64 * SAMPLES_TO_SECONDS);
            rhs_times.push(rhs_pos as f64 * SAMPLES_TO_SECONDS);
        }
        lhs_pos += 1;
        rhs_pos += 1;
    }

    let lhs_range = find_contiguous(&lhs_times, params.max_time_skip)?;
    let rhs_range = find_contiguous(&rhs_times, params.max_time_skip)?;
    Some((lhs_range, rhs_range))
}

/// Longest in-bounds shared range between two episodes, as `(lhs, rhs)`
/// offsets from the start of each fingerprint window.
pub fn compare_episodes(
    lhs: &[u32],
    rhs: &[u32],
    params: &ComparisonParams,
) -> Option<(TimeRange, TimeRange)> {
    if lhs.is_empty() || rhs.is_empty() {
        return None;
    }

    candidate_shifts(lhs, rhs, params.inverted_index_shift)
        .into_iter()
        .filter_map(|shift| contiguous_at_shift(lhs, rhs, shift, params))
        .filter(|(l, r)| {
            l.is_within(params.min_duration, params.max_duration)
                && r.is_within(params.min_duration, params.max_duration)
        })
        .fold(None, |best: Option<(TimeRange, TimeRange)>, candidate| match best {
            Some(b) if b.0.duration() >= candidate.0.duration() => Some(b),
            _ => Some(candidate),
        })
}

/// Shared ranges for a season.
///
/// Each episode is compared against the episodes after it until one shares a
/// range; every episode keeps the longest range it took part in.
pub fn find_shared_ranges(
    fingerprints: &[(Uuid, Vec<u32>)],
    params: &ComparisonParams,
) -> HashMap<Uuid, TimeRange> {
    let mut best: HashMap<Uuid, TimeRange> = HashMap::new();
    let mut keep_longest = |id: Uuid, range: TimeRange| {
        let entry = best.entry(id).or_insert(range);
        if range.duration() > entry.duration() {
            *entry = range;
        }
    };

    for (i, (current_id, current)) in fingerprints.iter().enumerate() {
        for (other_id, other) in &fingerprints[i + 1..] {
            if let Some((current_range, other_range)) = compare_episodes(current, other, params) {
                keep_longest(*current_id, current_range);
                keep_longest(*other_id, other_range);
                break;
            }
        }
    }

    best
}

/// Move the end of an intro back to the start of a silence near its end
pub fn snap_to_silence(intro: TimeRange, silence: &[TimeRange], min_silence: f64) -> TimeRange {
    let tail = TimeRange::new((intro.end - SILENCE_SEARCH_WINDOW).max(0.0), intro.end);

    silence
        .iter()
        .find(|s| tail.intersects(s) && s.duration() >= min_silence && s.start >= intro.start)
        .map_or(intro, |s| TimeRange::new(intro.start, s.start))
}

/// Finds intros and credits shared between episodes of a season by audio fingerprint
pub struct ChromaprintAnalyzer {
    probe: Arc<dyn MediaProbe>,
    config: Arc<Config>,
    cache: Option<FingerprintCache>,
}

impl ChromaprintAnalyzer {
    pub fn new(ctx: &AnalysisContext) -> Self {
        let cache = ctx
            .config
            .analysis
            .cache_fingerprints
            .then(|| FingerprintCache::new(ctx.config.storage.fingerprint_cache_dir.clone()));

        Self {
            probe: ctx.probe.clone(),
            config: ctx.config.clone(),
            cache,
        }
    }

    async fn fingerprint(&self, item: &QueuedMedia, kind: SegmentKind) -> Result<Vec<u32>> {
        let window = item.fingerprint_window(kind);

        if let Some(cache) = &self.cache {
            if let Some(points) = cache.load(item.item_id, kind, window).await {
                return Ok(points);
            }
        }

        let points = self.probe.fingerprint(&item.path, window).await?;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.save(item.item_id, kind, window, &points).await {
                warn!("Failed to cache fingerprint for {}: {}", item.name, e);
            }
        }
        Ok(points)
    }

    async fn trim_intro(&self, item: &QueuedMedia, intro: TimeRange) -> TimeRange {
        let algorithm = &self.config.algorithm;
        let tail = TimeRange::new((intro.end - SILENCE_SEARCH_WINDOW).max(0.0), intro.end);

        match self
            .probe
            .silence(
                &item.path,
                tail,
                algorithm.silence_detection_maximum_noise,
                algorithm.silence_detection_minimum_duration,
            )
            .await
        {
            Ok(silence) => {
                snap_to_silence(intro, &silence, algorithm.silence_detection_minimum_duration)
            }
            Err(e) => {
                debug!("Silence detection failed for {}: {}", item.name, e);
                intro
            }
        }
    }
}

#[async_trait]
impl MediaAnalyzer for ChromaprintAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::Chromaprint
    }

    async fn analyze(
        &self,
        items: Vec<QueuedMedia>,
        kind: SegmentKind,
        cancel: &CancellationToken,
    ) -> Result<AnalysisResult> {
        let episodes: Vec<&QueuedMedia> = items.iter().filter(|i| i.is_episode()).collect();
        if episodes.len() < 2 {
            debug!("Need at least two episodes to compare, got {}", episodes.len());
            return Ok(AnalysisResult::untouched(items));
        }

        let mut fingerprints = Vec::with_capacity(episodes.len());
        let mut last_error = String::new();
        for episode in &episodes {
            let fingerprint = tokio::select! {
                _ = cancel.cancelled() => {
                    return Ok(AnalysisResult::partition(items, HashMap::new(), AnalysisStatus::Cancelled));
                }
                fingerprint = self.fingerprint(episode, kind) => fingerprint,
            };

            match fingerprint {
                Ok(points) => fingerprints.push((episode.item_id, points)),
                Err(e) => {
                    debug!("Unable to fingerprint {}: {}", episode.name, e);
                    last_error = e.to_string();
                    fingerprints.push((episode.item_id, Vec::new()));
                }
            }
        }

        if fingerprints.iter().all(|(_, points)| points.is_empty()) {
            return Ok(AnalysisResult {
                unanalyzed: items,
                analyzed: Vec::new(),
                segments: HashMap::new(),
                status: AnalysisStatus::FingerprintFailed(last_error),
            });
        }

        let params = ComparisonParams::from_config(&self.config, kind);
        let ranges =
            tokio::task::spawn_blocking(move || find_shared_ranges(&fingerprints, &params)).await?;

        let mut segments = HashMap::new();
        let mut status = AnalysisStatus::Completed;
        for episode in &episodes {
            let Some(range) = ranges.get(&episode.item_id) else {
                continue;
            };

            if cancel.is_cancelled() {
                status = AnalysisStatus::Cancelled;
                break;
            }

            let window = episode.fingerprint_window(kind);
            let absolute = TimeRange::new(window.start + range.start, window.start + range.end);
            let range = match kind {
                SegmentKind::Intro => self.trim_intro(episode, absolute).await,
                SegmentKind::Outro => absolute,
            };

            segments.insert(
                episode.item_id,
                MediaSegment::new(
                    episode,
                    kind,
                    AnalyzerKind::Chromaprint,
                    range,
                    "Audio fingerprint match",
                ),
            );
        }

        info!(
            "🎵 Chromaprint matched {} of {} episodes for {}",
            segments.len(),
            episodes.len(),
            kind
        );
        Ok(AnalysisResult::partition(items, segments, status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ComparisonParams {
        ComparisonParams::from_config(&Config::default(), SegmentKind::Intro)
    }

    /// Deterministic pseudo-random points
    fn noise(seed: u32, len: usize) -> Vec<u32> {
        let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state
            })
            .collect()
    }

    /// `len` points of `shared` placed at `offset` inside unrelated noise
    fn with_shared(seed: u32, total: usize, offset: usize, shared: &[u32]) -> Vec<u32> {
        let mut points = noise(seed, total);
        points[offset..offset + shared.len()].copy_from_slice(shared);
        points
    }

    #[test]
    fn test_point_match_threshold() {
        let a = 0b0000_0000u32;
        assert!(points_match(a, 0b0011_1111, 6));
        assert!(!points_match(a, 0b0111_1111, 6));
    }

    #[test]
    fn test_inverted_index_keeps_last_index() {
        let index = build_inverted_index(&[7, 3, 7, 9]);
        assert_eq!(index[&7], 2);
        assert_eq!(index[&3], 1);
    }

    #[test]
    fn test_compare_finds_shared_intro_at_different_offsets() {
        // ~37s of shared audio
        let intro = noise(99, 300);
        let lhs = with_shared(1, 2000, 100, &intro);
        let rhs = with_shared(2, 2000, 400, &intro);

        let (l, r) = compare_episodes(&lhs, &rhs, &params()).unwrap();
        assert!((l.start - 100.0 * SAMPLES_TO_SECONDS).abs() <= 3.5);
        assert!((r.start - l.start - 300.0 * SAMPLES_TO_SECONDS).abs() < 1e-6);
        assert!(l.duration() >= 299.0 * SAMPLES_TO_SECONDS - 1e-6);
        assert!((l.duration() - r.duration()).abs() < 1e-6);
    }

    #[test]
    fn test_compare_rejects_short_match() {
        // ~6s shared, below the 15s minimum
        let intro = noise(5, 50);
        let lhs = with_shared(1, 1000, 10, &intro);
        let rhs = with_shared(2, 1000, 10, &intro);
        assert!(compare_episodes(&lhs, &rhs, &params()).is_none());
    }

    #[test]
    fn test_shared_ranges_cover_all_episodes() {
        let intro = noise(42, 250);
        let fingerprints: Vec<(Uuid, Vec<u32>)> = (0..3)
            .map(|i| (Uuid::new_v4(), with_shared(10 + i, 1500, 50 * i as usize, &intro)))
            .collect();

        let ranges = find_shared_ranges(&fingerprints, &params());
        assert_eq!(ranges.len(), 3);
        for (id, _) in &fingerprints {
            assert!(ranges[id].duration() >= 15.0);
        }
    }

    #[test]
    fn test_empty_fingerprints_are_skipped() {
        let intro = noise(42, 250);
        let fingerprints = vec![
            (Uuid::new_v4(), Vec::new()),
            (Uuid::new_v4(), with_shared(1, 1000, 0, &intro)),
            (Uuid::new_v4(), with_shared(2, 1000, 30, &intro)),
        ];

        let ranges = find_shared_ranges(&fingerprints, &params());
        assert_eq!(ranges.len(), 2);
        assert!(!ranges.contains_key(&fingerprints[0].0));
    }

    #[test]
    fn test_snap_to_silence() {
        let intro = TimeRange::new(10.0, 100.0);
        let silence = [
            TimeRange::new(50.0, 52.0),  // outside the last 15s
            TimeRange::new(90.0, 90.2),  // too short
            TimeRange::new(95.0, 101.0), // snaps here
        ];
        assert_eq!(snap_to_silence(intro, &silence, 0.33), TimeRange::new(10.0, 95.0));
        assert_eq!(snap_to_silence(intro, &[], 0.33), intro);
    }
}
