use anyhow::Result;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{Config, DurationConfig, SkippedShow};
use crate::context::AnalysisContext;
use crate::library::LibraryItem;
use crate::models::{GroupKey, MediaKind, QueuedMedia, SegmentKind};

/// Groups of media waiting for analysis, in a stable order
pub type AnalysisQueue = BTreeMap<GroupKey, Vec<QueuedMedia>>;

/// Episodes shorter than this are fingerprinted in full
const PERCENT_WINDOW_MIN_DURATION: f64 = 5.0 * 60.0;

/// Skip lists parsed once per queue build
struct Exclusions {
    shows: Vec<SkippedShow>,
    movies: Vec<String>,
}

impl Exclusions {
    fn from_config(config: &Config) -> Self {
        Self {
            shows: config.skipped_shows(),
            movies: config.skipped_movies(),
        }
    }

    fn show_skipped(&self, series: &str, season: Option<u32>) -> bool {
        self.shows.iter().any(|show| show.matches(series, season))
    }

    fn movie_skipped(&self, name: &str, title: &str) -> bool {
        self.movies.iter().any(|movie| {
            movie.eq_ignore_ascii_case(name.trim()) || movie.eq_ignore_ascii_case(title.trim())
        })
    }
}

/// Builds and filters the analysis queue
pub struct QueueManager {
    ctx: AnalysisContext,
    forced: HashSet<Uuid>,
}

impl QueueManager {
    pub fn new(ctx: AnalysisContext) -> Self {
        Self {
            ctx,
            forced: HashSet::new(),
        }
    }

    /// Items that are analyzed even when blacklisted, and never blacklisted themselves
    pub fn with_forced_items(mut self, ids: impl IntoIterator<Item = Uuid>) -> Self {
        self.forced.extend(ids);
        self
    }

    /// Enumerate the library into groups for `kind`
    pub async fn build_queue(&self, kind: SegmentKind) -> Result<AnalysisQueue> {
        let config = &self.ctx.config;
        let libraries = config.selected_library_names();
        let items = self.ctx.library.list_items(&libraries).await?;
        let exclusions = Exclusions::from_config(config);

        let mut queue = AnalysisQueue::new();
        for item in items {
            if let Some(queued) = self.queue_item(item, &exclusions) {
                queue.entry(GroupKey::for_item(&queued)).or_default().push(queued);
            }
        }

        for group in queue.values_mut() {
            group.sort_by(|a, b| {
                a.episode_number
                    .cmp(&b.episode_number)
                    .then_with(|| a.name.cmp(&b.name))
            });
        }

        let total: usize = queue.values().map(Vec::len).sum();
        info!("📋 Queued {} items in {} groups for {}", total, queue.len(), kind);
        Ok(queue)
    }

    fn queue_item(&self, item: LibraryItem, exclusions: &Exclusions) -> Option<QueuedMedia> {
        let config = &self.ctx.config;

        let Some(path) = item.path.filter(|p| !p.as_os_str().is_empty()) else {
            debug!("Skipping {}: no usable path", item.name);
            return None;
        };
        if item.duration <= 0.0 {
            debug!("Skipping {}: unknown duration", item.name);
            return None;
        }

        match item.kind {
            MediaKind::Episode => {
                if exclusions.show_skipped(&item.series_name, item.season_number) {
                    debug!("Skipping {} ({}): show excluded", item.name, item.series_name);
                    return None;
                }
                if item.season_number == Some(0) && !config.analysis.analyze_season_zero {
                    debug!("Skipping special {} of {}", item.name, item.series_name);
                    return None;
                }
            }
            MediaKind::Movie => {
                if exclusions.movie_skipped(&item.name, &item.series_name) {
                    debug!("Skipping movie {}: excluded", item.name);
                    return None;
                }
            }
        }

        let (intro_fingerprint_end, credits_fingerprint_start) =
            fingerprint_windows(item.duration, item.kind, &config.durations);

        Some(QueuedMedia {
            item_id: item.item_id,
            series_name: item.series_name,
            season_number: item.season_number,
            episode_number: item.episode_number,
            name: item.name,
            kind: item.kind,
            path,
            duration: item.duration,
            intro_fingerprint_end,
            credits_fingerprint_start,
            skip_prevent_analyzing: self.forced.contains(&item.item_id),
        })
    }

    /// Drop items deleted from the library since the queue was built
    pub async fn verify_group(
        &self,
        items: Vec<QueuedMedia>,
        kind: SegmentKind,
    ) -> Result<Vec<QueuedMedia>> {
        let mut verified = Vec::with_capacity(items.len());
        for item in items {
            if self.ctx.library.item_exists(item.item_id).await? {
                verified.push(item);
            } else {
                debug!("{} was removed before {} analysis", item.name, kind);
            }
        }
        Ok(verified)
    }

    /// Drop blacklisted items unless blacklisting is off or the item is forced
    pub async fn filter_by_blacklist(
        &self,
        items: Vec<QueuedMedia>,
        kind: SegmentKind,
    ) -> Result<Vec<QueuedMedia>> {
        if !self.ctx.config.analysis.enable_blacklist {
            return Ok(items);
        }

        let blacklisted = self.ctx.blacklist.blacklisted_ids(kind).await?;
        Ok(items
            .into_iter()
            .filter(|item| item.skip_prevent_analyzing || !blacklisted.contains(&item.item_id))
            .collect())
    }

    /// Drop items that already carry a `kind` segment.
    ///
    /// The flag is false when every item had one.
    pub async fn filter_by_existing_segments(
        &self,
        items: Vec<QueuedMedia>,
        kind: SegmentKind,
    ) -> Result<(Vec<QueuedMedia>, bool)> {
        let mut remaining = Vec::with_capacity(items.len());
        for item in items {
            if !self.ctx.segments.has_segment(item.item_id, kind).await? {
                remaining.push(item);
            }
        }
        let has_unanalyzed = !remaining.is_empty();
        Ok((remaining, has_unanalyzed))
    }
}

/// `(intro_fingerprint_end, credits_fingerprint_start)` in seconds
pub fn fingerprint_windows(duration: f64, kind: MediaKind, durations: &DurationConfig) -> (f64, f64) {
    let intro_window = if duration >= PERCENT_WINDOW_MIN_DURATION {
        duration * durations.analysis_percent as f64 / 100.0
    } else {
        duration
    };
    let intro_end = intro_window.min(durations.analysis_length_limit as f64 * 60.0);

    let max_credits = match kind {
        MediaKind::Episode => durations.maximum_episode_credits_duration,
        MediaKind::Movie => durations.maximum_movie_credits_duration,
    } as f64;
    let credits_start = (duration - max_credits).max(0.0);

    (intro_end, credits_start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;
    use crate::library::InMemoryLibrary;
    use crate::media::FfmpegProbe;
    use crate::models::describe_group;
    use crate::store::MetadataDb;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn item(library: &str, series: &str, season: Option<u32>, episode: u32) -> LibraryItem {
        LibraryItem {
            item_id: Uuid::new_v4(),
            library_name: library.to_string(),
            kind: MediaKind::Episode,
            series_name: series.to_string(),
            season_number: season,
            episode_number: Some(episode),
            name: format!("{} {}", series, episode),
            path: Some(PathBuf::from(format!("/media/{}/{}.mkv", series, episode))),
            duration: 1400.0,
        }
    }

    fn movie(title: &str) -> LibraryItem {
        LibraryItem {
            kind: MediaKind::Movie,
            season_number: None,
            episode_number: None,
            name: title.to_string(),
            ..item("Movies", title, None, 0)
        }
    }

    async fn queue_for(builder: ConfigBuilder, items: Vec<LibraryItem>) -> AnalysisQueue {
        let ctx = AnalysisContext::new(
            builder.build(),
            Arc::new(InMemoryLibrary::new(items)),
            MetadataDb::in_memory(),
            Arc::new(FfmpegProbe::default()),
        );
        QueueManager::new(ctx).build_queue(SegmentKind::Intro).await.unwrap()
    }

    fn season(series: &str, season: Option<u32>) -> GroupKey {
        GroupKey::Season {
            series: series.to_string(),
            season,
        }
    }

    #[tokio::test]
    async fn test_selected_libraries_narrow_queue() {
        let items = vec![item("Shows", "Drama", Some(1), 1), item("Anime", "Mecha", Some(1), 1)];

        let queue = queue_for(ConfigBuilder::new().with_selected_libraries("anime"), items.clone()).await;
        assert_eq!(queue.keys().cloned().collect::<Vec<_>>(), vec![season("Mecha", Some(1))]);

        let queue = queue_for(ConfigBuilder::new(), items).await;
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_skipped_shows_by_season_or_whole() {
        let items = vec![
            item("Shows", "My Show", Some(1), 1),
            item("Shows", "My Show", Some(2), 1),
            item("Shows", "Other", Some(1), 1),
            item("Shows", "Other", Some(4), 1),
            item("Shows", "Kept", Some(1), 1),
        ];

        let queue = queue_for(
            ConfigBuilder::new().with_skipped_tv_shows("My Show;S01, other"),
            items,
        )
        .await;
        let keys: Vec<GroupKey> = queue.keys().cloned().collect();
        assert_eq!(keys, vec![season("Kept", Some(1)), season("My Show", Some(2))]);
    }

    #[tokio::test]
    async fn test_skipped_movies() {
        let queue = queue_for(
            ConfigBuilder::new().with_skipped_movies("heat"),
            vec![movie("Heat"), movie("Ronin")],
        )
        .await;

        assert_eq!(queue.len(), 1);
        let group = queue.values().next().unwrap();
        assert_eq!(group[0].name, "Ronin");
        assert!(group[0].is_movie());
    }

    #[tokio::test]
    async fn test_items_without_path_or_duration_are_skipped() {
        let good = item("Shows", "Show", Some(1), 1);
        let no_path = LibraryItem { path: None, ..item("Shows", "Show", Some(1), 2) };
        let empty_path = LibraryItem {
            path: Some(PathBuf::new()),
            ..item("Shows", "Show", Some(1), 3)
        };
        let no_duration = LibraryItem { duration: 0.0, ..item("Shows", "Show", Some(1), 4) };

        let queue = queue_for(
            ConfigBuilder::new(),
            vec![no_path, good.clone(), empty_path, no_duration],
        )
        .await;
        let ids: Vec<Uuid> = queue.values().flatten().map(|q| q.item_id).collect();
        assert_eq!(ids, vec![good.item_id]);
    }

    #[tokio::test]
    async fn test_unknown_season_is_its_own_group() {
        let items = vec![
            item("Shows", "Show", Some(0), 1),
            item("Shows", "Show", None, 2),
            item("Shows", "Show", None, 1),
        ];

        let queue = queue_for(ConfigBuilder::new().analyze_season_zero(true), items.clone()).await;
        assert_eq!(queue.len(), 2);
        let unknown = &queue[&season("Show", None)];
        let episodes: Vec<Option<u32>> = unknown.iter().map(|q| q.episode_number).collect();
        assert_eq!(episodes, vec![Some(1), Some(2)]);
        assert_eq!(describe_group(unknown), "Show (unknown season)");
        assert_eq!(describe_group(&queue[&season("Show", Some(0))]), "Show season 0");

        // Without the opt-in only the specials are dropped
        let queue = queue_for(ConfigBuilder::new(), items).await;
        assert_eq!(queue.keys().cloned().collect::<Vec<_>>(), vec![season("Show", None)]);
    }

    #[test]
    fn test_windows_for_regular_episode() {
        let durations = DurationConfig::default();
        // 30% of 40 minutes is 12 minutes, under the 15 minute limit
        let (intro_end, credits_start) = fingerprint_windows(2400.0, MediaKind::Episode, &durations);
        assert_eq!(intro_end, 720.0);
        assert_eq!(credits_start, 2400.0 - 240.0);
    }

    #[test]
    fn test_windows_capped_by_length_limit() {
        let durations = DurationConfig::default();
        let (intro_end, _) = fingerprint_windows(7200.0, MediaKind::Episode, &durations);
        assert_eq!(intro_end, 900.0);
    }

    #[test]
    fn test_windows_for_short_items() {
        let durations = DurationConfig::default();
        let (intro_end, credits_start) = fingerprint_windows(200.0, MediaKind::Episode, &durations);
        assert_eq!(intro_end, 200.0);
        assert_eq!(credits_start, 0.0);

        let (_, movie_credits) = fingerprint_windows(600.0, MediaKind::Movie, &durations);
        assert_eq!(movie_credits, 0.0);
    }
}
