/// On-disk cache of raw fingerprints, keyed by item and segment kind
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{SegmentKind, TimeRange};

/// Cached fingerprint for one audio window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedFingerprint {
    pub item_id: Uuid,
    pub kind: SegmentKind,
    /// Window the points were computed over
    pub window: TimeRange,
    pub created_at: DateTime<Utc>,
    pub points: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct FingerprintCache {
    cache_dir: PathBuf,
}

impl FingerprintCache {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn cache_path(&self, item_id: Uuid, kind: SegmentKind) -> PathBuf {
        let suffix = match kind {
            SegmentKind::Intro => "intro",
            SegmentKind::Outro => "credits",
        };
        self.cache_dir.join(format!("{}-{}.json", item_id, suffix))
    }

    /// Cached points, if present and computed over the same window
    pub async fn load(&self, item_id: Uuid, kind: SegmentKind, window: TimeRange) -> Option<Vec<u32>> {
        let path = self.cache_path(item_id, kind);
        if !path.exists() {
            return None;
        }

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) => {
                warn!("Failed to read fingerprint cache {}: {}", path.display(), e);
                return None;
            }
        };

        match serde_json::from_str::<CachedFingerprint>(&content) {
            Ok(cached) if same_window(cached.window, window) && !cached.points.is_empty() => {
                debug!("🎵 Fingerprint cache hit for {} ({})", item_id, kind);
                Some(cached.points)
            }
            Ok(_) => {
                debug!("Fingerprint cache for {} is stale", item_id);
                None
            }
            Err(e) => {
                warn!("Failed to parse fingerprint cache {}: {}", path.display(), e);
                None
            }
        }
    }

    pub async fn save(
        &self,
        item_id: Uuid,
        kind: SegmentKind,
        window: TimeRange,
        points: &[u32],
    ) -> Result<()> {
        tokio::fs::create_dir_all(&self.cache_dir).await?;

        let cached = CachedFingerprint {
            item_id,
            kind,
            window,
            created_at: Utc::now(),
            points: points.to_vec(),
        };

        let path = self.cache_path(item_id, kind);
        tokio::fs::write(&path, serde_json::to_string(&cached)?).await?;
        debug!("💾 Cached {} fingerprint points at {}", points.len(), path.display());
        Ok(())
    }
}

fn same_window(a: TimeRange, b: TimeRange) -> bool {
    (a.start - b.start).abs() < 0.001 && (a.end - b.end).abs() < 0.001
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_cache_roundtrip_and_window_check() {
        let dir = TempDir::new().unwrap();
        let cache = FingerprintCache::new(dir.path().join("fingerprints"));
        let id = Uuid::new_v4();
        let window = TimeRange::new(0.0, 450.0);

        assert!(cache.load(id, SegmentKind::Intro, window).await.is_none());

        cache.save(id, SegmentKind::Intro, window, &[1, 2, 3]).await.unwrap();
        assert_eq!(cache.load(id, SegmentKind::Intro, window).await, Some(vec![1, 2, 3]));

        // Different window or kind misses
        assert!(cache.load(id, SegmentKind::Intro, TimeRange::new(0.0, 300.0)).await.is_none());
        assert!(cache.load(id, SegmentKind::Outro, window).await.is_none());
    }
}
