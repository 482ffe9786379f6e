use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{MediaSegment, QueuedMedia, SegmentKind, SegmentMetadata};

/// File name of the metadata document inside the data directory
pub const METADATA_FILE: &str = "segments.json";

/// Persistence for detected segments
#[async_trait]
pub trait SegmentStore: Send + Sync {
    /// All segments stored for an item, any kind
    async fn segments_for_item(&self, item_id: Uuid) -> Result<Vec<MediaSegment>>;

    async fn has_segment(&self, item_id: Uuid, kind: SegmentKind) -> Result<bool>;

    /// Store segments keyed by item id, replacing any previous segment of the same kind.
    /// Returns the number of segments written.
    async fn create_segments(
        &self,
        items: &[QueuedMedia],
        segments: &HashMap<Uuid, MediaSegment>,
    ) -> Result<usize>;

    async fn metadata_for_item(&self, item_id: Uuid) -> Result<Vec<SegmentMetadata>>;
}

/// Persistence for items every detector gave up on
#[async_trait]
pub trait BlacklistStore: Send + Sync {
    /// Ids blacklisted for `kind`
    async fn blacklisted_ids(&self, kind: SegmentKind) -> Result<HashSet<Uuid>>;

    /// Record blacklist rows for `items`. Items already blacklisted for `kind` are left alone.
    async fn add_to_blacklist(
        &self,
        items: &[QueuedMedia],
        kind: SegmentKind,
        note: &str,
    ) -> Result<usize>;

    /// Drop every blacklist row, returning how many were removed
    async fn reset_blacklist(&self) -> Result<usize>;
}

/// On-disk layout of the metadata document
#[derive(Debug, Default, Serialize, Deserialize)]
struct MetadataDocument {
    #[serde(default)]
    segments: Vec<MediaSegment>,
    #[serde(default)]
    metadata: Vec<SegmentMetadata>,
}

/// Rows indexed by item id
#[derive(Debug, Default, Clone)]
struct Tables {
    segments: HashMap<Uuid, Vec<MediaSegment>>,
    metadata: HashMap<Uuid, Vec<SegmentMetadata>>,
}

impl Tables {
    fn from_document(document: MetadataDocument) -> Self {
        let mut tables = Tables::default();
        for segment in document.segments {
            tables.segments.entry(segment.item_id).or_default().push(segment);
        }
        for row in document.metadata {
            tables.metadata.entry(row.item_id).or_default().push(row);
        }
        tables
    }

    fn to_document(&self) -> MetadataDocument {
        let mut segments: Vec<MediaSegment> = self.segments.values().flatten().cloned().collect();
        let mut metadata: Vec<SegmentMetadata> = self.metadata.values().flatten().cloned().collect();

        // Stable output keeps the file diffable between runs
        segments.sort_by_key(|s| (s.item_id, s.kind));
        metadata.sort_by_key(|m| (m.item_id, m.kind, m.prevent_analyzing));

        MetadataDocument { segments, metadata }
    }
}

/// Segment and blacklist storage backed by a single JSON document
#[derive(Debug, Clone)]
pub struct MetadataDb {
    /// None for in-memory databases
    path: Option<PathBuf>,
    tables: Arc<RwLock<Tables>>,
}

impl MetadataDb {
    /// Open (or create) the document in `data_dir`
    pub async fn open(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir)
            .await
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

        let path = data_dir.join(METADATA_FILE);
        let tables = if path.exists() {
            let content = fs::read_to_string(&path).await?;
            let document: MetadataDocument = serde_json::from_str(&content)
                .with_context(|| format!("Corrupt metadata file {}", path.display()))?;
            Tables::from_document(document)
        } else {
            Tables::default()
        };

        info!(
            "📊 Metadata store opened with {} items ({})",
            tables.metadata.len(),
            path.display()
        );

        Ok(Self {
            path: Some(path),
            tables: Arc::new(RwLock::new(tables)),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            tables: Arc::new(RwLock::new(Tables::default())),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write the document while the caller still holds the write lock.
    ///
    /// Callers stage changes on a copy and only commit it once this succeeds.
    async fn persist(&self, tables: &Tables) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let json = serde_json::to_string_pretty(&tables.to_document())?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, path).await?;

        debug!("💾 Metadata saved to {}", path.display());
        Ok(())
    }

    /// Number of blacklist rows for `kind`
    pub async fn blacklist_len(&self, kind: SegmentKind) -> usize {
        self.tables
            .read()
            .await
            .metadata
            .values()
            .flatten()
            .filter(|row| row.prevent_analyzing && row.kind == kind)
            .count()
    }

    /// Total stored segments
    pub async fn segment_count(&self) -> usize {
        self.tables.read().await.segments.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl SegmentStore for MetadataDb {
    async fn segments_for_item(&self, item_id: Uuid) -> Result<Vec<MediaSegment>> {
        let tables = self.tables.read().await;
        Ok(tables.segments.get(&item_id).cloned().unwrap_or_default())
    }

    async fn has_segment(&self, item_id: Uuid, kind: SegmentKind) -> Result<bool> {
        let tables = self.tables.read().await;
        Ok(tables
            .segments
            .get(&item_id)
            .is_some_and(|segments| segments.iter().any(|s| s.kind == kind)))
    }

    async fn create_segments(
        &self,
        items: &[QueuedMedia],
        segments: &HashMap<Uuid, MediaSegment>,
    ) -> Result<usize> {
        if segments.is_empty() {
            return Ok(0);
        }

        let names: HashMap<Uuid, &str> = items
            .iter()
            .map(|item| (item.item_id, item.name.as_str()))
            .collect();

        let mut tables = self.tables.write().await;
        let mut next = tables.clone();
        for (item_id, segment) in segments {
            let stored = next.segments.entry(*item_id).or_default();
            stored.retain(|s| s.kind != segment.kind);
            stored.push(segment.clone());

            // A successful detection supersedes both the old row and any blacklist entry
            let rows = next.metadata.entry(*item_id).or_default();
            rows.retain(|row| row.kind != segment.kind);
            let name = names.get(item_id).copied().unwrap_or_default();
            rows.push(SegmentMetadata::for_segment(segment, name));
        }

        self.persist(&next).await?;
        *tables = next;
        Ok(segments.len())
    }

    async fn metadata_for_item(&self, item_id: Uuid) -> Result<Vec<SegmentMetadata>> {
        let tables = self.tables.read().await;
        Ok(tables.metadata.get(&item_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl BlacklistStore for MetadataDb {
    async fn blacklisted_ids(&self, kind: SegmentKind) -> Result<HashSet<Uuid>> {
        let tables = self.tables.read().await;
        Ok(tables
            .metadata
            .iter()
            .filter(|(_, rows)| rows.iter().any(|r| r.prevent_analyzing && r.kind == kind))
            .map(|(id, _)| *id)
            .collect())
    }

    async fn add_to_blacklist(
        &self,
        items: &[QueuedMedia],
        kind: SegmentKind,
        note: &str,
    ) -> Result<usize> {
        if items.is_empty() {
            return Ok(0);
        }

        let mut tables = self.tables.write().await;
        let mut next = tables.clone();
        let mut added = 0;
        for item in items {
            let rows = next.metadata.entry(item.item_id).or_default();
            if rows.iter().any(|r| r.prevent_analyzing && r.kind == kind) {
                continue;
            }
            rows.push(SegmentMetadata::blacklist(item, kind, note));
            added += 1;
        }

        if added > 0 {
            self.persist(&next).await?;
            *tables = next;
        }
        Ok(added)
    }

    async fn reset_blacklist(&self) -> Result<usize> {
        let mut tables = self.tables.write().await;
        let mut next = tables.clone();
        let mut removed = 0;
        for rows in next.metadata.values_mut() {
            let before = rows.len();
            rows.retain(|row| !row.prevent_analyzing);
            removed += before - rows.len();
        }
        next.metadata.retain(|_, rows| !rows.is_empty());

        if removed > 0 {
            self.persist(&next).await?;
            *tables = next;
        }
        info!("🧹 Cleared {} blacklist entries", removed);
        Ok(removed)
    }
}
