use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::config::{LibraryKind, LibraryRoot};
use crate::media::MediaProbe;
use crate::models::MediaKind;

/// Concurrent ffprobe calls while scanning a library
const PROBE_CONCURRENCY: usize = 4;

/// Media item as reported by the library
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryItem {
    pub item_id: Uuid,
    pub library_name: String,
    pub kind: MediaKind,
    /// Show name for episodes, title for movies
    pub series_name: String,
    pub season_number: Option<u32>,
    pub episode_number: Option<u32>,
    pub name: String,
    pub path: Option<PathBuf>,
    /// Runtime in seconds, zero when unknown
    pub duration: f64,
}

/// Read-only view of the media library
#[async_trait]
pub trait LibraryProvider: Send + Sync {
    /// Items of the named libraries; all libraries when `libraries` is empty
    async fn list_items(&self, libraries: &[String]) -> Result<Vec<LibraryItem>>;

    /// Whether the item is still present
    async fn item_exists(&self, item_id: Uuid) -> Result<bool>;
}

fn library_selected(libraries: &[String], name: &str) -> bool {
    libraries.is_empty() || libraries.iter().any(|l| l.eq_ignore_ascii_case(name))
}

/// Library held in memory, used when embedding the analyzer and in tests
#[derive(Debug, Default, Clone)]
pub struct InMemoryLibrary {
    items: Arc<RwLock<Vec<LibraryItem>>>,
}

impl InMemoryLibrary {
    pub fn new(items: Vec<LibraryItem>) -> Self {
        Self {
            items: Arc::new(RwLock::new(items)),
        }
    }

    pub async fn insert(&self, item: LibraryItem) {
        self.items.write().await.push(item);
    }

    /// Remove an item, as if it was deleted from disk
    pub async fn remove(&self, item_id: Uuid) -> bool {
        let mut items = self.items.write().await;
        let before = items.len();
        items.retain(|item| item.item_id != item_id);
        items.len() != before
    }
}

#[async_trait]
impl LibraryProvider for InMemoryLibrary {
    async fn list_items(&self, libraries: &[String]) -> Result<Vec<LibraryItem>> {
        let items = self.items.read().await;
        Ok(items
            .iter()
            .filter(|item| library_selected(libraries, &item.library_name))
            .cloned()
            .collect())
    }

    async fn item_exists(&self, item_id: Uuid) -> Result<bool> {
        Ok(self.items.read().await.iter().any(|item| item.item_id == item_id))
    }
}

/// Library built by walking configured directories
pub struct FileSystemLibrary {
    roots: Vec<LibraryRoot>,
    probe: Arc<dyn MediaProbe>,
    supported_extensions: Vec<&'static str>,
    patterns: EpisodePatterns,
    /// Paths seen by the last scan, for existence checks
    known: RwLock<HashMap<Uuid, PathBuf>>,
}

impl FileSystemLibrary {
    pub fn new(roots: Vec<LibraryRoot>, probe: Arc<dyn MediaProbe>) -> Result<Self> {
        Ok(Self {
            roots,
            probe,
            supported_extensions: vec!["mkv", "mp4", "avi", "mov", "webm", "m4v", "ts", "wmv"],
            patterns: EpisodePatterns::new()?,
            known: RwLock::new(HashMap::new()),
        })
    }

    /// Stable identifier derived from the file path
    pub fn item_id_for(path: &Path) -> Uuid {
        Uuid::from_bytes(md5::compute(path.to_string_lossy().as_bytes()).0)
    }

    async fn scan_root(&self, root: &LibraryRoot) -> Vec<LibraryItem> {
        if !root.path.is_dir() {
            warn!("Library {} not found at {}", root.name, root.path.display());
            return Vec::new();
        }

        let dir = root.path.clone();
        let extensions = self.supported_extensions.clone();
        let files = tokio::task::spawn_blocking(move || discover_videos(&dir, &extensions))
            .await
            .unwrap_or_default();
        debug!("📁 {} video files under {}", files.len(), root.path.display());

        stream::iter(files)
            .map(|path| async move {
                let duration = match self.probe.duration(&path).await {
                    Ok(duration) => duration,
                    Err(e) => {
                        warn!("Could not read duration of {}: {}", path.display(), e);
                        0.0
                    }
                };
                describe_file(root, &path, duration, &self.patterns)
            })
            .buffer_unordered(PROBE_CONCURRENCY)
            .collect()
            .await
    }
}

#[async_trait]
impl LibraryProvider for FileSystemLibrary {
    async fn list_items(&self, libraries: &[String]) -> Result<Vec<LibraryItem>> {
        let mut items = Vec::new();
        for root in self.roots.iter().filter(|r| library_selected(libraries, &r.name)) {
            items.extend(self.scan_root(root).await);
        }

        let mut known = self.known.write().await;
        for item in &items {
            if let Some(path) = &item.path {
                known.insert(item.item_id, path.clone());
            }
        }

        info!("📚 Library scan found {} items", items.len());
        Ok(items)
    }

    async fn item_exists(&self, item_id: Uuid) -> Result<bool> {
        let known = self.known.read().await;
        Ok(known.get(&item_id).is_some_and(|path| path.exists()))
    }
}

/// Video files under `dir`, sorted by path
pub fn discover_videos(dir: &Path, extensions: &[&str]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true) {
        match entry {
            Ok(entry) if entry.file_type().is_file() => {
                let supported = entry
                    .path()
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| extensions.contains(&ext.to_lowercase().as_str()))
                    .unwrap_or(false);
                if supported {
                    files.push(entry.into_path());
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Error accessing entry under {}: {}", dir.display(), e),
        }
    }
    files.sort();
    files
}

/// Build the library view of one file
pub fn describe_file(
    root: &LibraryRoot,
    path: &Path,
    duration: f64,
    patterns: &EpisodePatterns,
) -> LibraryItem {
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    let (kind, series_name, season_number, episode_number) = match root.kind {
        LibraryKind::Movies => (MediaKind::Movie, name.clone(), None, None),
        LibraryKind::TvShows => {
            let relative = path.strip_prefix(&root.path).unwrap_or(path);
            let series = relative
                .components()
                .next()
                .and_then(|c| match c {
                    Component::Normal(s) if relative.components().count() > 1 => {
                        Some(s.to_string_lossy().to_string())
                    }
                    _ => None,
                })
                .unwrap_or_else(|| name.clone());

            let (season, episode) = patterns.parse(relative);
            (MediaKind::Episode, series, season, episode)
        }
    };

    LibraryItem {
        item_id: FileSystemLibrary::item_id_for(path),
        library_name: root.name.clone(),
        kind,
        series_name,
        season_number,
        episode_number,
        name,
        path: Some(path.to_path_buf()),
        duration,
    }
}

/// File and folder name patterns for season and episode numbers
#[derive(Debug, Clone)]
pub struct EpisodePatterns {
    tag: Regex,
    season_dir: Regex,
}

impl EpisodePatterns {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            tag: Regex::new(r"(?i)s(\d{1,3})\s*e(\d{1,4})")?,
            season_dir: Regex::new(r"(?i)^season\s*(\d{1,3})$")?,
        })
    }

    /// Season and episode numbers from `S01E02` file names or `Season 1` folders
    pub fn parse(&self, relative: &Path) -> (Option<u32>, Option<u32>) {
        let file_name = relative
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        if let Some(caps) = self.tag.captures(&file_name) {
            return (caps[1].parse().ok(), caps[2].parse().ok());
        }

        let season = relative
            .parent()
            .into_iter()
            .flat_map(|p| p.components())
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().to_string()),
                _ => None,
            })
            .find_map(|dir| {
                if dir.eq_ignore_ascii_case("specials") {
                    Some(0)
                } else {
                    self.season_dir.captures(&dir).and_then(|caps| caps[1].parse().ok())
                }
            });

        (season, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns() -> EpisodePatterns {
        EpisodePatterns::new().unwrap()
    }

    fn tv_root() -> LibraryRoot {
        LibraryRoot {
            name: "TV".to_string(),
            path: PathBuf::from("/media/tv"),
            kind: LibraryKind::TvShows,
        }
    }

    #[test]
    fn test_describe_episode() {
        let path = Path::new("/media/tv/The Show/Season 02/The Show - S02E05 - Pilot.mkv");
        let item = describe_file(&tv_root(), path, 1320.0, &patterns());

        assert_eq!(item.kind, MediaKind::Episode);
        assert_eq!(item.series_name, "The Show");
        assert_eq!(item.season_number, Some(2));
        assert_eq!(item.episode_number, Some(5));
        assert_eq!(item.name, "The Show - S02E05 - Pilot");
        assert_eq!(item.item_id, FileSystemLibrary::item_id_for(path));
    }

    #[test]
    fn test_season_from_directory() {
        let patterns = patterns();
        assert_eq!(patterns.parse(Path::new("Show/Season 3/episode.mkv")), (Some(3), None));
        assert_eq!(patterns.parse(Path::new("Show/Specials/extra.mkv")), (Some(0), None));
        assert_eq!(patterns.parse(Path::new("Show/episode.mkv")), (None, None));
    }

    #[test]
    fn test_describe_movie() {
        let root = LibraryRoot {
            name: "Movies".to_string(),
            path: PathBuf::from("/media/movies"),
            kind: LibraryKind::Movies,
        };
        let path = Path::new("/media/movies/Heat (1995)/Heat (1995).mkv");
        let item = describe_file(&root, path, 10200.0, &patterns());
        assert_eq!(item.kind, MediaKind::Movie);
        assert_eq!(item.series_name, "Heat (1995)");
        assert_eq!(item.season_number, None);
    }

    #[test]
    fn test_item_ids_are_stable() {
        let a = FileSystemLibrary::item_id_for(Path::new("/media/tv/a.mkv"));
        let b = FileSystemLibrary::item_id_for(Path::new("/media/tv/a.mkv"));
        let c = FileSystemLibrary::item_id_for(Path::new("/media/tv/b.mkv"));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_discover_videos_by_extension() {
        let dir = tempfile::TempDir::new().unwrap();
        let season = dir.path().join("Show").join("Season 1");
        std::fs::create_dir_all(&season).unwrap();
        std::fs::write(season.join("S01E01.mkv"), b"").unwrap();
        std::fs::write(season.join("S01E02.MP4"), b"").unwrap();
        std::fs::write(season.join("cover.jpg"), b"").unwrap();

        let files = discover_videos(dir.path(), &["mkv", "mp4"]);
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("S01E01.mkv"));
    }

    #[tokio::test]
    async fn test_in_memory_library_filters_and_removes() {
        let path = Path::new("/media/tv/Show/S01E01.mkv");
        let item = describe_file(&tv_root(), path, 1200.0, &patterns());
        let library = InMemoryLibrary::new(vec![item.clone()]);

        assert_eq!(library.list_items(&[]).await.unwrap().len(), 1);
        assert_eq!(library.list_items(&["tv".to_string()]).await.unwrap().len(), 1);
        assert!(library.list_items(&["Movies".to_string()]).await.unwrap().is_empty());

        assert!(library.remove(item.item_id).await);
        assert!(!library.item_exists(item.item_id).await.unwrap());
    }
}
