use anyhow::{anyhow, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::models::{MediaKind, SegmentKind};

/// Configuration for the segment analyzer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Trigger policy
    pub general: GeneralConfig,

    /// Queue selection and blacklist behaviour
    pub analysis: AnalysisConfig,

    /// Duration bounds and detector thresholds
    pub durations: DurationConfig,

    /// Fingerprint matching internals
    pub algorithm: AlgorithmConfig,

    /// Persistence locations
    pub storage: StorageConfig,

    /// External tool locations
    pub tools: ToolsConfig,

    /// Library roots scanned by the filesystem library
    pub libraries: Vec<LibraryRoot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Run analysis after a library scan detects changes
    pub run_after_library_scan: bool,

    /// Analyze newly added or updated items, bypassing the blacklist
    pub run_after_add_or_update_event: bool,

    /// Seconds between library scans in watch mode
    pub scan_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Cache episode fingerprints on disk
    pub cache_fingerprints: bool,

    /// Clear the blacklist at the start of the next run
    pub reset_blacklist: bool,

    /// Record items that every detector failed on
    pub enable_blacklist: bool,

    /// Maximum number of groups analyzed concurrently
    pub max_parallelism: usize,

    /// Comma separated library names. Empty means all libraries.
    pub selected_libraries: String,

    /// Comma separated shows, with optional seasons: "My Show;S01;S02, Another Show"
    pub skipped_tv_shows: String,

    /// Comma separated movie names
    pub skipped_movies: String,

    /// Analyze specials (season 0)
    pub analyze_season_zero: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DurationConfig {
    /// Percentage of each episode's audio track fingerprinted for intros
    pub analysis_percent: u32,

    /// Upper limit in minutes on the fingerprinted portion of each episode
    pub analysis_length_limit: u32,

    /// Seconds
    pub minimum_intro_duration: u32,
    pub maximum_intro_duration: u32,
    pub minimum_credits_duration: u32,
    pub maximum_episode_credits_duration: u32,
    pub maximum_movie_credits_duration: u32,

    /// Minimum share of black pixels (percent) for a frame to count as black
    pub black_frame_minimum_percentage: u32,

    /// Regular expression matched against chapter titles when looking for intros
    pub chapter_intro_pattern: String,

    /// Regular expression matched against chapter titles when looking for credits
    pub chapter_credits_pattern: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlgorithmConfig {
    /// Bits (out of 32) two fingerprint points may differ by and still match
    pub maximum_fingerprint_point_differences: u32,

    /// Seconds allowed between matching points before a new range starts
    pub maximum_time_skip: f64,

    /// Value tolerance used when probing the inverted index
    pub inverted_index_shift: u32,

    /// Noise floor in dB considered silent
    pub silence_detection_maximum_noise: i32,

    /// Minimum seconds of audio considered silent
    pub silence_detection_minimum_duration: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the segment metadata document
    pub data_dir: PathBuf,

    /// Directory for cached fingerprints
    pub fingerprint_cache_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LibraryKind {
    TvShows,
    Movies,
}

impl LibraryKind {
    pub fn media_kind(&self) -> MediaKind {
        match self {
            LibraryKind::TvShows => MediaKind::Episode,
            LibraryKind::Movies => MediaKind::Movie,
        }
    }
}

/// A named library root on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryRoot {
    pub name: String,
    pub path: PathBuf,
    pub kind: LibraryKind,
}

/// A show (and optionally specific seasons) excluded from analysis
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedShow {
    pub name: String,
    /// Empty means every season
    pub seasons: Vec<u32>,
}

impl SkippedShow {
    pub fn matches(&self, series: &str, season: Option<u32>) -> bool {
        self.name.eq_ignore_ascii_case(series.trim())
            && (self.seasons.is_empty() || season.is_some_and(|s| self.seasons.contains(&s)))
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            run_after_library_scan: true,
            run_after_add_or_update_event: true,
            scan_interval_secs: 900,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            cache_fingerprints: false,
            reset_blacklist: false,
            enable_blacklist: true,
            max_parallelism: 2,
            selected_libraries: String::new(),
            skipped_tv_shows: String::new(),
            skipped_movies: String::new(),
            analyze_season_zero: false,
        }
    }
}

impl Default for DurationConfig {
    fn default() -> Self {
        Self {
            analysis_percent: 30,
            analysis_length_limit: 15,
            minimum_intro_duration: 15,
            maximum_intro_duration: 120,
            minimum_credits_duration: 15,
            maximum_episode_credits_duration: 240,
            maximum_movie_credits_duration: 900,
            black_frame_minimum_percentage: 85,
            chapter_intro_pattern: r"(^|\s)(Intro|Introduction|OP|Opening)(\s|$)".to_string(),
            chapter_credits_pattern: r"(^|\s)(Credits?|Ending|End|Outro)(\s|$)".to_string(),
        }
    }
}

impl Default for AlgorithmConfig {
    fn default() -> Self {
        Self {
            maximum_fingerprint_point_differences: 6,
            maximum_time_skip: 3.5,
            inverted_index_shift: 2,
            silence_detection_maximum_noise: -50,
            silence_detection_minimum_duration: 0.33,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            fingerprint_cache_dir: PathBuf::from("./data/fingerprints"),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            analysis: AnalysisConfig::default(),
            durations: DurationConfig::default(),
            algorithm: AlgorithmConfig::default(),
            storage: StorageConfig::default(),
            tools: ToolsConfig::default(),
            libraries: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from an explicit file, or from the usual locations
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => Self::from_default_locations(),
        };

        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        tracing::info!("📄 Loaded configuration from: {}", path.display());
        Ok(config)
    }

    fn from_default_locations() -> Self {
        let config_paths = [
            "segment-analyzer.toml",
            "config/segment-analyzer.toml",
            "/etc/segment-analyzer/config.toml",
        ];

        for path in &config_paths {
            if let Ok(config_str) = std::fs::read_to_string(path) {
                match toml::from_str(&config_str) {
                    Ok(config) => {
                        tracing::info!("📄 Loaded configuration from: {}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse config file {}: {}", path, e);
                    }
                }
            }
        }

        tracing::debug!("No configuration file found, using defaults");
        Self::default()
    }

    /// Override selected settings from environment variables
    pub fn apply_env_overrides(&mut self) {
        if let Ok(parallelism) = std::env::var("SEGMENT_ANALYZER_MAX_PARALLELISM") {
            match parallelism.parse() {
                Ok(value) => self.analysis.max_parallelism = value,
                Err(_) => tracing::warn!("Ignoring invalid SEGMENT_ANALYZER_MAX_PARALLELISM: {}", parallelism),
            }
        }

        if let Ok(data_dir) = std::env::var("SEGMENT_ANALYZER_DATA_DIR") {
            self.storage.fingerprint_cache_dir = PathBuf::from(&data_dir).join("fingerprints");
            self.storage.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(enable) = std::env::var("SEGMENT_ANALYZER_ENABLE_BLACKLIST") {
            self.analysis.enable_blacklist = matches!(enable.as_str(), "1" | "true" | "yes");
        }

        if let Ok(ffmpeg) = std::env::var("SEGMENT_ANALYZER_FFMPEG") {
            self.tools.ffmpeg_path = PathBuf::from(ffmpeg);
        }

        if let Ok(ffprobe) = std::env::var("SEGMENT_ANALYZER_FFPROBE") {
            self.tools.ffprobe_path = PathBuf::from(ffprobe);
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let config_str = toml::to_string_pretty(self)?;
        std::fs::write(path, config_str)?;
        tracing::info!("💾 Configuration saved to: {}", path.display());
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.analysis.max_parallelism == 0 {
            return Err(ConfigError::Invalid {
                field: "max_parallelism",
                reason: "must be greater than 0".to_string(),
            });
        }

        if self.analysis.max_parallelism > num_cpus::get() {
            tracing::warn!(
                "max_parallelism ({}) exceeds available cores ({})",
                self.analysis.max_parallelism,
                num_cpus::get()
            );
        }

        let d = &self.durations;
        if d.analysis_percent == 0 || d.analysis_percent > 100 {
            return Err(ConfigError::Invalid {
                field: "analysis_percent",
                reason: format!("{} is not within 1..=100", d.analysis_percent),
            });
        }

        if d.black_frame_minimum_percentage > 100 {
            return Err(ConfigError::Invalid {
                field: "black_frame_minimum_percentage",
                reason: format!("{} is not within 0..=100", d.black_frame_minimum_percentage),
            });
        }

        if d.minimum_intro_duration > d.maximum_intro_duration {
            return Err(ConfigError::Invalid {
                field: "minimum_intro_duration",
                reason: "exceeds maximum_intro_duration".to_string(),
            });
        }

        if d.minimum_credits_duration > d.maximum_episode_credits_duration
            || d.minimum_credits_duration > d.maximum_movie_credits_duration
        {
            return Err(ConfigError::Invalid {
                field: "minimum_credits_duration",
                reason: "exceeds a maximum credits duration".to_string(),
            });
        }

        if self.algorithm.maximum_fingerprint_point_differences > 32 {
            return Err(ConfigError::Invalid {
                field: "maximum_fingerprint_point_differences",
                reason: "fingerprint points only have 32 bits".to_string(),
            });
        }

        if self.algorithm.maximum_time_skip < 0.0 {
            return Err(ConfigError::Invalid {
                field: "maximum_time_skip",
                reason: "must not be negative".to_string(),
            });
        }

        self.intro_chapter_regex()?;
        self.credits_chapter_regex()?;

        tracing::debug!("✅ Configuration validation passed");
        Ok(())
    }

    pub fn intro_chapter_regex(&self) -> std::result::Result<Regex, ConfigError> {
        build_chapter_regex(&self.durations.chapter_intro_pattern).map_err(|source| ConfigError::Pattern {
            field: "chapter_intro_pattern",
            source,
        })
    }

    pub fn credits_chapter_regex(&self) -> std::result::Result<Regex, ConfigError> {
        build_chapter_regex(&self.durations.chapter_credits_pattern).map_err(|source| ConfigError::Pattern {
            field: "chapter_credits_pattern",
            source,
        })
    }

    /// Accepted segment duration `(min, max)` in seconds
    pub fn duration_bounds(&self, kind: SegmentKind, media: MediaKind) -> (f64, f64) {
        let d = &self.durations;
        match (kind, media) {
            (SegmentKind::Intro, _) => (d.minimum_intro_duration as f64, d.maximum_intro_duration as f64),
            (SegmentKind::Outro, MediaKind::Episode) => (
                d.minimum_credits_duration as f64,
                d.maximum_episode_credits_duration as f64,
            ),
            (SegmentKind::Outro, MediaKind::Movie) => (
                d.minimum_credits_duration as f64,
                d.maximum_movie_credits_duration as f64,
            ),
        }
    }

    pub fn selected_library_names(&self) -> Vec<String> {
        split_list(&self.analysis.selected_libraries)
    }

    pub fn skipped_movies(&self) -> Vec<String> {
        split_list(&self.analysis.skipped_movies)
    }

    /// Parse the skipped show list
    pub fn skipped_shows(&self) -> Vec<SkippedShow> {
        split_list(&self.analysis.skipped_tv_shows)
            .into_iter()
            .filter_map(|entry| {
                let mut parts = entry.split(';').map(str::trim);
                let name = parts.next().filter(|n| !n.is_empty())?.to_string();
                let seasons = parts
                    .filter_map(|s| {
                        let digits = s.trim_start_matches(&['S', 's'][..]);
                        match digits.parse::<u32>() {
                            Ok(season) => Some(season),
                            Err(_) => {
                                tracing::warn!("Ignoring malformed season '{}' for skipped show {}", s, name);
                                None
                            }
                        }
                    })
                    .collect();
                Some(SkippedShow { name, seasons })
            })
            .collect()
    }

    /// Get runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "Segment Analyzer Configuration:\n\
            - Max parallelism: {}\n\
            - Blacklist enabled: {}\n\
            - Season zero: {}\n\
            - Fingerprint cache: {}\n\
            - Libraries: {}\n\
            - Data directory: {}",
            self.analysis.max_parallelism,
            self.analysis.enable_blacklist,
            self.analysis.analyze_season_zero,
            self.analysis.cache_fingerprints,
            self.libraries
                .iter()
                .map(|l| l.name.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            self.storage.data_dir.display()
        )
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Configuration builder for programmatic config creation
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_max_parallelism(mut self, workers: usize) -> Self {
        self.config.analysis.max_parallelism = workers;
        self
    }

    pub fn enable_blacklist(mut self, enable: bool) -> Self {
        self.config.analysis.enable_blacklist = enable;
        self
    }

    pub fn reset_blacklist(mut self, reset: bool) -> Self {
        self.config.analysis.reset_blacklist = reset;
        self
    }

    pub fn analyze_season_zero(mut self, enable: bool) -> Self {
        self.config.analysis.analyze_season_zero = enable;
        self
    }

    pub fn cache_fingerprints(mut self, enable: bool) -> Self {
        self.config.analysis.cache_fingerprints = enable;
        self
    }

    pub fn with_selected_libraries(mut self, libraries: &str) -> Self {
        self.config.analysis.selected_libraries = libraries.to_string();
        self
    }

    pub fn with_skipped_tv_shows(mut self, shows: &str) -> Self {
        self.config.analysis.skipped_tv_shows = shows.to_string();
        self
    }

    pub fn with_skipped_movies(mut self, movies: &str) -> Self {
        self.config.analysis.skipped_movies = movies.to_string();
        self
    }

    pub fn with_data_dir(mut self, dir: PathBuf) -> Self {
        self.config.storage.fingerprint_cache_dir = dir.join("fingerprints");
        self.config.storage.data_dir = dir;
        self
    }

    pub fn with_library(mut self, root: LibraryRoot) -> Self {
        self.config.libraries.push(root);
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn build_chapter_regex(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    regex::RegexBuilder::new(pattern).case_insensitive(true).build()
}

/// Parse a `name=path` CLI library argument
pub fn parse_library_arg(arg: &str, kind: LibraryKind) -> Result<LibraryRoot> {
    let (name, path) = arg
        .split_once('=')
        .ok_or_else(|| anyhow!("Library must be given as NAME=PATH, got '{}'", arg))?;
    Ok(LibraryRoot {
        name: name.trim().to_string(),
        path: PathBuf::from(path.trim()),
        kind,
    })
}
