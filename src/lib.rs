/// Media Segment Analyzer
///
/// Batch detection of intros and ending credits in TV episodes and movies,
/// using chapter markers, audio fingerprints and black frames.

pub mod analyzers;
pub mod config;
pub mod context;
pub mod error;
pub mod library;
pub mod media;
pub mod models;
pub mod orchestrator;
pub mod queue;
pub mod scheduler;
pub mod store;

// Re-export main types for easy access
pub use crate::analyzers::{
    AnalysisResult, AnalysisStatus, AnalyzerChain, AnalyzerChainFactory, MediaAnalyzer,
    StandardChainFactory,
};
pub use crate::config::{Config, ConfigBuilder};
pub use crate::context::AnalysisContext;
pub use crate::error::{ConfigError, ProbeError};
pub use crate::library::{FileSystemLibrary, InMemoryLibrary, LibraryItem, LibraryProvider};
pub use crate::media::{FfmpegProbe, MediaProbe};
pub use crate::models::{
    AnalyzerKind, GroupKey, MediaKind, MediaSegment, QueuedMedia, SegmentKind, SegmentMetadata,
    TimeRange,
};
pub use crate::orchestrator::{AnalysisOrchestrator, AnalysisRunReport, ProgressReporter, RunState};
pub use crate::queue::{AnalysisQueue, QueueManager};
pub use crate::scheduler::{AnalysisScheduler, LibraryEvent};
pub use crate::store::{BlacklistStore, MetadataDb, SegmentStore};
