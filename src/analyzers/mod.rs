//! Segment detectors and the chain they run in.
//!
//! Each detector receives the items the previous one left unanalyzed. Chapters
//! are always tried first, audio fingerprinting only for episodes and black
//! frames only when looking for credits.

pub mod black_frame;
pub mod cache;
pub mod chapter;
pub mod chromaprint;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::context::AnalysisContext;
use crate::models::{AnalyzerKind, MediaKind, MediaSegment, QueuedMedia, SegmentKind};

pub use black_frame::BlackFrameAnalyzer;
pub use chapter::ChapterAnalyzer;
pub use chromaprint::ChromaprintAnalyzer;

/// How a detector run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisStatus {
    Completed,
    /// Stopped early; results so far are still valid
    Cancelled,
    /// No item of the group could be fingerprinted
    FingerprintFailed(String),
}

/// Output of one detector over one group
#[derive(Debug, Clone)]
pub struct AnalysisResult {
    /// Items left for the next detector, in input order
    pub unanalyzed: Vec<QueuedMedia>,
    pub analyzed: Vec<QueuedMedia>,
    /// Detected segment per analyzed item
    pub segments: HashMap<Uuid, MediaSegment>,
    pub status: AnalysisStatus,
}

impl AnalysisResult {
    /// Split `items` by whether a segment was found, keeping their order
    pub fn partition(
        items: Vec<QueuedMedia>,
        segments: HashMap<Uuid, MediaSegment>,
        status: AnalysisStatus,
    ) -> Self {
        let (analyzed, unanalyzed) = items
            .into_iter()
            .partition(|item| segments.contains_key(&item.item_id));

        Self {
            unanalyzed,
            analyzed,
            segments,
            status,
        }
    }

    /// Nothing analyzed, every item passed through
    pub fn untouched(items: Vec<QueuedMedia>) -> Self {
        Self::partition(items, HashMap::new(), AnalysisStatus::Completed)
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == AnalysisStatus::Cancelled
    }
}

/// A strategy for locating segments in a batch of items from one group
#[async_trait]
pub trait MediaAnalyzer: Send + Sync {
    fn kind(&self) -> AnalyzerKind;

    async fn analyze(
        &self,
        items: Vec<QueuedMedia>,
        kind: SegmentKind,
        cancel: &CancellationToken,
    ) -> Result<AnalysisResult>;
}

/// Ordered detector chain for one (media kind, segment kind) pair
pub type AnalyzerChain = Vec<Arc<dyn MediaAnalyzer>>;

pub trait AnalyzerChainFactory: Send + Sync {
    fn build_chain(&self, media: MediaKind, kind: SegmentKind) -> AnalyzerChain;
}

/// Chapter, then chromaprint for episodes, then black frames for credits
pub struct StandardChainFactory {
    chapter: Arc<ChapterAnalyzer>,
    chromaprint: Arc<ChromaprintAnalyzer>,
    black_frame: Arc<BlackFrameAnalyzer>,
}

impl StandardChainFactory {
    pub fn new(ctx: &AnalysisContext) -> Result<Self> {
        Ok(Self {
            chapter: Arc::new(ChapterAnalyzer::new(ctx)?),
            chromaprint: Arc::new(ChromaprintAnalyzer::new(ctx)),
            black_frame: Arc::new(BlackFrameAnalyzer::new(ctx)),
        })
    }
}

impl AnalyzerChainFactory for StandardChainFactory {
    fn build_chain(&self, media: MediaKind, kind: SegmentKind) -> AnalyzerChain {
        let mut chain: AnalyzerChain = vec![self.chapter.clone()];

        if media == MediaKind::Episode {
            chain.push(self.chromaprint.clone());
        }
        if kind == SegmentKind::Outro {
            chain.push(self.black_frame.clone());
        }

        chain
    }
}
