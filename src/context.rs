use std::sync::Arc;

use crate::config::Config;
use crate::library::LibraryProvider;
use crate::media::MediaProbe;
use crate::store::{BlacklistStore, MetadataDb, SegmentStore};

/// Everything a run needs, built once and handed to each component
#[derive(Clone)]
pub struct AnalysisContext {
    pub config: Arc<Config>,
    pub library: Arc<dyn LibraryProvider>,
    pub segments: Arc<dyn SegmentStore>,
    pub blacklist: Arc<dyn BlacklistStore>,
    pub probe: Arc<dyn MediaProbe>,
}

impl AnalysisContext {
    pub fn new(
        config: Config,
        library: Arc<dyn LibraryProvider>,
        db: MetadataDb,
        probe: Arc<dyn MediaProbe>,
    ) -> Self {
        let db = Arc::new(db);
        Self {
            config: Arc::new(config),
            library,
            segments: db.clone(),
            blacklist: db,
            probe,
        }
    }
}

impl std::fmt::Debug for AnalysisContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisContext")
            .field("max_parallelism", &self.config.analysis.max_parallelism)
            .field("enable_blacklist", &self.config.analysis.enable_blacklist)
            .finish_non_exhaustive()
    }
}
