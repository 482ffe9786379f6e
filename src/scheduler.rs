use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::analyzers::{AnalyzerChainFactory, StandardChainFactory};
use crate::context::AnalysisContext;
use crate::models::SegmentKind;
use crate::orchestrator::{AnalysisOrchestrator, AnalysisRunReport, LogProgress};

/// Something that happened in the library
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibraryEvent {
    ScanCompleted,
    ItemAdded(Uuid),
    ItemUpdated(Uuid),
}

impl LibraryEvent {
    fn item_id(&self) -> Option<Uuid> {
        match self {
            LibraryEvent::ScanCompleted => None,
            LibraryEvent::ItemAdded(id) | LibraryEvent::ItemUpdated(id) => Some(*id),
        }
    }
}

/// Decides when analysis runs and runs every segment kind in turn
pub struct AnalysisScheduler {
    ctx: AnalysisContext,
    factory: Arc<dyn AnalyzerChainFactory>,
    kinds: Vec<SegmentKind>,
    /// Set from `reset_blacklist` and consumed by the first run
    reset_pending: AtomicBool,
}

impl AnalysisScheduler {
    pub fn new(ctx: AnalysisContext) -> Result<Self> {
        let factory = Arc::new(StandardChainFactory::new(&ctx)?);
        Ok(Self::with_chain_factory(ctx, factory))
    }

    pub fn with_chain_factory(ctx: AnalysisContext, factory: Arc<dyn AnalyzerChainFactory>) -> Self {
        let reset_pending = AtomicBool::new(ctx.config.analysis.reset_blacklist);
        Self {
            ctx,
            factory,
            kinds: SegmentKind::all().to_vec(),
            reset_pending,
        }
    }

    /// Restrict runs to the given kinds
    pub fn with_kinds(mut self, kinds: Vec<SegmentKind>) -> Self {
        self.kinds = kinds;
        self
    }

    /// Trigger policy
    pub fn should_run(&self, event: &LibraryEvent) -> bool {
        let general = &self.ctx.config.general;
        match event {
            LibraryEvent::ScanCompleted => general.run_after_library_scan,
            LibraryEvent::ItemAdded(_) | LibraryEvent::ItemUpdated(_) => {
                general.run_after_add_or_update_event
            }
        }
    }

    /// Clear the blacklist if a reset was requested and not yet done
    async fn take_blacklist_reset(&self) -> Result<()> {
        if self.reset_pending.swap(false, Ordering::SeqCst) {
            self.ctx.blacklist.reset_blacklist().await?;
        }
        Ok(())
    }

    /// One run per configured kind; stops early when cancelled
    pub async fn run_once(
        &self,
        forced: &[Uuid],
        cancel: &CancellationToken,
    ) -> Result<Vec<AnalysisRunReport>> {
        self.take_blacklist_reset().await?;

        let mut reports = Vec::with_capacity(self.kinds.len());
        for &kind in &self.kinds {
            if cancel.is_cancelled() {
                break;
            }

            let orchestrator =
                AnalysisOrchestrator::with_chain_factory(self.ctx.clone(), kind, self.factory.clone())
                    .with_forced_items(forced.iter().copied());
            reports.push(orchestrator.run(&LogProgress, cancel.clone()).await?);
        }
        Ok(reports)
    }

    /// Run for a batch of events if any of them is a trigger
    pub async fn handle_events(
        &self,
        events: &[LibraryEvent],
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<AnalysisRunReport>>> {
        let triggers: Vec<&LibraryEvent> = events.iter().filter(|e| self.should_run(e)).collect();
        if triggers.is_empty() {
            debug!("Ignoring {} library events", events.len());
            return Ok(None);
        }

        let forced: Vec<Uuid> = triggers.iter().filter_map(|e| e.item_id()).collect();
        info!(
            "⚡ Starting analysis after {} library events ({} changed items)",
            triggers.len(),
            forced.len()
        );
        self.run_once(&forced, cancel).await.map(Some)
    }

    /// Run on every interval tick and every library event until cancelled.
    ///
    /// Ticks count as completed library scans.
    pub async fn run_continuous(
        &self,
        mut events: mpsc::Receiver<LibraryEvent>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let interval_secs = self.ctx.config.general.scan_interval_secs.max(1);
        info!("⏱️  Continuous mode, scanning every {} seconds", interval_secs);

        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        let mut events_open = true;

        loop {
            let batch = tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => vec![LibraryEvent::ScanCompleted],
                event = events.recv(), if events_open => match event {
                    Some(event) => {
                        let mut batch = vec![event];
                        while let Ok(more) = events.try_recv() {
                            batch.push(more);
                        }
                        batch
                    }
                    None => {
                        events_open = false;
                        continue;
                    }
                },
            };

            if let Err(e) = self.handle_events(&batch, &cancel).await {
                error!("Analysis run failed: {:#}", e);
            }
        }

        info!("🛑 Continuous mode stopped");
        Ok(())
    }
}
