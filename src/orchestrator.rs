use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::analyzers::{AnalysisStatus, AnalyzerChainFactory, StandardChainFactory};
use crate::context::AnalysisContext;
use crate::models::{describe_group, MediaKind, QueuedMedia, SegmentKind};
use crate::queue::QueueManager;

/// Lifecycle of a single analysis run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Idle,
    BuildingQueue,
    ProcessingGroups,
    Done,
    Cancelled,
}

/// Receives progress in percent (0-100) after each analyzed group finishes
pub trait ProgressReporter: Send + Sync {
    fn report(&self, percent: f64);
}

impl<F> ProgressReporter for F
where
    F: Fn(f64) + Send + Sync,
{
    fn report(&self, percent: f64) {
        self(percent)
    }
}

/// Logs progress at info level
pub struct LogProgress;

impl ProgressReporter for LogProgress {
    fn report(&self, percent: f64) {
        info!("📈 Progress: {:.1}%", percent);
    }
}

/// Summary of a finished run
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRunReport {
    pub kind: SegmentKind,
    pub queued_items: usize,
    pub groups: usize,
    /// Items that went through the detector chain
    pub processed: usize,
    /// Segments written
    pub analyzed: usize,
    pub blacklisted: usize,
    pub skipped_groups: usize,
    pub cancelled_groups: usize,
    /// Identity and reason of each failed group
    pub failed_groups: Vec<String>,
    pub progress: f64,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: f64,
}

impl AnalysisRunReport {
    fn new(kind: SegmentKind) -> Self {
        Self {
            kind,
            queued_items: 0,
            groups: 0,
            processed: 0,
            analyzed: 0,
            blacklisted: 0,
            skipped_groups: 0,
            cancelled_groups: 0,
            failed_groups: Vec::new(),
            progress: 0.0,
            state: RunState::Idle,
            started_at: Utc::now(),
            elapsed_secs: 0.0,
        }
    }

    fn absorb(&mut self, outcome: GroupOutcome) {
        self.processed += outcome.processed;
        self.analyzed += outcome.analyzed;
        self.blacklisted += outcome.blacklisted;
        match outcome.status {
            GroupStatus::Processed => {}
            GroupStatus::Skipped => self.skipped_groups += 1,
            GroupStatus::Cancelled => self.cancelled_groups += 1,
            GroupStatus::Failed(reason) => {
                self.failed_groups.push(format!("{}: {}", outcome.label, reason))
            }
        }
    }
}

#[derive(Debug)]
enum GroupStatus {
    Processed,
    Skipped,
    Cancelled,
    Failed(String),
}

/// Completion message sent by each group task to the aggregator
#[derive(Debug)]
struct GroupOutcome {
    label: String,
    queued: usize,
    processed: usize,
    analyzed: usize,
    blacklisted: usize,
    status: GroupStatus,
}

impl GroupOutcome {
    fn new(label: String, queued: usize) -> Self {
        Self {
            label,
            queued,
            processed: 0,
            analyzed: 0,
            blacklisted: 0,
            status: GroupStatus::Processed,
        }
    }
}

/// State shared by every group task of one run
struct GroupRunner {
    ctx: AnalysisContext,
    queue: QueueManager,
    factory: Arc<dyn AnalyzerChainFactory>,
    kind: SegmentKind,
}

impl GroupRunner {
    async fn run(&self, items: Vec<QueuedMedia>, cancel: &CancellationToken) -> GroupOutcome {
        let mut outcome = GroupOutcome::new(describe_group(&items), items.len());

        if cancel.is_cancelled() {
            debug!("Skipping {}: run cancelled", outcome.label);
            outcome.status = GroupStatus::Cancelled;
            return outcome;
        }

        if let Err(e) = self.analyze(items, cancel, &mut outcome).await {
            warn!("Failed to analyze {} for {}: {:#}", outcome.label, self.kind, e);
            outcome.processed = 0;
            outcome.status = GroupStatus::Failed(e.to_string());
        }
        outcome
    }

    async fn analyze(
        &self,
        items: Vec<QueuedMedia>,
        cancel: &CancellationToken,
        outcome: &mut GroupOutcome,
    ) -> Result<()> {
        let kind = self.kind;
        let config = &self.ctx.config;

        // Runs can take hours; items may have been deleted meanwhile
        let items = self.queue.verify_group(items, kind).await?;
        let items = self.queue.filter_by_blacklist(items, kind).await?;
        if items.is_empty() {
            outcome.status = GroupStatus::Skipped;
            return Ok(());
        }

        let (items, has_unanalyzed) = self.queue.filter_by_existing_segments(items, kind).await?;
        if !has_unanalyzed {
            debug!("All items in {} have already been analyzed for {}", outcome.label, kind);
            outcome.status = GroupStatus::Skipped;
            return Ok(());
        }

        let first = &items[0];
        if first.is_episode() {
            if first.season_number == Some(0) && !config.analysis.analyze_season_zero {
                outcome.status = GroupStatus::Skipped;
                return Ok(());
            }
            info!("🔍 Analyzing {} files for {} from {}", items.len(), kind, outcome.label);
        } else if kind == SegmentKind::Intro {
            debug!("Skipping {}: movies are only analyzed for credits", outcome.label);
            outcome.status = GroupStatus::Skipped;
            return Ok(());
        } else {
            info!("🔍 Analyzing {} for {}", outcome.label, kind);
        }

        let media = first.kind;
        let chain = self.factory.build_chain(media, kind);
        let total = items.len();
        let mut remaining = items;

        for analyzer in chain {
            if remaining.is_empty() {
                break;
            }

            let result = analyzer.analyze(remaining, kind, cancel).await?;
            outcome.analyzed += self
                .ctx
                .segments
                .create_segments(&result.analyzed, &result.segments)
                .await?;
            debug!(
                "{} analyzed {} of {} in {}",
                analyzer.kind(),
                result.analyzed.len(),
                result.analyzed.len() + result.unanalyzed.len(),
                outcome.label
            );
            remaining = result.unanalyzed;

            match result.status {
                AnalysisStatus::Completed => {}
                AnalysisStatus::Cancelled => {
                    outcome.processed = outcome.analyzed;
                    outcome.status = GroupStatus::Cancelled;
                    return Ok(());
                }
                AnalysisStatus::FingerprintFailed(reason) => {
                    if media == MediaKind::Episode {
                        warn!("Unable to analyze {}: unable to fingerprint: {}", outcome.label, reason);
                    } else {
                        debug!("Unable to analyze {}: unable to fingerprint: {}", outcome.label, reason);
                    }
                    outcome.processed = 0;
                    outcome.status = GroupStatus::Failed(format!("unable to fingerprint: {}", reason));
                    return Ok(());
                }
            }
        }

        let leftovers: Vec<QueuedMedia> = remaining
            .into_iter()
            .filter(|item| !item.skip_prevent_analyzing)
            .collect();
        if !leftovers.is_empty() && config.analysis.enable_blacklist {
            outcome.blacklisted = self
                .ctx
                .blacklist
                .add_to_blacklist(&leftovers, kind, "No segment found by any analyzer")
                .await?;
        }

        outcome.processed = total;
        Ok(())
    }
}

/// Drives one analysis run for a segment kind over the whole library
pub struct AnalysisOrchestrator {
    ctx: AnalysisContext,
    kind: SegmentKind,
    factory: Arc<dyn AnalyzerChainFactory>,
    forced: HashSet<Uuid>,
    state: watch::Sender<RunState>,
}

impl AnalysisOrchestrator {
    /// Orchestrator using the chapter/chromaprint/black-frame chain
    pub fn new(ctx: AnalysisContext, kind: SegmentKind) -> Result<Self> {
        let factory = Arc::new(StandardChainFactory::new(&ctx)?);
        Ok(Self::with_chain_factory(ctx, kind, factory))
    }

    pub fn with_chain_factory(
        ctx: AnalysisContext,
        kind: SegmentKind,
        factory: Arc<dyn AnalyzerChainFactory>,
    ) -> Self {
        let (state, _) = watch::channel(RunState::Idle);
        Self {
            ctx,
            kind,
            factory,
            forced: HashSet::new(),
            state,
        }
    }

    /// Items analyzed even if blacklisted and never blacklisted themselves
    pub fn with_forced_items(mut self, ids: impl IntoIterator<Item = Uuid>) -> Self {
        self.forced.extend(ids);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    fn set_state(&self, state: RunState) {
        debug!("Run state -> {:?}", state);
        self.state.send_replace(state);
    }

    /// Analyze every eligible group, reporting progress after each one
    pub async fn run(
        &self,
        progress: &dyn ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<AnalysisRunReport> {
        let start = Instant::now();
        let mut report = AnalysisRunReport::new(self.kind);
        let config = self.ctx.config.clone();

        self.set_state(RunState::BuildingQueue);
        let queue_manager =
            QueueManager::new(self.ctx.clone()).with_forced_items(self.forced.iter().copied());
        let queue = match queue_manager.build_queue(self.kind).await {
            Ok(queue) => queue,
            Err(e) => {
                self.set_state(RunState::Idle);
                return Err(e);
            }
        };

        report.groups = queue.len();
        report.queued_items = queue.values().map(Vec::len).sum();
        if report.queued_items == 0 {
            info!("Nothing queued for {}", self.kind);
            return Ok(self.finish(report, &cancel, start));
        }

        self.set_state(RunState::ProcessingGroups);
        let workers = config.analysis.max_parallelism.max(1);
        info!(
            "🚀 Analyzing {} items in {} groups for {} with {} workers",
            report.queued_items, report.groups, self.kind, workers
        );

        let runner = Arc::new(GroupRunner {
            ctx: self.ctx.clone(),
            queue: queue_manager,
            factory: self.factory.clone(),
            kind: self.kind,
        });
        let semaphore = Arc::new(Semaphore::new(workers));
        let (tx, mut rx) = mpsc::channel::<GroupOutcome>(workers);

        for (key, items) in queue {
            let runner = Arc::clone(&runner);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let tx = tx.clone();

            tokio::spawn(async move {
                let outcome = match semaphore.acquire_owned().await {
                    Ok(_permit) => runner.run(items, &cancel).await,
                    Err(e) => {
                        let mut outcome = GroupOutcome::new(describe_group(&items), items.len());
                        outcome.status = GroupStatus::Failed(e.to_string());
                        outcome
                    }
                };

                if let Err(e) = tx.send(outcome).await {
                    error!("Failed to report result for {:?}: {}", key, e);
                }
            });
        }

        // Close the channel once every task has finished
        drop(tx);

        let mut finished_items = 0;
        while let Some(outcome) = rx.recv().await {
            finished_items += outcome.queued;
            let skipped = matches!(outcome.status, GroupStatus::Skipped);
            report.absorb(outcome);
            report.progress = finished_items as f64 * 100.0 / report.queued_items as f64;
            // Skipped groups still count towards later reports
            if !skipped {
                progress.report(report.progress);
            }
        }

        Ok(self.finish(report, &cancel, start))
    }

    fn finish(
        &self,
        mut report: AnalysisRunReport,
        cancel: &CancellationToken,
        start: Instant,
    ) -> AnalysisRunReport {
        report.state = if cancel.is_cancelled() {
            RunState::Cancelled
        } else {
            report.progress = 100.0;
            RunState::Done
        };
        report.elapsed_secs = start.elapsed().as_secs_f64();
        self.set_state(report.state);

        info!(
            "✅ {} run finished: {} processed, {} segments, {} blacklisted, {} failed groups in {:.1}s",
            report.kind,
            report.processed,
            report.analyzed,
            report.blacklisted,
            report.failed_groups.len(),
            report.elapsed_secs
        );
        report
    }
}
