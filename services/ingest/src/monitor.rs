//! Scan loop and batch dispatch.
//!
//! The monitor scans the watched directory on a fixed interval and hands each
//! non-empty batch to a spawned ingestion task. It never waits on ingestion:
//! when all batch permits are taken the batch is deferred, the watermark is
//! left where it was, and the same files come back on the next cycle.
//!
//! Files of a batch that timed out, and files abandoned on a store error, are
//! queued and joined to the next dispatched batch. Inserts are idempotent so
//! the rows that did land are simply counted as duplicates.

use crate::config::IngestConfig;
use crate::scanner::{scan, Watermark};
use crate::worker::{IngestReport, Ingestor};
use futures::FutureExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// What a single scan cycle did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// No new files
    Idle,
    /// A batch of this many files was handed to an ingestion task
    Dispatched(usize),
    /// New files were found but every batch permit was in use
    Deferred(usize),
    /// The directory could not be listed
    ScanFailed,
}

/// Counters for one run of the monitor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorSummary {
    pub cycles: u64,
    pub batches_dispatched: u64,
    pub batches_deferred: u64,
    pub scan_failures: u64,
}

impl MonitorSummary {
    fn record(&mut self, outcome: &PollOutcome) {
        self.cycles += 1;
        match outcome {
            PollOutcome::Dispatched(_) => self.batches_dispatched += 1,
            PollOutcome::Deferred(_) => self.batches_deferred += 1,
            PollOutcome::ScanFailed => self.scan_failures += 1,
            PollOutcome::Idle => {}
        }
    }
}

/// What a finished ingestion task hands back
struct BatchResult {
    /// `None` when the task timed out
    report: Option<IngestReport>,
    retry: Vec<PathBuf>,
}

/// Watches a directory and dispatches new files for ingestion
pub struct DirectoryMonitor {
    directory: PathBuf,
    poll_interval: Duration,
    task_timeout: Duration,
    watermark: Watermark,
    ingestor: Ingestor,
    permits: Arc<Semaphore>,
    tasks: JoinSet<BatchResult>,
    /// Files owed another attempt
    requeued: Vec<PathBuf>,
}

impl DirectoryMonitor {
    pub fn new(config: &IngestConfig, ingestor: Ingestor) -> Self {
        Self {
            directory: config.watch.directory.clone(),
            poll_interval: config.watch.poll_interval(),
            task_timeout: config.ingestion.task_timeout(),
            watermark: Watermark::initial(config.watch.process_existing),
            ingestor,
            permits: Arc::new(Semaphore::new(config.ingestion.max_concurrent_batches)),
            tasks: JoinSet::new(),
            requeued: Vec::new(),
        }
    }

    /// Start from an explicit watermark
    pub fn with_watermark(mut self, watermark: Watermark) -> Self {
        self.watermark = watermark;
        self
    }

    pub fn watermark(&self) -> Watermark {
        self.watermark
    }

    /// Number of ingestion tasks not yet reaped
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Files waiting to be joined to the next dispatched batch
    pub fn requeued(&self) -> &[PathBuf] {
        &self.requeued
    }

    /// Run until `cancel` fires, then wait for in-flight ingestion to finish.
    #[instrument(skip(self, cancel), fields(directory = %self.directory.display()))]
    pub async fn run(mut self, cancel: CancellationToken) -> MonitorSummary {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut summary = MonitorSummary::default();

        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            watermark = %self.watermark.as_datetime(),
            "Starting directory monitor"
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            self.reap_finished();
            let outcome = self.poll().await;
            summary.record(&outcome);
        }

        info!(in_flight = self.tasks.len(), "Stop requested, waiting for ingestion tasks");
        self.drain().await;
        if !self.requeued.is_empty() {
            warn!(
                files = self.requeued.len(),
                "Stopping with files still owed a retry"
            );
        }
        info!(?summary, "Directory monitor stopped");

        summary
    }

    /// One scan cycle: scan, then dispatch the new and requeued files if a
    /// permit is free.
    pub async fn poll(&mut self) -> PollOutcome {
        let files = match scan(&self.directory, &self.watermark).await {
            Ok(files) => files,
            Err(e) => {
                warn!(error = %e, "Scan failed, retrying next cycle");
                metrics::counter!("ingest.scan.failed").increment(1);
                return PollOutcome::ScanFailed;
            }
        };

        let mut paths: Vec<PathBuf> = files.iter().map(|f| f.path.clone()).collect();
        for path in &self.requeued {
            if !paths.contains(path) {
                paths.push(path.clone());
            }
        }

        if paths.is_empty() {
            return PollOutcome::Idle;
        }

        let permit = match self.permits.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                debug!(files = paths.len(), "All batch permits in use, deferring");
                metrics::counter!("ingest.batches.deferred").increment(1);
                return PollOutcome::Deferred(paths.len());
            }
        };

        self.watermark.advance(&files);
        self.requeued.clear();
        let count = paths.len();
        let ingestor = self.ingestor.clone();
        let timeout = self.task_timeout;

        self.tasks.spawn(async move {
            let _permit = permit;
            let outcome = tokio::time::timeout(timeout, ingestor.ingest(&paths)).await;
            match outcome {
                Ok(report) => BatchResult {
                    retry: report.retry.clone(),
                    report: Some(report),
                },
                Err(_) => {
                    warn!(
                        files = paths.len(),
                        timeout_secs = timeout.as_secs(),
                        "Ingestion task timed out, requeueing batch"
                    );
                    metrics::counter!("ingest.batches.timed_out").increment(1);
                    BatchResult {
                        report: None,
                        retry: paths,
                    }
                }
            }
        });

        debug!(files = count, watermark = %self.watermark.as_datetime(), "Dispatched batch");
        metrics::counter!("ingest.batches.dispatched").increment(1);
        PollOutcome::Dispatched(count)
    }

    /// Wait for every in-flight ingestion task and return the reports of
    /// those that completed
    pub async fn drain(&mut self) -> Vec<IngestReport> {
        let mut reports = Vec::new();
        while let Some(result) = self.tasks.join_next().await {
            if let Some(report) = self.settle(result) {
                reports.push(report);
            }
        }
        reports
    }

    /// Collect tasks that already finished without waiting on the rest
    fn reap_finished(&mut self) {
        while let Some(Some(result)) = self.tasks.join_next().now_or_never() {
            self.settle(result);
        }
    }

    fn settle(&mut self, result: Result<BatchResult, JoinError>) -> Option<IngestReport> {
        let batch = match result {
            Ok(batch) => batch,
            Err(e) => {
                error!(error = %e, "Ingestion task failed");
                return None;
            }
        };

        if !batch.retry.is_empty() {
            debug!(files = batch.retry.len(), "Requeueing files");
            metrics::counter!("ingest.files.requeued").increment(batch.retry.len() as u64);
        }
        for path in batch.retry {
            if !self.requeued.contains(&path) {
                self.requeued.push(path);
            }
        }
        batch.report
    }
}
