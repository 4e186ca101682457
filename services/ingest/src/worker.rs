//! Ingestion worker: per-file, per-record dedup-then-insert.

use crate::extractor::{Extraction, FileClassifier, FileKind, RecordExtractor, RejectedRecord};
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use telemetry_storage::{encode_detections, InsertOutcome, StoreError, TelemetryStore};
use tracing::{debug, error, info, instrument, warn};

/// Something that went wrong for one file or one record
#[derive(Debug, Clone, PartialEq)]
pub struct IngestFailure {
    pub path: PathBuf,
    /// Index of the record in the file's top-level array, if record-level
    pub record_index: Option<usize>,
    pub reason: String,
}

/// Outcome of ingesting a batch of files
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    /// Files that matched a telemetry kind
    pub files_seen: usize,
    /// Files with an unrecognized name
    pub files_ignored: usize,
    /// Rows appended
    pub inserted: usize,
    /// Records already present in the store
    pub duplicates: usize,
    pub failures: Vec<IngestFailure>,
    /// Files abandoned on a store error; safe to ingest again
    pub retry: Vec<PathBuf>,
}

impl IngestReport {
    fn absorb(&mut self, other: IngestReport) {
        self.files_seen += other.files_seen;
        self.files_ignored += other.files_ignored;
        self.inserted += other.inserted;
        self.duplicates += other.duplicates;
        self.failures.extend(other.failures);
        self.retry.extend(other.retry);
    }

    fn count(&mut self, outcome: InsertOutcome) {
        match outcome {
            InsertOutcome::Inserted => self.inserted += 1,
            InsertOutcome::Duplicate => self.duplicates += 1,
        }
    }

    fn fail(&mut self, path: &Path, record_index: Option<usize>, reason: impl ToString) {
        self.failures.push(IngestFailure {
            path: path.to_path_buf(),
            record_index,
            reason: reason.to_string(),
        });
    }
}

/// Loads classified telemetry files into the store
#[derive(Clone)]
pub struct Ingestor {
    store: Arc<dyn TelemetryStore>,
    classifier: FileClassifier,
    extractor: RecordExtractor,
    file_concurrency: usize,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn TelemetryStore>,
        classifier: FileClassifier,
        extractor: RecordExtractor,
    ) -> Self {
        Self {
            store,
            classifier,
            extractor,
            file_concurrency: 1,
        }
    }

    /// Process up to `limit` files of a batch concurrently
    pub fn with_file_concurrency(mut self, limit: usize) -> Self {
        self.file_concurrency = limit.max(1);
        self
    }

    /// Ingest a batch of files.
    ///
    /// Malformed files and records are reported and skipped; a store error
    /// stops only the file being processed and lists it in `retry`. Safe to
    /// run concurrently with itself over overlapping batches: the store's
    /// insert-if-absent keeps (vehicle_id, timestamp) unique.
    #[instrument(skip(self, files), fields(files = files.len()))]
    pub async fn ingest(&self, files: &[PathBuf]) -> IngestReport {
        let reports: Vec<IngestReport> = stream::iter(files.to_vec())
            .map(|path| async move { self.ingest_file(&path).await })
            .buffer_unordered(self.file_concurrency)
            .collect()
            .await;

        let mut report = IngestReport::default();
        for file_report in reports {
            report.absorb(file_report);
        }

        metrics::counter!("ingest.records.inserted").increment(report.inserted as u64);
        metrics::counter!("ingest.records.duplicate").increment(report.duplicates as u64);

        info!(
            files_seen = report.files_seen,
            files_ignored = report.files_ignored,
            inserted = report.inserted,
            duplicates = report.duplicates,
            failures = report.failures.len(),
            retry = report.retry.len(),
            "Batch ingested"
        );

        report
    }

    async fn ingest_file(&self, path: &Path) -> IngestReport {
        let mut report = IngestReport::default();

        let kind = self.classifier.classify_path(path);
        if kind == FileKind::Unknown {
            debug!(path = %path.display(), "Ignoring unrecognized file");
            report.files_ignored += 1;
            return report;
        }
        report.files_seen += 1;

        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read file");
                metrics::counter!("ingest.files.failed").increment(1);
                report.fail(path, None, format!("read failed: {}", e));
                return report;
            }
        };

        let result = match kind {
            FileKind::Detections => self.load_detections(path, &contents, &mut report).await,
            FileKind::Status => self.load_status(path, &contents, &mut report).await,
            FileKind::Unknown => Ok(()),
        };

        if let Err(e) = result {
            error!(path = %path.display(), error = %e, "Store error, abandoning file");
            metrics::counter!("ingest.files.failed").increment(1);
            report.fail(path, None, e);
            report.retry.push(path.to_path_buf());
        }

        report
    }

    async fn load_detections(
        &self,
        path: &Path,
        contents: &str,
        report: &mut IngestReport,
    ) -> Result<(), StoreError> {
        let extraction = match self.extractor.extract_detections(contents) {
            Ok(extraction) => extraction,
            Err(e) => {
                reject_file(path, e, report);
                return Ok(());
            }
        };
        let Extraction { records, rejected } = extraction;
        reject_records(path, rejected, report);

        for record in records {
            let payload = encode_detections(&record.detections);
            let outcome = self
                .store
                .insert_detection(&record.vehicle_id, &record.timestamp, &payload)
                .await?;
            report.count(outcome);
        }
        Ok(())
    }

    async fn load_status(
        &self,
        path: &Path,
        contents: &str,
        report: &mut IngestReport,
    ) -> Result<(), StoreError> {
        let extraction = match self.extractor.extract_status(contents) {
            Ok(extraction) => extraction,
            Err(e) => {
                reject_file(path, e, report);
                return Ok(());
            }
        };
        let Extraction { records, rejected } = extraction;
        reject_records(path, rejected, report);

        for record in records {
            let outcome = self
                .store
                .insert_status(&record.vehicle_id, &record.timestamp, &record.status)
                .await?;
            report.count(outcome);
        }
        Ok(())
    }
}

fn reject_file(path: &Path, error: impl std::fmt::Display, report: &mut IngestReport) {
    warn!(path = %path.display(), error = %error, "Malformed file skipped");
    metrics::counter!("ingest.files.failed").increment(1);
    report.fail(path, None, error);
}

fn reject_records(path: &Path, rejected: Vec<RejectedRecord>, report: &mut IngestReport) {
    for RejectedRecord { index, error } in rejected {
        warn!(path = %path.display(), index, error = %error, "Malformed record skipped");
        metrics::counter!("ingest.records.rejected").increment(1);
        report.fail(path, Some(index), error);
    }
}
