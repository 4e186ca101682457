use filetime::{set_file_mtime, FileTime};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use telemetry_ingest::{
    DirectoryMonitor, FileClassifier, IngestConfig, Ingestor, RecordExtractor,
};
use telemetry_storage::{DatabaseConfig, SqliteStore, TelemetryQueries, TelemetryStore};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

struct Pipeline {
    _db_dir: TempDir,
    watch_dir: TempDir,
    store: Arc<SqliteStore>,
    ingestor: Ingestor,
    queries: TelemetryQueries,
}

async fn pipeline() -> Pipeline {
    let db_dir = TempDir::new().unwrap();
    let watch_dir = TempDir::new().unwrap();
    let store = Arc::new(
        SqliteStore::open(&DatabaseConfig::at(db_dir.path().join("telemetry.db")))
            .await
            .unwrap(),
    );
    let config = IngestConfig::default();
    let ingestor = Ingestor::new(
        store.clone(),
        FileClassifier::from_config(&config.watch),
        RecordExtractor::from_config(&config.ingestion),
    )
    .with_file_concurrency(config.ingestion.file_concurrency);
    let queries = TelemetryQueries::new(store.clone());

    Pipeline {
        _db_dir: db_dir,
        watch_dir,
        store,
        ingestor,
        queries,
    }
}

fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path
}

const TWO_CAR_EVENTS: &str = r#"{
    "objects_detection_events": [
        {
            "vehicle_id": "V1",
            "detection_time": "2024-01-01T00:00:00",
            "detections": [{"object_type": "car", "object_value": 12.5}]
        },
        {
            "vehicle_id": "V1",
            "detection_time": "2024-01-01T00:01:00",
            "detections": [{"object_type": "car", "object_value": 12.5}]
        }
    ]
}"#;

const V2_STATUS: &str = r#"{
    "vehicle_status": [
        {"vehicle_id": "V2", "report_time": "t1", "status": "normal"},
        {"vehicle_id": "V2", "report_time": "t2", "status": "accident"}
    ]
}"#;

#[tokio::test]
async fn test_latest_detections_summary_scenario() {
    let p = pipeline().await;
    let file = write(p.watch_dir.path(), "object_detection_1.json", TWO_CAR_EVENTS);

    let report = p.ingestor.ingest(&[file]).await;

    assert_eq!(report.inserted, 2);
    assert!(report.failures.is_empty());
    assert_eq!(
        p.queries.latest_detections_summary("V1").await.unwrap(),
        "The following objects were detected:\n12.5 car"
    );
}

#[tokio::test]
async fn test_status_and_accident_scenario() {
    let p = pipeline().await;
    let file = write(p.watch_dir.path(), "vehicle_status_1.json", V2_STATUS);

    p.ingestor.ingest(&[file]).await;

    assert_eq!(p.queries.current_status("V2").await.unwrap(), "accident");
    assert!(p.queries.has_accident_history("V2").await.unwrap());
    assert!(!p.queries.is_clean_record("V2").await.unwrap());
    assert!(!p.queries.has_accident_history("V3").await.unwrap());
}

#[tokio::test]
async fn test_malformed_event_alongside_valid_status() {
    let p = pipeline().await;
    let detections = write(
        p.watch_dir.path(),
        "object_detection_bad.json",
        r#"{"objects_detection_events": [
            {"detection_time": "t1", "detections": [{"object_type": "car", "object_value": 1}]},
            {"vehicle_id": "V7", "detection_time": "t2", "detections": [{"object_type": "bike", "object_value": 4}]}
        ]}"#,
    );
    let status = write(p.watch_dir.path(), "vehicle_status_ok.json", V2_STATUS);

    let report = p.ingestor.ingest(&[detections.clone(), status]).await;

    assert_eq!(report.files_seen, 2);
    assert_eq!(report.inserted, 3);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].path, detections);
    assert_eq!(report.failures[0].record_index, Some(0));
    assert_eq!(p.queries.current_status("V2").await.unwrap(), "accident");
    assert_eq!(
        p.queries.latest_detections_summary("V7").await.unwrap(),
        "The following objects were detected:\n4 bike"
    );
}

#[tokio::test]
async fn test_latest_follows_timestamp_across_files() {
    let p = pipeline().await;
    let newer = write(
        p.watch_dir.path(),
        "vehicle_status_a.json",
        r#"{"vehicle_status": [{"vehicle_id": "V4", "report_time": "2024-03-01T10:00:00", "status": "parked"}]}"#,
    );
    let older = write(
        p.watch_dir.path(),
        "vehicle_status_b.json",
        r#"{"vehicle_status": [
            {"vehicle_id": "V4", "report_time": "2024-03-01T08:00:00", "status": "driving"},
            {"vehicle_id": "V4", "report_time": "2024-03-01T09:00:00", "status": "accident"}
        ]}"#,
    );

    // Newest row inserted first
    p.ingestor.ingest(&[newer]).await;
    p.ingestor.ingest(&[older]).await;

    assert_eq!(p.queries.current_status("V4").await.unwrap(), "parked");
    assert!(p.queries.has_accident_history("V4").await.unwrap());
}

#[tokio::test]
async fn test_overlapping_concurrent_ingests_do_not_duplicate() {
    let p = pipeline().await;
    let files = vec![
        write(p.watch_dir.path(), "object_detection_1.json", TWO_CAR_EVENTS),
        write(p.watch_dir.path(), "vehicle_status_1.json", V2_STATUS),
    ];
    let other = p.ingestor.clone();

    let (a, b) = futures::join!(p.ingestor.ingest(&files), other.ingest(&files));
    let again = p.ingestor.ingest(&files).await;

    assert_eq!(a.inserted + b.inserted, 4);
    assert_eq!(a.duplicates + b.duplicates, 4);
    assert_eq!(again.inserted, 0);

    let stats = p.store.stats().await.unwrap();
    assert_eq!(stats.detection_rows, 2);
    assert_eq!(stats.status_rows, 2);
    assert_eq!(stats.vehicle_count, 2);
}

#[tokio::test]
async fn test_monitor_end_to_end() {
    let p = pipeline().await;
    let mut config = IngestConfig::default();
    config.watch.directory = p.watch_dir.path().to_path_buf();
    config.watch.poll_interval_ms = 25;
    config.watch.process_existing = true;
    config.ingestion.max_concurrent_batches = 2;

    write(p.watch_dir.path(), "object_detection_1.json", TWO_CAR_EVENTS);
    write(p.watch_dir.path(), "readme.txt", "not telemetry");

    let cancel = CancellationToken::new();
    let monitor = DirectoryMonitor::new(&config, p.ingestor.clone());
    let handle = tokio::spawn(monitor.run(cancel.clone()));

    // A file arriving while the monitor runs is picked up on a later cycle
    tokio::time::sleep(Duration::from_millis(100)).await;
    let status = write(p.watch_dir.path(), "vehicle_status_1.json", V2_STATUS);
    let later = FileTime::from_system_time(SystemTime::now() + Duration::from_secs(5));
    set_file_mtime(&status, later).unwrap();

    let mut done = false;
    for _ in 0..200 {
        if p.store.status_exists("V2", "t2").await.unwrap()
            && p.store.detection_exists("V1", "2024-01-01T00:01:00").await.unwrap()
        {
            done = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    cancel.cancel();
    let summary = handle.await.unwrap();

    assert!(done, "monitor did not ingest both files");
    assert!(summary.batches_dispatched >= 1);
    assert_eq!(summary.scan_failures, 0);
    assert_eq!(p.queries.current_status("V2").await.unwrap(), "accident");

    p.store.close().await;
    assert!(p.queries.current_status("V2").await.is_err());
}
