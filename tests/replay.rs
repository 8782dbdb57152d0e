//! Replay through the async runtime into Parquet

use lob_pipeline::config::Config;
use lob_pipeline::data::{DataRecorder, ParquetReader};
use lob_pipeline::features::FeatureLayout;
use lob_pipeline::pipeline::runtime;
use lob_pipeline::source::{EventSource, JsonlReplaySource};
use std::io::Write;
use tempfile::{NamedTempFile, TempDir};

fn capture(instrument: &str, updates: u64) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, r#"{{"kind":"full_snapshot","side":"bid","price":"100","quantity":"1","sequence_num":1,"timestamp":"2025-11-07T10:00:00Z","instrument_id":"{instrument}"}}"#).unwrap();
    writeln!(file, r#"{{"kind":"full_snapshot","side":"ask","price":"101","quantity":"1","sequence_num":1,"timestamp":"2025-11-07T10:00:00Z","instrument_id":"{instrument}"}}"#).unwrap();
    writeln!(file, "this line is not json").unwrap();
    for i in 1..=updates {
        let secs = i * 5;
        writeln!(
            file,
            r#"{{"kind":"incremental_update","side":"bid","price":"100","quantity":"{}","sequence_num":{},"timestamp":"2025-11-07T10:{:02}:{:02}Z","instrument_id":"{instrument}"}}"#,
            i + 1,
            i + 1,
            secs / 60,
            secs % 60
        )
        .unwrap();
    }
    file
}

#[tokio::test]
async fn test_replay_to_parquet() {
    let btc = capture("BTC-TEST", 30);
    let eth = capture("ETH-TEST", 12);
    let out_dir = TempDir::new().unwrap();

    let mut config = Config::default();
    config.data.output_dir = out_dir.path().to_path_buf();
    config.data.buffer_size = 4;

    let source = JsonlReplaySource::new(vec![btc.path().to_path_buf(), eth.path().to_path_buf()]);
    let counters = source.counters();
    let records = source.subscribe().await.unwrap();

    let recorder = DataRecorder::new(&config.data, FeatureLayout::from_config(&config));
    let stats = runtime::run(
        config,
        records,
        recorder.sender(),
        std::future::pending::<()>(),
    )
    .await
    .unwrap();
    let written = recorder.close().await.unwrap();

    assert_eq!(counters.malformed(), 2);
    assert_eq!(stats.malformed, 0);
    assert_eq!(stats.book_events, 4 + 30 + 12);
    // Boundaries strictly before the last update: 0..=140 and 0..=50
    assert_eq!(stats.snapshots, 15 + 6);
    assert_eq!(written.records_written, stats.records_emitted());
    assert_eq!(written.records_written, 21);

    let files = ParquetReader::discover(out_dir.path()).unwrap();
    assert!(files
        .iter()
        .all(|p| p.to_string_lossy().contains("date=2025-11-07")));

    let mut rows = Vec::new();
    for file in &files {
        rows.extend(ParquetReader::new(file.clone()).read_features().unwrap());
    }
    assert_eq!(rows.len(), 21);
    assert_eq!(rows.iter().filter(|r| r.instrument_id == "BTC-TEST").count(), 15);
    assert_eq!(rows.iter().filter(|r| r.instrument_id == "ETH-TEST").count(), 6);
    assert!(rows.iter().all(|r| r.session_id == 1));
}
