//! Background recorder for feature records

use super::parquet::ParquetWriter;
use crate::config::DataConfig;
use crate::features::{FeatureLayout, FeatureRecord};
use crate::telemetry::{self, CounterMetric, GaugeMetric};
use chrono::{Duration, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

/// Records queued between the pipeline and the writer task
const RECORDER_CHANNEL_CAPACITY: usize = 10_000;

type PartitionKey = (NaiveDate, String);

/// Writes feature records to partitioned Parquet files
///
/// Each `(date, instrument)` partition is buffered separately and flushed when
/// it reaches `buffer_size`, when `flush_interval_secs` passes, and on close.
pub struct DataRecorder {
    output_dir: PathBuf,
    tx: mpsc::Sender<FeatureRecord>,
    stats: Arc<RwLock<RecorderStats>>,
    handle: JoinHandle<()>,
}

/// Recording statistics
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RecorderStats {
    pub records_received: u64,
    pub records_written: u64,
    pub files_written: u64,
    pub write_errors: u64,
    pub last_flush: Option<chrono::DateTime<Utc>>,
}

impl DataRecorder {
    /// Create a recorder and spawn its writer task
    pub fn new(config: &DataConfig, layout: FeatureLayout) -> Self {
        let (tx, rx) = mpsc::channel(RECORDER_CHANNEL_CAPACITY);
        let stats = Arc::new(RwLock::new(RecorderStats::default()));

        let writer = ParquetWriter::new(config.output_dir.clone(), layout);
        let handle = tokio::spawn(Self::run_writer(
            rx,
            writer,
            config.clone(),
            stats.clone(),
        ));

        Self {
            output_dir: config.output_dir.clone(),
            tx,
            stats,
            handle,
        }
    }

    /// Sender feeding the writer task
    pub fn sender(&self) -> mpsc::Sender<FeatureRecord> {
        self.tx.clone()
    }

    /// Record one feature record
    pub async fn record(&self, record: FeatureRecord) -> anyhow::Result<()> {
        self.tx
            .send(record)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to send feature record: {}", e))?;
        Ok(())
    }

    /// Get output directory
    pub fn output_dir(&self) -> &PathBuf {
        &self.output_dir
    }

    /// Get current statistics
    pub async fn stats(&self) -> RecorderStats {
        self.stats.read().await.clone()
    }

    /// Flush everything buffered and stop the writer
    ///
    /// Waits until every sender obtained from `sender()` has been dropped.
    pub async fn close(self) -> anyhow::Result<RecorderStats> {
        drop(self.tx);
        self.handle
            .await
            .map_err(|e| anyhow::anyhow!("Recorder task failed: {}", e))?;
        let stats = self.stats.read().await.clone();
        Ok(stats)
    }

    async fn run_writer(
        mut rx: mpsc::Receiver<FeatureRecord>,
        mut writer: ParquetWriter,
        config: DataConfig,
        stats: Arc<RwLock<RecorderStats>>,
    ) {
        let mut buffers: BTreeMap<PartitionKey, Vec<FeatureRecord>> = BTreeMap::new();
        let mut buffered = 0usize;
        let mut last_flush = Utc::now();
        let flush_interval = Duration::seconds(config.flush_interval_secs as i64);
        let buffer_size = config.buffer_size.max(1);

        loop {
            let timeout = tokio::time::Duration::from_secs(config.flush_interval_secs.max(1));

            tokio::select! {
                result = rx.recv() => {
                    let Some(record) = result else {
                        let keys: Vec<PartitionKey> = buffers.keys().cloned().collect();
                        for key in keys {
                            Self::flush_partition(&key, &mut buffers, &mut writer, &stats).await;
                        }
                        telemetry::set_gauge(GaugeMetric::RecorderBuffered, 0.0);
                        tracing::info!("Feature writer shutting down");
                        break;
                    };

                    stats.write().await.records_received += 1;

                    let key = (record.sample_time().date_naive(), record.instrument_id().to_string());
                    let buffer = buffers.entry(key.clone()).or_default();
                    buffer.push(record);
                    buffered += 1;

                    if buffer.len() >= buffer_size {
                        buffered -= Self::flush_partition(&key, &mut buffers, &mut writer, &stats).await;
                        last_flush = Utc::now();
                    }
                    telemetry::set_gauge(GaugeMetric::RecorderBuffered, buffered as f64);
                }

                _ = tokio::time::sleep(timeout) => {
                    let now = Utc::now();
                    if now - last_flush >= flush_interval && buffered > 0 {
                        let keys: Vec<PartitionKey> = buffers.keys().cloned().collect();
                        for key in keys {
                            buffered -= Self::flush_partition(&key, &mut buffers, &mut writer, &stats).await;
                        }
                        telemetry::set_gauge(GaugeMetric::RecorderBuffered, buffered as f64);
                        last_flush = now;
                    }
                }
            }
        }
    }

    /// Write one partition's buffer; returns the number of records removed
    async fn flush_partition(
        key: &PartitionKey,
        buffers: &mut BTreeMap<PartitionKey, Vec<FeatureRecord>>,
        writer: &mut ParquetWriter,
        stats: &Arc<RwLock<RecorderStats>>,
    ) -> usize {
        let Some(records) = buffers.remove(key) else {
            return 0;
        };
        if records.is_empty() {
            return 0;
        }

        let now = Utc::now();
        let count = records.len();

        match writer.write_partitioned(&records, now) {
            Ok(paths) => {
                let mut s = stats.write().await;
                s.records_written += count as u64;
                s.files_written += paths.len() as u64;
                s.last_flush = Some(now);
                telemetry::increment(CounterMetric::RecordsWritten, count as u64);
                tracing::debug!(count, date = %key.0, instrument = %key.1, "Flushed feature records");
            }
            Err(e) => {
                stats.write().await.write_errors += 1;
                tracing::error!(error = %e, instrument = %key.1, "Failed to write feature records");
            }
        }

        count
    }
}
