//! JSONL file replay

use super::EventSource;
use crate::normalizer::{decode_line, RawRecord};
use crate::telemetry::{self, CounterMetric};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Records buffered ahead of the runtime
const REPLAY_CHANNEL_CAPACITY: usize = 4096;

/// Line counters shared with the replay task
#[derive(Debug, Default)]
pub struct ReplayCounters {
    lines: AtomicU64,
    malformed: AtomicU64,
    records: AtomicU64,
}

impl ReplayCounters {
    pub fn lines(&self) -> u64 {
        self.lines.load(Ordering::Relaxed)
    }

    /// Lines that could not be decoded
    pub fn malformed(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }

    pub fn records(&self) -> u64 {
        self.records.load(Ordering::Relaxed)
    }
}

/// Replays JSONL capture files in the order given
pub struct JsonlReplaySource {
    paths: Vec<PathBuf>,
    counters: Arc<ReplayCounters>,
}

impl JsonlReplaySource {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self {
            paths,
            counters: Arc::new(ReplayCounters::default()),
        }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn counters(&self) -> Arc<ReplayCounters> {
        self.counters.clone()
    }

    async fn run_replay(
        paths: Vec<PathBuf>,
        tx: mpsc::Sender<RawRecord>,
        counters: Arc<ReplayCounters>,
    ) {
        for path in paths {
            let file = match File::open(&path).await {
                Ok(file) => file,
                Err(e) => {
                    tracing::error!(path = ?path, error = %e, "Failed to open replay file");
                    continue;
                }
            };
            tracing::info!(path = ?path, "Replaying file");

            let mut lines = BufReader::new(file).lines();
            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!(path = ?path, error = %e, "Failed to read replay file");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                counters.lines.fetch_add(1, Ordering::Relaxed);

                let records = match decode_line(&line) {
                    Ok(records) => records,
                    Err(e) => {
                        tracing::debug!(path = ?path, error = %e, "Skipping undecodable line");
                        counters.malformed.fetch_add(1, Ordering::Relaxed);
                        telemetry::increment(CounterMetric::MalformedRecords, 1);
                        continue;
                    }
                };

                for record in records {
                    counters.records.fetch_add(1, Ordering::Relaxed);
                    if tx.send(record).await.is_err() {
                        tracing::debug!("Record receiver dropped, stopping replay");
                        return;
                    }
                }
            }
        }

        tracing::info!(
            lines = counters.lines(),
            malformed = counters.malformed(),
            "Replay finished"
        );
    }
}

#[async_trait]
impl EventSource for JsonlReplaySource {
    async fn subscribe(&self) -> anyhow::Result<mpsc::Receiver<RawRecord>> {
        for path in &self.paths {
            if !tokio::fs::try_exists(path).await? {
                anyhow::bail!("Replay file not found: {}", path.display());
            }
        }

        let (tx, rx) = mpsc::channel(REPLAY_CHANNEL_CAPACITY);
        tracing::info!(files = self.paths.len(), "Starting JSONL replay");

        tokio::spawn(Self::run_replay(
            self.paths.clone(),
            tx,
            self.counters.clone(),
        ));

        Ok(rx)
    }
}
