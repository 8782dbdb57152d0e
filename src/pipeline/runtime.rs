//! Async multi-instrument runtime
//!
//! One tokio task per instrument, fed over a bounded channel. Workers own
//! their `InstrumentState` outright and share nothing mutable; their records
//! merge into a single output channel.

use super::{InstrumentState, PipelineStats};
use crate::config::Config;
use crate::features::FeatureRecord;
use crate::normalizer::{Event, Normalizer, RawRecord};
use crate::telemetry::{self, CounterMetric, GaugeMetric};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Events buffered per instrument worker
const WORKER_CHANNEL_CAPACITY: usize = 1024;

/// Route raw records to per-instrument workers until input ends or `shutdown` fires
///
/// On exit every worker's input is closed; workers flush their pending
/// records as expired before returning. Returns the merged counters.
pub async fn run<F>(
    config: Config,
    mut input: mpsc::Receiver<RawRecord>,
    output: mpsc::Sender<FeatureRecord>,
    shutdown: F,
) -> anyhow::Result<PipelineStats>
where
    F: Future<Output = ()> + Send,
{
    let config = Arc::new(config);
    let normalizer = Normalizer::new();
    let mut stats = PipelineStats::default();
    let mut workers: HashMap<String, mpsc::Sender<Event>> = HashMap::new();
    let mut handles: Vec<(String, JoinHandle<PipelineStats>)> = Vec::new();

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                tracing::info!("Shutdown requested, draining workers");
                break;
            }

            raw = input.recv() => {
                let Some(raw) = raw else {
                    tracing::info!("Input closed, draining workers");
                    break;
                };

                let event = match normalizer.normalize(raw) {
                    Ok(Some(event)) => event,
                    Ok(None) => {
                        stats.control_records += 1;
                        continue;
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "Dropping malformed record");
                        stats.malformed += 1;
                        telemetry::increment(CounterMetric::MalformedRecords, 1);
                        continue;
                    }
                };

                let instrument_id = event.instrument_id().to_string();
                let sender = workers.entry(instrument_id.clone()).or_insert_with(|| {
                    let (tx, rx) = mpsc::channel(WORKER_CHANNEL_CAPACITY);
                    let handle = tokio::spawn(run_worker(
                        instrument_id.clone(),
                        config.clone(),
                        rx,
                        output.clone(),
                    ));
                    handles.push((instrument_id.clone(), handle));
                    telemetry::set_gauge(GaugeMetric::ActiveInstruments, handles.len() as f64);
                    tx
                });

                if sender.send(event).await.is_err() {
                    tracing::warn!(instrument = %instrument_id, "Worker stopped, output receiver dropped");
                }
            }
        }
    }

    drop(workers);
    drop(output);

    for (instrument_id, handle) in handles {
        match handle.await {
            Ok(worker_stats) => stats.merge(&worker_stats),
            Err(e) => {
                tracing::error!(instrument = %instrument_id, error = %e, "Worker task failed");
            }
        }
    }

    tracing::info!(
        book_events = stats.book_events,
        snapshots = stats.snapshots,
        records = stats.records_emitted(),
        malformed = stats.malformed,
        "Runtime finished"
    );

    Ok(stats)
}

/// Sequential processing for one instrument
async fn run_worker(
    instrument_id: String,
    config: Arc<Config>,
    mut events: mpsc::Receiver<Event>,
    output: mpsc::Sender<FeatureRecord>,
) -> PipelineStats {
    tracing::info!(instrument = %instrument_id, "Worker started");

    let mut state = InstrumentState::new(instrument_id.clone(), &config);
    let mut stats = PipelineStats::default();

    while let Some(event) = events.recv().await {
        for record in state.on_event(event, &config, &mut stats) {
            if output.send(record).await.is_err() {
                tracing::debug!(instrument = %instrument_id, "Output receiver dropped, stopping worker");
                return stats;
            }
        }
    }

    for record in state.finish(&mut stats) {
        if output.send(record).await.is_err() {
            break;
        }
    }

    tracing::info!(
        instrument = %instrument_id,
        snapshots = stats.snapshots,
        records = stats.records_emitted(),
        "Worker finished"
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::TargetStatus;
    use crate::normalizer::decode_line;
    use std::time::Duration;

    fn lines(instrument: &str) -> Vec<String> {
        let mut out = vec![
            format!(r#"{{"kind":"full_snapshot","side":"bid","price":"100","quantity":"1","sequence_num":1,"timestamp":"2025-11-07T10:00:00Z","instrument_id":"{instrument}"}}"#),
            format!(r#"{{"kind":"full_snapshot","side":"ask","price":"101","quantity":"1","sequence_num":1,"timestamp":"2025-11-07T10:00:00Z","instrument_id":"{instrument}"}}"#),
        ];
        for i in 1..=6u64 {
            out.push(format!(
                r#"{{"kind":"incremental_update","side":"bid","price":"100","quantity":"{}","sequence_num":{},"timestamp":"2025-11-07T10:00:{:02}Z","instrument_id":"{instrument}"}}"#,
                i + 1,
                i + 1,
                i * 10 - 5
            ));
        }
        out
    }

    async fn run_lines(lines: Vec<String>) -> (Vec<FeatureRecord>, PipelineStats) {
        let (raw_tx, raw_rx) = mpsc::channel(64);
        let (out_tx, mut out_rx) = mpsc::channel(64);
        let handle = tokio::spawn(run(
            Config::default(),
            raw_rx,
            out_tx,
            std::future::pending::<()>(),
        ));

        tokio::spawn(async move {
            for line in lines {
                for raw in decode_line(&line).unwrap_or_default() {
                    raw_tx.send(raw).await.unwrap();
                }
            }
        });

        let mut records = Vec::new();
        while let Some(record) = out_rx.recv().await {
            records.push(record);
        }
        let stats = handle.await.unwrap().unwrap();
        (records, stats)
    }

    #[tokio::test]
    async fn test_runtime_flushes_on_input_close() {
        let (records, stats) = run_lines(lines("BTC-TEST")).await;

        // Boundaries 0..=50 are sampled before the last update at 55s
        assert_eq!(stats.snapshots, 6);
        assert_eq!(records.len(), 6);
        assert!(records
            .iter()
            .all(|r| r.target_status == TargetStatus::Expired || r.target_status == TargetStatus::Finalized));
        assert_eq!(stats.records_emitted(), 6);
    }

    #[tokio::test]
    async fn test_runtime_separates_instruments() {
        let mut all = lines("BTC-TEST");
        all.extend(lines("ETH-TEST"));
        let (records, stats) = run_lines(all).await;

        assert_eq!(stats.session_resets, 2);
        let btc = records.iter().filter(|r| r.instrument_id() == "BTC-TEST").count();
        let eth = records.iter().filter(|r| r.instrument_id() == "ETH-TEST").count();
        assert_eq!(btc, 6);
        assert_eq!(eth, 6);
    }

    #[tokio::test]
    async fn test_runtime_shutdown_signal() {
        let (_raw_tx, raw_rx) = mpsc::channel::<RawRecord>(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let shutdown = tokio::time::sleep(Duration::from_millis(20));

        let stats = run(Config::default(), raw_rx, out_tx, shutdown)
            .await
            .unwrap();
        assert_eq!(stats, PipelineStats::default());
        assert!(out_rx.recv().await.is_none());
    }
}
