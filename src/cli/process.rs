//! Process command implementation

use crate::config::Config;
use crate::data::DataRecorder;
use crate::features::FeatureLayout;
use crate::pipeline::runtime;
use crate::source::{EventSource, JsonlReplaySource};
use clap::Args;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct ProcessArgs {
    /// JSONL feed captures, replayed in order
    #[arg(short, long, num_args = 1.., required = true)]
    pub input: Vec<PathBuf>,

    /// Output directory for feature files (overrides config)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl ProcessArgs {
    pub async fn execute(&self, mut config: Config) -> anyhow::Result<()> {
        if let Some(output) = &self.output {
            config.data.output_dir = output.clone();
        }
        config.validate()?;

        let source = JsonlReplaySource::new(self.input.clone());
        let counters = source.counters();
        let records = source.subscribe().await?;

        let recorder = DataRecorder::new(&config.data, FeatureLayout::from_config(&config));
        tracing::info!(
            files = self.input.len(),
            output = ?recorder.output_dir(),
            interval_secs = config.sampler.interval_secs,
            "Processing feed captures"
        );

        let shutdown = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("Received ctrl-c, flushing pending records"),
                Err(e) => {
                    tracing::warn!(error = %e, "Unable to listen for ctrl-c");
                    std::future::pending::<()>().await;
                }
            }
        };

        let stats = runtime::run(config, records, recorder.sender(), shutdown).await?;
        let written = recorder.close().await?;

        tracing::info!(
            lines = counters.lines(),
            undecodable_lines = counters.malformed(),
            malformed_records = stats.malformed,
            book_events = stats.book_events,
            ticker_events = stats.ticker_events,
            session_resets = stats.session_resets,
            snapshots = stats.snapshots,
            crossed = stats.crossed_snapshots,
            finalized = stats.records_finalized,
            expired = stats.records_expired,
            excluded = stats.records_excluded,
            written = written.records_written,
            files = written.files_written,
            "Processing complete"
        );

        if written.write_errors > 0 {
            anyhow::bail!("{} feature flushes failed", written.write_errors);
        }
        Ok(())
    }
}
