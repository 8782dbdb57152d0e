//! Event source module
//!
//! Produces raw feed records for the pipeline runtime

mod replay;

pub use replay::{JsonlReplaySource, ReplayCounters};

use crate::normalizer::RawRecord;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Trait for raw record sources
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Subscribe to raw records; the channel closes when the source is exhausted
    async fn subscribe(&self) -> anyhow::Result<mpsc::Receiver<RawRecord>>;
}
