//! Pipeline module
//!
//! Wires normalizer, session tracking, outlier filter, order book, sampler and
//! feature engine for each instrument. State lives in an explicit
//! `InstrumentMap` passed by reference; there are no globals.

pub mod runtime;
mod state;

pub use state::{InstrumentState, PipelineStats};

use crate::config::Config;
use crate::features::{FeatureRecord, TargetState};
use crate::normalizer::{decode_line, Event, Normalizer, RawRecord};
use crate::telemetry::{self, CounterMetric};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Owned per-instrument state, keyed by instrument identifier
pub type InstrumentMap = HashMap<String, InstrumentState>;

/// Route one event to its instrument, creating the state lazily
pub fn route_event(
    instruments: &mut InstrumentMap,
    config: &Config,
    event: Event,
    stats: &mut PipelineStats,
) -> Vec<FeatureRecord> {
    let state = instruments
        .entry(event.instrument_id().to_string())
        .or_insert_with_key(|id| {
            tracing::info!(instrument = %id, "Tracking new instrument");
            InstrumentState::new(id.clone(), config)
        });
    state.on_event(event, config, stats)
}

/// Synchronous pipeline over any number of instruments
///
/// Records are processed strictly in arrival order.
pub struct Pipeline {
    config: Config,
    normalizer: Normalizer,
    instruments: InstrumentMap,
    stats: PipelineStats,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            normalizer: Normalizer::new(),
            instruments: InstrumentMap::new(),
            stats: PipelineStats::default(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn instruments(&self) -> &InstrumentMap {
        &self.instruments
    }

    pub fn instrument(&self, instrument_id: &str) -> Option<&InstrumentState> {
        self.instruments.get(instrument_id)
    }

    /// Decode and process one feed line
    pub fn process_line(&mut self, line: &str) -> Vec<FeatureRecord> {
        match decode_line(line) {
            Ok(records) => records
                .into_iter()
                .flat_map(|raw| self.process_raw(raw))
                .collect(),
            Err(e) => {
                tracing::debug!(error = %e, "Dropping undecodable line");
                self.stats.malformed += 1;
                telemetry::increment(CounterMetric::MalformedRecords, 1);
                Vec::new()
            }
        }
    }

    /// Validate and process one raw record
    pub fn process_raw(&mut self, raw: RawRecord) -> Vec<FeatureRecord> {
        match self.normalizer.normalize(raw) {
            Ok(Some(event)) => self.process_event(event),
            Ok(None) => {
                self.stats.control_records += 1;
                Vec::new()
            }
            Err(e) => {
                tracing::debug!(error = %e, "Dropping malformed record");
                self.stats.malformed += 1;
                telemetry::increment(CounterMetric::MalformedRecords, 1);
                Vec::new()
            }
        }
    }

    /// Process one canonical event
    pub fn process_event(&mut self, event: Event) -> Vec<FeatureRecord> {
        route_event(&mut self.instruments, &self.config, event, &mut self.stats)
    }

    /// Flush every instrument's pending records as expired
    ///
    /// Instruments are visited in sorted order so output is deterministic.
    pub fn finish(&mut self) -> Vec<FeatureRecord> {
        let mut ids: Vec<String> = self.instruments.keys().cloned().collect();
        ids.sort();

        let mut out = Vec::new();
        for id in ids {
            if let Some(state) = self.instruments.get_mut(&id) {
                out.extend(state.finish(&mut self.stats));
            }
        }
        out
    }

    /// Query a buffered record's forward target
    pub fn target_state(
        &self,
        instrument_id: &str,
        sample_time: DateTime<Utc>,
        horizon_secs: u64,
    ) -> TargetState {
        self.instruments
            .get(instrument_id)
            .map(|state| state.target_state(sample_time, horizon_secs))
            .unwrap_or(TargetState::Unknown)
    }
}
