//! Prometheus metrics

/// Counter metric types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterMetric {
    /// Canonical events processed
    Events,
    /// Records dropped by the normalizer
    MalformedRecords,
    /// Malformed levels dropped from otherwise valid batches
    DroppedLevels,
    /// Levels refused by the outlier filter
    RejectedLevels,
    /// Updates ignored while waiting for a snapshot
    IgnoredUpdates,
    /// Session boundaries
    SessionResets,
    /// Snapshots sampled
    Snapshots,
    /// Sampled snapshots with a crossed book
    CrossedSnapshots,
    /// Event time jumps beyond the sampler's gap limit
    TimeGaps,
    /// Records emitted with every target resolved
    RecordsFinalized,
    /// Records emitted before every target resolved
    RecordsExpired,
    /// Records emitted for invalid snapshots
    RecordsExcluded,
    /// Records written to Parquet
    RecordsWritten,
}

/// Gauge metric types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GaugeMetric {
    /// Instruments with live state
    ActiveInstruments,
    /// Records buffered by the recorder
    RecorderBuffered,
}

impl CounterMetric {
    pub fn name(&self) -> &'static str {
        match self {
            CounterMetric::Events => "lob_events_total",
            CounterMetric::MalformedRecords => "lob_malformed_records_total",
            CounterMetric::DroppedLevels => "lob_dropped_levels_total",
            CounterMetric::RejectedLevels => "lob_rejected_levels_total",
            CounterMetric::IgnoredUpdates => "lob_ignored_updates_total",
            CounterMetric::SessionResets => "lob_session_resets_total",
            CounterMetric::Snapshots => "lob_snapshots_total",
            CounterMetric::CrossedSnapshots => "lob_crossed_snapshots_total",
            CounterMetric::TimeGaps => "lob_time_gaps_total",
            CounterMetric::RecordsFinalized => "lob_records_finalized_total",
            CounterMetric::RecordsExpired => "lob_records_expired_total",
            CounterMetric::RecordsExcluded => "lob_records_excluded_total",
            CounterMetric::RecordsWritten => "lob_records_written_total",
        }
    }
}

impl GaugeMetric {
    pub fn name(&self) -> &'static str {
        match self {
            GaugeMetric::ActiveInstruments => "lob_active_instruments",
            GaugeMetric::RecorderBuffered => "lob_recorder_buffered_records",
        }
    }
}

/// Increment a counter; zero increments are skipped
pub fn increment(metric: CounterMetric, value: u64) {
    if value > 0 {
        ::metrics::counter!(metric.name()).increment(value);
    }
}

/// Set a gauge value
pub fn set_gauge(metric: GaugeMetric, value: f64) {
    ::metrics::gauge!(metric.name()).set(value);
}
