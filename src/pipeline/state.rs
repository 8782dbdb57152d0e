//! Per-instrument processing state

use crate::config::Config;
use crate::features::{FeatureEngine, FeatureRecord, TargetState, TargetStatus};
use crate::filter::OutlierFilter;
use crate::normalizer::{
    BookEvent, BookEventKind, Event, SessionReason, SessionSignal, SessionTracker, TickerUpdate,
};
use crate::orderbook::{BookStatus, OrderBook};
use crate::sampler::Sampler;
use crate::telemetry::{self, CounterMetric};
use chrono::{DateTime, Utc};

/// Pipeline counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub book_events: u64,
    pub ticker_events: u64,
    pub control_records: u64,
    pub malformed: u64,
    pub dropped_levels: u64,
    pub rejected_levels: u64,
    pub ignored_updates: u64,
    pub session_resets: u64,
    pub snapshots: u64,
    pub crossed_snapshots: u64,
    pub time_gaps: u64,
    pub records_finalized: u64,
    pub records_expired: u64,
    pub records_excluded: u64,
}

impl PipelineStats {
    /// Add another set of counters into this one
    pub fn merge(&mut self, other: &PipelineStats) {
        self.book_events += other.book_events;
        self.ticker_events += other.ticker_events;
        self.control_records += other.control_records;
        self.malformed += other.malformed;
        self.dropped_levels += other.dropped_levels;
        self.rejected_levels += other.rejected_levels;
        self.ignored_updates += other.ignored_updates;
        self.session_resets += other.session_resets;
        self.snapshots += other.snapshots;
        self.crossed_snapshots += other.crossed_snapshots;
        self.time_gaps += other.time_gaps;
        self.records_finalized += other.records_finalized;
        self.records_expired += other.records_expired;
        self.records_excluded += other.records_excluded;
    }

    pub fn records_emitted(&self) -> u64 {
        self.records_finalized + self.records_expired + self.records_excluded
    }

    fn count_output(&mut self, records: &[FeatureRecord]) {
        let mut finalized = 0;
        let mut expired = 0;
        let mut excluded = 0;
        for record in records {
            match record.target_status {
                TargetStatus::Finalized => finalized += 1,
                TargetStatus::Expired => expired += 1,
                TargetStatus::Excluded => excluded += 1,
                TargetStatus::Pending => {}
            }
        }
        self.records_finalized += finalized;
        self.records_expired += expired;
        self.records_excluded += excluded;
        telemetry::increment(CounterMetric::RecordsFinalized, finalized);
        telemetry::increment(CounterMetric::RecordsExpired, expired);
        telemetry::increment(CounterMetric::RecordsExcluded, excluded);
    }
}

/// Everything one instrument owns
pub struct InstrumentState {
    instrument_id: String,
    session: SessionTracker,
    filter: OutlierFilter,
    book: OrderBook,
    sampler: Sampler,
    features: FeatureEngine,
    last_ticker: Option<TickerUpdate>,
    rejected_since_sample: u32,
}

impl InstrumentState {
    pub fn new(instrument_id: String, config: &Config) -> Self {
        Self {
            book: OrderBook::new(instrument_id.clone()),
            instrument_id,
            session: SessionTracker::new(),
            filter: OutlierFilter::new(&config.filter)
                .with_ladder_band_pct(config.book.widest_band_pct()),
            sampler: Sampler::new(config.sampler.interval_secs)
                .with_max_gap_secs(config.sampler.max_gap_secs),
            features: FeatureEngine::new(config),
            last_ticker: None,
            rejected_since_sample: 0,
        }
    }

    pub fn instrument_id(&self) -> &str {
        &self.instrument_id
    }

    pub fn book(&self) -> &OrderBook {
        &self.book
    }

    pub fn filter(&self) -> &OutlierFilter {
        &self.filter
    }

    pub fn sampler(&self) -> &Sampler {
        &self.sampler
    }

    pub fn session_id(&self) -> u64 {
        self.session.session_id()
    }

    pub fn last_ticker(&self) -> Option<&TickerUpdate> {
        self.last_ticker.as_ref()
    }

    pub fn target_state(&self, sample_time: DateTime<Utc>, horizon_secs: u64) -> TargetState {
        self.features.target_state(sample_time, horizon_secs)
    }

    /// Process one event for this instrument
    pub fn on_event(
        &mut self,
        event: Event,
        config: &Config,
        stats: &mut PipelineStats,
    ) -> Vec<FeatureRecord> {
        telemetry::increment(CounterMetric::Events, 1);
        let out = match event {
            Event::Book(book_event) => self.on_book_event(book_event, config, stats),
            Event::Ticker(ticker) => self.on_ticker(ticker, config, stats),
        };
        stats.count_output(&out);
        out
    }

    /// Flush pending records at end of stream
    pub fn finish(&mut self, stats: &mut PipelineStats) -> Vec<FeatureRecord> {
        let out = self.features.flush();
        stats.count_output(&out);
        out
    }

    fn on_book_event(
        &mut self,
        event: BookEvent,
        config: &Config,
        stats: &mut PipelineStats,
    ) -> Vec<FeatureRecord> {
        stats.book_events += 1;
        stats.dropped_levels += event.dropped_levels as u64;
        telemetry::increment(CounterMetric::DroppedLevels, event.dropped_levels as u64);

        let mut out = Vec::new();

        if let SessionSignal::NewSession(reason) = self.session.observe(&event) {
            out.extend(self.begin_session(reason, stats));
        }

        let time = event.source_time;
        out.extend(self.sample_until(time, config, stats));

        let outcome = match event.kind {
            BookEventKind::FullSnapshot => self.book.apply(&event),
            BookEventKind::IncrementalUpdate => {
                let filter = &mut self.filter;
                self.book.apply_with(&event, |level| {
                    level.is_removal() || filter.check(level.price).is_accept()
                })
            }
        };

        if outcome.ignored {
            stats.ignored_updates += 1;
            telemetry::increment(CounterMetric::IgnoredUpdates, 1);
            tracing::debug!(
                instrument = %self.instrument_id,
                sequence_num = event.sequence_num,
                "Ignoring update while awaiting snapshot"
            );
        }
        if outcome.rejected > 0 {
            stats.rejected_levels += outcome.rejected as u64;
            telemetry::increment(CounterMetric::RejectedLevels, outcome.rejected as u64);
            self.rejected_since_sample = self
                .rejected_since_sample
                .saturating_add(outcome.rejected as u32);
            tracing::debug!(
                instrument = %self.instrument_id,
                rejected = outcome.rejected,
                mean = self.filter.mean(),
                threshold = self.filter.threshold(),
                "Outlier levels rejected"
            );
        }

        match event.kind {
            BookEventKind::FullSnapshot => self.seed_filter(config),
            BookEventKind::IncrementalUpdate => {
                if let Some(mid) = self.book.mid_price() {
                    self.filter.track_mid(mid);
                }
            }
        }

        if self.book.status() == BookStatus::Live && !self.sampler.is_started() {
            self.sampler.start(time);
        }

        out
    }

    fn on_ticker(
        &mut self,
        ticker: TickerUpdate,
        config: &Config,
        stats: &mut PipelineStats,
    ) -> Vec<FeatureRecord> {
        stats.ticker_events += 1;
        let out = self.sample_until(ticker.source_time, config, stats);

        let newer = self
            .last_ticker
            .as_ref()
            .map_or(true, |last| last.source_time <= ticker.source_time);
        if newer {
            self.last_ticker = Some(ticker);
        }
        out
    }

    /// Reset per-session state; returns records expired by the reset
    fn begin_session(
        &mut self,
        reason: SessionReason,
        stats: &mut PipelineStats,
    ) -> Vec<FeatureRecord> {
        let session_id = self.session.session_id();
        stats.session_resets += 1;
        telemetry::increment(CounterMetric::SessionResets, 1);

        match reason {
            SessionReason::Snapshot => {
                tracing::info!(
                    instrument = %self.instrument_id,
                    session_id,
                    "Full snapshot starts new session"
                );
                self.book.set_session(session_id);
            }
            SessionReason::SequenceRegression { last, received } => {
                tracing::warn!(
                    instrument = %self.instrument_id,
                    session_id,
                    last,
                    received,
                    "Sequence regression, discarding book until next snapshot"
                );
                self.book.discard(session_id);
            }
        }

        self.filter.reset();
        self.sampler.reset();
        self.rejected_since_sample = 0;
        self.features.on_session_reset()
    }

    /// Sample every boundary before `time` and feed the feature engine
    fn sample_until(
        &mut self,
        time: DateTime<Utc>,
        config: &Config,
        stats: &mut PipelineStats,
    ) -> Vec<FeatureRecord> {
        let mut out = Vec::new();

        if self.sampler.is_gap(time) {
            stats.time_gaps += 1;
            telemetry::increment(CounterMetric::TimeGaps, 1);
            tracing::warn!(
                instrument = %self.instrument_id,
                next_boundary = ?self.sampler.next_boundary(),
                event_time = %time,
                "Event time jumped past the sampling gap limit, restarting grid"
            );
            self.sampler.restart(time);
            self.rejected_since_sample = 0;
            out.extend(self.features.on_session_reset());
        }

        for boundary in self.sampler.advance(time) {
            let snapshot = self
                .book
                .snapshot_at(boundary, self.rejected_since_sample, &config.book);
            self.rejected_since_sample = 0;
            stats.snapshots += 1;
            telemetry::increment(CounterMetric::Snapshots, 1);

            if snapshot.is_crossed {
                stats.crossed_snapshots += 1;
                telemetry::increment(CounterMetric::CrossedSnapshots, 1);
                tracing::warn!(
                    instrument = %self.instrument_id,
                    sample_time = %boundary,
                    best_bid = ?snapshot.best_bid,
                    best_ask = ?snapshot.best_ask,
                    "Crossed book at sample time"
                );
            }

            let ticker = self
                .last_ticker
                .as_ref()
                .filter(|t| t.source_time <= boundary);
            out.extend(self.features.on_snapshot(snapshot, ticker));
        }

        out
    }

    fn seed_filter(&mut self, config: &Config) {
        let Some(mid) = self.book.mid_price() else {
            return;
        };
        let top = config.book.top_levels;
        let prices = self
            .book
            .top_bids(top)
            .into_iter()
            .chain(self.book.top_asks(top))
            .map(|(price, _)| price);
        self.filter.seed(mid, prices);
    }
}
