//! Per-instrument feature engine

use super::estimators::{
    imbalance, market_impact, parkinson, sample_std, RollEstimator, RollingMean, VpinEstimator,
};
use super::targets::{PendingTargets, TargetState, TargetStatus};
use super::technical::TechnicalState;
use super::types::{FeatureLayout, FeatureRecord, HorizonReturn, WindowVolatility};
use crate::config::{Config, FeatureConfig};
use crate::normalizer::TickerUpdate;
use crate::orderbook::{Side, Snapshot};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::VecDeque;

/// Valid snapshot kept for trailing-window features
#[derive(Debug, Clone)]
struct Observation {
    time: DateTime<Utc>,
    price: f64,
    /// `ln(best_ask / best_bid)`
    log_range: f64,
    /// Log return from the previous observation
    log_return: Option<f64>,
}

/// Turns the snapshot sequence of one instrument into feature records
#[derive(Debug)]
pub struct FeatureEngine {
    config: FeatureConfig,
    layout: FeatureLayout,
    interval: Duration,
    retention: Duration,
    history: VecDeque<Observation>,
    imbalances: RollingMean,
    vpin: VpinEstimator,
    roll: RollEstimator,
    technical: TechnicalState,
    pending: PendingTargets,
}

impl FeatureEngine {
    pub fn new(config: &Config) -> Self {
        let features = &config.features;
        let interval = Duration::seconds(config.sampler.interval_secs.max(1) as i64);

        let longest_return = features.return_horizons_secs.iter().copied().max().unwrap_or(0);
        let longest_window = features.volatility_windows_secs.iter().copied().max().unwrap_or(0);
        let retention =
            Duration::seconds(longest_return.max(longest_window) as i64) + interval;

        let longest_imbalance = features.imbalance_windows.iter().copied().max().unwrap_or(1);

        Self {
            config: features.clone(),
            layout: FeatureLayout::from_config(config),
            interval,
            retention,
            history: VecDeque::new(),
            imbalances: RollingMean::new(longest_imbalance),
            vpin: VpinEstimator::new(features.vpin_window, features.vpin_min_periods),
            roll: RollEstimator::new(features.roll_window, features.roll_min_pairs),
            technical: TechnicalState::default(),
            pending: PendingTargets::new(&config.targets, config.sampler.interval_secs),
        }
    }

    pub fn layout(&self) -> &FeatureLayout {
        &self.layout
    }

    /// Records currently waiting for targets
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Consume the next sampled snapshot
    ///
    /// `ticker` must already be the latest update at or before the sample
    /// time. Returns the records that left the pending buffer.
    pub fn on_snapshot(
        &mut self,
        snapshot: Snapshot,
        ticker: Option<&TickerUpdate>,
    ) -> Vec<FeatureRecord> {
        let time = snapshot.sample_time;

        let price = snapshot
            .microprice
            .or_else(|| snapshot.mid_price())
            .filter(|_| snapshot.is_valid());
        let Some(price) = price else {
            self.roll.break_chain();
            let mut record = FeatureRecord::empty(snapshot, &self.layout, TargetStatus::Excluded);
            join_ticker(&mut record, ticker);
            self.pending.push(record);
            return self.pending.drain(time);
        };

        self.pending.observe(time, price);
        let record = self.compute(snapshot, price, ticker);
        self.pending.push(record);
        self.pending.drain(time)
    }

    /// Expire pending records and forget trailing state at a session boundary
    pub fn on_session_reset(&mut self) -> Vec<FeatureRecord> {
        self.history.clear();
        self.imbalances.clear();
        self.vpin.clear();
        self.roll.break_chain();
        self.technical = TechnicalState::default();
        self.pending.expire_all()
    }

    /// Emit everything still pending as expired
    pub fn flush(&mut self) -> Vec<FeatureRecord> {
        self.pending.expire_all()
    }

    /// Target of a buffered record
    pub fn target_state(&self, sample_time: DateTime<Utc>, horizon_secs: u64) -> TargetState {
        self.pending.target_state(sample_time, horizon_secs)
    }

    fn compute(
        &mut self,
        snapshot: Snapshot,
        price: Decimal,
        ticker: Option<&TickerUpdate>,
    ) -> FeatureRecord {
        let time = snapshot.sample_time;
        let price_f = price.to_f64().unwrap_or(f64::NAN);

        let mut record = FeatureRecord::empty(snapshot, &self.layout, TargetStatus::Pending);
        let snap = &record.snapshot;

        // Basic
        let mid = snap.mid_price();
        let spread = snap.spread();
        record.spread_bps = ratio_bps(spread, mid);
        record.size_imbalance = match (snap.best_bid_size, snap.best_ask_size) {
            (Some(bid), Some(ask)) => Some(imbalance(bid, ask)),
            _ => None,
        };
        record.effective_spread = match (mid, snap.microprice) {
            (Some(m), Some(mp)) => (m - mp).abs().to_f64().map(|d| 2.0 * d),
            _ => None,
        };

        // Depth
        let ofi = imbalance(snap.bid_depth_total, snap.ask_depth_total);
        record.order_flow_imbalance = Some(ofi);
        record.band_imbalance = snap
            .bid_depth_by_band
            .iter()
            .zip(&snap.ask_depth_by_band)
            .map(|(bid, ask)| Some(imbalance(*bid, *ask)))
            .collect();

        if let Some(mid) = mid {
            record.buy_impact =
                market_impact(&snap.asks, mid, self.config.impact_notional, Side::Ask);
            record.sell_impact =
                market_impact(&snap.bids, mid, self.config.impact_notional, Side::Bid);
        }

        // Imbalance windows, toxicity
        self.imbalances.push(ofi);
        record.imbalance_ma = self
            .config
            .imbalance_windows
            .iter()
            .map(|w| self.imbalances.mean_last(*w))
            .collect();
        let (vpin, vpin_trend) = self.vpin.push(ofi);
        record.vpin = vpin;
        record.vpin_trend = vpin_trend;
        record.roll_spread = self.roll.push(price_f);

        // Returns look back before the current observation joins the history
        record.returns = self
            .config
            .return_horizons_secs
            .iter()
            .map(|h| self.horizon_return(time, *h, price_f))
            .collect();

        let log_range = match (snap.best_bid, snap.best_ask) {
            (Some(bid), Some(ask)) => ask
                .checked_div(bid)
                .and_then(|r| r.to_f64())
                .map(f64::ln)
                .unwrap_or(0.0),
            _ => 0.0,
        };
        // Only adjacent grid points form a one-step return
        let log_return = self
            .history
            .back()
            .filter(|prev| prev.price > 0.0 && time - prev.time == self.interval)
            .map(|prev| (price_f / prev.price).ln());
        self.history.push_back(Observation {
            time,
            price: price_f,
            log_range,
            log_return,
        });
        let cutoff = time - self.retention;
        while self.history.front().is_some_and(|o| o.time < cutoff) {
            self.history.pop_front();
        }

        record.volatility = self
            .config
            .volatility_windows_secs
            .iter()
            .map(|w| self.window_volatility(time, *w))
            .collect();

        let spread_f = spread.and_then(|s| s.to_f64());
        record.technical = self.technical.update(price_f, spread_f);

        record.mid_price = mid;
        record.spread = spread;
        join_ticker(&mut record, ticker);
        record
    }

    /// Backward join: latest observation in `[t − h − interval, t − h]`
    fn horizon_return(&self, time: DateTime<Utc>, horizon_secs: u64, price: f64) -> HorizonReturn {
        let target = time - Duration::seconds(horizon_secs as i64);
        let earliest = target - self.interval;

        let past = self
            .history
            .iter()
            .rev()
            .find(|o| o.time <= target)
            .filter(|o| o.time >= earliest && o.price > 0.0);

        HorizonReturn {
            horizon_secs,
            simple: past.map(|o| price / o.price - 1.0),
            log: past.map(|o| (price / o.price).ln()),
        }
    }

    /// Observations in `(t − window, t]`
    fn window_volatility(&self, time: DateTime<Utc>, window_secs: u64) -> WindowVolatility {
        let start = time - Duration::seconds(window_secs as i64);
        let in_window: Vec<&Observation> =
            self.history.iter().filter(|o| o.time > start).collect();

        let returns: Vec<f64> = in_window.iter().filter_map(|o| o.log_return).collect();
        let ranges: Vec<f64> = in_window.iter().map(|o| o.log_range).collect();

        WindowVolatility {
            window_secs,
            realized: sample_std(&returns),
            parkinson: parkinson(&ranges),
        }
    }
}

fn join_ticker(record: &mut FeatureRecord, ticker: Option<&TickerUpdate>) {
    let Some(ticker) = ticker else {
        return;
    };
    record.ticker_time = Some(ticker.source_time);
    record.ticker_price = Some(ticker.last_trade_price);
    record.ticker_volume_24h = ticker.volume_24h;
    if let Some(mid) = record.snapshot.mid_price().filter(|_| record.snapshot.is_valid()) {
        record.ticker_basis_bps = ratio_bps(Some(ticker.last_trade_price - mid), Some(mid));
    }
}

fn ratio_bps(value: Option<Decimal>, base: Option<Decimal>) -> Option<f64> {
    let base = base.filter(|b| *b > Decimal::ZERO)?;
    value?
        .checked_div(base)
        .and_then(|r| r.to_f64())
        .map(|r| r * 10_000.0)
}
