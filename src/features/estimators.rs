//! Microstructure estimators
//!
//! Pure functions over snapshot values plus the small rolling accumulators
//! the feature engine keeps per instrument.

use crate::orderbook::Side;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Records between the two VPIN values compared for the trend
pub const VPIN_TREND_LAG: usize = 5;

/// `(bid − ask) / (bid + ask)`, 0 when both sides are empty
pub fn imbalance(bid: Decimal, ask: Decimal) -> f64 {
    let Some(total) = bid.checked_add(ask) else {
        return 0.0;
    };
    if total <= Decimal::ZERO {
        return 0.0;
    }
    (bid - ask)
        .checked_div(total)
        .and_then(|v| v.to_f64())
        .map(|v| v.clamp(-1.0, 1.0))
        .unwrap_or(0.0)
}

/// Sample standard deviation, `None` below two values
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some(variance.sqrt())
}

/// Parkinson high-low volatility from per-snapshot `ln(ask / bid)` values
///
/// `sqrt(mean(ln(ask/bid)²) / (4 ln 2))`
pub fn parkinson(log_ranges: &[f64]) -> Option<f64> {
    if log_ranges.is_empty() {
        return None;
    }
    let mean_sq = log_ranges.iter().map(|r| r * r).sum::<f64>() / log_ranges.len() as f64;
    Some((mean_sq / (4.0 * std::f64::consts::LN_2)).sqrt())
}

/// Roll implicit spread from consecutive price changes
///
/// `2 × sqrt(−cov(Δp_t, Δp_{t−1}))`, 0 when the serial covariance is
/// non-negative. `None` until `min_pairs` change pairs exist.
pub fn roll_spread(changes: &[f64], min_pairs: usize) -> Option<f64> {
    if changes.len() < 2 {
        return None;
    }
    let pairs = changes.len() - 1;
    if pairs < min_pairs.max(1) {
        return None;
    }

    let current = &changes[1..];
    let lagged = &changes[..pairs];
    let n = pairs as f64;
    let mean_current = current.iter().sum::<f64>() / n;
    let mean_lagged = lagged.iter().sum::<f64>() / n;
    let covariance = current
        .iter()
        .zip(lagged)
        .map(|(c, l)| (c - mean_current) * (l - mean_lagged))
        .sum::<f64>()
        / (n - 1.0).max(1.0);

    if covariance < 0.0 {
        Some(2.0 * (-covariance).sqrt())
    } else {
        Some(0.0)
    }
}

/// Cost of sweeping a ladder for a quote notional
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketImpact {
    /// Volume-weighted fill price
    pub vwap: Decimal,
    /// Adverse distance of the VWAP from mid (basis points)
    pub slippage_bps: f64,
    /// Whether the visible ladder covered the whole notional
    pub filled: bool,
}

/// Walk `ladder` (best first) until `notional` is spent
///
/// `Side::Ask` sweeps asks (a buy), `Side::Bid` sweeps bids (a sell).
pub fn market_impact(
    ladder: &[(Decimal, Decimal)],
    mid: Decimal,
    notional: Decimal,
    side: Side,
) -> Option<MarketImpact> {
    if ladder.is_empty() || mid <= Decimal::ZERO || notional <= Decimal::ZERO {
        return None;
    }

    let mut remaining = notional;
    let mut cost = Decimal::ZERO;
    let mut quantity = Decimal::ZERO;

    for (price, size) in ladder {
        if remaining <= Decimal::ZERO {
            break;
        }
        let level_notional = price.checked_mul(*size)?;
        let (take_cost, take_qty) = if level_notional <= remaining {
            (level_notional, *size)
        } else {
            (remaining, remaining.checked_div(*price)?)
        };
        cost = cost.checked_add(take_cost)?;
        quantity = quantity.checked_add(take_qty)?;
        remaining -= take_cost;
    }

    if quantity <= Decimal::ZERO {
        return None;
    }
    let vwap = cost.checked_div(quantity)?;
    let adverse = match side {
        Side::Ask => vwap - mid,
        Side::Bid => mid - vwap,
    };
    let slippage_bps = adverse.checked_div(mid)?.to_f64()? * 10_000.0;

    Some(MarketImpact {
        vwap,
        slippage_bps,
        filled: remaining <= Decimal::ZERO,
    })
}

/// Mean over the most recent `window` values
#[derive(Debug, Clone)]
pub struct RollingMean {
    window: usize,
    values: VecDeque<f64>,
}

impl RollingMean {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            values: VecDeque::with_capacity(window.max(1)),
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.values.len() == self.window {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Mean of the last `n` values (fewer when not yet available)
    pub fn mean_last(&self, n: usize) -> Option<f64> {
        let take = n.min(self.values.len());
        if take == 0 {
            return None;
        }
        let sum: f64 = self.values.iter().rev().take(take).sum();
        Some(sum / take as f64)
    }

    pub fn mean(&self) -> Option<f64> {
        self.mean_last(self.window)
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// VPIN-like toxicity: rolling mean of |order-flow imbalance|
#[derive(Debug, Clone)]
pub struct VpinEstimator {
    abs_imbalance: RollingMean,
    min_periods: usize,
    recent: VecDeque<Option<f64>>,
}

impl VpinEstimator {
    pub fn new(window: usize, min_periods: usize) -> Self {
        Self {
            abs_imbalance: RollingMean::new(window),
            min_periods: min_periods.max(1),
            recent: VecDeque::with_capacity(VPIN_TREND_LAG + 1),
        }
    }

    /// Add an imbalance; returns `(vpin, trend)`
    ///
    /// The trend is the difference to the VPIN `VPIN_TREND_LAG` records ago.
    pub fn push(&mut self, imbalance: f64) -> (Option<f64>, Option<f64>) {
        self.abs_imbalance.push(imbalance.abs());
        let vpin = if self.abs_imbalance.len() >= self.min_periods {
            self.abs_imbalance.mean()
        } else {
            None
        };

        if self.recent.len() == VPIN_TREND_LAG + 1 {
            self.recent.pop_front();
        }
        self.recent.push_back(vpin);

        let trend = if self.recent.len() == VPIN_TREND_LAG + 1 {
            match (vpin, self.recent.front().copied().flatten()) {
                (Some(now), Some(then)) => Some(now - then),
                _ => None,
            }
        } else {
            None
        };

        (vpin, trend)
    }

    pub fn clear(&mut self) {
        self.abs_imbalance.clear();
        self.recent.clear();
    }
}

/// Chain of consecutive price changes for the Roll estimator
#[derive(Debug, Clone)]
pub struct RollEstimator {
    window: usize,
    min_pairs: usize,
    last_price: Option<f64>,
    changes: VecDeque<f64>,
}

impl RollEstimator {
    pub fn new(window: usize, min_pairs: usize) -> Self {
        Self {
            window: window.max(2),
            min_pairs,
            last_price: None,
            changes: VecDeque::new(),
        }
    }

    /// Add the next consecutive price and return the current estimate
    pub fn push(&mut self, price: f64) -> Option<f64> {
        if let Some(last) = self.last_price {
            if self.changes.len() == self.window {
                self.changes.pop_front();
            }
            self.changes.push_back(price - last);
        }
        self.last_price = Some(price);
        self.estimate()
    }

    pub fn estimate(&self) -> Option<f64> {
        let changes: Vec<f64> = self.changes.iter().copied().collect();
        roll_spread(&changes, self.min_pairs)
    }

    /// Forget the chain; the next price starts a new one
    pub fn break_chain(&mut self) {
        self.last_price = None;
        self.changes.clear();
    }
}
