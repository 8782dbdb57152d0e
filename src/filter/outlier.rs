//! Adaptive EWMA outlier filter

use crate::config::FilterConfig;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Verdict for one candidate price
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterDecision {
    Accept,
    Reject {
        /// Distance from the EWMA mean
        distance: f64,
        /// Distance allowed at the time of the check
        threshold: f64,
    },
}

impl FilterDecision {
    pub fn is_accept(&self) -> bool {
        matches!(self, FilterDecision::Accept)
    }
}

/// EWMA mean / absolute-deviation filter for incoming level prices
///
/// A rejected price still feeds its (clipped) distance into the deviation
/// estimate, so a persistent regime change widens the band geometrically
/// and is eventually accepted, while a lone spike barely moves it.
///
/// Once seeded from a book the mean follows the mid price rather than the
/// level prices, and resting levels within `ladder_band_pct` of it are
/// always inside the threshold.
#[derive(Debug, Clone)]
pub struct OutlierFilter {
    enabled: bool,
    k: f64,
    alpha: f64,
    min_deviation_bps: f64,
    warmup_samples: u64,
    ladder_band_pct: f64,
    anchored: bool,
    mean: f64,
    deviation: f64,
    samples: u64,
}

impl OutlierFilter {
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            enabled: config.enabled,
            k: config.k,
            alpha: config.alpha,
            min_deviation_bps: config.min_deviation_bps,
            warmup_samples: config.warmup_samples,
            ladder_band_pct: 0.0,
            anchored: false,
            mean: 0.0,
            deviation: 0.0,
            samples: 0,
        }
    }

    /// Allow levels up to `pct` percent from the mid on top of the
    /// deviation band
    pub fn with_ladder_band_pct(mut self, pct: f64) -> Self {
        self.ladder_band_pct = if pct.is_finite() { pct.max(0.0) } else { 0.0 };
        self
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn deviation(&self) -> f64 {
        self.deviation
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Still accepting unconditionally
    pub fn is_warming_up(&self) -> bool {
        self.samples < self.warmup_samples
    }

    /// Mid-anchored after a seed, until the next reset
    pub fn is_anchored(&self) -> bool {
        self.anchored
    }

    /// Current rejection distance
    pub fn threshold(&self) -> f64 {
        self.deviation_band() + self.ladder_allowance()
    }

    fn deviation_band(&self) -> f64 {
        let floor = self.mean.abs() * self.min_deviation_bps / 10_000.0;
        self.k * self.deviation.max(floor)
    }

    fn ladder_allowance(&self) -> f64 {
        if self.anchored {
            self.mean.abs() * self.ladder_band_pct / 100.0
        } else {
            0.0
        }
    }

    /// Check a candidate price and update the estimates
    pub fn check(&mut self, price: Decimal) -> FilterDecision {
        if !self.enabled {
            return FilterDecision::Accept;
        }
        let Some(price) = price.to_f64() else {
            return FilterDecision::Accept;
        };

        if self.is_warming_up() {
            self.learn(price);
            return FilterDecision::Accept;
        }

        let distance = (price - self.mean).abs();
        let allowance = self.ladder_allowance();
        let band = self.deviation_band();
        if distance > band + allowance {
            self.deviation = (1.0 - self.alpha) * self.deviation + self.alpha * band;
            return FilterDecision::Reject {
                distance,
                threshold: band + allowance,
            };
        }

        if self.anchored {
            // Level prices spread around the mid; only the part beyond the
            // ladder allowance counts as deviation
            let excess = (distance - allowance).max(0.0);
            self.deviation = (1.0 - self.alpha) * self.deviation + self.alpha * excess;
            self.samples += 1;
        } else {
            self.learn(price);
        }
        FilterDecision::Accept
    }

    /// Move the anchored mean toward the book's current mid
    ///
    /// No-op until the filter has been seeded.
    pub fn track_mid(&mut self, mid: Decimal) {
        if !self.anchored {
            return;
        }
        if let Some(mid) = mid.to_f64() {
            self.mean = (1.0 - self.alpha) * self.mean + self.alpha * mid;
        }
    }

    /// Re-anchor on an authoritative book
    ///
    /// `mean` becomes the mid price and `deviation` the mean absolute distance
    /// of `prices` from it. The filter is considered warm and mid-anchored
    /// afterwards.
    pub fn seed(&mut self, mid: Decimal, prices: impl IntoIterator<Item = Decimal>) {
        let Some(mid) = mid.to_f64() else {
            return;
        };
        let distances: Vec<f64> = prices
            .into_iter()
            .filter_map(|p| p.to_f64())
            .map(|p| (p - mid).abs())
            .collect();

        self.mean = mid;
        self.deviation = if distances.is_empty() {
            0.0
        } else {
            distances.iter().sum::<f64>() / distances.len() as f64
        };
        self.samples = self.samples.max(self.warmup_samples);
        self.anchored = true;
    }

    /// Forget all estimates
    pub fn reset(&mut self) {
        self.anchored = false;
        self.mean = 0.0;
        self.deviation = 0.0;
        self.samples = 0;
    }

    fn learn(&mut self, price: f64) {
        if self.samples == 0 {
            self.mean = price;
            self.deviation = 0.0;
        } else {
            let distance = (price - self.mean).abs();
            self.deviation = (1.0 - self.alpha) * self.deviation + self.alpha * distance;
            self.mean = (1.0 - self.alpha) * self.mean + self.alpha * price;
        }
        self.samples += 1;
    }
}
