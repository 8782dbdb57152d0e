//! Technical indicators on the sampled microprice

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

const SMA_PERIODS: [usize; 4] = [5, 10, 20, 50];
const EMA_SHORT_SPAN: usize = 9;
const EMA_FAST_SPAN: usize = 12;
const EMA_MEDIUM_SPAN: usize = 21;
const EMA_SLOW_SPAN: usize = 26;
const MACD_SIGNAL_SPAN: usize = 9;
const RSI_PERIOD: usize = 14;
const RSI_SHORT_PERIOD: usize = 7;
const BOLLINGER_PERIOD: usize = 20;
const BOLLINGER_WIDTH: f64 = 2.0;
const STOCHASTIC_PERIOD: usize = 14;
const ATR_PERIOD: usize = 14;

/// Indicator values at one snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TechnicalIndicators {
    pub sma_5: Option<f64>,
    pub sma_10: Option<f64>,
    pub sma_20: Option<f64>,
    pub sma_50: Option<f64>,
    pub ema_9: Option<f64>,
    /// 12-period EMA
    pub ema_fast: Option<f64>,
    pub ema_21: Option<f64>,
    /// 26-period EMA
    pub ema_slow: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    /// 14-period RSI
    pub rsi: Option<f64>,
    pub rsi_7: Option<f64>,
    /// Position within the Bollinger band: 0 at the lower band, 1 at the upper
    pub bollinger_position: Option<f64>,
    /// Band width relative to the middle band
    pub bollinger_width: Option<f64>,
    pub price_above_sma_20: Option<bool>,
    pub price_above_sma_50: Option<bool>,
    pub sma_crossover_5_20: Option<bool>,
    pub ema_crossover_9_21: Option<bool>,
    pub distance_from_sma_20: Option<f64>,
    pub distance_from_ema_21: Option<f64>,
    /// Where the price sits in its 14-sample range, 0 to 100
    pub stochastic: Option<f64>,
    /// Mean quoted spread over 14 samples, standing in for the true range
    pub atr: Option<f64>,
    pub atr_normalized: Option<f64>,
}

/// Simple moving average over the trailing `period` values, defined from
/// the first value on
#[derive(Debug, Clone)]
pub struct Sma {
    period: usize,
    values: VecDeque<f64>,
    sum: f64,
}

impl Sma {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
            values: VecDeque::with_capacity(period.max(1)),
            sum: 0.0,
        }
    }

    pub fn update(&mut self, x: f64) -> f64 {
        if self.values.len() == self.period {
            if let Some(old) = self.values.pop_front() {
                self.sum -= old;
            }
        }
        self.values.push_back(x);
        self.sum += x;
        self.sum / self.values.len() as f64
    }
}

/// Stochastic oscillator over a trailing window of prices
#[derive(Debug, Clone)]
pub struct Stochastic {
    period: usize,
    values: VecDeque<f64>,
}

impl Stochastic {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
            values: VecDeque::with_capacity(period.max(1)),
        }
    }

    /// `None` while the window has no range
    pub fn update(&mut self, x: f64) -> Option<f64> {
        if self.values.len() == self.period {
            self.values.pop_front();
        }
        self.values.push_back(x);

        let low = self.values.iter().copied().fold(f64::INFINITY, f64::min);
        let high = self.values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if high - low <= f64::EPSILON {
            return None;
        }
        Some(100.0 * (x - low) / (high - low))
    }
}

/// Exponential moving average seeded with the first value
#[derive(Debug, Clone)]
pub struct Ema {
    alpha: f64,
    value: Option<f64>,
}

impl Ema {
    pub fn with_span(span: usize) -> Self {
        Self {
            alpha: 2.0 / (span as f64 + 1.0),
            value: None,
        }
    }

    pub fn update(&mut self, x: f64) -> f64 {
        let next = match self.value {
            Some(prev) => prev + self.alpha * (x - prev),
            None => x,
        };
        self.value = Some(next);
        next
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

/// Relative strength index over simple averages of gains and losses
#[derive(Debug, Clone)]
pub struct Rsi {
    period: usize,
    last: Option<f64>,
    deltas: VecDeque<f64>,
}

impl Rsi {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
            last: None,
            deltas: VecDeque::with_capacity(period.max(1)),
        }
    }

    pub fn update(&mut self, x: f64) -> Option<f64> {
        let last = self.last.replace(x)?;
        if self.deltas.len() == self.period {
            self.deltas.pop_front();
        }
        self.deltas.push_back(x - last);

        let n = self.deltas.len() as f64;
        let gain = self.deltas.iter().filter(|d| **d > 0.0).sum::<f64>() / n;
        let loss = -self.deltas.iter().filter(|d| **d < 0.0).sum::<f64>() / n;

        Some(if loss == 0.0 {
            if gain == 0.0 {
                50.0
            } else {
                100.0
            }
        } else {
            100.0 - 100.0 / (1.0 + gain / loss)
        })
    }
}

/// Bollinger band reading at one sample
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BollingerReading {
    pub position: Option<f64>,
    pub width: Option<f64>,
}

/// Bollinger bands around the simple moving average
#[derive(Debug, Clone)]
pub struct Bollinger {
    period: usize,
    width: f64,
    values: VecDeque<f64>,
}

impl Bollinger {
    pub fn new(period: usize, width: f64) -> Self {
        Self {
            period: period.max(2),
            width,
            values: VecDeque::with_capacity(period.max(2)),
        }
    }

    pub fn update(&mut self, x: f64) -> BollingerReading {
        if self.values.len() == self.period {
            self.values.pop_front();
        }
        self.values.push_back(x);

        let values: Vec<f64> = self.values.iter().copied().collect();
        let Some(std) = super::estimators::sample_std(&values) else {
            return BollingerReading::default();
        };
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let lower = mean - self.width * std;
        let upper = mean + self.width * std;

        BollingerReading {
            position: (upper - lower > f64::EPSILON).then(|| (x - lower) / (upper - lower)),
            width: (mean != 0.0).then(|| (upper - lower) / mean),
        }
    }
}

/// Running indicator state for one instrument
#[derive(Debug, Clone)]
pub struct TechnicalState {
    smas: [Sma; 4],
    ema_short: Ema,
    ema_fast: Ema,
    ema_medium: Ema,
    ema_slow: Ema,
    signal: Ema,
    rsi: Rsi,
    rsi_short: Rsi,
    bollinger: Bollinger,
    stochastic: Stochastic,
    atr: Sma,
}

impl Default for TechnicalState {
    fn default() -> Self {
        Self {
            smas: SMA_PERIODS.map(Sma::new),
            ema_short: Ema::with_span(EMA_SHORT_SPAN),
            ema_fast: Ema::with_span(EMA_FAST_SPAN),
            ema_medium: Ema::with_span(EMA_MEDIUM_SPAN),
            ema_slow: Ema::with_span(EMA_SLOW_SPAN),
            signal: Ema::with_span(MACD_SIGNAL_SPAN),
            rsi: Rsi::new(RSI_PERIOD),
            rsi_short: Rsi::new(RSI_SHORT_PERIOD),
            bollinger: Bollinger::new(BOLLINGER_PERIOD, BOLLINGER_WIDTH),
            stochastic: Stochastic::new(STOCHASTIC_PERIOD),
            atr: Sma::new(ATR_PERIOD),
        }
    }
}

fn relative_distance(price: f64, reference: f64) -> Option<f64> {
    (reference != 0.0).then(|| (price - reference) / reference)
}

impl TechnicalState {
    /// Feed one sampled price and the quoted spread at the same sample
    pub fn update(&mut self, price: f64, spread: Option<f64>) -> TechnicalIndicators {
        let [sma_5, sma_10, sma_20, sma_50] = {
            let [a, b, c, d] = &mut self.smas;
            [a.update(price), b.update(price), c.update(price), d.update(price)]
        };
        let ema_9 = self.ema_short.update(price);
        let fast = self.ema_fast.update(price);
        let ema_21 = self.ema_medium.update(price);
        let slow = self.ema_slow.update(price);
        let macd = fast - slow;
        let signal = self.signal.update(macd);
        let bands = self.bollinger.update(price);
        let atr = spread.map(|s| self.atr.update(s));

        TechnicalIndicators {
            sma_5: Some(sma_5),
            sma_10: Some(sma_10),
            sma_20: Some(sma_20),
            sma_50: Some(sma_50),
            ema_9: Some(ema_9),
            ema_fast: Some(fast),
            ema_21: Some(ema_21),
            ema_slow: Some(slow),
            macd: Some(macd),
            macd_signal: Some(signal),
            macd_histogram: Some(macd - signal),
            rsi: self.rsi.update(price),
            rsi_7: self.rsi_short.update(price),
            bollinger_position: bands.position,
            bollinger_width: bands.width,
            price_above_sma_20: Some(price > sma_20),
            price_above_sma_50: Some(price > sma_50),
            sma_crossover_5_20: Some(sma_5 > sma_20),
            ema_crossover_9_21: Some(ema_9 > ema_21),
            distance_from_sma_20: relative_distance(price, sma_20),
            distance_from_ema_21: relative_distance(price, ema_21),
            stochastic: self.stochastic.update(price),
            atr,
            atr_normalized: atr.and_then(|a| (price != 0.0).then(|| a / price)),
        }
    }
}
