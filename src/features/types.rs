//! Feature record types

use super::estimators::MarketImpact;
use super::targets::{TargetStatus, TargetValue};
use super::technical::TechnicalIndicators;
use crate::config::Config;
use crate::orderbook::Snapshot;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Column layout shared by every record of a run
///
/// Per-horizon and per-window vectors in a `FeatureRecord` are aligned with
/// these lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureLayout {
    pub top_levels: usize,
    pub depth_bands_pct: Vec<Decimal>,
    pub return_horizons_secs: Vec<u64>,
    pub volatility_windows_secs: Vec<u64>,
    pub imbalance_windows: Vec<usize>,
    pub target_horizons_secs: Vec<u64>,
}

impl FeatureLayout {
    pub fn from_config(config: &Config) -> Self {
        Self {
            top_levels: config.book.top_levels,
            depth_bands_pct: config.book.depth_bands_pct.clone(),
            return_horizons_secs: config.features.return_horizons_secs.clone(),
            volatility_windows_secs: config.features.volatility_windows_secs.clone(),
            imbalance_windows: config.features.imbalance_windows.clone(),
            target_horizons_secs: config.targets.horizons_secs.clone(),
        }
    }
}

/// Backward-looking microprice return over one horizon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HorizonReturn {
    pub horizon_secs: u64,
    pub simple: Option<f64>,
    pub log: Option<f64>,
}

/// Volatility estimates over one trailing window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowVolatility {
    pub window_secs: u64,
    /// Sample std of one-step log returns
    pub realized: Option<f64>,
    pub parkinson: Option<f64>,
}

/// Snapshot enriched with derived features and forward targets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub snapshot: Snapshot,

    pub mid_price: Option<Decimal>,
    pub spread: Option<Decimal>,
    pub spread_bps: Option<f64>,
    /// Top-of-book size imbalance
    pub size_imbalance: Option<f64>,
    /// `2 × |mid − microprice|`
    pub effective_spread: Option<f64>,

    pub ticker_time: Option<DateTime<Utc>>,
    pub ticker_price: Option<Decimal>,
    pub ticker_volume_24h: Option<Decimal>,
    pub ticker_basis_bps: Option<f64>,

    pub returns: Vec<HorizonReturn>,
    pub volatility: Vec<WindowVolatility>,

    /// Top-N depth imbalance
    pub order_flow_imbalance: Option<f64>,
    /// Depth imbalance within each band of mid
    pub band_imbalance: Vec<Option<f64>>,
    /// Rolling means of the order-flow imbalance, one per window
    pub imbalance_ma: Vec<Option<f64>>,
    pub vpin: Option<f64>,
    pub vpin_trend: Option<f64>,
    pub roll_spread: Option<f64>,
    pub buy_impact: Option<MarketImpact>,
    pub sell_impact: Option<MarketImpact>,

    pub technical: TechnicalIndicators,

    pub target_status: TargetStatus,
    /// One slot per target horizon
    pub targets: Vec<Option<TargetValue>>,
}

impl FeatureRecord {
    /// Record with no derived values, shaped by `layout`
    pub fn empty(snapshot: Snapshot, layout: &FeatureLayout, status: TargetStatus) -> Self {
        Self {
            snapshot,
            mid_price: None,
            spread: None,
            spread_bps: None,
            size_imbalance: None,
            effective_spread: None,
            ticker_time: None,
            ticker_price: None,
            ticker_volume_24h: None,
            ticker_basis_bps: None,
            returns: layout
                .return_horizons_secs
                .iter()
                .map(|h| HorizonReturn {
                    horizon_secs: *h,
                    simple: None,
                    log: None,
                })
                .collect(),
            volatility: layout
                .volatility_windows_secs
                .iter()
                .map(|w| WindowVolatility {
                    window_secs: *w,
                    realized: None,
                    parkinson: None,
                })
                .collect(),
            order_flow_imbalance: None,
            band_imbalance: vec![None; layout.depth_bands_pct.len()],
            imbalance_ma: vec![None; layout.imbalance_windows.len()],
            vpin: None,
            vpin_trend: None,
            roll_spread: None,
            buy_impact: None,
            sell_impact: None,
            technical: TechnicalIndicators::default(),
            target_status: status,
            targets: vec![None; layout.target_horizons_secs.len()],
        }
    }

    pub fn instrument_id(&self) -> &str {
        &self.snapshot.instrument_id
    }

    pub fn sample_time(&self) -> DateTime<Utc> {
        self.snapshot.sample_time
    }

    /// Price that returns and targets are measured on: microprice, else mid
    pub fn reference_price(&self) -> Option<Decimal> {
        if !self.snapshot.is_valid() {
            return None;
        }
        self.snapshot.microprice.or_else(|| self.snapshot.mid_price())
    }
}
