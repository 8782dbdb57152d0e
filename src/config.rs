//! Configuration types for lob-pipeline

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sampler: SamplerConfig,
    #[serde(default)]
    pub book: BookConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub features: FeatureConfig,
    #[serde(default)]
    pub targets: TargetConfig,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Configuration validation errors
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Sampling interval must be positive")]
    ZeroInterval,
    #[error("Book must retain at least one level")]
    ZeroTopLevels,
    #[error("Depth band must be positive: {0}")]
    InvalidDepthBand(Decimal),
    #[error("Outlier sensitivity k must be positive: {0}")]
    InvalidSensitivity(f64),
    #[error("EWMA alpha must be in (0, 1]: {0}")]
    InvalidAlpha(f64),
    #[error("At least one {0} horizon is required")]
    EmptyHorizons(&'static str),
    #[error("Horizons must be positive")]
    ZeroHorizon,
    #[error("Dead zone must be non-negative: {0}")]
    InvalidDeadZone(f64),
    #[error("Window must be positive: {0}")]
    ZeroWindow(&'static str),
    #[error("Max sampling gap must be at least one interval: {0}s")]
    InvalidMaxGap(u64),
}

/// Snapshot sampler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// Sampling interval (seconds)
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Largest event time jump sampled through (seconds); longer jumps
    /// restart the grid and expire pending records
    #[serde(default = "default_max_gap_secs")]
    pub max_gap_secs: u64,
}

fn default_interval_secs() -> u64 {
    10
}
fn default_max_gap_secs() -> u64 {
    3600
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            max_gap_secs: default_max_gap_secs(),
        }
    }
}

/// Order book snapshot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookConfig {
    /// Number of levels per side retained in each snapshot
    #[serde(default = "default_top_levels")]
    pub top_levels: usize,

    /// Depth bands as percentages of mid price (0.1 = 0.1%)
    #[serde(default = "default_depth_bands")]
    pub depth_bands_pct: Vec<Decimal>,
}

fn default_top_levels() -> usize {
    10
}
fn default_depth_bands() -> Vec<Decimal> {
    vec![Decimal::new(1, 1), Decimal::new(5, 1)] // 0.1%, 0.5%
}

impl BookConfig {
    /// Widest depth band as a plain percentage, 0 when none are configured
    pub fn widest_band_pct(&self) -> f64 {
        self.depth_bands_pct
            .iter()
            .filter_map(|b| b.to_f64())
            .fold(0.0, f64::max)
    }
}

impl Default for BookConfig {
    fn default() -> Self {
        Self {
            top_levels: default_top_levels(),
            depth_bands_pct: default_depth_bands(),
        }
    }
}

/// Adaptive outlier filter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Enable outlier rejection
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Rejection threshold in multiples of the EWMA absolute deviation
    #[serde(default = "default_k")]
    pub k: f64,

    /// EWMA smoothing factor for mean and deviation
    #[serde(default = "default_alpha")]
    pub alpha: f64,

    /// Deviation floor in basis points of the mean
    #[serde(default = "default_min_deviation_bps")]
    pub min_deviation_bps: f64,

    /// Prices accepted unconditionally while the estimates warm up
    #[serde(default = "default_warmup_samples")]
    pub warmup_samples: u64,
}

fn default_true() -> bool {
    true
}
fn default_k() -> f64 {
    6.0
}
fn default_alpha() -> f64 {
    0.05
}
fn default_min_deviation_bps() -> f64 {
    1.0
}
fn default_warmup_samples() -> u64 {
    20
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            k: default_k(),
            alpha: default_alpha(),
            min_deviation_bps: default_min_deviation_bps(),
            warmup_samples: default_warmup_samples(),
        }
    }
}

/// Derived feature configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Lookback horizons for microprice returns (seconds)
    #[serde(default = "default_return_horizons")]
    pub return_horizons_secs: Vec<u64>,

    /// Windows for rolling and Parkinson volatility (seconds)
    #[serde(default = "default_volatility_windows")]
    pub volatility_windows_secs: Vec<u64>,

    /// Windows for order imbalance moving averages (snapshots)
    #[serde(default = "default_imbalance_windows")]
    pub imbalance_windows: Vec<usize>,

    /// VPIN window (snapshots)
    #[serde(default = "default_vpin_window")]
    pub vpin_window: usize,

    /// Minimum snapshots before VPIN is reported
    #[serde(default = "default_vpin_min_periods")]
    pub vpin_min_periods: usize,

    /// Roll spread window (consecutive microprice changes)
    #[serde(default = "default_roll_window")]
    pub roll_window: usize,

    /// Minimum change pairs before the Roll spread is reported
    #[serde(default = "default_roll_min_pairs")]
    pub roll_min_pairs: usize,

    /// Quote notional used for the market impact estimate
    #[serde(default = "default_impact_notional")]
    pub impact_notional: Decimal,
}

fn default_return_horizons() -> Vec<u64> {
    vec![10, 30, 60, 300]
}
fn default_volatility_windows() -> Vec<u64> {
    vec![60, 300]
}
fn default_imbalance_windows() -> Vec<usize> {
    vec![10, 30, 60]
}
fn default_vpin_window() -> usize {
    50
}
fn default_vpin_min_periods() -> usize {
    5
}
fn default_roll_window() -> usize {
    20
}
fn default_roll_min_pairs() -> usize {
    2
}
fn default_impact_notional() -> Decimal {
    Decimal::new(10_000, 0)
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            return_horizons_secs: default_return_horizons(),
            volatility_windows_secs: default_volatility_windows(),
            imbalance_windows: default_imbalance_windows(),
            vpin_window: default_vpin_window(),
            vpin_min_periods: default_vpin_min_periods(),
            roll_window: default_roll_window(),
            roll_min_pairs: default_roll_min_pairs(),
            impact_notional: default_impact_notional(),
        }
    }
}

/// Forward target configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Forward horizons (seconds)
    #[serde(default = "default_target_horizons")]
    pub horizons_secs: Vec<u64>,

    /// Dead zone around zero labelled as flat (0.0005 = 0.05%)
    #[serde(default = "default_dead_zone")]
    pub dead_zone: f64,

    /// Extra time past the longest horizon before a pending record is expired
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
}

fn default_target_horizons() -> Vec<u64> {
    vec![30, 60, 300]
}
fn default_dead_zone() -> f64 {
    0.0005
}
fn default_grace_secs() -> u64 {
    60
}

impl TargetConfig {
    /// Longest configured horizon (seconds)
    pub fn max_horizon_secs(&self) -> u64 {
        self.horizons_secs.iter().copied().max().unwrap_or(0)
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            horizons_secs: default_target_horizons(),
            dead_zone: default_dead_zone(),
            grace_secs: default_grace_secs(),
        }
    }
}

/// Feature output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Root directory of the partitioned Parquet output
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Records buffered per partition before flushing
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Maximum time between flushes (seconds)
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./data/features")
}
fn default_buffer_size() -> usize {
    1000
}
fn default_flush_interval_secs() -> u64 {
    60
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            buffer_size: default_buffer_size(),
            flush_interval_secs: default_flush_interval_secs(),
        }
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output format: "pretty" or "json"
    #[serde(default)]
    pub log_format: LogFormat,

    /// Prometheus exporter port; no exporter when unset
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format
    #[default]
    Pretty,
    /// JSON format for log aggregation
    Json,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::Pretty,
            metrics_port: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges the pipeline relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sampler.interval_secs == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        if self.sampler.max_gap_secs < self.sampler.interval_secs {
            return Err(ConfigError::InvalidMaxGap(self.sampler.max_gap_secs));
        }
        if self.book.top_levels == 0 {
            return Err(ConfigError::ZeroTopLevels);
        }
        if let Some(band) = self
            .book
            .depth_bands_pct
            .iter()
            .find(|b| **b <= Decimal::ZERO)
        {
            return Err(ConfigError::InvalidDepthBand(*band));
        }
        if self.filter.k <= 0.0 || !self.filter.k.is_finite() {
            return Err(ConfigError::InvalidSensitivity(self.filter.k));
        }
        if !(self.filter.alpha > 0.0 && self.filter.alpha <= 1.0) {
            return Err(ConfigError::InvalidAlpha(self.filter.alpha));
        }
        if self.features.return_horizons_secs.is_empty() {
            return Err(ConfigError::EmptyHorizons("return"));
        }
        if self.targets.horizons_secs.is_empty() {
            return Err(ConfigError::EmptyHorizons("target"));
        }
        if self
            .features
            .return_horizons_secs
            .iter()
            .chain(self.targets.horizons_secs.iter())
            .chain(self.features.volatility_windows_secs.iter())
            .any(|h| *h == 0)
        {
            return Err(ConfigError::ZeroHorizon);
        }
        if self.targets.dead_zone < 0.0 || !self.targets.dead_zone.is_finite() {
            return Err(ConfigError::InvalidDeadZone(self.targets.dead_zone));
        }
        if self.features.vpin_window == 0 {
            return Err(ConfigError::ZeroWindow("vpin"));
        }
        if self.features.roll_window == 0 {
            return Err(ConfigError::ZeroWindow("roll"));
        }
        if self.features.imbalance_windows.iter().any(|w| *w == 0) {
            return Err(ConfigError::ZeroWindow("imbalance"));
        }
        Ok(())
    }
}
