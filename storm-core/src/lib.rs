pub mod model;
pub mod series;
pub mod storage;

pub use model::*;
pub use series::{StepSeries, TimeSeries};

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StormError {
    #[error("Missing data: {0}")]
    MissingData(String),

    #[error("Model fit error: {0}")]
    ModelFit(String),

    #[error("Invalid series: {0}")]
    InvalidSeries(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(String),
}

impl StormError {
    pub fn is_missing_data(&self) -> bool {
        matches!(self, StormError::MissingData(_))
    }
}

pub type Result<T> = std::result::Result<T, StormError>;

/// Percentile tiers used for explosion labels and metric keys.
pub const PERCENTILE_TIERS: [u8; 2] = [80, 90];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StormConfig {
    pub paths: PathsConfig,
    pub universe: UniverseConfig,
    #[serde(default)]
    pub backtest: BacktestConfig,
    #[serde(default)]
    pub scorer: ScorerConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    pub processed_dir: PathBuf,
    pub features_dir: PathBuf,
    pub artifacts_dir: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UniverseConfig {
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default)]
    pub tier_a: Vec<String>,
    #[serde(default)]
    pub tier_b: Vec<String>,
    #[serde(default)]
    pub tier_c: Vec<String>,
}

impl UniverseConfig {
    /// Explicit symbols win; otherwise the tiers are concatenated in order.
    pub fn resolve(&self) -> Vec<String> {
        if !self.symbols.is_empty() {
            return self.symbols.clone();
        }

        self.tier_a
            .iter()
            .chain(&self.tier_b)
            .chain(&self.tier_c)
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    pub train_window_days: u32,
    pub retrain_every_hours: u32,
    pub score_qtile: f64,
    pub threshold_window_days: u32,
    pub prealert_consecutive_mins: usize,
    pub confirm_bars_5m: u32,
    pub coarse_interval_minutes: u32,
    pub fine_interval_minutes: u32,
    pub horizons_min: Vec<u32>,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            train_window_days: 30,
            retrain_every_hours: 8,
            score_qtile: 0.98,
            threshold_window_days: 14,
            prealert_consecutive_mins: 2,
            confirm_bars_5m: 1,
            coarse_interval_minutes: 5,
            fine_interval_minutes: 1,
            horizons_min: vec![30, 60, 90, 120],
        }
    }
}

impl BacktestConfig {
    pub fn train_window(&self) -> Duration {
        Duration::days(i64::from(self.train_window_days))
    }

    pub fn retrain_every(&self) -> Duration {
        Duration::hours(i64::from(self.retrain_every_hours))
    }

    pub fn coarse_interval(&self) -> Duration {
        Duration::minutes(i64::from(self.coarse_interval_minutes))
    }

    pub fn fine_interval(&self) -> Duration {
        Duration::minutes(i64::from(self.fine_interval_minutes))
    }

    /// Number of coarse rows in the threshold calibration window.
    pub fn threshold_window_rows(&self) -> usize {
        let minutes = u64::from(self.threshold_window_days) * 24 * 60;
        (minutes / u64::from(self.coarse_interval_minutes.max(1))) as usize
    }

    /// Distance from a pre-alert to its confirmation check.
    /// Saturates at `Duration::MAX` for absurd bar counts.
    pub fn confirm_offset(&self) -> Duration {
        let minutes = i64::from(self.coarse_interval_minutes)
            .saturating_mul(i64::from(self.confirm_bars_5m));
        Duration::try_minutes(minutes).unwrap_or(Duration::MAX)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScorerBackend {
    Robust,
    Zscore,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    pub backend: ScorerBackend,
    pub features: Vec<String>,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            backend: ScorerBackend::Robust,
            features: DEFAULT_FEATURES.iter().map(|f| f.to_string()).collect(),
        }
    }
}

pub const DEFAULT_FEATURES: [&str; 12] = [
    // price/basis
    "basis_now",
    "basis_TWAP_60m",
    "basis_TWAP_120m",
    "basis_minus_fundTWAP",
    // flow
    "cvd_perp_5m",
    "cvd_perp_15m",
    "cvd_spot_5m",
    "cvd_spot_15m",
    "perp_share_60m",
    "dperp_share_60m",
    // liquidity & vol
    "spread_bps",
    "rv_15m",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    pub price_column: String,
    pub trailing_days: u32,
    pub rolling_minutes: u32,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            price_column: "perp_mark".to_string(),
            trailing_days: 30,
            rolling_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub max_parallel: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { max_parallel: 4 }
    }
}
