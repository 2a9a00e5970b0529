use crate::{Result, StormError, TimeSeries};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Fine-resolution prices used for alert timing and outcome labeling.
pub type PriceSeries = TimeSeries<f64>;

/// One coarse row of named features. Values line up with the owning
/// frame's columns; `None` marks a missing value.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub values: Vec<Option<f64>>,
}

impl FeatureRow {
    pub fn new(values: Vec<Option<f64>>) -> Self {
        Self { values }
    }
}

#[derive(Debug, Clone)]
pub struct FeatureFrame {
    columns: Vec<String>,
    rows: TimeSeries<FeatureRow>,
}

impl FeatureFrame {
    pub fn new(columns: Vec<String>, rows: TimeSeries<FeatureRow>) -> Result<Self> {
        if let Some((ts, row)) = rows.iter().find(|(_, row)| row.values.len() != columns.len()) {
            return Err(StormError::InvalidSeries(format!(
                "row at {} has {} values for {} columns",
                ts,
                row.values.len(),
                columns.len()
            )));
        }

        Ok(Self { columns, rows })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn rows(&self) -> &TimeSeries<FeatureRow> {
        &self.rows
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        self.rows.timestamps()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Finite value of `column` at `row`, `None` when absent or not finite.
    pub fn value(&self, row: usize, column: usize) -> Option<f64> {
        self.rows
            .values()
            .get(row)?
            .values
            .get(column)
            .copied()
            .flatten()
            .filter(|v| v.is_finite())
    }

    pub fn row(&self, index: usize) -> FeatureView<'_> {
        FeatureView { frame: self, index }
    }
}

/// Borrowed access to one row of a `FeatureFrame` by column name.
#[derive(Debug, Clone, Copy)]
pub struct FeatureView<'a> {
    frame: &'a FeatureFrame,
    index: usize,
}

impl<'a> FeatureView<'a> {
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.frame.timestamps().get(self.index).copied()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        let column = self.frame.column_index(name)?;
        self.frame.value(self.index, column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LeaderState {
    PerpLed,
    SpotLed,
    Divergence,
    Confluence,
}

impl LeaderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaderState::PerpLed => "perp-led",
            LeaderState::SpotLed => "spot-led",
            LeaderState::Divergence => "divergence",
            LeaderState::Confluence => "confluence",
        }
    }
}

impl fmt::Display for LeaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRow {
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub anomaly_score: f64,
    pub leader_state: LeaderState,
    pub threshold: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub anomaly_score: f64,
    pub threshold: f64,
    pub leader_state: LeaderState,
}

/// One `(horizon, percentile)` label slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LabelKey {
    pub horizon_min: u32,
    pub percentile: u8,
}

impl LabelKey {
    pub fn new(horizon_min: u32, percentile: u8) -> Self {
        Self {
            horizon_min,
            percentile,
        }
    }

    /// Every label slot for the given horizons, horizon-major.
    pub fn grid(horizons_min: &[u32]) -> Vec<LabelKey> {
        horizons_min
            .iter()
            .flat_map(|h| crate::PERCENTILE_TIERS.iter().map(move |p| LabelKey::new(*h, *p)))
            .collect()
    }

    pub fn column_name(&self) -> String {
        self.to_string()
    }

    pub fn metric_key(&self) -> String {
        format!("T{}_p{}", self.horizon_min, self.percentile)
    }
}

impl fmt::Display for LabelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "explosion_{}m_p{}", self.horizon_min, self.percentile)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub leader_state: LeaderState,
    pub labels: BTreeMap<LabelKey, bool>,
}

impl Outcome {
    pub fn label(&self, key: &LabelKey) -> Option<bool> {
        self.labels.get(key).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub tp: u64,
    pub fp: u64,
    #[serde(rename = "fn")]
    pub fn_: u64,
}

impl Metrics {
    pub fn from_counts(tp: u64, fp: u64, fn_: u64) -> Self {
        let ratio = |num: u64, den: u64| if den > 0 { num as f64 / den as f64 } else { 0.0 };
        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        Self {
            precision,
            recall,
            f1,
            tp,
            fp,
            fn_,
        }
    }
}

/// Metrics keyed by `T{horizon}_p{percentile}`.
pub type MetricsReport = BTreeMap<String, Metrics>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Ok,
    NoData,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolStatus {
    pub symbol: String,
    pub status: RunStatus,
    pub message: String,
}

impl SymbolStatus {
    pub fn ok(symbol: &str, message: impl Into<String>) -> Self {
        Self::with_status(symbol, RunStatus::Ok, message)
    }

    pub fn no_data(symbol: &str, message: impl Into<String>) -> Self {
        Self::with_status(symbol, RunStatus::NoData, message)
    }

    pub fn error(symbol: &str, message: impl Into<String>) -> Self {
        Self::with_status(symbol, RunStatus::Error, message)
    }

    /// Maps a failed symbol pipeline onto its batch status.
    pub fn from_error(symbol: &str, error: &StormError) -> Self {
        if error.is_missing_data() {
            Self::no_data(symbol, error.to_string())
        } else {
            Self::error(symbol, error.to_string())
        }
    }

    fn with_status(symbol: &str, status: RunStatus, message: impl Into<String>) -> Self {
        Self {
            symbol: symbol.to_string(),
            status,
            message: message.into(),
        }
    }
}
