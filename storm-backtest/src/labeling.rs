use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use storm_anomaly::stats::{self, RollingSum};
use storm_core::{
    Alert, BacktestConfig, EvaluationConfig, LabelKey, Outcome, PriceSeries, PERCENTILE_TIERS,
};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelerConfig {
    /// History used to estimate the explosion percentiles.
    pub trailing: Duration,
    /// Number of consecutive absolute returns in one baseline move.
    pub rolling_rows: usize,
}

impl Default for LabelerConfig {
    fn default() -> Self {
        Self {
            trailing: Duration::days(30),
            rolling_rows: 60,
        }
    }
}

impl LabelerConfig {
    pub fn from_config(evaluation: &EvaluationConfig, backtest: &BacktestConfig) -> Self {
        let fine = backtest.fine_interval_minutes.max(1);
        Self {
            trailing: Duration::days(i64::from(evaluation.trailing_days)),
            rolling_rows: (evaluation.rolling_minutes / fine).max(1) as usize,
        }
    }
}

/// Percentile cut-offs of the trailing rolling absolute move.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExplosionBaseline {
    cutoffs: BTreeMap<u8, f64>,
}

impl ExplosionBaseline {
    pub fn new(cutoffs: impl IntoIterator<Item = (u8, f64)>) -> Self {
        Self {
            cutoffs: cutoffs.into_iter().collect(),
        }
    }

    pub fn cutoff(&self, percentile: u8) -> Option<f64> {
        self.cutoffs.get(&percentile).copied()
    }

    /// An undefined cut-off never labels a move as explosive.
    pub fn exploded(&self, percentile: u8, forward_move: f64) -> bool {
        self.cutoff(percentile)
            .map_or(false, |cutoff| forward_move >= cutoff)
    }
}

/// Labels each alert with whether an explosive move followed it.
///
/// Log returns and their rolling sums are computed once for the whole
/// series. Any single label only reads returns inside the trailing history
/// ending at the alert, or inside `(t0, t0 + horizon]`.
#[derive(Debug, Clone)]
pub struct OutcomeLabeler<'a> {
    prices: &'a PriceSeries,
    abs_returns: Vec<Option<f64>>,
    rolling: Vec<Option<f64>>,
    horizons_min: Vec<u32>,
    config: LabelerConfig,
}

impl<'a> OutcomeLabeler<'a> {
    pub fn new(prices: &'a PriceSeries, horizons_min: Vec<u32>, config: LabelerConfig) -> Self {
        let values = prices.values();
        let abs_returns: Vec<Option<f64>> = (0..values.len())
            .map(|i| {
                if i == 0 {
                    return None;
                }
                let r = (values[i] / values[i - 1]).ln();
                r.is_finite().then(|| r.abs())
            })
            .collect();

        // Rolling sum ending at each row; undefined until a full window of
        // defined returns is available. A gap starts a fresh window.
        let mut window = RollingSum::new(config.rolling_rows);
        let rolling = abs_returns
            .iter()
            .map(|r| match r {
                Some(r) => {
                    window.push(*r);
                    window.is_full().then(|| window.sum())
                }
                None => {
                    window = RollingSum::new(config.rolling_rows);
                    None
                }
            })
            .collect();

        Self {
            prices,
            abs_returns,
            rolling,
            horizons_min,
            config,
        }
    }

    /// Percentiles of rolling moves whose whole window lies in
    /// `(t0 - trailing, t0]`.
    pub fn baseline(&self, t0: DateTime<Utc>) -> ExplosionBaseline {
        let history = self.prices.range_between(t0 - self.config.trailing, t0);
        let first_end = (history.start + self.config.rolling_rows).saturating_sub(1);

        let moves: Vec<f64> = (first_end..history.end)
            .filter_map(|idx| self.rolling[idx])
            .collect();

        ExplosionBaseline::new(PERCENTILE_TIERS.iter().filter_map(|p| {
            stats::quantile(&moves, f64::from(*p) / 100.0).map(|cutoff| (*p, cutoff))
        }))
    }

    /// Sum of absolute returns in `(t0, t0 + horizon]`.
    pub fn forward_move(&self, t0: DateTime<Utc>, horizon_min: u32) -> f64 {
        let span = self
            .prices
            .range_between(t0, t0 + Duration::minutes(i64::from(horizon_min)));
        self.abs_returns[span].iter().flatten().sum()
    }

    pub fn label(&self, alert: &Alert) -> Outcome {
        let baseline = self.baseline(alert.timestamp);

        let labels = self
            .horizons_min
            .iter()
            .flat_map(|horizon| {
                let forward = self.forward_move(alert.timestamp, *horizon);
                let baseline = &baseline;
                PERCENTILE_TIERS.iter().map(move |p| {
                    (LabelKey::new(*horizon, *p), baseline.exploded(*p, forward))
                })
            })
            .collect();

        Outcome {
            symbol: alert.symbol.clone(),
            timestamp: alert.timestamp,
            leader_state: alert.leader_state,
            labels,
        }
    }

    pub fn label_all(&self, alerts: &[Alert]) -> Vec<Outcome> {
        let outcomes: Vec<Outcome> = alerts.iter().map(|a| self.label(a)).collect();
        debug!("Labeled {} alerts", outcomes.len());
        outcomes
    }
}
