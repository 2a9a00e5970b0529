pub mod leader;
pub mod scorer;
pub mod stats;

pub use leader::{LeaderIndicators, LeaderStateClassifier};
pub use scorer::{build_scorer, RobustScorer, ZScoreScorer};

use storm_core::{FeatureFrame, Result, StormError};
use std::ops::Range;

/// Dense, gap-free model input: one row per coarse timestamp, one column
/// per selected feature.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl FeatureMatrix {
    /// Selects the wanted features that exist in the frame, in the wanted
    /// order. Missing and non-finite cells become 0.0.
    pub fn from_frame(frame: &FeatureFrame, range: Range<usize>, features: &[String]) -> Self {
        let selected: Vec<(String, usize)> = features
            .iter()
            .filter_map(|name| frame.column_index(name).map(|idx| (name.clone(), idx)))
            .collect();

        let rows = range
            .map(|row| {
                selected
                    .iter()
                    .map(|(_, col)| frame.value(row, *col).unwrap_or(0.0))
                    .collect()
            })
            .collect();

        Self {
            columns: selected.into_iter().map(|(name, _)| name).collect(),
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, idx: usize) -> impl Iterator<Item = f64> + '_ {
        self.rows.iter().map(move |row| row[idx])
    }
}

/// Anomaly model capability consumed by the walk-forward engine. Higher
/// scores are more anomalous.
pub trait AnomalyScorer: Send {
    fn fit(&mut self, window: &FeatureMatrix) -> Result<()>;
    fn score(&self, window: &FeatureMatrix) -> Result<Vec<f64>>;
    fn name(&self) -> &str;
}

pub(crate) fn check_fit_input(window: &FeatureMatrix) -> Result<()> {
    if window.is_empty() {
        return Err(StormError::ModelFit("empty training window".to_string()));
    }
    if window.width() == 0 {
        return Err(StormError::ModelFit("no feature columns selected".to_string()));
    }
    Ok(())
}
