use crate::{check_fit_input, stats, AnomalyScorer, FeatureMatrix};
use statrs::statistics::Statistics;
use storm_core::{Result, ScorerBackend, ScorerConfig, StormError};
use tracing::debug;

/// Per-column location/scale fitted on a training window.
#[derive(Debug, Clone, PartialEq)]
struct ColumnScale {
    center: f64,
    scale: f64,
}

impl ColumnScale {
    fn standardize(&self, value: f64) -> f64 {
        (value - self.center) / self.scale
    }
}

fn usable_scale(scale: f64) -> f64 {
    if scale.is_finite() && scale > 0.0 {
        scale
    } else {
        1.0
    }
}

fn check_score_input<'a>(
    fitted: &'a Option<Vec<ColumnScale>>,
    window: &FeatureMatrix,
) -> Result<&'a [ColumnScale]> {
    let scales = fitted
        .as_ref()
        .ok_or_else(|| StormError::ModelFit("score called before fit".to_string()))?;

    if scales.len() != window.width() {
        return Err(StormError::ModelFit(format!(
            "fitted on {} features, scoring {}",
            scales.len(),
            window.width()
        )));
    }

    Ok(scales)
}

/// Median/IQR scaling, scored as the root-mean-square of the scaled row.
#[derive(Debug, Clone, Default)]
pub struct RobustScorer {
    scales: Option<Vec<ColumnScale>>,
}

impl RobustScorer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AnomalyScorer for RobustScorer {
    fn fit(&mut self, window: &FeatureMatrix) -> Result<()> {
        check_fit_input(window)?;

        let scales = (0..window.width())
            .map(|idx| {
                let column: Vec<f64> = window.column(idx).collect();
                let center = stats::median(&column).unwrap_or(0.0);
                let q1 = stats::quantile(&column, 0.25).unwrap_or(0.0);
                let q3 = stats::quantile(&column, 0.75).unwrap_or(0.0);
                ColumnScale {
                    center,
                    scale: usable_scale(q3 - q1),
                }
            })
            .collect();

        debug!("Robust scorer fitted on {} rows", window.len());
        self.scales = Some(scales);
        Ok(())
    }

    fn score(&self, window: &FeatureMatrix) -> Result<Vec<f64>> {
        let scales = check_score_input(&self.scales, window)?;
        let width = scales.len() as f64;

        Ok(window
            .rows
            .iter()
            .map(|row| {
                let sum_sq: f64 = row
                    .iter()
                    .zip(scales)
                    .map(|(v, s)| s.standardize(*v).powi(2))
                    .sum();
                (sum_sq / width).sqrt()
            })
            .collect())
    }

    fn name(&self) -> &str {
        "robust"
    }
}

/// Mean/standard-deviation scaling, scored as the largest absolute z-score
/// in the row.
#[derive(Debug, Clone, Default)]
pub struct ZScoreScorer {
    scales: Option<Vec<ColumnScale>>,
}

impl ZScoreScorer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AnomalyScorer for ZScoreScorer {
    fn fit(&mut self, window: &FeatureMatrix) -> Result<()> {
        check_fit_input(window)?;

        let scales = (0..window.width())
            .map(|idx| {
                let column: Vec<f64> = window.column(idx).collect();
                let mean = column.iter().mean();
                let std_dev = column.iter().std_dev();
                ColumnScale {
                    center: if mean.is_finite() { mean } else { 0.0 },
                    scale: usable_scale(std_dev),
                }
            })
            .collect();

        debug!("Z-score scorer fitted on {} rows", window.len());
        self.scales = Some(scales);
        Ok(())
    }

    fn score(&self, window: &FeatureMatrix) -> Result<Vec<f64>> {
        let scales = check_score_input(&self.scales, window)?;

        Ok(window
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .zip(scales)
                    .map(|(v, s)| s.standardize(*v).abs())
                    .fold(0.0, f64::max)
            })
            .collect())
    }

    fn name(&self) -> &str {
        "zscore"
    }
}

pub fn build_scorer(config: &ScorerConfig) -> Box<dyn AnomalyScorer> {
    match config.backend {
        ScorerBackend::Robust => Box::new(RobustScorer::new()),
        ScorerBackend::Zscore => Box::new(ZScoreScorer::new()),
    }
}
