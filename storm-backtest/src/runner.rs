use crate::{AlertStateMachine, ThresholdCalibrator, WindowPair, WindowScheduler};
use chrono::{DateTime, Utc};
use storm_anomaly::{AnomalyScorer, FeatureMatrix, LeaderStateClassifier};
use storm_core::{
    Alert, BacktestConfig, FeatureFrame, LeaderState, PriceSeries, Result, ScoreRow, StepSeries,
    StormError, TimeSeries,
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct WalkForwardResult {
    pub symbol: String,
    pub scores: Vec<ScoreRow>,
    pub alerts: Vec<Alert>,
    pub threshold: Option<f64>,
    pub windows_scored: usize,
    pub windows_failed: usize,
}

/// Scores of one successfully processed window.
struct WindowScores {
    in_sample: Vec<f64>,
    rows: Vec<(DateTime<Utc>, f64, LeaderState)>,
}

/// Fits on coarse train windows, scores the following span, calibrates one
/// threshold and replays the fine grid through the alert state machine.
#[derive(Debug, Clone)]
pub struct WalkForwardRunner {
    config: BacktestConfig,
    features: Vec<String>,
}

impl WalkForwardRunner {
    pub fn new(config: BacktestConfig, features: Vec<String>) -> Self {
        Self { config, features }
    }

    pub fn run(
        &self,
        symbol: &str,
        frame: &FeatureFrame,
        prices: &PriceSeries,
        scorer: &mut dyn AnomalyScorer,
    ) -> Result<WalkForwardResult> {
        if frame.is_empty() {
            return Err(StormError::MissingData(format!("{}: empty feature series", symbol)));
        }
        if prices.is_empty() {
            return Err(StormError::MissingData(format!("{}: empty price series", symbol)));
        }

        info!(
            "Walk-forward for {} with {} scorer over {} coarse rows",
            symbol,
            scorer.name(),
            frame.len()
        );

        let mut history = Vec::new();
        let mut scored = Vec::new();
        let mut spans = Vec::new();
        let mut windows_scored = 0;
        let mut windows_failed = 0;

        let scheduler = WindowScheduler::from_config(frame.rows(), &self.config);
        for pair in scheduler.windows() {
            match self.score_window(frame, &pair, scorer) {
                Ok(window) => {
                    debug!(
                        "{}: window at {} trained on {} rows, scored {}",
                        symbol,
                        pair.cutoff,
                        pair.train.len(),
                        pair.score.len()
                    );
                    history.extend(window.in_sample);
                    scored.extend(window.rows);
                    spans.push((pair.cutoff, pair.cutoff + self.config.retrain_every()));
                    windows_scored += 1;
                }
                Err(e) => {
                    warn!("{}: skipping window at {}: {}", symbol, pair.cutoff, e);
                    windows_failed += 1;
                }
            }
        }

        if scored.is_empty() {
            warn!("{}: no window produced scores", symbol);
            return Ok(WalkForwardResult {
                symbol: symbol.to_string(),
                scores: Vec::new(),
                alerts: Vec::new(),
                threshold: None,
                windows_scored,
                windows_failed,
            });
        }

        let threshold = ThresholdCalibrator::from_config(&self.config).calibrate(&history);
        match threshold {
            Some(thr) => debug!("{}: threshold {:.6} from {} in-sample scores", symbol, thr, history.len()),
            None => warn!("{}: threshold undefined, no alerts possible", symbol),
        }

        let scores: Vec<ScoreRow> = scored
            .into_iter()
            .map(|(timestamp, anomaly_score, leader_state)| ScoreRow {
                timestamp,
                anomaly_score,
                leader_state,
                threshold,
            })
            .collect();

        let step = StepSeries::with_hold(
            TimeSeries::from_pairs(scores.iter().map(|row| (row.timestamp, row.clone())))?,
            self.config.coarse_interval(),
        );
        let above = Self::above_threshold(prices, &step, &spans, threshold)?;
        let alerts = AlertStateMachine::from_config(&self.config).alerts(symbol, &above, &step);

        info!(
            "{}: {} windows scored, {} failed, {} alerts",
            symbol,
            windows_scored,
            windows_failed,
            alerts.len()
        );

        Ok(WalkForwardResult {
            symbol: symbol.to_string(),
            scores,
            alerts,
            threshold,
            windows_scored,
            windows_failed,
        })
    }

    fn score_window(
        &self,
        frame: &FeatureFrame,
        pair: &WindowPair,
        scorer: &mut dyn AnomalyScorer,
    ) -> Result<WindowScores> {
        let train = FeatureMatrix::from_frame(frame, pair.train.clone(), &self.features);
        let target = FeatureMatrix::from_frame(frame, pair.score.clone(), &self.features);

        scorer.fit(&train)?;
        let in_sample = scorer.score(&train)?;
        let scores = scorer.score(&target)?;

        if scores.len() != pair.score.len() || in_sample.len() != pair.train.len() {
            return Err(StormError::ModelFit(format!(
                "{} returned {} scores for {} rows",
                scorer.name(),
                scores.len(),
                pair.score.len()
            )));
        }

        let rows = pair
            .score
            .clone()
            .zip(scores)
            .map(|(idx, score)| {
                let row = frame.row(idx);
                (
                    frame.timestamps()[idx],
                    score,
                    LeaderStateClassifier::classify_row(&row),
                )
            })
            .collect();

        Ok(WindowScores { in_sample, rows })
    }

    /// Forward-fills coarse scores onto the fine grid and compares them with
    /// the threshold. Only timestamps inside a scored `(cutoff, cutoff + C]`
    /// span can be above; undefined scores or threshold compare as below.
    fn above_threshold(
        prices: &PriceSeries,
        step: &StepSeries<ScoreRow>,
        spans: &[(DateTime<Utc>, DateTime<Utc>)],
        threshold: Option<f64>,
    ) -> Result<TimeSeries<bool>> {
        let in_span = |ts: DateTime<Utc>| {
            let idx = spans.partition_point(|(after, _)| *after < ts);
            idx > 0 && ts <= spans[idx - 1].1
        };

        let flags = prices
            .timestamps()
            .iter()
            .map(|ts| match (step.value_at(*ts), threshold) {
                (Some(row), Some(thr)) => in_span(*ts) && row.anomaly_score >= thr,
                _ => false,
            })
            .collect();

        TimeSeries::new(prices.timestamps().to_vec(), flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use storm_core::FeatureRow;

    struct FailingScorer;

    impl AnomalyScorer for FailingScorer {
        fn fit(&mut self, _window: &FeatureMatrix) -> Result<()> {
            Err(StormError::ModelFit("boom".to_string()))
        }

        fn score(&self, _window: &FeatureMatrix) -> Result<Vec<f64>> {
            Ok(Vec::new())
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn frame(rows: i64) -> FeatureFrame {
        let series = TimeSeries::new(
            (0..rows).map(|i| t0() + Duration::minutes(5 * i)).collect(),
            (0..rows).map(|i| FeatureRow::new(vec![Some(i as f64)])).collect(),
        )
        .unwrap();
        FeatureFrame::new(vec!["basis_now".to_string()], series).unwrap()
    }

    fn prices(minutes: i64) -> PriceSeries {
        TimeSeries::new(
            (0..minutes).map(|i| t0() + Duration::minutes(i)).collect(),
            vec![100.0; minutes as usize],
        )
        .unwrap()
    }

    #[test]
    fn test_empty_inputs_are_missing_data() {
        let runner = WalkForwardRunner::new(BacktestConfig::default(), vec!["basis_now".into()]);
        let empty = FeatureFrame::new(vec![], TimeSeries::default()).unwrap();

        let err = runner
            .run("BTCUSDT", &empty, &prices(10), &mut FailingScorer)
            .unwrap_err();
        assert!(err.is_missing_data());

        let err = runner
            .run("BTCUSDT", &frame(10), &TimeSeries::default(), &mut FailingScorer)
            .unwrap_err();
        assert!(err.is_missing_data());
    }

    #[test]
    fn test_failed_windows_are_skipped() {
        let runner = WalkForwardRunner::new(BacktestConfig::default(), vec!["basis_now".into()]);
        let result = runner
            .run("BTCUSDT", &frame(288), &prices(288 * 5), &mut FailingScorer)
            .unwrap();

        assert_eq!(result.windows_scored, 0);
        assert_eq!(result.windows_failed, 3);
        assert!(result.scores.is_empty());
        assert!(result.alerts.is_empty());
        assert_eq!(result.threshold, None);
    }

    fn score_row(minute: i64, anomaly_score: f64) -> ScoreRow {
        ScoreRow {
            timestamp: t0() + Duration::minutes(minute),
            anomaly_score,
            leader_state: LeaderState::Confluence,
            threshold: Some(1.0),
        }
    }

    fn step(rows: Vec<ScoreRow>) -> StepSeries<ScoreRow> {
        StepSeries::with_hold(
            TimeSeries::from_pairs(rows.into_iter().map(|row| (row.timestamp, row))).unwrap(),
            Duration::minutes(5),
        )
    }

    #[test]
    fn test_above_threshold_forward_fills() {
        let step = step(vec![score_row(5, 2.0), score_row(10, 0.5)]);
        let spans = [(t0(), t0() + Duration::minutes(20))];

        let above = WalkForwardRunner::above_threshold(&prices(12), &step, &spans, Some(1.0)).unwrap();
        let flags = above.values();
        assert!(!flags[4]);
        assert!(flags[5..10].iter().all(|f| *f));
        assert!(!flags[10] && !flags[11]);

        let undefined =
            WalkForwardRunner::above_threshold(&prices(12), &step, &spans, None).unwrap();
        assert!(undefined.values().iter().all(|f| !f));
    }

    #[test]
    fn test_above_threshold_stops_outside_scored_spans() {
        // one hot row at minute 10, last row of the span (0, 10]
        let step = step(vec![score_row(5, 0.5), score_row(10, 2.0)]);
        let spans = [(t0(), t0() + Duration::minutes(10))];

        let above = WalkForwardRunner::above_threshold(&prices(30), &step, &spans, Some(1.0)).unwrap();
        let hot: Vec<_> = above
            .iter()
            .filter(|(_, flag)| **flag)
            .map(|(ts, _)| ts)
            .collect();
        assert_eq!(hot, vec![t0() + Duration::minutes(10)]);

        // without the span cut the hold still ends one coarse bar later
        let spans = [(t0(), t0() + Duration::minutes(60))];
        let above = WalkForwardRunner::above_threshold(&prices(30), &step, &spans, Some(1.0)).unwrap();
        assert_eq!(above.values().iter().filter(|f| **f).count(), 5);
        assert!(!above.values()[15]);
    }
}
