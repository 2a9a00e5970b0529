use storm_anomaly::stats;
use storm_core::BacktestConfig;

/// Turns the in-sample score history into one decision threshold per run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdCalibrator {
    window_rows: usize,
    quantile: f64,
}

impl ThresholdCalibrator {
    pub fn new(window_rows: usize, quantile: f64) -> Self {
        Self {
            window_rows,
            quantile,
        }
    }

    pub fn from_config(config: &BacktestConfig) -> Self {
        Self::new(config.threshold_window_rows(), config.score_qtile)
    }

    /// `q`-quantile of the most recent `W` scores. `None` means no threshold
    /// is in force and nothing can alert.
    pub fn calibrate(&self, history: &[f64]) -> Option<f64> {
        if history.is_empty() || self.window_rows == 0 {
            return None;
        }

        let start = history.len().saturating_sub(self.window_rows);
        stats::quantile(&history[start..], self.quantile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_history_is_undefined() {
        let calibrator = ThresholdCalibrator::new(100, 0.98);
        assert_eq!(calibrator.calibrate(&[]), None);
    }

    #[test]
    fn test_uses_only_recent_window() {
        let calibrator = ThresholdCalibrator::new(3, 0.5);
        // the old 100.0 has rolled out of the window
        assert_eq!(calibrator.calibrate(&[100.0, 1.0, 2.0, 3.0]), Some(2.0));
        // shorter history than the window uses everything
        assert_eq!(calibrator.calibrate(&[4.0, 2.0]), Some(3.0));
    }

    #[test]
    fn test_threshold_monotone_in_quantile() {
        let history: Vec<f64> = (0..500).map(|i| ((i * 37) % 101) as f64 / 7.0).collect();

        let mut last = f64::MIN;
        for q in [0.9, 0.92, 0.95, 0.97, 0.98, 0.99] {
            let thr = ThresholdCalibrator::new(288, q).calibrate(&history).unwrap();
            assert!(thr >= last);
            last = thr;
        }
    }

    #[test]
    fn test_from_config() {
        let calibrator = ThresholdCalibrator::from_config(&BacktestConfig::default());
        assert_eq!(calibrator.window_rows, 14 * 24 * 12);
        assert_eq!(calibrator.quantile, 0.98);
    }
}
