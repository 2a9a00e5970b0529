use chrono::Duration;
use storm_core::{Alert, BacktestConfig, ScoreRow, StepSeries, TimeSeries};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertState {
    Below,
    PreAlert,
    Confirmed,
}

/// Per-timestamp result of both passes. A timestamp can trigger a pre-alert
/// and confirm an earlier one at the same time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlertTrace {
    pub pre_alert: Vec<bool>,
    pub confirmed: Vec<bool>,
}

impl AlertTrace {
    pub fn state(&self, index: usize) -> AlertState {
        if self.confirmed.get(index).copied().unwrap_or(false) {
            AlertState::Confirmed
        } else if self.pre_alert.get(index).copied().unwrap_or(false) {
            AlertState::PreAlert
        } else {
            AlertState::Below
        }
    }

    pub fn pre_alert_indices(&self) -> impl Iterator<Item = usize> + '_ {
        flagged(&self.pre_alert)
    }

    pub fn confirmed_indices(&self) -> impl Iterator<Item = usize> + '_ {
        flagged(&self.confirmed)
    }
}

fn flagged(flags: &[bool]) -> impl Iterator<Item = usize> + '_ {
    flags.iter().enumerate().filter(|(_, f)| **f).map(|(i, _)| i)
}

/// Pre-alert → confirm protocol over a fine-grid "score above threshold"
/// series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertStateMachine {
    consecutive: usize,
    fine_interval: Duration,
    confirm_offset: Duration,
}

impl AlertStateMachine {
    pub fn new(consecutive: usize, fine_interval: Duration, confirm_offset: Duration) -> Self {
        Self {
            consecutive: consecutive.max(1),
            fine_interval,
            confirm_offset,
        }
    }

    pub fn from_config(config: &BacktestConfig) -> Self {
        Self::new(
            config.prealert_consecutive_mins,
            config.fine_interval(),
            config.confirm_offset(),
        )
    }

    pub fn run(&self, above: &TimeSeries<bool>) -> AlertTrace {
        let timestamps = above.timestamps();
        let flags = above.values();

        // Pass 1: a run only grows across exactly one fine interval, so a
        // missing fine timestamp breaks it.
        let mut pre_alert = vec![false; flags.len()];
        let mut run = 0usize;
        for i in 0..flags.len() {
            run = if !flags[i] {
                0
            } else if i > 0 && run > 0 && timestamps[i] - timestamps[i - 1] == self.fine_interval {
                run + 1
            } else {
                1
            };
            pre_alert[i] = run >= self.consecutive;
        }

        // Pass 2: re-check each pre-alert at its exact confirmation timestamp.
        let mut confirmed = vec![false; flags.len()];
        for i in flagged(&pre_alert) {
            let target = timestamps[i].checked_add_signed(self.confirm_offset);
            if let Some(j) = target.and_then(|t| above.position(t)) {
                if flags[j] {
                    confirmed[j] = true;
                }
            }
        }

        AlertTrace {
            pre_alert,
            confirmed,
        }
    }

    /// Confirmed alerts, in timestamp order, carrying the coarse values in
    /// force at each confirmation timestamp.
    pub fn alerts(
        &self,
        symbol: &str,
        above: &TimeSeries<bool>,
        scores: &StepSeries<ScoreRow>,
    ) -> Vec<Alert> {
        let trace = self.run(above);
        debug!(
            "{}: {} pre-alerts, {} confirmations",
            symbol,
            trace.pre_alert_indices().count(),
            trace.confirmed_indices().count()
        );

        trace
            .confirmed_indices()
            .filter_map(|idx| {
                let timestamp = above.timestamps()[idx];
                let row = scores.value_at(timestamp)?;
                Some(Alert {
                    timestamp,
                    symbol: symbol.to_string(),
                    anomaly_score: row.anomaly_score,
                    threshold: row.threshold?,
                    leader_state: row.leader_state,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use storm_core::LeaderState;

    fn ts(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn series(minutes: &[i64], flags: &[bool]) -> TimeSeries<bool> {
        TimeSeries::new(minutes.iter().map(|m| ts(*m)).collect(), flags.to_vec()).unwrap()
    }

    fn minutes(n: i64) -> Vec<i64> {
        (0..n).collect()
    }

    fn machine(k: usize, bars: i32) -> AlertStateMachine {
        AlertStateMachine::new(k, Duration::minutes(1), Duration::minutes(5) * bars)
    }

    #[test]
    fn test_persistence_requires_k_consecutive() {
        let above = series(&minutes(6), &[true, true, false, true, true, true]);
        let trace = machine(2, 1).run(&above);

        assert_eq!(trace.pre_alert_indices().collect::<Vec<_>>(), vec![1, 4, 5]);
        assert_eq!(trace.state(0), AlertState::Below);
        assert_eq!(trace.state(1), AlertState::PreAlert);
        assert_eq!(trace.state(2), AlertState::Below);
    }

    #[test]
    fn test_gap_breaks_run() {
        // minute 2 is absent from the grid
        let above = series(&[0, 1, 3, 4], &[true, false, true, true]);
        let trace = machine(2, 1).run(&above);
        assert_eq!(trace.pre_alert_indices().collect::<Vec<_>>(), vec![3]);

        let above = series(&[0, 2], &[true, true]);
        let trace = machine(2, 1).run(&above);
        assert_eq!(trace.pre_alert_indices().count(), 0);
    }

    #[test]
    fn test_confirmation_at_exact_offset() {
        let mut flags = vec![false; 12];
        flags[1] = true;
        flags[2] = true;
        flags[7] = true;
        let above = series(&minutes(12), &flags);

        let trace = machine(2, 1).run(&above);
        assert_eq!(trace.pre_alert_indices().collect::<Vec<_>>(), vec![2]);
        assert_eq!(trace.confirmed_indices().collect::<Vec<_>>(), vec![7]);
        assert_eq!(trace.state(7), AlertState::Confirmed);
    }

    #[test]
    fn test_no_confirmation_when_dropped_below() {
        let mut flags = vec![true; 10];
        flags[6] = false;
        let above = series(&minutes(10), &flags);

        let trace = machine(2, 1).run(&above);
        // pre-alert at 1 would confirm at 6, which is below threshold
        assert!(!trace.confirmed[6]);
        assert_eq!(trace.confirmed_indices().collect::<Vec<_>>(), vec![7, 8, 9]);
    }

    #[test]
    fn test_missing_target_timestamp_never_confirms() {
        // pre-alert at minute 1; minute 6 does not exist
        let above = series(&[0, 1, 2, 3, 4, 5, 7, 8], &[true; 8]);
        let trace = machine(2, 1).run(&above);
        assert!(!trace.confirmed_indices().any(|i| above.timestamps()[i] == ts(6)));

        // series ends before any target
        let above = series(&minutes(4), &[true; 4]);
        assert_eq!(machine(2, 1).run(&above).confirmed_indices().count(), 0);
    }

    #[test]
    fn test_confirm_bars_scale_offset() {
        let above = series(&minutes(20), &[true; 20]);
        let trace = machine(2, 2).run(&above);
        // first pre-alert at 1 confirms at 11
        assert_eq!(trace.confirmed_indices().next(), Some(11));
    }

    #[test]
    fn test_offset_past_end_of_time_never_confirms() {
        let above = series(&minutes(10), &[true; 10]);
        let machine = AlertStateMachine::new(2, Duration::minutes(1), Duration::MAX);
        let trace = machine.run(&above);
        assert_eq!(trace.pre_alert_indices().count(), 9);
        assert_eq!(trace.confirmed_indices().count(), 0);
    }

    #[test]
    fn test_alerts_join_coarse_values() {
        let above = series(&minutes(12), &[true; 12]);
        let scores = StepSeries::new(
            TimeSeries::new(
                vec![ts(0), ts(5), ts(10)],
                vec![
                    ScoreRow {
                        timestamp: ts(0),
                        anomaly_score: 1.0,
                        leader_state: LeaderState::Confluence,
                        threshold: Some(0.5),
                    },
                    ScoreRow {
                        timestamp: ts(5),
                        anomaly_score: 2.0,
                        leader_state: LeaderState::PerpLed,
                        threshold: Some(0.5),
                    },
                    ScoreRow {
                        timestamp: ts(10),
                        anomaly_score: 3.0,
                        leader_state: LeaderState::SpotLed,
                        threshold: Some(0.5),
                    },
                ],
            )
            .unwrap(),
        );

        let alerts = machine(2, 1).alerts("BTCUSDT", &above, &scores);
        let times: Vec<_> = alerts.iter().map(|a| a.timestamp).collect();
        assert_eq!(times, (6..12).map(ts).collect::<Vec<_>>());
        assert!(times.windows(2).all(|w| w[0] < w[1]));

        assert_eq!(alerts[0].anomaly_score, 2.0);
        assert_eq!(alerts[0].leader_state, LeaderState::PerpLed);
        assert_eq!(alerts[4].anomaly_score, 3.0);
        assert_eq!(alerts[4].leader_state, LeaderState::SpotLed);
        assert!(alerts.iter().all(|a| a.threshold == 0.5 && a.symbol == "BTCUSDT"));
    }

    #[test]
    fn test_from_config() {
        let machine = AlertStateMachine::from_config(&BacktestConfig::default());
        assert_eq!(machine.consecutive, 2);
        assert_eq!(machine.fine_interval, Duration::minutes(1));
        assert_eq!(machine.confirm_offset, Duration::minutes(5));
    }
}
