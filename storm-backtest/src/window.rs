use chrono::{DateTime, Duration, Utc};
use std::ops::Range;
use storm_core::{BacktestConfig, TimeSeries};

/// One retrain step: rows in `(cutoff - train_window, cutoff]` train the
/// model, rows in `(cutoff, cutoff + retrain_every]` are scored by it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowPair {
    pub cutoff: DateTime<Utc>,
    pub train: Range<usize>,
    pub score: Range<usize>,
}

/// Walk-forward (train, score) partitioning on a wall-clock cadence.
#[derive(Debug, Clone, Copy)]
pub struct WindowScheduler<'a, T> {
    series: &'a TimeSeries<T>,
    train_window: Duration,
    retrain_every: Duration,
}

impl<'a, T> WindowScheduler<'a, T> {
    pub fn new(series: &'a TimeSeries<T>, train_window: Duration, retrain_every: Duration) -> Self {
        Self {
            series,
            train_window,
            retrain_every,
        }
    }

    pub fn from_config(series: &'a TimeSeries<T>, config: &BacktestConfig) -> Self {
        Self::new(series, config.train_window(), config.retrain_every())
    }

    /// A fresh pass over the series; calling it again restarts from the
    /// first timestamp.
    pub fn windows(&self) -> Windows<'a, T> {
        let cursor = if self.retrain_every > Duration::zero() {
            self.series.first_timestamp()
        } else {
            None
        };

        Windows {
            series: self.series,
            train_window: self.train_window,
            retrain_every: self.retrain_every,
            cursor,
            end: self.series.last_timestamp(),
        }
    }
}

pub struct Windows<'a, T> {
    series: &'a TimeSeries<T>,
    train_window: Duration,
    retrain_every: Duration,
    cursor: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

impl<'a, T> Iterator for Windows<'a, T> {
    type Item = WindowPair;

    fn next(&mut self) -> Option<Self::Item> {
        let end = self.end?;

        loop {
            let cur = self.cursor?;
            if cur > end {
                self.cursor = None;
                return None;
            }

            let score_end = cur + self.retrain_every;
            self.cursor = Some(score_end);

            let train = self.series.range_between(cur - self.train_window, cur);
            let score = self.series.range_between(cur, score_end);

            if !train.is_empty() && !score.is_empty() {
                return Some(WindowPair {
                    cutoff: cur,
                    train,
                    score,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn grid(minutes: &[i64]) -> TimeSeries<()> {
        TimeSeries::new(
            minutes.iter().map(|m| t0() + Duration::minutes(*m)).collect(),
            vec![(); minutes.len()],
        )
        .unwrap()
    }

    fn regular(count: i64, step: i64) -> TimeSeries<()> {
        grid(&(0..count).map(|i| i * step).collect::<Vec<_>>())
    }

    #[test]
    fn test_windows_never_leak() {
        // three days of 5 minute bars, 1 day train, 8 hour cadence
        let series = regular(3 * 288, 5);
        let scheduler = WindowScheduler::new(&series, Duration::days(1), Duration::hours(8));

        let pairs: Vec<_> = scheduler.windows().collect();
        assert!(!pairs.is_empty());

        for pair in &pairs {
            let ts = series.timestamps();
            let train_max = ts[pair.train.end - 1];
            let score_min = ts[pair.score.start];
            assert!(train_max < score_min);
            assert!(train_max <= pair.cutoff);
            assert!(ts[pair.train.start] > pair.cutoff - Duration::days(1));
            assert!(ts[pair.score.end - 1] <= pair.cutoff + Duration::hours(8));
        }
    }

    #[test]
    fn test_cursor_advances_by_cadence() {
        let series = regular(3 * 288, 5);
        let scheduler = WindowScheduler::new(&series, Duration::days(1), Duration::hours(8));

        let cutoffs: Vec<_> = scheduler.windows().map(|p| p.cutoff).collect();
        // last row is at 71:55, so cutoffs run 0h..64h
        assert_eq!(cutoffs.len(), 9);
        for (i, cutoff) in cutoffs.iter().enumerate() {
            assert_eq!(*cutoff, t0() + Duration::hours(8 * i as i64));
        }

        // first window trains on the single first row and scores (0h, 8h]
        let first = scheduler.windows().next().unwrap();
        assert_eq!(first.train, 0..1);
        assert_eq!(first.score, 1..97);
    }

    #[test]
    fn test_windows_are_restartable() {
        let series = regular(288, 5);
        let scheduler = WindowScheduler::new(&series, Duration::days(1), Duration::hours(8));

        let first: Vec<_> = scheduler.windows().collect();
        let second: Vec<_> = scheduler.windows().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_sparse_data_skips_empty_windows() {
        // a 20 hour hole: the cutoff at 8h has nothing to score until 24h
        let series = grid(&[0, 5, 10, 24 * 60, 24 * 60 + 5]);
        let scheduler = WindowScheduler::new(&series, Duration::days(2), Duration::hours(8));

        let pairs: Vec<_> = scheduler.windows().collect();
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[0].cutoff, t0());
        assert_eq!(pairs[0].score, 1..3);
        assert_eq!(pairs[1].cutoff, t0() + Duration::hours(16));
        assert_eq!(pairs[1].train, 0..3);
        assert_eq!(pairs[1].score, 3..4);
        assert_eq!(pairs[2].cutoff, t0() + Duration::hours(24));
        assert_eq!(pairs[2].train, 0..4);
        assert_eq!(pairs[2].score, 4..5);
    }

    #[test]
    fn test_empty_and_single_row_series() {
        let empty = grid(&[]);
        let scheduler = WindowScheduler::new(&empty, Duration::days(1), Duration::hours(8));
        assert_eq!(scheduler.windows().count(), 0);

        let single = grid(&[0]);
        let scheduler = WindowScheduler::new(&single, Duration::days(1), Duration::hours(8));
        assert_eq!(scheduler.windows().count(), 0);
    }

    #[test]
    fn test_from_config_uses_days_and_hours() {
        let series = regular(10, 5);
        let config = BacktestConfig::default();
        let scheduler = WindowScheduler::from_config(&series, &config);
        assert_eq!(scheduler.train_window, Duration::days(30));
        assert_eq!(scheduler.retrain_every, Duration::hours(8));
    }
}
