use crate::{Result, StormError};
use chrono::{DateTime, Duration, Utc};
use std::ops::Range;

/// Ordered `(timestamp, value)` pairs with strictly increasing timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries<T> {
    timestamps: Vec<DateTime<Utc>>,
    values: Vec<T>,
}

impl<T> Default for TimeSeries<T> {
    fn default() -> Self {
        Self {
            timestamps: Vec::new(),
            values: Vec::new(),
        }
    }
}

impl<T> TimeSeries<T> {
    pub fn new(timestamps: Vec<DateTime<Utc>>, values: Vec<T>) -> Result<Self> {
        if timestamps.len() != values.len() {
            return Err(StormError::InvalidSeries(format!(
                "{} timestamps for {} values",
                timestamps.len(),
                values.len()
            )));
        }

        if let Some(pos) = timestamps.windows(2).position(|w| w[0] >= w[1]) {
            return Err(StormError::InvalidSeries(format!(
                "timestamps not strictly increasing at {}",
                timestamps[pos + 1]
            )));
        }

        Ok(Self { timestamps, values })
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (DateTime<Utc>, T)>) -> Result<Self> {
        let (timestamps, values): (Vec<_>, Vec<_>) = pairs.into_iter().unzip();
        Self::new(timestamps, values)
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamps.first().copied()
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamps.last().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DateTime<Utc>, &T)> + '_ {
        self.timestamps.iter().copied().zip(self.values.iter())
    }

    /// Index of an exact timestamp.
    pub fn position(&self, ts: DateTime<Utc>) -> Option<usize> {
        self.timestamps.binary_search(&ts).ok()
    }

    /// Index of the latest entry at or before `ts`.
    pub fn position_at_or_before(&self, ts: DateTime<Utc>) -> Option<usize> {
        self.timestamps.partition_point(|t| *t <= ts).checked_sub(1)
    }

    /// Row range with timestamps in the half-open interval `(after, up_to]`.
    pub fn range_between(&self, after: DateTime<Utc>, up_to: DateTime<Utc>) -> Range<usize> {
        let start = self.timestamps.partition_point(|t| *t <= after);
        let end = self.timestamps.partition_point(|t| *t <= up_to);
        start..end.max(start)
    }

}

/// Step-function view of a series: each query timestamp inherits the most
/// recent value at or before it. With a hold, a value only covers
/// `[ts, ts + hold)`.
#[derive(Debug, Clone)]
pub struct StepSeries<T> {
    inner: TimeSeries<T>,
    hold: Option<Duration>,
}

impl<T> StepSeries<T> {
    pub fn new(inner: TimeSeries<T>) -> Self {
        Self { inner, hold: None }
    }

    pub fn with_hold(inner: TimeSeries<T>, hold: Duration) -> Self {
        Self {
            inner,
            hold: Some(hold),
        }
    }

    pub fn value_at(&self, ts: DateTime<Utc>) -> Option<&T> {
        let idx = self.inner.position_at_or_before(ts)?;
        if let Some(hold) = self.hold {
            if ts - self.inner.timestamps[idx] >= hold {
                return None;
            }
        }
        self.inner.values.get(idx)
    }
}
