use std::collections::VecDeque;

/// Quantile with linear interpolation between order statistics. NaN inputs
/// are ignored; `None` when nothing is left or `q` is outside `[0, 1]`.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if !(0.0..=1.0).contains(&q) {
        return None;
    }

    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);

    let h = (sorted.len() - 1) as f64 * q;
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    Some(sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo]))
}

pub fn median(values: &[f64]) -> Option<f64> {
    quantile(values, 0.5)
}

/// Fixed-size window with a running sum.
#[derive(Debug, Clone)]
pub struct RollingSum {
    data: VecDeque<f64>,
    max_size: usize,
    sum: f64,
}

impl RollingSum {
    pub fn new(max_size: usize) -> Self {
        Self {
            data: VecDeque::with_capacity(max_size),
            max_size,
            sum: 0.0,
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.data.len() >= self.max_size {
            if let Some(old) = self.data.pop_front() {
                self.sum -= old;
            }
        }

        self.sum += value;
        self.data.push_back(value);
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn is_full(&self) -> bool {
        self.data.len() == self.max_size
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
