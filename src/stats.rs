//! Rolling and one-shot sample statistics.

use std::collections::VecDeque;

/// Bounded window with online mean/variance (Welford, with removal).
#[derive(Debug, Clone)]
pub struct RollingWindow {
    max_size: usize,
    values: VecDeque<f64>,
    n: u64,
    mean: f64,
    m2: f64,
}

impl RollingWindow {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size: max_size.max(1),
            values: VecDeque::with_capacity(max_size.max(1)),
            n: 0,
            mean: 0.0,
            m2: 0.0,
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.values.len() >= self.max_size {
            if let Some(old) = self.values.pop_front() {
                self.remove_from_stats(old);
            }
        }
        self.values.push_back(value);
        self.add_to_stats(value);
    }

    fn add_to_stats(&mut self, value: f64) {
        self.n += 1;
        let delta = value - self.mean;
        self.mean += delta / self.n as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
    }

    fn remove_from_stats(&mut self, value: f64) {
        if self.n <= 1 {
            self.n = 0;
            self.mean = 0.0;
            self.m2 = 0.0;
            return;
        }
        let delta = value - self.mean;
        self.mean = (self.mean * self.n as f64 - value) / (self.n as f64 - 1.0);
        let delta2 = value - self.mean;
        self.m2 -= delta * delta2;
        self.n -= 1;
        // Clamp against float cancellation.
        if self.m2 < 0.0 {
            self.m2 = 0.0;
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.values.len() >= self.max_size
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Sample variance (n-1 denominator).
    pub fn variance(&self) -> f64 {
        if self.n > 1 {
            self.m2 / (self.n as f64 - 1.0)
        } else {
            0.0
        }
    }

    pub fn std(&self) -> f64 {
        self.variance().sqrt()
    }
}

/// Full-recompute mean and sample variance. Window statistics use this
/// rather than patching running values, so a tick can never drift from
/// the snapshot it was derived from.
pub fn sample_stats(values: &[f64]) -> (f64, f64) {
    let n = values.len();
    if n == 0 {
        return (0.0, 0.0);
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    if n < 2 {
        return (mean, 0.0);
    }
    let m2: f64 = values.iter().map(|v| (v - mean) * (v - mean)).sum();
    (mean, m2 / (n as f64 - 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolling_matches_sample_stats() {
        let mut w = RollingWindow::new(10);
        let values = [4.0, 7.0, 13.0, 16.0];
        for v in values {
            w.push(v);
        }
        let (mean, var) = sample_stats(&values);
        assert!((w.mean() - mean).abs() < 1e-9);
        assert!((w.variance() - var).abs() < 1e-9);
    }

    #[test]
    fn test_rolling_eviction_drops_old_values() {
        let mut w = RollingWindow::new(3);
        for v in [100.0, 1.0, 2.0, 3.0] {
            w.push(v);
        }
        // The 100.0 is gone; stats are for [1, 2, 3].
        assert_eq!(w.len(), 3);
        assert!((w.mean() - 2.0).abs() < 1e-9);
        assert!((w.variance() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_sample_stats_edge_cases() {
        assert_eq!(sample_stats(&[]), (0.0, 0.0));
        assert_eq!(sample_stats(&[5.0]), (5.0, 0.0));
    }

    #[test]
    fn test_variance_never_negative_after_churn() {
        let mut w = RollingWindow::new(5);
        for i in 0..1_000 {
            w.push((i % 7) as f64 * 1e6);
            assert!(w.variance() >= 0.0);
        }
    }
}
