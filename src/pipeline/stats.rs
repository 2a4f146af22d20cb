//! Online mean / standard-error accumulator (Welford's method)
//!
//! Samples are never retained: each `accumulate()` updates the running mean
//! and the sum of squared deviations in O(1).

/// Running statistics for one window or episode
///
/// `variance` is the sample variance (`m2 / (n - 1)`), `error` the standard
/// error of the mean (`sqrt(variance / n)`). Both are `0.0` until two
/// samples have been seen.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecursiveStats {
    count: u64,
    mean: f64,
    /// Sum of squared deviations from the running mean
    m2: f64,
    variance: f64,
    error: f64,
}

impl RecursiveStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one sample into the running statistics
    pub fn accumulate(&mut self, x: f64) {
        self.count += 1;
        let n = self.count as f64;

        let delta = x - self.mean;
        self.mean += delta / n;
        self.m2 += delta * (x - self.mean);

        if self.count > 1 {
            self.variance = self.m2 / (n - 1.0);
            self.error = (self.variance / n).sqrt();
        }
    }

    /// `(count, mean, error)` without mutating anything
    pub fn snapshot(&self) -> (u64, f64, f64) {
        (self.count, self.mean, self.error)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn variance(&self) -> f64 {
        self.variance
    }

    pub fn error(&self) -> f64 {
        self.error
    }
}
