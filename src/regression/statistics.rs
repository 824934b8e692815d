// Baseline statistics over a window of prior values
//
// Uses statrs for f64 descriptive statistics. The mean is a running mean, so a
// window of values near f64::MAX does not overflow to infinity.

use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Median, Statistics};

/// How a baseline window collapses into one comparison value
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum BaselineStat {
    /// Rolling mean of the window (a window of 1 is the previous value)
    #[default]
    Mean,
    /// Median of the window, robust to a single noisy run
    Median,
}

impl BaselineStat {
    /// Collapse `values`; `None` for an empty window
    pub fn apply(self, values: &[f64]) -> Option<f64> {
        match self {
            BaselineStat::Mean => mean(values),
            BaselineStat::Median => median(values),
        }
    }
}

/// Arithmetic mean; `None` for an empty slice
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().mean())
}

/// Median of the window; `None` for an empty slice
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(Data::new(values.to_vec()).median())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_basic() {
        assert_eq!(mean(&[2.0, 4.0, 6.0, 8.0]), Some(5.0));
        assert_eq!(mean(&[170.0]), Some(170.0));
        assert_eq!(mean(&[]), None);
    }

    fn assert_close(actual: Option<f64>, expected: f64) {
        let actual = actual.unwrap();
        assert!(
            (actual - expected).abs() <= expected.abs() * 1e-12,
            "{actual} != {expected}"
        );
    }

    #[test]
    fn test_median_odd_length() {
        assert_close(median(&[9.0, 1.0, 5.0, 3.0, 7.0]), 5.0);
    }

    #[test]
    fn test_median_even_length() {
        assert_close(median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn test_stat_apply() {
        let window = [10.0, 10.0, 100.0];
        assert_eq!(BaselineStat::Mean.apply(&window), Some(40.0));
        assert_close(BaselineStat::Median.apply(&window), 10.0);
        assert_eq!(BaselineStat::Median.apply(&[]), None);
    }

    #[test]
    fn test_large_magnitude_window_stays_finite() {
        let window = [1e308, 1e308];
        assert_eq!(mean(&window), Some(1e308));

        let window = [1.5e308, 1.7e308, 1.6e308];
        let baseline = mean(&window).unwrap();
        assert!(baseline.is_finite());
        assert_close(Some(baseline), 1.6e308);
        assert_close(median(&window), 1.6e308);
    }
}
