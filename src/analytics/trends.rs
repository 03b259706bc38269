//! Trend classification

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Improving,
    Stable,
    Degrading,
}

impl fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrendDirection::Improving => write!(f, "improving"),
            TrendDirection::Stable => write!(f, "stable"),
            TrendDirection::Degrading => write!(f, "degrading"),
        }
    }
}

/// How the delta between the two ends of the window is measured
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaMode {
    /// recent - baseline; for fractions such as success rate
    Absolute,
    /// (recent - baseline) / baseline; for durations
    Relative,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    pub metric: String,
    pub direction: TrendDirection,
    /// Mean of the oldest runs in the window
    pub baseline: f64,
    /// Mean of the most recent runs
    pub recent: f64,
    pub delta: f64,
}

/// Compare the most recent `sample` values with the oldest `sample`
///
/// `values` are oldest first. With fewer than `2 * sample` values both ends
/// shrink to half the window; fewer than two values is always stable.
pub fn classify(
    metric: &str,
    values: &[f64],
    sample: usize,
    threshold: f64,
    mode: DeltaMode,
    higher_is_better: bool,
) -> Trend {
    let n = sample.min(values.len() / 2);
    if n == 0 {
        let last = values.last().copied().unwrap_or(0.0);
        return Trend {
            metric: metric.to_string(),
            direction: TrendDirection::Stable,
            baseline: last,
            recent: last,
            delta: 0.0,
        };
    }

    let mean = |xs: &[f64]| xs.iter().sum::<f64>() / xs.len() as f64;
    let baseline = mean(&values[..n]);
    let recent = mean(&values[values.len() - n..]);
    let delta = match mode {
        DeltaMode::Absolute => recent - baseline,
        DeltaMode::Relative if baseline.abs() > f64::EPSILON => (recent - baseline) / baseline,
        DeltaMode::Relative if recent.abs() > f64::EPSILON => 1.0,
        DeltaMode::Relative => 0.0,
    };

    let signed = if higher_is_better { delta } else { -delta };
    let direction = if signed > threshold {
        TrendDirection::Improving
    } else if signed < -threshold {
        TrendDirection::Degrading
    } else {
        TrendDirection::Stable
    };

    Trend {
        metric: metric.to_string(),
        direction,
        baseline,
        recent,
        delta,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn success(values: &[f64]) -> TrendDirection {
        classify("success_rate", values, 5, 0.1, DeltaMode::Absolute, true).direction
    }

    #[test]
    fn test_success_rate_trend() {
        let improving = [0.5, 0.5, 0.6, 0.5, 0.5, 0.7, 0.9, 0.9, 1.0, 0.9, 0.9];
        assert_eq!(success(&improving), TrendDirection::Improving);

        let degrading: Vec<f64> = improving.iter().rev().copied().collect();
        assert_eq!(success(&degrading), TrendDirection::Degrading);

        let flat = [0.9; 10];
        assert_eq!(success(&flat), TrendDirection::Stable);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        // delta of exactly 0.1 stays stable
        let values = [0.5, 0.5, 0.5, 0.5, 0.5, 0.6, 0.6, 0.6, 0.6, 0.6];
        let trend = classify("success_rate", &values, 5, 0.1 + 1e-9, DeltaMode::Absolute, true);
        assert_eq!(trend.direction, TrendDirection::Stable);
    }

    #[test]
    fn test_configurable_window() {
        let values = [0.2, 0.9, 0.9, 0.9, 0.9, 0.9];
        // one run per end sees the jump
        assert_eq!(
            classify("s", &values, 1, 0.1, DeltaMode::Absolute, true).direction,
            TrendDirection::Improving
        );
        // three per end dilutes it below a larger threshold
        assert_eq!(
            classify("s", &values, 3, 0.3, DeltaMode::Absolute, true).direction,
            TrendDirection::Stable
        );
    }

    #[test]
    fn test_duration_lower_is_better() {
        let values = [100.0, 100.0, 100.0, 150.0, 160.0, 170.0];
        let trend = classify("duration", &values, 3, 0.1, DeltaMode::Relative, false);
        assert_eq!(trend.direction, TrendDirection::Degrading);
        assert!((trend.delta - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_short_history_is_stable() {
        assert_eq!(success(&[]), TrendDirection::Stable);
        assert_eq!(success(&[0.1]), TrendDirection::Stable);
    }
}
