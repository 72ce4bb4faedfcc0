//! Score arithmetic for readiness categories.
//!
//! The overall score is an unweighted mean of category scores. Weighting is
//! out of scope; every category counts the same.

use crate::core::types::{CheckStatus, Recommendation};

pub const READY_THRESHOLD: f64 = 90.0;
pub const CONDITIONAL_THRESHOLD: f64 = 70.0;

/// Arithmetic mean, `None` for an empty slice.
pub fn mean(scores: &[f64]) -> Option<f64> {
    if scores.is_empty() {
        return None;
    }
    Some(scores.iter().sum::<f64>() / scores.len() as f64)
}

pub fn recommendation_for(overall: f64) -> Recommendation {
    if overall >= READY_THRESHOLD {
        Recommendation::Ready
    } else if overall >= CONDITIONAL_THRESHOLD {
        Recommendation::Conditional
    } else {
        Recommendation::NotReady
    }
}

/// Status used by the built-in checks: pass at 90+, warn at 50+.
pub fn status_for_score(score: f64) -> CheckStatus {
    if score >= 90.0 {
        CheckStatus::Pass
    } else if score >= 50.0 {
        CheckStatus::Warn
    } else {
        CheckStatus::Fail
    }
}

/// `passed / total` as a 0..=100 score; `None` when nothing was checked.
pub fn ratio_score(passed: usize, total: usize) -> Option<f64> {
    if total == 0 {
        return None;
    }
    Some(passed as f64 / total as f64 * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_of_four_perfect_and_one_zero_is_eighty() {
        let overall = mean(&[100.0, 100.0, 100.0, 100.0, 0.0]).expect("mean");
        assert_eq!(overall, 80.0);
        assert_eq!(recommendation_for(overall), Recommendation::Conditional);
    }

    #[test]
    fn recommendation_thresholds_are_inclusive() {
        assert_eq!(recommendation_for(90.0), Recommendation::Ready);
        assert_eq!(recommendation_for(89.99), Recommendation::Conditional);
        assert_eq!(recommendation_for(70.0), Recommendation::Conditional);
        assert_eq!(recommendation_for(69.9), Recommendation::NotReady);
    }

    #[test]
    fn empty_inputs_have_no_score() {
        assert_eq!(mean(&[]), None);
        assert_eq!(ratio_score(0, 0), None);
        assert_eq!(ratio_score(1, 4), Some(25.0));
    }

    #[test]
    fn status_bands() {
        assert_eq!(status_for_score(100.0), CheckStatus::Pass);
        assert_eq!(status_for_score(66.0), CheckStatus::Warn);
        assert_eq!(status_for_score(10.0), CheckStatus::Fail);
    }
}
