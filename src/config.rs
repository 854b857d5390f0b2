use clap::Args;

use crate::error::{AppError, AppResult};

/// Weights, thresholds and defaults that drive snapshot scoring.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringConfig {
    pub attendance_weight: f64,
    pub academic_weight: f64,
    /// Scores below this are at-risk.
    pub at_risk_below: i32,
    /// Scores below this (and not at-risk) are a warning.
    pub warning_below: i32,
    pub window_days: i64,
    pub behavior_score: i32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            attendance_weight: 0.3,
            academic_weight: 0.7,
            at_risk_below: 40,
            warning_below: 60,
            window_days: 30,
            behavior_score: 80,
        }
    }
}

impl ScoringConfig {
    pub fn validate(self) -> AppResult<Self> {
        let weights = [self.attendance_weight, self.academic_weight];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(AppError::validation(
                "scoring weights must be finite and non-negative",
            ));
        }
        if (self.attendance_weight + self.academic_weight - 1.0).abs() > 1e-6 {
            return Err(AppError::validation("scoring weights must sum to 1.0"));
        }
        if !(0 <= self.at_risk_below
            && self.at_risk_below < self.warning_below
            && self.warning_below <= 100)
        {
            return Err(AppError::validation(
                "risk thresholds must satisfy 0 <= at-risk < warning <= 100",
            ));
        }
        if self.window_days <= 0 {
            return Err(AppError::validation("default window must be positive"));
        }
        if !(0..=100).contains(&self.behavior_score) {
            return Err(AppError::validation("behavior score must be within 0..=100"));
        }
        Ok(self)
    }
}

/// Command line / environment overrides for [`ScoringConfig`].
#[derive(Debug, Clone, Args)]
pub struct ScoringArgs {
    #[arg(long, env = "SCORING_ATTENDANCE_WEIGHT", default_value_t = 0.3)]
    pub attendance_weight: f64,
    #[arg(long, env = "SCORING_ACADEMIC_WEIGHT", default_value_t = 0.7)]
    pub academic_weight: f64,
    #[arg(long, env = "SCORING_AT_RISK_BELOW", default_value_t = 40)]
    pub at_risk_below: i32,
    #[arg(long, env = "SCORING_WARNING_BELOW", default_value_t = 60)]
    pub warning_below: i32,
    #[arg(long, env = "SCORING_WINDOW_DAYS", default_value_t = 30)]
    pub default_window_days: i64,
    #[arg(long, env = "SCORING_BEHAVIOR_SCORE", default_value_t = 80)]
    pub behavior_score: i32,
    /// Extra attempts for a failed storage call
    #[arg(long, env = "STORAGE_RETRIES", default_value_t = 1)]
    pub storage_retries: u32,
}

impl ScoringArgs {
    pub fn scoring(&self) -> AppResult<ScoringConfig> {
        ScoringConfig {
            attendance_weight: self.attendance_weight,
            academic_weight: self.academic_weight,
            at_risk_below: self.at_risk_below,
            warning_below: self.warning_below,
            window_days: self.default_window_days,
            behavior_score: self.behavior_score,
        }
        .validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ScoringConfig::default().validate().unwrap();
        assert_eq!(config.at_risk_below, 40);
        assert_eq!(config.warning_below, 60);
        assert_eq!(config.window_days, 30);
    }

    #[test]
    fn rejects_weights_that_do_not_sum_to_one() {
        let config = ScoringConfig {
            attendance_weight: 0.5,
            academic_weight: 0.7,
            ..ScoringConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let config = ScoringConfig {
            at_risk_below: 60,
            warning_below: 40,
            ..ScoringConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
