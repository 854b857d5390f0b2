use chrono::{Duration, NaiveDate, Utc};

use crate::config::ScoringConfig;
use crate::error::{AppError, AppResult};
use crate::models::{AssessmentMark, AttendanceRecord, ProgressSnapshot, RiskLevel};

/// Present days over recorded days, as a percentage. No records means 0.
pub fn attendance_rate(records: &[AttendanceRecord]) -> f64 {
    if records.is_empty() {
        return 0.0;
    }
    let present = records.iter().filter(|record| record.present).count();
    clamp_percent(present as f64 / records.len() as f64 * 100.0)
}

/// Sum of marks obtained over sum of marks available, as a percentage.
///
/// Rows with a non-positive total carry no information and are skipped.
pub fn academic_performance(marks: &[AssessmentMark]) -> f64 {
    let (obtained, total) = marks
        .iter()
        .filter(|mark| mark.total_marks > 0.0)
        .fold((0.0, 0.0), |(obtained, total), mark| {
            (obtained + mark.marks_obtained, total + mark.total_marks)
        });

    if total <= 0.0 {
        0.0
    } else {
        clamp_percent(obtained / total * 100.0)
    }
}

pub fn overall_score(
    attendance_percentage: i32,
    academic_performance: i32,
    config: &ScoringConfig,
) -> i32 {
    let weighted = attendance_percentage as f64 * config.attendance_weight
        + academic_performance as f64 * config.academic_weight;
    round_percent(weighted)
}

pub fn classify(overall_score: i32, config: &ScoringConfig) -> RiskLevel {
    if overall_score < config.at_risk_below {
        RiskLevel::AtRisk
    } else if overall_score < config.warning_below {
        RiskLevel::Warning
    } else {
        RiskLevel::Safe
    }
}

/// Builds the snapshot for `student_id` on `as_of` from rows already limited to the window.
pub fn score_window(
    student_id: &str,
    as_of: NaiveDate,
    attendance: &[AttendanceRecord],
    marks: &[AssessmentMark],
    config: &ScoringConfig,
) -> ProgressSnapshot {
    // Components are rounded before weighting so the stored fields reproduce the overall score.
    let attendance_percentage = round_percent(attendance_rate(attendance));
    let academic_performance = round_percent(academic_performance(marks));
    let overall_score = overall_score(attendance_percentage, academic_performance, config);

    ProgressSnapshot {
        student_id: student_id.to_string(),
        date_recorded: as_of,
        overall_score,
        attendance_percentage,
        academic_performance,
        behavior_score: config.behavior_score,
        risk_level: classify(overall_score, config),
    }
}

/// First day of the trailing window ending on `as_of`.
pub fn window_start(as_of: NaiveDate, window_days: i64) -> AppResult<NaiveDate> {
    Duration::try_days(window_days.max(1))
        .and_then(|span| as_of.checked_sub_signed(span))
        .ok_or_else(|| {
            AppError::validation(format!("windowDays {window_days} reaches outside the calendar"))
        })
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

fn round_percent(value: f64) -> i32 {
    clamp_percent(value).round() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(offset: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 31).unwrap() - Duration::days(offset)
    }

    fn attendance(present: usize, absent: usize) -> Vec<AttendanceRecord> {
        (0..present + absent)
            .map(|i| AttendanceRecord {
                student_id: "STU001".to_string(),
                date: day(i as i64),
                present: i < present,
                remarks: None,
            })
            .collect()
    }

    fn mark(obtained: f64, total: f64) -> AssessmentMark {
        AssessmentMark {
            student_id: "STU001".to_string(),
            subject: "Mathematics".to_string(),
            assessment_type: "unit test".to_string(),
            marks_obtained: obtained,
            total_marks: total,
            date_assessed: day(3),
        }
    }

    #[test]
    fn empty_windows_score_zero() {
        assert_eq!(attendance_rate(&[]), 0.0);
        assert_eq!(academic_performance(&[]), 0.0);
        let snapshot = score_window("STU001", day(0), &[], &[], &ScoringConfig::default());
        assert_eq!(snapshot.overall_score, 0);
        assert_eq!(snapshot.risk_level, RiskLevel::AtRisk);
    }

    #[test]
    fn zero_total_marks_are_treated_as_no_data() {
        assert_eq!(academic_performance(&[mark(5.0, 0.0)]), 0.0);
        assert_eq!(academic_performance(&[mark(5.0, 0.0), mark(8.0, 10.0)]), 80.0);
    }

    #[test]
    fn performance_uses_aggregate_ratio() {
        // per-record average would be (100 + 50) / 2 = 75
        let marks = vec![mark(10.0, 10.0), mark(45.0, 90.0)];
        assert!((academic_performance(&marks) - 55.0).abs() < 1e-9);
    }

    #[test]
    fn risk_boundaries_belong_to_the_higher_band() {
        let config = ScoringConfig::default();
        assert_eq!(classify(0, &config), RiskLevel::AtRisk);
        assert_eq!(classify(39, &config), RiskLevel::AtRisk);
        assert_eq!(classify(40, &config), RiskLevel::Warning);
        assert_eq!(classify(59, &config), RiskLevel::Warning);
        assert_eq!(classify(60, &config), RiskLevel::Safe);
        assert_eq!(classify(100, &config), RiskLevel::Safe);
    }

    #[test]
    fn overall_score_stays_in_range() {
        let config = ScoringConfig::default();
        for attendance in (0..=100).step_by(5) {
            for academic in (0..=100).step_by(5) {
                let score = overall_score(attendance, academic, &config);
                assert!((0..=100).contains(&score), "{attendance}/{academic} -> {score}");
            }
        }
        assert_eq!(overall_score(100, 100, &config), 100);
    }

    #[test]
    fn attendance_only_window_is_at_risk() {
        let snapshot = score_window(
            "STU001",
            day(0),
            &attendance(18, 2),
            &[],
            &ScoringConfig::default(),
        );
        assert_eq!(snapshot.attendance_percentage, 90);
        assert_eq!(snapshot.academic_performance, 0);
        assert_eq!(snapshot.overall_score, 27);
        assert_eq!(snapshot.risk_level, RiskLevel::AtRisk);
    }

    #[test]
    fn full_attendance_and_strong_marks_are_safe() {
        let marks = vec![mark(70.0, 100.0), mark(90.0, 100.0)];
        let snapshot = score_window(
            "STU001",
            day(0),
            &attendance(10, 0),
            &marks,
            &ScoringConfig::default(),
        );
        assert_eq!(snapshot.attendance_percentage, 100);
        assert_eq!(snapshot.academic_performance, 80);
        assert_eq!(snapshot.overall_score, 86);
        assert_eq!(snapshot.risk_level, RiskLevel::Safe);
        assert_eq!(snapshot.behavior_score, 80);
    }

    #[test]
    fn weights_come_from_config() {
        let config = ScoringConfig {
            attendance_weight: 0.5,
            academic_weight: 0.5,
            ..ScoringConfig::default()
        };
        assert_eq!(overall_score(80, 40, &config), 60);
        assert_eq!(classify(overall_score(80, 40, &config), &config), RiskLevel::Safe);
    }

    #[test]
    fn window_start_respects_window_days() {
        assert_eq!(window_start(day(0), 14).unwrap(), day(14));
        assert_eq!(window_start(day(0), 0).unwrap(), day(1));
    }

    #[test]
    fn oversized_window_is_a_validation_error() {
        assert!(matches!(
            window_start(day(0), 100_000_000),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            window_start(day(0), i64::MAX),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn overall_score_weights_rounded_components() {
        // 62.5% attendance is stored as 63; unrounded weighting would give 19
        let marks = vec![mark(1.0, 100.0)];
        let snapshot = score_window(
            "STU001",
            day(0),
            &attendance(5, 3),
            &marks,
            &ScoringConfig::default(),
        );
        assert_eq!(snapshot.attendance_percentage, 63);
        assert_eq!(snapshot.academic_performance, 1);
        assert_eq!(snapshot.overall_score, 20);
    }
}
