use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub student_id: String,
    pub school_id: String,
    pub school_name: String,
    pub board: String,
    pub name: String,
    pub class_level: i32,
    pub section: String,
    pub parent_email: Option<String>,
    pub status: String,
}

impl Student {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub student_id: String,
    pub date: NaiveDate,
    pub present: bool,
    pub remarks: Option<String>,
}

impl AttendanceRecord {
    pub fn new(
        student_id: impl Into<String>,
        date: NaiveDate,
        present: bool,
        remarks: Option<String>,
    ) -> AppResult<Self> {
        let student_id = required("studentId", student_id.into())?;
        let remarks = remarks
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        Ok(Self {
            student_id,
            date,
            present,
            remarks,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentMark {
    pub student_id: String,
    pub subject: String,
    pub assessment_type: String,
    pub marks_obtained: f64,
    pub total_marks: f64,
    pub date_assessed: NaiveDate,
}

impl AssessmentMark {
    pub fn new(
        student_id: impl Into<String>,
        subject: impl Into<String>,
        assessment_type: impl Into<String>,
        marks_obtained: f64,
        total_marks: f64,
        date_assessed: NaiveDate,
    ) -> AppResult<Self> {
        if !total_marks.is_finite() || total_marks <= 0.0 {
            return Err(AppError::validation("totalMarks must be greater than zero"));
        }
        if !marks_obtained.is_finite() || marks_obtained < 0.0 {
            return Err(AppError::validation("marksObtained must not be negative"));
        }
        Ok(Self {
            student_id: required("studentId", student_id.into())?,
            subject: required("subject", subject.into())?,
            assessment_type: required("assessmentType", assessment_type.into())?,
            marks_obtained,
            total_marks,
            date_assessed,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    #[serde(rename = "safe")]
    Safe,
    #[serde(rename = "warning")]
    Warning,
    #[serde(rename = "at-risk")]
    AtRisk,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 3] = [RiskLevel::AtRisk, RiskLevel::Warning, RiskLevel::Safe];

    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Safe => "safe",
            RiskLevel::Warning => "warning",
            RiskLevel::AtRisk => "at-risk",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "safe" => Ok(RiskLevel::Safe),
            "warning" => Ok(RiskLevel::Warning),
            "at-risk" => Ok(RiskLevel::AtRisk),
            other => Err(AppError::Storage(format!("unknown risk level '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub student_id: String,
    pub date_recorded: NaiveDate,
    pub overall_score: i32,
    pub attendance_percentage: i32,
    pub academic_performance: i32,
    pub behavior_score: i32,
    pub risk_level: RiskLevel,
}

/// Result of a batch attendance write. Recompute failures are reported, not raised.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub rows_written: usize,
    pub recompute_failures: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressOverview {
    pub current_metrics: ProgressSnapshot,
    pub progress_history: Vec<ProgressSnapshot>,
    pub recent_attendance: Vec<AttendanceRecord>,
    pub recent_marks: Vec<AssessmentMark>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub student: Student,
    pub latest: Option<ProgressSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct McqQuestion {
    pub id: Uuid,
    pub class_level: i32,
    pub board: String,
    pub subject: String,
    pub question: String,
    pub option_a: String,
    pub option_b: String,
    pub option_c: String,
    pub option_d: String,
    pub correct_answer: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatInteraction {
    pub id: Uuid,
    pub student_id: String,
    pub question: String,
    pub response: String,
    pub interaction_type: String,
    pub context_data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Counselor {
    pub counselor_id: String,
    pub school_id: String,
    pub name: String,
    pub email: String,
    pub specialization: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrgencyLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl UrgencyLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            UrgencyLevel::Low => "low",
            UrgencyLevel::Medium => "medium",
            UrgencyLevel::High => "high",
        }
    }

    /// Higher is more urgent.
    pub fn rank(self) -> u8 {
        match self {
            UrgencyLevel::Low => 0,
            UrgencyLevel::Medium => 1,
            UrgencyLevel::High => 2,
        }
    }
}

impl fmt::Display for UrgencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UrgencyLevel {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(UrgencyLevel::Low),
            "medium" => Ok(UrgencyLevel::Medium),
            "high" => Ok(UrgencyLevel::High),
            other => Err(AppError::validation(format!(
                "urgencyLevel must be one of low, medium, high (got '{other}')"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CounselorRequest {
    pub id: Uuid,
    pub student_id: String,
    pub requester_type: String,
    pub requester_id: Option<String>,
    pub message: String,
    pub urgency_level: UrgencyLevel,
    pub assigned_counselor_id: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub recipient_type: String,
    pub recipient_id: Option<String>,
    pub recipient_email: String,
    pub message_type: String,
    pub subject: String,
    pub message: String,
}

pub(crate) fn required(field: &str, value: String) -> AppResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::validation(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}
