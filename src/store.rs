use std::future::Future;

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::warn;

use crate::error::AppResult;
use crate::models::{
    AssessmentMark, AttendanceRecord, ChatInteraction, Counselor, CounselorRequest, McqQuestion,
    Notification, ProgressSnapshot, RosterEntry, Student,
};

/// Typed data access used by the services. Date ranges are inclusive on both ends.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn find_student(&self, student_id: &str) -> AppResult<Option<Student>>;

    async fn attendance_in_window(
        &self,
        student_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> AppResult<Vec<AttendanceRecord>>;

    async fn marks_in_window(
        &self,
        student_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> AppResult<Vec<AssessmentMark>>;

    /// Most recent first.
    async fn recent_attendance(
        &self,
        student_id: &str,
        limit: usize,
    ) -> AppResult<Vec<AttendanceRecord>>;

    /// Most recent first.
    async fn recent_marks(&self, student_id: &str, limit: usize)
        -> AppResult<Vec<AssessmentMark>>;

    /// Insert or replace keyed by (student, date).
    async fn upsert_attendance(&self, record: &AttendanceRecord, recorded_by: &str)
        -> AppResult<()>;

    async fn insert_mark(&self, mark: &AssessmentMark) -> AppResult<()>;

    /// Insert or replace keyed by (student, date_recorded).
    async fn upsert_snapshot(&self, snapshot: &ProgressSnapshot) -> AppResult<()>;

    /// Most recent first, at most `limit` rows.
    async fn snapshot_history(
        &self,
        student_id: &str,
        limit: usize,
    ) -> AppResult<Vec<ProgressSnapshot>>;

    async fn latest_snapshot(&self, student_id: &str) -> AppResult<Option<ProgressSnapshot>>;

    /// Active students ordered by class, section and name.
    async fn school_roster(&self, school_id: &str) -> AppResult<Vec<RosterEntry>>;

    async fn random_mcq(&self, class_level: i32, board: &str) -> AppResult<Option<McqQuestion>>;

    async fn log_interaction(&self, interaction: &ChatInteraction) -> AppResult<()>;

    async fn counselor_for_school(&self, school_id: &str) -> AppResult<Option<Counselor>>;

    async fn insert_counselor_request(&self, request: &CounselorRequest) -> AppResult<()>;

    async fn insert_notification(&self, notification: &Notification) -> AppResult<()>;

    /// Newest first.
    async fn requests_for_student(&self, student_id: &str) -> AppResult<Vec<CounselorRequest>>;

    /// Most urgent first, then newest first.
    async fn requests_for_counselor(&self, counselor_id: &str)
        -> AppResult<Vec<CounselorRequest>>;
}

/// Runs `call`, retrying up to `retries` more times while it fails with a storage error.
pub async fn with_retry<T, F, Fut>(operation: &str, retries: u32, mut call: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Err(err) if err.is_storage() && attempt < retries => {
                attempt += 1;
                warn!(operation, attempt, error = %err, "retrying storage call");
            }
            result => return result,
        }
    }
}
