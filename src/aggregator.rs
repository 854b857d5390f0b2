use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::ScoringConfig;
use crate::error::{AppError, AppResult};
use crate::models::{
    AssessmentMark, AttendanceRecord, BatchOutcome, ProgressOverview, ProgressSnapshot, Student,
};
use crate::risk;
use crate::store::{with_retry, ProgressStore};

const RECENT_ROWS: usize = 10;

/// Derives progress snapshots from attendance and marks and keeps them persisted.
#[derive(Clone)]
pub struct Aggregator {
    store: Arc<dyn ProgressStore>,
    scoring: ScoringConfig,
    retries: u32,
}

impl Aggregator {
    pub fn new(store: Arc<dyn ProgressStore>, scoring: ScoringConfig, retries: u32) -> Self {
        Self {
            store,
            scoring,
            retries,
        }
    }

    pub fn scoring(&self) -> &ScoringConfig {
        &self.scoring
    }

    pub fn store(&self) -> &Arc<dyn ProgressStore> {
        &self.store
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Looks up a student that exists and is active.
    pub async fn active_student(&self, student_id: &str) -> AppResult<Student> {
        let store = self.store.as_ref();
        let student = with_retry("find_student", self.retries, move || {
            store.find_student(student_id)
        })
        .await?;

        match student {
            Some(student) if student.is_active() => Ok(student),
            Some(_) => Err(AppError::not_found(format!(
                "student {student_id} is not active"
            ))),
            None => Err(AppError::not_found(format!("student {student_id} not found"))),
        }
    }

    pub async fn window_attendance(
        &self,
        student_id: &str,
        window_days: i64,
        as_of: NaiveDate,
    ) -> AppResult<Vec<AttendanceRecord>> {
        let store = self.store.as_ref();
        let from = risk::window_start(as_of, window_days)?;
        with_retry("attendance_in_window", self.retries, move || {
            store.attendance_in_window(student_id, from, as_of)
        })
        .await
    }

    pub async fn window_marks(
        &self,
        student_id: &str,
        window_days: i64,
        as_of: NaiveDate,
    ) -> AppResult<Vec<AssessmentMark>> {
        let store = self.store.as_ref();
        let from = risk::window_start(as_of, window_days)?;
        with_retry("marks_in_window", self.retries, move || {
            store.marks_in_window(student_id, from, as_of)
        })
        .await
    }

    /// Recomputes and upserts the snapshot for (`student_id`, `as_of`).
    pub async fn compute_snapshot(
        &self,
        student_id: &str,
        window_days: i64,
        as_of: NaiveDate,
    ) -> AppResult<ProgressSnapshot> {
        if window_days <= 0 {
            return Err(AppError::validation("windowDays must be greater than zero"));
        }
        let student_id = student_id.trim();
        if student_id.is_empty() {
            return Err(AppError::validation("studentId is required"));
        }
        risk::window_start(as_of, window_days)?;

        self.active_student(student_id).await?;
        let attendance = self.window_attendance(student_id, window_days, as_of).await?;
        let marks = self.window_marks(student_id, window_days, as_of).await?;
        let snapshot = risk::score_window(student_id, as_of, &attendance, &marks, &self.scoring);

        let store = self.store.as_ref();
        let pending = &snapshot;
        with_retry("upsert_snapshot", self.retries, move || {
            store.upsert_snapshot(pending)
        })
        .await
        .inspect_err(|err| {
            error!(student_id, %as_of, error = %err, "failed to persist progress snapshot");
        })?;

        debug!(
            student_id,
            %as_of,
            overall = snapshot.overall_score,
            risk = %snapshot.risk_level,
            "progress snapshot updated"
        );
        Ok(snapshot)
    }

    /// Snapshot for today over the configured default window.
    pub async fn refresh_today(&self, student_id: &str) -> AppResult<ProgressSnapshot> {
        self.compute_snapshot(student_id, self.scoring.window_days, risk::today())
            .await
    }

    /// Upserts every record, then recomputes today's snapshot for each distinct student.
    ///
    /// Writes fail the batch. Recompute failures are logged and reported per student.
    pub async fn batch_record_attendance(
        &self,
        records: Vec<AttendanceRecord>,
        recorded_by: &str,
    ) -> AppResult<BatchOutcome> {
        let recorded_by = recorded_by.trim().to_string();
        if recorded_by.is_empty() {
            return Err(AppError::validation("teacherId is required"));
        }

        let submitted = records.len();
        let mut students = Vec::new();
        let mut seen = HashSet::new();
        for record in &records {
            if seen.insert(record.student_id.clone()) {
                students.push(record.student_id.clone());
            }
        }

        // Writes run concurrently, so a repeated (student, date) keeps only its last entry.
        let mut latest: Vec<AttendanceRecord> = Vec::with_capacity(submitted);
        let mut slots: HashMap<(String, NaiveDate), usize> = HashMap::new();
        for record in records {
            match slots.entry((record.student_id.clone(), record.date)) {
                Entry::Occupied(slot) => latest[*slot.get()] = record,
                Entry::Vacant(slot) => {
                    slot.insert(latest.len());
                    latest.push(record);
                }
            }
        }

        let mut writes = JoinSet::new();
        for record in latest {
            let store = Arc::clone(&self.store);
            let retries = self.retries;
            let recorded_by = recorded_by.clone();
            writes.spawn(async move {
                let store = store.as_ref();
                let record = &record;
                let recorded_by = recorded_by.as_str();
                with_retry("upsert_attendance", retries, move || {
                    store.upsert_attendance(record, recorded_by)
                })
                .await
            });
        }

        while let Some(joined) = writes.join_next().await {
            let written = joined
                .map_err(|err| AppError::Storage(format!("attendance write task failed: {err}")))
                .and_then(|result| result);
            if let Err(err) = written {
                error!(recorded_by = %recorded_by, error = %err, "attendance batch write failed");
                writes.abort_all();
                return Err(err);
            }
        }
        let rows_written = submitted;

        let mut recompute_failures = Vec::new();
        for student_id in students {
            if let Err(err) = self.refresh_today(&student_id).await {
                warn!(
                    student_id = %student_id,
                    error = %err,
                    "progress recompute failed after attendance batch"
                );
                recompute_failures.push(student_id);
            }
        }

        info!(
            recorded_by = %recorded_by,
            rows_written,
            failed = recompute_failures.len(),
            "attendance batch recorded"
        );
        Ok(BatchOutcome {
            rows_written,
            recompute_failures,
        })
    }

    /// Stored snapshots, most recent first, capped at `limit`.
    pub async fn snapshot_history(
        &self,
        student_id: &str,
        limit: usize,
    ) -> AppResult<Vec<ProgressSnapshot>> {
        if limit == 0 {
            return Err(AppError::validation("limit must be greater than zero"));
        }
        let store = self.store.as_ref();
        with_retry("snapshot_history", self.retries, move || {
            store.snapshot_history(student_id, limit)
        })
        .await
    }

    /// Dashboard view: fresh snapshot plus chronological history and recent raw rows.
    pub async fn progress_overview(
        &self,
        student_id: &str,
        window_days: i64,
        history_limit: usize,
    ) -> AppResult<ProgressOverview> {
        let current_metrics = self
            .compute_snapshot(student_id, window_days, risk::today())
            .await?;
        let mut progress_history = self.snapshot_history(student_id, history_limit).await?;
        progress_history.reverse();

        let store = self.store.as_ref();
        let mut recent_attendance = with_retry("recent_attendance", self.retries, move || {
            store.recent_attendance(student_id, RECENT_ROWS)
        })
        .await?;
        recent_attendance.reverse();
        let mut recent_marks = with_retry("recent_marks", self.retries, move || {
            store.recent_marks(student_id, RECENT_ROWS)
        })
        .await?;
        recent_marks.reverse();

        Ok(ProgressOverview {
            current_metrics,
            progress_history,
            recent_attendance,
            recent_marks,
        })
    }
}
