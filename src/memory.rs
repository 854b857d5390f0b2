//! In-memory [`ProgressStore`] used by the service and HTTP tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::{AppError, AppResult};
use crate::models::{
    AssessmentMark, AttendanceRecord, ChatInteraction, Counselor, CounselorRequest, McqQuestion,
    Notification, ProgressSnapshot, RosterEntry, Student,
};
use crate::store::ProgressStore;

#[derive(Default)]
pub struct MemoryStore {
    pub students: Mutex<HashMap<String, Student>>,
    pub attendance: Mutex<BTreeMap<(String, NaiveDate), (AttendanceRecord, String)>>,
    pub marks: Mutex<Vec<AssessmentMark>>,
    pub snapshots: Mutex<BTreeMap<(String, NaiveDate), ProgressSnapshot>>,
    pub mcqs: Mutex<Vec<McqQuestion>>,
    pub interactions: Mutex<Vec<ChatInteraction>>,
    pub counselors: Mutex<Vec<Counselor>>,
    pub requests: Mutex<Vec<CounselorRequest>>,
    pub notifications: Mutex<Vec<Notification>>,
    /// Students whose snapshot writes always fail.
    pub failing_snapshots: Mutex<HashSet<String>>,
    /// Number of upcoming `find_student` calls that fail with a storage error.
    pub flaky_lookups: AtomicU32,
    pub fail_marks: Mutex<bool>,
    pub lookups: AtomicU32,
}

impl MemoryStore {
    pub fn add_student(&self, student_id: &str, school_id: &str, status: &str) {
        let student = Student {
            student_id: student_id.to_string(),
            school_id: school_id.to_string(),
            school_name: "Greenfield Public School".to_string(),
            board: "CBSE".to_string(),
            name: format!("Student {student_id}"),
            class_level: 8,
            section: "A".to_string(),
            parent_email: Some(format!("parent.{}@example.com", student_id.to_lowercase())),
            status: status.to_string(),
        };
        self.students
            .lock()
            .unwrap()
            .insert(student_id.to_string(), student);
    }

    pub fn add_attendance(&self, student_id: &str, date: NaiveDate, present: bool) {
        let record = AttendanceRecord {
            student_id: student_id.to_string(),
            date,
            present,
            remarks: None,
        };
        self.attendance.lock().unwrap().insert(
            (student_id.to_string(), date),
            (record, "TCH001".to_string()),
        );
    }

    pub fn add_mark(&self, student_id: &str, obtained: f64, total: f64, date: NaiveDate) {
        self.marks.lock().unwrap().push(AssessmentMark {
            student_id: student_id.to_string(),
            subject: "Science".to_string(),
            assessment_type: "unit test".to_string(),
            marks_obtained: obtained,
            total_marks: total,
            date_assessed: date,
        });
    }

    pub fn fail_snapshots_for(&self, student_id: &str) {
        self.failing_snapshots
            .lock()
            .unwrap()
            .insert(student_id.to_string());
    }

    pub fn snapshot(&self, student_id: &str, date: NaiveDate) -> Option<ProgressSnapshot> {
        self.snapshots
            .lock()
            .unwrap()
            .get(&(student_id.to_string(), date))
            .cloned()
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.lock().unwrap().len()
    }
}

#[async_trait]
impl ProgressStore for MemoryStore {
    async fn find_student(&self, student_id: &str) -> AppResult<Option<Student>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let pending = self.flaky_lookups.load(Ordering::SeqCst);
        if pending > 0 {
            self.flaky_lookups.store(pending - 1, Ordering::SeqCst);
            return Err(AppError::Storage("connection reset".to_string()));
        }
        Ok(self.students.lock().unwrap().get(student_id).cloned())
    }

    async fn attendance_in_window(
        &self,
        student_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> AppResult<Vec<AttendanceRecord>> {
        Ok(self
            .attendance
            .lock()
            .unwrap()
            .values()
            .filter(|(r, _)| r.student_id == student_id && r.date >= from && r.date <= to)
            .map(|(r, _)| r.clone())
            .collect())
    }

    async fn marks_in_window(
        &self,
        student_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> AppResult<Vec<AssessmentMark>> {
        if *self.fail_marks.lock().unwrap() {
            return Err(AppError::Storage("marks table unavailable".to_string()));
        }
        Ok(self
            .marks
            .lock()
            .unwrap()
            .iter()
            .filter(|m| {
                m.student_id == student_id && m.date_assessed >= from && m.date_assessed <= to
            })
            .cloned()
            .collect())
    }

    async fn recent_attendance(
        &self,
        student_id: &str,
        limit: usize,
    ) -> AppResult<Vec<AttendanceRecord>> {
        Ok(self
            .attendance
            .lock()
            .unwrap()
            .values()
            .rev()
            .filter(|(r, _)| r.student_id == student_id)
            .take(limit)
            .map(|(r, _)| r.clone())
            .collect())
    }

    async fn recent_marks(
        &self,
        student_id: &str,
        limit: usize,
    ) -> AppResult<Vec<AssessmentMark>> {
        let mut marks: Vec<AssessmentMark> = self
            .marks
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.student_id == student_id)
            .cloned()
            .collect();
        marks.sort_by(|a, b| b.date_assessed.cmp(&a.date_assessed));
        marks.truncate(limit);
        Ok(marks)
    }

    async fn upsert_attendance(
        &self,
        record: &AttendanceRecord,
        recorded_by: &str,
    ) -> AppResult<()> {
        self.attendance.lock().unwrap().insert(
            (record.student_id.clone(), record.date),
            (record.clone(), recorded_by.to_string()),
        );
        Ok(())
    }

    async fn insert_mark(&self, mark: &AssessmentMark) -> AppResult<()> {
        self.marks.lock().unwrap().push(mark.clone());
        Ok(())
    }

    async fn upsert_snapshot(&self, snapshot: &ProgressSnapshot) -> AppResult<()> {
        if self
            .failing_snapshots
            .lock()
            .unwrap()
            .contains(&snapshot.student_id)
        {
            return Err(AppError::Storage(format!(
                "deadlock detected writing progress for {}",
                snapshot.student_id
            )));
        }
        self.snapshots.lock().unwrap().insert(
            (snapshot.student_id.clone(), snapshot.date_recorded),
            snapshot.clone(),
        );
        Ok(())
    }

    async fn snapshot_history(
        &self,
        student_id: &str,
        limit: usize,
    ) -> AppResult<Vec<ProgressSnapshot>> {
        Ok(self
            .snapshots
            .lock()
            .unwrap()
            .values()
            .rev()
            .filter(|s| s.student_id == student_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn latest_snapshot(&self, student_id: &str) -> AppResult<Option<ProgressSnapshot>> {
        Ok(self.snapshot_history(student_id, 1).await?.into_iter().next())
    }

    async fn school_roster(&self, school_id: &str) -> AppResult<Vec<RosterEntry>> {
        let mut students: Vec<Student> = self
            .students
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.school_id == school_id && s.is_active())
            .cloned()
            .collect();
        students.sort_by(|a, b| {
            (a.class_level, &a.section, &a.name).cmp(&(b.class_level, &b.section, &b.name))
        });

        let mut roster = Vec::with_capacity(students.len());
        for student in students {
            let latest = self.latest_snapshot(&student.student_id).await?;
            roster.push(RosterEntry { student, latest });
        }
        Ok(roster)
    }

    async fn random_mcq(&self, class_level: i32, board: &str) -> AppResult<Option<McqQuestion>> {
        Ok(self
            .mcqs
            .lock()
            .unwrap()
            .iter()
            .find(|q| q.class_level == class_level && q.board == board)
            .cloned())
    }

    async fn log_interaction(&self, interaction: &ChatInteraction) -> AppResult<()> {
        self.interactions.lock().unwrap().push(interaction.clone());
        Ok(())
    }

    async fn counselor_for_school(&self, school_id: &str) -> AppResult<Option<Counselor>> {
        Ok(self
            .counselors
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.school_id == school_id)
            .cloned())
    }

    async fn insert_counselor_request(&self, request: &CounselorRequest) -> AppResult<()> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(())
    }

    async fn insert_notification(&self, notification: &Notification) -> AppResult<()> {
        self.notifications.lock().unwrap().push(notification.clone());
        Ok(())
    }

    async fn requests_for_student(&self, student_id: &str) -> AppResult<Vec<CounselorRequest>> {
        let mut requests: Vec<CounselorRequest> = self
            .requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.student_id == student_id)
            .cloned()
            .collect();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(requests)
    }

    async fn requests_for_counselor(
        &self,
        counselor_id: &str,
    ) -> AppResult<Vec<CounselorRequest>> {
        let mut requests: Vec<CounselorRequest> = self
            .requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.assigned_counselor_id.as_deref() == Some(counselor_id))
            .cloned()
            .collect();
        requests.sort_by(|a, b| {
            b.urgency_level
                .rank()
                .cmp(&a.urgency_level.rank())
                .then(b.created_at.cmp(&a.created_at))
        });
        Ok(requests)
    }
}
