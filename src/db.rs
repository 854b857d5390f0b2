use anyhow::Context;
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{
    AssessmentMark, AttendanceRecord, ChatInteraction, Counselor, CounselorRequest, McqQuestion,
    Notification, ProgressSnapshot, RosterEntry, Student, UrgencyLevel,
};
use crate::risk;
use crate::store::ProgressStore;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO edu_analytics.schools (school_id, name, board)
        VALUES ('SCH001', 'Greenfield Public School', 'CBSE')
        ON CONFLICT (school_id) DO UPDATE
        SET name = EXCLUDED.name, board = EXCLUDED.board
        "#,
    )
    .execute(pool)
    .await?;

    let students = vec![
        ("STU001", "Aarav Sharma", 8, "A", (2012, 5, 14), Some("sharma.family@example.com")),
        ("STU002", "Diya Patel", 8, "A", (2012, 9, 2), Some("patel.home@example.com")),
        ("STU003", "Kabir Singh", 9, "B", (2011, 1, 23), None),
        ("STU004", "Meera Nair", 9, "B", (2011, 11, 7), Some("nair.parents@example.com")),
    ];

    for (student_id, name, class_level, section, (y, m, d), parent_email) in students {
        let date_of_birth = NaiveDate::from_ymd_opt(y, m, d).context("invalid date")?;
        sqlx::query(
            r#"
            INSERT INTO edu_analytics.students
            (student_id, school_id, name, class_level, section, date_of_birth, parent_email, status)
            VALUES ($1, 'SCH001', $2, $3, $4, $5, $6, 'active')
            ON CONFLICT (student_id) DO UPDATE
            SET name = EXCLUDED.name, class_level = EXCLUDED.class_level,
                section = EXCLUDED.section, parent_email = EXCLUDED.parent_email
            "#,
        )
        .bind(student_id)
        .bind(name)
        .bind(class_level)
        .bind(section)
        .bind(date_of_birth)
        .bind(parent_email)
        .execute(pool)
        .await?;
    }

    sqlx::query(
        r#"
        INSERT INTO edu_analytics.teachers (teacher_id, school_id, name, email)
        VALUES ('TCH001', 'SCH001', 'Ritu Verma', 'ritu.verma@greenfield.example.com')
        ON CONFLICT (teacher_id) DO NOTHING
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO edu_analytics.counselors (counselor_id, school_id, name, email, specialization)
        VALUES ('CNS001', 'SCH001', 'Dr. Anil Kapoor', 'anil.kapoor@greenfield.example.com',
                'Academic stress')
        ON CONFLICT (counselor_id) DO NOTHING
        "#,
    )
    .execute(pool)
    .await?;

    let mcqs = vec![
        (
            "6b1f4c8e-3d0a-4f6e-9a57-1c2f5e8d9b01",
            8,
            "Science",
            "Which gas do plants absorb during photosynthesis?",
            ["Oxygen", "Carbon dioxide", "Nitrogen", "Hydrogen"],
            "B",
        ),
        (
            "a43e0d2b-7c51-4b8f-8e26-5f9d3a1c7e02",
            9,
            "Mathematics",
            "What is the value of 3^2 + 4^2?",
            ["12", "25", "49", "7"],
            "B",
        ),
    ];

    for (id, class_level, subject, question, options, answer) in mcqs {
        sqlx::query(
            r#"
            INSERT INTO edu_analytics.mcq_questions
            (id, class_level, board, subject, question, option_a, option_b, option_c, option_d,
             correct_answer)
            VALUES ($1, $2, 'CBSE', $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(Uuid::parse_str(id)?)
        .bind(class_level)
        .bind(subject)
        .bind(question)
        .bind(options[0])
        .bind(options[1])
        .bind(options[2])
        .bind(options[3])
        .bind(answer)
        .execute(pool)
        .await?;
    }

    let today = risk::today();
    let marks = vec![
        ("0c9e8f1a-51d2-4c7a-b3e4-8a6d2f1b0c11", "STU001", "Mathematics", 42.0, 50.0, 5),
        ("1d0f9a2b-62e3-4d8b-c4f5-9b7e3a2c1d12", "STU002", "Mathematics", 18.0, 50.0, 5),
        ("2e1a0b3c-73f4-4e9c-d5a6-0c8f4b3d2e13", "STU003", "Science", 61.0, 100.0, 9),
        ("3f2b1c4d-84a5-4fad-e6b7-1d9a5c4e3f14", "STU004", "Science", 33.0, 100.0, 9),
    ];

    for (id, student_id, subject, obtained, total, days_ago) in marks {
        sqlx::query(
            r#"
            INSERT INTO edu_analytics.marks
            (id, student_id, subject, assessment_type, marks_obtained, total_marks, date_assessed)
            VALUES ($1, $2, $3, 'unit test', $4, $5, $6)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(Uuid::parse_str(id)?)
        .bind(student_id)
        .bind(subject)
        .bind(obtained)
        .bind(total)
        .bind(today - Duration::days(days_ago))
        .execute(pool)
        .await?;
    }

    Ok(())
}

/// Loads assessment marks from CSV, rejecting rows that fail validation.
pub async fn import_marks_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        student_id: String,
        subject: String,
        assessment_type: String,
        marks_obtained: f64,
        total_marks: f64,
        date_assessed: NaiveDate,
    }

    let store = PgStore::new(pool.clone());
    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;

    for (index, result) in reader.deserialize::<CsvRow>().enumerate() {
        let line = index + 2;
        let row = result.with_context(|| format!("malformed row on line {line}"))?;
        let mark = AssessmentMark::new(
            row.student_id,
            row.subject,
            row.assessment_type,
            row.marks_obtained,
            row.total_marks,
            row.date_assessed,
        )
        .with_context(|| format!("invalid mark on line {line}"))?;

        store.insert_mark(&mark).await?;
        inserted += 1;
    }

    Ok(inserted)
}

/// Reads attendance rows from CSV for a batch submission.
pub fn read_attendance_csv(csv_path: &std::path::Path) -> anyhow::Result<Vec<AttendanceRecord>> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        student_id: String,
        date: NaiveDate,
        present: bool,
        remarks: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut records = Vec::new();

    for (index, result) in reader.deserialize::<CsvRow>().enumerate() {
        let line = index + 2;
        let row = result.with_context(|| format!("malformed row on line {line}"))?;
        let record = AttendanceRecord::new(row.student_id, row.date, row.present, row.remarks)
            .with_context(|| format!("invalid attendance on line {line}"))?;
        records.push(record);
    }

    Ok(records)
}

/// Postgres-backed [`ProgressStore`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const STUDENT_COLUMNS: &str = "s.student_id, s.school_id, sc.name AS school_name, sc.board, \
     s.name, s.class_level, s.section, s.parent_email, s.status";

const SNAPSHOT_COLUMNS: &str = "student_id, date_recorded, overall_score, attendance_percentage, \
     academic_performance, behavior_score, risk_level";

const REQUEST_COLUMNS: &str = "id, student_id, requester_type, requester_id, message, \
     urgency_level, assigned_counselor_id, status, created_at";

fn student_from_row(row: &PgRow) -> AppResult<Student> {
    Ok(Student {
        student_id: row.try_get("student_id")?,
        school_id: row.try_get("school_id")?,
        school_name: row.try_get("school_name")?,
        board: row.try_get("board")?,
        name: row.try_get("name")?,
        class_level: row.try_get("class_level")?,
        section: row.try_get("section")?,
        parent_email: row.try_get("parent_email")?,
        status: row.try_get("status")?,
    })
}

fn attendance_from_row(row: &PgRow) -> AppResult<AttendanceRecord> {
    Ok(AttendanceRecord {
        student_id: row.try_get("student_id")?,
        date: row.try_get("date_recorded")?,
        present: row.try_get("present")?,
        remarks: row.try_get("remarks")?,
    })
}

fn mark_from_row(row: &PgRow) -> AppResult<AssessmentMark> {
    Ok(AssessmentMark {
        student_id: row.try_get("student_id")?,
        subject: row.try_get("subject")?,
        assessment_type: row.try_get("assessment_type")?,
        marks_obtained: row.try_get("marks_obtained")?,
        total_marks: row.try_get("total_marks")?,
        date_assessed: row.try_get("date_assessed")?,
    })
}

fn snapshot_from_row(row: &PgRow) -> AppResult<ProgressSnapshot> {
    let risk_level: String = row.try_get("risk_level")?;
    Ok(ProgressSnapshot {
        student_id: row.try_get("student_id")?,
        date_recorded: row.try_get("date_recorded")?,
        overall_score: row.try_get("overall_score")?,
        attendance_percentage: row.try_get("attendance_percentage")?,
        academic_performance: row.try_get("academic_performance")?,
        behavior_score: row.try_get("behavior_score")?,
        risk_level: risk_level.parse()?,
    })
}

fn counselor_from_row(row: &PgRow) -> AppResult<Counselor> {
    Ok(Counselor {
        counselor_id: row.try_get("counselor_id")?,
        school_id: row.try_get("school_id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        specialization: row.try_get("specialization")?,
    })
}

fn request_from_row(row: &PgRow) -> AppResult<CounselorRequest> {
    let urgency: String = row.try_get("urgency_level")?;
    let urgency_level = urgency
        .parse::<UrgencyLevel>()
        .map_err(|err| AppError::Storage(err.to_string()))?;
    Ok(CounselorRequest {
        id: row.try_get("id")?,
        student_id: row.try_get("student_id")?,
        requester_type: row.try_get("requester_type")?,
        requester_id: row.try_get("requester_id")?,
        message: row.try_get("message")?,
        urgency_level,
        assigned_counselor_id: row.try_get("assigned_counselor_id")?,
        status: row.try_get("status")?,
        created_at: row.try_get("created_at")?,
    })
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl ProgressStore for PgStore {
    async fn find_student(&self, student_id: &str) -> AppResult<Option<Student>> {
        let query = format!(
            "SELECT {STUDENT_COLUMNS} \
             FROM edu_analytics.students s \
             JOIN edu_analytics.schools sc ON sc.school_id = s.school_id \
             WHERE s.student_id = $1"
        );
        sqlx::query(&query)
            .bind(student_id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(student_from_row)
            .transpose()
    }

    async fn attendance_in_window(
        &self,
        student_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> AppResult<Vec<AttendanceRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT student_id, date_recorded, present, remarks
            FROM edu_analytics.attendance
            WHERE student_id = $1 AND date_recorded BETWEEN $2 AND $3
            ORDER BY date_recorded
            "#,
        )
        .bind(student_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(attendance_from_row).collect()
    }

    async fn marks_in_window(
        &self,
        student_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> AppResult<Vec<AssessmentMark>> {
        let rows = sqlx::query(
            r#"
            SELECT student_id, subject, assessment_type, marks_obtained, total_marks, date_assessed
            FROM edu_analytics.marks
            WHERE student_id = $1 AND date_assessed BETWEEN $2 AND $3
            ORDER BY date_assessed
            "#,
        )
        .bind(student_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(mark_from_row).collect()
    }

    async fn recent_attendance(
        &self,
        student_id: &str,
        limit: usize,
    ) -> AppResult<Vec<AttendanceRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT student_id, date_recorded, present, remarks
            FROM edu_analytics.attendance
            WHERE student_id = $1
            ORDER BY date_recorded DESC
            LIMIT $2
            "#,
        )
        .bind(student_id)
        .bind(limit_param(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(attendance_from_row).collect()
    }

    async fn recent_marks(
        &self,
        student_id: &str,
        limit: usize,
    ) -> AppResult<Vec<AssessmentMark>> {
        let rows = sqlx::query(
            r#"
            SELECT student_id, subject, assessment_type, marks_obtained, total_marks, date_assessed
            FROM edu_analytics.marks
            WHERE student_id = $1
            ORDER BY date_assessed DESC
            LIMIT $2
            "#,
        )
        .bind(student_id)
        .bind(limit_param(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(mark_from_row).collect()
    }

    async fn upsert_attendance(
        &self,
        record: &AttendanceRecord,
        recorded_by: &str,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO edu_analytics.attendance
            (student_id, date_recorded, present, teacher_id, remarks)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (student_id, date_recorded) DO UPDATE
            SET present = EXCLUDED.present,
                teacher_id = EXCLUDED.teacher_id,
                remarks = EXCLUDED.remarks
            "#,
        )
        .bind(&record.student_id)
        .bind(record.date)
        .bind(record.present)
        .bind(recorded_by)
        .bind(&record.remarks)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_mark(&self, mark: &AssessmentMark) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO edu_analytics.marks
            (id, student_id, subject, assessment_type, marks_obtained, total_marks, date_assessed)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&mark.student_id)
        .bind(&mark.subject)
        .bind(&mark.assessment_type)
        .bind(mark.marks_obtained)
        .bind(mark.total_marks)
        .bind(mark.date_assessed)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_snapshot(&self, snapshot: &ProgressSnapshot) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO edu_analytics.student_progress
            (student_id, date_recorded, overall_score, attendance_percentage,
             academic_performance, behavior_score, risk_level)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (student_id, date_recorded) DO UPDATE
            SET overall_score = EXCLUDED.overall_score,
                attendance_percentage = EXCLUDED.attendance_percentage,
                academic_performance = EXCLUDED.academic_performance,
                behavior_score = EXCLUDED.behavior_score,
                risk_level = EXCLUDED.risk_level,
                calculated_at = now()
            "#,
        )
        .bind(&snapshot.student_id)
        .bind(snapshot.date_recorded)
        .bind(snapshot.overall_score)
        .bind(snapshot.attendance_percentage)
        .bind(snapshot.academic_performance)
        .bind(snapshot.behavior_score)
        .bind(snapshot.risk_level.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn snapshot_history(
        &self,
        student_id: &str,
        limit: usize,
    ) -> AppResult<Vec<ProgressSnapshot>> {
        let query = format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM edu_analytics.student_progress \
             WHERE student_id = $1 ORDER BY date_recorded DESC LIMIT $2"
        );
        let rows = sqlx::query(&query)
            .bind(student_id)
            .bind(limit_param(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(snapshot_from_row).collect()
    }

    async fn latest_snapshot(&self, student_id: &str) -> AppResult<Option<ProgressSnapshot>> {
        Ok(self.snapshot_history(student_id, 1).await?.into_iter().next())
    }

    async fn school_roster(&self, school_id: &str) -> AppResult<Vec<RosterEntry>> {
        let query = format!(
            "SELECT {STUDENT_COLUMNS}, \
                    sp.date_recorded, sp.overall_score, sp.attendance_percentage, \
                    sp.academic_performance, sp.behavior_score, sp.risk_level \
             FROM edu_analytics.students s \
             JOIN edu_analytics.schools sc ON sc.school_id = s.school_id \
             LEFT JOIN LATERAL ( \
                 SELECT * FROM edu_analytics.student_progress p \
                 WHERE p.student_id = s.student_id \
                 ORDER BY p.date_recorded DESC LIMIT 1 \
             ) sp ON TRUE \
             WHERE s.school_id = $1 AND s.status = 'active' \
             ORDER BY s.class_level, s.section, s.name"
        );
        let rows = sqlx::query(&query)
            .bind(school_id)
            .fetch_all(&self.pool)
            .await?;

        let mut roster = Vec::with_capacity(rows.len());
        for row in &rows {
            let student = student_from_row(row)?;
            let recorded: Option<NaiveDate> = row.try_get("date_recorded")?;
            let latest = match recorded {
                Some(_) => Some(snapshot_from_row(row)?),
                None => None,
            };
            roster.push(RosterEntry { student, latest });
        }
        Ok(roster)
    }

    async fn random_mcq(&self, class_level: i32, board: &str) -> AppResult<Option<McqQuestion>> {
        let row = sqlx::query(
            r#"
            SELECT id, class_level, board, subject, question,
                   option_a, option_b, option_c, option_d, correct_answer
            FROM edu_analytics.mcq_questions
            WHERE class_level = $1 AND board = $2
            ORDER BY random()
            LIMIT 1
            "#,
        )
        .bind(class_level)
        .bind(board)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(McqQuestion {
            id: row.try_get("id")?,
            class_level: row.try_get("class_level")?,
            board: row.try_get("board")?,
            subject: row.try_get("subject")?,
            question: row.try_get("question")?,
            option_a: row.try_get("option_a")?,
            option_b: row.try_get("option_b")?,
            option_c: row.try_get("option_c")?,
            option_d: row.try_get("option_d")?,
            correct_answer: row.try_get("correct_answer")?,
        }))
    }

    async fn log_interaction(&self, interaction: &ChatInteraction) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO edu_analytics.chatbot_interactions
            (id, student_id, question, response, interaction_type, context_data)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(interaction.id)
        .bind(&interaction.student_id)
        .bind(&interaction.question)
        .bind(&interaction.response)
        .bind(&interaction.interaction_type)
        .bind(Json(&interaction.context_data))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn counselor_for_school(&self, school_id: &str) -> AppResult<Option<Counselor>> {
        sqlx::query(
            r#"
            SELECT counselor_id, school_id, name, email, specialization
            FROM edu_analytics.counselors
            WHERE school_id = $1
            ORDER BY random()
            LIMIT 1
            "#,
        )
        .bind(school_id)
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(counselor_from_row)
        .transpose()
    }

    async fn insert_counselor_request(&self, request: &CounselorRequest) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO edu_analytics.counselor_requests
            (id, student_id, requester_type, requester_id, message, urgency_level,
             assigned_counselor_id, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(request.id)
        .bind(&request.student_id)
        .bind(&request.requester_type)
        .bind(&request.requester_id)
        .bind(&request.message)
        .bind(request.urgency_level.as_str())
        .bind(&request.assigned_counselor_id)
        .bind(&request.status)
        .bind(request.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_notification(&self, notification: &Notification) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO edu_analytics.notifications
            (id, recipient_type, recipient_id, recipient_email, message_type, subject, message)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(notification.id)
        .bind(&notification.recipient_type)
        .bind(&notification.recipient_id)
        .bind(&notification.recipient_email)
        .bind(&notification.message_type)
        .bind(&notification.subject)
        .bind(&notification.message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn requests_for_student(&self, student_id: &str) -> AppResult<Vec<CounselorRequest>> {
        let query = format!(
            "SELECT {REQUEST_COLUMNS} FROM edu_analytics.counselor_requests \
             WHERE student_id = $1 ORDER BY created_at DESC"
        );
        let rows = sqlx::query(&query)
            .bind(student_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(request_from_row).collect()
    }

    async fn requests_for_counselor(
        &self,
        counselor_id: &str,
    ) -> AppResult<Vec<CounselorRequest>> {
        let query = format!(
            "SELECT {REQUEST_COLUMNS} FROM edu_analytics.counselor_requests \
             WHERE assigned_counselor_id = $1 \
             ORDER BY CASE urgency_level WHEN 'high' THEN 2 WHEN 'medium' THEN 1 ELSE 0 END DESC, \
                      created_at DESC"
        );
        let rows = sqlx::query(&query)
            .bind(counselor_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(request_from_row).collect()
    }
}
