use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info};
use uuid::Uuid;

use crate::aggregator::Aggregator;
use crate::error::{AppError, AppResult};
use crate::models::{required, ChatInteraction, RiskLevel, Student};
use crate::risk;
use crate::store::with_retry;

const CHAT_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Attendance,
    Marks,
    Help,
    Progress,
    Practice,
    Greeting,
}

/// Keyword groups in priority order; the first group with a match wins.
const INTENTS: &[(Intent, &[&str])] = &[
    (Intent::Attendance, &["attendance", "present"]),
    (Intent::Marks, &["marks", "score", "grade"]),
    (Intent::Help, &["help", "counselor", "support"]),
    (Intent::Progress, &["progress", "performance"]),
    (Intent::Practice, &["mcq", "question", "practice"]),
];

pub fn classify(question: &str) -> Intent {
    let lowered = question.to_lowercase();
    INTENTS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|keyword| lowered.contains(keyword)))
        .map(|(intent, _)| *intent)
        .unwrap_or(Intent::Greeting)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub intent: Intent,
    pub response: String,
    pub context_data: Value,
    pub timestamp: DateTime<Utc>,
}

/// Rule-based answers to student questions, with every exchange logged.
#[derive(Clone)]
pub struct Responder {
    aggregator: Aggregator,
}

impl Responder {
    pub fn new(aggregator: Aggregator) -> Self {
        Self { aggregator }
    }

    pub async fn answer(
        &self,
        student_id: &str,
        question: &str,
        interaction_type: Option<&str>,
    ) -> AppResult<ChatReply> {
        let student_id = required("studentId", student_id.to_string())?;
        let question = required("question", question.to_string())?;
        let interaction_type = interaction_type
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or("query")
            .to_string();

        let store = self.aggregator.store().as_ref();
        let retries = self.aggregator.retries();
        let lookup_id = student_id.as_str();
        let student = with_retry("find_student", retries, move || {
            store.find_student(lookup_id)
        })
        .await?
        .ok_or_else(|| AppError::not_found(format!("student {student_id} not found")))?;

        let intent = classify(&question);
        let (response, context_data) = match self.respond(intent, &student).await {
            Ok(reply) => reply,
            Err(err) => {
                error!(
                    student_id = %student_id,
                    intent = ?intent,
                    error = %err,
                    "chat lookup failed"
                );
                (
                    "Sorry, I couldn't look that up right now. Please try again in a moment."
                        .to_string(),
                    json!({}),
                )
            }
        };

        let interaction = ChatInteraction {
            id: Uuid::new_v4(),
            student_id: student_id.clone(),
            question,
            response,
            interaction_type,
            context_data,
        };
        let logged = &interaction;
        with_retry("log_interaction", retries, move || {
            store.log_interaction(logged)
        })
        .await?;

        info!(student_id = %student_id, intent = ?intent, "chat question answered");
        Ok(ChatReply {
            intent,
            response: interaction.response,
            context_data: interaction.context_data,
            timestamp: Utc::now(),
        })
    }

    async fn respond(&self, intent: Intent, student: &Student) -> AppResult<(String, Value)> {
        match intent {
            Intent::Attendance => self.attendance_reply(student).await,
            Intent::Marks => self.marks_reply(student).await,
            Intent::Help => Ok((help_text(student), json!({}))),
            Intent::Progress => self.progress_reply(student).await,
            Intent::Practice => self.practice_reply(student).await,
            Intent::Greeting => Ok((
                format!(
                    "Hello {}! I can help you with information about your attendance, marks, \
                     progress, and provide practice questions. What would you like to know?",
                    student.name
                ),
                json!({}),
            )),
        }
    }

    async fn attendance_reply(&self, student: &Student) -> AppResult<(String, Value)> {
        let records = self
            .aggregator
            .window_attendance(&student.student_id, CHAT_WINDOW_DAYS, risk::today())
            .await?;
        let present = records.iter().filter(|record| record.present).count();
        let total = records.len();
        let rate = risk::attendance_rate(&records).round() as i64;

        Ok((
            format!(
                "Hi {}! Your attendance rate for the last {} days is {}%. \
                 You were present for {} out of {} days.",
                student.name, CHAT_WINDOW_DAYS, rate, present, total
            ),
            json!({ "attendanceRate": rate, "presentDays": present, "totalDays": total }),
        ))
    }

    async fn marks_reply(&self, student: &Student) -> AppResult<(String, Value)> {
        let marks = self
            .aggregator
            .window_marks(&student.student_id, CHAT_WINDOW_DAYS, risk::today())
            .await?;
        let average = risk::academic_performance(&marks).round() as i64;

        Ok((
            format!(
                "Your average score in recent assessments is {average}%. Keep up the good work \
                 and focus on areas where you can improve!"
            ),
            json!({ "averageScore": average }),
        ))
    }

    async fn progress_reply(&self, student: &Student) -> AppResult<(String, Value)> {
        let store = self.aggregator.store().as_ref();
        let student_id = student.student_id.as_str();
        let latest = with_retry("latest_snapshot", self.aggregator.retries(), move || {
            store.latest_snapshot(student_id)
        })
        .await?;

        let Some(snapshot) = latest else {
            return Ok((
                "I don't have enough progress data yet. Keep attending classes and completing \
                 assessments!"
                    .to_string(),
                json!({}),
            ));
        };

        let advice = match snapshot.risk_level {
            RiskLevel::Safe => "You're doing great!",
            RiskLevel::Warning => "You need to focus more on your studies.",
            RiskLevel::AtRisk => {
                "Please consider speaking with a counselor for additional support."
            }
        };
        Ok((
            format!(
                "Your current overall score is {}/100. Status: {}. {}",
                snapshot.overall_score, snapshot.risk_level, advice
            ),
            json!({
                "overallScore": snapshot.overall_score,
                "riskLevel": snapshot.risk_level,
            }),
        ))
    }

    async fn practice_reply(&self, student: &Student) -> AppResult<(String, Value)> {
        let store = self.aggregator.store().as_ref();
        let class_level = student.class_level;
        let board = student.board.as_str();
        let mcq = with_retry("random_mcq", self.aggregator.retries(), move || {
            store.random_mcq(class_level, board)
        })
        .await?;

        let Some(mcq) = mcq else {
            return Ok((
                "I don't have any practice questions available for your class right now. \
                 Please check back later!"
                    .to_string(),
                json!({}),
            ));
        };

        Ok((
            format!(
                "Here's a practice question for you:\n\n{}\n\nA) {}\nB) {}\nC) {}\nD) {}\n\n\
                 Think about it and let me know your answer!",
                mcq.question, mcq.option_a, mcq.option_b, mcq.option_c, mcq.option_d
            ),
            json!({
                "mcqId": mcq.id,
                "correctAnswer": mcq.correct_answer,
                "subject": mcq.subject,
            }),
        ))
    }
}

fn help_text(student: &Student) -> String {
    format!(
        "I'm here to help you, {}! You can ask me about your attendance, marks, or academic \
         progress. If you need to speak with a counselor, you can use the \"Ask Counselor\" \
         button on your dashboard.",
        student.name
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use super::*;
    use crate::config::ScoringConfig;
    use crate::memory::MemoryStore;
    use crate::models::{McqQuestion, ProgressSnapshot};

    fn setup() -> (Arc<MemoryStore>, Responder) {
        let store = Arc::new(MemoryStore::default());
        store.add_student("STU001", "SCH001", "active");
        let aggregator = Aggregator::new(store.clone(), ScoringConfig::default(), 1);
        (store, Responder::new(aggregator))
    }

    #[test]
    fn earlier_keyword_groups_win_regardless_of_position() {
        assert_eq!(classify("what are my marks and attendance?"), Intent::Attendance);
        assert_eq!(classify("Attendance vs marks"), Intent::Attendance);
        assert_eq!(classify("I need help with my grade"), Intent::Marks);
        assert_eq!(classify("show my progress and practice questions"), Intent::Progress);
        assert_eq!(classify("give me an MCQ"), Intent::Practice);
        assert_eq!(classify("good morning"), Intent::Greeting);
    }

    #[test]
    fn matching_is_substring_based() {
        assert_eq!(classify("was I PRESENT yesterday"), Intent::Attendance);
        assert_eq!(classify("supportive teachers"), Intent::Help);
    }

    #[tokio::test]
    async fn attendance_question_reports_window_rate() {
        let (store, responder) = setup();
        let today = risk::today();
        for i in 0..4 {
            store.add_attendance("STU001", today - Duration::days(i), i != 0);
        }

        let reply = responder
            .answer("STU001", "How is my attendance and marks?", None)
            .await
            .unwrap();
        assert_eq!(reply.intent, Intent::Attendance);
        assert!(reply.response.contains("75%"));
        assert!(reply.response.contains("3 out of 4 days"));
        assert_eq!(reply.context_data["totalDays"], 4);

        let log = store.interactions.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].interaction_type, "query");
        assert_eq!(log[0].context_data["attendanceRate"], 75);
    }

    #[tokio::test]
    async fn marks_question_uses_aggregate_ratio() {
        let (store, responder) = setup();
        let today = risk::today();
        store.add_mark("STU001", 10.0, 10.0, today);
        store.add_mark("STU001", 45.0, 90.0, today - Duration::days(2));

        let reply = responder
            .answer("STU001", "what's my grade", Some("quick"))
            .await
            .unwrap();
        assert_eq!(reply.context_data["averageScore"], 55);
        assert_eq!(store.interactions.lock().unwrap()[0].interaction_type, "quick");
    }

    #[tokio::test]
    async fn progress_question_reads_latest_snapshot() {
        let (store, responder) = setup();
        let reply = responder.answer("STU001", "my progress?", None).await.unwrap();
        assert!(reply.response.contains("don't have enough progress data"));

        store.snapshots.lock().unwrap().insert(
            ("STU001".to_string(), risk::today()),
            ProgressSnapshot {
                student_id: "STU001".to_string(),
                date_recorded: risk::today(),
                overall_score: 52,
                attendance_percentage: 70,
                academic_performance: 44,
                behavior_score: 80,
                risk_level: RiskLevel::Warning,
            },
        );
        let reply = responder.answer("STU001", "my progress?", None).await.unwrap();
        assert!(reply.response.contains("52/100"));
        assert!(reply.response.contains("Status: warning"));
        assert_eq!(reply.context_data["riskLevel"], "warning");
    }

    #[tokio::test]
    async fn practice_question_serves_matching_mcq() {
        let (store, responder) = setup();
        store.mcqs.lock().unwrap().push(McqQuestion {
            id: Uuid::new_v4(),
            class_level: 8,
            board: "CBSE".to_string(),
            subject: "Science".to_string(),
            question: "Which gas do plants absorb?".to_string(),
            option_a: "Oxygen".to_string(),
            option_b: "Carbon dioxide".to_string(),
            option_c: "Nitrogen".to_string(),
            option_d: "Helium".to_string(),
            correct_answer: "B".to_string(),
        });

        let reply = responder.answer("STU001", "practice time", None).await.unwrap();
        assert!(reply.response.contains("Which gas do plants absorb?"));
        assert!(reply.response.contains("B) Carbon dioxide"));
        assert_eq!(reply.context_data["correctAnswer"], "B");
    }

    #[tokio::test]
    async fn failed_lookup_still_logs_interaction() {
        let (store, responder) = setup();
        *store.fail_marks.lock().unwrap() = true;

        let reply = responder.answer("STU001", "my marks", None).await.unwrap();
        assert!(reply.response.starts_with("Sorry"));
        assert_eq!(store.interactions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rejects_unknown_students_and_blank_questions() {
        let (store, responder) = setup();
        let missing = responder.answer("STU404", "hello", None).await;
        assert!(matches!(missing, Err(AppError::NotFound(_))));
        let blank = responder.answer("STU001", "   ", None).await;
        assert!(matches!(blank, Err(AppError::Validation(_))));
        assert!(store.interactions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unmatched_question_gets_greeting() {
        let (_store, responder) = setup();
        let reply = responder.answer("STU001", "hi there", None).await.unwrap();
        assert_eq!(reply.intent, Intent::Greeting);
        assert!(reply.response.starts_with("Hello Student STU001!"));
    }
}
