use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{required, Counselor, CounselorRequest, Notification, UrgencyLevel};
use crate::store::{with_retry, ProgressStore};

#[derive(Debug, Clone)]
pub struct NewCounselorRequest {
    pub student_id: String,
    pub requester_type: String,
    pub requester_id: Option<String>,
    pub message: String,
    pub urgency: UrgencyLevel,
}

#[derive(Debug, Clone)]
pub enum RequestFilter {
    Student(String),
    Counselor(String),
}

impl RequestFilter {
    /// Exactly one of the two ids must be given.
    pub fn from_params(
        student_id: Option<String>,
        counselor_id: Option<String>,
    ) -> AppResult<Self> {
        let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());
        match (non_empty(student_id), non_empty(counselor_id)) {
            (Some(student), None) => Ok(Self::Student(student)),
            (None, Some(counselor)) => Ok(Self::Counselor(counselor)),
            _ => Err(AppError::validation(
                "Either studentId or counselorId parameter is required",
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestReceipt {
    pub request: CounselorRequest,
    pub assigned_counselor: Option<Counselor>,
    pub notifications_queued: usize,
}

/// Files counseling requests and queues the matching notifications.
#[derive(Clone)]
pub struct CounselingDesk {
    store: Arc<dyn ProgressStore>,
    retries: u32,
}

impl CounselingDesk {
    pub fn new(store: Arc<dyn ProgressStore>, retries: u32) -> Self {
        Self { store, retries }
    }

    pub async fn create_request(&self, input: NewCounselorRequest) -> AppResult<RequestReceipt> {
        let student_id = required("studentId", input.student_id)?;
        let requester_type = required("requesterType", input.requester_type)?;
        let message = required("message", input.message)?;

        let store = self.store.as_ref();
        let lookup_id = student_id.as_str();
        let student = with_retry("find_student", self.retries, move || {
            store.find_student(lookup_id)
        })
        .await?
        .ok_or_else(|| AppError::not_found(format!("student {student_id} not found")))?;

        let school_id = student.school_id.as_str();
        let counselor = with_retry("counselor_for_school", self.retries, move || {
            store.counselor_for_school(school_id)
        })
        .await?;

        let request = CounselorRequest {
            id: Uuid::new_v4(),
            student_id: student_id.clone(),
            requester_type,
            requester_id: input.requester_id.filter(|id| !id.trim().is_empty()),
            message,
            urgency_level: input.urgency,
            assigned_counselor_id: counselor.as_ref().map(|c| c.counselor_id.clone()),
            status: "pending".to_string(),
            created_at: Utc::now(),
        };
        let pending = &request;
        with_retry("insert_counselor_request", self.retries, move || {
            store.insert_counselor_request(pending)
        })
        .await?;

        let mut notifications = Vec::new();
        if let Some(counselor) = &counselor {
            notifications.push(Notification {
                id: Uuid::new_v4(),
                recipient_type: "counselor".to_string(),
                recipient_id: Some(counselor.counselor_id.clone()),
                recipient_email: counselor.email.clone(),
                message_type: "counselor_request".to_string(),
                subject: format!("New Counseling Request - {} Priority", request.urgency_level),
                message: format!(
                    "New counseling request for student {} ({}) from {}. Message: {}",
                    student.name, student.student_id, student.school_name, request.message
                ),
            });

            if request.urgency_level == UrgencyLevel::High {
                if let Some(parent_email) = &student.parent_email {
                    notifications.push(Notification {
                        id: Uuid::new_v4(),
                        recipient_type: "parent".to_string(),
                        recipient_id: None,
                        recipient_email: parent_email.clone(),
                        message_type: "counselor_request".to_string(),
                        subject: format!("Counseling Request for {}", student.name),
                        message: format!(
                            "Your child {} has requested counseling support. The school \
                             counselor has been notified and will reach out soon.",
                            student.name
                        ),
                    });
                }
            }
        }

        for notification in &notifications {
            with_retry("insert_notification", self.retries, move || {
                store.insert_notification(notification)
            })
            .await?;
        }

        info!(
            student_id = %student_id,
            urgency = %request.urgency_level,
            assigned = counselor.is_some(),
            "counselor request created"
        );
        Ok(RequestReceipt {
            request,
            assigned_counselor: counselor,
            notifications_queued: notifications.len(),
        })
    }

    pub async fn list_requests(&self, filter: RequestFilter) -> AppResult<Vec<CounselorRequest>> {
        let store = self.store.as_ref();
        match &filter {
            RequestFilter::Student(student_id) => {
                with_retry("requests_for_student", self.retries, move || {
                    store.requests_for_student(student_id)
                })
                .await
            }
            RequestFilter::Counselor(counselor_id) => {
                with_retry("requests_for_counselor", self.retries, move || {
                    store.requests_for_counselor(counselor_id)
                })
                .await
            }
        }
    }
}
