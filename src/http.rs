use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{FromRequest, FromRequestParts, Path, Query, Request, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use crate::aggregator::Aggregator;
use crate::counseling::{CounselingDesk, NewCounselorRequest, RequestFilter};
use crate::error::AppError;
use crate::models::{required, AttendanceRecord, UrgencyLevel};
use crate::responder::Responder;
use crate::risk;
use crate::store::with_retry;

const DEFAULT_HISTORY_LIMIT: usize = 30;

#[derive(Clone)]
pub struct AppState {
    pub aggregator: Aggregator,
    pub responder: Responder,
    pub counseling: CounselingDesk,
}

impl AppState {
    pub fn new(aggregator: Aggregator) -> Self {
        let counseling = CounselingDesk::new(aggregator.store().clone(), aggregator.retries());
        Self {
            responder: Responder::new(aggregator.clone()),
            counseling,
            aggregator,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/teacher/attendance", post(record_attendance))
        .route("/api/teacher/students", get(school_students))
        .route("/api/students/:student_id/progress", get(progress_overview))
        .route(
            "/api/students/:student_id/progress/recompute",
            post(recompute_progress),
        )
        .route(
            "/api/students/:student_id/progress/history",
            get(progress_history),
        )
        .route("/api/chatbot", post(chatbot))
        .route(
            "/api/counselor-requests",
            post(create_counselor_request).get(list_counselor_requests),
        )
        .with_state(state)
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Storage(detail) => {
                error!(detail = %detail, "request failed on storage");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = Json(json!({ "success": false, "error": self.public_message() }));
        (status, body).into_response()
    }
}

type ApiResult = Result<Response, AppError>;

/// `Json` whose rejections surface as validation errors in the API error shape.
struct ApiJson<T>(T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| AppError::validation(rejection.body_text()))?;
        Ok(Self(value))
    }
}

/// `Query` whose rejections surface as validation errors in the API error shape.
struct ApiQuery<T>(T);

#[async_trait]
impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| AppError::validation(rejection.body_text()))?;
        Ok(Self(value))
    }
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttendanceEntry {
    student_id: String,
    date: NaiveDate,
    present: bool,
    #[serde(default)]
    remarks: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttendanceSubmission {
    attendance_data: Option<Vec<AttendanceEntry>>,
    #[serde(default)]
    teacher_id: String,
}

async fn record_attendance(
    State(state): State<AppState>,
    ApiJson(submission): ApiJson<AttendanceSubmission>,
) -> ApiResult {
    let entries = submission
        .attendance_data
        .ok_or_else(|| AppError::validation("attendanceData array is required"))?;
    let records = entries
        .into_iter()
        .map(|entry| {
            AttendanceRecord::new(entry.student_id, entry.date, entry.present, entry.remarks)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let outcome = state
        .aggregator
        .batch_record_attendance(records, &submission.teacher_id)
        .await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Attendance recorded for {} students", outcome.rows_written),
        "rowsWritten": outcome.rows_written,
        "recomputeFailures": outcome.recompute_failures,
    }))
    .into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SchoolQuery {
    school_id: Option<String>,
}

async fn school_students(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<SchoolQuery>,
) -> ApiResult {
    let school_id = required("schoolId", query.school_id.unwrap_or_default())?;
    let store = state.aggregator.store().as_ref();
    let school = school_id.as_str();
    let students = with_retry("school_roster", state.aggregator.retries(), move || {
        store.school_roster(school)
    })
    .await?;
    Ok(Json(json!({ "success": true, "students": students })).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WindowQuery {
    window_days: Option<i64>,
}

async fn progress_overview(
    State(state): State<AppState>,
    Path(student_id): Path<String>,
    ApiQuery(query): ApiQuery<WindowQuery>,
) -> ApiResult {
    let window_days = query
        .window_days
        .unwrap_or(state.aggregator.scoring().window_days);
    let overview = state
        .aggregator
        .progress_overview(&student_id, window_days, DEFAULT_HISTORY_LIMIT)
        .await?;
    Ok(Json(json!({ "success": true, "data": overview })).into_response())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecomputeRequest {
    window_days: Option<i64>,
    as_of: Option<NaiveDate>,
}

async fn recompute_progress(
    State(state): State<AppState>,
    Path(student_id): Path<String>,
    body: Bytes,
) -> ApiResult {
    // An absent body means defaults; anything else has to parse.
    let request: RecomputeRequest = if body.iter().all(u8::is_ascii_whitespace) {
        RecomputeRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|err| AppError::validation(format!("invalid recompute request: {err}")))?
    };
    let snapshot = state
        .aggregator
        .compute_snapshot(
            &student_id,
            request
                .window_days
                .unwrap_or(state.aggregator.scoring().window_days),
            request.as_of.unwrap_or_else(risk::today),
        )
        .await?;
    Ok(Json(json!({ "success": true, "snapshot": snapshot })).into_response())
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn progress_history(
    State(state): State<AppState>,
    Path(student_id): Path<String>,
    ApiQuery(query): ApiQuery<HistoryQuery>,
) -> ApiResult {
    let history = state
        .aggregator
        .snapshot_history(&student_id, query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
        .await?;
    Ok(Json(json!({ "success": true, "history": history })).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest {
    #[serde(default)]
    student_id: String,
    #[serde(default)]
    question: String,
    #[serde(rename = "type")]
    interaction_type: Option<String>,
}

async fn chatbot(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<ChatRequest>,
) -> ApiResult {
    let reply = state
        .responder
        .answer(
            &request.student_id,
            &request.question,
            request.interaction_type.as_deref(),
        )
        .await?;
    Ok(Json(json!({
        "success": true,
        "intent": reply.intent,
        "response": reply.response,
        "contextData": reply.context_data,
        "timestamp": reply.timestamp,
    }))
    .into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CounselorRequestBody {
    #[serde(default)]
    student_id: String,
    #[serde(default)]
    requester_type: String,
    requester_id: Option<String>,
    #[serde(default)]
    message: String,
    urgency_level: Option<String>,
}

async fn create_counselor_request(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<CounselorRequestBody>,
) -> ApiResult {
    let urgency = match body.urgency_level.as_deref() {
        Some(value) => value.parse::<UrgencyLevel>()?,
        None => UrgencyLevel::default(),
    };
    let receipt = state
        .counseling
        .create_request(NewCounselorRequest {
            student_id: body.student_id,
            requester_type: body.requester_type,
            requester_id: body.requester_id,
            message: body.message,
            urgency,
        })
        .await?;
    Ok(Json(json!({
        "success": true,
        "message": "Counselor request submitted successfully",
        "request": receipt.request,
        "assignedCounselor": receipt.assigned_counselor,
    }))
    .into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestListQuery {
    student_id: Option<String>,
    counselor_id: Option<String>,
}

async fn list_counselor_requests(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<RequestListQuery>,
) -> ApiResult {
    let filter = RequestFilter::from_params(query.student_id, query.counselor_id)?;
    let requests = state.counseling.list_requests(filter).await?;
    Ok(Json(json!({ "success": true, "requests": requests })).into_response())
}
