//! HTTP routes.
//!
//! Every response is a JSON envelope: `{"success": true, "data": ...}` or
//! `{"success": false, "error": ..., "hint"?: ..., "conflicts"?: [...]}`.
//! POST routes require an `Authorization: Bearer <token>` header; the token
//! itself is verified upstream.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE},
        HeaderMap, HeaderName, HeaderValue, Method, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Duration;
use chrono_tz::Tz;
use schedule_engine::booking::{
    BookingError, BookingOutcome, BookingRequest, BookingResult, BookingStatus, OccurrenceReport,
};
use schedule_engine::conflict::{check_conflicts, CheckOptions};
use schedule_engine::hold::HoldReceipt;
use schedule_engine::model::{Conflict, ExistingSession, Participant, Session};
use schedule_engine::ports::RepositoryError;
use schedule_engine::suggest::{suggest_alternatives, AlternativeTime, SuggestionRequest};
use schedule_engine::zone::parse_timezone;
use schedule_engine::TimeInterval;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::state::AppState;

const IDEMPOTENCY_KEY: HeaderName = HeaderName::from_static("idempotency-key");
const CONFLICT_MESSAGE: &str = "Requested time is not available";
const UPSTREAM_HINT: &str = "Session storage is temporarily unavailable. Retry shortly.";

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/book", post(book))
        .route("/conflicts", post(conflicts))
        .route("/alternatives", post(alternatives))
        .route("/health", get(health))
        .with_state(state)
}

/// [`router`] plus request tracing and permissive CORS.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, IDEMPOTENCY_KEY])
        .expose_headers([IDEMPOTENCY_KEY]);
    router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

// ── Envelopes ───────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct Success<T> {
    success: bool,
    data: T,
}

fn ok<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(Success { success: true, data })).into_response()
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    status: StatusCode,
    success: bool,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    conflicts: Vec<Conflict>,
}

impl ApiError {
    fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            success: false,
            error: error.into(),
            hint: None,
            conflicts: Vec::new(),
        }
    }

    fn bad_request(error: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error)
    }

    fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    fn conflicted(conflicts: Vec<Conflict>) -> Self {
        Self {
            conflicts,
            ..Self::new(StatusCode::CONFLICT, CONFLICT_MESSAGE)
        }
    }

    fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Missing authorization token")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status;
        let mut response = (status, Json(self)).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

impl From<BookingError> for ApiError {
    fn from(error: BookingError) -> Self {
        let status =
            StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let hint = error.hint().map(str::to_string);
        let mut api = ApiError::new(status, error.to_string());
        api.hint = hint;
        api
    }
}

impl From<RepositoryError> for ApiError {
    fn from(error: RepositoryError) -> Self {
        ApiError::new(StatusCode::SERVICE_UNAVAILABLE, error.to_string()).with_hint(UPSTREAM_HINT)
    }
}

fn rejected(rejection: JsonRejection) -> ApiError {
    warn!(%rejection, "rejected request payload");
    match rejection {
        JsonRejection::JsonDataError(_) => ApiError::bad_request("Invalid request body"),
        _ => ApiError::bad_request("Invalid JSON body"),
    }
}

/// The bearer token, if the header carries a non-empty one.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

// ── /book ───────────────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BookData {
    idempotency_key: String,
    status: BookingStatus,
    session: Option<Session>,
    sessions: Vec<Session>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hold: Option<HoldReceipt>,
    holds: Vec<HoldReceipt>,
    occurrences: Vec<OccurrenceReport>,
}

impl From<BookingResult> for BookData {
    fn from(result: BookingResult) -> Self {
        Self {
            session: result.primary_session().cloned(),
            hold: result.holds.first().cloned(),
            idempotency_key: result.idempotency_key,
            status: result.status,
            sessions: result.sessions,
            holds: result.holds,
            occurrences: result.occurrences,
        }
    }
}

async fn book(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<BookingRequest>, JsonRejection>,
) -> Response {
    if bearer_token(&headers).is_none() {
        return ApiError::unauthorized().into_response();
    }
    let Json(mut request) = match body {
        Ok(body) => body,
        Err(rejection) => return rejected(rejection).into_response(),
    };

    let key = headers
        .get(&IDEMPOTENCY_KEY)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .or_else(|| Some(request.idempotency_key.trim().to_string()).filter(|key| !key.is_empty()))
        .unwrap_or_else(|| Uuid::now_v7().to_string());
    request.idempotency_key = key.clone();

    let mut response = match state.coordinator.book(request).await {
        Ok(BookingOutcome::Booked(result)) => ok(BookData::from(result)),
        Ok(BookingOutcome::Conflicted { conflicts }) => {
            info!(key = %key, conflicts = conflicts.len(), "booking conflicted");
            ApiError::conflicted(conflicts).into_response()
        }
        Err(err) => {
            if err.status_code() >= 500 {
                error!(key = %key, error = %err, "booking failed");
            } else {
                warn!(key = %key, error = %err, "booking rejected");
            }
            ApiError::from(err).into_response()
        }
    };

    if let Ok(value) = HeaderValue::from_str(&key) {
        response.headers_mut().insert(IDEMPOTENCY_KEY, value);
    }
    response
}

// ── /conflicts and /alternatives ────────────────────────────────────────────

/// A candidate slot for a known therapist/client pair.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotQuery {
    pub therapist_id: String,
    pub client_id: String,
    pub start_time: String,
    pub end_time: String,
    #[serde(default)]
    pub time_zone: Option<String>,
    #[serde(default)]
    pub exclude_session_id: Option<String>,
    #[serde(default)]
    pub max_results: Option<usize>,
}

struct ResolvedSlot {
    interval: TimeInterval,
    time_zone: Tz,
    therapist: Participant,
    client: Participant,
    existing: Vec<ExistingSession>,
}

impl ResolvedSlot {
    fn check(&self, exclude_session_id: Option<&str>) -> Vec<Conflict> {
        let mut options = CheckOptions::in_zone(self.time_zone);
        options.exclude_session_id = exclude_session_id.map(str::to_string);
        check_conflicts(&self.interval, &self.therapist, &self.client, &self.existing, &options)
    }
}

/// Look up the participants and their sessions within `reach` of the slot.
async fn resolve(state: &AppState, query: &SlotQuery, reach: Duration) -> Result<ResolvedSlot, ApiError> {
    let interval = TimeInterval::parse(&query.start_time, &query.end_time)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    let time_zone = parse_timezone(query.time_zone.as_deref().unwrap_or("UTC"))
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let therapist = state
        .directory
        .therapist(&query.therapist_id)
        .await?
        .ok_or_else(|| ApiError::bad_request(format!("Unknown therapist: {}", query.therapist_id)))?;
    let client = state
        .directory
        .client(&query.client_id)
        .await?
        .ok_or_else(|| ApiError::bad_request(format!("Unknown client: {}", query.client_id)))?;

    let window = TimeInterval::new(interval.start() - reach, interval.end() + reach).unwrap_or(interval);
    let existing = state
        .sessions
        .sessions_for(&therapist.id, &client.id, &window)
        .await?;

    Ok(ResolvedSlot {
        interval,
        time_zone,
        therapist,
        client,
        existing,
    })
}

#[derive(Serialize)]
struct ConflictsData {
    conflicts: Vec<Conflict>,
}

async fn conflicts(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<SlotQuery>, JsonRejection>,
) -> Response {
    if bearer_token(&headers).is_none() {
        return ApiError::unauthorized().into_response();
    }
    let Json(query) = match body {
        Ok(body) => body,
        Err(rejection) => return rejected(rejection).into_response(),
    };

    match resolve(&state, &query, Duration::zero()).await {
        Ok(slot) => ok(ConflictsData {
            conflicts: slot.check(query.exclude_session_id.as_deref()),
        }),
        Err(err) => err.into_response(),
    }
}

#[derive(Serialize)]
struct AlternativesData {
    conflicts: Vec<Conflict>,
    alternatives: Vec<AlternativeTime>,
}

async fn alternatives(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<SlotQuery>, JsonRejection>,
) -> Response {
    if bearer_token(&headers).is_none() {
        return ApiError::unauthorized().into_response();
    }
    let Json(query) = match body {
        Ok(body) => body,
        Err(rejection) => return rejected(rejection).into_response(),
    };

    let mut options = state.config.suggest.clone();
    let reach = Duration::days(options.search_days.max(0) + 2);
    let slot = match resolve(&state, &query, reach).await {
        Ok(slot) => slot,
        Err(err) => return err.into_response(),
    };

    let conflicts = slot.check(query.exclude_session_id.as_deref());
    options.time_zone = slot.time_zone;
    options.exclude_session_id = query.exclude_session_id.clone();
    if let Some(max) = query.max_results {
        options.max_results = max;
    }
    let request = SuggestionRequest {
        rejected: slot.interval,
        conflicts: conflicts.clone(),
        therapist: slot.therapist,
        client: slot.client,
        existing: slot.existing,
        options,
    };
    let alternatives = suggest_alternatives(state.scorer.as_ref(), &request).await;

    ok(AlternativesData {
        conflicts,
        alternatives,
    })
}

async fn health() -> &'static str {
    "ok"
}
