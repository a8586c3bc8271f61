use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use tracing::error;

use super::auth::{AdminGuard, AdminSession, AuthError};
use super::blacklist::BlacklistAddForm;
use super::domain::{format_timestamp, DraftForm, IdentityForm, TestId};
use super::repository::{IntakeRepository, RepositoryError};
use super::service::{IntakeError, WriterTestService};

/// Everything the intake endpoints need, shared across requests.
pub struct IntakeState<R> {
    pub tests: WriterTestService<R>,
    pub admin: AdminGuard,
}

impl<R> IntakeState<R>
where
    R: IntakeRepository + 'static,
{
    pub fn new(tests: WriterTestService<R>, admin: AdminGuard) -> Self {
        Self { tests, admin }
    }
}

/// Router builder exposing the applicant and administrator endpoints.
pub fn intake_router<R>(state: Arc<IntakeState<R>>) -> Router
where
    R: IntakeRepository + 'static,
{
    Router::new()
        .route("/api/writer-test/config", get(config_handler::<R>))
        .route(
            "/api/writer-test/set_open_flag",
            post(set_open_flag_handler::<R>),
        )
        .route("/api/writer-test/register", post(register_handler::<R>))
        .route("/api/writer-test/save_draft", post(save_draft_handler::<R>))
        .route("/api/writer-test/submit", post(submit_handler::<R>))
        .route("/api/writer-test/result", get(result_handler::<R>))
        .route("/api/writer-test/list", get(list_handler::<R>))
        .route("/api/writer-test/get", get(detail_handler::<R>))
        .route(
            "/api/writer-test/update_status",
            post(update_status_handler::<R>),
        )
        .route(
            "/api/writer-test/export_and_reset",
            get(export_and_reset_handler::<R>),
        )
        .route("/api/writer-test/delete", post(delete_handler::<R>))
        .route("/api/writer-test/delete_all", post(delete_all_handler::<R>))
        .route("/api/writer-test/blacklist", get(blacklist_list_handler::<R>))
        .route(
            "/api/writer-test/blacklist_add",
            post(blacklist_add_handler::<R>),
        )
        .route(
            "/api/writer-test/blacklist_remove",
            post(blacklist_remove_handler::<R>),
        )
        .route("/api/admin/login", post(login_handler::<R>))
        .route("/api/admin/logout", post(logout_handler::<R>))
        .with_state(state)
}

/// Success envelope: `{"ok": true, ...payload}`.
#[derive(Debug, Serialize)]
struct Envelope<T> {
    ok: bool,
    #[serde(flatten)]
    payload: T,
}

fn ok<T: Serialize>(payload: T) -> Response {
    (StatusCode::OK, Json(Envelope { ok: true, payload })).into_response()
}

/// Failure surfaced to clients as `{"ok": false, "reason": ...}`.
#[derive(Debug)]
pub enum ApiError {
    Intake(IntakeError),
    Auth(AuthError),
}

impl From<IntakeError> for ApiError {
    fn from(value: IntakeError) -> Self {
        Self::Intake(value)
    }
}

impl From<AuthError> for ApiError {
    fn from(value: AuthError) -> Self {
        Self::Auth(value)
    }
}

impl From<RepositoryError> for ApiError {
    fn from(value: RepositoryError) -> Self {
        Self::Intake(IntakeError::Repository(value))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Intake(err) => {
                let status = match &err {
                    IntakeError::InvalidInput
                    | IntakeError::NoTestId
                    | IntakeError::Closed
                    | IntakeError::GateOpen
                    | IntakeError::TooShort { .. } => StatusCode::BAD_REQUEST,
                    IntakeError::Blacklisted => StatusCode::FORBIDDEN,
                    IntakeError::NotFound => StatusCode::NOT_FOUND,
                    IntakeError::Repository(source) => {
                        error!(error = %source, "intake storage failure");
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };

                let payload = match &err {
                    IntakeError::TooShort {
                        char_count,
                        min_required,
                    } => json!({
                        "ok": false,
                        "reason": err.reason(),
                        "charCount": char_count,
                        "minRequired": min_required,
                    }),
                    _ => json!({ "ok": false, "reason": err.reason() }),
                };
                (status, Json(payload)).into_response()
            }
            ApiError::Auth(err) => {
                let status = match err {
                    AuthError::WrongPassword => StatusCode::UNAUTHORIZED,
                    AuthError::AdminOnly => StatusCode::FORBIDDEN,
                    AuthError::Unavailable => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, Json(json!({ "ok": false, "reason": err.reason() }))).into_response()
            }
        }
    }
}

fn require_admin<R>(state: &IntakeState<R>, headers: &HeaderMap) -> Result<AdminSession, ApiError> {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    Ok(state.admin.authorize(authorization)?)
}

/// Runs store-bound work on tokio's blocking pool. A failed join reports as a storage error.
pub(crate) async fn run_blocking<R, T, F>(
    state: &Arc<IntakeState<R>>,
    work: F,
) -> Result<T, ApiError>
where
    R: IntakeRepository + 'static,
    T: Send + 'static,
    F: FnOnce(&IntakeState<R>) -> Result<T, ApiError> + Send + 'static,
{
    let state = Arc::clone(state);
    tokio::task::spawn_blocking(move || work(&state))
        .await
        .map_err(|err| RepositoryError::Unavailable(format!("intake task join failed: {err}")))?
}

/// Unparseable or missing bodies fall back to an empty form, which then fails validation.
fn body_or_default<T: Default>(payload: Option<Json<T>>) -> T {
    payload.map(|Json(value)| value).unwrap_or_default()
}

/// Gate toggle body. A missing `test_open` key means open.
#[derive(Debug, Default, Deserialize)]
pub struct OpenFlagForm {
    #[serde(default, deserialize_with = "truthy_flag")]
    pub test_open: Option<bool>,
}

impl OpenFlagForm {
    /// Parses the raw body whatever its content type; empty or malformed bodies are rejected.
    pub fn from_body(body: &[u8]) -> Result<Self, IntakeError> {
        serde_json::from_slice(body).map_err(|_| IntakeError::InvalidInput)
    }

    pub fn open(&self) -> bool {
        self.test_open.unwrap_or(true)
    }
}

/// Accepts booleans, numbers (zero is false) and null (false). Anything else is an error.
fn truthy_flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(Some(false)),
        Value::Bool(flag) => Ok(Some(flag)),
        Value::Number(number) => Ok(Some(number.as_f64().is_some_and(|n| n != 0.0))),
        other => Err(serde::de::Error::custom(format!(
            "test_open must be a boolean or a number, got {other}"
        ))),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestIdQuery {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub test_id: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusForm {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct IdForm {
    #[serde(default)]
    pub id: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub password: Option<String>,
}

pub(crate) async fn config_handler<R>(
    State(state): State<Arc<IntakeState<R>>>,
) -> Result<Response, ApiError>
where
    R: IntakeRepository + 'static,
{
    let open = run_blocking(&state, |state| {
        state.tests.gate().is_open().map_err(ApiError::from)
    })
    .await?;
    Ok(ok(json!({ "test_open": open })))
}

pub(crate) async fn set_open_flag_handler<R>(
    State(state): State<Arc<IntakeState<R>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError>
where
    R: IntakeRepository + 'static,
{
    require_admin(&state, &headers)?;
    let open = OpenFlagForm::from_body(&body)?.open();
    run_blocking(&state, move |state| {
        state.tests.gate().set_open(open).map_err(ApiError::from)
    })
    .await?;
    Ok(ok(json!({ "test_open": open })))
}

pub(crate) async fn register_handler<R>(
    State(state): State<Arc<IntakeState<R>>>,
    payload: Option<Json<IdentityForm>>,
) -> Result<Response, ApiError>
where
    R: IntakeRepository + 'static,
{
    let form = body_or_default(payload);
    let registration = run_blocking(&state, move |state| {
        state.tests.register(&form).map_err(ApiError::from)
    })
    .await?;
    Ok(ok(registration.record.registration_view()))
}

pub(crate) async fn save_draft_handler<R>(
    State(state): State<Arc<IntakeState<R>>>,
    payload: Option<Json<DraftForm>>,
) -> Result<Response, ApiError>
where
    R: IntakeRepository + 'static,
{
    let form = body_or_default(payload);
    let char_count = run_blocking(&state, move |state| {
        state.tests.save_draft(&form).map_err(ApiError::from)
    })
    .await?;
    Ok(ok(json!({ "charCount": char_count })))
}

pub(crate) async fn submit_handler<R>(
    State(state): State<Arc<IntakeState<R>>>,
    payload: Option<Json<DraftForm>>,
) -> Result<Response, ApiError>
where
    R: IntakeRepository + 'static,
{
    let form = body_or_default(payload);
    let receipt = run_blocking(&state, move |state| {
        state.tests.submit(&form).map_err(ApiError::from)
    })
    .await?;
    Ok(ok(json!({
        "submittedAt": format_timestamp(&receipt.submitted_at),
        "charCount": receipt.char_count,
    })))
}

pub(crate) async fn result_handler<R>(
    State(state): State<Arc<IntakeState<R>>>,
    query: Option<Query<TestIdQuery>>,
) -> Result<Response, ApiError>
where
    R: IntakeRepository + 'static,
{
    let query = query.map(|Query(query)| query).unwrap_or_default();
    let id = TestId::from_raw(query.test_id);
    let record = run_blocking(&state, move |state| {
        state.tests.get(id).map_err(ApiError::from)
    })
    .await?;
    Ok(ok(record.result_view()))
}

pub(crate) async fn list_handler<R>(
    State(state): State<Arc<IntakeState<R>>>,
    headers: HeaderMap,
) -> Result<Response, ApiError>
where
    R: IntakeRepository + 'static,
{
    require_admin(&state, &headers)?;
    let records = run_blocking(&state, |state| state.tests.list().map_err(ApiError::from)).await?;
    let tests: Vec<_> = records.iter().map(|record| record.summary_view()).collect();
    Ok(ok(json!({ "tests": tests })))
}

pub(crate) async fn detail_handler<R>(
    State(state): State<Arc<IntakeState<R>>>,
    headers: HeaderMap,
    query: Option<Query<TestIdQuery>>,
) -> Result<Response, ApiError>
where
    R: IntakeRepository + 'static,
{
    require_admin(&state, &headers)?;
    let query = query.map(|Query(query)| query).unwrap_or_default();
    let id = TestId::from_raw(query.id).or_else(|| TestId::from_raw(query.test_id));
    let record = run_blocking(&state, move |state| {
        state.tests.get(id).map_err(ApiError::from)
    })
    .await?;
    Ok(ok(json!({ "test": record.detail_view() })))
}

pub(crate) async fn update_status_handler<R>(
    State(state): State<Arc<IntakeState<R>>>,
    headers: HeaderMap,
    payload: Option<Json<StatusForm>>,
) -> Result<Response, ApiError>
where
    R: IntakeRepository + 'static,
{
    require_admin(&state, &headers)?;
    let form = body_or_default(payload);
    run_blocking(&state, move |state| {
        state
            .tests
            .update_status(TestId::from_raw(form.id), form.status.as_deref())
            .map_err(ApiError::from)
    })
    .await?;
    Ok(ok(json!({})))
}

pub(crate) async fn export_and_reset_handler<R>(
    State(state): State<Arc<IntakeState<R>>>,
    headers: HeaderMap,
) -> Result<Response, ApiError>
where
    R: IntakeRepository + 'static,
{
    require_admin(&state, &headers)?;
    let bundle = run_blocking(&state, |state| {
        state.tests.export_and_reset().map_err(ApiError::from)
    })
    .await?;
    let disposition = format!("attachment; filename={}", bundle.file_name);

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bundle.csv,
    )
        .into_response())
}

pub(crate) async fn delete_handler<R>(
    State(state): State<Arc<IntakeState<R>>>,
    headers: HeaderMap,
    payload: Option<Json<IdForm>>,
) -> Result<Response, ApiError>
where
    R: IntakeRepository + 'static,
{
    require_admin(&state, &headers)?;
    let id = TestId::from_raw(body_or_default(payload).id);
    run_blocking(&state, move |state| {
        state.tests.delete(id).map_err(ApiError::from)
    })
    .await?;
    Ok(ok(json!({})))
}

pub(crate) async fn delete_all_handler<R>(
    State(state): State<Arc<IntakeState<R>>>,
    headers: HeaderMap,
) -> Result<Response, ApiError>
where
    R: IntakeRepository + 'static,
{
    require_admin(&state, &headers)?;
    let deleted = run_blocking(&state, |state| {
        state.tests.delete_all().map_err(ApiError::from)
    })
    .await?;
    Ok(ok(json!({ "deleted": deleted })))
}

pub(crate) async fn blacklist_list_handler<R>(
    State(state): State<Arc<IntakeState<R>>>,
    headers: HeaderMap,
) -> Result<Response, ApiError>
where
    R: IntakeRepository + 'static,
{
    require_admin(&state, &headers)?;
    let entries = run_blocking(&state, |state| {
        state.tests.blacklist().list().map_err(ApiError::from)
    })
    .await?;
    Ok(ok(json!({ "blacklist": entries })))
}

pub(crate) async fn blacklist_add_handler<R>(
    State(state): State<Arc<IntakeState<R>>>,
    headers: HeaderMap,
    payload: Option<Json<BlacklistAddForm>>,
) -> Result<Response, ApiError>
where
    R: IntakeRepository + 'static,
{
    require_admin(&state, &headers)?;
    let form = body_or_default(payload);
    let identity = run_blocking(&state, move |state| {
        state.tests.blacklist().add_from_form(&form).map_err(ApiError::from)
    })
    .await?;
    Ok(ok(json!({ "identity": identity })))
}

pub(crate) async fn blacklist_remove_handler<R>(
    State(state): State<Arc<IntakeState<R>>>,
    headers: HeaderMap,
    payload: Option<Json<IdentityForm>>,
) -> Result<Response, ApiError>
where
    R: IntakeRepository + 'static,
{
    require_admin(&state, &headers)?;
    let identity = body_or_default(payload)
        .identity()
        .ok_or(IntakeError::InvalidInput)?;
    let removed = run_blocking(&state, move |state| {
        state.tests.blacklist().remove(&identity).map_err(ApiError::from)
    })
    .await?;
    Ok(ok(json!({ "removed": removed })))
}

pub(crate) async fn login_handler<R>(
    State(state): State<Arc<IntakeState<R>>>,
    payload: Option<Json<LoginForm>>,
) -> Result<Response, ApiError>
where
    R: IntakeRepository + 'static,
{
    let password = body_or_default(payload).password.unwrap_or_default();
    let session = state.admin.login(&password)?;
    Ok(ok(json!({ "token": session.token() })))
}

pub(crate) async fn logout_handler<R>(
    State(state): State<Arc<IntakeState<R>>>,
    headers: HeaderMap,
) -> Result<Response, ApiError>
where
    R: IntakeRepository + 'static,
{
    let session = require_admin(&state, &headers)?;
    state.admin.logout(&session)?;
    Ok(ok(json!({})))
}
