use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{header, Request};
use axum::response::Response;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde_json::Value;
use tower::ServiceExt;

use crate::intake::auth::AdminGuard;
use crate::intake::domain::{
    BlacklistEntry, Clock, Draft, DraftForm, Identity, IdentityForm, TestId, TestRecord,
    TestStatus,
};
use crate::intake::repository::{
    BlacklistRepository, GateRepository, Registration, RepositoryError, TestRepository,
};
use crate::intake::router::{intake_router, IntakeState};
use crate::intake::service::WriterTestService;
use crate::intake::sqlite::SqliteIntakeRepository;

pub(super) const ADMIN_PASSWORD: &str = "review-board";

/// Clock that advances one minute per reading.
pub(super) struct SteppingClock {
    current: Mutex<NaiveDateTime>,
}

impl SteppingClock {
    pub(super) fn starting_at(start: NaiveDateTime) -> Self {
        Self {
            current: Mutex::new(start),
        }
    }
}

impl Clock for SteppingClock {
    fn now(&self) -> NaiveDateTime {
        let mut guard = self.current.lock().expect("clock mutex poisoned");
        let now = *guard;
        *guard = now + Duration::minutes(1);
        now
    }
}

pub(super) fn start_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 11, 3)
        .expect("valid date")
        .and_hms_opt(9, 0, 0)
        .expect("valid time")
}

pub(super) fn build_service() -> (
    WriterTestService<SqliteIntakeRepository>,
    Arc<SqliteIntakeRepository>,
) {
    let repository = Arc::new(SqliteIntakeRepository::open_in_memory().expect("in-memory db"));
    let service = WriterTestService::with_clock(
        repository.clone(),
        Arc::new(SteppingClock::starting_at(start_time())),
    );
    (service, repository)
}

pub(super) fn identity_form(name: &str, birth_year: &str, phone_last4: &str) -> IdentityForm {
    IdentityForm {
        name: Some(name.to_string()),
        birth_year: Some(birth_year.to_string()),
        phone_last4: Some(phone_last4.to_string()),
    }
}

pub(super) fn kim() -> IdentityForm {
    identity_form("Kim", "1990", "1234")
}

pub(super) fn kim_identity() -> Identity {
    kim().identity().expect("complete identity")
}

/// Body with exactly `visible` non-whitespace characters, padded with spacing.
pub(super) fn body_with(visible: usize) -> String {
    let mut body = String::with_capacity(visible * 2);
    for index in 0..visible {
        body.push('가');
        match index % 10 {
            9 => body.push('\n'),
            4 => body.push('\t'),
            _ => body.push(' '),
        }
    }
    body
}

pub(super) fn draft_form(id: TestId, title: &str, body: &str) -> DraftForm {
    DraftForm {
        test_id: Some(id.0),
        title: Some(title.to_string()),
        body: Some(body.to_string()),
    }
}

pub(super) fn build_state() -> (Arc<IntakeState<SqliteIntakeRepository>>, Arc<SqliteIntakeRepository>) {
    let (service, repository) = build_service();
    let state = Arc::new(IntakeState::new(service, AdminGuard::new(ADMIN_PASSWORD)));
    (state, repository)
}

pub(super) fn router_with_state(state: Arc<IntakeState<SqliteIntakeRepository>>) -> axum::Router {
    intake_router(state)
}

pub(super) async fn send(router: &axum::Router, request: Request<Body>) -> Response {
    router
        .clone()
        .oneshot(request)
        .await
        .expect("route executes")
}

pub(super) fn post_json(uri: &str, token: Option<&str>, payload: Value) -> Request<Body> {
    let mut builder = Request::post(uri).header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder
        .body(Body::from(serde_json::to_vec(&payload).expect("json encodes")))
        .expect("request builds")
}

pub(super) fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::get(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).expect("request builds")
}

pub(super) async fn read_body(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("read body")
        .to_vec()
}

pub(super) async fn read_json_body(response: Response) -> Value {
    serde_json::from_slice(&read_body(response).await).expect("json payload")
}

pub(super) async fn admin_token(router: &axum::Router) -> String {
    let response = send(
        router,
        post_json(
            "/api/admin/login",
            None,
            serde_json::json!({ "password": ADMIN_PASSWORD }),
        ),
    )
    .await;
    let payload = read_json_body(response).await;
    payload
        .get("token")
        .and_then(Value::as_str)
        .expect("login returns token")
        .to_string()
}

/// Repository whose storage is always down.
pub(super) struct UnavailableRepository;

fn offline<T>() -> Result<T, RepositoryError> {
    Err(RepositoryError::Unavailable("database offline".to_string()))
}

impl GateRepository for UnavailableRepository {
    fn is_test_open(&self) -> Result<bool, RepositoryError> {
        offline()
    }

    fn set_test_open(&self, _open: bool) -> Result<(), RepositoryError> {
        offline()
    }
}

impl TestRepository for UnavailableRepository {
    fn find_or_create(
        &self,
        _identity: &Identity,
        _created_at: NaiveDateTime,
    ) -> Result<Registration, RepositoryError> {
        offline()
    }

    fn fetch(&self, _id: TestId) -> Result<Option<TestRecord>, RepositoryError> {
        offline()
    }

    fn list(&self) -> Result<Vec<TestRecord>, RepositoryError> {
        offline()
    }

    fn save_draft(&self, _id: TestId, _draft: &Draft) -> Result<bool, RepositoryError> {
        offline()
    }

    fn record_submission(
        &self,
        _id: TestId,
        _draft: &Draft,
        _submitted_at: NaiveDateTime,
    ) -> Result<bool, RepositoryError> {
        offline()
    }

    fn update_status(&self, _id: TestId, _status: TestStatus) -> Result<bool, RepositoryError> {
        offline()
    }

    fn delete(&self, _id: TestId) -> Result<bool, RepositoryError> {
        offline()
    }

    fn drain(
        &self,
        _export: &mut dyn FnMut(&[TestRecord]) -> Result<(), RepositoryError>,
    ) -> Result<usize, RepositoryError> {
        offline()
    }
}

impl BlacklistRepository for UnavailableRepository {
    fn is_blacklisted(&self, _identity: &Identity) -> Result<bool, RepositoryError> {
        offline()
    }

    fn add_blacklist(
        &self,
        _identity: &Identity,
        _reason: &str,
        _created_on: NaiveDate,
    ) -> Result<(), RepositoryError> {
        offline()
    }

    fn remove_blacklist(&self, _identity: &Identity) -> Result<usize, RepositoryError> {
        offline()
    }

    fn list_blacklist(&self) -> Result<Vec<BlacklistEntry>, RepositoryError> {
        offline()
    }
}
