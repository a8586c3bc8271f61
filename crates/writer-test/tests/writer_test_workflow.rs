//! End-to-end behavior of the intake lifecycle through the public service facade and HTTP
//! router, backed by an on-disk database so durability across reopen is covered too.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use writer_test::intake::{
    intake_router, AdminGuard, DraftForm, IdentityForm, IntakeError, IntakeState,
    SqliteIntakeRepository, TestRepository, TestStatus, WriterTestService, MIN_NON_WS_LENGTH,
};

fn identity(name: &str, birth_year: &str, phone_last4: &str) -> IdentityForm {
    IdentityForm {
        name: Some(name.to_string()),
        birth_year: Some(birth_year.to_string()),
        phone_last4: Some(phone_last4.to_string()),
    }
}

fn essay(visible: usize) -> String {
    "글".repeat(visible / 2) + "\n\n" + &"x ".repeat(visible - visible / 2)
}

async fn call(router: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("route executes");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("read body");
    let payload = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, payload)
}

fn post(uri: &str, token: Option<&str>, payload: Value) -> Request<Body> {
    let mut builder = Request::post(uri).header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder
        .body(Body::from(payload.to_string()))
        .expect("request builds")
}

#[test]
fn records_and_gate_survive_reopening_the_database() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("var").join("data").join("writer_test.db");

    let id = {
        let service = WriterTestService::new(Arc::new(
            SqliteIntakeRepository::open(&path).expect("open db"),
        ));
        let id = service
            .register(&identity("Kim", "1990", "1234"))
            .expect("registered")
            .record
            .id;
        service
            .submit(&DraftForm {
                test_id: Some(id.0),
                title: Some("On Rivers".to_string()),
                body: Some(essay(MIN_NON_WS_LENGTH)),
            })
            .expect("submitted");
        service.gate().set_open(false).expect("close gate");
        id
    };

    let repository = Arc::new(SqliteIntakeRepository::open(&path).expect("reopen db"));
    let service = WriterTestService::new(repository.clone());

    assert!(!service.gate().is_open().expect("gate read"));
    let record = service.get(Some(id)).expect("record persisted");
    assert_eq!(record.char_count, MIN_NON_WS_LENGTH);
    assert!(record.submitted_at.is_some());
    assert!(matches!(
        service.register(&identity("Lee", "1985", "9876")),
        Err(IntakeError::Closed)
    ));

    let bundle = service.export_and_reset().expect("export");
    assert_eq!(bundle.cleared, 1);
    assert!(bundle.csv.contains("On Rivers"));
    assert!(repository.list().expect("list").is_empty());
}

#[test]
fn concurrent_first_registrations_share_one_record() {
    let dir = tempfile::tempdir().expect("temp dir");
    let repository =
        Arc::new(SqliteIntakeRepository::open(dir.path().join("writer_test.db")).expect("db"));
    let service = Arc::new(WriterTestService::new(repository.clone()));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let service = Arc::clone(&service);
            std::thread::spawn(move || {
                service
                    .register(&identity("Kim", "1990", "1234"))
                    .expect("registered")
                    .record
                    .id
            })
        })
        .collect();

    let ids: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().expect("thread completes"))
        .collect();

    assert!(ids.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(repository.list().expect("list").len(), 1);
}

#[tokio::test]
async fn reviewer_workflow_over_http() {
    let repository = Arc::new(SqliteIntakeRepository::open_in_memory().expect("in-memory db"));
    let state = Arc::new(IntakeState::new(
        WriterTestService::new(repository.clone()),
        AdminGuard::new("panel-secret"),
    ));
    let router = intake_router(state);

    let (status, registered) = call(
        &router,
        post(
            "/api/writer-test/register",
            None,
            json!({ "name": "Kim", "birthYear": "1990", "phoneLast4": "1234" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let test_id = registered["testId"].as_i64().expect("test id");

    let (status, resumed) = call(
        &router,
        post(
            "/api/writer-test/register",
            None,
            json!({ "name": "Kim", "birthYear": "1990", "phoneLast4": "1234" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resumed["testId"], json!(test_id));

    let (_, login) = call(
        &router,
        post(
            "/api/admin/login",
            None,
            json!({ "password": "panel-secret" }),
        ),
    )
    .await;
    let token = login["token"].as_str().expect("token").to_string();

    let (status, _) = call(
        &router,
        post(
            "/api/writer-test/blacklist_add",
            Some(&token),
            json!({ "id": test_id, "reason": "shared answers" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let stored = repository
        .fetch(writer_test::intake::TestId(test_id))
        .expect("fetch")
        .expect("record kept after blacklisting");
    assert_eq!(stored.status, TestStatus::Pending);

    let (status, payload) = call(
        &router,
        post(
            "/api/writer-test/register",
            None,
            json!({ "name": "Kim", "birthYear": "1990", "phoneLast4": "1234" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(payload["reason"], json!("blacklisted"));

    let (status, payload) = call(
        &router,
        post("/api/writer-test/delete_all", Some(&token), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(payload["reason"], json!("test_open"));

    let (status, _) = call(
        &router,
        post(
            "/api/writer-test/set_open_flag",
            Some(&token),
            json!({ "test_open": false }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, payload) = call(
        &router,
        post("/api/writer-test/delete_all", Some(&token), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["deleted"], json!(1));
    assert!(repository.list().expect("list").is_empty());
}
