use crate::infra::{AppState, CorsPolicy};
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode, Uri};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Extension, Json};
use serde_json::json;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use writer_test::error::AppError;
use writer_test::intake::{intake_router, IntakeRepository, IntakeState};

const APPLICANT_PAGE: &str = "index.html";
const ADMIN_LOGIN_PAGE: &str = "admin_login.html";
const ADMIN_PAGE: &str = "admin_test.html";

pub(crate) fn with_site_routes<R>(state: Arc<IntakeState<R>>, cors: CorsPolicy) -> axum::Router
where
    R: IntakeRepository + 'static,
{
    intake_router(state)
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
        .route("/", get(applicant_page))
        .route("/admin_login", get(admin_login_page))
        .route("/admin", get(admin_page))
        .route("/admin_test.html", get(redirect_to_login))
        .route("/static/admin_test.html", get(redirect_to_login))
        .fallback(static_asset)
        .layer(middleware::from_fn_with_state(cors, cors_headers))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

pub(crate) async fn applicant_page(
    Extension(state): Extension<AppState>,
) -> Result<Response, AppError> {
    serve_file(&state.static_dir.join(APPLICANT_PAGE)).await
}

pub(crate) async fn admin_login_page(
    Extension(state): Extension<AppState>,
) -> Result<Response, AppError> {
    serve_file(&state.static_dir.join(ADMIN_LOGIN_PAGE)).await
}

/// The page itself is public; every admin API call it makes carries the bearer token.
pub(crate) async fn admin_page(Extension(state): Extension<AppState>) -> Result<Response, AppError> {
    serve_file(&state.static_dir.join(ADMIN_PAGE)).await
}

pub(crate) async fn redirect_to_login() -> Redirect {
    Redirect::to("/admin_login")
}

pub(crate) async fn static_asset(
    Extension(state): Extension<AppState>,
    uri: Uri,
) -> Result<Response, AppError> {
    match asset_path(&state.static_dir, uri.path()) {
        Some(path) => serve_file(&path).await,
        None => Ok(StatusCode::NOT_FOUND.into_response()),
    }
}

/// Maps a request path onto the static directory, refusing anything that escapes it.
fn asset_path(root: &Path, request_path: &str) -> Option<PathBuf> {
    let relative = Path::new(request_path.trim_start_matches('/'));
    if relative.as_os_str().is_empty() {
        return None;
    }
    if relative
        .components()
        .any(|component| !matches!(component, Component::Normal(_)))
    {
        return None;
    }
    Some(root.join(relative))
}

async fn serve_file(path: &Path) -> Result<Response, AppError> {
    let contents = tokio::fs::read(path).await?;
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let content_type = if mime.type_() == mime_guess::mime::TEXT {
        format!("{}; charset=utf-8", mime.essence_str())
    } else {
        mime.essence_str().to_string()
    };

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, content_type)],
        Body::from(contents),
    )
        .into_response())
}

/// Cross-origin headers for `/api/*`, answering preflight requests directly.
pub(crate) async fn cors_headers(
    State(cors): State<CorsPolicy>,
    request: Request,
    next: Next,
) -> Response {
    if !request.uri().path().starts_with("/api/") {
        return next.run(request).await;
    }

    let mut response = if request.method() == Method::OPTIONS {
        let mut preflight = StatusCode::NO_CONTENT.into_response();
        let headers = preflight.headers_mut();
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, POST, OPTIONS"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Content-Type, Authorization"),
        );
        headers.insert(
            header::ACCESS_CONTROL_MAX_AGE,
            HeaderValue::from_static("600"),
        );
        preflight
    } else {
        next.run(request).await
    };

    let headers = response.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, cors.allow_origin);
    headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static("Content-Disposition"),
    );
    response
}
