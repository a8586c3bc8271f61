use axum::http::HeaderValue;
use metrics_exporter_prometheus::PrometheusHandle;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use writer_test::config::{AppConfig, ServerConfig};
use writer_test::error::AppError;
use writer_test::intake::{AdminGuard, IntakeState, SqliteIntakeRepository, WriterTestService};

/// Process-wide state for the operational endpoints and static pages.
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
    pub(crate) static_dir: Arc<PathBuf>,
}

/// Allowed origin echoed on `/api/*` responses.
#[derive(Clone)]
pub(crate) struct CorsPolicy {
    pub(crate) allow_origin: HeaderValue,
}

impl CorsPolicy {
    pub(crate) fn from_config(config: &ServerConfig) -> Self {
        let allow_origin = HeaderValue::from_str(config.cors_allow_origin.trim())
            .unwrap_or_else(|_| HeaderValue::from_static("*"));
        Self { allow_origin }
    }
}

pub(crate) fn open_store(config: &AppConfig) -> Result<Arc<SqliteIntakeRepository>, AppError> {
    let repository = SqliteIntakeRepository::open(&config.storage.db_path)?;
    Ok(Arc::new(repository))
}

pub(crate) fn intake_state(
    config: &AppConfig,
    repository: Arc<SqliteIntakeRepository>,
) -> Arc<IntakeState<SqliteIntakeRepository>> {
    Arc::new(IntakeState::new(
        WriterTestService::new(repository),
        AdminGuard::new(config.admin.password.clone()),
    ))
}
