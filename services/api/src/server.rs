use crate::cli::ServeArgs;
use crate::infra::{intake_state, open_store, AppState, CorsPolicy};
use crate::routes::with_site_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;
use writer_test::config::AppConfig;
use writer_test::error::AppError;
use writer_test::telemetry;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }
    if let Some(db_path) = args.store.db_path.take() {
        config.storage.db_path = db_path;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
        static_dir: Arc::new(config.server.static_dir.clone()),
    };

    let repository = open_store(&config)?;
    info!(db_path = %config.storage.db_path.display(), "intake store opened");

    let app = with_site_routes(
        intake_state(&config, repository),
        CorsPolicy::from_config(&config.server),
    )
    .layer(Extension(app_state))
    .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "writer test intake ready");

    axum::serve(listener, app).await?;
    Ok(())
}
