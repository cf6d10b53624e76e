use crate::cli::ServeArgs;
use crate::infra::{demo_store, AppState};
use crate::routes::with_board_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use talent_board::config::AppConfig;
use talent_board::error::AppError;
use talent_board::telemetry;
use talent_board::workflows::pipeline::{load_seed_file, EngineSettings, PipelineEngine};
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let seed = match &config.board.seed_csv {
        Some(path) => load_seed_file(path)?,
        None => Vec::new(),
    };
    let store = Arc::new(demo_store(!args.empty));
    let engine = Arc::new(PipelineEngine::new(
        store,
        EngineSettings::from_config(&config.board, seed),
    ));
    let report = engine.start().await;
    info!(
        source = ?report.active_source,
        active = report.active,
        "candidate board loaded"
    );

    let app = with_board_routes(Arc::clone(&engine))
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "candidate board service ready");

    let served = axum::serve(listener, app).await;
    engine.shutdown();
    served?;
    Ok(())
}
