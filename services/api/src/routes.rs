use crate::infra::AppState;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Extension;
use axum::Json;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use talent_board::workflows::pipeline::{
    board_router, ActiveSource, CandidateStore, CountReport, PipelineEngine,
};

#[derive(Debug, Serialize)]
pub(crate) struct ReloadResponse {
    pub(crate) active_source: ActiveSource,
    pub(crate) active: usize,
    pub(crate) counts: CountReport,
}

pub(crate) fn with_board_routes<S>(engine: Arc<PipelineEngine<S>>) -> axum::Router
where
    S: CandidateStore + 'static,
{
    let reload = axum::Router::new()
        .route(
            "/api/v1/board/reload",
            axum::routing::post(reload_endpoint::<S>),
        )
        .with_state(Arc::clone(&engine));

    board_router(engine)
        .merge(reload)
        .route("/health", axum::routing::get(healthcheck))
        .route("/ready", axum::routing::get(readiness_endpoint))
        .route("/metrics", axum::routing::get(metrics_endpoint))
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

/// Re-reads the active set and terminal counts from the store.
pub(crate) async fn reload_endpoint<S>(
    State(engine): State<Arc<PipelineEngine<S>>>,
) -> Json<ReloadResponse>
where
    S: CandidateStore + 'static,
{
    let active_source = engine.reload_active().await;
    let counts = engine.refresh_counts().await;

    Json(ReloadResponse {
        active_source,
        active: engine.active_candidates().len(),
        counts,
    })
}
