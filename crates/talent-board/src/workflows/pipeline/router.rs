use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;

use super::domain::{CandidateId, Stage};
use super::engine::PipelineEngine;
use super::loader::LoadError;
use super::store::CandidateStore;
use super::transition::{TransitionError, TransitionOutcome};

/// Body of a stage move request.
#[derive(Debug, Clone, Deserialize)]
pub struct StageMoveRequest {
    pub stage: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Router builder exposing the board's read and stage-move endpoints.
pub fn board_router<S>(engine: Arc<PipelineEngine<S>>) -> Router
where
    S: CandidateStore + 'static,
{
    Router::new()
        .route("/api/v1/board/stats", get(stats_handler::<S>))
        .route("/api/v1/board/candidates", get(active_handler::<S>))
        .route(
            "/api/v1/board/candidates/:candidate_id",
            get(candidate_handler::<S>),
        )
        .route(
            "/api/v1/board/candidates/:candidate_id/stage",
            post(move_handler::<S>),
        )
        .route("/api/v1/board/stages/:stage", get(stage_handler::<S>))
        .route(
            "/api/v1/board/stages/:stage/pages",
            post(next_page_handler::<S>),
        )
        .with_state(engine)
}

pub(crate) async fn stats_handler<S>(State(engine): State<Arc<PipelineEngine<S>>>) -> Response
where
    S: CandidateStore + 'static,
{
    (StatusCode::OK, axum::Json(engine.stats())).into_response()
}

pub(crate) async fn active_handler<S>(State(engine): State<Arc<PipelineEngine<S>>>) -> Response
where
    S: CandidateStore + 'static,
{
    let candidates = engine.active_candidates();
    let payload = json!({
        "count": candidates.len(),
        "candidates": candidates,
    });
    (StatusCode::OK, axum::Json(payload)).into_response()
}

pub(crate) async fn candidate_handler<S>(
    State(engine): State<Arc<PipelineEngine<S>>>,
    Path(candidate_id): Path<String>,
) -> Response
where
    S: CandidateStore + 'static,
{
    let id = CandidateId(candidate_id);
    match engine.candidate(&id) {
        Some((location, candidate)) => {
            let payload = json!({
                "location": location,
                "candidate": candidate,
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        None => not_cached(&id),
    }
}

pub(crate) async fn move_handler<S>(
    State(engine): State<Arc<PipelineEngine<S>>>,
    Path(candidate_id): Path<String>,
    axum::Json(request): axum::Json<StageMoveRequest>,
) -> Response
where
    S: CandidateStore + 'static,
{
    let stage = match request.stage.parse::<Stage>() {
        Ok(stage) => stage,
        Err(err) => return error_response(StatusCode::UNPROCESSABLE_ENTITY, err.to_string()),
    };

    let id = CandidateId(candidate_id);
    match engine.move_candidate(&id, stage, request.reason).await {
        Ok(TransitionOutcome::NotCached { candidate_id }) => not_cached(&candidate_id),
        Ok(outcome) => (StatusCode::OK, axum::Json(outcome)).into_response(),
        Err(err @ TransitionError::ReasonRequired(_)) => {
            error_response(StatusCode::UNPROCESSABLE_ENTITY, err.to_string())
        }
        Err(err @ TransitionError::NotAllowed { .. }) => {
            error_response(StatusCode::CONFLICT, err.to_string())
        }
        Err(TransitionError::Persist {
            candidate_id,
            to,
            compensation,
            source,
        }) => {
            let payload = json!({
                "error": source.to_string(),
                "candidate_id": candidate_id,
                "stage": to,
                "compensation": compensation,
            });
            (StatusCode::BAD_GATEWAY, axum::Json(payload)).into_response()
        }
    }
}

pub(crate) async fn stage_handler<S>(
    State(engine): State<Arc<PipelineEngine<S>>>,
    Path(stage): Path<String>,
) -> Response
where
    S: CandidateStore + 'static,
{
    let stage = match stage.parse::<Stage>() {
        Ok(stage) => stage,
        Err(err) => return error_response(StatusCode::NOT_FOUND, err.to_string()),
    };

    match engine.terminal_view(stage) {
        Some(view) => (StatusCode::OK, axum::Json(view)).into_response(),
        None => error_response(
            StatusCode::BAD_REQUEST,
            format!("stage '{stage}' is not terminal"),
        ),
    }
}

pub(crate) async fn next_page_handler<S>(
    State(engine): State<Arc<PipelineEngine<S>>>,
    Path(stage): Path<String>,
) -> Response
where
    S: CandidateStore + 'static,
{
    let stage = match stage.parse::<Stage>() {
        Ok(stage) => stage,
        Err(err) => return error_response(StatusCode::NOT_FOUND, err.to_string()),
    };

    match engine.load_next_page(stage).await {
        Ok(status) => (StatusCode::OK, axum::Json(status)).into_response(),
        Err(err @ LoadError::NotTerminal(_)) => {
            error_response(StatusCode::BAD_REQUEST, err.to_string())
        }
        Err(err) => error_response(StatusCode::BAD_GATEWAY, err.to_string()),
    }
}

fn not_cached(id: &CandidateId) -> Response {
    let payload = json!({
        "error": "candidate is not loaded on the board",
        "candidate_id": id,
    });
    (StatusCode::NOT_FOUND, axum::Json(payload)).into_response()
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, axum::Json(json!({ "error": message }))).into_response()
}
