use axum::{
    extract::{Query, State},
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use super::models::*;
use crate::{
    error::{AppError, AppResult},
    settlement::{DistributionEngine, RunSummary},
};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<DistributionEngine>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now(),
        last_run: state.engine.last_summary().await,
    })
}

/// Trigger a distribution run and wait for its summary
/// POST /api/v1/runs
pub async fn trigger_run(
    State(state): State<AppState>,
    request: Option<Json<TriggerRunRequest>>,
) -> AppResult<Json<RunSummary>> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    info!("Manual distribution run requested (as_of: {:?})", request.as_of);

    let summary = state.engine.run(request.as_of).await?;
    Ok(Json(summary))
}

/// GET /api/v1/runs/last
pub async fn last_run(State(state): State<AppState>) -> AppResult<Json<RunSummary>> {
    state
        .engine
        .last_summary()
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound("No distribution run has completed yet".to_string()))
}

/// GET /api/v1/payouts/due?as_of=YYYY-MM-DD
pub async fn due_payouts(
    State(state): State<AppState>,
    Query(query): Query<DuePayoutsQuery>,
) -> AppResult<Json<DuePayoutsResponse>> {
    let payouts = state.engine.due_payouts(query.as_of).await?;

    Ok(Json(DuePayoutsResponse {
        as_of: query.as_of,
        count: payouts.len(),
        payouts,
    }))
}
