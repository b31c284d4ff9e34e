use axum::{
    extract::State,
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use application::dto::{AdminStatsDto, ResetSummaryDto};

use crate::{error::ApiError, state::AppState};

/// 管理面板路由，仅对配置中的管理员开放
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/stats", get(get_stats))
        .route("/sessions/clear", post(clear_sessions))
        .route("/reset", post(reset_all))
}

#[derive(Debug, Serialize)]
struct ClearSessionsResponse {
    sessions_closed: usize,
}

async fn get_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<AdminStatsDto>, ApiError> {
    let requester = state.jwt_service.extract_user_from_headers(&headers)?;
    let stats = state.admin_service.stats(&requester).await?;
    Ok(Json(stats))
}

async fn clear_sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ClearSessionsResponse>, ApiError> {
    let requester = state.jwt_service.extract_user_from_headers(&headers)?;
    let sessions_closed = state.admin_service.clear_sessions(&requester).await?;
    Ok(Json(ClearSessionsResponse { sessions_closed }))
}

async fn reset_all(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ResetSummaryDto>, ApiError> {
    let requester = state.jwt_service.extract_user_from_headers(&headers)?;
    let summary = state.admin_service.reset_all(&requester).await?;
    Ok(Json(summary))
}
