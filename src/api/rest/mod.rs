pub mod auth;
pub mod drones;
pub mod orders;
pub mod ws;

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::error::AppError;
use crate::models::pagination::Pagination;
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/auth/token", post(auth::issue_token))
        .merge(orders::router(state.clone()))
        .merge(drones::router(state.clone()))
        .merge(ws::router(state.clone()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err).into_response(),
    }
}

#[derive(Serialize)]
pub(crate) struct PaginationMeta {
    page: i64,
    page_size: i64,
    has_next: bool,
}

impl PaginationMeta {
    pub(crate) fn new(pagination: Pagination, returned: usize) -> Self {
        Self {
            page: pagination.page,
            page_size: pagination.page_size,
            has_next: pagination.has_next(returned),
        }
    }
}

/// Absent parameters pass through as zero so normalization can apply its
/// defaults; values that fail to parse are the caller's mistake.
pub(crate) fn parse_pagination_params(
    page: Option<&str>,
    page_size: Option<&str>,
) -> Result<(i64, i64), AppError> {
    let page = match page {
        Some(raw) => raw.parse::<i64>().map_err(|_| AppError::InvalidPagination)?,
        None => 0,
    };
    let page_size = match page_size {
        Some(raw) => raw.parse::<i64>().map_err(|_| AppError::InvalidPagination)?,
        None => 0,
    };
    Ok((page, page_size))
}
