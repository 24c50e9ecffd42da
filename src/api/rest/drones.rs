use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, Query, State};
use axum::middleware;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::rest::{auth, parse_pagination_params, PaginationMeta};
use crate::error::AppError;
use crate::geo::GeoPoint;
use crate::models::drone::{Drone, DroneStatus};
use crate::models::pagination::Pagination;
use crate::models::user::AuthUser;
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let drone = Router::new()
        .route("/drones/:id/broken", post(mark_broken))
        .route("/drones/:id/fixed", post(mark_fixed))
        .route_layer(middleware::from_fn(auth::require_drone));

    let admin = Router::new()
        .route("/admin/drones", get(admin_list_drones))
        .route("/admin/drones/:id/broken", post(mark_broken))
        .route("/admin/drones/:id/fixed", post(mark_fixed))
        .route_layer(middleware::from_fn(auth::require_admin));

    Router::new()
        .merge(drone)
        .merge(admin)
        .route_layer(middleware::from_fn_with_state(state, auth::authenticate))
}

#[derive(Deserialize)]
struct PositionBody {
    lat: Option<f64>,
    lng: Option<f64>,
}

#[derive(Deserialize, Default)]
struct ListDronesParams {
    page: Option<String>,
    page_size: Option<String>,
}

#[derive(Serialize)]
struct DroneResponse {
    drone_id: i64,
    status: DroneStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    current_order_id: Option<i64>,
    lat: f64,
    lng: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_heartbeat_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl From<Drone> for DroneResponse {
    fn from(drone: Drone) -> Self {
        Self {
            drone_id: drone.id,
            status: drone.status,
            current_order_id: drone.current_order_id,
            lat: drone.lat,
            lng: drone.lng,
            last_heartbeat_at: drone.last_heartbeat_at,
            updated_at: drone.updated_at,
        }
    }
}

#[derive(Serialize)]
struct DroneListResponse {
    data: Vec<DroneResponse>,
    meta: PaginationMeta,
}

fn drone_id(path: Result<Path<i64>, PathRejection>) -> Result<i64, AppError> {
    let Path(id) = path.map_err(|_| AppError::invalid_request("invalid drone id"))?;
    if id <= 0 {
        return Err(AppError::invalid_request("invalid drone id"));
    }
    Ok(id)
}

fn position(body: Result<Json<PositionBody>, JsonRejection>) -> Result<GeoPoint, AppError> {
    let Json(body) = body.map_err(|_| AppError::invalid_request("invalid or missing coordinates"))?;
    let (Some(lat), Some(lng)) = (body.lat, body.lng) else {
        return Err(AppError::invalid_request("invalid or missing coordinates"));
    };
    GeoPoint::validated(lat, lng)
}

async fn mark_broken(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    path: Result<Path<i64>, PathRejection>,
    body: Result<Json<PositionBody>, JsonRejection>,
) -> Result<Json<DroneResponse>, AppError> {
    let id = drone_id(path)?;
    let position = position(body)?;

    let (drone, _released_order) = state
        .drones
        .report_broken(user.id, user.role, id, position)
        .await?;

    Ok(Json(drone.into()))
}

async fn mark_fixed(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    path: Result<Path<i64>, PathRejection>,
    body: Result<Json<PositionBody>, JsonRejection>,
) -> Result<Json<DroneResponse>, AppError> {
    let id = drone_id(path)?;
    let position = position(body)?;

    let drone = state
        .drones
        .report_fixed(user.id, user.role, id, position)
        .await?;

    Ok(Json(drone.into()))
}

async fn admin_list_drones(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListDronesParams>,
) -> Result<Json<DroneListResponse>, AppError> {
    let (page, page_size) =
        parse_pagination_params(params.page.as_deref(), params.page_size.as_deref())?;

    let (drones, pagination) = state.drones.list(page, page_size).await?;

    Ok(Json(list_response(drones, pagination)))
}

fn list_response(drones: Vec<Drone>, pagination: Pagination) -> DroneListResponse {
    let meta = PaginationMeta::new(pagination, drones.len());
    DroneListResponse {
        data: drones.into_iter().map(Into::into).collect(),
        meta,
    }
}
