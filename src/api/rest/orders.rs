use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Extension, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::rest::{auth, parse_pagination_params, PaginationMeta};
use crate::error::AppError;
use crate::geo::GeoPoint;
use crate::models::order::{
    CreateOrderRequest, Order, OrderDetails, OrderListFilters, OrderStatus, UpdateRouteRequest,
};
use crate::models::pagination::Pagination;
use crate::models::user::AuthUser;
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let enduser = Router::new()
        .route("/orders", post(create_order))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/cancel", post(cancel_order))
        .route_layer(middleware::from_fn(auth::require_enduser));

    let drone = Router::new()
        .route("/orders/:id/reserve", post(reserve_order))
        .route("/orders/:id/pickup", post(pickup_order))
        .route("/orders/:id/deliver", post(deliver_order))
        .route("/orders/:id/fail", post(fail_order))
        .route_layer(middleware::from_fn(auth::require_drone));

    let admin = Router::new()
        .route("/admin/orders", get(admin_list_orders))
        .route("/admin/orders/:id", patch(admin_update_route))
        .route_layer(middleware::from_fn(auth::require_admin));

    Router::new()
        .merge(enduser)
        .merge(drone)
        .merge(admin)
        .route_layer(middleware::from_fn_with_state(state, auth::authenticate))
}

#[derive(Deserialize)]
struct CreateOrderBody {
    pickup_lat: Option<f64>,
    pickup_lng: Option<f64>,
    dropoff_lat: Option<f64>,
    dropoff_lng: Option<f64>,
}

#[derive(Deserialize)]
struct UpdateRouteBody {
    pickup_lat: Option<f64>,
    pickup_lng: Option<f64>,
    dropoff_lat: Option<f64>,
    dropoff_lng: Option<f64>,
}

#[derive(Deserialize, Default)]
struct ListOrdersParams {
    status: Option<String>,
    enduser_id: Option<String>,
    assigned_drone_id: Option<String>,
    page: Option<String>,
    page_size: Option<String>,
}

#[derive(Serialize)]
struct LocationResponse {
    lat: f64,
    lng: f64,
}

impl From<GeoPoint> for LocationResponse {
    fn from(point: GeoPoint) -> Self {
        Self {
            lat: point.lat,
            lng: point.lng,
        }
    }
}

#[derive(Serialize)]
struct OrderResponse {
    order_id: i64,
    status: OrderStatus,
    pickup: LocationResponse,
    dropoff: LocationResponse,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    canceled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    assigned_drone_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    handoff_lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    handoff_lng: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    drone_location: Option<LocationResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    eta_minutes: Option<i64>,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            order_id: order.id,
            status: order.status,
            pickup: order.pickup().into(),
            dropoff: order.dropoff().into(),
            created_at: order.created_at,
            updated_at: order.updated_at,
            canceled_at: order.canceled_at,
            assigned_drone_id: order.assigned_drone_id,
            handoff_lat: order.handoff_lat,
            handoff_lng: order.handoff_lng,
            drone_location: None,
            eta_minutes: None,
        }
    }
}

impl From<OrderDetails> for OrderResponse {
    fn from(details: OrderDetails) -> Self {
        let mut response = OrderResponse::from(details.order);
        response.drone_location = details.drone_location.map(Into::into);
        response.eta_minutes = details.eta_minutes;
        response
    }
}

#[derive(Serialize)]
struct OrderListResponse {
    data: Vec<OrderResponse>,
    meta: PaginationMeta,
}

fn order_id(path: Result<Path<i64>, PathRejection>) -> Result<i64, AppError> {
    let Path(id) = path.map_err(|_| AppError::invalid_request("invalid order id"))?;
    if id <= 0 {
        return Err(AppError::invalid_request("invalid order id"));
    }
    Ok(id)
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    body: Result<Json<CreateOrderBody>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(body) =
        body.map_err(|_| AppError::invalid_request("invalid or missing coordinates"))?;

    let (Some(pickup_lat), Some(pickup_lng), Some(dropoff_lat), Some(dropoff_lng)) = (
        body.pickup_lat,
        body.pickup_lng,
        body.dropoff_lat,
        body.dropoff_lng,
    ) else {
        return Err(AppError::invalid_request("invalid or missing coordinates"));
    };

    let request = CreateOrderRequest {
        enduser_id: user.id,
        pickup: GeoPoint::validated(pickup_lat, pickup_lng)?,
        dropoff: GeoPoint::validated(dropoff_lat, dropoff_lng)?,
    };

    let order = state.orders.create(request).await?;
    Ok((StatusCode::CREATED, Json(OrderResponse::from(order))))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<OrderResponse>, AppError> {
    let id = order_id(path)?;
    let details = state.orders.get(user.id, id).await?;
    Ok(Json(details.into()))
}

async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<OrderResponse>, AppError> {
    let id = order_id(path)?;
    let order = state.orders.cancel(user.id, id).await?;
    Ok(Json(order.into()))
}

async fn reserve_order(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<OrderResponse>, AppError> {
    let id = order_id(path)?;
    let order = state.orders.reserve(user.id, id).await?;
    Ok(Json(order.into()))
}

async fn pickup_order(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<OrderResponse>, AppError> {
    let id = order_id(path)?;
    let order = state.orders.pickup(user.id, id).await?;
    Ok(Json(order.into()))
}

async fn deliver_order(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<OrderResponse>, AppError> {
    let id = order_id(path)?;
    let order = state.orders.deliver(user.id, id).await?;
    Ok(Json(order.into()))
}

async fn fail_order(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<OrderResponse>, AppError> {
    let id = order_id(path)?;
    let order = state.orders.fail(user.id, id).await?;
    Ok(Json(order.into()))
}

async fn admin_list_orders(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListOrdersParams>,
) -> Result<Json<OrderListResponse>, AppError> {
    let filters = parse_filters(&params)?;
    let (page, page_size) = parse_pagination(&params)?;

    let (orders, pagination) = state.orders.list(filters, page, page_size).await?;

    Ok(Json(list_response(orders, pagination)))
}

async fn admin_update_route(
    State(state): State<Arc<AppState>>,
    path: Result<Path<i64>, PathRejection>,
    body: Result<Json<UpdateRouteBody>, JsonRejection>,
) -> Result<Json<OrderResponse>, AppError> {
    let id = order_id(path)?;
    let Json(body) = body.map_err(|_| AppError::invalid_request("invalid json body"))?;

    let request = parse_route_update(body)?;
    let order = state.orders.update_route(id, request).await?;
    Ok(Json(order.into()))
}

/// Each endpoint may be revised only as a complete (lat, lng) pair.
fn parse_route_update(body: UpdateRouteBody) -> Result<UpdateRouteRequest, AppError> {
    let has_pickup = body.pickup_lat.is_some() || body.pickup_lng.is_some();
    let has_dropoff = body.dropoff_lat.is_some() || body.dropoff_lng.is_some();

    if !has_pickup && !has_dropoff {
        return Err(AppError::invalid_request(
            "pickup or dropoff coordinates are required",
        ));
    }

    let pickup = if has_pickup {
        let (Some(lat), Some(lng)) = (body.pickup_lat, body.pickup_lng) else {
            return Err(AppError::invalid_request(
                "pickup_lat and pickup_lng must both be provided",
            ));
        };
        Some(GeoPoint::validated(lat, lng)?)
    } else {
        None
    };

    let dropoff = if has_dropoff {
        let (Some(lat), Some(lng)) = (body.dropoff_lat, body.dropoff_lng) else {
            return Err(AppError::invalid_request(
                "dropoff_lat and dropoff_lng must both be provided",
            ));
        };
        Some(GeoPoint::validated(lat, lng)?)
    } else {
        None
    };

    Ok(UpdateRouteRequest { pickup, dropoff })
}

fn parse_filters(params: &ListOrdersParams) -> Result<OrderListFilters, AppError> {
    let mut filters = OrderListFilters::default();

    if let Some(raw) = params.status.as_deref() {
        filters.status =
            Some(OrderStatus::parse(raw).ok_or_else(|| AppError::invalid_request("invalid status"))?);
    }
    if let Some(raw) = params.enduser_id.as_deref() {
        filters.enduser_id = Some(
            raw.parse::<i64>()
                .map_err(|_| AppError::invalid_request("invalid enduser_id"))?,
        );
    }
    if let Some(raw) = params.assigned_drone_id.as_deref() {
        filters.assigned_drone_id = Some(
            raw.parse::<i64>()
                .map_err(|_| AppError::invalid_request("invalid assigned_drone_id"))?,
        );
    }

    Ok(filters)
}

fn parse_pagination(params: &ListOrdersParams) -> Result<(i64, i64), AppError> {
    parse_pagination_params(params.page.as_deref(), params.page_size.as_deref())
}

fn list_response(orders: Vec<Order>, pagination: Pagination) -> OrderListResponse {
    let meta = PaginationMeta::new(pagination, orders.len());
    OrderListResponse {
        data: orders.into_iter().map(Into::into).collect(),
        meta,
    }
}
