use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use thiserror::Error;

use crate::models::drone::DroneStatus;
use crate::models::order::OrderStatus;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("user not found")]
    UserNotFound,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("order not found")]
    OrderNotFound,

    #[error("drone not found")]
    DroneNotFound,

    #[error("order does not belong to user")]
    OrderNotOwned,

    #[error("order is not assigned to this drone")]
    OrderNotAssignedToDrone,

    #[error("transition from {from} to {to} is not allowed")]
    OrderTransitionNotAllowed { from: OrderStatus, to: OrderStatus },

    #[error("transition from {from} to {to} is not allowed")]
    DroneTransitionNotAllowed { from: DroneStatus, to: DroneStatus },

    #[error("drone cannot perform this action")]
    DroneActionNotAllowed,

    #[error("latitude must be between -90 and 90")]
    InvalidLatitude(f64),

    #[error("longitude must be between -180 and 180")]
    InvalidLongitude(f64),

    #[error("invalid enduser id")]
    InvalidEnduserId,

    #[error("{0}")]
    InvalidRequest(String),

    #[error("invalid pagination parameters")]
    InvalidPagination,

    #[error("{0}")]
    Infrastructure(String),
}

impl AppError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        AppError::InvalidRequest(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::UserNotFound => "user_not_found",
            AppError::InvalidCredentials => "unauthorized",
            AppError::OrderNotFound => "order_not_found",
            AppError::DroneNotFound => "drone_not_found",
            AppError::OrderNotOwned => "order_not_owned",
            AppError::OrderNotAssignedToDrone => "order_not_assigned_to_drone",
            AppError::OrderTransitionNotAllowed { .. } => "order_status_transition_not_allowed",
            AppError::DroneTransitionNotAllowed { .. } => "drone_status_transition_not_allowed",
            AppError::DroneActionNotAllowed => "drone_action_not_allowed",
            AppError::InvalidLatitude(_) => "invalid_latitude",
            AppError::InvalidLongitude(_) => "invalid_longitude",
            AppError::InvalidEnduserId => "invalid_enduser_id",
            AppError::InvalidRequest(_) => "invalid_request",
            AppError::InvalidPagination => "invalid_pagination",
            AppError::Infrastructure(_) => "infrastructure",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::UserNotFound => StatusCode::NOT_FOUND,
            AppError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AppError::OrderNotFound
            | AppError::DroneNotFound
            | AppError::OrderNotAssignedToDrone => StatusCode::NOT_FOUND,
            AppError::OrderNotOwned | AppError::DroneActionNotAllowed => StatusCode::FORBIDDEN,
            AppError::OrderTransitionNotAllowed { .. }
            | AppError::DroneTransitionNotAllowed { .. } => StatusCode::CONFLICT,
            AppError::InvalidLatitude(_)
            | AppError::InvalidLongitude(_)
            | AppError::InvalidEnduserId
            | AppError::InvalidRequest(_)
            | AppError::InvalidPagination => StatusCode::BAD_REQUEST,
            AppError::Infrastructure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn details(&self) -> Option<Value> {
        match self {
            AppError::OrderTransitionNotAllowed { from, to } => Some(json!({
                "from": from.as_str(),
                "to": to.as_str(),
            })),
            AppError::DroneTransitionNotAllowed { from, to } => Some(json!({
                "from": from.as_str(),
                "to": to.as_str(),
            })),
            AppError::InvalidLatitude(lat) => Some(json!({ "lat": lat })),
            AppError::InvalidLongitude(lng) => Some(json!({ "lng": lng })),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Infrastructure(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        AppError::Infrastructure(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = match &self {
            AppError::Infrastructure(cause) => {
                tracing::error!(error = %cause, "infrastructure error");
                "an unexpected error occurred".to_string()
            }
            other => other.to_string(),
        };

        let mut body = json!({
            "error": self.code(),
            "message": message,
        });
        if let Some(details) = self.details() {
            body["details"] = details;
        }

        (self.status(), Json(body)).into_response()
    }
}
