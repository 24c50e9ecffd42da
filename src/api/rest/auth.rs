use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::AppError;
use crate::models::user::{AuthUser, Login, Role, User};
use crate::state::AppState;

#[derive(Deserialize)]
pub(crate) struct LoginBody {
    name: Option<String>,
    password: Option<String>,
}

#[derive(Serialize)]
struct UserResponse {
    id: i64,
    name: String,
    #[serde(rename = "type")]
    kind: &'static str,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            kind: user.role.as_str(),
        }
    }
}

#[derive(Serialize)]
pub(crate) struct LoginResponse {
    access_token: String,
    token_type: &'static str,
    expires_in: i64,
    user: UserResponse,
}

pub async fn issue_token(
    State(state): State<Arc<AppState>>,
    body: Result<Json<LoginBody>, JsonRejection>,
) -> Result<Json<LoginResponse>, AppError> {
    let Json(body) = body.map_err(|_| AppError::invalid_request("name and password required"))?;
    let (Some(name), Some(password)) = (body.name, body.password) else {
        return Err(AppError::invalid_request("name and password required"));
    };

    let bundle = state.auth.issue_token(&Login { name, password }).await?;

    let expires_in = (bundle.expires_at.timestamp() - Utc::now().timestamp()).max(0);
    Ok(Json(LoginResponse {
        access_token: bundle.token,
        token_type: "bearer",
        expires_in,
        user: bundle.user.into(),
    }))
}

/// Validates the bearer token and stashes the caller identity in request
/// extensions for the role guards and handlers downstream.
pub async fn authenticate(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = bearer_token(&request) else {
        return unauthorized("missing/invalid bearer token");
    };

    match state.auth.verify_token(&token) {
        Ok(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Err(reason) => unauthorized(reason),
    }
}

fn bearer_token(request: &Request) -> Option<String> {
    let from_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            let (scheme, token) = value.split_once(' ')?;
            scheme
                .eq_ignore_ascii_case("bearer")
                .then(|| token.trim().to_string())
        })
        .filter(|token| !token.is_empty());

    // Browser WebSocket clients cannot set headers on the upgrade request;
    // accept the token as a query parameter as well.
    from_header.or_else(|| {
        request.uri().query().and_then(|query| {
            query.split('&').find_map(|pair| {
                let (key, value) = pair.split_once('=')?;
                (key == "token" && !value.is_empty()).then(|| value.to_string())
            })
        })
    })
}

fn unauthorized(message: &str) -> Response {
    let challenge = format!("Bearer error=\"invalid_token\", error_description=\"{message}\"");
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, challenge)],
        Json(json!({ "error": "unauthorized", "message": message })),
    )
        .into_response()
}

fn forbidden(message: &str) -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(json!({ "error": "forbidden", "message": message })),
    )
        .into_response()
}

async fn guard(
    user: Option<Extension<AuthUser>>,
    allowed: &[Role],
    request: Request,
    next: Next,
) -> Response {
    let Some(Extension(user)) = user else {
        return forbidden("missing authentication");
    };
    if allowed.contains(&user.role) {
        next.run(request).await
    } else {
        forbidden("role not allowed")
    }
}

pub async fn require_enduser(
    user: Option<Extension<AuthUser>>,
    request: Request,
    next: Next,
) -> Response {
    guard(user, &[Role::Enduser], request, next).await
}

pub async fn require_drone(
    user: Option<Extension<AuthUser>>,
    request: Request,
    next: Next,
) -> Response {
    guard(user, &[Role::Drone], request, next).await
}

pub async fn require_admin(
    user: Option<Extension<AuthUser>>,
    request: Request,
    next: Next,
) -> Response {
    guard(user, &[Role::Admin], request, next).await
}
