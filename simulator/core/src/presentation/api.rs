// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Admin JSON API.
//!
//! Serve with `into_make_service_with_connect_info::<SocketAddr>()` so
//! sessions record the operator's address.

use axum::{
    body::Body,
    extract::{ConnectInfo, FromRequestParts, Path, State},
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::io::ReaderStream;
use tracing::error;

use crate::application::admin_gateway::{AdminError, AdminGateway};
use crate::domain::session::SessionToken;

pub struct AppState {
    pub gateway: Arc<AdminGateway>,
    pub start_time: Instant,
}

pub fn app(gateway: Arc<AdminGateway>) -> Router {
    let state = Arc::new(AppState {
        gateway,
        start_time: Instant::now(),
    });

    Router::new()
        .route("/health", get(health))
        .route("/api/login", post(login))
        .route("/api/logout", post(logout))
        .route("/api/dashboard", get(dashboard))
        .route("/api/jobs", get(list_jobs))
        .route("/api/jobs/{id}", get(view_job))
        .route("/api/jobs/{id}/download", get(download_job))
        .with_state(state)
}

/// Error body: `{"error": "<code>", "message": "..."}`
pub struct ApiError(AdminError);

impl From<AdminError> for ApiError {
    fn from(err: AdminError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            AdminError::AuthError => (StatusCode::UNAUTHORIZED, "auth_error"),
            AdminError::Unauthenticated => (StatusCode::UNAUTHORIZED, "unauthenticated"),
            AdminError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AdminError::ArtifactNotFound(_) => (StatusCode::GONE, "artifact_not_found"),
            AdminError::Catalog(e) => {
                error!(error = %e, "Catalog failure while serving admin request");
                (StatusCode::INTERNAL_SERVER_ERROR, "catalog_error")
            }
        };
        (status, Json(json!({ "error": code, "message": self.0.to_string() }))).into_response()
    }
}

/// `Authorization: Bearer <token>`
pub struct BearerToken(pub SessionToken);

impl<S: Send + Sync> FromRequestParts<S> for BearerToken {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(|token| BearerToken(SessionToken::from_string(token.trim())))
            .ok_or(ApiError(AdminError::Unauthenticated))
    }
}

/// Peer address when the server was started with connect info.
pub struct RemoteAddr(pub Option<SocketAddr>);

impl<S: Send + Sync> FromRequestParts<S> for RemoteAddr {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(RemoteAddr(
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| *addr),
        ))
    }
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "uptime_seconds": state.start_time.elapsed().as_secs(),
    }))
}

async fn login(
    State(state): State<Arc<AppState>>,
    RemoteAddr(remote): RemoteAddr,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = state.gateway.login(&payload.username, &payload.password, remote)?;
    Ok(Json(json!({
        "token": session.token,
        "username": session.username,
        "created_at": session.created_at,
    })))
}

async fn logout(
    State(state): State<Arc<AppState>>,
    BearerToken(token): BearerToken,
) -> StatusCode {
    state.gateway.logout(&token);
    StatusCode::NO_CONTENT
}

async fn dashboard(
    State(state): State<Arc<AppState>>,
    BearerToken(token): BearerToken,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.gateway.dashboard(&token).await?))
}

async fn list_jobs(
    State(state): State<Arc<AppState>>,
    BearerToken(token): BearerToken,
) -> Result<impl IntoResponse, ApiError> {
    let jobs = state.gateway.jobs(&token).await?;
    Ok(Json(json!({ "jobs": jobs })))
}

async fn view_job(
    State(state): State<Arc<AppState>>,
    BearerToken(token): BearerToken,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.gateway.view(&token, id).await?))
}

async fn download_job(
    State(state): State<Arc<AppState>>,
    BearerToken(token): BearerToken,
    Path(id): Path<u64>,
) -> Result<Response, ApiError> {
    let download = state.gateway.download(&token, id).await?;
    let headers = [
        (header::CONTENT_TYPE, download.content_type.to_string()),
        (header::CONTENT_LENGTH, download.record.size_bytes.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", download.file_name),
        ),
    ];
    let body = Body::from_stream(ReaderStream::new(download.file));
    Ok((headers, body).into_response())
}
