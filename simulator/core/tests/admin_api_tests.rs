// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Admin HTTP API driven through the router without a socket.

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use devsim_core::application::{AdminGateway, SessionService};
use devsim_core::domain::catalog::JobCatalog;
use devsim_core::domain::job::{JobDraft, JobStatus};
use devsim_core::domain::session::PasswordHash;
use devsim_core::infrastructure::FileJobCatalog;
use devsim_core::presentation::api::app;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

async fn setup(dir: &TempDir) -> (Router, Arc<FileJobCatalog>) {
    let catalog = Arc::new(FileJobCatalog::open(dir.path()).await.unwrap());
    let sessions = Arc::new(SessionService::new("admin", PasswordHash::derive("hunter2")));
    let gateway = Arc::new(AdminGateway::new(sessions, catalog.clone()));
    (app(gateway), catalog)
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

async fn login(router: &Router, password: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri("/api/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "username": "admin", "password": password }).to_string()))
        .unwrap();
    let (status, body) = send(router, request).await;
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

#[tokio::test]
async fn test_health_is_public() {
    let dir = TempDir::new().unwrap();
    let (router, _) = setup(&dir).await;
    let (status, body) = send(&router, get("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_login_flow() {
    let dir = TempDir::new().unwrap();
    let (router, _) = setup(&dir).await;

    let (status, body) = login(&router, "wrong").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "auth_error");

    let (status, _) = send(&router, get("/api/dashboard", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = login(&router, "hunter2").await;
    assert_eq!(status, StatusCode::OK);
    let token = body["token"].as_str().unwrap().to_string();
    assert_eq!(token.len(), 64);

    let (status, body) = send(&router, get("/api/dashboard", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["job_count"], 0);

    let logout = Request::builder()
        .method("POST")
        .uri("/api/logout")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&router, logout).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(&router, get("/api/jobs", Some(&token))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error"], "unauthenticated");
}

#[tokio::test]
async fn test_job_endpoints() {
    let dir = TempDir::new().unwrap();
    let (router, catalog) = setup(&dir).await;
    let record = catalog
        .append(JobDraft::new(
            "10.1.1.1:6000".parse().unwrap(),
            b"%!PS-Adobe-3.0\nshowpage\nshowpage\n".to_vec(),
            JobStatus::Completed,
        ))
        .await
        .unwrap();

    let (_, body) = login(&router, "hunter2").await;
    let token = body["token"].as_str().unwrap().to_string();

    let (status, body) = send(&router, get("/api/jobs", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["jobs"][0]["kind"], "postscript");
    assert_eq!(body["jobs"][0]["page_estimate"], 2);

    let (status, body) = send(&router, get("/api/jobs/1", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert!(body["preview"]["text"].as_str().unwrap().starts_with("%!PS"));

    let response = router
        .clone()
        .oneshot(get("/api/jobs/1/download", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/postscript");
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"%!PS-Adobe-3.0\nshowpage\nshowpage\n");

    let (status, body) = send(&router, get("/api/jobs/7", Some(&token))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error"], "not_found");

    std::fs::remove_file(catalog.artifact_location(&record)).unwrap();
    let (status, body) = send(&router, get("/api/jobs/1/download", Some(&token))).await;
    assert_eq!(status, StatusCode::GONE);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error"], "artifact_not_found");

    let (status, _) = send(&router, get("/api/jobs/1", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
}
