use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use std::collections::HashMap;

use crate::core::metrics;
use crate::core::redis::RedisHealth;
use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::repositories;
use crate::schemas::{HealthResponse, RootResponse};

pub(crate) async fn root(State(state): State<AppState>) -> Json<RootResponse> {
    Json(RootResponse {
        message: "Exam Lifecycle Service".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        environment: state.settings().runtime().environment.as_str().to_string(),
    })
}

pub(crate) async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    let mut status = "healthy".to_string();
    let mut components = HashMap::new();

    match state.redis().health().await {
        RedisHealth::Healthy => {
            components.insert("redis".to_string(), "healthy".to_string());
        }
        RedisHealth::Disconnected => {
            components.insert("redis".to_string(), "disconnected".to_string());
        }
        RedisHealth::Unhealthy(error) => {
            components.insert("redis".to_string(), format!("unhealthy: {error}"));
            status = "degraded".to_string();
        }
    }

    let oracle =
        if state.role_oracle().is_configured() { "configured" } else { "not configured" };
    components.insert("role_oracle".to_string(), oracle.to_string());

    let overdue_jobs =
        match repositories::health::overdue_jobs(state.db(), primitive_now_utc()).await {
            Ok(count) => {
                components.insert("database".to_string(), "healthy".to_string());
                Some(count)
            }
            Err(err) => {
                components.insert("database".to_string(), format!("unhealthy: {err}"));
                status = "unhealthy".to_string();
                None
            }
        };

    Json(HealthResponse {
        service: "exam-lifecycle".to_string(),
        status,
        components,
        overdue_jobs,
    })
}

pub(crate) async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    if !state.settings().telemetry().prometheus_enabled {
        return StatusCode::NOT_FOUND.into_response();
    }

    match metrics::render() {
        Some(body) => ([(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
            .into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}
