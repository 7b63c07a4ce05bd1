pub(crate) mod api;
pub(crate) mod core;
pub mod db;
pub mod lifecycle;
pub(crate) mod repositories;
pub(crate) mod schemas;
pub mod services;
pub mod store;
pub(crate) mod tasks;

#[cfg(test)]
mod test_support;

use anyhow::Context;

use crate::core::shutdown::{shutdown_signal, Shutdown};
use crate::core::{config::Settings, redis::RedisHandle, state::AppState, telemetry};

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let db_pool = db::init_pool(&settings).await?;
    db::run_migrations(&db_pool).await?;

    let redis = RedisHandle::new(settings.redis().redis_url());
    if let Err(err) = redis.connect().await {
        tracing::error!(error = %err, "Failed to connect to Redis; continuing without cache");
    } else {
        tracing::info!("Redis connected successfully");
    }

    let lifecycle = core::bootstrap::lifecycle(&settings, db_pool.clone()).await?;
    let role_oracle = core::bootstrap::role_oracle(&settings, redis.clone())?;
    let state = AppState::new(settings, db_pool, redis.clone(), lifecycle, role_oracle);

    state.lifecycle().scheduler().recover().await.context("Failed to recover exam timers")?;

    let shutdown = Shutdown::new();
    let background = tokio::spawn(tasks::scheduler::run(state.clone(), shutdown.subscribe()));

    let app = api::router::router(state.clone());
    let listener = tokio::net::TcpListener::bind(state.settings().server_addr()).await?;

    tracing::info!(
        host = %state.settings().server_host(),
        port = state.settings().server_port(),
        environment = %state.settings().runtime().environment.as_str(),
        "Exam lifecycle service listening"
    );

    let server_shutdown = shutdown.clone();
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            server_shutdown.trigger();
        })
        .await;

    shutdown.trigger();
    if let Err(err) = background.await {
        tracing::error!(error = %err, "Background tasks join failed");
    }

    redis.disconnect().await;
    tracing::info!("Redis disconnected");

    result?;

    Ok(())
}
