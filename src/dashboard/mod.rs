//! # Dashboard — HTTP API and Live Task Streams
//!
//! Axum server in front of the [`TaskRegistry`]: REST endpoints to submit,
//! inspect and cancel searches, plus one WebSocket per task that streams its
//! lifecycle events from the [`Hub`](crate::hub::Hub).
//!
//! | Route | Handler |
//! |-------|---------|
//! | `POST /api/tasks` | submit a search |
//! | `GET /api/tasks?skip=&limit=` | persisted tasks, newest first |
//! | `GET /api/tasks/{id}` | one task's status |
//! | `POST /api/tasks/{id}/cancel` | request cancellation |
//! | `GET /api/active` | ids of running tasks |
//! | `GET /api/demo-hash/{password}` | digest of a sample input |
//! | `GET /ws/{task_id}` | event stream for one task |
//! | `GET /healthz`, `GET /metrics` | probes and Prometheus |

mod routes_health;
mod routes_tasks;
mod websocket;

use anyhow::Result;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::metrics::Metrics;
use crate::registry::TaskRegistry;

pub struct AppState {
    pub registry: TaskRegistry,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(registry: TaskRegistry, metrics: Arc<Metrics>) -> Arc<Self> {
        Arc::new(AppState { registry, metrics })
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/api/tasks",
            get(routes_tasks::handler_api_tasks_list).post(routes_tasks::handler_api_tasks_create),
        )
        .route("/api/tasks/{id}", get(routes_tasks::handler_api_tasks_get))
        .route(
            "/api/tasks/{id}/cancel",
            post(routes_tasks::handler_api_tasks_cancel),
        )
        .route("/api/active", get(routes_tasks::handler_api_active))
        .route(
            "/api/demo-hash/{password}",
            get(routes_tasks::handler_api_demo_hash),
        )
        .route("/ws/{task_id}", get(websocket::handler_ws))
        .route("/healthz", get(routes_health::handler_healthz))
        .route("/metrics", get(routes_health::handler_metrics))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(1024 * 1024))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(30),
        ))
        .with_state(state)
}

/// Serve the API on `port` until SIGINT/SIGTERM, then cancel running searches.
pub async fn run(port: u16, registry: TaskRegistry, metrics: Arc<Metrics>) -> Result<()> {
    let state = AppState::new(registry.clone(), metrics);
    let app = build_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!(port, "dashboard running");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let cancelled = registry.cancel_all();
    info!(cancelled, "dashboard shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("received SIGINT, shutting down"),
                    _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
                info!("received SIGINT, shutting down");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("received SIGINT, shutting down");
    }
}
