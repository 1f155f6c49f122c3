//! HTTP API over the workflow engine.
//!
//! Endpoints:
//! - `POST /api/workflows/decision`: approve or reject the current step
//! - `POST /api/negotiation/initiate`: move a contract into negotiation
//! - `GET /api/contracts/{contract_id}/workflow-history`: decision history
//! - `GET /health`: liveness

pub mod auth;
pub mod error;
pub mod handlers;
pub mod state;

pub use auth::{CurrentUser, USER_HEADER};
pub use error::{ApiError, ErrorBody};
pub use state::AppState;

use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::info;

use crate::store::WorkflowStore;

/// Build the application router.
pub fn router<S: WorkflowStore>(state: Arc<AppState<S>>) -> Router {
    Router::new()
        .route("/health", get(handlers::handle_health))
        .route(
            "/api/workflows/decision",
            post(handlers::handle_decision::<S>),
        )
        .route(
            "/api/negotiation/initiate",
            post(handlers::handle_initiate_negotiation::<S>),
        )
        .route(
            "/api/contracts/{contract_id}/workflow-history",
            get(handlers::handle_history::<S>),
        )
        .fallback(handlers::handle_not_found)
        .layer(middleware::from_fn(log_requests))
        .with_state(state)
}

/// Serve the API on `listener` until `shutdown` resolves, then drain
/// in-flight requests.
pub async fn serve_on<S, F>(
    listener: TcpListener,
    state: Arc<AppState<S>>,
    shutdown: F,
) -> anyhow::Result<()>
where
    S: WorkflowStore,
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!(%addr, "Contract workflow API listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("HTTP server stopped");
    Ok(())
}

async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();
    let response = next.run(request).await;
    info!(
        %method,
        %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Request handled"
    );
    response
}
