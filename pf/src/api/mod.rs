//! REST + WebSocket surface
//!
//! | Method | Path                          | Operation                  |
//! |--------|-------------------------------|----------------------------|
//! | POST   | `/projects`                   | create (201)               |
//! | POST   | `/projects/validate`          | dry-run validation         |
//! | GET    | `/projects`                   | list (`?status=`)          |
//! | GET    | `/projects/{id}`              | full record                |
//! | GET    | `/projects/{id}/progress`     | progress view              |
//! | POST   | `/projects/{id}/approve`      | approve the open gate      |
//! | POST   | `/projects/{id}/reject`       | reject the open gate       |
//! | DELETE | `/projects/{id}`              | cancel (204), `?purge=true`|
//! | GET    | `/ws/projects/{id}`           | live event stream          |

mod error;
mod handlers;
mod ws;

pub use error::{ApiError, ApiResult, ErrorBody};
pub use handlers::{CreatedProject, ProjectSummary};

use axum::Router;
use axum::routing::{get, post};
use eyre::{Context, Result};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::scheduler::Orchestrator;

/// Build the router over an orchestrator
pub fn router(orchestrator: Orchestrator) -> Router {
    Router::new()
        .route("/projects", post(handlers::create_project).get(handlers::list_projects))
        .route("/projects/validate", post(handlers::validate_project))
        .route(
            "/projects/{id}",
            get(handlers::get_project).delete(handlers::delete_project),
        )
        .route("/projects/{id}/progress", get(handlers::get_progress))
        .route("/projects/{id}/approve", post(handlers::approve))
        .route("/projects/{id}/reject", post(handlers::reject))
        .route("/ws/projects/{id}", get(ws::project_events))
        .layer(CorsLayer::permissive())
        .with_state(orchestrator)
}

/// Bind `addr` and serve until `shutdown` resolves
pub async fn serve<F>(orchestrator: Orchestrator, addr: &str, shutdown: F) -> Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind {}", addr))?;
    serve_on(listener, orchestrator, shutdown).await
}

/// Serve on an already bound listener
pub async fn serve_on<F>(listener: TcpListener, orchestrator: Orchestrator, shutdown: F) -> Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let local = listener.local_addr().context("Listener has no local address")?;
    info!(%local, "API listening");
    axum::serve(listener, router(orchestrator))
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server failed")?;
    info!("API stopped");
    Ok(())
}
