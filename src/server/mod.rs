//! HTTP surface of the inference service.
//!
//! | Route | Result |
//! |---|---|
//! | `POST /api/embeddings?sentence=..` | encoder outputs as JSON |
//! | `POST /api/mask?sentence=..` | ranked fill-mask candidates |
//! | `GET /health` | liveness and whether fill-mask is available |
//!
//! The two API routes also answer `GET`.

pub mod error;
pub mod handlers;
pub mod state;

pub use error::ApiError;
pub use state::ServiceContext;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub fn router(ctx: ServiceContext) -> Router {
    Router::new()
        .route(
            "/api/embeddings",
            post(handlers::embeddings).get(handlers::embeddings),
        )
        .route("/api/mask", post(handlers::mask).get(handlers::mask))
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Bind `addr` and serve until Ctrl-C.
pub async fn serve(addr: &str, ctx: ServiceContext) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Server ready on http://{}", listener.local_addr()?);

    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
}
