use std::net::SocketAddr;

use axum::{Router, routing::get};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

pub fn router() -> Router {
    // Expose both /health (preferred) and /healthz (legacy) for compatibility
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/healthz", get(|| async { "ok" }))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

pub async fn run_http_server(addr: SocketAddr) -> anyhow::Result<()> {
    let app = router();
    info!("cfgmon HTTP listening on {}", addr);
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app).await?;
    Ok(())
}
