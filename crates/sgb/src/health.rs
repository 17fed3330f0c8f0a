//! Liveness endpoint for hosting platforms that expect an open HTTP port.

use std::net::SocketAddr;

use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub fn router() -> Router {
    Router::new()
        .route("/", get(|| async { "Bot is running" }))
        .route("/health", get(|| async { "OK" }))
}

pub async fn serve(port: u16, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "health endpoint listening");
    serve_on(listener, shutdown).await
}

async fn serve_on(listener: TcpListener, shutdown: CancellationToken) -> anyhow::Result<()> {
    axum::serve(listener, router())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn answers_health_checks_until_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(serve_on(listener, shutdown.clone()));

        let root = reqwest::get(format!("http://{addr}/")).await.unwrap();
        assert_eq!(root.text().await.unwrap(), "Bot is running");
        let health = reqwest::get(format!("http://{addr}/health")).await.unwrap();
        assert!(health.status().is_success());
        assert_eq!(health.text().await.unwrap(), "OK");

        shutdown.cancel();
        server.await.unwrap().unwrap();
    }
}
