//! Liveness endpoint, served next to the polling dispatcher.

use std::{net::SocketAddr, sync::Arc};

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use tokio::net::TcpListener;

use ssb_core::store::UserStore;

pub async fn serve(port: u16, store: Arc<UserStore>) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new()
        .route("/health", get(health_handler))
        .with_state(store);

    tracing::info!("health endpoint on http://{addr}/health");

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await
}

/// `200 {"status":"OK"}` while the user store answers its liveness probe.
async fn health_handler(State(store): State<Arc<UserStore>>) -> impl IntoResponse {
    match store.ping().await {
        Ok(()) => (StatusCode::OK, Json(json!({"status": "OK"}))),
        Err(e) => {
            tracing::error!("health probe failed: {e}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "unavailable"})),
            )
        }
    }
}
