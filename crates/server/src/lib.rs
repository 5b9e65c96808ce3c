//! LinkUp Server Library
//!
//! Two-user direct messaging: accounts, friendships and message history over
//! REST, plus a WebSocket relay for live delivery, typing signals and
//! presence.

pub mod chat;
pub mod core;
pub mod relay;

use axum::{http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub use crate::core::{AppState, ServerConfig, MIN_HASH_COST};

/// Build the full application router
pub fn app(state: AppState) -> Router {
    let cors = state.config.origin_policy().cors_layer();

    Router::new()
        .merge(core::router(state.clone()))
        .merge(chat::router(state.clone()))
        .route("/ws", get(relay::ws::ws_upgrade))
        .fallback(route_not_found)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn route_not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": { "message": "Route not found" } })),
    )
}

pub async fn run() -> anyhow::Result<()> {
    // Initialize tracing; RUST_LOG wins over the default filter
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info"));
    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_err()
    {
        // Already set, ignore
    }

    info!("=== LinkUp Server ===");

    let config = ServerConfig::from_env()?;
    let addr = config.socket_addr();
    info!("Database: {:?}", config.db_path());
    info!("Allowed origins: {:?}", config.allowed_origins);

    let state = AppState::new(config).await?;
    let app = app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{}", addr);
    info!("WebSocket relay at ws://{}/ws", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use serde_json::Value;
    use tower::ServiceExt;

    async fn test_app(dir: &tempfile::TempDir) -> Router {
        let mut config = ServerConfig::with_data_dir(dir.path());
        config.hash_cost = MIN_HASH_COST;
        app(AppState::new(config).await.unwrap())
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_and_fallback() {
        let dir = tempfile::TempDir::new().unwrap();
        let app = test_app(&dir).await;

        let response = app
            .clone()
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["message"], "Server is running");

        let response = app
            .oneshot(Request::get("/nowhere").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            json_body(response).await["error"]["message"],
            "Route not found"
        );
    }

    #[tokio::test]
    async fn test_register_then_me() {
        let dir = tempfile::TempDir::new().unwrap();
        let app = test_app(&dir).await;

        let response = app
            .clone()
            .oneshot(
                Request::post("/api/auth/register")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        r#"{"username":"alice","email":"Alice@Example.com","password":"secret123"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = json_body(response).await;
        let token = body["token"].as_str().unwrap().to_string();
        assert_eq!(body["user"]["email"], "alice@example.com");

        let response = app
            .clone()
            .oneshot(
                Request::get("/api/auth/me")
                    .header(header::AUTHORIZATION, format!("Bearer {}", token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let me = json_body(response).await;
        assert_eq!(me["username"], "alice");
        assert_eq!(me["is_online"], false);

        let response = app
            .clone()
            .oneshot(Request::get("/api/auth/me").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            json_body(response).await["error"]["message"],
            "No token provided"
        );

        let response = app
            .oneshot(
                Request::get("/api/auth/me")
                    .header(header::AUTHORIZATION, "Bearer not-a-session")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            json_body(response).await["error"]["message"],
            "Invalid or expired token"
        );
    }
}
