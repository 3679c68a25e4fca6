//! HTTP/WebSocket server for research sessions
//!
//! REST routes create and inspect sessions; each session's realtime
//! channel is served at /ws/sessions/:session_id.

mod api;
mod auth;
pub mod state;
mod ws;

pub use api::{ApiError, CreateSessionResponse};
pub use auth::{generate_auth_token, AuthLayer};
pub use state::ServerAppState;

use axum::{
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue,
    },
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

#[derive(Serialize)]
struct VersionInfo {
    name: &'static str,
    version: &'static str,
}

/// Build the router with auth and CORS applied
pub fn build_router(state: ServerAppState, cors_origins: &[String]) -> Router {
    // Explicit headers instead of Any: browsers reject a wildcard when
    // Authorization is sent
    let headers = [
        AUTHORIZATION,
        CONTENT_TYPE,
        ACCEPT,
        HeaderName::from_static("idempotency-key"),
    ];
    let cors = if cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(headers)
    } else {
        let allowed_origins: Vec<HeaderValue> =
            cors_origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new()
            .allow_origin(allowed_origins)
            .allow_methods(Any)
            .allow_headers(headers)
    };

    // Layer order: cors (outer) -> auth -> handler
    Router::new()
        .route(
            "/api/sessions",
            get(api::list_sessions).post(api::create_session),
        )
        .route(
            "/api/sessions/:session_id",
            get(api::get_session).delete(api::delete_session),
        )
        .route("/ws/sessions/:session_id", get(ws::session_ws_handler))
        .route("/api/version", get(version_handler))
        .route("/health", get(health_handler))
        .layer(AuthLayer::new(state.auth_token.clone()))
        .layer(cors)
        .with_state(state)
}

/// Bind and run the server until shutdown is requested
pub async fn run_server(
    bind: &str,
    port: u16,
    state: ServerAppState,
    cors_origins: Vec<String>,
) -> Result<(), String> {
    let addr: SocketAddr = format!("{}:{}", bind, port)
        .parse()
        .map_err(|e| format!("Invalid address: {}", e))?;

    let cors_display = if cors_origins.is_empty() {
        "*".to_string()
    } else {
        cors_origins.join(", ")
    };

    println!("\n╔══════════════════════════════════════════════════════════════╗");
    println!("║                  STORM Session Orchestrator                  ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║                                                              ║");
    println!("║  Server URL: http://{:<41}║", addr);
    println!("║  Auth Token: {:<48}║", state.auth_token);
    println!("║  CORS Origins: {:<46}║", cors_display);
    println!("║                                                              ║");
    println!("║  Endpoints:                                                  ║");
    println!("║    POST   /api/sessions         - Create session             ║");
    println!("║    GET    /api/sessions         - List sessions              ║");
    println!("║    GET    /api/sessions/:id     - Session snapshot           ║");
    println!("║    DELETE /api/sessions/:id     - Dispose session            ║");
    println!("║    GET    /ws/sessions/:id      - Session channel            ║");
    println!("║    GET    /health               - Health check               ║");
    println!("║                                                              ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind to {}: {}", addr, e))?;

    serve(listener, state, cors_origins).await
}

/// Serve on an already bound listener
pub async fn serve(
    listener: TcpListener,
    state: ServerAppState,
    cors_origins: Vec<String>,
) -> Result<(), String> {
    if let Ok(addr) = listener.local_addr() {
        log::info!("Server listening on http://{}", addr);
    }

    // Live sessions are cancelled first so their sockets close and the
    // graceful drain can finish
    let shutdown_state = state.shutdown_state.clone();
    let registry = state.registry.clone();
    let shutdown_signal = async move {
        loop {
            if shutdown_state.is_shutdown_requested() {
                log::info!("Shutdown signal received, stopping server...");
                registry.shutdown().await;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    };

    let app = build_router(state, &cors_origins);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .map_err(|e| format!("Server error: {}", e))
}

async fn health_handler() -> &'static str {
    "OK"
}

async fn version_handler() -> Json<VersionInfo> {
    Json(VersionInfo {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}
