//! Coordinator HTTP/WebSocket server
//!
//! Exposes `GET /ws` (the signaling upgrade) and `GET /health`. CORS is wide
//! open, matching the teacher's relay: origin checking buys nothing here
//! since every payload on the wire is already a typed, server-validated
//! message, not opaque bytes trusted from the browser origin.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use tokio::sync::Mutex as AsyncMutex;
use tower_http::cors::{Any, CorsLayer};

use mesh_net::coordinator::CoordinatorService;
use mesh_net::relay::RelaySessionManager;

use crate::config::CoordinatorConfig;
use crate::rate_limit::RateLimiter;
use crate::registry::{PeerRegistry, RegistryLookup};
use crate::relay_bridge::RelayBridge;
use crate::websocket::ws_handler;

/// State shared across every connection handler.
pub struct AppState {
    pub config: CoordinatorConfig,
    pub registry: PeerRegistry,
    pub coordinator: CoordinatorService,
    pub relay_sessions: RelaySessionManager,
    pub relay_bridge: RelayBridge,
    pub rate_limiter: AsyncMutex<RateLimiter>,
}

/// Build the router. Split out from [`run`] so tests can drive it directly
/// without binding a socket.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(state)
}

async fn health_handler() -> &'static str {
    "ok"
}

/// Build default application state, spawning the coordinator and relay
/// session actors.
pub fn build_state(config: CoordinatorConfig) -> Arc<AppState> {
    let registry = PeerRegistry::new();
    let coordinator = CoordinatorService::spawn(
        config.max_concurrent,
        Box::new(RegistryLookup(registry.clone())),
    );
    let relay_sessions = RelaySessionManager::spawn(config.max_relay_sessions);
    let rate_limiter = AsyncMutex::new(RateLimiter::new(config.rate_limit_per_second));

    Arc::new(AppState {
        config,
        registry,
        coordinator,
        relay_sessions,
        relay_bridge: RelayBridge::new(),
        rate_limiter,
    })
}

/// Bind and serve until the process is terminated.
pub async fn run(config: CoordinatorConfig) -> anyhow::Result<()> {
    let bind_addr: SocketAddr = config.bind_addr.parse()?;
    let state = build_state(config);
    let app = build_router(state);

    tracing::info!(addr = %bind_addr, "mesh-coordinator listening");
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_endpoint_returns_200() {
        let state = build_state(CoordinatorConfig::default());
        let app = build_router(state);

        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }
}
