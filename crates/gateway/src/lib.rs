//! HTTP gateway for chatloom.
//!
//! Exposes the health check and the v1 API. A posted message is answered
//! with a `text/event-stream` carrying the turn's delta events.
//!
//! Built on Axum.

pub mod api_v1;
pub mod sse;

#[cfg(test)]
mod test_support;

use axum::extract::{DefaultBodyLimit, State};
use axum::response::Json;
use axum::{Router, routing::get};
use chatloom_config::AppConfig;
use chatloom_engine::CompletionOrchestrator;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub orchestrator: Arc<CompletionOrchestrator>,
}

pub type SharedState = Arc<GatewayState>;

/// Build the full router: `/health` plus the v1 API under `/v1`.
pub fn build_router(state: SharedState, body_limit_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state.clone())
        .nest("/v1", api_v1::v1_router(state))
        .layer(DefaultBodyLimit::max(body_limit_bytes))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Build the provider, tools, and store named by the config and wire them
/// into an orchestrator. Shared by the server and the CLI chat.
pub async fn build_orchestrator(
    config: &AppConfig,
) -> Result<CompletionOrchestrator, Box<dyn std::error::Error>> {
    let tools = Arc::new(chatloom_tools::default_registry());
    let provider = chatloom_providers::build_from_config(config, &tools.definitions())?;
    let store = chatloom_store::open(&config.store).await?;
    info!(
        provider = provider.name(),
        store = store.name(),
        tools = tools.len(),
        "Subsystems ready"
    );

    Ok(CompletionOrchestrator::from_config(config, provider, tools, store))
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let orchestrator = build_orchestrator(&config).await?;
    let state = Arc::new(GatewayState {
        orchestrator: Arc::new(orchestrator),
    });
    let app = build_router(state, config.gateway.body_limit_bytes);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    provider: String,
}

async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        provider: state.orchestrator.provider_name().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_endpoint() {
        let app = build_router(test_support::state(&["hi"]), 1024);

        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["provider"], "canned");
    }

    #[tokio::test]
    async fn oversized_body_rejected() {
        let app = build_router(test_support::state(&["hi"]), 64);

        let req = Request::builder()
            .method("POST")
            .uri("/v1/conversations/c1/messages")
            .header("content-type", "application/json")
            .body(Body::from(format!(r#"{{"message":"{}"}}"#, "x".repeat(200))))
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
