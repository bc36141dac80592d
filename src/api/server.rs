//! API Server Module
//!
//! This module implements the HTTP entry point of the service.
//! It exposes the payment-notification webhook that feeds the automation
//! gateway, and the health endpoints used by uptime monitors.
//!
//! # Endpoints
//! - `POST /automation`: notification text in the body, shared secret in
//!   the `X-Automation-Secret` header
//! - `GET /`: liveness text
//! - `GET /ping`: liveness JSON with the server time
//! - `GET /status`: store connectivity

use super::amount::extract_amount;
use crate::automation::{AutomationGateway, AutomationOutcome};
use crate::config::ApiConfig;
use crate::registry::Registry;
use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{error, info, warn};

/// Header carrying the webhook shared secret
pub const SECRET_HEADER: &str = "x-automation-secret";

/// Shared application state that is accessible across all request handlers
///
/// - `gateway`: resolves payments from parsed amounts
/// - `registry`: probed by the status endpoint
/// - `secret`: expected webhook secret; empty disables the webhook
#[derive(Clone)]
pub struct AppState {
    gateway: Arc<AutomationGateway>,
    registry: Arc<Registry>,
    secret: Arc<str>,
}

impl AppState {
    pub fn new(
        gateway: Arc<AutomationGateway>,
        registry: Arc<Registry>,
        secret: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            gateway,
            registry,
            secret: secret.into(),
        }
    }
}

/// The main API server struct
pub struct Server {
    config: ApiConfig,
    state: AppState,
}

impl Server {
    /// Creates a new API server instance
    ///
    /// # Arguments
    /// * `config` - Listening host and port
    /// * `state` - Components shared by the handlers
    pub fn new(config: ApiConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Binds the configured address and serves requests until the future is dropped
    ///
    /// # Returns
    /// An error if binding or serving fails
    pub async fn start(self) -> anyhow::Result<()> {
        let app = router(self.state);

        let addr = format!("{}:{}", self.config.host, self.config.port);
        info!("API server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

/// Routes of the service, bound to `state`
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(alive))
        .route("/ping", get(ping))
        .route("/status", get(status))
        .route("/automation", post(handle_automation))
        .with_state(state)
}

async fn alive() -> &'static str {
    "alive"
}

async fn ping() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "time": Utc::now().to_rfc3339() }))
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    match state.registry.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "database": "connected" })),
        ),
        Err(e) => {
            error!("Status check failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error", "database": "unreachable" })),
            )
        }
    }
}

/// Payment notification webhook
///
/// 1. Check the shared secret (constant-time)
/// 2. Extract the amount from the body
/// 3. Hand the amount to the gateway in the background and answer 202
///
/// The caller never waits for delivery; the outcome is only logged.
async fn handle_automation(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    // Step 1: Authenticate
    if !secret_matches(&state.secret, &headers) {
        warn!("Rejected automation request with a bad or missing secret");
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "status": "forbidden" })),
        );
    }

    // Step 2: Parse
    let Some(amount) = extract_amount(&body) else {
        warn!("Automation request without a readable amount");
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "status": "rejected", "reason": "no amount found in body" })),
        );
    };

    // Step 3: Resolve in the background
    info!(amount = %amount, "Automation request accepted");
    let gateway = state.gateway.clone();
    tokio::spawn(async move {
        match gateway.resolve_by_amount(amount).await {
            Ok(AutomationOutcome::Resolved(resolution)) => info!(
                payment_id = %resolution.payment.id,
                "Automation resolved payment of {}",
                amount
            ),
            Ok(AutomationOutcome::ManualApprovalRequired { payment_id }) => info!(
                payment_id = %payment_id,
                "Automation matched {} but the seller approves manually",
                amount
            ),
            Ok(AutomationOutcome::NoMatch { .. }) => {
                info!("Automation found no payment for {}", amount)
            }
            Err(e) => error!("Automation for {} failed: {}", amount, e),
        }
    });

    (
        StatusCode::ACCEPTED,
        Json(json!({ "status": "accepted", "amount": amount.to_string() })),
    )
}

fn secret_matches(expected: &str, headers: &HeaderMap) -> bool {
    if expected.is_empty() {
        return false;
    }
    headers
        .get(SECRET_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|provided| bool::from(provided.as_bytes().ct_eq(expected.as_bytes())))
        .unwrap_or(false)
}
