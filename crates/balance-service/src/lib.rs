//! Balance Service
//!
//! Serves `GET /balance` with the account equity at 00:00 UTC today, as
//! rebuilt by the baseline resolver, plus a `/health` probe.

use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use exchange_core::types::BalanceResponse;
use risk_manager::BaselineSource;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tracing::{error, info, Level};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub source: Arc<dyn BaselineSource>,
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
    })
}

/// Start-of-day equity. Any failure is a 500 with `status: "error"`.
pub async fn get_balance(State(state): State<AppState>) -> (StatusCode, Json<BalanceResponse>) {
    match state.source.initial_balance().await {
        Ok(balance) => {
            info!(initial_balance = %balance, "Served initial balance");
            (StatusCode::OK, Json(BalanceResponse::success(balance)))
        }
        Err(e) => {
            error!(error = %e, "Failed to compute initial balance");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(BalanceResponse::error()))
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/balance", get(get_balance))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .on_request(|request: &Request<_>, _span: &tracing::Span| {
                    tracing::info!(
                        method = %request.method(),
                        uri = %request.uri(),
                        "Incoming request"
                    );
                })
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
}

/// Bind `addr` and serve until the process stops.
pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let router = create_router(state);
    info!(address = %addr, "Starting balance service");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use exchange_core::types::BalanceStatus;
    use exchange_core::{Error, Result};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use tower::ServiceExt;

    struct FixedSource(Option<Decimal>);

    #[async_trait]
    impl BaselineSource for FixedSource {
        async fn initial_balance(&self) -> Result<Decimal> {
            self.0
                .ok_or_else(|| Error::data_unavailable("account equity"))
        }
    }

    fn router(value: Option<Decimal>) -> Router {
        create_router(AppState {
            source: Arc::new(FixedSource(value)),
        })
    }

    async fn send(router: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_balance_success() {
        let (status, body) = send(router(Some(dec!(10070.5))), "/balance").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(body["initial_balance"].as_f64(), Some(10070.5));

        let parsed: BalanceResponse = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.status, BalanceStatus::Success);
    }

    #[tokio::test]
    async fn test_balance_failure_is_500() {
        let (status, body) = send(router(None), "/balance").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["status"], "error");
        assert!(body["initial_balance"].is_null());
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(router(None), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }
}
