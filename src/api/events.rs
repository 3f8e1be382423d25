//! Login events forwarded by the host application.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::error::AppError;
use crate::firewall::ip::Ip;
use crate::login::policy::FailureOutcome;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct LoginEvent {
    /// Source address of the login request; the peer address when absent.
    #[serde(default)]
    ip: Option<String>,
}

impl LoginEvent {
    fn source_ip(&self, peer: SocketAddr) -> Result<Ip, AppError> {
        match &self.ip {
            Some(raw) => Ok(Ip::parse(raw)?),
            None => Ok(Ip::from(peer.ip())),
        }
    }
}

/// Enforcement failures never fail the login itself; the host just learns the
/// request went unprotected.
fn unprotected(ip: &Ip, err: impl std::fmt::Display) -> Response {
    tracing::warn!(%ip, "Login check skipped, request unprotected: {}", err);
    Json(json!({ "outcome": "unprotected" })).into_response()
}

pub async fn login_failed(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(event): Json<LoginEvent>,
) -> Response {
    let ip = match event.source_ip(addr) {
        Ok(ip) => ip,
        Err(e) => return e.into_response(),
    };

    // The configured delay blocks; keep it off the async workers.
    let policy = state.policy.clone();
    let now = Utc::now();
    let result = tokio::task::spawn_blocking(move || policy.on_login_failed(&ip, now)).await;

    match result {
        Ok(Ok(outcome @ FailureOutcome::Blocked { .. })) => {
            (StatusCode::FORBIDDEN, Json(outcome)).into_response()
        }
        Ok(Ok(outcome)) => Json(outcome).into_response(),
        Ok(Err(err)) => unprotected(&ip, err),
        Err(err) => unprotected(&ip, err),
    }
}

pub async fn login_succeeded(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(event): Json<LoginEvent>,
) -> Response {
    let ip = match event.source_ip(addr) {
        Ok(ip) => ip,
        Err(e) => return e.into_response(),
    };

    let policy = state.policy.clone();
    let result = tokio::task::spawn_blocking(move || policy.on_login_succeeded(&ip)).await;

    match result {
        Ok(Ok(())) => Json(json!({ "outcome": "cleared" })).into_response(),
        Ok(Err(err)) => unprotected(&ip, err),
        Err(err) => unprotected(&ip, err),
    }
}
