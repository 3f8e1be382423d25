use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::api::auth::AdminAuth;
use crate::api::blocking;
use crate::error::{AppError, ValidationError};
use crate::firewall::Enforcer;
use crate::firewall::access_file::FileStatus;
use crate::firewall::ip::Ip;
use crate::store::attempts::TrackedIp;
use crate::store::settings::{self, BLOCKED_MESSAGE, Settings};
use crate::state::AppState;

// Request / response bodies

#[derive(Deserialize)]
pub struct IpForm {
    ip: String,
}

#[derive(Serialize)]
pub struct StatusView {
    htaccess_path: PathBuf,
    file: FileStatus,
    /// None when the access file cannot be read.
    active: Option<bool>,
    blocked_count: usize,
}

#[derive(Serialize)]
pub struct SettingsView {
    settings: Settings,
    rejected: Vec<ValidationError>,
}

// Handlers

pub async fn status(
    _auth: AdminAuth,
    State(state): State<Arc<AppState>>,
) -> Result<Json<StatusView>, AppError> {
    let view = blocking(&state, |s| {
        let firewall = &s.firewall;
        let active = firewall
            .is_active()
            .inspect_err(|e| tracing::warn!("Access file unreadable: {}", e))
            .ok();
        Ok(StatusView {
            htaccess_path: firewall.path().to_path_buf(),
            file: firewall.status(),
            active,
            blocked_count: firewall.list_denied().map(|l| l.len()).unwrap_or(0),
        })
    })
    .await?;
    Ok(Json(view))
}

pub async fn list_blocked(
    _auth: AdminAuth,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Ip>>, AppError> {
    let denied = blocking(&state, |s| Ok(s.firewall.list_denied()?)).await?;
    Ok(Json(denied))
}

pub async fn block_ip(
    _auth: AdminAuth,
    State(state): State<Arc<AppState>>,
    Json(form): Json<IpForm>,
) -> Result<Response, AppError> {
    let ip = Ip::parse(&form.ip)?;
    blocking(&state, move |s| {
        if s.whitelist.contains(&ip)? {
            return Err(AppError::Forbidden(format!(
                "IP {ip} is whitelisted and cannot be blocked"
            )));
        }
        Ok(s.firewall.deny(&ip)?)
    })
    .await?;
    tracing::info!(%ip, "IP blocked by administrator");
    Ok((StatusCode::CREATED, Json(json!({ "blocked": ip }))).into_response())
}

pub async fn unblock_ip(
    _auth: AdminAuth,
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
) -> Result<StatusCode, AppError> {
    let ip = Ip::parse(&raw)?;
    blocking(&state, move |s| Ok(s.firewall.undeny(&ip)?)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_whitelist(
    _auth: AdminAuth,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Ip>>, AppError> {
    let whitelist = blocking(&state, |s| Ok(s.whitelist.all()?)).await?;
    Ok(Json(whitelist))
}

/// Whitelisting also lifts any existing block on the address.
pub async fn whitelist_ip(
    _auth: AdminAuth,
    State(state): State<Arc<AppState>>,
    Json(form): Json<IpForm>,
) -> Result<Response, AppError> {
    let ip = Ip::parse(&form.ip)?;
    blocking(&state, move |s| {
        s.whitelist.add(ip)?;
        s.attempts.remove(&ip)?;
        Ok(s.firewall.undeny(&ip)?)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(json!({ "whitelisted": ip }))).into_response())
}

pub async fn unwhitelist_ip(
    _auth: AdminAuth,
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
) -> Result<StatusCode, AppError> {
    let ip = Ip::parse(&raw)?;
    if blocking(&state, move |s| Ok(s.whitelist.remove(&ip)?)).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::BadRequest(format!("IP {ip} is not whitelisted")))
    }
}

pub async fn list_attempts(
    _auth: AdminAuth,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<TrackedIp>>, AppError> {
    let attempts = blocking(&state, |s| Ok(s.attempts.all()?)).await?;
    Ok(Json(attempts))
}

pub async fn get_settings(
    _auth: AdminAuth,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Settings>, AppError> {
    let settings = blocking(&state, |s| Ok(s.settings.load()?)).await?;
    Ok(Json(settings))
}

/// Each field is applied on its own; rejected fields keep their stored value.
/// The blocked message is written to the access file first and only stored
/// once that write succeeded.
pub async fn update_settings(
    _auth: AdminAuth,
    State(state): State<Arc<AppState>>,
    Json(body): Json<BTreeMap<String, Value>>,
) -> Result<Json<SettingsView>, AppError> {
    let mut fields: BTreeMap<String, String> = body
        .into_iter()
        .map(|(k, v)| {
            let raw = match v {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (k, raw)
        })
        .collect();

    let view = blocking(&state, move |s| {
        let mut rejected = Vec::new();
        if let Some(raw) = fields.remove(BLOCKED_MESSAGE) {
            match settings::validate(BLOCKED_MESSAGE, &raw) {
                Ok(value) => {
                    let message = value.as_str().unwrap_or_default();
                    match s.firewall.set_blocked_message(message) {
                        Ok(()) => s.settings.set_field(BLOCKED_MESSAGE, message)?,
                        Err(err) => {
                            tracing::warn!("Blocked message not saved: {}", err);
                            rejected.push(ValidationError::new(
                                BLOCKED_MESSAGE,
                                format!("could not be written to the access file: {err}"),
                            ));
                        }
                    }
                }
                Err(err) => rejected.push(err),
            }
        }
        rejected.extend(s.settings.update(&fields)?);

        Ok(SettingsView {
            settings: s.settings.load()?,
            rejected,
        })
    })
    .await?;
    Ok(Json(view))
}

pub async fn reset_settings(
    _auth: AdminAuth,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Settings>, AppError> {
    let settings = blocking(&state, |s| {
        s.settings.reset()?;
        s.firewall.set_blocked_message("")?;
        Ok(s.settings.load()?)
    })
    .await?;
    Ok(Json(settings))
}

pub async fn activate_firewall(
    _auth: AdminAuth,
    State(state): State<Arc<AppState>>,
) -> Result<StatusCode, AppError> {
    blocking(&state, |s| Ok(s.firewall.reactivate()?)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn deactivate_firewall(
    _auth: AdminAuth,
    State(state): State<Arc<AppState>>,
) -> Result<StatusCode, AppError> {
    blocking(&state, |s| Ok(s.firewall.deactivate()?)).await?;
    Ok(StatusCode::NO_CONTENT)
}
