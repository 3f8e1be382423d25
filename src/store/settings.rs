use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use super::kv::KeyValueStore;
use crate::error::{GuardError, ValidationError};

const KEY_PREFIX: &str = "settings.";

pub const ALLOWED_ATTEMPTS: &str = "allowed_attempts";
pub const RESET_TIME_MINUTES: &str = "reset_time_minutes";
pub const LOGIN_FAILED_DELAY_SECONDS: &str = "login_failed_delay_seconds";
pub const INFORM_USER: &str = "inform_user";
pub const SEND_EMAIL: &str = "send_email";
pub const BLOCKED_MESSAGE: &str = "blocked_message";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Settings {
    pub allowed_attempts: u32,
    pub reset_time_minutes: u32,
    pub login_failed_delay_seconds: u32,
    pub inform_user: bool,
    pub send_email: bool,
    pub blocked_message: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            allowed_attempts: 20,
            reset_time_minutes: 60,
            login_failed_delay_seconds: 1,
            inform_user: true,
            send_email: false,
            blocked_message: String::new(),
        }
    }
}

type Validator = fn(&str) -> Result<Value, ValidationError>;

/// Field name to validator. Every stored value passed through one of these.
const VALIDATORS: &[(&str, Validator)] = &[
    (ALLOWED_ATTEMPTS, validate_allowed_attempts),
    (RESET_TIME_MINUTES, validate_reset_time),
    (LOGIN_FAILED_DELAY_SECONDS, validate_login_failed_delay),
    (INFORM_USER, validate_inform_user),
    (SEND_EMAIL, validate_send_email),
    (BLOCKED_MESSAGE, validate_blocked_message),
];

fn validate_range(field: &str, raw: &str, min: u32, max: Option<u32>) -> Result<Value, ValidationError> {
    let describe = || match max {
        Some(max) => format!("must be a number between {min} and {max}"),
        None => format!("must be a number of at least {min}"),
    };
    let value: u32 = raw
        .trim()
        .parse()
        .map_err(|_| ValidationError::new(field, describe()))?;
    if value < min || max.is_some_and(|max| value > max) {
        return Err(ValidationError::new(field, describe()));
    }
    Ok(Value::from(value))
}

fn validate_allowed_attempts(raw: &str) -> Result<Value, ValidationError> {
    validate_range(ALLOWED_ATTEMPTS, raw, 1, Some(100))
}

fn validate_reset_time(raw: &str) -> Result<Value, ValidationError> {
    validate_range(RESET_TIME_MINUTES, raw, 1, None)
}

fn validate_login_failed_delay(raw: &str) -> Result<Value, ValidationError> {
    validate_range(LOGIN_FAILED_DELAY_SECONDS, raw, 1, Some(10))
}

fn validate_bool(field: &str, raw: &str) -> Result<Value, ValidationError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(Value::Bool(true)),
        "0" | "false" | "off" | "no" | "" => Ok(Value::Bool(false)),
        _ => Err(ValidationError::new(field, "must be true or false")),
    }
}

fn validate_inform_user(raw: &str) -> Result<Value, ValidationError> {
    validate_bool(INFORM_USER, raw)
}

fn validate_send_email(raw: &str) -> Result<Value, ValidationError> {
    validate_bool(SEND_EMAIL, raw)
}

fn validate_blocked_message(raw: &str) -> Result<Value, ValidationError> {
    let message = raw.trim();
    if message.chars().any(|c| c.is_control() && c != '\n' && c != '\r') {
        return Err(ValidationError::new(
            BLOCKED_MESSAGE,
            "must not contain control characters",
        ));
    }
    Ok(Value::from(message))
}

pub fn validate(field: &str, raw: &str) -> Result<Value, ValidationError> {
    let (_, validator) = VALIDATORS
        .iter()
        .find(|(name, _)| *name == field)
        .ok_or_else(|| ValidationError::new(field, "unknown setting"))?;
    validator(raw)
}

pub struct SettingsStore {
    kv: Arc<dyn KeyValueStore>,
}

impl SettingsStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        SettingsStore { kv }
    }

    /// Current settings. Stored values go through the same validators as
    /// input; missing or invalid ones fall back to defaults.
    pub fn load(&self) -> Result<Settings, GuardError> {
        let defaults = Settings::default();
        let number = |field: &str, default: u32| -> Result<u32, GuardError> {
            Ok(self
                .stored(field)?
                .and_then(|v| v.as_u64())
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(default))
        };
        let flag = |field: &str, default: bool| -> Result<bool, GuardError> {
            Ok(self.stored(field)?.and_then(|v| v.as_bool()).unwrap_or(default))
        };

        Ok(Settings {
            allowed_attempts: number(ALLOWED_ATTEMPTS, defaults.allowed_attempts)?,
            reset_time_minutes: number(RESET_TIME_MINUTES, defaults.reset_time_minutes)?,
            login_failed_delay_seconds: number(
                LOGIN_FAILED_DELAY_SECONDS,
                defaults.login_failed_delay_seconds,
            )?,
            inform_user: flag(INFORM_USER, defaults.inform_user)?,
            send_email: flag(SEND_EMAIL, defaults.send_email)?,
            blocked_message: self
                .stored(BLOCKED_MESSAGE)?
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or(defaults.blocked_message),
        })
    }

    /// Validate and store one field. On rejection the stored value is untouched.
    pub fn set_field(&self, field: &str, raw: &str) -> Result<(), GuardError> {
        let value = validate(field, raw)?;
        self.kv.set(&format!("{KEY_PREFIX}{field}"), value)?;
        tracing::info!(field, "Setting updated");
        Ok(())
    }

    /// Apply each field independently and collect the rejections.
    pub fn update(&self, fields: &BTreeMap<String, String>) -> Result<Vec<ValidationError>, GuardError> {
        let mut rejected = Vec::new();
        for (field, raw) in fields {
            match self.set_field(field, raw) {
                Ok(()) => {}
                Err(GuardError::Validation(err)) => {
                    tracing::debug!(%err, "Setting rejected");
                    rejected.push(err);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(rejected)
    }

    pub fn reset(&self) -> Result<(), GuardError> {
        for (field, _) in VALIDATORS {
            self.kv.delete(&format!("{KEY_PREFIX}{field}"))?;
        }
        tracing::info!("Settings reset to defaults");
        Ok(())
    }

    fn stored(&self, field: &str) -> Result<Option<Value>, GuardError> {
        let Some(value) = self.kv.get(&format!("{KEY_PREFIX}{field}"))? else {
            return Ok(None);
        };
        let raw = match value {
            Value::String(s) => s,
            other => other.to_string(),
        };
        match validate(field, &raw) {
            Ok(checked) => Ok(Some(checked)),
            Err(err) => {
                tracing::warn!(%err, "Ignoring invalid stored setting, using default");
                Ok(None)
            }
        }
    }
}
