//! Failed-login tracking and the decision to block.
//!
//! Per address the policy moves between Clean (no record), Tracking (a count
//! and the time of the last failure) and Blocked (a deny line in the access
//! file). Blocking is terminal here: only an administrator unblocks, and a
//! successful login only clears the counter.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::error::GuardError;
use crate::firewall::Enforcer;
use crate::firewall::ip::Ip;
use crate::notify::{BlockNotice, Notifier};
use crate::store::attempts::{AttemptRecord, AttemptStore};
use crate::store::settings::SettingsStore;
use crate::store::whitelist::WhitelistStore;

/// Pause applied to every non-whitelisted failed login.
pub trait Throttle: Send + Sync {
    fn pause(&self, delay: Duration);
}

/// Blocks the calling thread for the full delay.
pub struct SleepThrottle;

impl Throttle for SleepThrottle {
    fn pause(&self, delay: Duration) {
        std::thread::sleep(delay);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FailureOutcome {
    Bypassed,
    Tracked {
        #[serde(skip_serializing_if = "Option::is_none")]
        remaining_attempts: Option<u32>,
    },
    Blocked {
        message: String,
    },
}

/// Where block notices go.
pub struct NoticeTarget {
    pub notifier: Arc<dyn Notifier>,
    pub recipient: Option<String>,
    pub site_url: String,
}

pub struct LoginAttemptPolicy {
    whitelist: Arc<WhitelistStore>,
    settings: Arc<SettingsStore>,
    attempts: Arc<AttemptStore>,
    enforcer: Arc<dyn Enforcer>,
    throttle: Arc<dyn Throttle>,
    notices: Option<NoticeTarget>,
    // Serializes the load/decide/store sequence on the attempt store.
    tracking: Mutex<()>,
}

impl LoginAttemptPolicy {
    pub fn new(
        whitelist: Arc<WhitelistStore>,
        settings: Arc<SettingsStore>,
        attempts: Arc<AttemptStore>,
        enforcer: Arc<dyn Enforcer>,
    ) -> Self {
        LoginAttemptPolicy {
            whitelist,
            settings,
            attempts,
            enforcer,
            throttle: Arc::new(SleepThrottle),
            notices: None,
            tracking: Mutex::new(()),
        }
    }

    pub fn with_throttle(mut self, throttle: Arc<dyn Throttle>) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn with_notices(mut self, target: NoticeTarget) -> Self {
        self.notices = Some(target);
        self
    }

    pub fn on_login_failed(&self, ip: &Ip, now: DateTime<Utc>) -> Result<FailureOutcome, GuardError> {
        if self.whitelist.contains(ip)? {
            tracing::debug!(%ip, "Failed login from whitelisted IP ignored");
            return Ok(FailureOutcome::Bypassed);
        }

        let settings = self.settings.load()?;
        self.throttle
            .pause(Duration::from_secs(settings.login_failed_delay_seconds.into()));

        let _guard = self
            .tracking
            .lock()
            .map_err(|_| GuardError::Store("attempt tracking lock poisoned".to_string()))?;

        let window = TimeDelta::minutes(settings.reset_time_minutes.into());
        let count = match self.attempts.get(ip)? {
            Some(record) if record.last_failed_at >= now - window => record.count.saturating_add(1),
            _ => 1,
        };

        if count >= settings.allowed_attempts {
            self.attempts.remove(ip)?;
            self.enforcer.deny(ip)?;
            tracing::info!(%ip, count, "IP blocked after repeated failed logins");
            if settings.send_email {
                self.send_notice(ip, now);
            }
            return Ok(FailureOutcome::Blocked {
                message: settings.blocked_message,
            });
        }

        self.attempts.put(
            ip,
            &AttemptRecord {
                count,
                last_failed_at: now,
            },
        )?;
        tracing::debug!(%ip, count, "Failed login recorded");

        Ok(FailureOutcome::Tracked {
            remaining_attempts: settings
                .inform_user
                .then(|| settings.allowed_attempts - count),
        })
    }

    /// Clears the failure counter. Never lifts a block.
    pub fn on_login_succeeded(&self, ip: &Ip) -> Result<(), GuardError> {
        let _guard = self
            .tracking
            .lock()
            .map_err(|_| GuardError::Store("attempt tracking lock poisoned".to_string()))?;
        self.attempts.remove(ip)
    }

    fn send_notice(&self, ip: &Ip, now: DateTime<Utc>) {
        let Some(target) = &self.notices else {
            return;
        };
        match &target.recipient {
            Some(recipient) => target
                .notifier
                .send(BlockNotice::new(recipient, ip, &target.site_url, now)),
            None => tracing::warn!(%ip, "Email notice enabled but no administrator address configured"),
        }
    }
}
