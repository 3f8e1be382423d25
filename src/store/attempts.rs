use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::kv::KeyValueStore;
use crate::error::GuardError;
use crate::firewall::ip::Ip;

const KEY_PREFIX: &str = "attempts.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub count: u32,
    pub last_failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackedIp {
    pub ip: Ip,
    #[serde(flatten)]
    pub record: AttemptRecord,
}

/// Failed-login counters, one key per address.
pub struct AttemptStore {
    kv: Arc<dyn KeyValueStore>,
}

impl AttemptStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        AttemptStore { kv }
    }

    pub fn get(&self, ip: &Ip) -> Result<Option<AttemptRecord>, GuardError> {
        let Some(value) = self.kv.get(&key(ip))? else {
            return Ok(None);
        };
        match serde_json::from_value(value) {
            Ok(record) => Ok(Some(record)),
            Err(err) => {
                tracing::warn!(%ip, %err, "Discarding unreadable attempt record");
                Ok(None)
            }
        }
    }

    pub fn put(&self, ip: &Ip, record: &AttemptRecord) -> Result<(), GuardError> {
        self.kv.set(&key(ip), serde_json::to_value(record)?)
    }

    pub fn remove(&self, ip: &Ip) -> Result<(), GuardError> {
        self.kv.delete(&key(ip))
    }

    /// Every address currently being tracked.
    pub fn all(&self) -> Result<Vec<TrackedIp>, GuardError> {
        let mut tracked = Vec::new();
        for key in self.kv.keys_with_prefix(KEY_PREFIX)? {
            let Ok(ip) = Ip::parse(&key[KEY_PREFIX.len()..]) else {
                continue;
            };
            if let Some(record) = self.get(&ip)? {
                tracked.push(TrackedIp { ip, record });
            }
        }
        Ok(tracked)
    }
}

fn key(ip: &Ip) -> String {
    format!("{KEY_PREFIX}{ip}")
}
