use std::sync::Arc;

use serde_json::Value;

use super::kv::KeyValueStore;
use crate::error::GuardError;
use crate::firewall::ip::Ip;

const KEY: &str = "whitelist";

/// Addresses that bypass attempt tracking and blocking entirely.
pub struct WhitelistStore {
    kv: Arc<dyn KeyValueStore>,
}

impl WhitelistStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        WhitelistStore { kv }
    }

    /// Stored addresses in insertion order. Entries that no longer parse are
    /// dropped with a warning.
    pub fn all(&self) -> Result<Vec<Ip>, GuardError> {
        let Some(value) = self.kv.get(KEY)? else {
            return Ok(Vec::new());
        };
        let Value::Array(items) = value else {
            tracing::warn!("Whitelist entry is not a list, ignoring it");
            return Ok(Vec::new());
        };

        let mut ips = Vec::with_capacity(items.len());
        for item in items {
            match item.as_str().map(Ip::parse) {
                Some(Ok(ip)) if !ips.contains(&ip) => ips.push(ip),
                Some(Ok(_)) => {}
                _ => tracing::warn!(entry = %item, "Ignoring invalid whitelist entry"),
            }
        }
        Ok(ips)
    }

    pub fn contains(&self, ip: &Ip) -> Result<bool, GuardError> {
        Ok(self.all()?.contains(ip))
    }

    /// Returns false if the address was already whitelisted.
    pub fn add(&self, ip: Ip) -> Result<bool, GuardError> {
        let mut ips = self.all()?;
        if ips.contains(&ip) {
            return Ok(false);
        }
        ips.push(ip);
        self.save(&ips)?;
        tracing::info!(%ip, "IP whitelisted");
        Ok(true)
    }

    /// Returns false if the address was not whitelisted.
    pub fn remove(&self, ip: &Ip) -> Result<bool, GuardError> {
        let mut ips = self.all()?;
        let before = ips.len();
        ips.retain(|i| i != ip);
        if ips.len() == before {
            return Ok(false);
        }
        self.save(&ips)?;
        tracing::info!(%ip, "IP removed from whitelist");
        Ok(true)
    }

    fn save(&self, ips: &[Ip]) -> Result<(), GuardError> {
        self.kv.set(KEY, serde_json::to_value(ips)?)
    }
}
