use std::sync::Arc;

use crate::config::Config;
use crate::firewall::Firewall;
use crate::login::policy::{LoginAttemptPolicy, NoticeTarget, Throttle};
use crate::notify::MailLogNotifier;
use crate::store::attempts::AttemptStore;
use crate::store::kv::{JsonFileStore, KeyValueStore};
use crate::store::settings::SettingsStore;
use crate::store::whitelist::WhitelistStore;

pub struct AppState {
    pub policy: Arc<LoginAttemptPolicy>,
    pub firewall: Arc<Firewall>,
    pub settings: Arc<SettingsStore>,
    pub whitelist: Arc<WhitelistStore>,
    pub attempts: Arc<AttemptStore>,
    pub admin_token: String,
}

impl AppState {
    pub fn from_config(config: &Config, throttle: Arc<dyn Throttle>) -> anyhow::Result<Self> {
        let kv: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::load_or_create(&config.data_path)?);
        let settings = Arc::new(SettingsStore::new(kv.clone()));
        let whitelist = Arc::new(WhitelistStore::new(kv.clone()));
        let attempts = Arc::new(AttemptStore::new(kv));
        let firewall = Arc::new(Firewall::new(&config.htaccess_path, config.directive_style));

        let policy = LoginAttemptPolicy::new(
            whitelist.clone(),
            settings.clone(),
            attempts.clone(),
            firewall.clone(),
        )
        .with_throttle(throttle)
        .with_notices(NoticeTarget {
            notifier: Arc::new(MailLogNotifier),
            recipient: config.admin.email.clone(),
            site_url: config.site_url.clone(),
        });

        Ok(AppState {
            policy: Arc::new(policy),
            firewall,
            settings,
            whitelist,
            attempts,
            admin_token: config.admin.token.clone(),
        })
    }
}
