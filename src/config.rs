use std::path::PathBuf;

use crate::firewall::DirectiveStyle;

#[derive(Clone)]
pub struct Config {
    pub bind_addr: String,
    pub htaccess_path: PathBuf,
    pub data_path: PathBuf,
    pub directive_style: DirectiveStyle,
    pub site_url: String,
    pub suspend_on_shutdown: bool,
    pub admin: AdminConfig,
}

#[derive(Clone)]
pub struct AdminConfig {
    pub token: String,
    pub email: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let token = std::env::var("LOGINGUARD_ADMIN_TOKEN")
            .map_err(|_| anyhow::anyhow!("LOGINGUARD_ADMIN_TOKEN environment variable is required"))?;
        if token.trim().is_empty() {
            anyhow::bail!("LOGINGUARD_ADMIN_TOKEN must not be empty");
        }

        let directive_style: DirectiveStyle = std::env::var("LOGINGUARD_DIRECTIVE_STYLE")
            .unwrap_or_else(|_| "classic".to_string())
            .parse()?;

        let suspend_on_shutdown = match std::env::var("LOGINGUARD_SUSPEND_ON_SHUTDOWN") {
            Ok(v) => parse_flag(&v).ok_or_else(|| {
                anyhow::anyhow!("LOGINGUARD_SUSPEND_ON_SHUTDOWN must be true or false, got {v:?}")
            })?,
            Err(_) => false,
        };

        Ok(Config {
            bind_addr: {
                let port = std::env::var("LOGINGUARD_PORT").unwrap_or_else(|_| "8080".to_string());
                std::env::var("LOGINGUARD_BIND_ADDR")
                    .unwrap_or_else(|_| format!("0.0.0.0:{}", port))
            },
            htaccess_path: PathBuf::from(
                std::env::var("LOGINGUARD_HTACCESS_PATH")
                    .unwrap_or_else(|_| "./.htaccess".to_string()),
            ),
            data_path: PathBuf::from(
                std::env::var("LOGINGUARD_DATA_PATH")
                    .unwrap_or_else(|_| "./loginguard.json".to_string()),
            ),
            directive_style,
            site_url: std::env::var("LOGINGUARD_SITE_URL")
                .unwrap_or_else(|_| "http://localhost".to_string()),
            suspend_on_shutdown,
            admin: AdminConfig {
                token,
                email: std::env::var("LOGINGUARD_ADMIN_EMAIL")
                    .ok()
                    .filter(|e| !e.trim().is_empty()),
            },
        })
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
