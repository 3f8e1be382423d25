use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

mod admin;
mod api;
mod config;
mod error;
mod firewall;
mod login;
mod notify;
mod state;
mod store;

use config::Config;
use login::policy::SleepThrottle;
use state::AppState;

fn app(state: Arc<AppState>) -> Router {
    Router::new()
        // Login events from the host application
        .route("/events/login-failed", post(api::events::login_failed))
        .route("/events/login-succeeded", post(api::events::login_succeeded))
        // Admin routes
        .route("/admin/status", get(admin::routes::status))
        .route(
            "/admin/blocked",
            get(admin::routes::list_blocked).post(admin::routes::block_ip),
        )
        .route("/admin/blocked/{ip}", delete(admin::routes::unblock_ip))
        .route(
            "/admin/whitelist",
            get(admin::routes::list_whitelist).post(admin::routes::whitelist_ip),
        )
        .route("/admin/whitelist/{ip}", delete(admin::routes::unwhitelist_ip))
        .route("/admin/attempts", get(admin::routes::list_attempts))
        .route(
            "/admin/settings",
            get(admin::routes::get_settings).put(admin::routes::update_settings),
        )
        .route("/admin/settings/reset", post(admin::routes::reset_settings))
        .route(
            "/admin/firewall/activate",
            post(admin::routes::activate_firewall),
        )
        .route(
            "/admin/firewall/deactivate",
            post(admin::routes::deactivate_firewall),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    let state = Arc::new(AppState::from_config(&config, Arc::new(SleepThrottle))?);

    let status = state.firewall.status();
    if !status.exists {
        tracing::warn!(
            "Access file {} not found, it will be created on first block",
            config.htaccess_path.display()
        );
    } else if !status.writable {
        tracing::warn!(
            "Access file {} is not writable, blocking is disabled",
            config.htaccess_path.display()
        );
    }

    if config.suspend_on_shutdown {
        if let Err(e) = state.firewall.reactivate() {
            tracing::warn!("Could not reactivate firewall: {}", e);
        }
    }

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("loginguard listening on {}", config.bind_addr);
    axum::serve(
        listener,
        app(state.clone()).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    if config.suspend_on_shutdown {
        if let Err(e) = state.firewall.deactivate() {
            tracing::warn!("Could not deactivate firewall: {}", e);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    use axum::body::Body;
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::config::AdminConfig;
    use crate::firewall::DirectiveStyle;
    use crate::login::policy::Throttle;

    const TOKEN: &str = "test-token";

    struct NoDelay;

    impl Throttle for NoDelay {
        fn pause(&self, _delay: Duration) {}
    }

    fn test_app(dir: &TempDir) -> Router {
        let config = Config {
            bind_addr: "127.0.0.1:0".to_string(),
            htaccess_path: dir.path().join(".htaccess"),
            data_path: dir.path().join("loginguard.json"),
            directive_style: DirectiveStyle::Classic,
            site_url: "https://example.com".to_string(),
            suspend_on_shutdown: false,
            admin: AdminConfig {
                token: TOKEN.to_string(),
                email: None,
            },
        };
        let state = AppState::from_config(&config, Arc::new(NoDelay)).unwrap();
        app(Arc::new(state)).layer(MockConnectInfo(SocketAddr::from(([198, 51, 100, 7], 4000))))
    }

    fn request(method: &str, uri: &str, body: Value, admin: bool) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        if admin {
            builder = builder.header("authorization", format!("Bearer {TOKEN}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn htaccess(dir: &TempDir) -> String {
        fs::read_to_string(dir.path().join(".htaccess")).unwrap_or_default()
    }

    async fn set_allowed_attempts(app: &Router, n: u32) {
        let (status, _) = send(
            app,
            request("PUT", "/admin/settings", json!({ "allowed_attempts": n }), true),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_failed_logins_lead_to_block() {
        let dir = TempDir::new().unwrap();
        let app = test_app(&dir);
        set_allowed_attempts(&app, 3).await;

        let event = json!({ "ip": "203.0.113.5" });
        let (status, body) = send(&app, request("POST", "/events/login-failed", event.clone(), false)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "outcome": "tracked", "remaining_attempts": 2 }));

        send(&app, request("POST", "/events/login-failed", event.clone(), false)).await;
        let (status, body) = send(&app, request("POST", "/events/login-failed", event, false)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["outcome"], "blocked");
        assert!(htaccess(&dir).contains("deny from 203.0.113.5\n"));

        let (_, blocked) = send(&app, request("GET", "/admin/blocked", Value::Null, true)).await;
        assert_eq!(blocked, json!(["203.0.113.5"]));
    }

    #[tokio::test]
    async fn test_peer_address_used_when_ip_missing() {
        let dir = TempDir::new().unwrap();
        let app = test_app(&dir);
        send(&app, request("POST", "/events/login-failed", json!({}), false)).await;

        let (_, attempts) = send(&app, request("GET", "/admin/attempts", Value::Null, true)).await;
        assert_eq!(attempts[0]["ip"], "198.51.100.7");
        assert_eq!(attempts[0]["count"], 1);

        let (_, body) = send(&app, request("POST", "/events/login-succeeded", json!({}), false)).await;
        assert_eq!(body, json!({ "outcome": "cleared" }));
        let (_, attempts) = send(&app, request("GET", "/admin/attempts", Value::Null, true)).await;
        assert_eq!(attempts, json!([]));
    }

    #[tokio::test]
    async fn test_invalid_event_ip_rejected() {
        let dir = TempDir::new().unwrap();
        let app = test_app(&dir);
        let (status, _) = send(
            &app,
            request("POST", "/events/login-failed", json!({ "ip": "999.1.1.1" }), false),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!dir.path().join(".htaccess").exists());
    }

    #[tokio::test]
    async fn test_corrupt_access_file_leaves_login_unprotected() {
        let dir = TempDir::new().unwrap();
        let app = test_app(&dir);
        set_allowed_attempts(&app, 1).await;
        let original = "# BEGIN Brute Force Login Protection\ndeny from 1.1.1.1\n";
        fs::write(dir.path().join(".htaccess"), original).unwrap();

        let (status, body) = send(
            &app,
            request("POST", "/events/login-failed", json!({ "ip": "2.2.2.2" }), false),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "outcome": "unprotected" }));
        assert_eq!(htaccess(&dir), original);

        let (status, _) = send(&app, request("POST", "/admin/blocked", json!({ "ip": "3.3.3.3" }), true)).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_admin_requires_token() {
        let dir = TempDir::new().unwrap();
        let app = test_app(&dir);
        let (status, _) = send(&app, request("GET", "/admin/blocked", Value::Null, false)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let req = Request::builder()
            .uri("/admin/blocked")
            .header("authorization", "Bearer wrong")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_manual_block_and_whitelist() {
        let dir = TempDir::new().unwrap();
        let app = test_app(&dir);

        let (status, _) = send(&app, request("POST", "/admin/blocked", json!({ "ip": "10.0.0.1" }), true)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(htaccess(&dir).contains("deny from 10.0.0.1"));

        // Whitelisting lifts the block.
        let (status, _) = send(&app, request("POST", "/admin/whitelist", json!({ "ip": "10.0.0.1" }), true)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(!htaccess(&dir).contains("10.0.0.1"));

        // A whitelisted address cannot be blocked manually.
        let (status, _) = send(&app, request("POST", "/admin/blocked", json!({ "ip": "10.0.0.1" }), true)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(&app, request("DELETE", "/admin/whitelist/10.0.0.1", Value::Null, true)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, request("DELETE", "/admin/whitelist/10.0.0.1", Value::Null, true)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        send(&app, request("POST", "/admin/blocked", json!({ "ip": "10.0.0.2" }), true)).await;
        let (status, _) = send(&app, request("DELETE", "/admin/blocked/10.0.0.2", Value::Null, true)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, blocked) = send(&app, request("GET", "/admin/blocked", Value::Null, true)).await;
        assert_eq!(blocked, json!([]));
    }

    #[tokio::test]
    async fn test_settings_update_reports_rejections() {
        let dir = TempDir::new().unwrap();
        let app = test_app(&dir);
        let (status, body) = send(
            &app,
            request(
                "PUT",
                "/admin/settings",
                json!({
                    "allowed_attempts": 0,
                    "reset_time_minutes": "30",
                    "blocked_message": "Too many attempts",
                    "inform_user": false
                }),
                true,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["settings"]["allowed_attempts"], 20);
        assert_eq!(body["settings"]["reset_time_minutes"], 30);
        assert_eq!(body["settings"]["inform_user"], false);
        assert_eq!(body["settings"]["blocked_message"], "Too many attempts");
        assert_eq!(body["rejected"][0]["field"], "allowed_attempts");
        assert!(htaccess(&dir).contains("ErrorDocument 403 \"Too many attempts\""));

        let (_, body) = send(&app, request("POST", "/admin/settings/reset", Value::Null, true)).await;
        assert_eq!(body["blocked_message"], "");
        assert!(!htaccess(&dir).contains("ErrorDocument"));
    }

    #[tokio::test]
    async fn test_blocked_message_kept_when_file_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let app = test_app(&dir);
        fs::write(dir.path().join(".htaccess"), "# BEGIN Brute Force Login Protection\n").unwrap();

        let (_, body) = send(
            &app,
            request("PUT", "/admin/settings", json!({ "blocked_message": "bye" }), true),
        )
        .await;
        assert_eq!(body["settings"]["blocked_message"], "");
        assert_eq!(body["rejected"][0]["field"], "blocked_message");
    }

    #[tokio::test]
    async fn test_deactivate_and_activate() {
        let dir = TempDir::new().unwrap();
        let app = test_app(&dir);
        send(&app, request("POST", "/admin/blocked", json!({ "ip": "10.0.0.9" }), true)).await;

        let (status, _) = send(&app, request("POST", "/admin/firewall/deactivate", Value::Null, true)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(htaccess(&dir).contains("#deny from 10.0.0.9"));
        let (_, status_view) = send(&app, request("GET", "/admin/status", Value::Null, true)).await;
        assert_eq!(status_view["active"], false);
        assert_eq!(status_view["blocked_count"], 1);

        send(&app, request("POST", "/admin/firewall/activate", Value::Null, true)).await;
        let content = htaccess(&dir);
        assert!(content.contains("\ndeny from 10.0.0.9\n"));
        assert!(!content.contains("#deny"));
    }
}
