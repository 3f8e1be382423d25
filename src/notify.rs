use chrono::{DateTime, Utc};

use crate::firewall::ip::Ip;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockNotice {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

impl BlockNotice {
    pub fn new(recipient: &str, ip: &Ip, site_url: &str, at: DateTime<Utc>) -> Self {
        BlockNotice {
            recipient: recipient.to_string(),
            subject: format!("IP {ip} has been blocked"),
            body: format!(
                "Brute Force Login Protection has blocked IP {ip} from access to {site_url} on {}",
                at.format("%Y-%m-%d %H:%M:%S")
            ),
        }
    }
}

/// Fire-and-forget delivery of block notices. Implementations must not fail
/// the caller; delivery problems are theirs to log.
pub trait Notifier: Send + Sync {
    fn send(&self, notice: BlockNotice);
}

/// Hands notices to the log pipeline, where the mail relay picks them up.
pub struct MailLogNotifier;

impl Notifier for MailLogNotifier {
    fn send(&self, notice: BlockNotice) {
        tracing::info!(
            target: "loginguard::mail",
            to = %notice.recipient,
            subject = %notice.subject,
            "{}",
            notice.body
        );
    }
}
