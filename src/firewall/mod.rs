pub mod access_file;
pub mod ip;

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;

use crate::error::GuardError;
use access_file::{AccessFileEditor, FileStatus, lines_with_prefix, strip_frame};
use ip::Ip;

pub const MARKER: &str = "Brute Force Login Protection";

const MESSAGE_PREFIX: &str = "ErrorDocument 403 ";
const CLASSIC_DENY: &str = "deny from ";
const MODERN_DENY: &str = "Require not ip ";
const MANAGED_PREFIXES: &[&str] = &[CLASSIC_DENY, MODERN_DENY, MESSAGE_PREFIX];

const FILES_OPEN: &str = "<Files \"*\">";
const FILES_CLOSE: &str = "</Files>";
const CLASSIC_HEADER: &[&str] = &[FILES_OPEN, "order deny,allow"];
const MODERN_HEADER: &[&str] = &[FILES_OPEN, "<RequireAll>", "Require all granted"];
const CLASSIC_FOOTER: &[&str] = &[FILES_CLOSE];
const MODERN_FOOTER: &[&str] = &["</RequireAll>", FILES_CLOSE];
const ALL_FRAME: &[&str] = &[
    FILES_OPEN,
    "order deny,allow",
    "<RequireAll>",
    "Require all granted",
    "</RequireAll>",
    FILES_CLOSE,
];

/// Which access-control directive set the web server understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectiveStyle {
    /// Apache 2.2 `order`/`deny from`.
    Classic,
    /// Apache 2.4 `Require`.
    Modern,
}

impl DirectiveStyle {
    fn header(self) -> &'static [&'static str] {
        match self {
            DirectiveStyle::Classic => CLASSIC_HEADER,
            DirectiveStyle::Modern => MODERN_HEADER,
        }
    }

    fn footer(self) -> &'static [&'static str] {
        match self {
            DirectiveStyle::Classic => CLASSIC_FOOTER,
            DirectiveStyle::Modern => MODERN_FOOTER,
        }
    }

    fn deny_line(self, ip: &Ip) -> String {
        match self {
            DirectiveStyle::Classic => format!("{CLASSIC_DENY}{ip}"),
            DirectiveStyle::Modern => format!("{MODERN_DENY}{ip}"),
        }
    }
}

impl FromStr for DirectiveStyle {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "classic" | "2.2" => Ok(DirectiveStyle::Classic),
            "modern" | "2.4" => Ok(DirectiveStyle::Modern),
            other => anyhow::bail!("unknown directive style {other:?} (expected classic or modern)"),
        }
    }
}

/// Something that can block an address. The login policy only needs this.
pub trait Enforcer: Send + Sync {
    fn deny(&self, ip: &Ip) -> Result<(), GuardError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry {
    Deny(Ip),
    /// Escaped message text as it appears between the quotes.
    Message(String),
    /// A managed line an administrator commented out inside an active block.
    /// Stored with its comment prefix and never re-enabled.
    Disabled(String),
    /// A line this system does not manage; kept verbatim.
    Other(String),
}

/// The block body between the frame lines, parsed into entries.
#[derive(Debug)]
struct Body {
    entries: Vec<Entry>,
    suspended: bool,
}

impl Body {
    /// With the frame present, commented managed lines were disabled by hand
    /// and stay disabled. Without it, a single `#` marks a suspended entry and
    /// a doubled `##` a hand-disabled one.
    fn parse(lines: &[String]) -> Self {
        let has_frame = lines.iter().any(|l| l.trim() == FILES_OPEN);
        let mut commented = false;
        let mut entries = Vec::new();

        for line in strip_frame(lines, ALL_FRAME) {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let hashes = trimmed.len() - trimmed.trim_start_matches('#').len();
            let uncommented = trimmed[hashes..].trim_start();
            let candidate = [uncommented.to_string()];
            if lines_with_prefix(&candidate, MANAGED_PREFIXES).is_empty() {
                entries.push(Entry::Other(line));
                continue;
            }

            let disabled = if has_frame { hashes > 0 } else { hashes > 1 };
            if disabled {
                let kept = if has_frame { trimmed } else { &trimmed[1..] };
                entries.push(Entry::Disabled(kept.to_string()));
                continue;
            }
            match parse_managed(uncommented) {
                Some(entry) => {
                    commented |= hashes > 0;
                    entries.push(entry);
                }
                None => entries.push(Entry::Other(line)),
            }
        }

        Body {
            entries,
            suspended: !has_frame && commented,
        }
    }

    /// Managed entries appear at most once; first occurrence wins.
    fn dedup(&mut self) {
        let mut seen_ips = Vec::new();
        let mut seen_message = false;
        self.entries.retain(|entry| match entry {
            Entry::Deny(ip) if seen_ips.contains(ip) => false,
            Entry::Deny(ip) => {
                seen_ips.push(*ip);
                true
            }
            Entry::Message(_) if seen_message => false,
            Entry::Message(_) => {
                seen_message = true;
                true
            }
            Entry::Disabled(_) | Entry::Other(_) => true,
        });
    }

    fn render(&self, style: DirectiveStyle) -> Vec<String> {
        if self.entries.is_empty() {
            return Vec::new();
        }

        let comment = if self.suspended { "#" } else { "" };
        let mut lines = Vec::new();
        if !self.suspended {
            lines.extend(style.header().iter().map(|l| l.to_string()));
        }
        for entry in &self.entries {
            lines.push(match entry {
                Entry::Deny(ip) => format!("{comment}{}", style.deny_line(ip)),
                Entry::Message(text) => format!("{comment}{MESSAGE_PREFIX}\"{text}\""),
                Entry::Disabled(line) => format!("{comment}{line}"),
                Entry::Other(line) => line.clone(),
            });
        }
        if !self.suspended {
            lines.extend(style.footer().iter().map(|l| l.to_string()));
        }
        lines
    }

    fn denied(&self) -> Vec<Ip> {
        self.entries
            .iter()
            .filter_map(|e| match e {
                Entry::Deny(ip) => Some(*ip),
                _ => None,
            })
            .collect()
    }
}

/// Only the quoted text form of `ErrorDocument 403` is ours; a local path or
/// URL target is an external directive and stays untouched.
fn parse_managed(line: &str) -> Option<Entry> {
    if let Some(rest) = line.strip_prefix(MESSAGE_PREFIX) {
        return rest
            .trim()
            .strip_prefix('"')
            .and_then(|r| r.strip_suffix('"'))
            .map(|text| Entry::Message(text.to_string()));
    }
    let addr = line
        .strip_prefix(CLASSIC_DENY)
        .or_else(|| line.strip_prefix(MODERN_DENY))?;
    match Ip::parse(addr) {
        Ok(ip) => Some(Entry::Deny(ip)),
        Err(_) => {
            tracing::warn!("Skipping unparseable deny line {:?}", line);
            None
        }
    }
}

/// Escape a message so it stays inside the quoted directive argument.
fn escape_message(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    for c in message.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\r' | '\n' => out.push(' '),
            c => out.push(c),
        }
    }
    out
}

fn unescape_message(escaped: &str) -> String {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Blocks addresses through the marker block of an access-control file.
/// Every operation re-reads the file; nothing is cached between calls.
#[derive(Debug, Clone)]
pub struct Firewall {
    editor: AccessFileEditor,
    style: DirectiveStyle,
}

impl Firewall {
    pub fn new(path: impl Into<PathBuf>, style: DirectiveStyle) -> Self {
        Firewall {
            editor: AccessFileEditor::new(path, MARKER),
            style,
        }
    }

    pub fn path(&self) -> &Path {
        self.editor.path()
    }

    pub fn status(&self) -> FileStatus {
        self.editor.status()
    }

    pub fn undeny(&self, ip: &Ip) -> Result<(), GuardError> {
        self.edit(|body| body.entries.retain(|e| e != &Entry::Deny(*ip)))?;
        tracing::info!(%ip, "IP unblocked");
        Ok(())
    }

    pub fn set_blocked_message(&self, message: &str) -> Result<(), GuardError> {
        let escaped = escape_message(message.trim());
        self.edit(|body| {
            body.entries.retain(|e| !matches!(e, Entry::Message(_)));
            if !escaped.is_empty() {
                body.entries.insert(0, Entry::Message(escaped));
            }
        })
    }

    pub fn blocked_message(&self) -> Result<Option<String>, GuardError> {
        let body = Body::parse(&self.editor.extract_block()?);
        Ok(body.entries.into_iter().find_map(|e| match e {
            Entry::Message(text) => Some(unescape_message(&text)),
            _ => None,
        }))
    }

    /// Blocked addresses in file order, suspended ones included.
    pub fn list_denied(&self) -> Result<Vec<Ip>, GuardError> {
        let mut body = Body::parse(&self.editor.extract_block()?);
        body.dedup();
        Ok(body.denied())
    }

    pub fn is_active(&self) -> Result<bool, GuardError> {
        Ok(!Body::parse(&self.editor.extract_block()?).suspended)
    }

    /// Resume enforcement: uncomment managed lines and restore the frame.
    pub fn reactivate(&self) -> Result<(), GuardError> {
        self.edit(|body| body.suspended = false)?;
        tracing::info!(path = %self.editor.path().display(), "Firewall reactivated");
        Ok(())
    }

    /// Suspend enforcement without forgetting the blocked list.
    pub fn deactivate(&self) -> Result<(), GuardError> {
        self.edit(|body| body.suspended = true)?;
        tracing::info!(path = %self.editor.path().display(), "Firewall deactivated");
        Ok(())
    }

    fn edit<F: FnOnce(&mut Body)>(&self, f: F) -> Result<(), GuardError> {
        self.editor.edit_block(|lines| {
            let mut body = Body::parse(&lines);
            f(&mut body);
            body.dedup();
            body.render(self.style)
        })?;
        Ok(())
    }
}

impl Enforcer for Firewall {
    fn deny(&self, ip: &Ip) -> Result<(), GuardError> {
        self.edit(|body| body.entries.push(Entry::Deny(*ip)))?;
        tracing::info!(%ip, "IP denied in access file");
        Ok(())
    }
}
