//! Parsers for `clasp` command output.

use super::DeploymentEntry;
use regex::Regex;
use std::sync::OnceLock;

macro_rules! static_re {
    ($name:ident, $pattern:expr) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($pattern).unwrap())
        }
    };
}

static_re!(listing_line_re, r"^\s*-\s+(\S+)\s+@(\S+?)\.?(?:\s+-\s+(.*?))?\s*$");
static_re!(url_id_re, r"/macros/s/([A-Za-z0-9_-]+)/exec");
static_re!(deployed_re, r"(?i)Deployed\s+([A-Za-z0-9_-]+)(?:\s*@\d+)?");
static_re!(deployment_id_line_re, r"(?i)Deployment\s+ID[:\s]+([A-Za-z0-9_-]+)");
static_re!(long_token_re, r"[A-Za-z0-9_-]{20,}");
static_re!(version_total_re, r"(?i)~?(\d+)\s+Versions?\.");
static_re!(version_line_re, r"^\d+\s+-\s+");

/// Minimum length of a real deployment id; shorter tokens are noise.
const MIN_ID_LEN: usize = 20;

/// Parse `clasp deployments` output. Rows look like
/// `- <id> @<version|HEAD> [- <description>]`; anything else is skipped.
pub fn parse_listing(text: &str) -> Vec<DeploymentEntry> {
    let mut entries: Vec<DeploymentEntry> = Vec::new();
    for line in text.lines() {
        let Some(caps) = listing_line_re().captures(line) else {
            continue;
        };
        let id = caps[1].to_string();
        if entries.iter().any(|e| e.id == id) {
            continue;
        }
        entries.push(DeploymentEntry {
            id,
            version: caps[2].to_string(),
            description: caps
                .get(3)
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default(),
        });
    }
    entries
}

/// Extract the new deployment id from `clasp deploy` output.
///
/// Tried in order: an address URL, a `Deployed <id>` line, a
/// `Deployment ID: <id>` line, a `- <id> @<n>` row, and finally the last
/// id-shaped token of at least 20 characters.
pub fn parse_deployment_id(text: &str) -> Option<String> {
    if let Some(c) = url_id_re().captures(text) {
        return Some(c[1].to_string());
    }
    if let Some(c) = deployed_re().captures(text) {
        if c[1].len() >= MIN_ID_LEN {
            return Some(c[1].to_string());
        }
    }
    if let Some(c) = deployment_id_line_re().captures(text) {
        return Some(c[1].to_string());
    }
    if let Some(entry) = parse_listing(text)
        .into_iter()
        .find(|e| !e.is_head() && e.id.len() >= MIN_ID_LEN)
    {
        return Some(entry.id);
    }
    long_token_re()
        .find_iter(text)
        .last()
        .map(|m| m.as_str().to_string())
}

/// Parse `clasp versions` output: either a `~N Versions.` total or one
/// `N - description` row per version.
pub fn parse_version_count(text: &str) -> Option<u32> {
    if let Some(c) = version_total_re().captures(text) {
        return c[1].parse().ok();
    }
    let rows = text
        .lines()
        .filter(|l| version_line_re().is_match(l.trim()))
        .count();
    if rows > 0 {
        return u32::try_from(rows).ok();
    }
    if text.to_lowercase().contains("no versions") {
        return Some(0);
    }
    None
}

/// The platform reports the live-deployment cap with this phrase.
pub fn is_quota_message(text: &str) -> bool {
    text.to_lowercase().contains("versioned deployments")
}
