//! The hosting platform boundary.
//!
//! The platform only knows ID-addressed deployment records. Every call is a
//! blocking round trip; the real implementation drives the `clasp` CLI
//! ([`clasp::ClaspPlatform`]).

pub mod clasp;
pub mod parse;

#[cfg(test)]
pub(crate) mod fake;

use serde::Serialize;
use std::path::Path;
use thiserror::Error;

/// Version tag the platform gives its unstable editable-revision pseudo-record.
pub const HEAD: &str = "HEAD";

// ---------------------------------------------------------------------------
// DeploymentEntry
// ---------------------------------------------------------------------------

/// One row of the platform's live deployment listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentEntry {
    pub id: String,
    /// Version number, or `HEAD` for the pseudo-record.
    pub version: String,
    pub description: String,
}

impl DeploymentEntry {
    pub fn is_head(&self) -> bool {
        self.version == HEAD || self.id == HEAD
    }
}

// ---------------------------------------------------------------------------
// PlatformError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PlatformError {
    /// The platform refused because the live deployment cap is reached.
    #[error("deployment quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("`{command}` failed: {output}")]
    CommandFailed { command: String, output: String },

    #[error("`{command}` timed out after {seconds}s")]
    Timeout { command: String, seconds: u64 },

    #[error("failed to spawn `{command}`: {reason}")]
    Spawn { command: String, reason: String },

    #[error("could not parse platform output: {0}")]
    UnparsableOutput(String),
}

impl PlatformError {
    pub fn is_quota(&self) -> bool {
        matches!(self, PlatformError::QuotaExceeded(_))
    }
}

pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

// ---------------------------------------------------------------------------
// Platform
// ---------------------------------------------------------------------------

/// Operations the publish core needs from one platform project.
pub trait Platform {
    /// Overwrite the remote editable revision with the contents of `root`.
    fn push(&self, root: &Path) -> PlatformResult<()>;

    /// Create a new deployment record from the pushed revision. Returns its id.
    fn create(&self, description: &str) -> PlatformResult<String>;

    /// Point an existing record at the pushed revision.
    fn update(&self, id: &str, description: &str) -> PlatformResult<()>;

    /// Live listing, `HEAD` included.
    fn list(&self) -> PlatformResult<Vec<DeploymentEntry>>;

    fn delete(&self, id: &str) -> PlatformResult<()>;

    fn version_count(&self) -> PlatformResult<u32>;

    /// Where an operator can manage deployments and version history by hand.
    fn console_url(&self) -> Option<String> {
        None
    }
}

/// Listing rows that can back a channel: everything except `HEAD`.
pub fn candidates(listing: &[DeploymentEntry]) -> impl Iterator<Item = &DeploymentEntry> {
    listing.iter().filter(|e| !e.is_head())
}
