//! Post-resolution cleanup that keeps each platform project under its live
//! deployment cap.
//!
//! The sweep deletes every record that is neither `HEAD` nor protected. It
//! must only run once every channel of the run has been resolved; anything
//! earlier could delete the record a later channel was about to adopt.

use crate::config::PlatformSettings;
use crate::platform::{candidates, Platform};
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub project: String,
    pub deleted: Vec<String>,
    /// Records that should have been deleted but the platform refused.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_count: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

pub struct QuotaGuardian<'a> {
    settings: &'a PlatformSettings,
    protected: BTreeSet<String>,
}

impl<'a> QuotaGuardian<'a> {
    /// `protected` must hold every binding that existed at run start and every
    /// binding after resolution.
    pub fn new(settings: &'a PlatformSettings, protected: BTreeSet<String>) -> Self {
        Self {
            settings,
            protected,
        }
    }

    pub fn sweep(&self, project: &str, platform: &dyn Platform) -> SweepReport {
        let mut report = SweepReport {
            project: project.to_string(),
            ..SweepReport::default()
        };

        match platform.list() {
            Ok(listing) => {
                let stale: Vec<String> = candidates(&listing)
                    .filter(|e| !self.protected.contains(&e.id))
                    .map(|e| e.id.clone())
                    .collect();
                if stale.is_empty() {
                    tracing::info!(%project, live = listing.len(), "no untracked deployments");
                }
                for id in stale {
                    match platform.delete(&id) {
                        Ok(()) => {
                            tracing::info!(%project, %id, "deleted untracked deployment");
                            report.deleted.push(id);
                        }
                        Err(e) => {
                            tracing::warn!(%project, %id, error = %e, "failed to delete deployment");
                            report.failed.push(id);
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(%project, error = %e, "could not list deployments; cleanup skipped");
                report
                    .warnings
                    .push(format!("{project}: cleanup skipped, listing failed: {e}"));
            }
        }

        match platform.version_count() {
            Ok(count) => {
                report.version_count = Some(count);
                if self.settings.near_version_ceiling(count) {
                    let mut message = format!(
                        "{project}: {count} of {} versions used; delete old versions by hand before the limit blocks deploys",
                        self.settings.version_ceiling
                    );
                    if let Some(url) = platform.console_url() {
                        message.push_str(&format!(" ({url})"));
                    }
                    tracing::warn!("{message}");
                    report.warnings.push(message);
                }
            }
            Err(e) => {
                tracing::warn!(%project, error = %e, "could not read version count");
            }
        }

        report
    }
}
