//! The publish run.
//!
//! A run moves through a fixed sequence of stages:
//!
//! ```text
//! Idle → Validating → Pushing(ch) → Resolving(ch) … → GuardingQuota → Propagating … → Done
//! ```
//!
//! `Failed` is reachable from validation, pushing, and quota errors during
//! resolution. A channel whose creation fails is marked failed while the rest
//! of the run continues; the run then ends `Failed` after cleanup and
//! propagation. Every stage entered is recorded in [`PublishReport::trace`].

use crate::config::{Config, Project};
use crate::gate::{self, Snapshot, Violation};
use crate::guardian::{QuotaGuardian, SweepReport};
use crate::platform::Platform;
use crate::propagate::Notifier;
use crate::resolver::{ResolveError, Resolver, Tier};
use crate::store::BindingStore;
use crate::transform::ManifestTransform;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// One platform handle per project, keyed by project name.
pub type Platforms<'a> = BTreeMap<String, &'a dyn Platform>;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PublishOptions {
    /// Push sources, then propagate from existing bindings. No resolution, no cleanup.
    pub push_only: bool,
    /// When false, the creation tier is skipped for every channel.
    pub allow_create: bool,
    /// Stamped into every deployment description.
    pub date: NaiveDate,
}

impl PublishOptions {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            push_only: false,
            allow_create: true,
            date,
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "stage", content = "subject", rename_all = "snake_case")]
pub enum Stage {
    Idle,
    Validating,
    Pushing(String),
    Resolving(String),
    GuardingQuota,
    Propagating(String),
    Done,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelOutcome {
    /// Existing binding updated in place.
    Bound,
    Discovered,
    /// New record; the address changed.
    Created,
    /// Push-only run: sources pushed, binding left as is.
    Pushed,
    /// No usable record and creation disabled.
    Degraded,
    Failed,
    /// Not reached, or no binding to report.
    Unresolved,
}

impl From<Tier> for ChannelOutcome {
    fn from(tier: Tier) -> Self {
        match tier {
            Tier::Bound => ChannelOutcome::Bound,
            Tier::Discovered => ChannelOutcome::Discovered,
            Tier::Created => ChannelOutcome::Created,
        }
    }
}

impl std::fmt::Display for ChannelOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChannelOutcome::Bound => "bound",
            ChannelOutcome::Discovered => "discovered",
            ChannelOutcome::Created => "created",
            ChannelOutcome::Pushed => "pushed",
            ChannelOutcome::Degraded => "degraded",
            ChannelOutcome::Failed => "failed",
            ChannelOutcome::Unresolved => "unresolved",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelReport {
    pub tag: String,
    pub project: String,
    pub outcome: ChannelOutcome,
    pub id: Option<String>,
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropagationReport {
    pub action: String,
    pub from: String,
    pub to: String,
    /// The address that was (or should have been) sent.
    pub address: Option<String>,
    pub delivered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishReport {
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violation: Option<Violation>,
    pub channels: Vec<ChannelReport>,
    pub sweeps: Vec<SweepReport>,
    pub propagations: Vec<PropagationReport>,
    pub warnings: Vec<String>,
    pub trace: Vec<Stage>,
}

impl PublishReport {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Done
    }

    pub fn channel(&self, tag: &str) -> Option<&ChannelReport> {
        self.channels.iter().find(|c| c.tag == tag)
    }

    pub fn deleted(&self) -> impl Iterator<Item = &str> {
        self.sweeps
            .iter()
            .flat_map(|s| s.deleted.iter().map(String::as_str))
    }
}

/// Mutable run state threaded through the stages.
struct Run {
    report: PublishReport,
}

impl Run {
    fn new(config: &Config) -> Self {
        let channels = config
            .channels()
            .map(|(project, channel)| ChannelReport {
                tag: channel.tag.clone(),
                project: project.name.clone(),
                outcome: ChannelOutcome::Unresolved,
                id: None,
                address: None,
                detail: None,
            })
            .collect();
        Self {
            report: PublishReport {
                status: RunStatus::Done,
                failure: None,
                violation: None,
                channels,
                sweeps: Vec::new(),
                propagations: Vec::new(),
                warnings: Vec::new(),
                trace: vec![Stage::Idle],
            },
        }
    }

    fn enter(&mut self, stage: Stage) {
        tracing::debug!(?stage, "entering stage");
        self.report.trace.push(stage);
    }

    fn channel_mut(&mut self, tag: &str) -> Option<&mut ChannelReport> {
        self.report.channels.iter_mut().find(|c| c.tag == tag)
    }

    fn set_channel(&mut self, tag: &str, outcome: ChannelOutcome, detail: Option<String>) {
        if let Some(report) = self.channel_mut(tag) {
            report.outcome = outcome;
            report.detail = detail;
        }
    }

    fn warn(&mut self, message: String) {
        self.report.warnings.push(message);
    }

    fn fail(mut self, reason: String) -> PublishReport {
        tracing::error!("publish failed: {reason}");
        self.report.trace.push(Stage::Failed(reason.clone()));
        self.report.status = RunStatus::Failed;
        self.report.failure = Some(reason);
        self.report
    }

    fn finish(self) -> PublishReport {
        let failed: Vec<String> = self
            .report
            .channels
            .iter()
            .filter(|c| c.outcome == ChannelOutcome::Failed)
            .map(|c| c.tag.clone())
            .collect();
        if failed.is_empty() {
            let mut report = self.report;
            report.trace.push(Stage::Done);
            return report;
        }
        self.fail(format!("channel(s) failed: {}", failed.join(", ")))
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct Pipeline<'a> {
    root: &'a Path,
    config: &'a Config,
    platforms: Platforms<'a>,
    notifier: &'a dyn Notifier,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        root: &'a Path,
        config: &'a Config,
        platforms: Platforms<'a>,
        notifier: &'a dyn Notifier,
    ) -> Self {
        Self {
            root,
            config,
            platforms,
            notifier,
        }
    }

    pub fn run(&self, opts: &PublishOptions) -> PublishReport {
        let mut run = Run::new(self.config);
        let mut store = BindingStore::load(self.root);

        run.enter(Stage::Validating);
        if let Err((reason, violation)) = self.validate_all() {
            run.report.violation = violation;
            return self.abort(run, &store, reason);
        }
        if let Some(missing) = self
            .config
            .projects
            .iter()
            .find(|p| !self.platforms.contains_key(&p.name))
        {
            let reason = format!("no platform for project '{}'", missing.name);
            return self.abort(run, &store, reason);
        }

        let pre_run = store.bound_ids();

        if opts.push_only {
            return self.push_only(run, &store);
        }

        for project in &self.config.projects {
            if let Err(reason) = self.publish_project(project, opts, &mut store, &mut run) {
                return self.abort(run, &store, reason);
            }
        }

        // Every channel is settled; only now is the protected set complete.
        run.enter(Stage::GuardingQuota);
        let mut protected = pre_run;
        protected.extend(store.bound_ids());
        let guardian = QuotaGuardian::new(&self.config.platform, protected);
        for project in &self.config.projects {
            let platform = self.platforms[&project.name];
            let sweep = guardian.sweep(&project.name, platform);
            for warning in &sweep.warnings {
                run.warn(warning.clone());
            }
            for id in &sweep.failed {
                run.warn(format!("{}: could not delete deployment {id}", project.name));
            }
            run.report.sweeps.push(sweep);
        }

        self.propagate(&store, &mut run);
        run.finish()
    }

    /// Run the gate for every project. Nothing is pushed unless all pass.
    fn validate_all(&self) -> Result<(), (String, Option<Violation>)> {
        for project in &self.config.projects {
            if project.rules.is_empty() {
                continue;
            }
            let source_root = project.source_root(self.root);
            let snapshot = Snapshot::load(&source_root).map_err(|e| {
                (
                    format!("cannot read sources of '{}': {e}", project.name),
                    None,
                )
            })?;
            gate::validate(&snapshot, &project.rules).map_err(|v| {
                (
                    format!("project '{}' rejected: {v}", project.name),
                    Some(v),
                )
            })?;
            tracing::info!(project = %project.name, files = snapshot.files.len(), "validation passed");
        }
        Ok(())
    }

    fn publish_project(
        &self,
        project: &Project,
        opts: &PublishOptions,
        store: &mut BindingStore,
        run: &mut Run,
    ) -> Result<(), String> {
        let platform = self.platforms[&project.name];
        let source_root = project.source_root(self.root);
        let settings = &self.config.platform;

        let mut resolver: Option<Resolver<'_>> = None;
        // Variant currently on the platform; re-push only when it changes.
        let mut pushed: Option<Option<&ManifestTransform>> = None;

        for channel in &project.channels {
            let guard = match &channel.transform {
                Some(t) => Some(t.apply(&source_root).map_err(|e| {
                    run.set_channel(&channel.tag, ChannelOutcome::Failed, Some(e.to_string()));
                    format!("push failed for '{}': {e}", channel.tag)
                })?),
                None => None,
            };

            let variant = channel.transform.as_ref();
            if pushed != Some(variant) {
                run.enter(Stage::Pushing(channel.tag.clone()));
                platform.push(&source_root).map_err(|e| {
                    run.set_channel(&channel.tag, ChannelOutcome::Failed, Some(e.to_string()));
                    format!("push failed for '{}': {e}", channel.tag)
                })?;
                tracing::info!(project = %project.name, channel = %channel.tag, "sources pushed");
                pushed = Some(variant);
            }

            let resolver = resolver.get_or_insert_with(|| {
                let listing = platform.list().unwrap_or_else(|e| {
                    tracing::warn!(project = %project.name, error = %e, "listing failed; discovery disabled for this run");
                    Vec::new()
                });
                Resolver::new(platform, settings, listing, self.root).allow_create(opts.allow_create)
            });

            run.enter(Stage::Resolving(channel.tag.clone()));
            let result = resolver.resolve(channel, &channel.description(opts.date), store);
            drop(guard);

            match result {
                Ok(resolution) => {
                    if resolution.created() {
                        let mut message = format!(
                            "'{}' has a NEW address: {}",
                            resolution.tag, resolution.address
                        );
                        if let Some(url) = platform.console_url() {
                            message.push_str(&format!(" (check access settings at {url})"));
                        }
                        run.warn(message);
                    }
                    if let Some(report) = run.channel_mut(&channel.tag) {
                        report.outcome = resolution.tier.into();
                        report.id = Some(resolution.id);
                        report.address = Some(resolution.address);
                    }
                }
                Err(e) if e.is_fatal_for_run() => {
                    run.set_channel(&channel.tag, ChannelOutcome::Failed, Some(e.to_string()));
                    return Err(e.to_string());
                }
                Err(e @ ResolveError::CreationDisabled { .. }) => {
                    run.warn(e.to_string());
                    self.report_stale_binding(run, store, channel.tag.as_str(), ChannelOutcome::Degraded, e.to_string());
                }
                Err(e) => {
                    tracing::error!(channel = %channel.tag, error = %e, "channel failed");
                    self.report_stale_binding(run, store, channel.tag.as_str(), ChannelOutcome::Failed, e.to_string());
                }
            }
        }
        Ok(())
    }

    /// Ends the run early. Channels it never settled report the address on record.
    fn abort(&self, mut run: Run, store: &BindingStore, reason: String) -> PublishReport {
        for report in run.report.channels.iter_mut().filter(|c| c.address.is_none()) {
            report.id = store.binding(&report.tag).map(str::to_string);
            report.address = self.bound_address(store, &report.tag);
        }
        run.fail(reason)
    }

    /// A channel that did not resolve still reports the address it had.
    fn report_stale_binding(
        &self,
        run: &mut Run,
        store: &BindingStore,
        tag: &str,
        outcome: ChannelOutcome,
        detail: String,
    ) {
        let address = self.bound_address(store, tag);
        if let Some(report) = run.channel_mut(tag) {
            report.outcome = outcome;
            report.id = store.binding(tag).map(str::to_string);
            report.address = address;
            report.detail = Some(detail);
        }
    }

    fn bound_address(&self, store: &BindingStore, tag: &str) -> Option<String> {
        let id = store.binding(tag)?;
        let query = self
            .config
            .channel(tag)
            .ok()
            .and_then(|(_, c)| c.query.as_deref());
        Some(self.config.platform.address_of(id, query))
    }

    fn push_only(&self, mut run: Run, store: &BindingStore) -> PublishReport {
        for project in &self.config.projects {
            run.enter(Stage::Pushing(project.name.clone()));
            let platform = self.platforms[&project.name];
            if let Err(e) = platform.push(&project.source_root(self.root)) {
                let reason = format!("push failed for '{}': {e}", project.name);
                return self.abort(run, store, reason);
            }
            tracing::info!(project = %project.name, "sources pushed");
        }
        for (_, channel) in self.config.channels() {
            let address = self.bound_address(store, &channel.tag);
            if let Some(report) = run.channel_mut(&channel.tag) {
                report.id = store.binding(&channel.tag).map(str::to_string);
                if address.is_some() {
                    report.outcome = ChannelOutcome::Pushed;
                    report.address = address;
                } else {
                    report.detail = Some("no binding; run a full publish".to_string());
                }
            }
        }
        self.propagate(store, &mut run);
        run.finish()
    }

    fn propagate(&self, store: &BindingStore, run: &mut Run) {
        for prop in &self.config.propagations {
            run.enter(Stage::Propagating(prop.action.clone()));
            let address = self.bound_address(store, &prop.from);
            let mut report = PropagationReport {
                action: prop.action.clone(),
                from: prop.from.clone(),
                to: prop.to.clone(),
                address: address.clone(),
                delivered: false,
                error: None,
            };

            let (Some(address), Some(target)) = (address, self.bound_address(store, &prop.to))
            else {
                let reason = "both channels need a binding".to_string();
                tracing::warn!(action = %prop.action, "propagation skipped: {reason}");
                report.error = Some(reason);
                run.report.propagations.push(report);
                continue;
            };

            let secret = match prop.secret.as_deref() {
                Some(name) => {
                    let value = store.secret(name);
                    if value.is_none() {
                        run.warn(format!(
                            "secret '{name}' for '{}' is not set; sending without it",
                            prop.action
                        ));
                    }
                    value
                }
                None => None,
            };

            match self.notifier.notify(&target, &prop.action, &address, secret) {
                Ok(()) => {
                    tracing::info!(action = %prop.action, to = %prop.to, "address propagated");
                    report.delivered = true;
                }
                Err(e) => {
                    tracing::warn!(
                        action = %prop.action,
                        error = %e,
                        "propagation failed; set this address by hand in '{}': {address}",
                        prop.to
                    );
                    run.warn(format!(
                        "could not send '{}' to '{}'; set it by hand: {address}",
                        prop.from, prop.to
                    ));
                    report.error = Some(e.to_string());
                }
            }
            run.report.propagations.push(report);
        }
    }
}
