use crate::output::{cell, print_json, print_table};
use anyhow::Context;
use keeper_core::config::{Config, WarnLevel};
use keeper_core::pipeline::{ChannelOutcome, Pipeline, Platforms, PublishOptions, PublishReport};
use keeper_core::platform::clasp::ClaspPlatform;
use keeper_core::platform::Platform;
use keeper_core::propagate::HttpPropagator;
use std::path::Path;

pub struct Flags {
    pub push_only: bool,
    pub no_create: bool,
    pub open: bool,
}

pub fn run(root: &Path, flags: Flags, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let warnings = config.validate();
    for w in warnings.iter().filter(|w| w.level == WarnLevel::Warning) {
        tracing::warn!("config: {}", w.message);
    }
    if Config::has_errors(&warnings) {
        for w in warnings.iter().filter(|w| w.level == WarnLevel::Error) {
            eprintln!("[error] {}", w.message);
        }
        anyhow::bail!("config has errors; fix {} first", keeper_core::paths::CONFIG_FILE);
    }

    let clasps: Vec<(String, ClaspPlatform)> = config
        .projects
        .iter()
        .map(|p| {
            (
                p.name.clone(),
                ClaspPlatform::new(&p.source_root(root), &config.platform),
            )
        })
        .collect();
    let platforms: Platforms<'_> = clasps
        .iter()
        .map(|(name, clasp)| (name.clone(), clasp as &dyn Platform))
        .collect();
    let notifier =
        HttpPropagator::new(&config.platform).context("failed to build HTTP client")?;

    let opts = PublishOptions {
        push_only: flags.push_only,
        allow_create: !flags.no_create,
        date: chrono::Local::now().date_naive(),
    };
    let report = Pipeline::new(root, &config, platforms, &notifier).run(&opts);

    if json {
        print_json(&report)?;
    } else {
        print_report(&report);
    }

    if flags.open {
        open_addresses(&report);
    }

    if !report.is_success() {
        let reason = report.failure.as_deref().unwrap_or("publish failed");
        anyhow::bail!("{reason}");
    }
    Ok(())
}

fn print_report(report: &PublishReport) {
    let rows: Vec<Vec<String>> = report
        .channels
        .iter()
        .map(|c| {
            vec![
                c.tag.clone(),
                c.project.clone(),
                c.outcome.to_string(),
                cell(c.address.as_deref()),
            ]
        })
        .collect();
    print_table(&["CHANNEL", "PROJECT", "OUTCOME", "ADDRESS"], rows);

    for c in report.channels.iter().filter(|c| c.detail.is_some()) {
        println!("  {}: {}", c.tag, c.detail.as_deref().unwrap_or_default());
    }

    for sweep in &report.sweeps {
        if !sweep.deleted.is_empty() {
            println!(
                "\n{}: deleted {} untracked deployment(s)",
                sweep.project,
                sweep.deleted.len()
            );
            for id in &sweep.deleted {
                println!("  - {id}");
            }
        }
        if let Some(count) = sweep.version_count {
            println!("{}: {count} versions", sweep.project);
        }
    }

    for p in &report.propagations {
        let status = if p.delivered {
            "delivered".to_string()
        } else {
            format!("NOT delivered ({})", p.error.as_deref().unwrap_or("unknown"))
        };
        println!("\n{} {} -> {}: {status}", p.action, p.from, p.to);
    }

    if !report.warnings.is_empty() {
        println!();
        for w in &report.warnings {
            println!("warning: {w}");
        }
    }

    if report.is_success() {
        println!("\nPublish complete.");
    }
}

/// Best-effort: a browser that fails to open does not fail the publish.
fn open_addresses(report: &PublishReport) {
    let opened = report
        .channels
        .iter()
        .filter(|c| c.outcome != ChannelOutcome::Failed)
        .filter_map(|c| c.address.as_deref());
    for address in opened {
        if let Err(e) = open::that(address) {
            tracing::warn!(%address, error = %e, "could not open browser");
        }
    }
}
