use crate::output::print_json;
use anyhow::Context;
use keeper_core::config::Config;
use keeper_core::gate::{self, Snapshot};
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;

    let mut results = Vec::new();
    for project in &config.projects {
        let source_root = project.source_root(root);
        let snapshot = Snapshot::load(&source_root)
            .with_context(|| format!("failed to read {}", source_root.display()))?;
        let verdict = gate::validate(&snapshot, &project.rules);
        results.push(serde_json::json!({
            "project": project.name,
            "files": snapshot.files.len(),
            "ok": verdict.is_ok(),
            "violation": verdict.as_ref().err(),
        }));
        if !json {
            match &verdict {
                Ok(()) => println!("{}: ok ({} files)", project.name, snapshot.files.len()),
                Err(v) => println!("{}: REJECTED: {v}", project.name),
            }
        }
    }

    if json {
        print_json(&serde_json::json!({ "projects": results }))?;
    }

    let rejected = results.iter().filter(|r| r["ok"] == false).count();
    if rejected > 0 {
        anyhow::bail!("{rejected} project(s) rejected");
    }
    Ok(())
}
