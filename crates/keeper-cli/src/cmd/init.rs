use anyhow::Context;
use keeper_core::{config::Config, io, paths};
use std::path::Path;

pub fn run(root: &Path) -> anyhow::Result<()> {
    println!("Initializing keeper in: {}", root.display());

    let keeper_dir = paths::keeper_dir(root);
    std::fs::create_dir_all(&keeper_dir)
        .with_context(|| format!("failed to create {}", keeper_dir.display()))?;

    if Config::write_starter(root).context("failed to write config.yaml")? {
        println!("  created: {}", paths::CONFIG_FILE);
    } else {
        println!("  exists:  {}", paths::CONFIG_FILE);
    }

    // Bindings carry secrets; keep them out of version control.
    io::ensure_gitignore_entry(root, paths::BINDINGS_FILE)
        .context("failed to update .gitignore")?;
    println!("  ignored: {}", paths::BINDINGS_FILE);

    if !root.join(paths::CLASP_JSON).exists() {
        println!(
            "\nNo {} found here. Run `clasp clone <scriptId>` or `clasp create` before publishing.",
            paths::CLASP_JSON
        );
    }
    println!("\nEdit {} to declare projects and channels.", paths::CONFIG_FILE);
    Ok(())
}
