use crate::output::print_json;
use anyhow::Context;
use clap::Subcommand;
use keeper_core::store::BindingStore;
use std::path::Path;

#[derive(Subcommand)]
pub enum SecretSubcommand {
    /// Set a secret value
    Set {
        /// Secret name, as referenced by a propagation's `secret`
        name: String,
        value: String,
    },
    /// Remove a secret
    Unset { name: String },
    /// List secret names (values are never printed)
    List,
}

pub fn run(root: &Path, subcmd: SecretSubcommand, json: bool) -> anyhow::Result<()> {
    let mut store = BindingStore::load(root);
    match subcmd {
        SecretSubcommand::Set { name, value } => {
            let name = name.trim().to_string();
            if name.is_empty() {
                anyhow::bail!("secret name cannot be empty");
            }
            store.secrets.insert(name.clone(), value);
            store.save(root).context("failed to save bindings")?;
            println!("Secret '{name}' set.");
        }
        SecretSubcommand::Unset { name } => {
            if store.secrets.remove(&name).is_none() {
                anyhow::bail!("secret '{name}' is not set");
            }
            store.save(root).context("failed to save bindings")?;
            println!("Secret '{name}' removed.");
        }
        SecretSubcommand::List => {
            let names: Vec<&String> = store.secrets.keys().collect();
            if json {
                return print_json(&serde_json::json!({ "secrets": names }));
            }
            if names.is_empty() {
                println!("No secrets.");
            }
            for name in names {
                println!("{name}");
            }
        }
    }
    Ok(())
}
