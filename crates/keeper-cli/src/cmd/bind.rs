use crate::output::print_json;
use anyhow::Context;
use keeper_core::config::Config;
use keeper_core::store::BindingStore;
use std::path::Path;

pub fn bind(root: &Path, tag: &str, id: &str, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let (_, channel) = config.channel(tag)?;
    let id = id.trim();
    if id.is_empty() {
        anyhow::bail!("deployment id cannot be empty");
    }

    let mut store = BindingStore::load(root);
    if let Some(other) = store.owner_of(id).filter(|other| *other != tag) {
        anyhow::bail!("{id} is already bound to '{other}'");
    }
    let previous = store.bind(tag, id);
    store.save(root).context("failed to save bindings")?;

    let address = config.platform.address_of(id, channel.query.as_deref());
    if json {
        return print_json(&serde_json::json!({
            "tag": tag,
            "id": id,
            "previous": previous,
            "address": address,
        }));
    }
    match previous {
        Some(prev) if prev != id => println!("Rebound '{tag}': {prev} -> {id}"),
        _ => println!("Bound '{tag}' to {id}"),
    }
    println!("  {address}");
    Ok(())
}

pub fn unbind(root: &Path, tag: &str, json: bool) -> anyhow::Result<()> {
    let mut store = BindingStore::load(root);
    let Some(previous) = store.unbind(tag) else {
        anyhow::bail!("'{tag}' has no binding");
    };
    store.save(root).context("failed to save bindings")?;

    if json {
        return print_json(&serde_json::json!({ "tag": tag, "previous": previous }));
    }
    println!("Unbound '{tag}' (was {previous})");
    println!("  The record is no longer protected and will be deleted by the next publish.");
    Ok(())
}
