use crate::output::{cell, print_json, print_table};
use anyhow::Context;
use keeper_core::config::Config;
use keeper_core::store::BindingStore;
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
struct ChannelStatus<'a> {
    tag: &'a str,
    project: &'a str,
    id: Option<&'a str>,
    address: Option<String>,
}

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let store = BindingStore::load(root);

    let channels: Vec<ChannelStatus<'_>> = config
        .channels()
        .map(|(project, channel)| {
            let id = store.binding(&channel.tag);
            ChannelStatus {
                tag: &channel.tag,
                project: &project.name,
                id,
                address: id.map(|id| config.platform.address_of(id, channel.query.as_deref())),
            }
        })
        .collect();

    // Bindings whose channel was removed from the config still protect their record.
    let orphaned: Vec<(&str, &str)> = store
        .bindings
        .iter()
        .filter(|(tag, _)| config.channel(tag).is_err())
        .map(|(tag, id)| (tag.as_str(), id.as_str()))
        .collect();

    if json {
        let orphaned: Vec<_> = orphaned
            .iter()
            .map(|(tag, id)| serde_json::json!({ "tag": tag, "id": id }))
            .collect();
        return print_json(&serde_json::json!({
            "channels": channels,
            "orphaned": orphaned,
            "secrets": store.secrets.keys().collect::<Vec<_>>(),
        }));
    }

    let rows = channels
        .iter()
        .map(|c| {
            vec![
                c.tag.to_string(),
                c.project.to_string(),
                cell(c.id),
                cell(c.address.as_deref()),
            ]
        })
        .collect();
    print_table(&["CHANNEL", "PROJECT", "ID", "ADDRESS"], rows);

    if !orphaned.is_empty() {
        println!("\nBindings without a configured channel:");
        for (tag, id) in orphaned {
            println!("  {tag}: {id}");
        }
    }
    if !store.secrets.is_empty() {
        let names: Vec<&str> = store.secrets.keys().map(String::as_str).collect();
        println!("\nSecrets: {}", names.join(", "));
    }
    Ok(())
}
