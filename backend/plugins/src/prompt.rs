//! Per-plugin prompt fragments.
//!
//! Every plugin that declares invocation commands gets a placeholder
//! `VCP<name>` whose value is a rendered block describing those commands.
//! The whole family is rebuilt after each reload and each remote
//! registration batch so removed plugins disappear from prompts.

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::manifest::PluginManifest;
use crate::placeholders::PlaceholderTable;
use crate::store::PluginStore;

const DESCRIPTION_PREFIX: &str = "VCP";

pub fn description_key(plugin_name: &str) -> String {
    format!("{DESCRIPTION_PREFIX}{plugin_name}")
}

/// Render the invocation-command block for one plugin, if it has any.
pub fn render_invocation_block(manifest: &PluginManifest) -> Option<String> {
    let commands = &manifest.capabilities.as_ref()?.invocation_commands;
    if commands.is_empty() {
        return None;
    }
    let mut block = format!("### {} ({})\n", manifest.display_name(), manifest.name);
    for cmd in commands {
        match &cmd.command {
            Some(c) => {
                let _ = writeln!(block, "- {c}: {}", cmd.description);
            }
            None => {
                let _ = writeln!(block, "- {}", cmd.description);
            }
        }
        if let Some(example) = &cmd.example {
            let _ = writeln!(block, "  Example: {example}");
        }
    }
    Some(block)
}

/// Rebuild the `VCP*` placeholder family from the current store contents.
pub async fn rebuild_tool_descriptions(store: &PluginStore, table: &PlaceholderTable) {
    let mut entries = HashMap::new();
    for manifest in store.list().await {
        if let Some(block) = render_invocation_block(&manifest) {
            entries.insert(description_key(&manifest.name), block);
        }
    }
    table
        .replace_matching(|key| key.starts_with(DESCRIPTION_PREFIX), entries)
        .await;
}
