//! Per-plugin configuration layering.
//!
//! The effective value of a config key is the first defined of the plugin's
//! local `config.env` entry and the process environment, coerced by the
//! manifest's `configSchema`. No hidden state: the result is deterministic
//! in the manifest and the current environment.

use std::collections::HashMap;

use tracing::warn;

use crate::manifest::{ConfigType, PluginManifest};

/// `DebugMode` is always resolvable and defaults to false.
pub const DEBUG_MODE_KEY: &str = "DebugMode";

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl ConfigValue {
    /// Flattened form used for subprocess environment overlays.
    pub fn as_env_string(&self) -> String {
        match self {
            Self::Str(s) => s.clone(),
            Self::Int(i) => i.to_string(),
            Self::Bool(b) => b.to_string(),
        }
    }
}

/// Parse `KEY=VALUE` lines. Lines starting with `#` and blank lines are
/// ignored; surrounding double quotes on values are stripped; no shell
/// interpolation is performed.
pub fn parse_env_file(content: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let mut value = value.trim();
        if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
            value = &value[1..value.len() - 1];
        }
        out.insert(key.to_string(), value.to_string());
    }
    out
}

fn raw_value(manifest: &PluginManifest, key: &str) -> Option<String> {
    if let Some(v) = manifest.plugin_specific_env_config.get(key) {
        return Some(v.clone());
    }
    std::env::var(key).ok()
}

fn coerce(plugin: &str, key: &str, raw: String, ty: ConfigType) -> Option<ConfigValue> {
    match ty {
        ConfigType::String => Some(ConfigValue::Str(raw)),
        ConfigType::Integer => match raw.trim().parse::<i64>() {
            Ok(i) => Some(ConfigValue::Int(i)),
            Err(_) => {
                warn!(plugin, key, raw, "config value is not an integer, treating as unset");
                None
            }
        },
        ConfigType::Boolean => Some(ConfigValue::Bool(raw.trim().eq_ignore_ascii_case("true"))),
    }
}

/// Resolve one key against the manifest's layering and schema.
pub fn lookup(manifest: &PluginManifest, key: &str) -> Option<ConfigValue> {
    let raw = raw_value(manifest, key)?;
    let ty = manifest.config_schema.get(key).copied().unwrap_or(ConfigType::String);
    coerce(&manifest.name, key, raw, ty)
}

/// Whether the plugin runs with debug logging enabled.
pub fn debug_mode(manifest: &PluginManifest) -> bool {
    match raw_value(manifest, DEBUG_MODE_KEY) {
        Some(raw) => raw.trim().eq_ignore_ascii_case("true"),
        None => false,
    }
}

/// The full effective config flattened to strings: every schema key that
/// resolves, plus every local `config.env` key not covered by the schema.
pub fn effective_string_config(manifest: &PluginManifest) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for key in manifest.config_schema.keys() {
        if let Some(v) = lookup(manifest, key) {
            out.insert(key.clone(), v.as_env_string());
        }
    }
    for (key, value) in &manifest.plugin_specific_env_config {
        // Schema keys were already resolved (or intentionally left unset).
        if manifest.config_schema.contains_key(key) {
            continue;
        }
        out.entry(key.clone()).or_insert_with(|| value.clone());
    }
    out
}
