//! Placeholder table — named string slots consumed by prompt rendering.
//!
//! Each key has exactly one producer: a static plugin's stdout capture, a
//! remote node's push, or the tool-description builder. Values are opaque
//! text; sentinels are distinguishable by content convention.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::RwLock;
use tracing::{debug, warn};

static PLACEHOLDER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{([^{}]+)\}\}").unwrap());

const ERROR_MESSAGE_LIMIT: usize = 120;

pub fn loading_sentinel(display: &str) -> String {
    format!("[Loading] {display}...")
}

pub fn unavailable_sentinel(display: &str) -> String {
    format!("[Unavailable] {display}")
}

pub fn error_sentinel(name: &str, message: &str) -> String {
    let mut msg = message.replace('\n', " ");
    if msg.len() > ERROR_MESSAGE_LIMIT {
        let mut cut = ERROR_MESSAGE_LIMIT;
        while !msg.is_char_boundary(cut) {
            cut -= 1;
        }
        msg.truncate(cut);
        msg.push_str("...");
    }
    format!("[Error] {name}: {msg}")
}

/// Whether a stored value is one of the sentinels rather than real data.
pub fn is_sentinel(value: &str) -> bool {
    value.starts_with("[Loading] ")
        || value.starts_with("[Unavailable] ")
        || is_error_sentinel(value)
}

pub fn is_error_sentinel(value: &str) -> bool {
    value.starts_with("[Error] ")
}

#[derive(Default)]
pub struct PlaceholderTable {
    values: RwLock<HashMap<String, String>>,
}

impl PlaceholderTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.values.read().await.get(key).cloned()
    }

    pub async fn set(&self, key: &str, value: String) {
        self.values.write().await.insert(key.to_string(), value);
    }

    pub async fn set_many(&self, entries: HashMap<String, String>) {
        let mut map = self.values.write().await;
        for (k, v) in entries {
            map.insert(k, v);
        }
    }

    pub async fn remove_keys(&self, keys: &[String]) {
        let mut map = self.values.write().await;
        for k in keys {
            map.remove(k);
        }
    }

    /// Seed a declared placeholder with the loading sentinel unless a value
    /// is already present (reloads must not clobber live data).
    pub async fn seed_loading(&self, key: &str, display: &str) {
        let mut map = self.values.write().await;
        map.entry(key.to_string()).or_insert_with(|| loading_sentinel(display));
    }

    /// Apply one refresh outcome to one placeholder, per the update rules:
    /// non-empty output replaces, empty output never regresses real data,
    /// and failures install an error sentinel only when nothing real is
    /// there to preserve.
    pub async fn apply_refresh(
        &self,
        plugin: &str,
        key: &str,
        display: &str,
        outcome: Result<String, String>,
    ) {
        let mut map = self.values.write().await;
        let prior = map.get(key);
        let prior_is_real = prior.is_some_and(|v| !is_sentinel(v));
        match outcome {
            Ok(value) if !value.trim().is_empty() => {
                map.insert(key.to_string(), value);
            }
            Ok(_) => {
                if prior_is_real {
                    warn!(plugin, key, "refresh produced empty output, keeping stale value");
                } else {
                    map.insert(key.to_string(), unavailable_sentinel(display));
                }
            }
            Err(message) => {
                if prior_is_real {
                    warn!(plugin, key, error = %message, "refresh failed, keeping stale value");
                } else {
                    map.insert(key.to_string(), error_sentinel(plugin, &message));
                }
            }
        }
    }

    /// Remove every key matching `pred`, then insert `entries`. Used by the
    /// tool-description builder to replace its whole key family at once.
    pub async fn replace_matching(
        &self,
        pred: impl Fn(&str) -> bool,
        entries: HashMap<String, String>,
    ) {
        let mut map = self.values.write().await;
        map.retain(|k, _| !pred(k));
        for (k, v) in entries {
            map.insert(k, v);
        }
    }

    /// Substitute every `{{Key}}` occurrence from the table; unknown keys
    /// are left verbatim.
    pub async fn resolve_text(&self, text: &str) -> String {
        if !text.contains("{{") {
            return text.to_string();
        }
        let map = self.values.read().await;
        PLACEHOLDER_PATTERN
            .replace_all(text, |caps: &regex::Captures| {
                match map.get(caps[1].trim()) {
                    Some(v) => v.clone(),
                    None => {
                        debug!(key = &caps[1], "unresolved placeholder");
                        caps[0].to_string()
                    }
                }
            })
            .into_owned()
    }

    pub async fn snapshot(&self) -> HashMap<String, String> {
        self.values.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seed_does_not_clobber_existing_value() {
        let table = PlaceholderTable::new();
        table.set("Weather", "sunny".into()).await;
        table.seed_loading("Weather", "Weather report").await;
        assert_eq!(table.get("Weather").await.unwrap(), "sunny");

        table.seed_loading("News", "Daily news").await;
        assert!(is_sentinel(&table.get("News").await.unwrap()));
    }

    #[tokio::test]
    async fn non_empty_refresh_replaces() {
        let table = PlaceholderTable::new();
        table.seed_loading("K", "K").await;
        table.apply_refresh("P", "K", "K", Ok("fresh".into())).await;
        assert_eq!(table.get("K").await.unwrap(), "fresh");
    }

    #[tokio::test]
    async fn empty_refresh_never_regresses_real_value() {
        let table = PlaceholderTable::new();
        table.set("K", "real".into()).await;
        table.apply_refresh("P", "K", "K", Ok("   ".into())).await;
        assert_eq!(table.get("K").await.unwrap(), "real");
    }

    #[tokio::test]
    async fn empty_refresh_with_no_prior_installs_unavailable() {
        let table = PlaceholderTable::new();
        table.apply_refresh("P", "K", "My data", Ok(String::new())).await;
        let v = table.get("K").await.unwrap();
        assert!(v.starts_with("[Unavailable] "));
    }

    #[tokio::test]
    async fn failure_preserves_stale_value() {
        let table = PlaceholderTable::new();
        table.set("K", "stale but real".into()).await;
        table.apply_refresh("P", "K", "K", Err("boom".into())).await;
        assert_eq!(table.get("K").await.unwrap(), "stale but real");
    }

    #[tokio::test]
    async fn failure_over_sentinel_installs_error_sentinel() {
        let table = PlaceholderTable::new();
        table.seed_loading("K", "K").await;
        table.apply_refresh("WeatherPlugin", "K", "K", Err("connect refused".into())).await;
        let v = table.get("K").await.unwrap();
        assert!(is_error_sentinel(&v));
        assert!(v.contains("WeatherPlugin"));
        assert!(v.contains("connect refused"));
    }

    #[tokio::test]
    async fn error_sentinel_truncates_long_messages() {
        let table = PlaceholderTable::new();
        table.apply_refresh("P", "K", "K", Err("x".repeat(500))).await;
        let v = table.get("K").await.unwrap();
        assert!(v.len() < 200);
    }

    #[tokio::test]
    async fn resolves_placeholders_in_text() {
        let table = PlaceholderTable::new();
        table.set("Weather", "sunny".into()).await;
        let out = table.resolve_text("Today: {{Weather}} / {{Unknown}}").await;
        assert_eq!(out, "Today: sunny / {{Unknown}}");
    }

    #[tokio::test]
    async fn replace_matching_swaps_key_family() {
        let table = PlaceholderTable::new();
        table.set("VCPOld", "old".into()).await;
        table.set("Weather", "sunny".into()).await;
        let mut fresh = HashMap::new();
        fresh.insert("VCPNew".to_string(), "new".to_string());
        table.replace_matching(|k| k.starts_with("VCP"), fresh).await;
        assert!(table.get("VCPOld").await.is_none());
        assert_eq!(table.get("VCPNew").await.unwrap(), "new");
        assert_eq!(table.get("Weather").await.unwrap(), "sunny");
    }
}
