//! Static refresher — turns static plugins into placeholder values.
//!
//! At reload time every declared placeholder is seeded with a loading
//! sentinel and a background refresh is enqueued. Refreshes of the same
//! plugin are serial: a fire while the previous run is still going is
//! skipped, not queued.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use vcp_executor::StdioExecutor;
use vcp_plugins::{PlaceholderTable, PluginStore, PluginType};

#[derive(Clone)]
pub struct StaticRefresher {
    store: Arc<PluginStore>,
    placeholders: Arc<PlaceholderTable>,
    executor: Arc<StdioExecutor>,
    running: Arc<Mutex<HashSet<String>>>,
}

impl StaticRefresher {
    pub fn new(
        store: Arc<PluginStore>,
        placeholders: Arc<PlaceholderTable>,
        executor: Arc<StdioExecutor>,
    ) -> Self {
        Self {
            store,
            placeholders,
            executor,
            running: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Seed sentinels for every static plugin and enqueue one background
    /// refresh each. Called after every reload.
    pub async fn seed_and_refresh_all(&self) {
        for manifest in self.store.list().await {
            if manifest.plugin_type != PluginType::Static {
                continue;
            }
            for key in manifest.declared_placeholders() {
                self.placeholders.seed_loading(key, manifest.display_name()).await;
            }
            let this = self.clone();
            let name = manifest.name.clone();
            tokio::spawn(async move {
                this.refresh(&name).await;
            });
        }
    }

    /// Run one refresh, unless the same plugin is already refreshing.
    pub async fn refresh(&self, name: &str) {
        {
            let mut running = self.running.lock().await;
            if !running.insert(name.to_string()) {
                debug!(plugin = name, "refresh already in flight, skipping this fire");
                return;
            }
        }
        self.refresh_inner(name).await;
        self.running.lock().await.remove(name);
    }

    async fn refresh_inner(&self, name: &str) {
        let Some(manifest) = self.store.get(name).await else {
            warn!(plugin = name, "refresh requested for unknown plugin");
            return;
        };
        if manifest.plugin_type != PluginType::Static {
            return;
        }
        let keys = manifest.declared_placeholders();
        if keys.is_empty() {
            debug!(plugin = name, "static plugin declares no placeholders");
            return;
        }

        let outcome = self
            .executor
            .execute_static(&manifest)
            .await
            .map(|stdout| stdout.trim().to_string())
            .map_err(|e| e.to_string());

        for key in keys {
            self.placeholders
                .apply_refresh(&manifest.name, key, manifest.display_name(), outcome.clone())
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;
    use vcp_executor::WellKnownEnv;
    use vcp_plugins::placeholders::is_sentinel;

    fn write_static_plugin(root: &std::path::Path, dir: &str, name: &str, command: &str) {
        let d = root.join(dir);
        fs::create_dir_all(&d).unwrap();
        fs::write(
            d.join("plugin-manifest.json"),
            format!(
                r#"{{
                    "name": "{name}",
                    "pluginType": "static",
                    "entryPoint": {{ "command": "{command}" }},
                    "communication": {{ "protocol": "stdio", "timeoutMs": 5000 }},
                    "capabilities": {{
                        "systemPromptPlaceholders": [ {{ "placeholder": "{name}Info" }} ]
                    }}
                }}"#
            ),
        )
        .unwrap();
    }

    async fn build(root: &std::path::Path) -> (Arc<PluginStore>, Arc<PlaceholderTable>, StaticRefresher) {
        let store = Arc::new(PluginStore::new());
        store.discover(root).await.unwrap();
        let placeholders = Arc::new(PlaceholderTable::new());
        let executor = Arc::new(StdioExecutor::new(WellKnownEnv::default()));
        let refresher = StaticRefresher::new(store.clone(), placeholders.clone(), executor);
        (store, placeholders, refresher)
    }

    #[tokio::test]
    async fn seeds_then_installs_refreshed_value() {
        let tmp = TempDir::new().unwrap();
        write_static_plugin(tmp.path(), "weather", "Weather", "echo sunny-today");
        let (_store, placeholders, refresher) = build(tmp.path()).await;

        refresher.seed_and_refresh_all().await;
        // The sentinel is visible immediately, before the refresh lands.
        assert!(placeholders.get("WeatherInfo").await.is_some());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(placeholders.get("WeatherInfo").await.unwrap(), "sunny-today");
    }

    #[tokio::test]
    async fn failed_refresh_installs_error_sentinel_when_nothing_real() {
        let tmp = TempDir::new().unwrap();
        write_static_plugin(tmp.path(), "broken", "Broken", "sh missing-script.sh");
        let (_store, placeholders, refresher) = build(tmp.path()).await;

        refresher.refresh("Broken").await;
        let v = placeholders.get("BrokenInfo").await.unwrap();
        assert!(is_sentinel(&v));
        assert!(v.contains("Broken"));
    }

    #[tokio::test]
    async fn failed_refresh_keeps_real_stale_value() {
        let tmp = TempDir::new().unwrap();
        write_static_plugin(tmp.path(), "broken", "Broken", "sh missing-script.sh");
        let (_store, placeholders, refresher) = build(tmp.path()).await;

        placeholders.set("BrokenInfo", "yesterday's data".into()).await;
        refresher.refresh("Broken").await;
        assert_eq!(placeholders.get("BrokenInfo").await.unwrap(), "yesterday's data");
    }

    #[tokio::test]
    async fn concurrent_fires_of_same_plugin_are_skipped() {
        let tmp = TempDir::new().unwrap();
        write_static_plugin(tmp.path(), "slow", "Slow", "sh slow.sh");
        fs::write(
            tmp.path().join("slow").join("slow.sh"),
            "echo run >> runs.txt\nsleep 0.4\necho value\n",
        )
        .unwrap();
        let (_store, _placeholders, refresher) = build(tmp.path()).await;

        let a = {
            let r = refresher.clone();
            tokio::spawn(async move { r.refresh("Slow").await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        refresher.refresh("Slow").await; // overlaps: must be skipped
        a.await.unwrap();

        let runs = fs::read_to_string(tmp.path().join("slow").join("runs.txt")).unwrap();
        assert_eq!(runs.lines().count(), 1);
    }
}
