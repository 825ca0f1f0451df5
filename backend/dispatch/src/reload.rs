//! Reload coordination.
//!
//! One full reload: rescan the plugin root, reconcile the preprocessor
//! order, rebuild the chain, the prompt-fragment table, the static seeds,
//! and the cron job set, then emit `plugins-reloaded`. Reloads are
//! single-flight; the debounced watcher collapses event bursts into one.

use std::path::PathBuf;
use std::sync::Arc;

use notify::RecommendedWatcher;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use vcp_pipeline::{BuiltinDeps, PreprocessorPipeline};
use vcp_plugins::watcher::{spawn_debouncer, watch_paths, DEFAULT_DEBOUNCE_WINDOW};
use vcp_plugins::{order, prompt, EventBus, PlaceholderTable, PluginStore, RuntimeEvent};
use vcp_scheduler::{CronJobs, StaticRefresher};

use crate::service::ServiceRegistry;

pub struct ReloadCoordinator {
    plugin_root: PathBuf,
    order_path: PathBuf,
    store: Arc<PluginStore>,
    placeholders: Arc<PlaceholderTable>,
    pipeline: Arc<PreprocessorPipeline>,
    refresher: StaticRefresher,
    jobs: Arc<CronJobs>,
    services: ServiceRegistry,
    events: Arc<EventBus>,
    deps: BuiltinDeps,
    // Single-flight: overlapping triggers queue behind this lock.
    reload_lock: Mutex<()>,
}

impl ReloadCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        plugin_root: PathBuf,
        order_path: PathBuf,
        store: Arc<PluginStore>,
        placeholders: Arc<PlaceholderTable>,
        pipeline: Arc<PreprocessorPipeline>,
        refresher: StaticRefresher,
        jobs: Arc<CronJobs>,
        services: ServiceRegistry,
        events: Arc<EventBus>,
    ) -> Arc<Self> {
        let deps = BuiltinDeps { placeholders: placeholders.clone() };
        Arc::new(Self {
            plugin_root,
            order_path,
            store,
            placeholders,
            pipeline,
            refresher,
            jobs,
            services,
            events,
            deps,
            reload_lock: Mutex::new(()),
        })
    }

    /// Run one full reload.
    pub async fn reload(&self) -> anyhow::Result<()> {
        let _guard = self.reload_lock.lock().await;

        let summary = self.store.discover(&self.plugin_root).await?;
        let discovered = self.store.preprocessor_names().await;
        let effective_order = order::load_and_reconcile(&self.order_path, &discovered)?;
        self.pipeline.rebuild(&effective_order, &self.deps).await;
        prompt::rebuild_tool_descriptions(&self.store, &self.placeholders).await;
        self.refresher.seed_and_refresh_all().await;
        self.jobs.rebuild().await;

        let manifests = self.store.list().await;
        for name in self.services.unbound_names(&manifests).await {
            warn!(service = %name, "no service module registered for manifest, calls will fail");
        }

        let remote = manifests.iter().filter(|m| m.is_distributed).count();
        info!(local = summary.loaded, skipped = summary.skipped, remote, "plugins reloaded");
        self.events.publish(RuntimeEvent::PluginsReloaded { local: summary.loaded, remote });
        Ok(())
    }

    /// Start watching the plugin root and the order file; filesystem bursts
    /// debounce into one reload. The returned watcher must stay alive.
    pub fn spawn_watcher(self: Arc<Self>) -> anyhow::Result<RecommendedWatcher> {
        let coordinator = self.clone();
        let debouncer = spawn_debouncer(DEFAULT_DEBOUNCE_WINDOW, move || {
            let coordinator = coordinator.clone();
            async move {
                if let Err(e) = coordinator.reload().await {
                    error!(error = %e, "hot reload failed");
                }
            }
        });
        watch_paths(&[&self.plugin_root, &self.order_path], debouncer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use vcp_executor::{StdioExecutor, WellKnownEnv};

    fn write_plugin(root: &std::path::Path, dir: &str, manifest: &str) {
        let d = root.join(dir);
        fs::create_dir_all(&d).unwrap();
        fs::write(d.join("plugin-manifest.json"), manifest).unwrap();
    }

    fn preprocessor_manifest(name: &str) -> String {
        format!(
            r#"{{ "name": "{name}", "pluginType": "messagePreprocessor",
                 "entryPoint": {{ "script": "{name}" }} }}"#
        )
    }

    async fn coordinator_for(
        tmp: &TempDir,
    ) -> (Arc<ReloadCoordinator>, Arc<PluginStore>, ServiceRegistry, Arc<EventBus>) {
        let plugin_root = tmp.path().join("Plugin");
        fs::create_dir_all(&plugin_root).unwrap();
        let order_path = tmp.path().join("preprocessor-order.json");

        let store = Arc::new(PluginStore::new());
        let placeholders = Arc::new(PlaceholderTable::new());
        let executor = Arc::new(StdioExecutor::new(WellKnownEnv::default()));
        let pipeline = Arc::new(PreprocessorPipeline::new(store.clone()));
        let refresher = StaticRefresher::new(store.clone(), placeholders.clone(), executor);
        let jobs = Arc::new(CronJobs::new(store.clone(), refresher.clone()));
        let services = ServiceRegistry::new();
        let events = Arc::new(EventBus::new());
        let coordinator = ReloadCoordinator::new(
            plugin_root,
            order_path,
            store.clone(),
            placeholders,
            pipeline,
            refresher,
            jobs,
            services.clone(),
            events.clone(),
        );
        (coordinator, store, services, events)
    }

    #[tokio::test]
    async fn reload_reconciles_order_and_emits_event() {
        let tmp = TempDir::new().unwrap();
        let (coordinator, _store, _services, events) = coordinator_for(&tmp).await;
        let root = tmp.path().join("Plugin");
        write_plugin(&root, "divider", &preprocessor_manifest("role-divider"));
        write_plugin(&root, "expander", &preprocessor_manifest("placeholder-expander"));

        let order_path = tmp.path().join("preprocessor-order.json");
        fs::write(
            &order_path,
            r#"["placeholder-expander", "vanished", "role-divider"]"#,
        )
        .unwrap();

        let mut rx = events.subscribe();
        coordinator.reload().await.unwrap();

        let persisted: Vec<String> =
            serde_json::from_str(&fs::read_to_string(&order_path).unwrap()).unwrap();
        assert_eq!(persisted, vec!["placeholder-expander", "role-divider"]);
        assert!(matches!(
            rx.recv().await.unwrap(),
            RuntimeEvent::PluginsReloaded { local: 2, .. }
        ));
    }

    #[tokio::test]
    async fn reload_flags_service_manifests_without_modules() {
        let tmp = TempDir::new().unwrap();
        let (coordinator, store, services, _events) = coordinator_for(&tmp).await;
        let root = tmp.path().join("Plugin");
        write_plugin(
            &root,
            "ghost",
            r#"{ "name": "GhostService", "pluginType": "service",
                 "entryPoint": { "script": "ghost" } }"#,
        );

        coordinator.reload().await.unwrap();
        // The manifest is still listed, but reload identified the gap.
        assert!(store.get("GhostService").await.is_some());
        let unbound = services.unbound_names(&store.list().await).await;
        assert_eq!(unbound, vec!["GhostService".to_string()]);
    }

    #[tokio::test]
    async fn reload_is_idempotent_without_filesystem_changes() {
        let tmp = TempDir::new().unwrap();
        let (coordinator, store, _services, _events) = coordinator_for(&tmp).await;
        let root = tmp.path().join("Plugin");
        write_plugin(&root, "divider", &preprocessor_manifest("role-divider"));

        coordinator.reload().await.unwrap();
        let first: Vec<String> = store.list().await.iter().map(|m| m.name.clone()).collect();
        let first_order = fs::read_to_string(tmp.path().join("preprocessor-order.json")).unwrap();

        coordinator.reload().await.unwrap();
        let second: Vec<String> = store.list().await.iter().map(|m| m.name.clone()).collect();
        let second_order = fs::read_to_string(tmp.path().join("preprocessor-order.json")).unwrap();

        assert_eq!(first, second);
        assert_eq!(first_order, second_order);
    }
}
