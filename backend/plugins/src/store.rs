//! Plugin store — the authoritative map of known plugins.
//!
//! The local half is swapped wholesale on every rescan (readers keep the
//! snapshot they already hold); the remote half is mutated under its own
//! lock and survives local rescans. Names are globally unique across both
//! halves with first-seen-wins collision handling.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use vcp_core::VcpError;

use crate::config_env::parse_env_file;
use crate::manifest::{PluginManifest, PluginType, CONFIG_ENV_FILE, MANIFEST_FILE};

type ManifestMap = HashMap<String, Arc<PluginManifest>>;

#[derive(Debug, Clone, Copy, Default)]
pub struct DiscoverySummary {
    pub loaded: usize,
    pub skipped: usize,
}

#[derive(Default)]
pub struct PluginStore {
    local: RwLock<Arc<ManifestMap>>,
    remote: RwLock<ManifestMap>,
}

impl PluginStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan `root` one level deep and atomically replace the local half.
    ///
    /// Subdirectories without a manifest file are ignored; manifests that
    /// fail to parse or validate are skipped with a warning. Names already
    /// owned by a remote registration are skipped (first-seen-wins).
    pub async fn discover(&self, root: &Path) -> anyhow::Result<DiscoverySummary> {
        let mut summary = DiscoverySummary::default();
        let mut fresh: ManifestMap = HashMap::new();

        if root.is_dir() {
            let mut entries: Vec<_> = std::fs::read_dir(root)
                .map_err(|e| anyhow::anyhow!("read plugin root {root:?}: {e}"))?
                .filter_map(Result::ok)
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect();
            // Deterministic scan order so reloads are reproducible.
            entries.sort();

            let remote = self.remote.read().await;
            for dir in entries {
                let manifest_path = dir.join(MANIFEST_FILE);
                if !manifest_path.is_file() {
                    continue;
                }
                match Self::load_one(&dir, &manifest_path) {
                    Ok(manifest) => {
                        if fresh.contains_key(&manifest.name) || remote.contains_key(&manifest.name)
                        {
                            warn!(
                                plugin = %manifest.name,
                                dir = %dir.display(),
                                "name collision, keeping first-seen entry"
                            );
                            summary.skipped += 1;
                            continue;
                        }
                        info!(plugin = %manifest.name, plugin_type = %manifest.plugin_type, "loaded plugin");
                        fresh.insert(manifest.name.clone(), Arc::new(manifest));
                        summary.loaded += 1;
                    }
                    Err(e) => {
                        warn!(dir = %dir.display(), error = %e, "skipping plugin");
                        summary.skipped += 1;
                    }
                }
            }
        } else {
            warn!(root = %root.display(), "plugin root does not exist");
        }

        *self.local.write().await = Arc::new(fresh);
        Ok(summary)
    }

    fn load_one(dir: &Path, manifest_path: &Path) -> anyhow::Result<PluginManifest> {
        let mut manifest = PluginManifest::load_from_file(manifest_path)?;
        manifest.base_path = Some(dir.to_path_buf());
        let env_path = dir.join(CONFIG_ENV_FILE);
        if env_path.is_file() {
            let raw = std::fs::read_to_string(&env_path)
                .map_err(|e| anyhow::anyhow!("read {env_path:?}: {e}"))?;
            manifest.plugin_specific_env_config = parse_env_file(&raw);
        }
        Ok(manifest)
    }

    /// Resolve a plugin by name, local entries first.
    pub async fn get(&self, name: &str) -> Option<Arc<PluginManifest>> {
        if let Some(m) = self.local.read().await.get(name) {
            return Some(m.clone());
        }
        self.remote.read().await.get(name).cloned()
    }

    /// Snapshot of every known manifest, local then remote.
    pub async fn list(&self) -> Vec<Arc<PluginManifest>> {
        let local = self.local.read().await.clone();
        let remote = self.remote.read().await;
        let mut out: Vec<_> = local.values().cloned().collect();
        out.extend(remote.values().cloned());
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Names of discovered message preprocessors, sorted.
    pub async fn preprocessor_names(&self) -> Vec<String> {
        let local = self.local.read().await.clone();
        let mut names: Vec<String> = local
            .values()
            .filter(|m| m.plugin_type == PluginType::MessagePreprocessor)
            .map(|m| m.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Register one remote tool manifest. Rejects name collisions with any
    /// existing registration instead of overwriting.
    pub async fn register_remote(
        &self,
        server_id: &str,
        mut manifest: PluginManifest,
    ) -> Result<(), VcpError> {
        if manifest.name.trim().is_empty() {
            return Err(VcpError::ManifestInvalid("remote tool missing name".into()));
        }
        manifest.is_distributed = true;
        manifest.server_id = Some(server_id.to_string());
        manifest.display_name = Some(format!("[Remote] {}", manifest.display_name()));
        manifest
            .validate()
            .map_err(|e| VcpError::ManifestInvalid(e.to_string()))?;

        let local = self.local.read().await.clone();
        let mut remote = self.remote.write().await;
        if local.contains_key(&manifest.name) || remote.contains_key(&manifest.name) {
            return Err(VcpError::NameCollision(manifest.name));
        }
        info!(plugin = %manifest.name, server_id, "registered distributed tool");
        remote.insert(manifest.name.clone(), Arc::new(manifest));
        Ok(())
    }

    /// Remove every remote entry owned by `server_id`; returns their names.
    pub async fn evict_server(&self, server_id: &str) -> Vec<String> {
        let mut remote = self.remote.write().await;
        let evicted: Vec<String> = remote
            .values()
            .filter(|m| m.server_id.as_deref() == Some(server_id))
            .map(|m| m.name.clone())
            .collect();
        for name in &evicted {
            remote.remove(name);
        }
        if !evicted.is_empty() {
            info!(server_id, count = evicted.len(), "evicted distributed tools");
        }
        evicted
    }
}
