//! In-process service modules.
//!
//! `service` and `hybridservice` manifests bind by name to compiled-in
//! modules; invocation is a direct function call, never stdio.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use vcp_plugins::{PluginManifest, PluginType};

#[async_trait]
pub trait ServiceModule: Send + Sync {
    fn name(&self) -> &str;

    async fn process_tool_call(&self, args: Value) -> Result<Value>;
}

#[derive(Default, Clone)]
pub struct ServiceRegistry {
    modules: Arc<RwLock<HashMap<String, Arc<dyn ServiceModule>>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, module: Arc<dyn ServiceModule>) {
        self.modules
            .write()
            .await
            .insert(module.name().to_string(), module);
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn ServiceModule>> {
        self.modules.read().await.get(name).cloned()
    }

    /// Names of local service-type manifests with no registered module.
    /// Those manifests stay listed, but invoking them fails; reload warns
    /// for each so the gap is visible before the first call.
    pub async fn unbound_names(&self, manifests: &[Arc<PluginManifest>]) -> Vec<String> {
        let modules = self.modules.read().await;
        manifests
            .iter()
            .filter(|m| {
                matches!(m.plugin_type, PluginType::Service | PluginType::HybridService)
            })
            .filter(|m| !m.is_distributed && !modules.contains_key(&m.name))
            .map(|m| m.name.clone())
            .collect()
    }
}
