//! Preprocessor pipeline driver.
//!
//! The chain is an ordered list of modules derived from the persisted order
//! file. Execution is strictly sequential within one request; a step that
//! fails is logged and its input passes through unchanged. Rebuilds swap
//! the chain atomically — requests that already hold the old snapshot
//! finish on it.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use vcp_core::ChatMessage;
use vcp_plugins::{config_env, PluginStore};

use crate::builtin::{self, BuiltinDeps};
use crate::preprocessor::MessagePreprocessor;

type Chain = Vec<Arc<dyn MessagePreprocessor>>;

pub struct PreprocessorPipeline {
    store: Arc<PluginStore>,
    chain: RwLock<Arc<Chain>>,
}

impl PreprocessorPipeline {
    pub fn new(store: Arc<PluginStore>) -> Self {
        Self { store, chain: RwLock::new(Arc::new(Vec::new())) }
    }

    /// Swap in a new chain built from the reconciled order.
    pub async fn rebuild(&self, order: &[String], deps: &BuiltinDeps) {
        let mut chain: Chain = Vec::with_capacity(order.len());
        for name in order {
            match builtin::instantiate(name, deps) {
                Some(module) => chain.push(module),
                None => warn!(preprocessor = %name, "no built-in module for preprocessor, skipping"),
            }
        }
        debug!(steps = chain.len(), "preprocessor chain rebuilt");
        *self.chain.write().await = Arc::new(chain);
    }

    /// Names of the active chain, in execution order.
    pub async fn active_order(&self) -> Vec<String> {
        self.chain
            .read()
            .await
            .iter()
            .map(|m| m.name().to_string())
            .collect()
    }

    /// Run the chain over one request's message array.
    pub async fn run(&self, messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
        let chain = self.chain.read().await.clone();
        let mut current = messages;
        for module in chain.iter() {
            let config = match self.store.get(module.name()).await {
                Some(manifest) => config_env::effective_string_config(&manifest),
                None => Default::default(),
            };
            match module.process(current.clone(), &config).await {
                Ok(next) => current = next,
                Err(e) => {
                    // Best-effort chain: a failing step never poisons the request.
                    warn!(preprocessor = %module.name(), error = %e, "preprocessor failed, passing input through");
                }
            }
        }
        current
    }
}
