//! Distributed registry — sessions, federated tools, and call routing.
//!
//! One `RemoteSession` per connected worker node, keyed by an opaque
//! server id. Tools a node advertises are inserted into the plugin store
//! marked as remote; everything a session owns is evicted when it ends.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use vcp_core::{FileFetcher, RemoteInvoker, VcpError};
use vcp_plugins::{prompt, PlaceholderTable, PluginManifest, PluginStore};

use crate::correlator::{Completion, Correlator};
use crate::protocol::{Frame, ResponseStatus};

/// Deadline for file-fallback fetches over the channel.
const FILE_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

pub struct RemoteSession {
    pub server_id: String,
    /// Network origin of the node; tool callers arriving from the same
    /// origin use this session for file fetches.
    pub origin: String,
    pub tools: HashSet<String>,
    pub placeholder_keys: HashSet<String>,
    pub last_seen: DateTime<Utc>,
    outbound: mpsc::UnboundedSender<Frame>,
    correlator: Arc<Correlator>,
}

pub struct DistributedRegistry {
    store: Arc<PluginStore>,
    placeholders: Arc<PlaceholderTable>,
    sessions: RwLock<HashMap<String, RemoteSession>>,
}

impl DistributedRegistry {
    pub fn new(store: Arc<PluginStore>, placeholders: Arc<PlaceholderTable>) -> Arc<Self> {
        Arc::new(Self {
            store,
            placeholders,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    /// Track a freshly connected node. Rejects a second session with the
    /// same server id.
    pub async fn open_session(
        &self,
        server_id: &str,
        origin: String,
        outbound: mpsc::UnboundedSender<Frame>,
    ) -> anyhow::Result<()> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(server_id) {
            anyhow::bail!("session '{server_id}' already connected");
        }
        info!(server_id, origin, "distributed session opened");
        sessions.insert(
            server_id.to_string(),
            RemoteSession {
                server_id: server_id.to_string(),
                origin,
                tools: HashSet::new(),
                placeholder_keys: HashSet::new(),
                last_seen: Utc::now(),
                outbound,
                correlator: Arc::new(Correlator::new()),
            },
        );
        Ok(())
    }

    pub async fn touch(&self, server_id: &str) {
        if let Some(session) = self.sessions.write().await.get_mut(server_id) {
            session.last_seen = Utc::now();
        }
    }

    /// Ingest a batch of advertised tool manifests. Collisions are refused
    /// per manifest; the rest of the batch still lands. Rebuilds the
    /// prompt-fragment table afterwards.
    pub async fn register_tools(&self, server_id: &str, manifests: Vec<PluginManifest>) -> usize {
        let mut accepted = Vec::new();
        for manifest in manifests {
            let name = manifest.name.clone();
            match self.store.register_remote(server_id, manifest).await {
                Ok(()) => accepted.push(name),
                Err(e) => warn!(server_id, tool = %name, error = %e, "rejecting distributed tool"),
            }
        }
        let count = accepted.len();
        if let Some(session) = self.sessions.write().await.get_mut(server_id) {
            session.tools.extend(accepted);
        }
        prompt::rebuild_tool_descriptions(&self.store, &self.placeholders).await;
        count
    }

    /// Merge placeholder values pushed by the node, as if a local static
    /// refresh had produced them.
    pub async fn update_placeholders(&self, server_id: &str, values: HashMap<String, String>) {
        let keys: Vec<String> = values.keys().cloned().collect();
        self.placeholders.set_many(values).await;
        if let Some(session) = self.sessions.write().await.get_mut(server_id) {
            session.placeholder_keys.extend(keys);
        }
    }

    /// Route one tool invocation over the session's channel and wait for
    /// the correlated response.
    pub async fn execute(
        &self,
        server_id: &str,
        tool_name: &str,
        args: &Value,
        timeout: Duration,
    ) -> Result<Value, VcpError> {
        let (outbound, correlator) = {
            let sessions = self.sessions.read().await;
            let session = sessions
                .get(server_id)
                .ok_or_else(|| VcpError::RemoteDisconnect(server_id.to_string()))?;
            (session.outbound.clone(), session.correlator.clone())
        };

        let id = Uuid::new_v4();
        let rx = correlator.register(id).await;
        let frame = Frame::ToolRequest {
            id,
            tool_name: tool_name.to_string(),
            args: args.clone(),
        };
        if outbound.send(frame).is_err() {
            correlator.abandon(id).await;
            return Err(VcpError::RemoteDisconnect(server_id.to_string()));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Completion::Response { status: ResponseStatus::Success, payload })) => {
                Ok(payload)
            }
            Ok(Ok(Completion::Response { status: ResponseStatus::Error, payload })) => {
                Err(VcpError::PluginReported(payload))
            }
            Ok(Ok(Completion::Disconnected { server_id })) => {
                Err(VcpError::RemoteDisconnect(server_id))
            }
            Ok(Err(_)) => Err(VcpError::RemoteDisconnect(server_id.to_string())),
            Err(_) => {
                correlator.abandon(id).await;
                Err(VcpError::Timeout(timeout.as_millis() as u64))
            }
        }
    }

    /// Deliver a `tool_response` / `file_response` frame to its waiter.
    pub async fn handle_response(
        &self,
        server_id: &str,
        id: Uuid,
        status: ResponseStatus,
        payload: Value,
    ) {
        let correlator = {
            let sessions = self.sessions.read().await;
            match sessions.get(server_id) {
                Some(session) => session.correlator.clone(),
                None => return,
            }
        };
        let delivered = correlator
            .complete(id, Completion::Response { status, payload })
            .await;
        if !delivered {
            debug!(server_id, %id, "dropping response with no waiter (late or evicted)");
        }
    }

    /// End a session: remove its tools and placeholders, and wake every
    /// outstanding waiter with a disconnect error.
    pub async fn close_session(&self, server_id: &str) {
        let Some(session) = self.sessions.write().await.remove(server_id) else {
            return;
        };
        let evicted = self.store.evict_server(server_id).await;
        let keys: Vec<String> = session.placeholder_keys.iter().cloned().collect();
        self.placeholders.remove_keys(&keys).await;
        session.correlator.fail_all(server_id).await;
        prompt::rebuild_tool_descriptions(&self.store, &self.placeholders).await;
        info!(
            server_id,
            tools = evicted.len(),
            placeholders = keys.len(),
            "distributed session closed"
        );
    }

    async fn session_by_origin(&self, origin: &str) -> Option<(String, mpsc::UnboundedSender<Frame>, Arc<Correlator>)> {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .find(|s| s.origin == origin)
            .map(|s| (s.server_id.clone(), s.outbound.clone(), s.correlator.clone()))
    }
}

#[async_trait]
impl RemoteInvoker for DistributedRegistry {
    async fn execute_remote(
        &self,
        server_id: &str,
        tool_name: &str,
        args: &Value,
        timeout: Duration,
    ) -> Result<Value, VcpError> {
        self.execute(server_id, tool_name, args, timeout).await
    }
}

#[async_trait]
impl FileFetcher for DistributedRegistry {
    async fn fetch_as_data_uri(&self, origin: &str, file_url: &str) -> Result<String, VcpError> {
        let (server_id, outbound, correlator) =
            self.session_by_origin(origin).await.ok_or_else(|| {
                VcpError::Other(anyhow::anyhow!("no distributed session for origin {origin}"))
            })?;

        let id = Uuid::new_v4();
        let rx = correlator.register(id).await;
        let frame = Frame::FileRequest { id, file_url: file_url.to_string() };
        if outbound.send(frame).is_err() {
            correlator.abandon(id).await;
            return Err(VcpError::RemoteDisconnect(server_id));
        }

        let payload = match tokio::time::timeout(FILE_FETCH_TIMEOUT, rx).await {
            Ok(Ok(Completion::Response { status: ResponseStatus::Success, payload })) => payload,
            Ok(Ok(Completion::Response { status: ResponseStatus::Error, payload })) => {
                return Err(VcpError::Other(anyhow::anyhow!("file fetch refused: {payload}")));
            }
            Ok(Ok(Completion::Disconnected { server_id })) => {
                return Err(VcpError::RemoteDisconnect(server_id));
            }
            Ok(Err(_)) => return Err(VcpError::RemoteDisconnect(server_id)),
            Err(_) => {
                correlator.abandon(id).await;
                return Err(VcpError::Timeout(FILE_FETCH_TIMEOUT.as_millis() as u64));
            }
        };

        let mime = payload
            .get("mimeType")
            .and_then(Value::as_str)
            .unwrap_or("application/octet-stream");
        let encoded = payload
            .get("base64")
            .and_then(Value::as_str)
            .ok_or_else(|| VcpError::Other(anyhow::anyhow!("file response missing base64 body")))?;
        // Validate the body before handing it to a retry.
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| VcpError::Other(anyhow::anyhow!("file response body is not base64: {e}")))?;
        debug!(server_id, file_url, bytes = bytes.len(), "fetched file over distributed channel");
        Ok(format!("data:{mime};base64,{encoded}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn remote_manifest(name: &str) -> PluginManifest {
        serde_json::from_value(json!({
            "name": name,
            "pluginType": "synchronous",
            "entryPoint": { "command": "node tool.js" }
        }))
        .unwrap()
    }

    async fn registry_with_session(
        server_id: &str,
        origin: &str,
    ) -> (Arc<DistributedRegistry>, mpsc::UnboundedReceiver<Frame>, Arc<PluginStore>, Arc<PlaceholderTable>) {
        let store = Arc::new(PluginStore::new());
        let placeholders = Arc::new(PlaceholderTable::new());
        let registry = DistributedRegistry::new(store.clone(), placeholders.clone());
        let (tx, rx) = mpsc::unbounded_channel();
        registry.open_session(server_id, origin.to_string(), tx).await.unwrap();
        (registry, rx, store, placeholders)
    }

    #[tokio::test]
    async fn execute_round_trip_with_correlation() {
        let (registry, mut rx, _store, _ph) = registry_with_session("s1", "10.0.0.2").await;

        let call = {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry
                    .execute("s1", "T1", &json!({"q": 1}), Duration::from_secs(2))
                    .await
            })
        };

        let id = match rx.recv().await.unwrap() {
            Frame::ToolRequest { id, tool_name, args } => {
                assert_eq!(tool_name, "T1");
                assert_eq!(args["q"], 1);
                id
            }
            other => panic!("expected tool_request, got {other:?}"),
        };
        registry
            .handle_response("s1", id, ResponseStatus::Success, json!({"status": "success", "result": 7}))
            .await;

        let out = call.await.unwrap().unwrap();
        assert_eq!(out["result"], 7);
    }

    #[tokio::test]
    async fn execute_times_out_and_drops_late_response() {
        let (registry, mut rx, _store, _ph) = registry_with_session("s1", "o").await;

        let err = registry
            .execute("s1", "T1", &json!({}), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, VcpError::Timeout(_)));

        // The late response finds no waiter.
        let id = match rx.recv().await.unwrap() {
            Frame::ToolRequest { id, .. } => id,
            other => panic!("unexpected {other:?}"),
        };
        registry
            .handle_response("s1", id, ResponseStatus::Success, json!({}))
            .await;
    }

    #[tokio::test]
    async fn eviction_removes_tools_placeholders_and_wakes_waiters() {
        let (registry, _rx, store, placeholders) = registry_with_session("s1", "o").await;

        let accepted = registry
            .register_tools("s1", vec![remote_manifest("T1"), remote_manifest("T2")])
            .await;
        assert_eq!(accepted, 2);
        registry
            .update_placeholders("s1", HashMap::from([("PH1".to_string(), "v".to_string())]))
            .await;
        assert_eq!(placeholders.get("PH1").await.unwrap(), "v");

        let pending = {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry
                    .execute("s1", "T1", &json!({}), Duration::from_secs(5))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        registry.close_session("s1").await;

        assert!(store.get("T1").await.is_none());
        assert!(store.get("T2").await.is_none());
        assert!(placeholders.get("PH1").await.is_none());
        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, VcpError::RemoteDisconnect(_)));
    }

    #[tokio::test]
    async fn collision_with_existing_tool_is_refused_not_overwritten() {
        let (registry, _rx, store, _ph) = registry_with_session("s1", "o").await;
        let (tx2, _rx2) = mpsc::unbounded_channel();
        registry.open_session("s2", "o2".into(), tx2).await.unwrap();

        assert_eq!(registry.register_tools("s1", vec![remote_manifest("T")]).await, 1);
        assert_eq!(registry.register_tools("s2", vec![remote_manifest("T")]).await, 0);
        assert_eq!(store.get("T").await.unwrap().server_id.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn duplicate_session_id_is_rejected() {
        let (registry, _rx, _store, _ph) = registry_with_session("s1", "o").await;
        let (tx, _rx2) = mpsc::unbounded_channel();
        assert!(registry.open_session("s1", "elsewhere".into(), tx).await.is_err());
    }

    #[tokio::test]
    async fn fetches_file_as_data_uri_by_origin() {
        let (registry, mut rx, _store, _ph) = registry_with_session("s1", "10.0.0.7").await;

        let responder = {
            let registry = registry.clone();
            tokio::spawn(async move {
                if let Some(Frame::FileRequest { id, file_url }) = rx.recv().await {
                    assert_eq!(file_url, "http://node/f.png");
                    registry
                        .handle_response(
                            "s1",
                            id,
                            ResponseStatus::Success,
                            json!({"mimeType": "image/png", "base64": "QUJD"}),
                        )
                        .await;
                }
            })
        };

        let uri = registry
            .fetch_as_data_uri("10.0.0.7", "http://node/f.png")
            .await
            .unwrap();
        assert_eq!(uri, "data:image/png;base64,QUJD");
        responder.await.unwrap();
    }
}
