//! Tool dispatcher — the single entry point for tool invocations.
//!
//! Resolves the tool name in the plugin store and dispatches by type:
//! local stdio plugins through the executor, distributed tools over the
//! bridge, service modules by direct call. The returned value is always a
//! JSON object carrying an RFC 3339 local timestamp (and the caller's
//! `maid` label when given); errors render to JSON via
//! [`VcpError::to_client_json`].

use std::sync::Arc;

use chrono::{Local, SecondsFormat};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use vcp_core::{RemoteInvoker, VcpError};
use vcp_executor::StdioExecutor;
use vcp_plugins::{PluginStore, PluginType};

use crate::service::ServiceRegistry;

pub struct ToolDispatcher {
    store: Arc<PluginStore>,
    executor: Arc<StdioExecutor>,
    services: ServiceRegistry,
    remote: Arc<dyn RemoteInvoker>,
}

impl ToolDispatcher {
    pub fn new(
        store: Arc<PluginStore>,
        executor: Arc<StdioExecutor>,
        services: ServiceRegistry,
        remote: Arc<dyn RemoteInvoker>,
    ) -> Self {
        Self { store, executor, services, remote }
    }

    pub async fn process_tool_call(
        &self,
        tool_name: &str,
        args: Value,
        origin: Option<&str>,
        maid: Option<String>,
    ) -> Result<Value, VcpError> {
        let manifest = self
            .store
            .get(tool_name)
            .await
            .ok_or_else(|| VcpError::PluginNotFound(tool_name.to_string()))?;
        debug!(tool = tool_name, plugin_type = %manifest.plugin_type, "dispatching tool call");

        let raw = if manifest.is_distributed {
            let server_id = manifest.server_id.as_deref().ok_or_else(|| {
                VcpError::ManifestInvalid(format!("remote tool '{tool_name}' has no server id"))
            })?;
            self.remote
                .execute_remote(server_id, tool_name, &args, manifest.timeout())
                .await?
        } else {
            match manifest.plugin_type {
                PluginType::Synchronous | PluginType::Asynchronous => {
                    self.executor.execute(&manifest, Some(&args), origin).await?
                }
                PluginType::Service | PluginType::HybridService => {
                    let module = self.services.get(tool_name).await.ok_or_else(|| {
                        VcpError::PluginNotFound(format!("service module '{tool_name}'"))
                    })?;
                    module
                        .process_tool_call(args)
                        .await
                        .map_err(|e| VcpError::PluginReported(
                            serde_json::json!({"status": "error", "error": e.to_string()}),
                        ))?
                }
                PluginType::Static | PluginType::MessagePreprocessor => {
                    return Err(VcpError::NotInvocable {
                        name: manifest.name.clone(),
                        plugin_type: manifest.plugin_type.to_string(),
                    });
                }
            }
        };

        Ok(finalize(raw, maid))
    }

    /// Like [`process_tool_call`](Self::process_tool_call), but errors are
    /// folded into the returned JSON object.
    pub async fn process_tool_call_rendered(
        &self,
        tool_name: &str,
        args: Value,
        origin: Option<&str>,
        maid: Option<String>,
    ) -> Value {
        match self.process_tool_call(tool_name, args, origin, maid).await {
            Ok(out) => out,
            Err(e) => {
                warn!(tool = tool_name, kind = e.kind(), "tool call failed");
                e.to_client_json()
            }
        }
    }
}

/// Normalize a plugin's success payload into the dispatcher's result shape.
///
/// An object-valued `result` becomes the response body (wrapper dropped);
/// a scalar or array `result` stays under a `result` key; string results
/// are JSON-parsed first and then follow the same two rules, with the
/// `original_plugin_output` wrapper when they are not JSON. `maid` and
/// `timestamp` are reserved sibling keys merged in last.
fn finalize(raw: Value, maid: Option<String>) -> Value {
    let result_field = match &raw {
        Value::Object(obj) => obj.get("result").cloned().unwrap_or(raw.clone()),
        _ => raw,
    };

    let mut out: Map<String, Value> = match result_field {
        // String results are best-effort JSON-parsed.
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                let mut map = Map::new();
                map.insert("result".into(), other);
                map
            }
            Err(_) => {
                let mut map = Map::new();
                map.insert("original_plugin_output".into(), Value::String(s));
                map
            }
        },
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("result".into(), other);
            map
        }
    };

    if let Some(maid) = maid {
        out.insert("maid".into(), Value::String(maid));
    }
    out.insert(
        "timestamp".into(),
        Value::String(Local::now().to_rfc3339_opts(SecondsFormat::Secs, false)),
    );
    Value::Object(out)
}
