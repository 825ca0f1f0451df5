//! Distributed control-channel frames.
//!
//! Each frame is one JSON object on the persistent channel between the hub
//! and a worker node. Frames are delivered in order within a session; the
//! transport (WebSocket) supplies the close signal and keep-alive pings.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use vcp_plugins::PluginManifest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Node -> hub: advertise tool manifests.
    RegisterTools { tools: Vec<PluginManifest> },
    /// Node -> hub: push placeholder values as if a local static refresh ran.
    UpdatePlaceholders { placeholders: HashMap<String, String> },
    /// Hub -> node: invoke a tool the node owns.
    ToolRequest {
        id: Uuid,
        #[serde(rename = "toolName")]
        tool_name: String,
        args: Value,
    },
    /// Node -> hub: result for a prior request, matched by id.
    ToolResponse {
        id: Uuid,
        status: ResponseStatus,
        payload: Value,
    },
    /// Hub -> node: fetch file bytes for the file-fallback retry.
    FileRequest {
        id: Uuid,
        #[serde(rename = "fileUrl")]
        file_url: String,
    },
    /// Node -> hub: file bytes as `{ mimeType, base64 }`.
    FileResponse {
        id: Uuid,
        status: ResponseStatus,
        payload: Value,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_request_wire_format() {
        let id = Uuid::new_v4();
        let frame = Frame::ToolRequest {
            id,
            tool_name: "RemoteSearch".into(),
            args: json!({"q": "rust"}),
        };
        let wire: Value = serde_json::from_str(&serde_json::to_string(&frame).unwrap()).unwrap();
        assert_eq!(wire["type"], "tool_request");
        assert_eq!(wire["toolName"], "RemoteSearch");
        assert_eq!(wire["id"], id.to_string());
    }

    #[test]
    fn register_tools_round_trips() {
        let raw = json!({
            "type": "register_tools",
            "tools": [{
                "name": "RemoteSearch",
                "pluginType": "synchronous",
                "entryPoint": { "command": "node search.js" }
            }]
        });
        match serde_json::from_value::<Frame>(raw).unwrap() {
            Frame::RegisterTools { tools } => assert_eq!(tools[0].name, "RemoteSearch"),
            other => panic!("wrong frame: {other:?}"),
        }
    }

    #[test]
    fn response_status_is_lowercase() {
        let frame = Frame::ToolResponse {
            id: Uuid::new_v4(),
            status: ResponseStatus::Error,
            payload: json!({"error": "x"}),
        };
        let wire = serde_json::to_string(&frame).unwrap();
        assert!(wire.contains(r#""status":"error""#));
    }
}
