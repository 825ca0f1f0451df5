use serde_json::{json, Value};
use thiserror::Error;

/// Top-level error taxonomy for the VCP plugin runtime.
///
/// Every variant that can reach a tool caller renders to a JSON object via
/// [`VcpError::to_client_json`]; the `plugin_execution_error` /
/// `plugin_error` keys are part of the dispatcher contract.
#[derive(Debug, Error)]
pub enum VcpError {
    #[error("invalid manifest: {0}")]
    ManifestInvalid(String),

    #[error("plugin name already registered: {0}")]
    NameCollision(String),

    #[error("plugin not found: {0}")]
    PluginNotFound(String),

    #[error("plugin {name} of type {plugin_type} cannot be invoked as a tool")]
    NotInvocable { name: String, plugin_type: String },

    #[error("failed to spawn plugin process: {0}")]
    SpawnFailed(String),

    #[error("plugin timed out after {0} ms")]
    Timeout(u64),

    /// The plugin emitted a well-formed `{status:"error", ...}` object.
    #[error("plugin reported an error")]
    PluginReported(Value),

    #[error("plugin produced no valid JSON output")]
    MalformedOutput { stderr_tail: String },

    #[error("plugin output exceeded the capture limit")]
    OversizedOutput,

    /// The one-shot file-fallback retry could not fetch the file.
    #[error("file fallback fetch failed: {fetch_error}")]
    FileFallbackFailed { original: Value, fetch_error: String },

    #[error("remote session {0} disconnected")]
    RemoteDisconnect(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VcpError {
    /// Stable machine-usable kind string.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ManifestInvalid(_) => "manifest_invalid",
            Self::NameCollision(_) => "name_collision",
            Self::PluginNotFound(_) => "plugin_not_found",
            Self::NotInvocable { .. } => "not_invocable",
            Self::SpawnFailed(_) => "spawn_failed",
            Self::Timeout(_) => "timeout",
            Self::PluginReported(_) => "plugin_error",
            Self::MalformedOutput { .. } => "malformed_plugin_output",
            Self::OversizedOutput => "oversized_output",
            Self::FileFallbackFailed { .. } => "file_fallback_failed",
            Self::RemoteDisconnect(_) => "remote_disconnect",
            Self::Other(_) => "internal",
        }
    }

    /// Render the error as the JSON object callers receive.
    ///
    /// A `PluginReported` error forwards the plugin's own structured payload
    /// under `plugin_error`; everything else becomes a
    /// `plugin_execution_error` with the kind and a human-readable message.
    pub fn to_client_json(&self) -> Value {
        match self {
            Self::PluginReported(payload) => json!({
                "plugin_error": payload,
                "message": payload
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("plugin reported an error"),
            }),
            Self::MalformedOutput { stderr_tail } => json!({
                "plugin_execution_error": self.kind(),
                "message": self.to_string(),
                "stderr_tail": stderr_tail,
            }),
            Self::FileFallbackFailed { original, fetch_error } => json!({
                "plugin_execution_error": self.kind(),
                "message": self.to_string(),
                "plugin_error": original,
                "fetch_error": fetch_error,
            }),
            other => json!({
                "plugin_execution_error": other.kind(),
                "message": other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plugin_reported_forwards_payload() {
        let err = VcpError::PluginReported(json!({"status": "error", "error": "boom"}));
        let rendered = err.to_client_json();
        assert_eq!(rendered["plugin_error"]["error"], "boom");
        assert_eq!(rendered["message"], "boom");
    }

    #[test]
    fn execution_errors_carry_kind_and_message() {
        let err = VcpError::Timeout(1000);
        let rendered = err.to_client_json();
        assert_eq!(rendered["plugin_execution_error"], "timeout");
        assert!(rendered["message"].as_str().unwrap().contains("1000"));
    }

    #[test]
    fn malformed_output_includes_stderr_tail() {
        let err = VcpError::MalformedOutput { stderr_tail: "traceback".into() };
        assert_eq!(err.to_client_json()["stderr_tail"], "traceback");
    }
}
