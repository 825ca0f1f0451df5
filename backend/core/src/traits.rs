use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::error::VcpError;

/// Routes a tool invocation to the remote node that owns the tool.
///
/// Implemented by the distributed bridge; the dispatcher only sees this
/// trait so neither side reaches inside the other's state.
#[async_trait]
pub trait RemoteInvoker: Send + Sync {
    async fn execute_remote(
        &self,
        server_id: &str,
        tool_name: &str,
        args: &Value,
        timeout: Duration,
    ) -> Result<Value, VcpError>;
}

/// Fetches file bytes from the distributed session that owns the given
/// network origin, returning them as a `data:` URI.
///
/// Used by the stdio executor for the one-shot file-fallback retry.
#[async_trait]
pub trait FileFetcher: Send + Sync {
    async fn fetch_as_data_uri(&self, origin: &str, file_url: &str) -> Result<String, VcpError>;
}
