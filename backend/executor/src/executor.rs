//! Stdio executor — one invocation of one local subprocess plugin.
//!
//! The plugin receives a single JSON payload on stdin (then stdin closes),
//! emits one JSON object on stdout, and logs diagnostics to stderr. Output
//! capture is bounded, every invocation carries a deadline, and asynchronous
//! plugins are acknowledged on the first complete JSON object rather than at
//! exit.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use vcp_core::{FileFetcher, LogTail, VcpError};
use vcp_plugins::config_env;
use vcp_plugins::manifest::{PluginManifest, PluginType, Protocol};

use crate::json_scan::JsonScanner;

/// Hard cap on captured stdout per invocation.
pub const MAX_CAPTURE_BYTES: usize = 8 * 1024 * 1024;

/// Default deadline for static-refresh executions.
pub const STATIC_REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

const FILE_NOT_FOUND_CODE: &str = "FILE_NOT_FOUND_LOCALLY";

/// Well-known keys injected into every plugin's environment when known.
#[derive(Debug, Clone, Default)]
pub struct WellKnownEnv {
    pub project_root: Option<PathBuf>,
    pub server_port: Option<u16>,
    pub image_server_key: Option<String>,
    /// Base URL asynchronous plugins post completion events back to.
    pub callback_base_url: Option<String>,
}

enum RawOutcome {
    /// Synchronous plugin ran to exit.
    SyncExit { stdout: Vec<u8>, status: std::process::ExitStatus },
    /// Asynchronous plugin produced its first complete JSON object; the
    /// child keeps running detached.
    AsyncAck { object: String },
    /// Asynchronous plugin exited without ever completing an object.
    AsyncEof,
}

struct FileSentinel {
    file_url: String,
    failed_parameter: String,
}

impl FileSentinel {
    fn from_payload(payload: &Value) -> Option<Self> {
        if payload.get("code").and_then(Value::as_str) != Some(FILE_NOT_FOUND_CODE) {
            return None;
        }
        Some(Self {
            file_url: payload.get("fileUrl")?.as_str()?.to_string(),
            failed_parameter: payload.get("failedParameter")?.as_str()?.to_string(),
        })
    }
}

pub struct StdioExecutor {
    well_known: WellKnownEnv,
    fetcher: OnceLock<Arc<dyn FileFetcher>>,
    stderr_tails: Arc<RwLock<HashMap<String, String>>>,
}

impl StdioExecutor {
    pub fn new(well_known: WellKnownEnv) -> Self {
        Self {
            well_known,
            fetcher: OnceLock::new(),
            stderr_tails: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Wire the distributed file fetcher after bridge construction.
    pub fn set_file_fetcher(&self, fetcher: Arc<dyn FileFetcher>) {
        let _ = self.fetcher.set(fetcher);
    }

    /// Last captured stderr tail for a plugin, for diagnostics.
    pub async fn stderr_tail(&self, plugin: &str) -> Option<String> {
        self.stderr_tails.read().await.get(plugin).cloned()
    }

    /// Execute one tool invocation. On a `FILE_NOT_FOUND_LOCALLY` error
    /// payload the input is rewritten with fetched file bytes and re-run
    /// exactly once.
    pub async fn execute(
        &self,
        manifest: &PluginManifest,
        input: Option<&Value>,
        origin: Option<&str>,
    ) -> Result<Value, VcpError> {
        if !manifest.plugin_type.is_stdio_tool() {
            return Err(VcpError::NotInvocable {
                name: manifest.name.clone(),
                plugin_type: manifest.plugin_type.to_string(),
            });
        }
        if manifest.protocol() != Protocol::Stdio {
            return Err(VcpError::ManifestInvalid(format!(
                "plugin '{}' does not use the stdio protocol",
                manifest.name
            )));
        }

        let first = self.run_once(manifest, input, origin).await;
        let payload = match first {
            Err(VcpError::PluginReported(p)) => p,
            other => return other,
        };
        let Some(sentinel) = FileSentinel::from_payload(&payload) else {
            return Err(VcpError::PluginReported(payload));
        };
        let (Some(origin), Some(fetcher)) = (origin, self.fetcher.get()) else {
            warn!(plugin = %manifest.name, "file fallback requested but no session origin or fetcher");
            return Err(VcpError::PluginReported(payload));
        };

        info!(
            plugin = %manifest.name,
            file_url = %sentinel.file_url,
            parameter = %sentinel.failed_parameter,
            "fetching file over distributed channel for retry"
        );
        match fetcher.fetch_as_data_uri(origin, &sentinel.file_url).await {
            Ok(data_uri) => {
                let rewritten = rewrite_input(input, &sentinel.failed_parameter, data_uri);
                // One retry only; a second sentinel surfaces as-is.
                self.run_once(manifest, Some(&rewritten), Some(origin)).await
            }
            Err(e) => Err(VcpError::FileFallbackFailed {
                original: payload,
                fetch_error: e.to_string(),
            }),
        }
    }

    /// Run a static plugin's refresh command and capture its entire stdout.
    pub async fn execute_static(&self, manifest: &PluginManifest) -> Result<String, VcpError> {
        let timeout = match manifest.communication.as_ref().and_then(|c| c.timeout_ms) {
            Some(ms) => Duration::from_millis(ms),
            None => STATIC_REFRESH_TIMEOUT,
        };
        let mut child = self.spawn(manifest, None, false)?;
        drop(child.stdin.take());
        let stdout = child.stdout.take().expect("stdout piped");
        let stderr_task = self.spawn_stderr_reader(&mut child, &manifest.name);

        let fut = async {
            let out = read_capped(stdout, MAX_CAPTURE_BYTES).await?;
            let status = child
                .wait()
                .await
                .map_err(|e| VcpError::Other(anyhow::anyhow!("wait: {e}")))?;
            Ok::<_, VcpError>((out, status))
        };
        let (out, status) = match tokio::time::timeout(timeout, fut).await {
            Ok(res) => res?,
            Err(_) => {
                let _ = child.kill().await;
                return Err(VcpError::Timeout(timeout.as_millis() as u64));
            }
        };
        let tail = finish_stderr(stderr_task).await;
        if !status.success() {
            return Err(VcpError::Other(anyhow::anyhow!(
                "refresh exited with {status}: {tail}"
            )));
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    async fn run_once(
        &self,
        manifest: &PluginManifest,
        input: Option<&Value>,
        origin: Option<&str>,
    ) -> Result<Value, VcpError> {
        let asynchronous = manifest.plugin_type == PluginType::Asynchronous;
        let timeout = manifest.timeout();

        let mut child = self.spawn(manifest, origin, asynchronous)?;
        if let Some(mut stdin) = child.stdin.take() {
            if let Some(input) = input {
                let payload = serde_json::to_vec(input)
                    .map_err(|e| VcpError::Other(anyhow::anyhow!("encode input: {e}")))?;
                // A plugin may legitimately exit before reading everything.
                let _ = stdin.write_all(&payload).await;
            }
            let _ = stdin.shutdown().await;
        }
        let stdout = child.stdout.take().expect("stdout piped");
        let stderr_task = self.spawn_stderr_reader(&mut child, &manifest.name);

        let outcome = if asynchronous {
            self.run_async(child, stdout, timeout).await?
        } else {
            Self::run_sync(&mut child, stdout, timeout).await?
        };

        match outcome {
            RawOutcome::SyncExit { stdout, status } => {
                let tail = finish_stderr(stderr_task).await;
                if !tail.is_empty() && config_env::debug_mode(manifest) {
                    info!(plugin = %manifest.name, stderr = %tail, "plugin diagnostics");
                }
                let text = String::from_utf8_lossy(&stdout);
                match serde_json::from_str::<Value>(text.trim()) {
                    Ok(obj @ Value::Object(_)) => {
                        self.interpret(&manifest.name, obj, Some(status), tail)
                    }
                    _ => Err(VcpError::MalformedOutput { stderr_tail: tail }),
                }
            }
            RawOutcome::AsyncAck { object } => match serde_json::from_str::<Value>(&object) {
                Ok(obj @ Value::Object(_)) => self.interpret(&manifest.name, obj, None, String::new()),
                _ => {
                    let tail = finish_stderr(stderr_task).await;
                    Err(VcpError::MalformedOutput { stderr_tail: tail })
                }
            },
            RawOutcome::AsyncEof => {
                let tail = finish_stderr(stderr_task).await;
                Err(VcpError::MalformedOutput { stderr_tail: tail })
            }
        }
    }

    fn interpret(
        &self,
        plugin: &str,
        obj: Value,
        status: Option<std::process::ExitStatus>,
        stderr_tail: String,
    ) -> Result<Value, VcpError> {
        match obj.get("status").and_then(Value::as_str) {
            Some("success") => {
                if let Some(status) = status {
                    if !status.success() {
                        warn!(plugin, %status, "success payload from non-zero exit, trusting payload");
                    }
                }
                Ok(obj)
            }
            Some("error") => Err(VcpError::PluginReported(obj)),
            _ => Err(VcpError::MalformedOutput { stderr_tail }),
        }
    }

    async fn run_sync(
        child: &mut Child,
        stdout: ChildStdout,
        timeout: Duration,
    ) -> Result<RawOutcome, VcpError> {
        let fut = async {
            let out = read_capped(stdout, MAX_CAPTURE_BYTES).await?;
            let status = child
                .wait()
                .await
                .map_err(|e| VcpError::Other(anyhow::anyhow!("wait: {e}")))?;
            Ok::<_, VcpError>(RawOutcome::SyncExit { stdout: out, status })
        };
        match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) => {
                // Capture failure: the child must not linger.
                if matches!(e, VcpError::OversizedOutput) {
                    let _ = child.kill().await;
                }
                Err(e)
            }
            Err(_) => {
                let _ = child.kill().await;
                Err(VcpError::Timeout(timeout.as_millis() as u64))
            }
        }
    }

    /// Read stdout through the scanner until the first complete object,
    /// EOF, the cap, or the deadline. The child is only killed when the
    /// ack never arrived in time.
    async fn run_async(
        &self,
        mut child: Child,
        mut stdout: ChildStdout,
        timeout: Duration,
    ) -> Result<RawOutcome, VcpError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut scanner = JsonScanner::new();
        let mut chunk = [0u8; 8192];
        loop {
            let read = tokio::time::timeout_at(deadline, stdout.read(&mut chunk)).await;
            match read {
                Err(_) => {
                    let _ = child.kill().await;
                    return Err(VcpError::Timeout(timeout.as_millis() as u64));
                }
                Ok(Err(e)) => {
                    let _ = child.kill().await;
                    return Err(VcpError::Other(anyhow::anyhow!("read stdout: {e}")));
                }
                Ok(Ok(0)) => {
                    let _ = child.wait().await;
                    return Ok(RawOutcome::AsyncEof);
                }
                Ok(Ok(n)) => {
                    if scanner.buffered_len() + n > MAX_CAPTURE_BYTES {
                        let _ = child.kill().await;
                        return Err(VcpError::OversizedOutput);
                    }
                    if let Some(object) = scanner.push(&chunk[..n]) {
                        debug!("async ack received, detaching child");
                        // Drain stdout so the child never blocks on a full
                        // pipe, then reap it whenever it finishes.
                        tokio::spawn(async move {
                            let mut sink = [0u8; 8192];
                            while matches!(stdout.read(&mut sink).await, Ok(n) if n > 0) {}
                            let _ = child.wait().await;
                        });
                        return Ok(RawOutcome::AsyncAck { object });
                    }
                }
            }
        }
    }

    fn spawn_stderr_reader(
        &self,
        child: &mut Child,
        plugin: &str,
    ) -> tokio::task::JoinHandle<String> {
        let stderr = child.stderr.take().expect("stderr piped");
        let tails = self.stderr_tails.clone();
        let plugin = plugin.to_string();
        tokio::spawn(async move {
            let mut tail = LogTail::default();
            let mut stream = stderr;
            let mut chunk = [0u8; 4096];
            loop {
                match stream.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => tail.push(&String::from_utf8_lossy(&chunk[..n])),
                }
            }
            let text = tail.into_string();
            tails.write().await.insert(plugin, text.clone());
            text
        })
    }

    fn spawn(
        &self,
        manifest: &PluginManifest,
        origin: Option<&str>,
        asynchronous: bool,
    ) -> Result<Child, VcpError> {
        let command = manifest
            .command()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| {
                VcpError::ManifestInvalid(format!("plugin '{}' has no command", manifest.name))
            })?;
        let mut tokens = command.split_whitespace();
        let program = tokens
            .next()
            .ok_or_else(|| VcpError::ManifestInvalid("empty command".into()))?;

        let mut cmd = Command::new(program);
        cmd.args(tokens);
        if let Some(base) = &manifest.base_path {
            cmd.current_dir(base);
        }
        for (k, v) in config_env::effective_string_config(manifest) {
            cmd.env(k, v);
        }
        cmd.env("PYTHONIOENCODING", "utf-8");
        if let Some(root) = &self.well_known.project_root {
            cmd.env("PROJECT_BASE_PATH", root);
        }
        if let Some(port) = self.well_known.server_port {
            cmd.env("SERVER_PORT", port.to_string());
        }
        if let Some(key) = &self.well_known.image_server_key {
            cmd.env("IMAGESERVER_IMAGE_KEY", key);
        }
        if let Some(origin) = origin {
            cmd.env("REQUEST_ORIGIN", origin);
        }
        if asynchronous {
            cmd.env("PLUGIN_NAME_FOR_CALLBACK", &manifest.name);
            if let Some(base) = &self.well_known.callback_base_url {
                cmd.env("CALLBACK_BASE_URL", base);
            }
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd.spawn().map_err(|e| VcpError::SpawnFailed(e.to_string()))
    }
}

async fn read_capped(
    mut stream: impl AsyncRead + Unpin,
    cap: usize,
) -> Result<Vec<u8>, VcpError> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| VcpError::Other(anyhow::anyhow!("read stdout: {e}")))?;
        if n == 0 {
            return Ok(buf);
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > cap {
            return Err(VcpError::OversizedOutput);
        }
    }
}

async fn finish_stderr(task: tokio::task::JoinHandle<String>) -> String {
    match tokio::time::timeout(Duration::from_secs(1), task).await {
        Ok(Ok(tail)) => tail,
        _ => String::new(),
    }
}

/// Replace the failed parameter with its fetched data URI. Parameter names
/// containing `url` switch to the matching `base64` name.
fn rewrite_input(input: Option<&Value>, failed_parameter: &str, data_uri: String) -> Value {
    let mut obj = input
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    obj.remove(failed_parameter);
    let target = if failed_parameter.contains("url") {
        failed_parameter.replace("url", "base64")
    } else {
        failed_parameter.to_string()
    };
    obj.insert(target, Value::String(data_uri));
    Value::Object(obj)
}
