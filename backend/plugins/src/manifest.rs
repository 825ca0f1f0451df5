//! Plugin manifest — the declarative metadata file accompanying a plugin.
//!
//! One `plugin-manifest.json` per plugin directory. Remote tools arrive as
//! the same structure over the distributed channel, minus `basePath`.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Manifest file name looked up in each plugin directory.
pub const MANIFEST_FILE: &str = "plugin-manifest.json";

/// Per-plugin local config file, simple `KEY=VALUE` lines.
pub const CONFIG_ENV_FILE: &str = "config.env";

const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_ASYNC_TIMEOUT: Duration = Duration::from_secs(1800);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PluginType {
    #[serde(rename = "synchronous")]
    Synchronous,
    #[serde(rename = "asynchronous")]
    Asynchronous,
    #[serde(rename = "static")]
    Static,
    #[serde(rename = "messagePreprocessor")]
    MessagePreprocessor,
    #[serde(rename = "service")]
    Service,
    #[serde(rename = "hybridservice")]
    HybridService,
}

impl PluginType {
    pub fn is_stdio_tool(self) -> bool {
        matches!(self, Self::Synchronous | Self::Asynchronous)
    }
}

impl fmt::Display for PluginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Synchronous => "synchronous",
            Self::Asynchronous => "asynchronous",
            Self::Static => "static",
            Self::MessagePreprocessor => "messagePreprocessor",
            Self::Service => "service",
            Self::HybridService => "hybridservice",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Stdio,
    Direct,
}

/// Declared type of a config key; raw strings are coerced accordingly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigType {
    Integer,
    Boolean,
    String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryPoint {
    /// Shell-style command line for subprocess types; refresh command for
    /// static plugins.
    #[serde(default)]
    pub command: Option<String>,
    /// In-process module name for service / preprocessor types.
    #[serde(default)]
    pub script: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Communication {
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// One invokable command, used to build per-plugin prompt fragments.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationCommand {
    #[serde(default)]
    pub command: Option<String>,
    pub description: String,
    #[serde(default)]
    pub example: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceholderDecl {
    pub placeholder: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    #[serde(default)]
    pub invocation_commands: Vec<InvocationCommand>,
    #[serde(default)]
    pub system_prompt_placeholders: Vec<PlaceholderDecl>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub plugin_type: PluginType,
    #[serde(default)]
    pub entry_point: Option<EntryPoint>,
    #[serde(default)]
    pub communication: Option<Communication>,
    #[serde(default)]
    pub refresh_interval_cron: Option<String>,
    #[serde(default)]
    pub capabilities: Option<Capabilities>,
    #[serde(default)]
    pub config_schema: HashMap<String, ConfigType>,

    /// Filesystem directory of the plugin; absent for remote tools.
    #[serde(skip)]
    pub base_path: Option<PathBuf>,
    /// Key/value pairs parsed from the plugin's local `config.env`.
    #[serde(skip)]
    pub plugin_specific_env_config: HashMap<String, String>,

    #[serde(default)]
    pub is_distributed: bool,
    #[serde(default)]
    pub server_id: Option<String>,
}

impl PluginManifest {
    /// Parse a manifest file from disk. Does not attach `basePath` or the
    /// local config; discovery does that.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("read manifest at {path:?}: {e}"))?;
        let manifest: PluginManifest =
            serde_json::from_str(&raw).map_err(|e| anyhow::anyhow!("parse manifest: {e}"))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Check the required fields for the declared type.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("manifest missing 'name'");
        }
        match self.plugin_type {
            PluginType::Synchronous | PluginType::Asynchronous | PluginType::Static => {
                if self.is_distributed {
                    if self.entry_point.is_none() {
                        anyhow::bail!("plugin '{}' missing entryPoint", self.name);
                    }
                } else {
                    let has_command = self
                        .entry_point
                        .as_ref()
                        .and_then(|e| e.command.as_deref())
                        .is_some_and(|c| !c.trim().is_empty());
                    if !has_command {
                        anyhow::bail!("plugin '{}' missing entryPoint.command", self.name);
                    }
                }
            }
            PluginType::MessagePreprocessor | PluginType::Service | PluginType::HybridService => {
                if self.entry_point.is_none() {
                    anyhow::bail!("plugin '{}' missing entryPoint", self.name);
                }
            }
        }
        Ok(())
    }

    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    pub fn protocol(&self) -> Protocol {
        self.communication.as_ref().map(|c| c.protocol).unwrap_or_default()
    }

    pub fn command(&self) -> Option<&str> {
        self.entry_point.as_ref().and_then(|e| e.command.as_deref())
    }

    /// Declared timeout, or the per-type default.
    pub fn timeout(&self) -> Duration {
        match self.communication.as_ref().and_then(|c| c.timeout_ms) {
            Some(ms) => Duration::from_millis(ms),
            None => match self.plugin_type {
                PluginType::Asynchronous => DEFAULT_ASYNC_TIMEOUT,
                _ => DEFAULT_SYNC_TIMEOUT,
            },
        }
    }

    /// Placeholder keys this plugin declares for the system prompt.
    pub fn declared_placeholders(&self) -> Vec<&str> {
        self.capabilities
            .as_ref()
            .map(|c| {
                c.system_prompt_placeholders
                    .iter()
                    .map(|p| p.placeholder.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }
}
