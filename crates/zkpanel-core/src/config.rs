use anyhow::Result;
use jsonschema::{validator_for, Validator};
use once_cell::sync::Lazy;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::model::{Credentials, Workspace};
use crate::util::env_u64;

pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 30;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 3;

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
pub struct RuntimeConfig {
    /// Directory holding the SQLite store.
    #[serde(default)]
    pub state_dir: Option<String>,
    /// Bind address for the control API (defaults to 127.0.0.1).
    #[serde(default)]
    pub bind: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct SyncConfig {
    /// Seconds between scheduled syncs.
    #[serde(default = "default_interval_secs")]
    #[schemars(range(min = 1))]
    pub interval_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    #[schemars(range(min = 1))]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    #[schemars(range(min = 1))]
    pub connect_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

fn default_interval_secs() -> u64 {
    DEFAULT_SYNC_INTERVAL_SECS
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

/// Per-workspace panel API credentials, used until an operator stores their own.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
pub struct WorkspacesConfig {
    #[serde(default)]
    pub panel: Option<Credentials>,
    #[serde(default)]
    pub insight: Option<Credentials>,
}

impl WorkspacesConfig {
    pub fn credentials(&self, workspace: Workspace) -> Option<&Credentials> {
        match workspace {
            Workspace::Panel => self.panel.as_ref(),
            Workspace::Insight => self.insight.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
pub struct Config {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub workspaces: WorkspacesConfig,
}

impl Config {
    /// Apply `ZKPANEL_STATE_DIR`, `ZKPANEL_PORT` and `ZKPANEL_SYNC_INTERVAL_SECS`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("ZKPANEL_STATE_DIR") {
            if !dir.trim().is_empty() {
                self.runtime.state_dir = Some(dir);
            }
        }
        if let Some(port) = env_u64("ZKPANEL_PORT").and_then(|p| u16::try_from(p).ok()) {
            self.runtime.port = Some(port);
        }
        if let Some(secs) = env_u64("ZKPANEL_SYNC_INTERVAL_SECS").filter(|s| *s > 0) {
            self.sync.interval_secs = secs;
        }
    }
}

static CONFIG_SCHEMA: Lazy<Validator> = Lazy::new(|| {
    let schema = schemars::schema_for!(Config);
    let schema_value = serde_json::to_value(&schema).expect("schema value");
    validator_for(&schema_value).expect("valid schema")
});

/// Returns the JSON schema describing the configuration structure.
///
/// # Panics
///
/// Panics if schema generation fails; this indicates a programming error.
pub fn config_schema_json() -> serde_json::Value {
    let schema = schemars::schema_for!(Config);
    serde_json::to_value(&schema).expect("schema json")
}

pub fn write_schema_file(path: &str) -> std::io::Result<()> {
    let schema_json = config_schema_json();
    std::fs::write(path, serde_json::to_string_pretty(&schema_json)?)
}

pub fn load_config(path: &str) -> Result<Config> {
    let content = std::fs::read_to_string(path)?;
    let raw: toml::Value = toml::from_str(&content)?;
    let json_value = serde_json::to_value(&raw)?;
    let validation_errors: Vec<_> = CONFIG_SCHEMA
        .iter_errors(&json_value)
        .map(|e| e.to_string())
        .collect();
    if !validation_errors.is_empty() {
        return Err(anyhow::anyhow!(validation_errors.join(", ")));
    }
    let cfg: Config = toml::from_str(&content)?;
    Ok(cfg)
}
