// crates/waypoint-server/src/config/file.rs
// client_config.json loading: mcpServers map + _disabled_servers staging area

use crate::error::{GatewayError, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use waypoint_types::ServerSpec;

/// Parsed gateway client configuration.
///
/// `servers` are connected by `Registry::connect_all`; `disabled` entries use
/// the same shape but are only reported, never launched (staging area for
/// servers awaiting credentials).
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub servers: Vec<ServerSpec>,
    pub disabled: Vec<ServerSpec>,
}

/// Default config location: `~/.waypoint/client_config.json`, overridable via
/// `WAYPOINT_CONFIG`.
pub fn default_config_path() -> PathBuf {
    if let Ok(p) = std::env::var("WAYPOINT_CONFIG") {
        return PathBuf::from(p);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".waypoint/client_config.json")
}

impl ClientConfig {
    /// Load from the default location. A missing file is an empty config
    /// (generation-only operation is a normal state); malformed JSON is fatal.
    pub fn load_default() -> Result<Self> {
        let path = default_config_path();
        if !path.exists() {
            info!(path = %path.display(), "No client config found, starting with no tool servers");
            return Ok(Self::default());
        }
        Self::load(&path)
    }

    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let root: Value = serde_json::from_str(&content).map_err(|e| {
            GatewayError::Config(format!("bad JSON in {}: {}", path.display(), e))
        })?;

        let servers = parse_server_map(&root, "mcpServers")?;
        let disabled = parse_server_map(&root, "_disabled_servers")?;

        debug!(
            servers = servers.len(),
            disabled = disabled.len(),
            "Loaded client config"
        );
        Ok(Self { servers, disabled })
    }

    /// Find a configured (enabled) server by name.
    pub fn server(&self, name: &str) -> Option<&ServerSpec> {
        self.servers.iter().find(|s| s.name == name)
    }
}

/// Parse one `name → {command, args, env?, description?}` map. The map key
/// becomes the spec's `name`; entries without a `command` are a config error
/// (fatal at startup rather than a silent skip).
fn parse_server_map(root: &Value, key: &str) -> Result<Vec<ServerSpec>> {
    let Some(map) = root.get(key) else {
        return Ok(Vec::new());
    };
    let map = map
        .as_object()
        .ok_or_else(|| GatewayError::Config(format!("'{key}' must be an object")))?;

    let mut specs = Vec::with_capacity(map.len());
    for (name, value) in map {
        let mut spec: ServerSpec = serde_json::from_value(value.clone()).map_err(|e| {
            GatewayError::Config(format!("server '{name}' in '{key}' is malformed: {e}"))
        })?;
        if spec.command.trim().is_empty() {
            return Err(GatewayError::Config(format!(
                "server '{name}' in '{key}' has an empty command"
            )));
        }
        spec.name = name.clone();
        specs.push(spec);
    }
    // Stable order regardless of JSON map iteration
    specs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(specs)
}
