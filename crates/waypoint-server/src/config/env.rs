// crates/waypoint-server/src/config/env.rs
// Environment-based configuration - single source of truth for all env vars

use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

/// Load `.env` from `~/.waypoint/.env` only (never from CWD — a malicious
/// repo could override the inference URL or workspace root).
pub fn load_dotenv() {
    if let Some(home) = dirs::home_dir()
        && let Err(e) = dotenvy::from_path(home.join(".waypoint/.env"))
    {
        debug!("Failed to load global .env file: {}", e);
    }
}

/// Parse a boolean env var: `1`/`true`/`yes`/`on` are true (case-insensitive).
pub fn parse_bool_env(name: &str) -> Option<bool> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        "" => None,
        other => {
            warn!("Unrecognized value {other:?} for {name}, ignoring");
            None
        }
    }
}

fn parse_u64_env(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// Inference service settings (WAYPOINT_OLLAMA_URL, WAYPOINT_DEFAULT_MODEL).
#[derive(Debug, Clone)]
pub struct LlmEnv {
    pub base_url: String,
    pub default_model: String,
}

impl LlmEnv {
    pub fn from_env() -> Self {
        let base_url = std::env::var("WAYPOINT_OLLAMA_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        let default_model = std::env::var("WAYPOINT_DEFAULT_MODEL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "llama3.2".to_string());
        Self {
            base_url,
            default_model,
        }
    }
}

/// Rate limiting settings (WAYPOINT_RATELIMIT_*).
#[derive(Debug, Clone)]
pub struct RateLimitEnv {
    pub enabled: bool,
    /// Steady-state refill, expressed per minute in config.
    pub per_minute: u64,
    /// Burst capacity, separate from the steady-state rate.
    pub burst: u64,
}

impl RateLimitEnv {
    pub fn from_env() -> Self {
        Self {
            enabled: parse_bool_env("WAYPOINT_RATELIMIT_ENABLED").unwrap_or(true),
            per_minute: parse_u64_env("WAYPOINT_RATELIMIT_PER_MINUTE").unwrap_or(60),
            burst: parse_u64_env("WAYPOINT_RATELIMIT_BURST").unwrap_or(10),
        }
    }

    pub fn rate_per_second(&self) -> f64 {
        self.per_minute as f64 / 60.0
    }
}

/// Cache settings (WAYPOINT_CACHE_ENABLED).
#[derive(Debug, Clone)]
pub struct CacheEnv {
    pub enabled: bool,
}

impl CacheEnv {
    pub fn from_env() -> Self {
        Self {
            enabled: parse_bool_env("WAYPOINT_CACHE_ENABLED").unwrap_or(true),
        }
    }
}

/// Everything the gateway reads from the environment, resolved once at startup.
#[derive(Debug, Clone)]
pub struct GatewayEnv {
    pub llm: LlmEnv,
    pub rate_limit: RateLimitEnv,
    pub cache: CacheEnv,
    /// Root directory sandboxed tool operations are confined to.
    pub workspace_root: PathBuf,
    /// Whether the external API surface must authenticate callers
    /// (consumed by the HTTP collaborator, recognized here).
    pub auth_required: bool,
    /// Where session logs and reports are written.
    pub log_dir: PathBuf,
    /// Handshake deadline for tool-server connects.
    pub handshake_timeout: Duration,
    /// Default per-call deadline for tool calls.
    pub call_timeout: Duration,
}

impl GatewayEnv {
    pub fn from_env() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let workspace_root = std::env::var("WAYPOINT_WORKSPACE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.clone());
        let log_dir = std::env::var("WAYPOINT_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join(".waypoint/logs"));

        Self {
            llm: LlmEnv::from_env(),
            rate_limit: RateLimitEnv::from_env(),
            cache: CacheEnv::from_env(),
            workspace_root,
            auth_required: parse_bool_env("WAYPOINT_AUTH_REQUIRED").unwrap_or(false),
            log_dir,
            handshake_timeout: Duration::from_secs(
                parse_u64_env("WAYPOINT_HANDSHAKE_TIMEOUT_SECS").unwrap_or(10),
            ),
            call_timeout: Duration::from_secs(
                parse_u64_env("WAYPOINT_CALL_TIMEOUT_SECS").unwrap_or(30),
            ),
        }
    }
}
