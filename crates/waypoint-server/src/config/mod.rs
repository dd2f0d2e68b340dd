// crates/waypoint-server/src/config/mod.rs
// Configuration: client_config.json + environment overrides

mod env;
mod file;

pub use env::{CacheEnv, GatewayEnv, LlmEnv, RateLimitEnv, load_dotenv, parse_bool_env};
pub use file::{ClientConfig, default_config_path};
