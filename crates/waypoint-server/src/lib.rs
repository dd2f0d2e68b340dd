// crates/waypoint-server/src/lib.rs
// Waypoint - local-first AI agent gateway (tool orchestration core)

#![allow(clippy::collapsible_if)]
#![allow(clippy::too_many_arguments)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

pub mod agent;
pub mod config;
pub mod error;
pub mod gateway;
pub mod llm;
pub mod middleware;
pub mod registry;
pub mod transport;
pub mod utils;

pub use error::{GatewayError, Result};
