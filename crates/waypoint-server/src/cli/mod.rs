// crates/waypoint-server/src/cli/mod.rs
// Command-line surface of the gateway binary

mod chat;
mod commands;

pub use chat::run_chat;
pub use commands::{run_call, run_models, run_report, run_servers, run_tools};

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "waypoint",
    version,
    about = "Local-first AI agent gateway: tool servers over JSON-RPC + local inference"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Interactive chat through the agent (default)
    Chat,
    /// List configured tool servers and their status
    Servers,
    /// List the aggregated tool catalog, optionally for one server
    Tools {
        /// Restrict the listing to this server
        server: Option<String>,
    },
    /// Call one tool directly with JSON arguments
    Call {
        server: String,
        tool: String,
        /// JSON object of arguments (defaults to {})
        args: Option<String>,
    },
    /// List models available from the inference service
    Models,
    /// Print the session activity report and endpoint metrics
    Report,
}
