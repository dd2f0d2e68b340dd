// crates/waypoint-server/src/main.rs
// Waypoint - local-first AI agent gateway

mod cli;

use anyhow::Result;
use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    waypoint::config::load_dotenv();

    let cli = Cli::parse();

    // stdout carries chat output; all logging goes to stderr.
    // WAYPOINT_LOG overrides the per-command default.
    let level = match std::env::var("WAYPOINT_LOG").ok().as_deref() {
        Some("off") => None,
        Some("error") => Some(Level::ERROR),
        Some("warn") => Some(Level::WARN),
        Some("info") => Some(Level::INFO),
        Some("debug") | Some("trace") => Some(Level::DEBUG),
        Some(other) => {
            eprintln!("[waypoint] Unknown WAYPOINT_LOG={other:?}, using warn");
            Some(Level::WARN)
        }
        None => Some(Level::WARN),
    };
    if let Some(level) = level {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }

    match cli.command {
        None | Some(Commands::Chat) => cli::run_chat().await?,
        Some(Commands::Servers) => cli::run_servers().await?,
        Some(Commands::Tools { server }) => cli::run_tools(server).await?,
        Some(Commands::Call { server, tool, args }) => cli::run_call(server, tool, args).await?,
        Some(Commands::Models) => cli::run_models().await?,
        Some(Commands::Report) => cli::run_report().await?,
    }

    Ok(())
}
