// crates/waypoint-server/src/cli/commands.rs
// One-shot inspection and invocation commands

use anyhow::{Context, Result};
use waypoint::agent::Agent;
use waypoint::config::{ClientConfig, GatewayEnv};
use waypoint::gateway::Gateway;

fn build_gateway() -> Result<Gateway> {
    let env = GatewayEnv::from_env();
    let config = ClientConfig::load_default().context("loading client config")?;
    Ok(Gateway::new(env, config))
}

pub async fn run_servers() -> Result<()> {
    let gateway = build_gateway()?;
    gateway.start().await;

    let rows = gateway.registry.list_servers().await;
    if rows.is_empty() {
        println!("No tool servers configured.");
    }
    for row in rows {
        println!(
            "{:<20} {:<10} {:>3} tools  {}",
            row.name,
            if row.ready { "ready" } else { "not ready" },
            row.tool_count,
            row.description.unwrap_or_default()
        );
    }

    gateway.shutdown(None).await;
    Ok(())
}

pub async fn run_tools(server: Option<String>) -> Result<()> {
    let gateway = build_gateway()?;
    gateway.start().await;

    let tools = gateway.registry.list_tools(server.as_deref()).await;
    if tools.is_empty() {
        println!("No tools available.");
    }
    for tool in tools {
        println!(
            "{:<40} {}",
            format!("{}.{}", tool.server_name, tool.tool_name),
            tool.description
        );
    }

    gateway.shutdown(None).await;
    Ok(())
}

pub async fn run_call(server: String, tool: String, args: Option<String>) -> Result<()> {
    let parsed = match args {
        Some(raw) => serde_json::from_str(&raw).context("arguments must be a JSON object")?,
        None => serde_json::json!({}),
    };

    let gateway = build_gateway()?;
    gateway.start().await;

    let result = gateway
        .registry
        .call_tool(
            &gateway.middleware,
            &server,
            &tool,
            parsed,
            gateway.env.call_timeout,
        )
        .await;

    gateway.shutdown(None).await;

    if result.success {
        println!("{}", result.content);
        Ok(())
    } else {
        anyhow::bail!(
            "{}.{} failed: {}",
            server,
            tool,
            result.error.unwrap_or_else(|| "unknown".into())
        )
    }
}

pub async fn run_report() -> Result<()> {
    let gateway = build_gateway()?;
    let agent = Agent::new();

    println!("{}", agent.log().report_text());
    for stats in gateway.middleware.metrics.snapshot() {
        println!(
            "{:<36} calls={:<4} failed={:<4} cache_hits={:<4} p50={}ms p95={}ms p99={}ms",
            stats.endpoint,
            stats.calls,
            stats.failures,
            stats.cache_hits,
            stats.p50_ms,
            stats.p95_ms,
            stats.p99_ms
        );
    }

    gateway.shutdown(None).await;
    Ok(())
}

pub async fn run_models() -> Result<()> {
    let gateway = build_gateway()?;

    let models = gateway.llm.list_models(&gateway.middleware).await?;
    if models.is_empty() {
        println!("No models reported by the inference service.");
    }
    let current = gateway.llm.current_model();
    for model in models {
        let marker = if model.name == current { "*" } else { " " };
        println!("{marker} {}", model.name);
    }

    gateway.shutdown(None).await;
    Ok(())
}
