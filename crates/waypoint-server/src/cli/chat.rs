// crates/waypoint-server/src/cli/chat.rs
// Interactive chat loop: user turns through the agent, slash commands for
// gateway introspection, graceful shutdown on EOF or signal

use anyhow::{Context, Result};
use std::io::Write;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;
use waypoint::agent::{Agent, AgentDeps};
use waypoint::config::{ClientConfig, GatewayEnv};
use waypoint::gateway::{Gateway, wait_for_shutdown_signal};

/// The process must be gone this long after a shutdown request, regardless
/// of cleanup progress.
const SHUTDOWN_HARD_CAP: Duration = Duration::from_secs(30);

pub async fn run_chat() -> Result<()> {
    let env = GatewayEnv::from_env();
    let config = ClientConfig::load_default().context("loading client config")?;
    let gateway = Gateway::new(env, config);
    let connected = gateway.start().await;
    let agent = Agent::new();

    println!(
        "waypoint · session {} · {} tool server(s) ready · model {}",
        agent.log().session_id(),
        connected,
        gateway.llm.current_model()
    );
    println!(
        "Commands: /mcp-servers /mcp-tools [server] /mcp-call <server> <tool> <json> \
         /reconnect <server> /models /model <name> /report /save-report /quit"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = wait_for_shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        prompt();
        tokio::select! {
            _ = &mut shutdown => {
                println!();
                break;
            }
            line = lines.next_line() => {
                match line? {
                    None => break, // stdin EOF
                    Some(text) => {
                        let text = text.trim();
                        if text.is_empty() {
                            continue;
                        }
                        if text == "/quit" || text == "/exit" {
                            break;
                        }
                        if let Some(command) = text.strip_prefix('/') {
                            handle_command(&gateway, &agent, command).await;
                        } else {
                            let out = run_turn(&gateway, &agent, text).await;
                            println!("{out}");
                        }
                    }
                }
            }
        }
    }

    // Bounded teardown; exceeded cleanup is abandoned, not waited out
    if tokio::time::timeout(SHUTDOWN_HARD_CAP, gateway.shutdown(Some(&agent)))
        .await
        .is_err()
    {
        warn!("Shutdown hard cap reached, exiting with cleanup incomplete");
    }
    Ok(())
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

async fn run_turn(gateway: &Gateway, agent: &Agent, text: &str) -> String {
    let deps = AgentDeps {
        registry: &gateway.registry,
        middleware: &gateway.middleware,
        llm: &gateway.llm,
        call_timeout: gateway.env.call_timeout,
    };
    // Retrieved context comes from the external retrieval collaborator;
    // the bare CLI runs without one.
    agent.turn(&deps, text, None).await.response
}

async fn handle_command(gateway: &Gateway, agent: &Agent, command: &str) {
    let mut parts = command.split_whitespace();
    match parts.next().unwrap_or_default() {
        "mcp-servers" => {
            for row in gateway.registry.list_servers().await {
                println!(
                    "{:<20} {:<10} {:>3} tools  {}",
                    row.name,
                    if row.ready { "ready" } else { "not ready" },
                    row.tool_count,
                    row.description.unwrap_or_default()
                );
            }
        }
        "mcp-tools" => {
            let server = parts.next();
            for tool in gateway.registry.list_tools(server).await {
                println!(
                    "{:<40} {}",
                    format!("{}.{}", tool.server_name, tool.tool_name),
                    tool.description
                );
            }
        }
        "mcp-call" => {
            let (Some(server), Some(tool)) = (parts.next(), parts.next()) else {
                println!("usage: /mcp-call <server> <tool> <json-args>");
                return;
            };
            let rest: String = parts.collect::<Vec<_>>().join(" ");
            let args = if rest.is_empty() {
                Ok(serde_json::json!({}))
            } else {
                serde_json::from_str(&rest)
            };
            let args = match args {
                Ok(v) => v,
                Err(e) => {
                    println!("arguments are not valid JSON: {e}");
                    return;
                }
            };
            let result = gateway
                .registry
                .call_tool(&gateway.middleware, server, tool, args, gateway.env.call_timeout)
                .await;
            if result.success {
                println!("{}", result.content);
            } else {
                println!(
                    "{}.{} failed: {}",
                    server,
                    tool,
                    result.error.unwrap_or_else(|| "unknown".into())
                );
            }
        }
        "reconnect" => match parts.next() {
            Some(server) => match gateway.registry.reconnect(server).await {
                Ok(()) => println!("{server} reconnected"),
                Err(e) => println!("{}", e.to_user_string()),
            },
            None => println!("usage: /reconnect <server>"),
        },
        "models" => match gateway.llm.list_models(&gateway.middleware).await {
            Ok(models) => {
                let current = gateway.llm.current_model();
                for model in models {
                    let marker = if model.name == current { "*" } else { " " };
                    println!("{marker} {}", model.name);
                }
            }
            Err(e) => println!("cannot list models: {}", e.to_user_string()),
        },
        "model" => match parts.next() {
            Some(name) => match gateway.llm.switch_model(&gateway.middleware, name).await {
                Ok(()) => println!("default model is now {name}"),
                Err(e) => println!("{}", e.to_user_string()),
            },
            None => println!("current model: {}", gateway.llm.current_model()),
        },
        "report" => {
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
        }
        "save-report" => match agent.log().save(&gateway.env.log_dir) {
            Ok((json_path, report_path)) => {
                println!("saved {}", json_path.display());
                println!("saved {}", report_path.display());
            }
            Err(e) => println!("cannot save report: {}", e.to_user_string()),
        },
        other => println!("unknown command '/{other}'"),
    }
}
