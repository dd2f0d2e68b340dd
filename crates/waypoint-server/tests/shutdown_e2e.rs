// crates/waypoint-server/tests/shutdown_e2e.rs
// Graceful shutdown with work in flight

mod common;

use common::{ScriptedLlm, echo_script, silent_script, stub_spec};
use std::sync::Arc;
use std::time::{Duration, Instant};
use waypoint::agent::Agent;
use waypoint::config::{ClientConfig, GatewayEnv};
use waypoint::gateway::Gateway;

/// A shutdown requested while a slow tool call is in flight: the call gets a
/// bounded grace, the child is then signalled and killed, reports are
/// flushed, and the whole teardown stays inside the 30 s hard cap.
#[tokio::test]
async fn shutdown_with_in_flight_call_stays_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let mut env = GatewayEnv::from_env();
    env.handshake_timeout = Duration::from_secs(5);
    env.log_dir = dir.path().to_path_buf();

    let gateway = Gateway::with_backend(
        env,
        ClientConfig {
            servers: vec![stub_spec("slow_tool", &silent_script())],
            disabled: vec![],
        },
        ScriptedLlm::new(vec![]),
    );
    assert_eq!(gateway.start().await, 1);

    // Kick off a call the server will never answer
    let session = gateway.registry.session("slow_tool").await.unwrap();
    let in_flight = {
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            session
                .call_tool("echo", serde_json::json!({"text": "x"}), Duration::from_secs(30))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(session.pending_len(), 1);

    // Shutdown arrives with the call still pending
    let agent = Agent::new();
    agent.log().record_analysis("in-flight shutdown drill", true, 1);

    let started = Instant::now();
    gateway.shutdown(Some(&agent)).await;
    let elapsed = started.elapsed();

    // Drain grace + forced-exit window + bookkeeping, well under the cap
    assert!(elapsed < Duration::from_secs(20), "took {elapsed:?}");
    assert!(elapsed >= Duration::from_secs(4), "drain grace was skipped: {elapsed:?}");

    // The in-flight call resolved with a failure instead of hanging
    let result = in_flight.await.unwrap();
    assert!(result.is_err());
    assert_eq!(session.pending_len(), 0);

    // Logs and reports reached disk
    let names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    assert!(names.iter().any(|n| n.starts_with("session_") && n.ends_with(".json")));
    assert!(names.iter().any(|n| n.starts_with("report_session_") && n.ends_with(".txt")));
}

/// Idle shutdown is quick and leaves every session closed.
#[tokio::test]
async fn idle_shutdown_is_fast() {
    let mut env = GatewayEnv::from_env();
    env.handshake_timeout = Duration::from_secs(5);
    let gateway = Gateway::with_backend(
        env,
        ClientConfig {
            servers: vec![
                stub_spec("alpha", &echo_script("a")),
                stub_spec("beta", &echo_script("b")),
            ],
            disabled: vec![],
        },
        ScriptedLlm::new(vec![]),
    );
    assert_eq!(gateway.start().await, 2);
    let alpha = gateway.registry.session("alpha").await.unwrap();
    let beta = gateway.registry.session("beta").await.unwrap();

    let started = Instant::now();
    gateway.shutdown(None).await;
    assert!(started.elapsed() < Duration::from_secs(10));

    assert_eq!(alpha.state(), waypoint::transport::SessionState::Closed);
    assert_eq!(beta.state(), waypoint::transport::SessionState::Closed);
}
