//! Activation pipeline tests against a scripted runner

use std::time::{Duration, Instant};

use secrecy::ExposeSecret;
use tokio_test::assert_ok;

use molly_wizard::activation::event::{ActivationEvent, EventChannel};
use molly_wizard::activation::fsm::ActivationState;
use molly_wizard::activation::orchestrator::{
    MSG_CLEANING_UP, MSG_DEGRADED, MSG_PULLING, MSG_SLOW_START, MSG_STARTING, MSG_TEST_DONE,
};
use molly_wizard::activation::request::ActivationRequest;
use molly_wizard::errors::AgentError;

use crate::common::{collect, harness, harness_with, healthy_runner, wait_idle, ScriptedRunner};

fn request(token: &str, name: &str) -> ActivationRequest {
    ActivationRequest::new(token, name, false).unwrap()
}

fn lines(events: &[ActivationEvent]) -> Vec<(EventChannel, String)> {
    events.iter().map(|e| (e.channel, e.text.clone())).collect()
}

fn assert_single_terminal(events: &[ActivationEvent]) {
    let terminal = events.iter().filter(|e| e.channel.is_terminal()).count();
    assert_eq!(terminal, 1, "events: {:?}", events);
    assert!(events.last().unwrap().channel.is_terminal());

    let sequences: Vec<u64> = events.iter().map(|e| e.sequence).collect();
    let expected: Vec<u64> = (1..=events.len() as u64).collect();
    assert_eq!(sequences, expected);
}

#[tokio::test]
async fn test_successful_activation() {
    let h = harness(healthy_runner());
    let feed = assert_ok!(h.state.orchestrator.activate(request("tskey-abc", "molly-pi")).await);
    let events = collect(feed).await;

    assert_eq!(
        lines(&events),
        vec![
            (EventChannel::Info, MSG_CLEANING_UP.to_string()),
            (EventChannel::Info, "Success.".to_string()),
            (EventChannel::Info, MSG_PULLING.to_string()),
            (EventChannel::Info, MSG_STARTING.to_string()),
            (EventChannel::Done, "address=100.101.102.103".to_string()),
        ]
    );
    assert_single_terminal(&events);

    wait_idle(&h.state).await;
    assert_eq!(h.state.orchestrator.state().await, ActivationState::Ready);

    let config = h.state.config_store.load().await.unwrap().unwrap();
    assert_eq!(config.device_name, "molly-pi");
    assert_eq!(config.network_auth_token.expose_secret(), "tskey-abc");
    assert_eq!(config.overlay_ip, "100.101.102.103");
    assert_eq!(config.local_ip, "192.168.1.20");
    assert!(!config.secret.expose_secret().is_empty());

    let calls = h.runner.calls();
    let logout = calls.iter().position(|c| c == "tailscale logout").unwrap();
    let join = calls.iter().position(|c| c.starts_with("tailscale up")).unwrap();
    let pull = calls.iter().position(|c| c == "docker compose pull").unwrap();
    let start = calls.iter().position(|c| c == "docker compose up -d").unwrap();
    assert!(logout < join && join < pull && pull < start);
    assert!(calls.contains(
        &"tailscale up --authkey=tskey-abc --hostname=molly-pi --timeout=120s".to_string()
    ));
}

#[tokio::test]
async fn test_join_failure_stops_pipeline() {
    let runner = ScriptedRunner::new()
        .on("tailscale logout", 1, "not logged in")
        .on_stream("tailscale up", &["backend error: invalid key"], 1);
    let h = harness(runner);

    let feed = h.state.orchestrator.activate(request("bad", "molly-pi")).await.unwrap();
    let events = collect(feed).await;

    assert_single_terminal(&events);
    // Join output is forwarded live, then repeated as the failure reason
    assert_eq!(
        lines(&events),
        vec![
            (EventChannel::Info, MSG_CLEANING_UP.to_string()),
            (EventChannel::Info, "No previous session cleared (not logged in)".to_string()),
            (EventChannel::Info, "backend error: invalid key".to_string()),
            (EventChannel::Error, "backend error: invalid key".to_string()),
        ]
    );

    assert!(!h.runner.called("docker"));
    assert!(!h.state.config_store.exists().await);

    wait_idle(&h.state).await;
    assert_eq!(h.state.orchestrator.state().await, ActivationState::Failed);
}

#[tokio::test]
async fn test_stalled_join_times_out() {
    let runner = healthy_runner().on_stream_stalled("tailscale up", &["Waiting for control plane..."]);
    let h = harness_with(runner, |settings| {
        settings.network.join_timeout_secs = 1;
    });

    let events = collect(h.state.orchestrator.activate(request("k", "")).await.unwrap()).await;

    assert_eq!(
        lines(&events),
        vec![
            (EventChannel::Info, MSG_CLEANING_UP.to_string()),
            (EventChannel::Info, "Waiting for control plane...".to_string()),
            (EventChannel::Error, "Network join timed out after 1s".to_string()),
        ]
    );
    assert!(h.runner.called("tailscale up --authkey=k --hostname=molly-pi --timeout=1s"));
    assert!(!h.runner.called("docker"));
    assert!(!h.state.config_store.exists().await);

    // The device is released for a retry or a reset
    wait_idle(&h.state).await;
    assert_eq!(h.state.orchestrator.state().await, ActivationState::Failed);
    assert!(h.state.orchestrator.reset_device().await.ok);
}

#[tokio::test]
async fn test_join_failure_without_output() {
    let runner = ScriptedRunner::new().on_stream("tailscale up", &[], 2);
    let h = harness(runner);

    let events = collect(h.state.orchestrator.activate(request("k", "")).await.unwrap()).await;
    let last = events.last().unwrap();
    assert_eq!(last.channel, EventChannel::Error);
    assert_eq!(last.text, "Network join failed with exit code 2");
}

#[tokio::test]
async fn test_missing_network_tool_is_fatal() {
    let runner = ScriptedRunner::new()
        .on_spawn_error("tailscale logout")
        .on_spawn_error("tailscale up");
    let h = harness(runner);

    let events = collect(h.state.orchestrator.activate(request("k", "")).await.unwrap()).await;

    // Cleanup is skipped with a notice, the join itself fails the run
    assert!(events[1].text.starts_with("Skipping session cleanup"));
    assert_eq!(events.last().unwrap().channel, EventChannel::Error);
    assert!(!h.runner.called("docker"));
}

#[tokio::test]
async fn test_config_write_failure_is_fatal() {
    let h = harness_with(healthy_runner(), |settings| {
        let blocker = settings.stack.project_dir.with_file_name("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();
        settings.stack.project_dir = blocker.join("stack");
    });

    let events = collect(h.state.orchestrator.activate(request("k", "")).await.unwrap()).await;

    assert_eq!(events.last().unwrap().channel, EventChannel::Error);
    assert!(!h.runner.called("docker compose pull"));
}

#[tokio::test]
async fn test_pull_failure() {
    let runner = healthy_runner().on("docker compose pull", 1, "pull access denied for molly/app");
    let h = harness(runner);

    let events = collect(h.state.orchestrator.activate(request("k", "")).await.unwrap()).await;
    let last = events.last().unwrap();

    assert_eq!(last.channel, EventChannel::Error);
    assert!(last.text.contains("pull access denied"));
    assert!(!h.runner.called("docker compose up"));
    // The join succeeded, so the config stays for a later retry
    assert!(h.state.config_store.exists().await);
}

#[tokio::test]
async fn test_start_failure_without_output() {
    let runner = healthy_runner().on("docker compose up -d", 17, "");
    let h = harness(runner);

    let events = collect(h.state.orchestrator.activate(request("k", "")).await.unwrap()).await;
    let last = events.last().unwrap();

    assert_eq!(last.channel, EventChannel::Error);
    assert_eq!(last.text, "Stack start failed with exit code 17");
    assert!(!h.runner.called("docker inspect"));
}

#[tokio::test]
async fn test_error_marker_degrades() {
    let runner = healthy_runner().on("docker logs", 0, "boot ok\nERROR: database unreachable\n");
    let h = harness(runner);

    let events = collect(h.state.orchestrator.activate(request("k", "")).await.unwrap()).await;
    let last = events.last().unwrap();

    assert_single_terminal(&events);
    assert_eq!(last.channel, EventChannel::Warning);
    assert_eq!(last.text, MSG_DEGRADED);

    wait_idle(&h.state).await;
    assert_eq!(h.state.orchestrator.state().await, ActivationState::Degraded);
}

#[tokio::test]
async fn test_container_comes_up_on_later_attempt() {
    let runner = healthy_runner()
        .on("docker inspect", 0, "created\n")
        .then("docker inspect", 0, "created\n")
        .then("docker inspect", 0, "running\n");
    let h = harness(runner);

    let events = collect(h.state.orchestrator.activate(request("k", "")).await.unwrap()).await;

    assert_eq!(events.last().unwrap().channel, EventChannel::Done);
    assert_eq!(h.runner.count("docker inspect"), 3);
}

#[tokio::test]
async fn test_health_poll_is_bounded() {
    let runner = healthy_runner().on("docker inspect", 1, "Error: No such object: molly");
    let h = harness_with(runner, |settings| {
        settings.health.max_attempts = 4;
        settings.health.poll_interval_ms = 20;
    });

    let started = Instant::now();
    let events = collect(h.state.orchestrator.activate(request("k", "")).await.unwrap()).await;
    let elapsed = started.elapsed();

    let last = events.last().unwrap();
    assert_eq!(last.channel, EventChannel::Warning);
    assert_eq!(last.text, MSG_SLOW_START);
    assert_eq!(h.runner.count("docker inspect"), 4);
    // Three pauses between four attempts
    assert!(elapsed >= Duration::from_millis(60));
    assert!(elapsed < Duration::from_secs(3));

    wait_idle(&h.state).await;
    assert_eq!(h.state.orchestrator.state().await, ActivationState::Failed);
}

#[tokio::test]
async fn test_done_falls_back_to_recorded_address() {
    let runner = healthy_runner()
        .on("tailscale ip -4", 0, "100.64.1.2\n")
        .then("tailscale ip -4", 1, "");
    let h = harness(runner);

    let events = collect(h.state.orchestrator.activate(request("k", "")).await.unwrap()).await;
    assert_eq!(events.last().unwrap().text, "address=100.64.1.2");
}

#[tokio::test]
async fn test_test_mode_is_deterministic() {
    let h = harness(ScriptedRunner::new());

    let mut runs = Vec::new();
    for _ in 0..2 {
        let feed = h.state.orchestrator.activate(ActivationRequest::test_run(None)).await.unwrap();
        runs.push(lines(&collect(feed).await));
        wait_idle(&h.state).await;
    }

    assert_eq!(runs[0], runs[1]);
    let events = &runs[0];
    assert_eq!(events.len(), 6);
    assert!(events[..5].iter().all(|(channel, _)| *channel == EventChannel::Info));
    assert_eq!(events[2].1, "[TEST] Success! Authenticated as test-gateway");
    assert_eq!(events[5], (EventChannel::Done, MSG_TEST_DONE.to_string()));

    assert!(h.runner.calls().is_empty());
    assert!(!h.state.config_store.exists().await);
    assert_eq!(h.state.orchestrator.state().await, ActivationState::Idle);
}

#[tokio::test]
async fn test_second_activation_is_rejected() {
    let h = harness_with(ScriptedRunner::new(), |settings| {
        settings.test_mode_step_delays_ms = vec![50, 50, 50, 50];
    });

    let feed = h.state.orchestrator.activate(ActivationRequest::test_run(None)).await.unwrap();
    assert!(h.state.orchestrator.is_busy());

    let second = h.state.orchestrator.activate(request("k", "")).await;
    assert!(matches!(second, Err(AgentError::Busy(_))));

    let reset = h.state.orchestrator.reset_device().await;
    assert!(!reset.ok);

    let events = collect(feed).await;
    assert_eq!(events.last().unwrap().channel, EventChannel::Done);
    assert!(!h.runner.called("tailscale"));

    wait_idle(&h.state).await;
    assert_ok!(h.state.orchestrator.activate(ActivationRequest::test_run(None)).await);
}

#[tokio::test]
async fn test_consumer_disconnect_abandons_health_poll() {
    let h = harness(healthy_runner());

    let feed = h.state.orchestrator.activate(request("k", "")).await.unwrap();
    drop(feed);

    wait_idle(&h.state).await;
    // Commands already underway finish, polling does not start
    assert!(h.runner.called("docker compose up -d"));
    assert!(!h.runner.called("docker inspect"));
    assert_eq!(h.state.orchestrator.state().await, ActivationState::Failed);
}

#[tokio::test]
async fn test_secret_survives_reactivation() {
    let h = harness(healthy_runner());

    collect(h.state.orchestrator.activate(request("k1", "")).await.unwrap()).await;
    wait_idle(&h.state).await;
    let first = h.state.config_store.load().await.unwrap().unwrap();

    collect(h.state.orchestrator.activate(request("k2", "gateway-2")).await.unwrap()).await;
    wait_idle(&h.state).await;
    let second = h.state.config_store.load().await.unwrap().unwrap();

    assert_eq!(first.secret.expose_secret(), second.secret.expose_secret());
    assert_eq!(second.network_auth_token.expose_secret(), "k2");
    assert_eq!(second.device_name, "gateway-2");
}

#[test]
fn test_invalid_requests_are_rejected() {
    assert!(matches!(
        ActivationRequest::new("", "molly-pi", false),
        Err(AgentError::InvalidInput(_))
    ));
    assert!(matches!(
        ActivationRequest::new("   ", "molly-pi", false),
        Err(AgentError::InvalidInput(_))
    ));
    assert!(ActivationRequest::new("k", "bad name!", false).is_err());
    assert_eq!(
        ActivationRequest::new("k", "  ", false).unwrap().device_name(),
        "molly-pi"
    );
}
