//! Device reset tests

use crate::common::{collect, harness, healthy_runner, wait_idle, ScriptedRunner};

use molly_wizard::activation::fsm::ActivationState;
use molly_wizard::activation::request::ActivationRequest;

#[tokio::test]
async fn test_reset_after_activation() {
    let h = harness(healthy_runner());
    let request = ActivationRequest::new("tskey-abc", "molly-pi", false).unwrap();
    collect(h.state.orchestrator.activate(request).await.unwrap()).await;
    wait_idle(&h.state).await;

    let data_dir = h.layout.data_dir();
    tokio::fs::create_dir_all(data_dir.path().join("db")).await.unwrap();
    assert!(h.state.config_store.exists().await);

    let outcome = h.state.orchestrator.reset_device().await;

    assert!(outcome.ok, "{:?}", outcome);
    assert!(outcome.error_message.is_none());
    assert!(!h.state.config_store.exists().await);
    assert!(!data_dir.exists().await);
    assert!(h.runner.called("docker compose down"));
    assert_eq!(h.runner.count("tailscale logout"), 2);
    assert_eq!(h.state.orchestrator.state().await, ActivationState::Idle);
}

#[tokio::test]
async fn test_reset_is_idempotent() {
    let runner = ScriptedRunner::new()
        .on("docker compose down", 1, "no configuration file provided: not found")
        .on("tailscale logout", 1, "not logged in");
    let h = harness(runner);

    let first = h.state.orchestrator.reset_device().await;
    let second = h.state.orchestrator.reset_device().await;

    assert!(first.ok, "{:?}", first);
    assert!(second.ok, "{:?}", second);
    assert!(!h.state.config_store.exists().await);
}

#[tokio::test]
async fn test_reset_reports_stack_failure() {
    let runner = ScriptedRunner::new().on("docker compose down", 1, "Cannot connect to the Docker daemon");
    let h = harness(runner);

    let outcome = h.state.orchestrator.reset_device().await;

    assert!(!outcome.ok);
    let message = outcome.error_message.unwrap();
    assert!(message.contains("Cannot connect to the Docker daemon"));
    // Later steps still run
    assert!(h.runner.called("tailscale logout"));
}

#[tokio::test]
async fn test_reset_without_stack_dir() {
    let h = harness(ScriptedRunner::new());
    std::fs::remove_dir_all(h.tmp.path().join("stack")).unwrap();

    let outcome = h.state.orchestrator.reset_device().await;

    assert!(outcome.ok);
    assert!(!h.runner.called("docker"));
}
