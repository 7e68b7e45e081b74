//! Docker Compose stack controller

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::AgentError;
use crate::process::{CapturedOutput, CommandSpec, ProcessRunner};
use crate::storage::settings::StackSettings;

/// Run state of the stack's main container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Absent,
    Starting,
    Running,
    Errored,
}

/// Point-in-time view of the stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackStatus {
    pub container_state: ContainerState,
    pub recent_log_tail_contains_error: bool,
}

impl StackStatus {
    pub fn absent() -> Self {
        Self {
            container_state: ContainerState::Absent,
            recent_log_tail_contains_error: false,
        }
    }

    /// Running with a clean log tail
    pub fn is_healthy(&self) -> bool {
        self.container_state == ContainerState::Running && !self.recent_log_tail_contains_error
    }
}

/// Pulls, starts, stops and inspects the compose stack
#[derive(Clone)]
pub struct StackController {
    runner: Arc<dyn ProcessRunner>,
    use_sudo: bool,
    project_dir: PathBuf,
    log_tail_lines: u32,
    error_markers: Vec<String>,
}

impl StackController {
    pub fn new(runner: Arc<dyn ProcessRunner>, use_sudo: bool, settings: &StackSettings) -> Self {
        Self {
            runner,
            use_sudo,
            project_dir: settings.project_dir.clone(),
            log_tail_lines: settings.log_tail_lines,
            error_markers: settings.error_markers.clone(),
        }
    }

    fn docker(&self) -> CommandSpec {
        CommandSpec::privileged(self.use_sudo, "docker")
    }

    fn compose(&self, args: &[&str]) -> CommandSpec {
        self.docker()
            .arg("compose")
            .args(args.iter().copied())
            .current_dir(&self.project_dir)
    }

    /// Pull the stack's images
    pub async fn pull(&self) -> Result<CapturedOutput, AgentError> {
        info!("Pulling stack images in {}", self.project_dir.display());
        self.runner.run_captured(&self.compose(&["pull"])).await
    }

    /// Create or recreate the stack's containers in the background
    pub async fn start(&self) -> Result<CapturedOutput, AgentError> {
        info!("Starting stack in {}", self.project_dir.display());
        self.runner.run_captured(&self.compose(&["up", "-d"])).await
    }

    /// Tear the stack down. Stopping a stack that is not running, or not
    /// installed at all, succeeds.
    pub async fn stop(&self) -> Result<CapturedOutput, AgentError> {
        if tokio::fs::metadata(&self.project_dir).await.is_err() {
            debug!("No stack at {}, nothing to stop", self.project_dir.display());
            return Ok(CapturedOutput::new(0, "stack not installed"));
        }

        info!("Stopping stack in {}", self.project_dir.display());
        let captured = self.runner.run_captured(&self.compose(&["down"])).await?;
        if !captured.success() && captured.output.contains("no configuration file provided") {
            return Ok(CapturedOutput::new(0, captured.output));
        }
        Ok(captured)
    }

    /// Run state of `container_name`, plus an error-marker scan of its log
    /// tail while it is running. A missing container reads as `Absent`.
    pub async fn inspect(&self, container_name: &str) -> StackStatus {
        let command = self
            .docker()
            .args(["inspect", "--format", "{{.State.Status}}", container_name]);

        let captured = match self.runner.run_captured(&command).await {
            Ok(captured) => captured,
            Err(e) => {
                warn!("docker inspect failed: {}", e);
                return StackStatus::absent();
            }
        };

        let container_state = if captured.success() {
            parse_container_state(captured.trimmed())
        } else if captured.output.contains("No such") {
            ContainerState::Absent
        } else {
            debug!("docker inspect exited with {}: {}", captured.exit_code, captured.trimmed());
            ContainerState::Errored
        };

        let recent_log_tail_contains_error = if container_state == ContainerState::Running {
            match self.recent_logs(container_name, self.log_tail_lines).await {
                Ok(logs) => contains_error_marker(&logs, &self.error_markers),
                Err(e) => {
                    warn!("Unable to read logs of {}: {}", container_name, e);
                    false
                }
            }
        } else {
            false
        };

        StackStatus {
            container_state,
            recent_log_tail_contains_error,
        }
    }

    /// Last `tail_lines` lines of the container's combined log output
    pub async fn recent_logs(
        &self,
        container_name: &str,
        tail_lines: u32,
    ) -> Result<String, AgentError> {
        let command = self.docker().args([
            "logs".to_string(),
            "--tail".to_string(),
            tail_lines.to_string(),
            container_name.to_string(),
        ]);
        let captured = self.runner.run_captured(&command).await?;
        if !captured.success() {
            return Err(AgentError::StackError(format!(
                "docker logs {} failed: {}",
                container_name,
                captured.trimmed()
            )));
        }
        Ok(captured.output)
    }
}

fn parse_container_state(status: &str) -> ContainerState {
    match status {
        "running" => ContainerState::Running,
        "created" | "restarting" => ContainerState::Starting,
        "removing" => ContainerState::Absent,
        _ => ContainerState::Errored,
    }
}

/// Whether any line of `logs` carries one of `markers`
pub fn contains_error_marker(logs: &str, markers: &[String]) -> bool {
    logs.lines()
        .any(|line| markers.iter().any(|marker| line.contains(marker.as_str())))
}
