//! Overlay network client (`tailscale` CLI)

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::AgentError;
use crate::process::{CapturedOutput, CommandSpec, ProcessRunner, ProcessStream};

const OVERLAY_CLI: &str = "tailscale";

/// Point-in-time view of overlay membership
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStatus {
    pub joined: bool,
    pub overlay_address: Option<String>,
}

/// Joins, leaves and probes the overlay network
#[derive(Clone)]
pub struct OverlayNetwork {
    runner: Arc<dyn ProcessRunner>,
    use_sudo: bool,
}

impl OverlayNetwork {
    pub fn new(runner: Arc<dyn ProcessRunner>, use_sudo: bool) -> Self {
        Self { runner, use_sudo }
    }

    fn cli(&self) -> CommandSpec {
        CommandSpec::privileged(self.use_sudo, OVERLAY_CLI)
    }

    /// Drop the current network session, if any
    pub async fn logout(&self) -> Result<CapturedOutput, AgentError> {
        self.runner.run_captured(&self.cli().arg("logout")).await
    }

    /// Join the network, streaming the CLI's output as it is produced. The
    /// CLI gives up on its own after `timeout`.
    pub async fn join(
        &self,
        auth_token: &SecretString,
        device_name: &str,
        timeout: Duration,
    ) -> Result<ProcessStream, AgentError> {
        let command = self.cli().args([
            "up".to_string(),
            format!("--authkey={}", auth_token.expose_secret()),
            format!("--hostname={}", device_name),
            format!("--timeout={}s", timeout.as_secs().max(1)),
        ]);
        debug!("Joining overlay network as {}", device_name);
        self.runner.run_streaming(&command).await
    }

    /// Current overlay address. Never fails: an unreachable CLI reads as
    /// "not joined".
    pub async fn probe(&self) -> NetworkStatus {
        let command = self.cli().args(["ip", "-4"]);
        match self.runner.run_captured(&command).await {
            Ok(captured) if captured.success() => {
                let address = first_address(&captured.output);
                NetworkStatus {
                    joined: address.is_some(),
                    overlay_address: address,
                }
            }
            Ok(captured) => {
                debug!("Overlay probe exited with {}", captured.exit_code);
                NetworkStatus::default()
            }
            Err(e) => {
                warn!("Overlay probe failed: {}", e);
                NetworkStatus::default()
            }
        }
    }
}

/// First line of CLI output that parses as an IP address
fn first_address(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .find(|line| line.parse::<IpAddr>().is_ok())
        .map(str::to_string)
}
