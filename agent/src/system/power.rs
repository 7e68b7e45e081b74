//! Reboot and shutdown requests

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::AgentError;
use crate::process::{CommandSpec, ProcessRunner};

/// Host power action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerAction {
    Reboot,
    Shutdown,
}

impl PowerAction {
    fn program(&self) -> &'static str {
        match self {
            PowerAction::Reboot => "reboot",
            PowerAction::Shutdown => "poweroff",
        }
    }
}

impl FromStr for PowerAction {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reboot" => Ok(PowerAction::Reboot),
            "shutdown" | "poweroff" => Ok(PowerAction::Shutdown),
            other => Err(AgentError::NotFound(format!("Unknown power action: {}", other))),
        }
    }
}

impl fmt::Display for PowerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerAction::Reboot => write!(f, "reboot"),
            PowerAction::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Ask the host to reboot or power off. Returns once the command is
/// dispatched; there is no completion feedback.
pub fn request_power_action(
    runner: &dyn ProcessRunner,
    use_sudo: bool,
    action: PowerAction,
) -> Result<(), AgentError> {
    info!("Power action requested: {}", action);
    runner.spawn_detached(&CommandSpec::privileged(use_sudo, action.program()))
}
