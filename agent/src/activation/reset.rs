//! Device reset

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::activation::fsm::ActivationFsm;
use crate::activation::orchestrator::Orchestrator;

/// Outcome of a reset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ResetOutcome {
    fn success() -> Self {
        Self {
            ok: true,
            error_message: None,
        }
    }

    fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error_message: Some(message.into()),
        }
    }
}

impl Orchestrator {
    /// Stop the stack, delete the device config and runtime data, and leave
    /// the overlay network.
    ///
    /// Rejected while an activation holds the device. Resetting an
    /// unconfigured device succeeds without doing anything harmful, so two
    /// resets in a row both report `ok`.
    pub async fn reset_device(&self) -> ResetOutcome {
        let Ok(resources) = self.resources.clone().try_lock_owned() else {
            return ResetOutcome::failure("An activation is in progress; try again when it finishes");
        };

        info!("Resetting device");
        let mut errors = Vec::new();

        match resources.stack.stop().await {
            Ok(captured) if captured.success() => debug!("Stack stopped"),
            Ok(captured) => errors.push(format!("Stopping the stack failed: {}", captured.trimmed())),
            Err(e) => errors.push(format!("Stopping the stack failed: {}", e)),
        }

        if let Err(e) = resources.config_store.delete().await {
            errors.push(e.to_string());
        }

        if let Err(e) = resources.data_dir.delete().await {
            errors.push(format!("Failed to delete runtime data: {}", e));
        }

        // Not being logged in is the goal, so a failing logout is fine
        match resources.network.logout().await {
            Ok(captured) if !captured.success() => {
                debug!("Logout exited with {}", captured.exit_code)
            }
            Ok(_) => debug!("Network identity cleared"),
            Err(e) => warn!("Logout failed: {}", e),
        }

        *self.fsm.write().await = ActivationFsm::new();

        if errors.is_empty() {
            info!("Device reset complete");
            ResetOutcome::success()
        } else {
            let message = errors.join("; ");
            warn!("Device reset incomplete: {}", message);
            ResetOutcome::failure(message)
        }
    }
}
