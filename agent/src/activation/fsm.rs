//! Finite state machine for one activation run

use serde::{Deserialize, Serialize};

/// Activation state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationState {
    /// No run started
    Idle,

    /// Clearing any previous network session
    LoggingOutStale,

    /// Joining the overlay network
    JoiningNetwork,

    /// Device config persisted
    ConfigWritten,

    /// Pulling stack images
    StackPulling,

    /// Starting stack containers
    StackStarting,

    /// Waiting for the stack to report healthy
    HealthPolling,

    /// Stack running with clean logs
    Ready,

    /// Stack running but reporting errors
    Degraded,

    /// Run stopped on a fatal error or timed out
    Failed,
}

impl ActivationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActivationState::Ready | ActivationState::Degraded | ActivationState::Failed
        )
    }
}

/// Activation step
#[derive(Debug, Clone)]
pub enum ActivationStep {
    /// Start the run
    Begin,

    /// Stale session cleared, or the attempt was skipped
    LoggedOut,

    /// Joined and config persisted
    ConfigPersisted,

    /// Image pull started
    Pull,

    /// Images pulled
    Pulled,

    /// Containers started
    Started,

    /// Container running with clean logs
    Healthy,

    /// Container running with an error marker in its logs
    Unhealthy,

    /// Container never reported running within the attempt bound
    TimedOut,

    /// Fatal error in the current stage
    Fail(String),
}

/// Activation FSM
#[derive(Debug, Clone)]
pub struct ActivationFsm {
    state: ActivationState,
    error: Option<String>,
}

impl ActivationFsm {
    /// Create a new FSM in idle state
    pub fn new() -> Self {
        Self {
            state: ActivationState::Idle,
            error: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> ActivationState {
        self.state
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Process a step and transition state
    pub fn process(&mut self, step: ActivationStep) -> Result<(), String> {
        use ActivationState as S;
        use ActivationStep as E;

        let new_state = match (&self.state, &step) {
            (S::Idle, E::Begin) => S::LoggingOutStale,
            (S::LoggingOutStale, E::LoggedOut) => S::JoiningNetwork,
            (S::JoiningNetwork, E::ConfigPersisted) => S::ConfigWritten,
            (S::ConfigWritten, E::Pull) => S::StackPulling,
            (S::StackPulling, E::Pulled) => S::StackStarting,
            (S::StackStarting, E::Started) => S::HealthPolling,
            (S::HealthPolling, E::Healthy) => S::Ready,
            (S::HealthPolling, E::Unhealthy) => S::Degraded,
            (S::HealthPolling, E::TimedOut) => {
                self.error = Some("stack did not report running in time".to_string());
                S::Failed
            }

            // Any active stage may fail
            (state, E::Fail(err)) if !state.is_terminal() && *state != S::Idle => {
                self.error = Some(err.clone());
                S::Failed
            }

            // Invalid transitions
            (state, step) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, step));
            }
        };

        self.state = new_state;
        Ok(())
    }
}

impl Default for ActivationFsm {
    fn default() -> Self {
        Self::new()
    }
}
