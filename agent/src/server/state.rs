//! Server state

use std::sync::Arc;

use crate::activation::orchestrator::Orchestrator;
use crate::process::ProcessRunner;
use crate::status::reconciler::StatusReconciler;
use crate::storage::device_config::DeviceConfigStore;

/// Server state shared across handlers
pub struct ServerState {
    pub orchestrator: Arc<Orchestrator>,
    pub reconciler: StatusReconciler,
    pub config_store: DeviceConfigStore,
    pub runner: Arc<dyn ProcessRunner>,
    pub use_sudo: bool,
    pub default_device_name: String,
}

impl ServerState {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        reconciler: StatusReconciler,
        config_store: DeviceConfigStore,
        runner: Arc<dyn ProcessRunner>,
        use_sudo: bool,
        default_device_name: String,
    ) -> Self {
        Self {
            orchestrator,
            reconciler,
            config_store,
            runner,
            use_sudo,
            default_device_name,
        }
    }
}
