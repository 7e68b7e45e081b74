//! Application state

use std::sync::Arc;

use tracing::info;

use crate::activation::orchestrator::{DeviceResources, Orchestrator, OrchestratorSettings};
use crate::errors::AgentError;
use crate::network::overlay::OverlayNetwork;
use crate::process::ProcessRunner;
use crate::server::state::ServerState;
use crate::stack::controller::StackController;
use crate::status::reconciler::StatusReconciler;
use crate::storage::device_config::DeviceConfigStore;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;

/// Everything built from the layout and settings
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub reconciler: StatusReconciler,
    pub config_store: DeviceConfigStore,
    pub runner: Arc<dyn ProcessRunner>,
    pub settings: Settings,
}

impl AppState {
    /// Wire the components over `runner`
    pub fn init(
        layout: &StorageLayout,
        settings: &Settings,
        runner: Arc<dyn ProcessRunner>,
    ) -> Result<Self, AgentError> {
        info!("Initializing application state...");

        let network = OverlayNetwork::new(runner.clone(), settings.use_sudo);
        let stack = StackController::new(runner.clone(), settings.use_sudo, &settings.stack);
        let config_store = DeviceConfigStore::new(layout.device_config_file());

        let reconciler = StatusReconciler::new(
            network.clone(),
            stack.clone(),
            config_store.clone(),
            settings.stack.container_name.clone(),
            &settings.network.overlay_cidr,
        )?;

        let resources = DeviceResources {
            network,
            stack,
            config_store: config_store.clone(),
            data_dir: layout.data_dir(),
        };

        let orchestrator_settings = OrchestratorSettings {
            poll_interval: settings.health.poll_interval(),
            max_attempts: settings.health.max_attempts,
            join_timeout: settings.network.join_timeout(),
            test_mode_delays: settings.test_mode_delays(),
        };

        let orchestrator = Arc::new(Orchestrator::new(
            resources,
            runner.clone(),
            reconciler.clone(),
            orchestrator_settings,
        ));

        Ok(Self {
            orchestrator,
            reconciler,
            config_store,
            runner,
            settings: settings.clone(),
        })
    }

    /// Handler state for the HTTP server
    pub fn server_state(&self) -> ServerState {
        ServerState::new(
            self.orchestrator.clone(),
            self.reconciler.clone(),
            self.config_store.clone(),
            self.runner.clone(),
            self.settings.use_sudo,
            self.settings.network.default_device_name.clone(),
        )
    }
}
