//! Application configuration options

use std::time::Duration;

use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Storage layout paths
    pub layout: StorageLayout,

    /// Settings loaded from disk
    pub settings: Settings,

    /// Server configuration
    pub server: ServerOptions,

    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl AppOptions {
    /// Options for `settings`, with the stack directory taken from them
    pub fn from_settings(layout: StorageLayout, settings: Settings) -> Self {
        let layout = layout.with_stack_dir(settings.stack.project_dir.clone());
        let server = ServerOptions {
            host: settings.server.host.clone(),
            port: settings.server.port,
        };
        Self {
            layout,
            settings,
            server,
            max_shutdown_delay: Duration::from_secs(10),
        }
    }
}

impl Default for AppOptions {
    fn default() -> Self {
        Self::from_settings(StorageLayout::default(), Settings::default())
    }
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}
