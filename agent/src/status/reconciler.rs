//! Status reconciler
//!
//! Combines the overlay probe with the stack's run state. Every query is a
//! fresh read of the external subsystems; nothing here mutates state, so it
//! is safe to call while an activation is running.

use std::net::IpAddr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::errors::AgentError;
use crate::network::overlay::{NetworkStatus, OverlayNetwork};
use crate::stack::controller::{StackController, StackStatus};
use crate::storage::device_config::DeviceConfigStore;

/// Full point-in-time snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub network: NetworkStatus,
    pub stack: StackStatus,

    /// Joined with an address inside the overlay range
    pub online: bool,

    /// A device config exists on disk
    pub configured: bool,
}

/// Reduced status for the dashboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub online: bool,
    pub address: String,
}

#[derive(Clone)]
pub struct StatusReconciler {
    network: OverlayNetwork,
    stack: StackController,
    config_store: DeviceConfigStore,
    container_name: String,
    overlay_range: IpNet,
}

impl StatusReconciler {
    pub fn new(
        network: OverlayNetwork,
        stack: StackController,
        config_store: DeviceConfigStore,
        container_name: impl Into<String>,
        overlay_cidr: &str,
    ) -> Result<Self, AgentError> {
        let overlay_range: IpNet = overlay_cidr.parse().map_err(|e| {
            AgentError::ConfigError(format!("Invalid overlay CIDR {}: {}", overlay_cidr, e))
        })?;
        Ok(Self {
            network,
            stack,
            config_store,
            container_name: container_name.into(),
            overlay_range,
        })
    }

    /// Probe network and stack concurrently
    pub async fn query(&self) -> StatusSnapshot {
        let (network, stack, configured) = tokio::join!(
            self.network.probe(),
            self.stack.inspect(&self.container_name),
            self.config_store.exists(),
        );
        let online = self.is_online(&network);
        StatusSnapshot {
            network,
            stack,
            online,
            configured,
        }
    }

    /// Online flag and overlay address only
    pub async fn get_status(&self) -> DeviceStatus {
        let network = self.network.probe().await;
        DeviceStatus {
            online: self.is_online(&network),
            address: network.overlay_address.unwrap_or_default(),
        }
    }

    /// Stack view used by the activation health poll
    pub async fn stack_status(&self) -> StackStatus {
        self.stack.inspect(&self.container_name).await
    }

    pub fn is_online(&self, network: &NetworkStatus) -> bool {
        network.joined
            && network
                .overlay_address
                .as_deref()
                .is_some_and(|address| self.in_overlay_range(address))
    }

    pub fn in_overlay_range(&self, address: &str) -> bool {
        address
            .parse::<IpAddr>()
            .map(|ip| self.overlay_range.contains(&ip))
            .unwrap_or(false)
    }
}
