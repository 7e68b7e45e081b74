//! Local host facts recorded in the device config

use std::net::IpAddr;

use tracing::warn;

use crate::process::{CommandSpec, ProcessRunner};

/// Placeholder recorded when the local address cannot be determined
pub const UNKNOWN_ADDRESS: &str = "0.0.0.0";

/// Host name of this machine
pub fn hostname() -> String {
    sysinfo::System::host_name().unwrap_or_else(|| "unknown".to_string())
}

/// First non-loopback address reported by `hostname -I`
pub async fn local_ip(runner: &dyn ProcessRunner) -> String {
    let command = CommandSpec::new("hostname").arg("-I");
    match runner.run_captured(&command).await {
        Ok(captured) if captured.success() => {
            first_routable(&captured.output).unwrap_or_else(|| UNKNOWN_ADDRESS.to_string())
        }
        Ok(captured) => {
            warn!("hostname -I exited with {}", captured.exit_code);
            UNKNOWN_ADDRESS.to_string()
        }
        Err(e) => {
            warn!("Unable to resolve local address: {}", e);
            UNKNOWN_ADDRESS.to_string()
        }
    }
}

fn first_routable(output: &str) -> Option<String> {
    output
        .split_whitespace()
        .filter_map(|token| token.parse::<IpAddr>().ok())
        .find(|ip| ip.is_ipv4() && !ip.is_loopback())
        .map(|ip| ip.to_string())
}
