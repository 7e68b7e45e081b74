//! Settings file management

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;

/// Wizard settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log records
    #[serde(default)]
    pub log_json: bool,

    /// Also write a rolling log file under the logs directory
    #[serde(default)]
    pub log_to_file: bool,

    /// Local HTTP server configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Container stack configuration
    #[serde(default)]
    pub stack: StackSettings,

    /// Health polling after the stack starts
    #[serde(default)]
    pub health: HealthSettings,

    /// Overlay network configuration
    #[serde(default)]
    pub network: NetworkSettings,

    /// Prefix privileged commands with `sudo`
    #[serde(default = "default_true")]
    pub use_sudo: bool,

    /// Pauses between the canned test-mode lines, in milliseconds
    #[serde(default = "default_test_mode_delays")]
    pub test_mode_step_delays_ms: Vec<u64>,
}

fn default_true() -> bool {
    true
}

fn default_test_mode_delays() -> Vec<u64> {
    vec![1000, 1000, 1000, 2000]
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_to_file: false,
            server: ServerSettings::default(),
            stack: StackSettings::default(),
            health: HealthSettings::default(),
            network: NetworkSettings::default(),
            use_sudo: true,
            test_mode_step_delays_ms: default_test_mode_delays(),
        }
    }
}

impl Settings {
    /// Test-mode pacing as durations
    pub fn test_mode_delays(&self) -> Vec<Duration> {
        self.test_mode_step_delays_ms
            .iter()
            .map(|ms| Duration::from_millis(*ms))
            .collect()
    }
}

/// Local HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_server_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    5000
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

/// Container stack settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackSettings {
    /// Compose project directory; the device config is written here
    #[serde(default = "default_project_dir")]
    pub project_dir: PathBuf,

    /// Container whose run state and logs decide stack health
    #[serde(default = "default_container_name")]
    pub container_name: String,

    /// How many trailing log lines to scan for error markers
    #[serde(default = "default_log_tail_lines")]
    pub log_tail_lines: u32,

    /// Substrings that mark a running container as unhealthy
    #[serde(default = "default_error_markers")]
    pub error_markers: Vec<String>,
}

fn default_project_dir() -> PathBuf {
    PathBuf::from("/opt/molly")
}

fn default_container_name() -> String {
    "molly".to_string()
}

fn default_log_tail_lines() -> u32 {
    20
}

fn default_error_markers() -> Vec<String> {
    vec![
        "ERROR".to_string(),
        "FATAL".to_string(),
        "panic:".to_string(),
        "Traceback".to_string(),
    ]
}

impl Default for StackSettings {
    fn default() -> Self {
        Self {
            project_dir: default_project_dir(),
            container_name: default_container_name(),
            log_tail_lines: default_log_tail_lines(),
            error_markers: default_error_markers(),
        }
    }
}

/// Health poll settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSettings {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_attempts() -> u32 {
    15
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl HealthSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Overlay network settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// Address range the overlay hands out; an address outside it is not "online"
    #[serde(default = "default_overlay_cidr")]
    pub overlay_cidr: String,

    /// Device name used when the operator leaves the field blank
    #[serde(default = "default_device_name")]
    pub default_device_name: String,

    /// Upper bound for the join, passed on to the overlay CLI
    #[serde(default = "default_join_timeout_secs")]
    pub join_timeout_secs: u64,
}

fn default_overlay_cidr() -> String {
    "100.64.0.0/10".to_string()
}

fn default_device_name() -> String {
    "molly-pi".to_string()
}

fn default_join_timeout_secs() -> u64 {
    120
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            overlay_cidr: default_overlay_cidr(),
            default_device_name: default_device_name(),
            join_timeout_secs: default_join_timeout_secs(),
        }
    }
}

impl NetworkSettings {
    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_secs.max(1))
    }
}
