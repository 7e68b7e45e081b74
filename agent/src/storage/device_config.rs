//! Device config document
//!
//! A flat `KEY=VALUE` file written once the device has joined the overlay
//! network. The container stack reads the same file, and its presence is what
//! marks the device as configured.

use std::collections::BTreeMap;

use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};

use crate::errors::AgentError;
use crate::filesys::file::File;

const KEY_AUTH_TOKEN: &str = "TS_AUTHKEY";
const KEY_DEVICE_NAME: &str = "DEVICE_NAME";
const KEY_SECRET: &str = "VAPID_SECRET";
const KEY_OVERLAY_IP: &str = "TS_IP";
const KEY_LOCAL_IP: &str = "LOCAL_IP";
const KEY_HOSTNAME: &str = "HOST_NAME";
const KEY_CONFIGURED_AT: &str = "CONFIGURED_AT";

/// Generated configuration of an activated device
#[derive(Debug)]
pub struct DeviceConfig {
    /// Auth token used to join the overlay network
    pub network_auth_token: SecretString,

    /// Name the device registered under
    pub device_name: String,

    /// Opaque secret generated for the stack
    pub secret: SecretString,

    /// Address on the overlay network
    pub overlay_ip: String,

    /// Address on the local network
    pub local_ip: String,

    /// Host name of the device
    pub hostname: String,

    /// Unix time the document was written
    pub configured_at: u64,
}

impl DeviceConfig {
    /// Render as `KEY=VALUE` lines
    pub fn to_env_string(&self) -> String {
        let entries = [
            (KEY_AUTH_TOKEN, self.network_auth_token.expose_secret()),
            (KEY_DEVICE_NAME, self.device_name.as_str()),
            (KEY_SECRET, self.secret.expose_secret()),
            (KEY_OVERLAY_IP, self.overlay_ip.as_str()),
            (KEY_LOCAL_IP, self.local_ip.as_str()),
            (KEY_HOSTNAME, self.hostname.as_str()),
        ];

        let mut out = String::new();
        for (key, value) in entries {
            out.push_str(key);
            out.push('=');
            out.push_str(&single_line(value));
            out.push('\n');
        }
        out.push_str(&format!("{}={}\n", KEY_CONFIGURED_AT, self.configured_at));
        out
    }

    /// Parse `KEY=VALUE` lines. Blank lines and `#` comments are skipped and
    /// surrounding quotes are removed from values.
    pub fn from_env_str(contents: &str) -> Result<Self, AgentError> {
        let mut values = BTreeMap::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(AgentError::PersistenceError(format!(
                    "Malformed device config line: {}",
                    line
                )));
            };
            values.insert(key.trim().to_string(), unquote(value.trim()).to_string());
        }

        let mut take = |key: &str| -> Result<String, AgentError> {
            values.remove(key).ok_or_else(|| {
                AgentError::PersistenceError(format!("Device config is missing {}", key))
            })
        };

        Ok(Self {
            network_auth_token: SecretString::from(take(KEY_AUTH_TOKEN)?),
            device_name: take(KEY_DEVICE_NAME)?,
            secret: SecretString::from(take(KEY_SECRET).unwrap_or_default()),
            overlay_ip: take(KEY_OVERLAY_IP).unwrap_or_default(),
            local_ip: take(KEY_LOCAL_IP).unwrap_or_default(),
            hostname: take(KEY_HOSTNAME).unwrap_or_default(),
            configured_at: take(KEY_CONFIGURED_AT)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
        })
    }
}

fn single_line(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Reads and writes the device config document
#[derive(Debug, Clone)]
pub struct DeviceConfigStore {
    file: File,
}

impl DeviceConfigStore {
    pub fn new(file: File) -> Self {
        Self { file }
    }

    /// Whether the device has been configured at least once
    pub async fn exists(&self) -> bool {
        self.file.exists().await
    }

    /// Load the document, `None` when the device is unconfigured
    pub async fn load(&self) -> Result<Option<DeviceConfig>, AgentError> {
        if !self.file.exists().await {
            return Ok(None);
        }
        let contents = self.file.read_string().await.map_err(|e| {
            AgentError::PersistenceError(format!("Failed to read device config: {}", e))
        })?;
        DeviceConfig::from_env_str(&contents).map(Some)
    }

    /// Persist the document, replacing any previous one
    pub async fn save(&self, config: &DeviceConfig) -> Result<(), AgentError> {
        let contents = config.to_env_string();
        self.file.write_private(contents.as_bytes()).await.map_err(|e| {
            AgentError::PersistenceError(format!(
                "Failed to write device config to {}: {}",
                self.file.path().display(),
                e
            ))
        })?;
        info!("Device config written to {}", self.file.path().display());
        Ok(())
    }

    /// Remove the document. Succeeds when nothing was there.
    pub async fn delete(&self) -> Result<(), AgentError> {
        debug!("Deleting device config {}", self.file.path().display());
        self.file.delete().await.map_err(|e| {
            AgentError::PersistenceError(format!("Failed to delete device config: {}", e))
        })
    }
}
