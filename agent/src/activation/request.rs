//! Activation requests

use secrecy::SecretString;

use crate::errors::AgentError;

/// Device name used when the operator leaves the field blank
pub const DEFAULT_DEVICE_NAME: &str = "molly-pi";

/// Auth token carried by scripted test runs
pub const TEST_AUTH_TOKEN: &str = "test-key-123";

/// Device name used by scripted test runs
pub const TEST_DEVICE_NAME: &str = "test-gateway";

/// A validated request to activate this device
#[derive(Debug)]
pub struct ActivationRequest {
    auth_token: SecretString,
    device_name: String,
    test_mode: bool,
}

impl ActivationRequest {
    /// Validate operator input. A blank device name falls back to
    /// [`DEFAULT_DEVICE_NAME`].
    pub fn new(
        auth_token: impl Into<String>,
        device_name: &str,
        test_mode: bool,
    ) -> Result<Self, AgentError> {
        let auth_token = auth_token.into().trim().to_string();
        if auth_token.is_empty() {
            return Err(AgentError::InvalidInput("Auth token is required".to_string()));
        }
        if auth_token.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(AgentError::InvalidInput(
                "Auth token must not contain whitespace".to_string(),
            ));
        }

        let device_name = match device_name.trim() {
            "" => DEFAULT_DEVICE_NAME.to_string(),
            name => name.to_string(),
        };
        validate_device_name(&device_name)?;

        Ok(Self {
            auth_token: SecretString::from(auth_token),
            device_name,
            test_mode,
        })
    }

    /// A scripted run that never touches the network or the stack
    pub fn test_run(device_name: Option<&str>) -> Self {
        let device_name = device_name
            .map(str::trim)
            .filter(|name| !name.is_empty() && validate_device_name(name).is_ok())
            .unwrap_or(TEST_DEVICE_NAME)
            .to_string();
        Self {
            auth_token: SecretString::from(TEST_AUTH_TOKEN.to_string()),
            device_name,
            test_mode: true,
        }
    }

    pub fn auth_token(&self) -> &SecretString {
        &self.auth_token
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn is_test(&self) -> bool {
        self.test_mode
    }
}

/// Device names become host names on the overlay network
fn validate_device_name(name: &str) -> Result<(), AgentError> {
    if name.len() > 63 {
        return Err(AgentError::InvalidInput(
            "Device name must be at most 63 characters".to_string(),
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(AgentError::InvalidInput(format!(
            "Device name may only contain letters, digits, '-' and '_': {}",
            name
        )));
    }
    Ok(())
}
