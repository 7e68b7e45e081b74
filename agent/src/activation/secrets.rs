//! Secrets generated for the stack at activation time

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};

/// Random bytes per generated secret
const SECRET_LEN: usize = 32;

/// A fresh 32-byte secret, URL-safe base64 without padding
pub fn generate_secret() -> SecretString {
    let mut bytes = [0u8; SECRET_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    SecretString::from(URL_SAFE_NO_PAD.encode(bytes))
}

/// Keep a previously generated secret so data the stack already encrypted
/// stays readable; otherwise generate one.
pub fn reuse_or_generate(existing: Option<&SecretString>) -> SecretString {
    match existing {
        Some(secret) if !secret.expose_secret().is_empty() => {
            SecretString::from(secret.expose_secret().to_string())
        }
        _ => generate_secret(),
    }
}
