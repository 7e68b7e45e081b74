//! Persistent state: well-known paths, settings and the device config

pub mod device_config;
pub mod layout;
pub mod settings;
