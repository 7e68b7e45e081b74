//! Host facts and host-level actions

pub mod host;
pub mod power;
