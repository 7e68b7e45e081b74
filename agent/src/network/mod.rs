//! Overlay network membership

pub mod overlay;
