//! Activation wizard library
//!
//! Provisions an edge device onto a private overlay network, brings up its
//! container stack and reports progress and status to a local front-end.

pub mod activation;
pub mod app;
pub mod cli;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod network;
pub mod process;
pub mod server;
pub mod stack;
pub mod status;
pub mod storage;
pub mod system;
pub mod utils;
