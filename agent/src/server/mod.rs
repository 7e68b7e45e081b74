//! Local HTTP server for the presentation layer

pub mod handlers;
pub mod serve;
pub mod state;
