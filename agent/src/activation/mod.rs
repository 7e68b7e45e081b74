//! Device activation: the join, configure, start, verify pipeline

pub mod event;
pub mod fsm;
pub mod orchestrator;
pub mod request;
pub mod reset;
pub mod secrets;
