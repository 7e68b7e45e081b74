//! Online/readiness reconciliation

pub mod reconciler;
