//! Thin async wrappers around the files and directories the wizard owns

pub mod dir;
pub mod file;
