//! External command execution

pub mod command;
pub mod runner;

pub use command::CommandSpec;
pub use runner::{CapturedOutput, ProcessOutput, ProcessRunner, ProcessStream, TokioProcessRunner};
