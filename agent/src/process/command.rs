//! Command descriptions handed to a [`ProcessRunner`](super::ProcessRunner)

use std::fmt;
use std::path::PathBuf;

/// A program invocation: what to run, with which arguments, from where
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
        }
    }

    /// Build a command that needs root, going through `sudo` when asked to
    pub fn privileged(use_sudo: bool, program: impl Into<String>) -> Self {
        if use_sudo {
            Self::new("sudo").arg(program)
        } else {
            Self::new(program)
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// The program actually executed, skipping a leading `sudo`
    pub fn effective_program(&self) -> &str {
        if self.program == "sudo" {
            self.args.first().map(String::as_str).unwrap_or("sudo")
        } else {
            &self.program
        }
    }

    /// Arguments passed to [`effective_program`](Self::effective_program)
    pub fn effective_args(&self) -> &[String] {
        if self.program == "sudo" && !self.args.is_empty() {
            &self.args[1..]
        } else {
            &self.args
        }
    }
}

/// Flags whose values never show up in logs
const REDACTED_FLAGS: &[&str] = &["--authkey", "--auth-key"];

/// Rendered for logs, with credential flag values masked
impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            match arg.split_once('=') {
                Some((flag, _)) if REDACTED_FLAGS.contains(&flag) => write!(f, " {}=***", flag)?,
                _ => write!(f, " {}", arg)?,
            }
        }
        Ok(())
    }
}
