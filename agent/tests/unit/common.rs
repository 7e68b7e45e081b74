//! Scripted process runner and test harness

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tempfile::TempDir;

use molly_wizard::activation::event::{ActivationEvent, ActivationFeed};
use molly_wizard::app::state::AppState;
use molly_wizard::errors::AgentError;
use molly_wizard::process::{CapturedOutput, CommandSpec, ProcessOutput, ProcessRunner, ProcessStream};
use molly_wizard::storage::layout::StorageLayout;
use molly_wizard::storage::settings::Settings;

enum Reply {
    Captured(VecDeque<CapturedOutput>),
    Stream {
        lines: Vec<String>,
        exit_code: Option<i32>,
    },
    SpawnError,
}

struct Rule {
    prefix: String,
    reply: Reply,
}

/// Answers commands by prefix match on `program args...` (after any `sudo`)
/// and records every command it was asked to run.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply to matching captured commands, replacing any earlier script
    /// for the same prefix
    pub fn on(self, prefix: &str, exit_code: i32, output: &str) -> Self {
        {
            let mut rules = self.rules.lock().unwrap();
            rules.retain(|r| r.prefix != prefix);
            rules.push(Rule {
                prefix: prefix.to_string(),
                reply: Reply::Captured(VecDeque::from([CapturedOutput::new(exit_code, output)])),
            });
        }
        self
    }

    /// Queue a further reply after those already scripted for `prefix`.
    /// The last reply in a queue repeats.
    pub fn then(self, prefix: &str, exit_code: i32, output: &str) -> Self {
        {
            let mut rules = self.rules.lock().unwrap();
            match rules.iter_mut().find(|r| r.prefix == prefix) {
                Some(Rule {
                    reply: Reply::Captured(queue),
                    ..
                }) => queue.push_back(CapturedOutput::new(exit_code, output)),
                _ => panic!("no captured script for {}", prefix),
            }
        }
        self
    }

    /// Reply to a matching streaming command with `lines` then `exit_code`
    pub fn on_stream(self, prefix: &str, lines: &[&str], exit_code: i32) -> Self {
        self.stream_rule(prefix, lines, Some(exit_code))
    }

    /// A streaming command that prints `lines` and then never exits
    pub fn on_stream_stalled(self, prefix: &str, lines: &[&str]) -> Self {
        self.stream_rule(prefix, lines, None)
    }

    fn stream_rule(self, prefix: &str, lines: &[&str], exit_code: Option<i32>) -> Self {
        let mut rules = self.rules.lock().unwrap();
        rules.retain(|r| r.prefix != prefix);
        rules.push(Rule {
            prefix: prefix.to_string(),
            reply: Reply::Stream {
                lines: lines.iter().map(|l| l.to_string()).collect(),
                exit_code,
            },
        });
        drop(rules);
        self
    }

    /// Fail to spawn matching commands
    pub fn on_spawn_error(self, prefix: &str) -> Self {
        {
            let mut rules = self.rules.lock().unwrap();
            rules.retain(|r| r.prefix != prefix);
            rules.push(Rule {
                prefix: prefix.to_string(),
                reply: Reply::SpawnError,
            });
        }
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn called(&self, prefix: &str) -> bool {
        self.count(prefix) > 0
    }

    fn record(&self, command: &CommandSpec) -> String {
        let mut key = command.effective_program().to_string();
        for arg in command.effective_args() {
            key.push(' ');
            key.push_str(arg);
        }
        self.calls.lock().unwrap().push(key.clone());
        key
    }

    fn spawn_error(key: &str) -> AgentError {
        AgentError::ProcessError(format!("Failed to spawn {}: not found", key))
    }
}

#[async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn run_captured(&self, command: &CommandSpec) -> Result<CapturedOutput, AgentError> {
        let key = self.record(command);
        let mut rules = self.rules.lock().unwrap();
        match rules.iter_mut().find(|r| key.starts_with(&r.prefix)) {
            Some(Rule {
                reply: Reply::Captured(queue),
                ..
            }) => {
                if queue.len() > 1 {
                    Ok(queue.pop_front().unwrap())
                } else {
                    Ok(queue.front().cloned().unwrap())
                }
            }
            Some(Rule {
                reply: Reply::SpawnError,
                ..
            }) => Err(Self::spawn_error(&key)),
            _ => Ok(CapturedOutput::new(0, "")),
        }
    }

    async fn run_streaming(&self, command: &CommandSpec) -> Result<ProcessStream, AgentError> {
        let key = self.record(command);
        let (lines, exit_code) = {
            let rules = self.rules.lock().unwrap();
            match rules.iter().find(|r| key.starts_with(&r.prefix)) {
                Some(Rule {
                    reply: Reply::Stream { lines, exit_code },
                    ..
                }) => (lines.clone(), *exit_code),
                Some(Rule {
                    reply: Reply::SpawnError,
                    ..
                }) => return Err(Self::spawn_error(&key)),
                _ => (Vec::new(), Some(0)),
            }
        };

        let (tx, stream) = ProcessStream::channel();
        tokio::spawn(async move {
            for line in lines {
                let _ = tx.send(ProcessOutput::Line(line)).await;
            }
            match exit_code {
                Some(code) => {
                    let _ = tx.send(ProcessOutput::Exited(code)).await;
                }
                // Hold the pipe open until the reader goes away
                None => tx.closed().await,
            }
        });
        Ok(stream)
    }

    fn spawn_detached(&self, command: &CommandSpec) -> Result<(), AgentError> {
        self.record(command);
        Ok(())
    }
}

/// A runner scripted for a clean activation
pub fn healthy_runner() -> ScriptedRunner {
    ScriptedRunner::new()
        .on("tailscale logout", 0, "")
        .on_stream("tailscale up", &["Success."], 0)
        .on("tailscale ip -4", 0, "100.101.102.103\n")
        .on("hostname -I", 0, "192.168.1.20 fe80::1\n")
        .on("docker compose pull", 0, "Pulled\n")
        .on("docker compose up -d", 0, "Container molly Started\n")
        .on("docker inspect", 0, "running\n")
        .on("docker logs", 0, "listening on :8080\n")
}

pub struct Harness {
    pub tmp: TempDir,
    pub layout: StorageLayout,
    pub runner: Arc<ScriptedRunner>,
    pub state: AppState,
}

/// Settings tuned for tests: no sudo, fast polling, no test-mode pauses
pub fn test_settings(tmp: &TempDir) -> Settings {
    let mut settings = Settings::default();
    settings.use_sudo = false;
    settings.stack.project_dir = tmp.path().join("stack");
    settings.health.poll_interval_ms = 10;
    settings.health.max_attempts = 3;
    settings.test_mode_step_delays_ms = vec![0, 0, 0, 0];
    settings
}

pub fn harness(runner: ScriptedRunner) -> Harness {
    harness_with(runner, |_| {})
}

pub fn harness_with(runner: ScriptedRunner, tweak: impl FnOnce(&mut Settings)) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let mut settings = test_settings(&tmp);
    tweak(&mut settings);
    let _ = std::fs::create_dir_all(&settings.stack.project_dir);

    let layout = StorageLayout::new(tmp.path().join("etc"), settings.stack.project_dir.clone());
    let runner = Arc::new(runner);
    let state = AppState::init(&layout, &settings, runner.clone()).unwrap();
    Harness {
        tmp,
        layout,
        runner,
        state,
    }
}

/// Drain a feed, failing the test if it does not finish promptly
pub async fn collect(feed: ActivationFeed) -> Vec<ActivationEvent> {
    tokio::time::timeout(Duration::from_secs(5), feed.collect::<Vec<_>>())
        .await
        .expect("activation feed did not terminate")
}

/// Wait until no activation holds the device
pub async fn wait_idle(state: &AppState) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while state.orchestrator.is_busy() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("activation did not release the device");
}
