//! Activation orchestrator
//!
//! Drives one run of the pipeline
//! `logout -> join -> write config -> pull -> start -> health poll`
//! and reports progress through an [`ActivationFeed`]. The device's mutable
//! resources (config file, data directory, network identity, stack) sit
//! behind a single mutex; a run holds the guard from start to terminal
//! event, so a second activation or a reset is rejected while one is active.

use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, error, info, warn};

use crate::activation::event::{sanitize_line, sanitize_output, ActivationFeed, EventSink};
use crate::activation::fsm::{ActivationFsm, ActivationState, ActivationStep};
use crate::activation::request::ActivationRequest;
use crate::activation::secrets::reuse_or_generate;
use crate::errors::AgentError;
use crate::filesys::dir::Dir;
use crate::network::overlay::OverlayNetwork;
use crate::process::{CapturedOutput, ProcessOutput, ProcessRunner};
use crate::stack::controller::{ContainerState, StackController};
use crate::status::reconciler::StatusReconciler;
use crate::storage::device_config::{DeviceConfig, DeviceConfigStore};
use crate::system::host;
use crate::utils::{sha256_hex, unix_now};

pub const MSG_CLEANING_UP: &str = "Cleaning up existing network session...";
pub const MSG_PULLING: &str = "Pulling container images...";
pub const MSG_STARTING: &str = "Starting containers...";
pub const MSG_DEGRADED: &str =
    "Containers are running but their logs report errors. Check the stack logs before retrying.";
pub const MSG_SLOW_START: &str =
    "Startup is taking longer than usual. The device may still come online; check the status page.";
pub const MSG_TEST_DONE: &str = "[TEST] Activation complete";

/// Orchestrator tuning
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Pause between health checks
    pub poll_interval: Duration,

    /// Health checks before giving up
    pub max_attempts: u32,

    /// Longest the join may run before the activation fails
    pub join_timeout: Duration,

    /// Pauses between the canned test-mode lines
    pub test_mode_delays: Vec<Duration>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_attempts: 15,
            join_timeout: Duration::from_secs(120),
            test_mode_delays: vec![
                Duration::from_secs(1),
                Duration::from_secs(1),
                Duration::from_secs(1),
                Duration::from_secs(2),
            ],
        }
    }
}

/// State only an activation or reset may change
pub struct DeviceResources {
    pub network: OverlayNetwork,
    pub stack: StackController,
    pub config_store: DeviceConfigStore,
    pub data_dir: Dir,
}

/// Activation orchestrator
pub struct Orchestrator {
    pub(crate) resources: Arc<Mutex<DeviceResources>>,
    pub(crate) fsm: Arc<RwLock<ActivationFsm>>,
    runner: Arc<dyn ProcessRunner>,
    reconciler: StatusReconciler,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        resources: DeviceResources,
        runner: Arc<dyn ProcessRunner>,
        reconciler: StatusReconciler,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            resources: Arc::new(Mutex::new(resources)),
            fsm: Arc::new(RwLock::new(ActivationFsm::new())),
            runner,
            reconciler,
            settings,
        }
    }

    /// State of the current or most recent run
    pub async fn state(&self) -> ActivationState {
        self.fsm.read().await.state()
    }

    /// Whether a run or reset currently holds the device
    pub fn is_busy(&self) -> bool {
        self.resources.try_lock().is_err()
    }

    /// Start an activation run.
    ///
    /// Returns immediately with the run's event feed; the pipeline runs on
    /// its own task. Fails with [`AgentError::Busy`] while another run or a
    /// reset holds the device.
    pub async fn activate(&self, request: ActivationRequest) -> Result<ActivationFeed, AgentError> {
        let guard = self
            .resources
            .clone()
            .try_lock_owned()
            .map_err(|_| AgentError::Busy("An activation is already in progress".to_string()))?;

        *self.fsm.write().await = ActivationFsm::new();
        let (sink, feed) = EventSink::channel();

        info!(
            "Starting activation for {} (test mode: {})",
            request.device_name(),
            request.is_test()
        );

        let run = Run {
            resources: guard,
            fsm: self.fsm.clone(),
            runner: self.runner.clone(),
            reconciler: self.reconciler.clone(),
            settings: self.settings.clone(),
            sink,
        };
        tokio::spawn(run.execute(request));

        Ok(feed)
    }
}

/// One pipeline run, owning the device guard until it finishes
struct Run {
    resources: OwnedMutexGuard<DeviceResources>,
    fsm: Arc<RwLock<ActivationFsm>>,
    runner: Arc<dyn ProcessRunner>,
    reconciler: StatusReconciler,
    settings: OrchestratorSettings,
    sink: EventSink,
}

impl Run {
    async fn execute(mut self, request: ActivationRequest) {
        if request.is_test() {
            self.run_test_mode(request.device_name()).await;
            return;
        }

        let state = self.run_pipeline(&request).await;
        match state {
            ActivationState::Ready => info!("Activation of {} complete", request.device_name()),
            state => warn!("Activation of {} ended in {:?}", request.device_name(), state),
        }
    }

    async fn step(&self, step: ActivationStep) {
        if let Err(e) = self.fsm.write().await.process(step) {
            error!("{}", e);
        }
    }

    async fn fail(&mut self, reason: String) -> ActivationState {
        let reason = match sanitize_output(&reason) {
            text if text.is_empty() => "Activation failed".to_string(),
            text => text,
        };
        error!("Activation failed: {}", reason);
        self.step(ActivationStep::Fail(reason.clone())).await;
        self.sink.error(reason).await;
        ActivationState::Failed
    }

    async fn run_pipeline(&mut self, request: &ActivationRequest) -> ActivationState {
        // Stale session cleanup is best effort
        self.step(ActivationStep::Begin).await;
        self.sink.info(MSG_CLEANING_UP).await;
        match self.resources.network.logout().await {
            Ok(captured) if captured.success() => debug!("Previous network session cleared"),
            Ok(captured) => {
                let detail = sanitize_output(&captured.output);
                debug!("Logout exited with {}: {}", captured.exit_code, detail);
                self.sink
                    .info(format!("No previous session cleared ({})", fallback(&detail, &captured)))
                    .await;
            }
            Err(e) => {
                self.sink
                    .info(format!("Skipping session cleanup: {}", sanitize_line(&e.to_string())))
                    .await;
            }
        }
        self.step(ActivationStep::LoggedOut).await;

        // Join
        info!(
            "Joining overlay network as {} (token {})",
            request.device_name(),
            &sha256_hex(request.auth_token().expose_secret().as_bytes())[..8]
        );
        let join_output = match self.join(request).await {
            Ok(output) => output,
            Err(reason) => return self.fail(reason).await,
        };
        debug!("Join finished with {} output lines", join_output.len());

        // Config
        let overlay_ip = match self.write_config(request).await {
            Ok(overlay_ip) => overlay_ip,
            Err(e) => return self.fail(e.to_string()).await,
        };
        self.step(ActivationStep::ConfigPersisted).await;

        // Pull, then start. Both run to completion even if the consumer left.
        self.step(ActivationStep::Pull).await;
        self.sink.info(MSG_PULLING).await;
        let pulled = self.resources.stack.pull().await;
        if let Err(reason) = command_result("Image pull", pulled) {
            return self.fail(reason).await;
        }
        self.step(ActivationStep::Pulled).await;

        self.sink.info(MSG_STARTING).await;
        let started = self.resources.stack.start().await;
        if let Err(reason) = command_result("Stack start", started) {
            return self.fail(reason).await;
        }
        self.step(ActivationStep::Started).await;

        self.poll_health(overlay_ip).await
    }

    /// Run the join command, forwarding its output live. Returns the
    /// collected lines on success and the failure text otherwise, including
    /// when the command outlives the join timeout.
    async fn join(&mut self, request: &ActivationRequest) -> Result<Vec<String>, String> {
        let join_timeout = self.settings.join_timeout;
        let mut stream = self
            .resources
            .network
            .join(request.auth_token(), request.device_name(), join_timeout)
            .await
            .map_err(|e| e.to_string())?;

        let mut lines = Vec::new();
        let sink = &mut self.sink;
        // Drain to the end even when nobody is listening any more
        let drain = async {
            while let Some(output) = stream.next_output().await {
                match output {
                    ProcessOutput::Line(raw) => {
                        let line = sanitize_line(&raw);
                        if line.is_empty() {
                            continue;
                        }
                        sink.info(line.clone()).await;
                        lines.push(line);
                    }
                    ProcessOutput::Exited(code) => return Some(code),
                }
            }
            None
        };

        let exit_code = match tokio::time::timeout(join_timeout, drain).await {
            Ok(exit_code) => exit_code,
            Err(_) => {
                warn!("Network join still running after {:?}, giving up", join_timeout);
                return Err(format!(
                    "Network join timed out after {}s",
                    join_timeout.as_secs()
                ));
            }
        };

        match exit_code {
            Some(0) => Ok(lines),
            Some(code) if lines.is_empty() => {
                Err(format!("Network join failed with exit code {}", code))
            }
            Some(_) => Err(lines.join("\n")),
            None => Err("Network join ended without an exit status".to_string()),
        }
    }

    /// Resolve addresses and persist the device config. Returns the overlay
    /// address recorded.
    async fn write_config(&mut self, request: &ActivationRequest) -> Result<String, AgentError> {
        let network = self.resources.network.probe().await;
        let overlay_ip = network.overlay_address.unwrap_or_default();
        if overlay_ip.is_empty() {
            warn!("Joined but no overlay address reported yet");
        }
        let local_ip = host::local_ip(self.runner.as_ref()).await;

        let previous = match self.resources.config_store.load().await {
            Ok(previous) => previous,
            Err(e) => {
                warn!("Ignoring unreadable device config: {}", e);
                None
            }
        };
        let secret = reuse_or_generate(previous.as_ref().map(|config| &config.secret));

        let config = DeviceConfig {
            network_auth_token: SecretString::from(request.auth_token().expose_secret().to_string()),
            device_name: request.device_name().to_string(),
            secret,
            overlay_ip: overlay_ip.clone(),
            local_ip,
            hostname: host::hostname(),
            configured_at: unix_now(),
        };
        self.resources.config_store.save(&config).await?;
        Ok(overlay_ip)
    }

    /// Poll until the container runs, bounded by `max_attempts`
    async fn poll_health(&mut self, overlay_ip: String) -> ActivationState {
        let max_attempts = self.settings.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            if self.sink.is_detached() {
                info!("Feed consumer left, abandoning health poll");
                self.step(ActivationStep::Fail(
                    "health poll abandoned: consumer disconnected".to_string(),
                ))
                .await;
                return ActivationState::Failed;
            }

            let status = self.reconciler.stack_status().await;
            debug!("Health poll {}/{}: {:?}", attempt, max_attempts, status);

            if status.container_state == ContainerState::Running {
                if status.recent_log_tail_contains_error {
                    self.step(ActivationStep::Unhealthy).await;
                    self.sink.warning(MSG_DEGRADED).await;
                    return ActivationState::Degraded;
                }

                let address = self.resolve_address(overlay_ip).await;
                self.step(ActivationStep::Healthy).await;
                self.sink.done(format!("address={}", address)).await;
                return ActivationState::Ready;
            }

            if attempt < max_attempts {
                tokio::time::sleep(self.settings.poll_interval).await;
            }
        }

        self.step(ActivationStep::TimedOut).await;
        self.sink.warning(MSG_SLOW_START).await;
        ActivationState::Failed
    }

    /// Address for the done event: a fresh overlay reading if it has one,
    /// otherwise what was written to the config
    async fn resolve_address(&self, recorded: String) -> String {
        let status = self.reconciler.get_status().await;
        if !status.address.is_empty() {
            return status.address;
        }
        if recorded.is_empty() {
            "unknown".to_string()
        } else {
            recorded
        }
    }

    async fn run_test_mode(&mut self, device_name: &str) {
        let lines = [
            "[TEST] Initializing mock install...".to_string(),
            "[TEST] Logging out of existing sessions...".to_string(),
            format!("[TEST] Success! Authenticated as {}", device_name),
            "[TEST] Pulling Docker images...".to_string(),
            "[TEST] Containers started successfully.".to_string(),
        ];

        let count = lines.len();
        for (index, line) in lines.into_iter().enumerate() {
            if self.sink.is_detached() {
                debug!("Test run consumer left");
                return;
            }
            self.sink.info(line).await;
            if index + 1 < count {
                if let Some(delay) = self.settings.test_mode_delays.get(index) {
                    tokio::time::sleep(*delay).await;
                }
            }
        }
        self.sink.done(MSG_TEST_DONE).await;
    }
}

/// Map a captured stack command to `Err(reason)` on failure
fn command_result(what: &str, result: Result<CapturedOutput, AgentError>) -> Result<(), String> {
    match result {
        Ok(captured) if captured.success() => Ok(()),
        Ok(captured) => Err(fallback_reason(what, &captured)),
        Err(e) => Err(format!("{} failed: {}", what, e)),
    }
}

fn fallback_reason(what: &str, captured: &CapturedOutput) -> String {
    if captured.trimmed().is_empty() {
        format!("{} failed with exit code {}", what, captured.exit_code)
    } else {
        captured.output.clone()
    }
}

fn fallback(detail: &str, captured: &CapturedOutput) -> String {
    if detail.is_empty() {
        format!("exit code {}", captured.exit_code)
    } else {
        detail.replace('\n', " ")
    }
}
