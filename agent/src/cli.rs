//! Terminal front-ends for the wizard's operations

use anyhow::{bail, Context, Result};
use colored::Colorize;

use crate::activation::event::{ActivationEvent, EventChannel};
use crate::activation::request::ActivationRequest;
use crate::app::state::AppState;
use crate::stack::controller::ContainerState;

/// Print a status snapshot
pub async fn print_status(state: &AppState) -> Result<()> {
    let snapshot = state.reconciler.query().await;

    let online = if snapshot.online {
        "online".green().bold()
    } else {
        "offline".red().bold()
    };
    println!("Device:     {}", online);
    println!(
        "Configured: {}",
        if snapshot.configured { "yes" } else { "no" }
    );
    println!(
        "Address:    {}",
        snapshot.network.overlay_address.as_deref().unwrap_or("-")
    );

    let container = match snapshot.stack.container_state {
        ContainerState::Running if snapshot.stack.recent_log_tail_contains_error => {
            "running (errors in logs)".yellow()
        }
        ContainerState::Running => "running".green(),
        ContainerState::Starting => "starting".yellow(),
        ContainerState::Errored => "errored".red(),
        ContainerState::Absent => "absent".dimmed(),
    };
    println!("Stack:      {}", container);
    Ok(())
}

/// Reset the device and report the outcome
pub async fn reset(state: &AppState) -> Result<()> {
    let outcome = state.orchestrator.reset_device().await;
    if outcome.ok {
        println!("{}", "Device reset".green());
        Ok(())
    } else {
        bail!(
            "Reset failed: {}",
            outcome.error_message.unwrap_or_else(|| "unknown error".to_string())
        )
    }
}

/// Run an activation and print its events as they arrive. Fails unless the
/// run ends in `done`.
pub async fn activate(state: &AppState, token: &str, name: &str, test_mode: bool) -> Result<()> {
    let request = if test_mode {
        ActivationRequest::test_run(Some(name))
    } else {
        let name = match name.trim() {
            "" => state.settings.network.default_device_name.as_str(),
            name => name,
        };
        ActivationRequest::new(token, name, false).context("Invalid activation request")?
    };

    let mut feed = state
        .orchestrator
        .activate(request)
        .await
        .context("Unable to start activation")?;

    let mut last = None;
    while let Some(event) = feed.next_event().await {
        print_event(&event);
        last = Some(event.channel);
    }

    match last {
        Some(EventChannel::Done) => Ok(()),
        Some(channel) => bail!("Activation ended with {}", channel),
        None => bail!("Activation ended without any event"),
    }
}

fn print_event(event: &ActivationEvent) {
    let line = event.to_line();
    match event.channel {
        EventChannel::Info => println!("{}", line),
        EventChannel::Warning => println!("{}", line.yellow()),
        EventChannel::Error => eprintln!("{}", line.red()),
        EventChannel::Done => println!("{}", line.green().bold()),
    }
}
