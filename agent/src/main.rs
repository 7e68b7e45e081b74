//! Activation wizard - entry point
//!
//! Serves the local activation API: joins the device to the overlay network,
//! brings up the container stack and reports progress and status.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use molly_wizard::app::options::AppOptions;
use molly_wizard::app::run::run;
use molly_wizard::app::state::AppState;
use molly_wizard::cli;
use molly_wizard::logs::{init_logging, LogOptions};
use molly_wizard::process::TokioProcessRunner;
use molly_wizard::storage::layout::StorageLayout;
use molly_wizard::storage::settings::Settings;
use molly_wizard::utils::version_info;

use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("Failed to render version: {e}"),
        }
        return;
    }

    // Load settings
    let mut layout = StorageLayout::default();
    if let Some(dir) = cli_args.get("config") {
        layout.base_dir = PathBuf::from(dir);
    }
    let settings_file = layout.settings_file();
    let (mut settings, settings_error) = if settings_file.exists().await {
        match settings_file.read_json::<Settings>().await {
            Ok(settings) => (settings, None),
            Err(e) => (Settings::default(), Some(e)),
        }
    } else {
        (Settings::default(), None)
    };
    if let Some(port) = cli_args.get("port").and_then(|p| p.parse().ok()) {
        settings.server.port = port;
    }
    if let Some(level) = cli_args.get("log-level").and_then(|l| l.parse().ok()) {
        settings.log_level = level;
    }

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level,
        json_format: settings.log_json,
        log_dir: settings
            .log_to_file
            .then(|| layout.logs_dir().path().to_path_buf()),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };
    if let Some(e) = settings_error {
        warn!("Unable to read settings file, using defaults: {}", e);
    }

    let options = AppOptions::from_settings(layout, settings);

    // One-shot commands
    let one_shot = ["status", "reset", "activate"]
        .into_iter()
        .find(|command| cli_args.contains_key(*command));
    if let Some(command) = one_shot {
        let runner = Arc::new(TokioProcessRunner::default());
        let state = match AppState::init(&options.layout, &options.settings, runner) {
            Ok(state) => state,
            Err(e) => {
                error!("Failed to initialize: {}", e);
                std::process::exit(1);
            }
        };

        let result = match command {
            "status" => cli::print_status(&state).await,
            "reset" => cli::reset(&state).await,
            _ => {
                let token = cli_args.get("token").map(String::as_str).unwrap_or("");
                let name = cli_args.get("name").map(String::as_str).unwrap_or("");
                cli::activate(&state, token, name, cli_args.contains_key("test")).await
            }
        };
        if let Err(e) = result {
            eprintln!("[ERROR] {e:#}");
            std::process::exit(1);
        }
        return;
    }

    // Run the server
    info!("Running activation wizard {} with options: {:?}", version.version, options);
    if let Err(e) = run(options, await_shutdown_signal()).await {
        error!("Failed to run the wizard: {e}");
        std::process::exit(1);
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                _ => {
                    warn!("Unable to install signal handlers, falling back to Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl+C received, shutting down...");
    }
}
