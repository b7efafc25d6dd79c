//! Docker deploy server - Entry Point
//!
//! Accepts deploy requests over HTTP, queues them, and runs them one at a time
//! against the configured environments.

use std::path::PathBuf;

use clap::Parser;
use deploy_server::app::options::AppOptions;
use deploy_server::app::run::run;
use deploy_server::config::settings::{load_settings, APPLICATION_NAME};
use deploy_server::logs::{init_logging, LogLevel, LogOptions};
use deploy_server::utils::version_info;

use tracing::{error, info};

/// Command line flags
#[derive(Debug, Parser)]
#[command(name = APPLICATION_NAME, about, disable_version_flag = true)]
struct Cli {
    /// Directory searched first for the settings file
    #[arg(short = 'p', long, env = "DEPLOY_SERVER_CONFIG_PATH")]
    config_path: Option<PathBuf>,

    /// Settings file name without the `.yml` extension
    #[arg(short = 'x', long, default_value = APPLICATION_NAME)]
    config_prefix: String,

    /// Force debug logging
    #[arg(short, long)]
    debug: bool,

    /// Print version information and exit
    #[arg(short = 'V', long)]
    version: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Print version and exit
    let version = version_info();
    if cli.version {
        match serde_json::to_string_pretty(&version) {
            Ok(text) => println!("{}", text),
            Err(_) => println!("{}", version.version),
        }
        return;
    }

    // Retrieve the settings file
    let mut settings = match load_settings(cli.config_path.as_deref(), &cli.config_prefix).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to read settings file: {e}");
            std::process::exit(1);
        }
    };
    if cli.debug {
        settings.log_level = LogLevel::Debug;
    }

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        log_dir: settings.log_dir.clone(),
        json_format: settings.log_json,
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    // Run the server
    let options = AppOptions::from(&settings);
    info!(
        "Running {} {} with options: {:?}",
        APPLICATION_NAME, version.version, options
    );
    if let Err(e) = run(settings, options, await_shutdown_signal()).await {
        error!("Failed to run the deploy server: {e}");
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
                    error!("Unable to install signal handlers, falling back to Ctrl+C");
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
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl+C received, shutting down...");
    }
}
