//! Evochora executable.
//!
//! Loads the configuration, wires the pipeline services under the service
//! manager, and runs the interactive control console until `exit`.

mod cli;
mod setup;

use evochora_app_config::{AppConfig, ExitCode};
use evochora_stop_handler::{broadcast_exit_signals, wait_all_services_exit};
use log::{error, info};

/// Run the application; returns the process exit code.
pub fn run_app() -> i32 {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match std::env::args().nth(1) {
        Some(path) => match AppConfig::load(&path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("evochora: {}", err);
                return ExitCode::Config.into_code();
            }
        },
        None => AppConfig::default(),
    };

    let mut pipeline = match setup::build(&config) {
        Ok(pipeline) => pipeline,
        Err(err) => {
            eprintln!("evochora: {}", err);
            return err.exit_code().into_code();
        }
    };

    if let Err(err) = pipeline.manager.start_auto() {
        error!("failed to start services: {}", err);
        return ExitCode::Failure.into_code();
    }
    info!("evochora services are up");

    cli::run(&mut pipeline.manager);

    if let Err(err) = pipeline.manager.stop_all() {
        error!("shutdown incomplete: {}", err);
    }
    broadcast_exit_signals();
    wait_all_services_exit();
    info!("evochora exited");
    0
}
