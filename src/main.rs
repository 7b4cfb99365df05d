//! hostkeeper - run a program as an OS background service.
//!
//! Main entry point for the hostkeeper CLI.

use std::path::Path;
use std::sync::OnceLock;

use clap::Parser;
use tracing::{debug, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use hostkeeper_config::{Config, ConfigLoader, ConfigValidator, LoggingConfig, StartMode};
use hostkeeper_daemon::{ExitCode, InstallSettings, ServiceIdentity, select_environment};

mod cli;
mod cmd_service;
mod workload;

use cli::{Cli, Commands, normalize_args};

/// Initialize tracing with console and optional file output.
///
/// Log files are written to the configured directory with daily rotation.
fn init_tracing(logging: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let file_layer = match &logging.directory {
        Some(dir) => {
            let log_dir = ConfigLoader::expand_path(dir);
            std::fs::create_dir_all(&log_dir)?;

            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("hostkeeper")
                .filename_suffix("log")
                .max_log_files(30)
                .build(Path::new(&log_dir))?;

            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let _ = GUARD.set(guard);

            Some(fmt::layer().with_writer(non_blocking).with_ansi(false))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_ansi(true))
        .with(file_layer)
        .init();

    Ok(())
}

/// Load the requested config file, or the default one when it exists.
fn load_config(cli: &Cli) -> Result<Config, Box<dyn std::error::Error>> {
    let config = match &cli.config {
        Some(path) => ConfigLoader::load(path)?,
        None => ConfigLoader::load_or_default(&ConfigLoader::default_path())?,
    };
    Ok(config)
}

/// Command-line identity options take precedence over the config file.
fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(name) = &cli.servicename {
        config.service.name = name.clone();
    }
    if let Some(instance) = &cli.instance {
        config.service.instance = Some(instance.clone());
    }
    if let Some(display_name) = &cli.displayname {
        config.service.display_name = Some(display_name.clone());
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse_from(normalize_args(std::env::args()));

    let mut config = load_config(&cli)?;
    apply_overrides(&mut config, &cli);

    if let Some(Commands::Install {
        username,
        description,
        dependencies,
        start_mode,
    }) = &cli.command
    {
        if username.is_some() {
            config.service.username = username.clone();
        }
        if description.is_some() {
            config.service.description = description.clone();
        }
        if !dependencies.is_empty() {
            config.service.dependencies = dependencies.clone();
        }
        if let Some(mode) = start_mode {
            config.service.start_mode = mode.parse::<StartMode>()?;
        }
    }

    init_tracing(&config.logging)?;

    let validation = ConfigValidator::validate(&config)?;
    for warning in &validation.warnings {
        debug!(path = %warning.path, "{}", warning.message);
    }
    validation.into_result()?;

    let env = select_environment(&config);
    let key = ServiceIdentity::from(&config).key();
    let control_timeout = config.host.control_timeout();

    let code = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => cmd_service::run(env.as_ref(), &config, cli.interval).await?,
        Commands::Install { .. } => {
            let settings = InstallSettings::from_config(&config, std::env::current_exe()?);
            let extra_args = cmd_service::extra_install_args(cli.interval);
            cmd_service::install(env.as_ref(), &settings, &extra_args).await?
        }
        Commands::Uninstall => {
            let settings = InstallSettings::from_config(&config, std::env::current_exe()?);
            let extra_args = cmd_service::extra_install_args(cli.interval);
            cmd_service::uninstall(env.as_ref(), &settings, &extra_args).await?
        }
        Commands::Start => cmd_service::start(env.as_ref(), &key, control_timeout).await?,
        Commands::Stop => cmd_service::stop(env.as_ref(), &key, control_timeout).await?,
        Commands::Status { json } => cmd_service::status(env.as_ref(), &key, json).await?,
    };

    if code != ExitCode::Ok {
        warn!(exit_code = code.code(), "Exiting with {}", code);
        std::process::exit(code.code());
    }
    Ok(())
}
