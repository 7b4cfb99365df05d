//! Service management command handlers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use hostkeeper_config::Config;
use hostkeeper_daemon::installer::{InstallHooks, UninstallHooks};
use hostkeeper_daemon::{
    CommandLineArgs, ExitCode, HostEnvironment, HostSettings, InstallSettings, ServiceStatus,
};
use serde::Serialize;
use tokio::task::block_in_place;
use tracing::{error, info, warn};

use crate::workload::{DEFAULT_INTERVAL, HeartbeatService};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Host the heartbeat workload in the foreground until signalled.
pub(crate) async fn run(
    env: &dyn HostEnvironment,
    config: &Config,
    interval: Option<u64>,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let settings = HostSettings::from_config(config);
    let interval = interval.map(Duration::from_secs).unwrap_or(DEFAULT_INTERVAL);
    let service = Arc::new(HeartbeatService::new(settings.identity.key(), interval));

    info!(
        service = %settings.identity,
        environment = env.name(),
        as_service = env.is_running_as_service(),
        "Hosting service"
    );
    let host = env.create_service_host(settings, service);
    Ok(host.run().await)
}

/// Arguments written into the installed launch line besides the identity.
pub(crate) fn extra_install_args(interval: Option<u64>) -> CommandLineArgs {
    let mut args = CommandLineArgs::new();
    if let Some(interval) = interval {
        args.set_param("interval", interval.to_string());
    }
    args
}

pub(crate) async fn install(
    env: &dyn HostEnvironment,
    settings: &InstallSettings,
    extra_args: &CommandLineArgs,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let key = settings.service_file_name();
    if !env.is_administrator() {
        error!(service = %key, "Installing a service requires administrative privileges");
        return Ok(ExitCode::SudoRequired);
    }
    if block_in_place(|| env.is_service_installed(&key)) {
        warn!(service = %key, "Service is already installed");
        return Ok(ExitCode::ServiceAlreadyInstalled);
    }

    let hooks = InstallHooks::new()
        .before_install(|s| info!(service = %s.identity, "Installing service"))
        .after_install(|s| info!(service = %s.identity, "Service installed"))
        .before_rollback(|s| warn!(service = %s.identity, "Rolling back service install"))
        .after_rollback(|s| warn!(service = %s.identity, "Service install rolled back"));

    block_in_place(|| env.install_service(settings, extra_args, hooks))?;
    println!("Service '{}' installed", key);
    Ok(ExitCode::Ok)
}

pub(crate) async fn uninstall(
    env: &dyn HostEnvironment,
    settings: &InstallSettings,
    extra_args: &CommandLineArgs,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let key = settings.service_file_name();
    if !env.is_administrator() {
        error!(service = %key, "Uninstalling a service requires administrative privileges");
        return Ok(ExitCode::SudoRequired);
    }
    if !block_in_place(|| env.is_service_installed(&key)) {
        warn!(service = %key, "Service is not installed");
        return Ok(ExitCode::ServiceNotInstalled);
    }

    let hooks = UninstallHooks::new()
        .before_uninstall(|s| info!(service = %s.identity, "Uninstalling service"))
        .after_uninstall(|s| info!(service = %s.identity, "Service uninstalled"));

    block_in_place(|| env.uninstall_service(settings, extra_args, hooks))?;
    println!("Service '{}' uninstalled", key);
    Ok(ExitCode::Ok)
}

pub(crate) async fn start(
    env: &dyn HostEnvironment,
    key: &str,
    timeout: Duration,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    if !block_in_place(|| env.is_service_installed(key)) {
        warn!(service = key, "Service is not installed");
        return Ok(ExitCode::ServiceNotInstalled);
    }
    if !block_in_place(|| env.is_service_stopped(key)) {
        warn!(service = key, "Service is already running");
        return Ok(ExitCode::ServiceAlreadyRunning);
    }

    block_in_place(|| env.start_service(key, timeout))?;
    if wait_for(env, key, timeout, false).await {
        println!("Service '{}' started", key);
        Ok(ExitCode::Ok)
    } else {
        error!(service = key, timeout_secs = timeout.as_secs(), "Service did not start in time");
        Ok(ExitCode::ServiceControlRequestFailed)
    }
}

pub(crate) async fn stop(
    env: &dyn HostEnvironment,
    key: &str,
    timeout: Duration,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    if !block_in_place(|| env.is_service_installed(key)) {
        warn!(service = key, "Service is not installed");
        return Ok(ExitCode::ServiceNotInstalled);
    }
    if block_in_place(|| env.is_service_stopped(key)) {
        warn!(service = key, "Service is not running");
        return Ok(ExitCode::ServiceNotRunning);
    }

    block_in_place(|| env.stop_service(key, timeout))?;
    if wait_for(env, key, timeout, true).await {
        println!("Service '{}' stopped", key);
        Ok(ExitCode::Ok)
    } else {
        error!(service = key, timeout_secs = timeout.as_secs(), "Service did not stop in time");
        Ok(ExitCode::ServiceControlRequestFailed)
    }
}

/// Poll until the stopped state equals `stopped` or the timeout elapses.
async fn wait_for(env: &dyn HostEnvironment, key: &str, timeout: Duration, stopped: bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if block_in_place(|| env.is_service_stopped(key)) == stopped {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Output of `hostkeeper status`.
#[derive(Debug, Serialize)]
pub(crate) struct StatusReport {
    pub service: String,
    pub installed: bool,
    pub status: ServiceStatus,
    pub process_id: Option<u32>,
    pub checked_at: DateTime<Utc>,
}

impl StatusReport {
    pub(crate) fn collect(env: &dyn HostEnvironment, key: &str) -> Self {
        let installed = env.is_service_installed(key);
        let status = if env.is_service_stopped(key) {
            ServiceStatus::Stopped
        } else {
            ServiceStatus::Running
        };
        let process_id = match status {
            ServiceStatus::Running => env.service_process(key).map(|p| p.process_id),
            ServiceStatus::Stopped => None,
        };
        Self {
            service: key.to_string(),
            installed,
            status,
            process_id,
            checked_at: Utc::now(),
        }
    }
}

pub(crate) async fn status(
    env: &dyn HostEnvironment,
    key: &str,
    json: bool,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let report = block_in_place(|| StatusReport::collect(env, key));

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !report.installed {
        println!("Service '{}' is not installed", report.service);
    } else {
        match report.process_id {
            Some(pid) => println!("Service '{}' is {} (PID: {})", report.service, report.status, pid),
            None => println!("Service '{}' is {}", report.service, report.status),
        }
    }

    Ok(if report.installed {
        ExitCode::Ok
    } else {
        ExitCode::ServiceNotInstalled
    })
}

#[cfg(test)]
#[path = "cmd_service_tests.rs"]
mod tests;
