//! Platform capability selection.
//!
//! Everything that differs between service managers sits behind
//! [`HostEnvironment`]. One implementation is chosen by
//! [`select_environment`] at startup and passed to every command.

use std::sync::Arc;
use std::time::Duration;

use hostkeeper_config::Config;
use tracing::{error, info};

use crate::cmdline::{CommandLineArgs, normalize_command_line};
use crate::control::ServiceHandle;
use crate::controller::ServiceCatalog;
use crate::error::DaemonError;
use crate::host::ServiceHost;
use crate::installer::{
    InstallHooks, LsbInstaller, ScInstaller, ServiceInstaller, UninstallHooks,
};
use crate::process::ProcessRecord;
use crate::settings::{HostSettings, InstallSettings};
use crate::shell::{CommandRunner, ShellRunner};
use crate::status::{ServiceStatus, ServiceStatusResolver};

/// Service-manager operations of one platform.
pub trait HostEnvironment: Send + Sync {
    fn name(&self) -> &'static str;

    fn is_service_installed(&self, service_key: &str) -> bool;

    /// `true` when the service is missing or not running.
    fn is_service_stopped(&self, service_key: &str) -> bool;

    /// Process hosting the service, where the platform can tell.
    fn service_process(&self, _service_key: &str) -> Option<ProcessRecord> {
        None
    }

    /// Ask the service manager to start the service. Fails only when the
    /// service is not installed; a failing start request is logged.
    fn start_service(&self, service_key: &str, timeout: Duration) -> Result<(), DaemonError>;

    /// Counterpart of [`start_service`](Self::start_service).
    fn stop_service(&self, service_key: &str, timeout: Duration) -> Result<(), DaemonError>;

    fn install_service(
        &self,
        settings: &InstallSettings,
        extra_args: &CommandLineArgs,
        hooks: InstallHooks,
    ) -> Result<(), DaemonError>;

    fn uninstall_service(
        &self,
        settings: &InstallSettings,
        extra_args: &CommandLineArgs,
        hooks: UninstallHooks,
    ) -> Result<(), DaemonError>;

    fn run_as_administrator(&self) -> Result<bool, DaemonError> {
        Err(DaemonError::NotSupported("run_as_administrator"))
    }

    fn send_service_command(&self, _service_key: &str, _command: u8) -> Result<(), DaemonError> {
        Err(DaemonError::NotSupported("send_service_command"))
    }

    fn is_administrator(&self) -> bool;

    fn is_running_as_service(&self) -> bool;

    /// Arguments of the current process in launch-line form.
    fn command_line(&self) -> String {
        normalize_command_line(std::env::args().skip(1))
    }

    fn create_service_host(&self, settings: HostSettings, service: Arc<dyn ServiceHandle>) -> ServiceHost {
        ServiceHost::with_handle(settings, service)
    }
}

/// LSB init scripts plus process-table status.
pub struct LinuxEnvironment {
    catalog: ServiceCatalog,
    resolver: ServiceStatusResolver,
    installer: ServiceInstaller,
}

impl LinuxEnvironment {
    pub fn new(config: &Config) -> Self {
        Self::with_runner(config, Arc::new(ShellRunner::new()))
    }

    pub fn with_runner(config: &Config, runner: Arc<dyn CommandRunner>) -> Self {
        let resolver = ServiceStatusResolver::new();
        Self {
            catalog: ServiceCatalog::new(config.install.init_dir.clone())
                .with_runner(runner.clone())
                .with_resolver(resolver.clone()),
            resolver,
            installer: ServiceInstaller::new(LsbInstaller::with_runner(runner)),
        }
    }

    pub fn with_resolver(mut self, resolver: ServiceStatusResolver) -> Self {
        self.catalog = self.catalog.with_resolver(resolver.clone());
        self.resolver = resolver;
        self
    }

    pub fn catalog(&self) -> &ServiceCatalog {
        &self.catalog
    }
}

impl HostEnvironment for LinuxEnvironment {
    fn name(&self) -> &'static str {
        "linux"
    }

    fn is_service_installed(&self, service_key: &str) -> bool {
        self.catalog.get_service(service_key).is_some()
    }

    fn is_service_stopped(&self, service_key: &str) -> bool {
        match self.catalog.get_service(service_key) {
            Some(controller) => controller.status() == ServiceStatus::Stopped,
            None => true,
        }
    }

    fn service_process(&self, service_key: &str) -> Option<ProcessRecord> {
        self.resolver.find_process(service_key)
    }

    fn start_service(&self, service_key: &str, timeout: Duration) -> Result<(), DaemonError> {
        let controller = self
            .catalog
            .get_service(service_key)
            .ok_or_else(|| DaemonError::ServiceNotInstalled(service_key.to_string()))?;
        if let Err(e) = controller.start(timeout) {
            error!(service = service_key, error = %e, "Starting service failed");
        }
        Ok(())
    }

    fn stop_service(&self, service_key: &str, timeout: Duration) -> Result<(), DaemonError> {
        let controller = self
            .catalog
            .get_service(service_key)
            .ok_or_else(|| DaemonError::ServiceNotInstalled(service_key.to_string()))?;
        if let Err(e) = controller.stop(timeout) {
            error!(service = service_key, error = %e, "Stopping service failed");
        }
        Ok(())
    }

    fn install_service(
        &self,
        settings: &InstallSettings,
        extra_args: &CommandLineArgs,
        hooks: InstallHooks,
    ) -> Result<(), DaemonError> {
        let key = settings.service_file_name();
        if self.is_service_installed(&key) {
            return Err(DaemonError::ServiceAlreadyInstalled(key));
        }
        self.installer.install_service(settings, extra_args, hooks)
    }

    fn uninstall_service(
        &self,
        settings: &InstallSettings,
        extra_args: &CommandLineArgs,
        hooks: UninstallHooks,
    ) -> Result<(), DaemonError> {
        self.installer.uninstall_service(settings, extra_args, hooks)
    }

    #[cfg(unix)]
    fn is_administrator(&self) -> bool {
        nix::unistd::geteuid().is_root()
    }

    #[cfg(not(unix))]
    fn is_administrator(&self) -> bool {
        false
    }

    fn is_running_as_service(&self) -> bool {
        true
    }
}

/// Windows service control manager through `sc.exe`.
///
/// The process itself runs as a console host; it does not register a
/// service dispatcher.
pub struct WindowsEnvironment {
    runner: Arc<dyn CommandRunner>,
    installer: ServiceInstaller,
    timeout: Duration,
}

impl WindowsEnvironment {
    pub fn new(config: &Config) -> Self {
        Self::with_runner(config, Arc::new(ShellRunner::new()))
    }

    pub fn with_runner(config: &Config, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            installer: ServiceInstaller::new(ScInstaller::with_runner(runner.clone())),
            runner,
            timeout: config.host.control_timeout(),
        }
    }

    fn query(&self, service_key: &str) -> Option<String> {
        let command = format!("sc.exe query \"{}\"", service_key);
        self.runner
            .run(&command, self.timeout)
            .ok()
            .filter(|out| out.success())
            .map(|out| out.output)
    }

    fn control(&self, service_key: &str, args: &str, timeout: Duration) -> Result<(), DaemonError> {
        if !self.is_service_installed(service_key) {
            return Err(DaemonError::ServiceNotInstalled(service_key.to_string()));
        }
        let command = format!("sc.exe {} \"{}\"", args, service_key);
        if let Err(e) = self.runner.run_checked(&command, timeout) {
            error!(service = service_key, error = %e, "Service control request failed");
        }
        Ok(())
    }
}

impl HostEnvironment for WindowsEnvironment {
    fn name(&self) -> &'static str {
        "windows"
    }

    fn is_service_installed(&self, service_key: &str) -> bool {
        self.query(service_key).is_some()
    }

    fn is_service_stopped(&self, service_key: &str) -> bool {
        self.query(service_key)
            .is_none_or(|output| output.contains("STOPPED"))
    }

    fn start_service(&self, service_key: &str, timeout: Duration) -> Result<(), DaemonError> {
        self.control(service_key, "start", timeout)
    }

    fn stop_service(&self, service_key: &str, timeout: Duration) -> Result<(), DaemonError> {
        self.control(service_key, "stop", timeout)
    }

    fn install_service(
        &self,
        settings: &InstallSettings,
        extra_args: &CommandLineArgs,
        hooks: InstallHooks,
    ) -> Result<(), DaemonError> {
        let key = settings.service_file_name();
        if self.is_service_installed(&key) {
            return Err(DaemonError::ServiceAlreadyInstalled(key));
        }
        self.installer.install_service(settings, extra_args, hooks)
    }

    fn uninstall_service(
        &self,
        settings: &InstallSettings,
        extra_args: &CommandLineArgs,
        hooks: UninstallHooks,
    ) -> Result<(), DaemonError> {
        self.installer.uninstall_service(settings, extra_args, hooks)
    }

    fn send_service_command(&self, service_key: &str, command: u8) -> Result<(), DaemonError> {
        if command < 128 {
            return Err(DaemonError::InvalidSettings(format!(
                "custom service commands must be in 128..=255, got {}",
                command
            )));
        }
        let line = format!("sc.exe control \"{}\" {}", service_key, command);
        self.runner.run_checked(&line, self.timeout)?;
        Ok(())
    }

    fn is_administrator(&self) -> bool {
        self.runner
            .run("net session", self.timeout)
            .map(|out| out.success())
            .unwrap_or(false)
    }

    fn is_running_as_service(&self) -> bool {
        false
    }
}

/// Pick the environment of the platform this binary runs on.
pub fn select_environment(config: &Config) -> Box<dyn HostEnvironment> {
    let environment: Box<dyn HostEnvironment> = if cfg!(windows) {
        Box::new(WindowsEnvironment::new(config))
    } else {
        Box::new(LinuxEnvironment::new(config))
    };
    info!(environment = environment.name(), "Host environment selected");
    environment
}

#[cfg(test)]
#[path = "environment_tests.rs"]
mod tests;
