//! Settings derived from configuration and the command line.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hostkeeper_config::{Config, ConfigValidator, StartMode};

use crate::error::DaemonError;
use crate::signal::DEFAULT_LISTEN_TIMEOUT;

/// Logical name of a service and its optional instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceIdentity {
    pub name: String,
    pub instance: Option<String>,
}

impl ServiceIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instance: None,
        }
    }

    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        let instance = instance.into();
        self.instance = (!instance.is_empty()).then_some(instance);
        self
    }

    /// `name`, or `name@instance` when an instance is set.
    pub fn key(&self) -> String {
        match &self.instance {
            Some(instance) => format!("{}@{}", self.name, instance),
            None => self.name.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), DaemonError> {
        if let Some(problem) = ConfigValidator::check_identifier(&self.name) {
            return Err(DaemonError::InvalidSettings(format!(
                "service name '{}' {}",
                self.name, problem
            )));
        }
        if let Some(instance) = &self.instance {
            if let Some(problem) = ConfigValidator::check_identifier(instance) {
                return Err(DaemonError::InvalidSettings(format!(
                    "instance name '{}' {}",
                    instance, problem
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

impl From<&Config> for ServiceIdentity {
    fn from(config: &Config) -> Self {
        let identity = ServiceIdentity::new(config.service.name.clone());
        match &config.service.instance {
            Some(instance) => identity.with_instance(instance.clone()),
            None => identity,
        }
    }
}

/// Run-time settings of a [`ServiceHost`](crate::host::ServiceHost).
#[derive(Debug, Clone)]
pub struct HostSettings {
    pub identity: ServiceIdentity,
    pub listen_timeout: Duration,
    pub working_directory: Option<PathBuf>,
    /// Install the process-wide panic hook while running.
    pub fault_handler: bool,
}

impl HostSettings {
    pub fn new(identity: ServiceIdentity) -> Self {
        Self {
            identity,
            listen_timeout: DEFAULT_LISTEN_TIMEOUT,
            working_directory: None,
            fault_handler: true,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let working_directory = config
            .host
            .working_directory
            .clone()
            .or_else(executable_dir);
        Self {
            identity: ServiceIdentity::from(config),
            listen_timeout: config.host.listen_timeout(),
            working_directory,
            fault_handler: true,
        }
    }

    pub fn with_fault_handler(mut self, enabled: bool) -> Self {
        self.fault_handler = enabled;
        self
    }

    pub fn with_listen_timeout(mut self, timeout: Duration) -> Self {
        self.listen_timeout = timeout;
        self
    }
}

fn executable_dir() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
}

/// Everything an installer needs to register a service.
#[derive(Debug, Clone)]
pub struct InstallSettings {
    pub identity: ServiceIdentity,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub dependencies: Vec<String>,
    pub username: Option<String>,
    pub start_mode: StartMode,
    /// Executable the installed service launches.
    pub executable: PathBuf,
    pub init_dir: PathBuf,
    pub pid_dir: PathBuf,
    pub command_timeout: Duration,
}

impl InstallSettings {
    pub fn from_config(config: &Config, executable: impl Into<PathBuf>) -> Self {
        Self {
            identity: ServiceIdentity::from(config),
            display_name: config.service.display_name.clone(),
            description: config.service.description.clone(),
            dependencies: config.service.dependencies.clone(),
            username: config.service.username.clone(),
            start_mode: config.service.start_mode,
            executable: executable.into(),
            init_dir: config.install.init_dir.clone(),
            pid_dir: config.install.pid_dir.clone(),
            command_timeout: config.install.command_timeout(),
        }
    }

    /// Display name, defaulting to the service key.
    pub fn display_name(&self) -> String {
        self.display_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| self.identity.key())
    }

    /// Description, defaulting to the display name.
    pub fn description(&self) -> String {
        self.description
            .clone()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| self.display_name())
    }

    /// File name used in the init directory and with the service manager.
    pub fn service_file_name(&self) -> String {
        self.identity.key()
    }

    pub fn validate(&self) -> Result<(), DaemonError> {
        self.identity.validate()?;
        if self.executable.file_name().is_none() {
            return Err(DaemonError::InvalidSettings(format!(
                "executable path '{}' has no file name",
                self.executable.display()
            )));
        }
        Ok(())
    }
}
