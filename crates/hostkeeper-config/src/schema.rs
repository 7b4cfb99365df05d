//! Configuration schema definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,

    #[serde(default)]
    pub host: HostConfig,

    #[serde(default)]
    pub install: InstallConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Identity and install-time metadata of the hosted service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Optional instance name; the service key becomes `name@instance`.
    #[serde(default)]
    pub instance: Option<String>,

    #[serde(default)]
    pub display_name: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// Init-system facilities (or SCM services) this service depends on.
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Account the service runs as. Defaults to the installing user.
    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub start_mode: StartMode,
}

fn default_service_name() -> String {
    "hostkeeper".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            instance: None,
            display_name: None,
            description: None,
            dependencies: Vec::new(),
            username: None,
            start_mode: StartMode::default(),
        }
    }
}

/// How the service manager should start the installed service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartMode {
    #[default]
    Automatic,
    Manual,
    Disabled,
    AutomaticDelayed,
}

impl std::fmt::Display for StartMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StartMode::Automatic => write!(f, "automatic"),
            StartMode::Manual => write!(f, "manual"),
            StartMode::Disabled => write!(f, "disabled"),
            StartMode::AutomaticDelayed => write!(f, "automatic_delayed"),
        }
    }
}

impl std::str::FromStr for StartMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "automatic" | "auto" => Ok(StartMode::Automatic),
            "manual" => Ok(StartMode::Manual),
            "disabled" => Ok(StartMode::Disabled),
            "automatic_delayed" | "delayed" => Ok(StartMode::AutomaticDelayed),
            other => Err(ConfigError::InvalidValue {
                field: "service.start_mode".to_string(),
                message: format!("unknown start mode '{}'", other),
            }),
        }
    }
}

/// Run-time host settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Upper bound of a single signal wait before the stop flag is re-checked.
    #[serde(default = "default_listen_timeout")]
    pub listen_timeout_secs: u64,

    /// Timeout for `start`/`stop` control commands.
    #[serde(default = "default_control_timeout")]
    pub control_timeout_secs: u64,

    /// Directory the host switches to before starting the workload.
    /// Defaults to the directory of the executable.
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
}

fn default_listen_timeout() -> u64 {
    60
}

fn default_control_timeout() -> u64 {
    60
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            listen_timeout_secs: default_listen_timeout(),
            control_timeout_secs: default_control_timeout(),
            working_directory: None,
        }
    }
}

impl HostConfig {
    pub fn listen_timeout(&self) -> Duration {
        Duration::from_secs(self.listen_timeout_secs)
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_secs(self.control_timeout_secs)
    }
}

/// Installer settings for the LSB init-script variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallConfig {
    #[serde(default = "default_init_dir")]
    pub init_dir: PathBuf,

    #[serde(default = "default_pid_dir")]
    pub pid_dir: PathBuf,

    /// Timeout for `update-rc.d` and friends.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

fn default_init_dir() -> PathBuf {
    PathBuf::from("/etc/init.d")
}

fn default_pid_dir() -> PathBuf {
    PathBuf::from("/var/run")
}

fn default_command_timeout() -> u64 {
    60
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            init_dir: default_init_dir(),
            pid_dir: default_pid_dir(),
            command_timeout_secs: default_command_timeout(),
        }
    }
}

impl InstallConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// When set, logs are also written to daily-rolling files here.
    #[serde(default)]
    pub directory: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: None,
        }
    }
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;
