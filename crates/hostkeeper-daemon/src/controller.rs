//! Control of installed LSB services through the `service` command.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::DaemonError;
use crate::shell::{CommandRunner, ShellRunner};
use crate::status::{ServiceStatus, ServiceStatusResolver};

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Installed init scripts of one init directory.
#[derive(Clone)]
pub struct ServiceCatalog {
    init_dir: PathBuf,
    runner: Arc<dyn CommandRunner>,
    resolver: ServiceStatusResolver,
}

impl ServiceCatalog {
    pub fn new(init_dir: impl Into<PathBuf>) -> Self {
        Self {
            init_dir: init_dir.into(),
            runner: Arc::new(ShellRunner::new()),
            resolver: ServiceStatusResolver::new(),
        }
    }

    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_resolver(mut self, resolver: ServiceStatusResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Names of executable scripts, optionally filtered by a glob pattern.
    pub fn get_services(&self, pattern: Option<&str>) -> Result<Vec<String>, DaemonError> {
        let pattern = pattern
            .map(glob::Pattern::new)
            .transpose()
            .map_err(|e| DaemonError::InvalidSettings(format!("invalid service pattern: {}", e)))?;

        let entries = match fs::read_dir(&self.init_dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %self.init_dir.display(), error = %e, "Init directory not readable");
                return Ok(Vec::new());
            }
        };

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| is_executable(&entry.path()))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| pattern.as_ref().is_none_or(|p| p.matches(name)))
            .collect();
        names.sort();
        Ok(names)
    }

    /// Controller for an installed service, or `None` if no script exists.
    ///
    /// Service keys compare case-insensitively, as in
    /// [`ServiceStatusResolver`]. An exact file name match wins; otherwise
    /// the first script whose name differs only in case is used, and the
    /// controller carries the script's own spelling.
    pub fn get_service(&self, service_key: &str) -> Option<LsbServiceController> {
        let name = if is_executable(&self.init_dir.join(service_key)) {
            service_key.to_string()
        } else {
            self.get_services(None)
                .ok()?
                .into_iter()
                .find(|name| name.eq_ignore_ascii_case(service_key))?
        };
        Some(LsbServiceController {
            name,
            runner: self.runner.clone(),
            resolver: self.resolver.clone(),
        })
    }
}

/// Handle to one installed LSB service.
pub struct LsbServiceController {
    name: String,
    runner: Arc<dyn CommandRunner>,
    resolver: ServiceStatusResolver,
}

impl LsbServiceController {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> ServiceStatus {
        self.resolver.get_status(&self.name)
    }

    pub fn start(&self, timeout: Duration) -> Result<(), DaemonError> {
        self.service_command("start", timeout)
    }

    pub fn stop(&self, timeout: Duration) -> Result<(), DaemonError> {
        self.service_command("stop", timeout)
    }

    fn service_command(&self, action: &str, timeout: Duration) -> Result<(), DaemonError> {
        let command = format!("service {} {}", self.name, action);
        self.runner.run_checked(&command, timeout)?;
        info!(service = %self.name, action, "Service command completed");
        Ok(())
    }
}
