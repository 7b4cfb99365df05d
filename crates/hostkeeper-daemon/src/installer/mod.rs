//! Service installation orchestration.
//!
//! [`ServiceInstaller`] builds the launch line of the installed service,
//! invokes the optional lifecycle observers and delegates the actual work
//! to a [`PlatformInstaller`], which runs it as a staged transaction.

mod lsb;
mod lsb_script;
mod windows;

use tracing::{error, info};

use crate::cmdline::{CommandLineArgs, build_command_line};
use crate::error::DaemonError;
use crate::settings::InstallSettings;

pub use lsb::{LsbInstaller, current_user};
pub use lsb_script::{DEFAULT_DEPENDENCIES, LsbScript};
pub use windows::ScInstaller;

/// Optional observer invoked at a fixed point of an install or uninstall.
pub type Hook = Box<dyn FnMut(&InstallSettings) + Send>;

/// Observers around an install.
#[derive(Default)]
pub struct InstallHooks {
    pub before_install: Option<Hook>,
    pub after_install: Option<Hook>,
    pub before_rollback: Option<Hook>,
    pub after_rollback: Option<Hook>,
}

impl InstallHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn before_install(mut self, hook: impl FnMut(&InstallSettings) + Send + 'static) -> Self {
        self.before_install = Some(Box::new(hook));
        self
    }

    pub fn after_install(mut self, hook: impl FnMut(&InstallSettings) + Send + 'static) -> Self {
        self.after_install = Some(Box::new(hook));
        self
    }

    pub fn before_rollback(mut self, hook: impl FnMut(&InstallSettings) + Send + 'static) -> Self {
        self.before_rollback = Some(Box::new(hook));
        self
    }

    pub fn after_rollback(mut self, hook: impl FnMut(&InstallSettings) + Send + 'static) -> Self {
        self.after_rollback = Some(Box::new(hook));
        self
    }
}

/// Observers around an uninstall.
#[derive(Default)]
pub struct UninstallHooks {
    pub before_uninstall: Option<Hook>,
    pub after_uninstall: Option<Hook>,
}

impl UninstallHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn before_uninstall(mut self, hook: impl FnMut(&InstallSettings) + Send + 'static) -> Self {
        self.before_uninstall = Some(Box::new(hook));
        self
    }

    pub fn after_uninstall(mut self, hook: impl FnMut(&InstallSettings) + Send + 'static) -> Self {
        self.after_uninstall = Some(Box::new(hook));
        self
    }
}

pub(crate) fn notify(hook: &mut Option<Hook>, settings: &InstallSettings) {
    if let Some(hook) = hook.as_mut() {
        hook(settings);
    }
}

/// Registers a service with one kind of service manager.
pub trait PlatformInstaller: Send + Sync {
    /// Register the service. Partial work is rolled back on failure, with
    /// the rollback observers of `hooks` called around the rollback.
    fn install(
        &self,
        settings: &InstallSettings,
        command_line: &str,
        hooks: &mut InstallHooks,
    ) -> Result<(), DaemonError>;

    /// Undo every install step, collecting all failures.
    fn uninstall(&self, settings: &InstallSettings, command_line: &str) -> Vec<DaemonError>;
}

/// Launch line of the installed service: the caller's arguments with the
/// reserved identity keys set authoritatively.
pub fn installed_arguments(settings: &InstallSettings, extra_args: &CommandLineArgs) -> CommandLineArgs {
    let mut args = extra_args.clone();
    args.set_param("instance", settings.identity.instance.clone().unwrap_or_default());
    args.set_param("displayname", settings.display_name());
    args.set_param("servicename", settings.identity.name.clone());
    args
}

pub fn installed_command_line(settings: &InstallSettings, extra_args: &CommandLineArgs) -> String {
    build_command_line(&installed_arguments(settings, extra_args))
}

/// Installs and uninstalls services through a platform installer.
pub struct ServiceInstaller {
    platform: Box<dyn PlatformInstaller>,
}

impl ServiceInstaller {
    pub fn new(platform: impl PlatformInstaller + 'static) -> Self {
        Self {
            platform: Box::new(platform),
        }
    }

    pub fn install_service(
        &self,
        settings: &InstallSettings,
        extra_args: &CommandLineArgs,
        mut hooks: InstallHooks,
    ) -> Result<(), DaemonError> {
        let service = settings.identity.key();
        settings.validate()?;

        let command_line = installed_command_line(settings, extra_args);
        info!(service = %service, command_line = %command_line, "Installing service");

        notify(&mut hooks.before_install, settings);

        match self.platform.install(settings, &command_line, &mut hooks) {
            Ok(()) => {
                notify(&mut hooks.after_install, settings);
                info!(service = %service, "Service installed");
                Ok(())
            }
            Err(e) => {
                let err = DaemonError::InstallFailed {
                    service: service.clone(),
                    source: Box::new(e),
                };
                error!(service = %service, error = %err, "Installing service failed");
                Err(err)
            }
        }
    }

    pub fn uninstall_service(
        &self,
        settings: &InstallSettings,
        extra_args: &CommandLineArgs,
        mut hooks: UninstallHooks,
    ) -> Result<(), DaemonError> {
        let service = settings.identity.key();
        let command_line = installed_command_line(settings, extra_args);
        info!(service = %service, "Uninstalling service");

        notify(&mut hooks.before_uninstall, settings);
        let errors = self.platform.uninstall(settings, &command_line);
        notify(&mut hooks.after_uninstall, settings);

        if errors.is_empty() {
            info!(service = %service, "Service uninstalled");
            return Ok(());
        }

        let err = DaemonError::UninstallFailed { service, errors };
        error!(error = %err, "Uninstalling service completed with errors");
        Err(err)
    }
}

#[cfg(test)]
#[path = "installer_tests.rs"]
mod tests;
