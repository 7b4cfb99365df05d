//! LSB init-script installer (`/etc/init.d` + `update-rc.d`).

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info};

use super::lsb_script::LsbScript;
use super::{InstallHooks, PlatformInstaller, notify};
use crate::error::DaemonError;
use crate::settings::InstallSettings;
use crate::shell::{CommandRunner, ShellRunner};
use crate::transaction::{StageError, StagedTransaction, rollback};

/// Context threaded through the install stages.
struct LsbContext {
    settings: InstallSettings,
    command_line: String,
    user: String,
    runner: Arc<dyn CommandRunner>,
}

impl LsbContext {
    fn service_file(&self) -> PathBuf {
        self.settings
            .init_dir
            .join(self.settings.service_file_name())
    }

    fn script(&self) -> LsbScript {
        let (service_dir, service_exe) = LsbScript::locate(&self.settings.executable);
        LsbScript {
            service_name: self.settings.service_file_name(),
            dependencies: self.settings.dependencies.clone(),
            display_name: self.settings.display_name(),
            description: self.settings.description(),
            service_dir,
            service_exe,
            service_args: self.command_line.clone(),
            service_user: self.user.clone(),
            pid_dir: self.settings.pid_dir.display().to_string(),
        }
    }

    fn update_rc(&self, args: &str) -> Result<(), StageError> {
        let command = format!("update-rc.d {}", args);
        self.runner
            .run_checked(&command, self.settings.command_timeout)?;
        Ok(())
    }
}

fn create_service_file(ctx: &mut LsbContext) -> Result<(), StageError> {
    let path = ctx.service_file();
    fs::write(&path, ctx.script().render())
        .map_err(|e| format!("cannot write service file {}: {}", path.display(), e))?;
    debug!(path = %path.display(), "Service file written");
    Ok(())
}

fn delete_service_file(ctx: &mut LsbContext) -> Result<(), StageError> {
    let path = ctx.service_file();
    if path.exists() {
        fs::remove_file(&path)
            .map_err(|e| format!("cannot delete service file {}: {}", path.display(), e))?;
        debug!(path = %path.display(), "Service file deleted");
    }
    Ok(())
}

#[cfg(unix)]
fn set_service_file_executable(ctx: &mut LsbContext) -> Result<(), StageError> {
    use std::os::unix::fs::PermissionsExt;

    let path = ctx.service_file();
    let metadata = fs::metadata(&path)
        .map_err(|e| format!("cannot read status of {}: {}", path.display(), e))?;
    let mut permissions = metadata.permissions();
    permissions.set_mode(permissions.mode() | 0o111);
    fs::set_permissions(&path, permissions)
        .map_err(|e| format!("cannot set {} as executable: {}", path.display(), e))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_service_file_executable(_ctx: &mut LsbContext) -> Result<(), StageError> {
    Err("init scripts are only supported on unix".into())
}

fn register_service_file(ctx: &mut LsbContext) -> Result<(), StageError> {
    ctx.update_rc(&format!("{} defaults", ctx.settings.service_file_name()))
}

fn unregister_service_file(ctx: &mut LsbContext) -> Result<(), StageError> {
    ctx.update_rc(&format!("-f {} remove", ctx.settings.service_file_name()))
}

fn transaction() -> StagedTransaction<LsbContext> {
    StagedTransaction::new("lsb-install")
        .stage(
            "create service file",
            create_service_file,
            rollback(delete_service_file),
        )
        .stage(
            "set service file as executable",
            set_service_file_executable,
            None,
        )
        .stage(
            "register service file",
            register_service_file,
            rollback(unregister_service_file),
        )
}

/// Name of the user running this process.
pub fn current_user() -> String {
    #[cfg(unix)]
    {
        use nix::unistd::{User, getuid};

        if let Ok(Some(user)) = User::from_uid(getuid()) {
            return user.name;
        }
    }
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "root".to_string())
}

/// Installs services as LSB init scripts.
pub struct LsbInstaller {
    runner: Arc<dyn CommandRunner>,
}

impl Default for LsbInstaller {
    fn default() -> Self {
        Self::new()
    }
}

impl LsbInstaller {
    pub fn new() -> Self {
        Self::with_runner(Arc::new(ShellRunner::new()))
    }

    pub fn with_runner(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn context(&self, settings: &InstallSettings, command_line: &str) -> LsbContext {
        let user = settings
            .username
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_string)
            .unwrap_or_else(current_user);
        LsbContext {
            settings: settings.clone(),
            command_line: command_line.to_string(),
            user,
            runner: self.runner.clone(),
        }
    }
}

impl PlatformInstaller for LsbInstaller {
    fn install(
        &self,
        settings: &InstallSettings,
        command_line: &str,
        hooks: &mut InstallHooks,
    ) -> Result<(), DaemonError> {
        let mut ctx = self.context(settings, command_line);
        info!(path = %ctx.service_file().display(), "Installing init script");

        let InstallHooks {
            before_rollback,
            after_rollback,
            ..
        } = hooks;

        transaction().execute_with_hooks(
            &mut ctx,
            &mut || notify(before_rollback, settings),
            &mut || notify(after_rollback, settings),
        )?;
        Ok(())
    }

    fn uninstall(&self, settings: &InstallSettings, command_line: &str) -> Vec<DaemonError> {
        let mut ctx = self.context(settings, command_line);
        match transaction().rollback(&mut ctx) {
            Ok(()) => Vec::new(),
            Err(e) => vec![e.into()],
        }
    }
}
