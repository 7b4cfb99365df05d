//! Windows Service Control Manager installer, driven through `sc.exe`.

use std::sync::Arc;

use hostkeeper_config::StartMode;
use tracing::{info, warn};

use super::{InstallHooks, PlatformInstaller, notify};
use crate::error::DaemonError;
use crate::settings::InstallSettings;
use crate::shell::{CommandRunner, ShellRunner};
use crate::transaction::{StageError, StagedTransaction, rollback};

struct ScContext {
    settings: InstallSettings,
    command_line: String,
    runner: Arc<dyn CommandRunner>,
}

impl ScContext {
    fn sc(&self, args: &str) -> Result<(), StageError> {
        let command = format!("sc.exe {}", args);
        self.runner
            .run_checked(&command, self.settings.command_timeout)?;
        Ok(())
    }

    fn service_name(&self) -> String {
        self.settings.service_file_name()
    }
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\\\""))
}

fn start_type(mode: StartMode) -> &'static str {
    match mode {
        StartMode::Automatic => "auto",
        StartMode::Manual => "demand",
        StartMode::Disabled => "disabled",
        StartMode::AutomaticDelayed => "delayed-auto",
    }
}

/// Arguments of `sc.exe create` for these settings.
pub(crate) fn create_arguments(settings: &InstallSettings, command_line: &str) -> String {
    let bin_path = if command_line.is_empty() {
        quote(&settings.executable.display().to_string())
    } else {
        format!("{} {}", quote(&settings.executable.display().to_string()), command_line)
    };

    let mut args = format!(
        "create {} binPath= {} DisplayName= {} start= {}",
        quote(&settings.service_file_name()),
        quote(&bin_path),
        quote(&settings.display_name()),
        start_type(settings.start_mode)
    );

    let deps: Vec<&str> = settings
        .dependencies
        .iter()
        .map(|d| d.trim())
        .filter(|d| !d.is_empty())
        .collect();
    if !deps.is_empty() {
        args.push_str(&format!(" depend= {}", quote(&deps.join("/"))));
    }
    if let Some(user) = settings.username.as_deref().filter(|u| !u.trim().is_empty()) {
        args.push_str(&format!(" obj= {}", quote(user.trim())));
    }
    args
}

fn create_service(ctx: &mut ScContext) -> Result<(), StageError> {
    ctx.sc(&create_arguments(&ctx.settings, &ctx.command_line))
}

fn delete_service(ctx: &mut ScContext) -> Result<(), StageError> {
    let name = quote(&ctx.service_name());
    if let Err(e) = ctx.sc(&format!("stop {}", name)) {
        warn!(error = %e, "Stopping service before delete failed");
    }
    ctx.sc(&format!("delete {}", name))
}

fn set_description(ctx: &mut ScContext) -> Result<(), StageError> {
    ctx.sc(&format!(
        "description {} {}",
        quote(&ctx.service_name()),
        quote(&ctx.settings.description())
    ))
}

fn transaction() -> StagedTransaction<ScContext> {
    StagedTransaction::new("scm-install")
        .stage("create service", create_service, rollback(delete_service))
        .stage("set service description", set_description, None)
}

/// Installs services with the Windows service control manager.
pub struct ScInstaller {
    runner: Arc<dyn CommandRunner>,
}

impl Default for ScInstaller {
    fn default() -> Self {
        Self::new()
    }
}

impl ScInstaller {
    pub fn new() -> Self {
        Self::with_runner(Arc::new(ShellRunner::new()))
    }

    pub fn with_runner(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn context(&self, settings: &InstallSettings, command_line: &str) -> ScContext {
        ScContext {
            settings: settings.clone(),
            command_line: command_line.to_string(),
            runner: self.runner.clone(),
        }
    }
}

impl PlatformInstaller for ScInstaller {
    fn install(
        &self,
        settings: &InstallSettings,
        command_line: &str,
        hooks: &mut InstallHooks,
    ) -> Result<(), DaemonError> {
        let mut ctx = self.context(settings, command_line);
        info!(service = %ctx.service_name(), "Registering service with the SCM");

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
