use super::*;
use std::path::PathBuf;

use hostkeeper_daemon::{DaemonError, ProcessRecord, RunState, ServiceIdentity};
use parking_lot::Mutex;

#[derive(Default)]
struct FakeState {
    installed: bool,
    running: bool,
    /// Control requests are accepted but the state never changes.
    stuck: bool,
    installs: Vec<String>,
    uninstalls: usize,
}

struct FakeEnvironment {
    admin: bool,
    state: Mutex<FakeState>,
}

impl FakeEnvironment {
    fn new(admin: bool, installed: bool, running: bool) -> Self {
        Self {
            admin,
            state: Mutex::new(FakeState {
                installed,
                running,
                ..Default::default()
            }),
        }
    }

    fn stuck(self) -> Self {
        self.state.lock().stuck = true;
        self
    }
}

impl HostEnvironment for FakeEnvironment {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn is_service_installed(&self, _service_key: &str) -> bool {
        self.state.lock().installed
    }

    fn is_service_stopped(&self, _service_key: &str) -> bool {
        !self.state.lock().running
    }

    fn service_process(&self, _service_key: &str) -> Option<ProcessRecord> {
        self.state.lock().running.then(|| ProcessRecord {
            process_id: 4242,
            process_name: "hostkeeper".to_string(),
            run_state: RunState::InterruptibleWait,
            command_line: "hostkeeper -servicename heartbeat".to_string(),
        })
    }

    fn start_service(&self, service_key: &str, _timeout: Duration) -> Result<(), DaemonError> {
        let mut state = self.state.lock();
        if !state.installed {
            return Err(DaemonError::ServiceNotInstalled(service_key.to_string()));
        }
        if !state.stuck {
            state.running = true;
        }
        Ok(())
    }

    fn stop_service(&self, service_key: &str, _timeout: Duration) -> Result<(), DaemonError> {
        let mut state = self.state.lock();
        if !state.installed {
            return Err(DaemonError::ServiceNotInstalled(service_key.to_string()));
        }
        if !state.stuck {
            state.running = false;
        }
        Ok(())
    }

    fn install_service(
        &self,
        settings: &InstallSettings,
        extra_args: &CommandLineArgs,
        _hooks: InstallHooks,
    ) -> Result<(), DaemonError> {
        let mut state = self.state.lock();
        state.installed = true;
        state.installs.push(hostkeeper_daemon::installer::installed_command_line(
            settings, extra_args,
        ));
        Ok(())
    }

    fn uninstall_service(
        &self,
        _settings: &InstallSettings,
        _extra_args: &CommandLineArgs,
        _hooks: UninstallHooks,
    ) -> Result<(), DaemonError> {
        let mut state = self.state.lock();
        state.installed = false;
        state.uninstalls += 1;
        Ok(())
    }

    fn is_administrator(&self) -> bool {
        self.admin
    }

    fn is_running_as_service(&self) -> bool {
        false
    }
}

fn install_settings() -> InstallSettings {
    let mut config = Config::default();
    config.service.name = "heartbeat".to_string();
    let mut settings = InstallSettings::from_config(&config, PathBuf::from("/opt/hk/hostkeeper"));
    settings.identity = ServiceIdentity::new("heartbeat");
    settings
}

const TIMEOUT: Duration = Duration::from_millis(600);

#[tokio::test(flavor = "multi_thread")]
async fn test_install_requires_administrator() {
    let env = FakeEnvironment::new(false, false, false);
    let code = install(&env, &install_settings(), &CommandLineArgs::new())
        .await
        .unwrap();
    assert_eq!(code, ExitCode::SudoRequired);
    assert!(!env.state.lock().installed);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_install_writes_extra_arguments() {
    let env = FakeEnvironment::new(true, false, false);
    let code = install(&env, &install_settings(), &extra_install_args(Some(5)))
        .await
        .unwrap();
    assert_eq!(code, ExitCode::Ok);

    let state = env.state.lock();
    assert!(state.installed);
    assert_eq!(state.installs.len(), 1);
    assert!(state.installs[0].contains("-servicename \"heartbeat\""));
    assert!(state.installs[0].contains("-interval \"5\""));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_install_twice_reports_already_installed() {
    let env = FakeEnvironment::new(true, true, false);
    let code = install(&env, &install_settings(), &CommandLineArgs::new())
        .await
        .unwrap();
    assert_eq!(code, ExitCode::ServiceAlreadyInstalled);
    assert!(env.state.lock().installs.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_uninstall_missing_service() {
    let env = FakeEnvironment::new(true, false, false);
    let code = uninstall(&env, &install_settings(), &CommandLineArgs::new())
        .await
        .unwrap();
    assert_eq!(code, ExitCode::ServiceNotInstalled);
    assert_eq!(env.state.lock().uninstalls, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_uninstall_installed_service() {
    let env = FakeEnvironment::new(true, true, false);
    let code = uninstall(&env, &install_settings(), &CommandLineArgs::new())
        .await
        .unwrap();
    assert_eq!(code, ExitCode::Ok);
    assert_eq!(env.state.lock().uninstalls, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_start_and_stop_cycle() {
    let env = FakeEnvironment::new(true, true, false);

    assert_eq!(start(&env, "heartbeat", TIMEOUT).await.unwrap(), ExitCode::Ok);
    assert_eq!(
        start(&env, "heartbeat", TIMEOUT).await.unwrap(),
        ExitCode::ServiceAlreadyRunning
    );
    assert_eq!(stop(&env, "heartbeat", TIMEOUT).await.unwrap(), ExitCode::Ok);
    assert_eq!(
        stop(&env, "heartbeat", TIMEOUT).await.unwrap(),
        ExitCode::ServiceNotRunning
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_start_not_installed() {
    let env = FakeEnvironment::new(true, false, false);
    assert_eq!(
        start(&env, "heartbeat", TIMEOUT).await.unwrap(),
        ExitCode::ServiceNotInstalled
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_start_times_out_when_state_never_changes() {
    let env = FakeEnvironment::new(true, true, false).stuck();
    assert_eq!(
        start(&env, "heartbeat", TIMEOUT).await.unwrap(),
        ExitCode::ServiceControlRequestFailed
    );
}

#[test]
fn test_status_report_serializes() {
    let env = FakeEnvironment::new(true, true, true);
    let report = StatusReport::collect(&env, "heartbeat");
    assert_eq!(report.status, ServiceStatus::Running);
    assert_eq!(report.process_id, Some(4242));

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["service"], "heartbeat");
    assert_eq!(json["status"], "running");
    assert_eq!(json["process_id"], 4242);
    assert!(json["checked_at"].is_string());
}

#[test]
fn test_status_report_for_stopped_service() {
    let env = FakeEnvironment::new(true, true, false);
    let report = StatusReport::collect(&env, "heartbeat");
    assert_eq!(report.status, ServiceStatus::Stopped);
    assert_eq!(report.process_id, None);
}

#[test]
fn test_extra_install_args_without_interval() {
    assert!(extra_install_args(None).is_empty());
}
