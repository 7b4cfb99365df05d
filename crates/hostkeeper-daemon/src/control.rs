//! Workload callbacks, host control surface and exit codes.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::DaemonError;

/// Process exit code reported by the host and the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum ExitCode {
    Ok = 0,
    /// The workload failed to start.
    AbnormalExit = 1,
    /// The workload faulted after it started.
    UnhandledServiceException = 2,
    SudoRequired = 3,
    ServiceAlreadyInstalled = 10,
    ServiceNotInstalled = 11,
    ServiceAlreadyRunning = 12,
    ServiceNotRunning = 13,
    ServiceControlRequestFailed = 14,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        self == ExitCode::Ok
    }
}

impl From<u8> for ExitCode {
    fn from(v: u8) -> Self {
        match v {
            0 => ExitCode::Ok,
            1 => ExitCode::AbnormalExit,
            2 => ExitCode::UnhandledServiceException,
            3 => ExitCode::SudoRequired,
            10 => ExitCode::ServiceAlreadyInstalled,
            11 => ExitCode::ServiceNotInstalled,
            12 => ExitCode::ServiceAlreadyRunning,
            13 => ExitCode::ServiceNotRunning,
            14 => ExitCode::ServiceControlRequestFailed,
            _ => ExitCode::AbnormalExit,
        }
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code as u8)
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.code())
    }
}

/// Operations a workload may request from the host.
pub trait HostControl: Send + Sync {
    /// Ask the host to stop. Safe to call any number of times.
    fn stop(&self);

    fn request_additional_time(&self, _time: Duration) -> Result<(), DaemonError> {
        Err(DaemonError::NotSupported("request_additional_time"))
    }

    fn restart(&self) -> Result<(), DaemonError> {
        Err(DaemonError::NotSupported("restart"))
    }
}

/// Start/stop callbacks of the hosted workload.
///
/// Returning `false` means the operation did not complete successfully.
#[async_trait]
pub trait ServiceHandle: Send + Sync + 'static {
    async fn start(&self, control: Arc<dyn HostControl>) -> bool;

    async fn stop(&self, control: Arc<dyn HostControl>) -> bool;
}
