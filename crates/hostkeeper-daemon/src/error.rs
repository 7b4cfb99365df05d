//! Daemon-related errors.

use std::time::Duration;

use thiserror::Error;

use crate::transaction::TransactionError;

/// Errors that can occur while installing, controlling or hosting a service.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// A staged install/uninstall transaction failed.
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// Installing the service failed; the transaction was rolled back.
    #[error("Installing service '{service}' failed: {source}")]
    InstallFailed {
        service: String,
        #[source]
        source: Box<DaemonError>,
    },

    /// Uninstalling the service failed with one or more errors.
    #[error("Uninstalling service '{service}' failed with {} error(s): {}", .errors.len(), join_errors(.errors))]
    UninstallFailed {
        service: String,
        errors: Vec<DaemonError>,
    },

    /// The operation is not available on this platform variant.
    #[error("Operation not supported on this platform: {0}")]
    NotSupported(&'static str),

    /// No service with this name is installed.
    #[error("Service '{0}' is not installed")]
    ServiceNotInstalled(String),

    /// A service with this name is already installed.
    #[error("Service '{0}' is already installed")]
    ServiceAlreadyInstalled(String),

    /// A shell command exited unsuccessfully.
    #[error("Command '{command}' failed (exit code {exit_code:?}): {output}")]
    CommandFailed {
        command: String,
        exit_code: Option<i32>,
        output: String,
    },

    /// A shell command did not finish in time.
    #[error("Command '{command}' did not complete within {timeout:?}")]
    CommandTimeout { command: String, timeout: Duration },

    /// Failed to set up signal handlers.
    #[error("Failed to set up signal handlers: {0}")]
    SignalSetup(String),

    /// The signal loop was started twice or subscribed to after start.
    #[error("Signal loop is already listening")]
    AlreadyListening,

    /// Settings are missing or inconsistent.
    #[error("Invalid service settings: {0}")]
    InvalidSettings(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn join_errors(errors: &[DaemonError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_supported_error() {
        let err = DaemonError::NotSupported("restart");
        let msg = err.to_string();
        assert!(msg.contains("not supported"));
        assert!(msg.contains("restart"));
    }

    #[test]
    fn test_command_failed_error() {
        let err = DaemonError::CommandFailed {
            command: "update-rc.d heartbeat defaults".to_string(),
            exit_code: Some(1),
            output: "no such file".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("update-rc.d"));
        assert!(msg.contains("no such file"));
    }

    #[test]
    fn test_uninstall_failed_lists_every_error() {
        let err = DaemonError::UninstallFailed {
            service: "heartbeat".to_string(),
            errors: vec![
                DaemonError::ServiceNotInstalled("heartbeat".to_string()),
                DaemonError::NotSupported("send_service_command"),
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("2 error(s)"));
        assert!(msg.contains("not installed"));
        assert!(msg.contains("send_service_command"));
    }

    #[test]
    fn test_install_failed_keeps_source() {
        use std::error::Error;

        let err = DaemonError::InstallFailed {
            service: "heartbeat".to_string(),
            source: Box::new(DaemonError::SignalSetup("boom".to_string())),
        };
        assert!(err.source().is_some());
        assert!(err.to_string().contains("heartbeat"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let daemon_err: DaemonError = io_err.into();
        assert!(daemon_err.to_string().contains("file not found"));
    }
}
