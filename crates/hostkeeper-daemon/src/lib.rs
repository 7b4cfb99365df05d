//! # hostkeeper daemon
//!
//! Lets a single executable run as, and manage the lifecycle of, an OS
//! background service.
//!
//! ## Features
//!
//! - Staged install/uninstall transactions with reverse-order rollback
//! - LSB init-script installer (`/etc/init.d`, `update-rc.d`)
//! - Windows service control manager installer (`sc.exe`)
//! - Service status from process-table inspection
//! - Signal-driven host run loop with exactly-once stop
//!
//! ## Usage
//!
//! ```rust,ignore
//! use hostkeeper_daemon::{HostSettings, ServiceHost, ServiceIdentity};
//!
//! let settings = HostSettings::new(ServiceIdentity::new("heartbeat"));
//! let exit_code = ServiceHost::new(settings, MyService).run().await;
//! std::process::exit(exit_code.code());
//! ```
//!
//! ## Installation
//!
//! ```rust,ignore
//! use hostkeeper_daemon::installer::{InstallHooks, LsbInstaller, ServiceInstaller};
//!
//! let installer = ServiceInstaller::new(LsbInstaller::new());
//! installer.install_service(&settings, &extra_args, InstallHooks::new())?;
//! ```

pub mod cmdline;
pub mod control;
pub mod controller;
pub mod environment;
pub mod error;
pub mod fault;
pub mod host;
pub mod installer;
pub mod process;
pub mod settings;
pub mod shell;
pub mod signal;
pub mod status;
pub mod transaction;

// Re-exports
pub use cmdline::{ArgValue, CommandLineArgs, build_command_line, parse_command_line};
pub use control::{ExitCode, HostControl, ServiceHandle};
pub use environment::{HostEnvironment, select_environment};
pub use error::DaemonError;
pub use host::{ServiceHost, ServiceRunState};
pub use process::{ProcFs, ProcessRecord, RunState};
pub use settings::{HostSettings, InstallSettings, ServiceIdentity};
pub use signal::{SignalKind, SignalRunLoop};
pub use status::{ServiceStatus, ServiceStatusResolver};
pub use transaction::{StagedTransaction, TransactionError};
