//! Service liveness from process-table inspection.
//!
//! There is no registry of which instance is live, so status is inferred by
//! re-parsing the launch line of every process of the hosting runtime.
//! The result is a best-effort heuristic: a process can exit or start
//! between the scan and the caller acting on it.

use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::cmdline::{CommandLineArgs, parse_process_command_line};
use crate::process::{ProcFs, ProcessRecord};

/// Kernel limit on the length of a process name (`comm`).
const COMM_LEN: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Running,
    Stopped,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceStatus::Running => write!(f, "running"),
            ServiceStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// Service key encoded in a parsed launch line, if it names a service.
pub fn service_key_of(args: &CommandLineArgs) -> Option<String> {
    let name = args.param("servicename").filter(|n| !n.is_empty())?;
    Some(match args.param("instance").filter(|i| !i.is_empty()) {
        Some(instance) => format!("{}@{}", name, instance),
        None => name.to_string(),
    })
}

/// Name the kernel reports for processes started from the current executable.
pub fn current_runtime_name() -> String {
    let name = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string());
    name.chars().take(COMM_LEN).collect()
}

/// Resolves whether a service key is currently live.
#[derive(Debug, Clone)]
pub struct ServiceStatusResolver {
    procfs: ProcFs,
    runtime_name: String,
}

impl Default for ServiceStatusResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceStatusResolver {
    /// Resolver over `/proc` matching processes of the current executable.
    pub fn new() -> Self {
        Self {
            procfs: ProcFs::new(),
            runtime_name: current_runtime_name(),
        }
    }

    pub fn with_procfs(mut self, procfs: ProcFs) -> Self {
        self.procfs = procfs;
        self
    }

    pub fn with_runtime_name(mut self, name: impl Into<String>) -> Self {
        self.runtime_name = name.into();
        self
    }

    pub fn runtime_name(&self) -> &str {
        &self.runtime_name
    }

    /// First process of the hosting runtime whose launch line encodes
    /// `service_key`. The calling process is never reported.
    pub fn find_process(&self, service_key: &str) -> Option<ProcessRecord> {
        let own_pid = std::process::id();
        self.procfs
            .processes_named(&self.runtime_name)
            .filter(|process| process.process_id != own_pid)
            .find(|process| {
                let args = parse_process_command_line(&process.command_line);
                service_key_of(&args).is_some_and(|key| key.eq_ignore_ascii_case(service_key))
            })
    }

    pub fn get_status(&self, service_key: &str) -> ServiceStatus {
        match self.find_process(service_key) {
            Some(process) => {
                debug!(service = service_key, pid = process.process_id, "Service process found");
                ServiceStatus::Running
            }
            None => ServiceStatus::Stopped,
        }
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
