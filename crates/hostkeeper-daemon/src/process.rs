//! Best-effort snapshots of the process table.
//!
//! Records are read fresh from `/proc` on every call and are stale as soon
//! as they are returned. A process that exits mid-read is treated as
//! absent; nothing here reports an error for it.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::trace;

/// Scheduler state of a process, from the third field of `/proc/<pid>/stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Unknown,
    Running,
    InterruptibleWait,
    UninterruptibleWait,
    Zombie,
    Traced,
    Paging,
}

impl RunState {
    /// Map a state code from the stat file. Matching is case-insensitive.
    pub fn from_code(code: char) -> Self {
        match code.to_ascii_uppercase() {
            'R' => RunState::Running,
            'S' => RunState::InterruptibleWait,
            'D' => RunState::UninterruptibleWait,
            'Z' => RunState::Zombie,
            'T' => RunState::Traced,
            'W' => RunState::Paging,
            _ => RunState::Unknown,
        }
    }
}

/// Snapshot of one process.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ProcessRecord {
    pub process_id: u32,
    pub process_name: String,
    pub run_state: RunState,
    /// Arguments joined with single spaces.
    pub command_line: String,
}

/// Reader over a procfs mount.
#[derive(Debug, Clone)]
pub struct ProcFs {
    root: PathBuf,
}

impl Default for ProcFs {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcFs {
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    /// Read from a procfs-shaped tree rooted elsewhere.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read a process. Never fails: unreadable data yields defaults.
    pub fn read(&self, pid: u32) -> ProcessRecord {
        self.try_read(pid).unwrap_or_else(|| ProcessRecord {
            process_id: pid,
            ..Default::default()
        })
    }

    /// Read a process, returning `None` if its stat file is gone.
    pub fn try_read(&self, pid: u32) -> Option<ProcessRecord> {
        let dir = self.root.join(pid.to_string());
        let stat = match fs::read_to_string(dir.join("stat")) {
            Ok(stat) => stat,
            Err(e) => {
                trace!(pid, error = %e, "Process stat not readable");
                return None;
            }
        };

        let mut record = parse_stat(&stat);
        if record.process_id == 0 {
            record.process_id = pid;
        }
        record.command_line = fs::read(dir.join("cmdline"))
            .map(|raw| parse_cmdline(&raw))
            .unwrap_or_default();

        Some(record)
    }

    /// Lazily enumerate the currently visible processes.
    ///
    /// Process ids are listed once up front; ids that vanish before they
    /// are read are skipped.
    pub fn enumerate(&self) -> impl Iterator<Item = ProcessRecord> + '_ {
        let pids: Vec<u32> = match fs::read_dir(&self.root) {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
                .collect(),
            Err(e) => {
                trace!(root = %self.root.display(), error = %e, "Process table not readable");
                Vec::new()
            }
        };

        pids.into_iter().filter_map(move |pid| self.try_read(pid))
    }

    /// Processes whose name matches `name` exactly.
    pub fn processes_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = ProcessRecord> + 'a {
        self.enumerate().filter(move |p| p.process_name == name)
    }
}

/// Parse the contents of a `/proc/<pid>/stat` file.
///
/// The name is taken between the first `(` and the last `)` since it may
/// itself contain spaces or parentheses.
pub fn parse_stat(stat: &str) -> ProcessRecord {
    let stat = stat.trim();
    let process_id = stat
        .split_whitespace()
        .next()
        .and_then(|field| field.parse().ok())
        .unwrap_or(0);

    let (process_name, rest) = match (stat.find('('), stat.rfind(')')) {
        (Some(open), Some(close)) if open < close => {
            (stat[open + 1..close].to_string(), &stat[close + 1..])
        }
        _ => {
            let mut fields = stat.splitn(3, ' ').skip(1);
            let name = fields.next().unwrap_or_default();
            (name.to_string(), fields.next().unwrap_or_default())
        }
    };

    let run_state = rest
        .split_whitespace()
        .next()
        .and_then(|field| field.chars().next())
        .map(RunState::from_code)
        .unwrap_or_default();

    ProcessRecord {
        process_id,
        process_name,
        run_state,
        command_line: String::new(),
    }
}

/// Join a NUL-separated argument vector with spaces, dropping empties.
pub fn parse_cmdline(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .split('\0')
        .filter(|arg| !arg.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
#[path = "process_tests.rs"]
mod tests;
