//! LSB init script generation.

use std::path::Path;

/// Facilities required when the service declares no dependencies.
pub const DEFAULT_DEPENDENCIES: [&str; 4] = ["$local_fs", "$network", "$remote_fs", "$syslog"];

/// Values substituted into the generated init script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LsbScript {
    pub service_name: String,
    pub dependencies: Vec<String>,
    pub display_name: String,
    pub description: String,
    pub service_dir: String,
    pub service_exe: String,
    pub service_args: String,
    pub service_user: String,
    pub pid_dir: String,
}

impl LsbScript {
    /// Split an executable path into its directory and file name.
    pub fn locate(executable: &Path) -> (String, String) {
        let dir = executable
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let exe = executable
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        (dir, exe)
    }

    fn dependencies(&self) -> String {
        let deps: Vec<&str> = self
            .dependencies
            .iter()
            .map(|d| d.trim())
            .filter(|d| !d.is_empty())
            .collect();
        if deps.is_empty() {
            DEFAULT_DEPENDENCIES.join(" ")
        } else {
            deps.join(" ")
        }
    }

    /// Launch line as a double-quoted assignment value. The script later
    /// runs `eval "set -- $SERVICE_ARGS"`, so `$` and backticks inside the
    /// quoted values are escaped once more for that second parse.
    fn service_args(&self) -> String {
        let for_eval = self
            .service_args
            .trim()
            .replace('$', "\\$")
            .replace('`', "\\`");
        double_quoted(&for_eval)
    }

    /// Render the script with Unix line endings.
    pub fn render(&self) -> String {
        let name = double_quoted(&self.service_name);
        let deps = self.dependencies();
        let mut script = String::new();

        script.push_str("#!/bin/sh\n");
        script.push_str("### BEGIN INIT INFO\n");
        script.push_str(&format!("# Provides:          {}\n", name));
        script.push_str(&format!("# Required-Start:    {}\n", deps));
        script.push_str(&format!("# Required-Stop:     {}\n", deps));
        script.push_str("# Default-Start:     2 3 4 5\n");
        script.push_str("# Default-Stop:      0 1 6\n");
        script.push_str(&format!("# Short-Description: {}\n", self.display_name));
        script.push_str(&format!("# Description:       {}\n", self.description));
        script.push_str("### END INIT INFO\n\n");

        script.push_str(&format!("SERVICE_NAME=\"{}\"\n", name));
        script.push_str(&format!("SERVICE_DIR=\"{}\"\n", double_quoted(&self.service_dir)));
        script.push_str(&format!("SERVICE_EXE=\"{}\"\n", double_quoted(&self.service_exe)));
        script.push_str(&format!("SERVICE_ARGS=\"{}\"\n", self.service_args()));
        script.push_str(&format!("SERVICE_USER=\"{}\"\n", double_quoted(&self.service_user)));
        script.push_str(&format!("PID_FILE=\"{}/$SERVICE_NAME.pid\"\n\n", self.pid_dir));

        script.push_str(BODY);
        script.replace("\r\n", "\n")
    }
}

/// Escape a value for use between double quotes in `sh`.
fn double_quoted(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '"' | '$' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

const BODY: &str = r#". /lib/lsb/init-functions

do_start() {
    eval "set -- $SERVICE_ARGS"
    start-stop-daemon --start --quiet --background \
        --make-pidfile --pidfile "$PID_FILE" \
        --chuid "$SERVICE_USER" --chdir "$SERVICE_DIR" \
        --exec "$SERVICE_DIR/$SERVICE_EXE" -- "$@"
}

do_stop() {
    start-stop-daemon --stop --quiet --retry TERM/30/KILL/5 \
        --pidfile "$PID_FILE" --remove-pidfile
}

case "$1" in
    start)
        log_daemon_msg "Starting $SERVICE_NAME"
        do_start
        log_end_msg $?
        ;;
    stop)
        log_daemon_msg "Stopping $SERVICE_NAME"
        do_stop
        log_end_msg $?
        ;;
    restart|force-reload)
        do_stop
        do_start
        ;;
    status)
        status_of_proc -p "$PID_FILE" "$SERVICE_DIR/$SERVICE_EXE" "$SERVICE_NAME"
        exit $?
        ;;
    *)
        echo "Usage: $0 {start|stop|restart|force-reload|status}" >&2
        exit 3
        ;;
esac

exit 0
"#;
