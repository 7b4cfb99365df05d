//! The run-time driver of a hosted service.
//!
//! [`ServiceHost::run`] starts the workload, waits until a stop is
//! requested (by signal, by [`HostControl::stop`] or by a fault), stops the
//! workload exactly once and returns the process exit code.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::control::{ExitCode, HostControl, ServiceHandle};
use crate::fault::{FaultGuard, managed};
use crate::settings::HostSettings;
use crate::signal::{SignalInjector, SignalKind, SignalRunLoop};

/// Lifecycle phase of the hosted workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServiceRunState {
    NotStarted = 0,
    Running = 1,
    StopRequested = 2,
    Stopped = 3,
    Faulted = 4,
}

impl From<u8> for ServiceRunState {
    fn from(v: u8) -> Self {
        match v {
            0 => ServiceRunState::NotStarted,
            1 => ServiceRunState::Running,
            2 => ServiceRunState::StopRequested,
            3 => ServiceRunState::Stopped,
            _ => ServiceRunState::Faulted,
        }
    }
}

impl ServiceRunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ServiceRunState::Stopped | ServiceRunState::Faulted)
    }
}

/// State shared between the run loop, signal handlers, the fault hook and
/// workload-held control handles.
struct HostShared {
    service: String,
    state: AtomicU8,
    exit_code: AtomicU8,
    stop: watch::Sender<bool>,
}

impl HostShared {
    fn state(&self) -> ServiceRunState {
        ServiceRunState::from(self.state.load(Ordering::SeqCst))
    }

    fn transition(&self, from: ServiceRunState, to: ServiceRunState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Move to a terminal state unless one was already reached.
    fn finish(&self, to: ServiceRunState) {
        let _ = self
            .state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (!ServiceRunState::from(current).is_terminal()).then_some(to as u8)
            });
    }

    fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.exit_code.load(Ordering::SeqCst))
    }

    fn set_exit_code(&self, code: ExitCode) {
        self.exit_code.store(code as u8, Ordering::SeqCst);
    }

    fn stop_requested(&self) -> bool {
        *self.stop.borrow()
    }

    /// Set-once stop signal; returns whether this call set it.
    fn request_stop(&self, source: &str) -> bool {
        let first = self.stop.send_if_modified(|stopped| {
            if *stopped {
                false
            } else {
                *stopped = true;
                true
            }
        });

        if first {
            info!(service = %self.service, source, "Stop requested");
            self.transition(ServiceRunState::Running, ServiceRunState::StopRequested);
        } else {
            debug!(service = %self.service, source, "Stop already requested");
        }
        first
    }

    fn fault(&self, message: String) {
        error!(
            fatal = true,
            service = %self.service,
            fault = %message,
            "Service faulted"
        );
        self.set_exit_code(ExitCode::UnhandledServiceException);
        self.finish(ServiceRunState::Faulted);
        self.request_stop("fault");
    }
}

impl HostControl for HostShared {
    fn stop(&self) {
        self.request_stop("control");
    }
}

/// Hosts one workload for the lifetime of the process.
pub struct ServiceHost {
    settings: HostSettings,
    service: Arc<dyn ServiceHandle>,
    shared: Arc<HostShared>,
    signals: SignalRunLoop,
}

impl ServiceHost {
    pub fn new(settings: HostSettings, service: impl ServiceHandle) -> Self {
        Self::with_handle(settings, Arc::new(service))
    }

    pub fn with_handle(settings: HostSettings, service: Arc<dyn ServiceHandle>) -> Self {
        let (stop, _) = watch::channel(false);
        let shared = Arc::new(HostShared {
            service: settings.identity.key(),
            state: AtomicU8::new(ServiceRunState::NotStarted as u8),
            exit_code: AtomicU8::new(ExitCode::Ok as u8),
            stop,
        });
        let signals = SignalRunLoop::new().with_listen_timeout(settings.listen_timeout);

        Self {
            settings,
            service,
            shared,
            signals,
        }
    }

    /// Handle that can stop the host from outside the workload.
    pub fn control(&self) -> Arc<dyn HostControl> {
        self.shared.clone()
    }

    /// Deliver synthetic signals to the host's signal loop.
    pub fn signal_injector(&self) -> SignalInjector {
        self.signals.injector()
    }

    pub fn state(&self) -> ServiceRunState {
        self.shared.state()
    }

    pub fn settings(&self) -> &HostSettings {
        &self.settings
    }

    /// Drive the workload from start to stop and return the exit code.
    pub async fn run(mut self) -> ExitCode {
        let service = self.settings.identity.key();
        let shared = self.shared.clone();

        let _fault_guard = self.settings.fault_handler.then(|| {
            let shared = shared.clone();
            FaultGuard::install(Arc::new(move |message| shared.fault(message)))
        });

        if let Some(dir) = &self.settings.working_directory {
            match std::env::set_current_dir(dir) {
                Ok(()) => debug!(dir = %dir.display(), "Changed working directory"),
                Err(e) => warn!(dir = %dir.display(), error = %e, "Cannot change working directory"),
            }
        }

        if let Err(e) = self.arm_signals() {
            error!(fatal = true, service = %service, error = %e, "Cannot listen for signals");
            shared.set_exit_code(ExitCode::AbnormalExit);
            shared.finish(ServiceRunState::Faulted);
            return self.teardown().await;
        }

        info!(service = %service, "Starting service");
        let control = self.control();
        let handle = self.service.clone();
        let started = tokio::spawn(managed(async move { handle.start(control).await })).await;

        match started {
            Ok(true) => {
                shared.transition(ServiceRunState::NotStarted, ServiceRunState::Running);
                if shared.stop_requested() {
                    shared.transition(ServiceRunState::Running, ServiceRunState::StopRequested);
                }
                info!(service = %service, "Service started");
            }
            Ok(false) => {
                error!(fatal = true, service = %service, "Service did not start successfully");
                shared.set_exit_code(ExitCode::AbnormalExit);
                shared.finish(ServiceRunState::Faulted);
                return self.teardown().await;
            }
            Err(e) => {
                error!(fatal = true, service = %service, error = %e, "Service start failed");
                shared.set_exit_code(ExitCode::AbnormalExit);
                shared.finish(ServiceRunState::Faulted);
                return self.teardown().await;
            }
        }

        let mut stop = shared.stop.subscribe();
        let _ = stop.wait_for(|stopped| *stopped).await;

        info!(service = %service, "Stopping service");
        let control = self.control();
        let handle = self.service.clone();
        let stopped = tokio::spawn(managed(async move { handle.stop(control).await })).await;

        match stopped {
            Ok(true) => info!(service = %service, "Service stopped"),
            Ok(false) => error!(service = %service, "Service did not stop successfully"),
            Err(e) => error!(service = %service, error = %e, "Service stop failed"),
        }
        shared.finish(ServiceRunState::Stopped);

        self.teardown().await
    }

    fn arm_signals(&mut self) -> Result<(), crate::error::DaemonError> {
        for kind in [SignalKind::Interrupt, SignalKind::Terminate] {
            let shared = self.shared.clone();
            self.signals.subscribe(kind, move || {
                shared.request_stop(&kind.to_string());
                Ok(())
            })?;
        }
        self.signals.listen()
    }

    async fn teardown(mut self) -> ExitCode {
        self.signals.stop();
        self.signals.join().await;

        let code = self.shared.exit_code();
        info!(
            service = %self.settings.identity,
            exit_code = code.code(),
            state = ?self.shared.state(),
            "Service host exiting"
        );
        code
    }
}

#[cfg(test)]
#[path = "host_tests.rs"]
mod tests;
