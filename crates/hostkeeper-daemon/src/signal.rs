//! Signal-driven run loop.
//!
//! Handlers are registered per [`SignalKind`] before [`SignalRunLoop::listen`]
//! is called. The loop runs on its own tokio task and dispatches each
//! received signal to its handlers sequentially, in registration order.
//! A failing or panicking handler is logged and skipped. After an
//! interrupt or terminate signal has been dispatched the loop exits; OS
//! signals arriving after that are logged and ignored until [`SignalRunLoop::stop`].

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{BoxStream, SelectAll, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::DaemonError;
use crate::fault::{isolated, panic_message};

/// Error type returned by signal handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A registered signal handler.
pub type SignalHandlerFn = Arc<dyn Fn() -> Result<(), HandlerError> + Send + Sync>;

/// Default interval at which an idle loop re-checks its stop flag.
pub const DEFAULT_LISTEN_TIMEOUT: Duration = Duration::from_secs(60);

/// Signals the loop can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Interrupt,
    Terminate,
    Hangup,
    Quit,
    User1,
    User2,
}

impl SignalKind {
    /// Whether receiving this signal ends the loop.
    pub fn ends_loop(self) -> bool {
        matches!(self, SignalKind::Interrupt | SignalKind::Terminate)
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalKind::Interrupt => write!(f, "SIGINT"),
            SignalKind::Terminate => write!(f, "SIGTERM"),
            SignalKind::Hangup => write!(f, "SIGHUP"),
            SignalKind::Quit => write!(f, "SIGQUIT"),
            SignalKind::User1 => write!(f, "SIGUSR1"),
            SignalKind::User2 => write!(f, "SIGUSR2"),
        }
    }
}

/// Delivers synthetic signals to a loop, as if the OS had raised them.
#[derive(Clone)]
pub struct SignalInjector {
    sender: mpsc::UnboundedSender<SignalKind>,
}

impl SignalInjector {
    /// Returns `false` once the loop has exited.
    pub fn send(&self, kind: SignalKind) -> bool {
        self.sender.send(kind).is_ok()
    }
}

type Handlers = HashMap<SignalKind, Vec<SignalHandlerFn>>;

type OsSignals = SelectAll<BoxStream<'static, SignalKind>>;

pub struct SignalRunLoop {
    handlers: Handlers,
    listen_timeout: Duration,
    cancel: CancellationToken,
    injector: SignalInjector,
    injected: Option<mpsc::UnboundedReceiver<SignalKind>>,
    task: Option<JoinHandle<()>>,
}

impl Default for SignalRunLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalRunLoop {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            handlers: HashMap::new(),
            listen_timeout: DEFAULT_LISTEN_TIMEOUT,
            cancel: CancellationToken::new(),
            injector: SignalInjector { sender },
            injected: Some(receiver),
            task: None,
        }
    }

    pub fn with_listen_timeout(mut self, timeout: Duration) -> Self {
        self.listen_timeout = timeout;
        self
    }

    /// Register a handler. Fails once the loop is listening.
    pub fn subscribe<F>(&mut self, kind: SignalKind, handler: F) -> Result<(), DaemonError>
    where
        F: Fn() -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        if self.is_listening() {
            return Err(DaemonError::AlreadyListening);
        }
        self.handlers.entry(kind).or_default().push(Arc::new(handler));
        Ok(())
    }

    pub fn injector(&self) -> SignalInjector {
        self.injector.clone()
    }

    /// Whether `listen` has been called.
    pub fn is_listening(&self) -> bool {
        self.injected.is_none()
    }

    /// Whether the loop task has exited.
    pub fn is_finished(&self) -> bool {
        self.is_listening() && self.task.as_ref().is_none_or(|task| task.is_finished())
    }

    /// Start the background listener. May be called once per instance.
    pub fn listen(&mut self) -> Result<(), DaemonError> {
        let Some(injected) = self.injected.take() else {
            return Err(DaemonError::AlreadyListening);
        };

        let mut os_signals: OsSignals = SelectAll::new();
        for kind in self.handlers.keys().copied() {
            if let Some(stream) = os_signal_stream(kind)? {
                os_signals.push(stream);
            }
        }

        let injected = UnboundedReceiverStream::new(injected);
        let handlers = std::mem::take(&mut self.handlers);
        let cancel = self.cancel.clone();
        let listen_timeout = self.listen_timeout;

        self.task = Some(tokio::spawn(async move {
            run_loop(injected, os_signals, handlers, cancel, listen_timeout).await;
        }));

        info!("Signal loop listening");
        Ok(())
    }

    /// Ask the loop to exit. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Wait for the loop task to exit.
    pub async fn join(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Signal loop task failed");
            }
        }
    }
}

impl Drop for SignalRunLoop {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_loop(
    mut injected: UnboundedReceiverStream<SignalKind>,
    mut os_signals: OsSignals,
    handlers: Handlers,
    cancel: CancellationToken,
    listen_timeout: Duration,
) {
    loop {
        let kind = tokio::select! {
            _ = cancel.cancelled() => break,
            Some(kind) = injected.next() => kind,
            Some(kind) = os_signals.next(), if !os_signals.is_empty() => kind,
            _ = tokio::time::sleep(listen_timeout) => {
                trace!("Signal loop idle");
                continue;
            }
        };

        dispatch(&handlers, kind);
        if kind.ends_loop() {
            if !os_signals.is_empty() {
                tokio::spawn(ignore_late_signals(os_signals, cancel));
            }
            break;
        }
    }
    debug!("Signal loop exited");
}

/// OS signal registrations outlive the loop; keep reading them until
/// teardown so a repeated termination signal is reported, not lost.
async fn ignore_late_signals(mut os_signals: OsSignals, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = os_signals.next() => match next {
                Some(kind) => warn!(signal = %kind, "Signal loop already exited, ignoring signal"),
                None => break,
            },
        }
    }
}

fn dispatch(handlers: &Handlers, kind: SignalKind) {
    info!(signal = %kind, "Received signal");

    let Some(list) = handlers.get(&kind) else {
        return;
    };

    for (index, handler) in list.iter().enumerate() {
        match catch_unwind(AssertUnwindSafe(|| isolated(|| handler()))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(signal = %kind, handler = index, error = %e, "Signal handler failed"),
            Err(payload) => warn!(
                signal = %kind,
                handler = index,
                panic = %panic_message(payload.as_ref()),
                "Signal handler panicked"
            ),
        }
    }
}

#[cfg(unix)]
fn os_signal_stream(kind: SignalKind) -> Result<Option<BoxStream<'static, SignalKind>>, DaemonError> {
    use tokio::signal::unix::{SignalKind as UnixKind, signal};
    use tokio_stream::wrappers::SignalStream;

    let unix_kind = match kind {
        SignalKind::Interrupt => UnixKind::interrupt(),
        SignalKind::Terminate => UnixKind::terminate(),
        SignalKind::Hangup => UnixKind::hangup(),
        SignalKind::Quit => UnixKind::quit(),
        SignalKind::User1 => UnixKind::user_defined1(),
        SignalKind::User2 => UnixKind::user_defined2(),
    };

    let receiver = signal(unix_kind).map_err(|e| DaemonError::SignalSetup(format!("{}: {}", kind, e)))?;
    Ok(Some(SignalStream::new(receiver).map(move |()| kind).boxed()))
}

#[cfg(not(unix))]
fn os_signal_stream(kind: SignalKind) -> Result<Option<BoxStream<'static, SignalKind>>, DaemonError> {
    // Only Ctrl+C is available off unix.
    if kind != SignalKind::Interrupt {
        return Ok(None);
    }
    let stream = futures::stream::unfold((), |()| async {
        tokio::signal::ctrl_c()
            .await
            .ok()
            .map(|()| (SignalKind::Interrupt, ()))
    });
    Ok(Some(stream.boxed()))
}

#[cfg(test)]
#[path = "signal_tests.rs"]
mod tests;
