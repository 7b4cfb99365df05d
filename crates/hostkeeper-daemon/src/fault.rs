//! Process-wide fault handling.
//!
//! [`FaultGuard`] routes panics to the host for the lifetime of a hosted
//! service. A panic that escapes the workload is logged as fatal and
//! reported to the host, which then stops with
//! [`ExitCode::UnhandledServiceException`](crate::control::ExitCode).
//! Panics raised inside an [`isolated`] or [`managed`] scope are expected
//! to be caught by their caller and are not treated as faults.
//!
//! A faulting thread that does not belong to the tokio runtime is parked
//! forever so the process exits through the host's own teardown.

use std::any::Any;
use std::future::Future;
use std::panic::{self, PanicHookInfo};
use std::sync::Arc;
use std::sync::Once;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::{debug, error};

type PanicHook = Box<dyn Fn(&PanicHookInfo<'_>) + Send + Sync + 'static>;

/// Callback invoked with the panic message of an unhandled fault.
pub type FaultCallback = Arc<dyn Fn(String) + Send + Sync>;

tokio::task_local! {
    static ISOLATED: ();
}

/// Run a future in a scope whose panics are handled by the caller.
pub async fn managed<F: Future>(future: F) -> F::Output {
    ISOLATED.scope((), future).await
}

/// Run a closure in a scope whose panics are handled by the caller.
pub fn isolated<R>(f: impl FnOnce() -> R) -> R {
    ISOLATED.sync_scope((), f)
}

fn in_isolated_scope() -> bool {
    ISOLATED.try_with(|_| ()).is_ok()
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn hook_message(info: &PanicHookInfo<'_>) -> String {
    let message = panic_message(info.payload());
    match info.location() {
        Some(location) => format!("{} at {}", message, location),
        None => message,
    }
}

static HOOK: Once = Once::new();
static NEXT_GUARD: AtomicU64 = AtomicU64::new(1);
static CURRENT: RwLock<Option<(u64, FaultCallback)>> = parking_lot::const_rwlock(None);

/// Routes unhandled panics to a callback while alive.
///
/// The process panic hook is installed once and never replaced. Dropping
/// the guard only detaches the callback, so a thread parked inside the
/// hook cannot block teardown.
pub struct FaultGuard {
    id: u64,
}

impl FaultGuard {
    pub fn install(on_fault: FaultCallback) -> Self {
        HOOK.call_once(install_process_hook);

        let id = NEXT_GUARD.fetch_add(1, Ordering::Relaxed);
        *CURRENT.write() = Some((id, on_fault));
        debug!("Fault handler installed");
        Self { id }
    }
}

impl Drop for FaultGuard {
    fn drop(&mut self) {
        let mut current = CURRENT.write();
        if current.as_ref().is_some_and(|(id, _)| *id == self.id) {
            *current = None;
            debug!("Fault handler removed");
        }
    }
}

fn install_process_hook() {
    let previous: PanicHook = panic::take_hook();

    panic::set_hook(Box::new(move |info| {
        if in_isolated_scope() {
            debug!(panic = %hook_message(info), "Panic in isolated scope");
            return;
        }

        previous(info);

        // Clone out so the lock is not held while parked.
        let Some(on_fault) = CURRENT.read().as_ref().map(|(_, cb)| cb.clone()) else {
            return;
        };

        let message = hook_message(info);
        error!(fatal = true, panic = %message, "Unhandled service fault");
        on_fault(message);

        if tokio::runtime::Handle::try_current().is_err() {
            park_forever();
        }
    }));
}

fn park_forever() -> ! {
    loop {
        std::thread::park();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_from_str() {
        let payload: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(payload.as_ref()), "static message");
    }

    #[test]
    fn test_panic_message_from_string() {
        let payload: Box<dyn Any + Send> = Box::new(format!("code {}", 7));
        assert_eq!(panic_message(payload.as_ref()), "code 7");
    }

    #[test]
    fn test_panic_message_unknown() {
        let payload: Box<dyn Any + Send> = Box::new(42u32);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }

    #[test]
    fn test_isolated_scope_is_visible() {
        assert!(!in_isolated_scope());
        assert!(isolated(in_isolated_scope));
    }

    #[tokio::test]
    async fn test_managed_scope_is_visible() {
        assert!(managed(async { in_isolated_scope() }).await);
        assert!(!in_isolated_scope());
    }
}
