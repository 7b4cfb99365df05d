use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::*;

fn counter() -> (Arc<AtomicUsize>, impl Fn() -> Result<(), HandlerError> + Send + Sync + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = count.clone();
    (count, move || {
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
}

async fn wait_for_exit(run_loop: &mut SignalRunLoop) {
    tokio::time::timeout(Duration::from_secs(5), run_loop.join())
        .await
        .expect("signal loop did not exit");
}

#[test]
fn test_signal_display() {
    assert_eq!(SignalKind::Interrupt.to_string(), "SIGINT");
    assert_eq!(SignalKind::Terminate.to_string(), "SIGTERM");
    assert_eq!(SignalKind::Hangup.to_string(), "SIGHUP");
}

#[test]
fn test_only_interrupt_and_terminate_end_the_loop() {
    assert!(SignalKind::Interrupt.ends_loop());
    assert!(SignalKind::Terminate.ends_loop());
    assert!(!SignalKind::Hangup.ends_loop());
    assert!(!SignalKind::User1.ends_loop());
}

#[tokio::test]
async fn test_handlers_run_in_registration_order() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let mut run_loop = SignalRunLoop::new();

    for label in ["first", "second"] {
        let order = order.clone();
        run_loop
            .subscribe(SignalKind::Hangup, move || {
                order.lock().unwrap().push(label);
                Ok(())
            })
            .unwrap();
    }

    run_loop.listen().unwrap();
    let injector = run_loop.injector();
    injector.send(SignalKind::Hangup);
    injector.send(SignalKind::Terminate);
    wait_for_exit(&mut run_loop).await;

    assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
}

#[tokio::test]
async fn test_failing_and_panicking_handlers_are_isolated() {
    let (count, handler) = counter();
    let mut run_loop = SignalRunLoop::new();
    run_loop
        .subscribe(SignalKind::User1, || Err("handler failed".into()))
        .unwrap();
    run_loop
        .subscribe(SignalKind::User1, || panic!("handler panicked"))
        .unwrap();
    run_loop.subscribe(SignalKind::User1, handler).unwrap();

    run_loop.listen().unwrap();
    let injector = run_loop.injector();
    injector.send(SignalKind::User1);
    injector.send(SignalKind::User1);
    injector.send(SignalKind::Interrupt);
    wait_for_exit(&mut run_loop).await;

    assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_terminate_dispatches_then_exits() {
    let (count, handler) = counter();
    let mut run_loop = SignalRunLoop::new();
    run_loop.subscribe(SignalKind::Terminate, handler).unwrap();
    run_loop.listen().unwrap();

    run_loop.injector().send(SignalKind::Terminate);
    wait_for_exit(&mut run_loop).await;

    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(run_loop.is_finished());
    assert!(!run_loop.injector().send(SignalKind::Terminate));
}

#[tokio::test]
async fn test_subscribe_after_listen_is_rejected() {
    let mut run_loop = SignalRunLoop::new();
    run_loop.listen().unwrap();

    let result = run_loop.subscribe(SignalKind::Hangup, || Ok(()));
    assert!(matches!(result, Err(DaemonError::AlreadyListening)));
    run_loop.stop();
}

#[tokio::test]
async fn test_listen_twice_is_rejected() {
    let mut run_loop = SignalRunLoop::new();
    run_loop.listen().unwrap();
    assert!(matches!(run_loop.listen(), Err(DaemonError::AlreadyListening)));
    run_loop.stop();
}

#[tokio::test]
async fn test_stop_ends_an_idle_loop() {
    let mut run_loop = SignalRunLoop::new().with_listen_timeout(Duration::from_millis(10));
    run_loop.listen().unwrap();
    assert!(run_loop.is_listening());
    assert!(!run_loop.is_finished());

    tokio::time::sleep(Duration::from_millis(30)).await;
    run_loop.stop();
    run_loop.stop();
    wait_for_exit(&mut run_loop).await;
    assert!(run_loop.is_finished());
}

#[tokio::test]
async fn test_unsubscribed_signal_is_ignored() {
    let (count, handler) = counter();
    let mut run_loop = SignalRunLoop::new();
    run_loop.subscribe(SignalKind::Hangup, handler).unwrap();
    run_loop.listen().unwrap();

    let injector = run_loop.injector();
    injector.send(SignalKind::User2);
    injector.send(SignalKind::Terminate);
    wait_for_exit(&mut run_loop).await;

    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn test_os_signal_after_exit_is_ignored_until_stop() {
    use nix::sys::signal::{Signal, raise};

    let (count, handler) = counter();
    let mut run_loop = SignalRunLoop::new();
    run_loop.subscribe(SignalKind::User2, handler).unwrap();
    run_loop.subscribe(SignalKind::Terminate, || Ok(())).unwrap();
    run_loop.listen().unwrap();

    run_loop.injector().send(SignalKind::Terminate);
    wait_for_exit(&mut run_loop).await;
    assert!(run_loop.is_finished());

    // Drained and logged, never dispatched.
    raise(Signal::SIGUSR2).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(count.load(Ordering::SeqCst), 0);

    run_loop.stop();
}
