//! A panic on a thread outside the runtime faults the host and the thread
//! is parked instead of unwinding.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use async_trait::async_trait;
use hostkeeper_daemon::{
    ExitCode, HostControl, HostSettings, ServiceHandle, ServiceHost, ServiceIdentity,
};

struct ThreadWorker {
    stops: Arc<AtomicUsize>,
    unwound: Arc<AtomicBool>,
}

struct UnwindFlag(Arc<AtomicBool>);

impl Drop for UnwindFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ServiceHandle for ThreadWorker {
    async fn start(&self, _control: Arc<dyn HostControl>) -> bool {
        let flag = UnwindFlag(self.unwound.clone());
        std::thread::spawn(move || {
            let _flag = flag;
            std::thread::sleep(Duration::from_millis(50));
            panic!("background thread exploded");
        });
        true
    }

    async fn stop(&self, _control: Arc<dyn HostControl>) -> bool {
        self.stops.fetch_add(1, Ordering::SeqCst);
        true
    }
}

#[test]
fn test_off_runtime_panic_parks_thread_and_faults_host() {
    let stops = Arc::new(AtomicUsize::new(0));
    let unwound = Arc::new(AtomicBool::new(false));
    let settings = HostSettings::new(ServiceIdentity::new("threaded"))
        .with_listen_timeout(Duration::from_millis(50));
    let host = ServiceHost::new(
        settings,
        ThreadWorker {
            stops: stops.clone(),
            unwound: unwound.clone(),
        },
    );

    // The host gets its own runtime and thread so a hang fails the test
    // instead of blocking the harness.
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .expect("runtime");
        let code = runtime.block_on(host.run());
        let _ = tx.send(code);
    });

    let code = rx
        .recv_timeout(Duration::from_secs(10))
        .expect("host did not finish");

    assert_eq!(code, ExitCode::UnhandledServiceException);
    assert_eq!(stops.load(Ordering::SeqCst), 1);
    // Parked, never unwound.
    assert!(!unwound.load(Ordering::SeqCst));
}
