//! Demonstration workload hosted by `hostkeeper run`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use hostkeeper_daemon::{HostControl, ServiceHandle};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default heartbeat period when `--interval` is not given.
pub(crate) const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// Logs a heartbeat every `interval` until stopped.
pub(crate) struct HeartbeatService {
    name: String,
    interval: Duration,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    beats: Arc<AtomicU64>,
}

impl HeartbeatService {
    pub(crate) fn new(name: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            interval,
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
            beats: Arc::new(AtomicU64::new(0)),
        }
    }

    pub(crate) fn beats(&self) -> u64 {
        self.beats.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServiceHandle for HeartbeatService {
    async fn start(&self, _control: Arc<dyn HostControl>) -> bool {
        if self.interval.is_zero() {
            warn!(service = %self.name, "Heartbeat interval must be greater than zero");
            return false;
        }

        let mut slot = self.task.lock();
        if slot.is_some() {
            return true;
        }

        let name = self.name.clone();
        let interval = self.interval;
        let cancel = self.cancel.clone();
        let beats = self.beats.clone();

        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let count = beats.fetch_add(1, Ordering::SeqCst) + 1;
                        info!(service = %name, beat = count, "Heartbeat");
                    }
                }
            }
            debug!(service = %name, "Heartbeat loop finished");
        }));

        info!(service = %self.name, interval_secs = interval.as_secs_f64(), "Heartbeat service started");
        true
    }

    async fn stop(&self, _control: Arc<dyn HostControl>) -> bool {
        self.cancel.cancel();
        let task = self.task.lock().take();
        let clean = match task {
            Some(task) => task.await.is_ok(),
            None => true,
        };
        info!(service = %self.name, beats = self.beats(), "Heartbeat service stopped");
        clean
    }
}
