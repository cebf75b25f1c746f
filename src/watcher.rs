//! Hybrid event/poll source feeding the reconciler: an engine event
//! subscription, independent container and config pollers, and a
//! fallback poller that runs only while the event stream is failed.

use crate::config::file::{FileSource, files_changed};
use crate::config::labels::ENABLED_LABEL;
use crate::config::model::EffectiveIntervals;
use crate::core::reconcile::ReconcileRequest;
use crate::provider::ContainerProvider;
use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

const RELEVANT_ACTIONS: [&str; 5] = ["start", "die", "destroy", "rename", "update"];
const EVENT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

pub struct Watcher {
    provider: Arc<dyn ContainerProvider>,
    reconcile_tx: mpsc::Sender<ReconcileRequest>,
    shutdown: broadcast::Sender<()>,
    intervals: EffectiveIntervals,
    file_source: Option<FileSource>,
    events_failed: AtomicBool,
    fallback_active: parking_lot::Mutex<bool>,
    recovered: tokio::sync::Notify,
}

impl Watcher {
    pub fn new(
        provider: Arc<dyn ContainerProvider>,
        reconcile_tx: mpsc::Sender<ReconcileRequest>,
        shutdown: broadcast::Sender<()>,
        intervals: EffectiveIntervals,
        file_source: Option<FileSource>,
    ) -> Arc<Self> {
        Arc::new(Watcher {
            provider,
            reconcile_tx,
            shutdown,
            intervals,
            file_source,
            events_failed: AtomicBool::new(false),
            fallback_active: parking_lot::Mutex::new(false),
            recovered: tokio::sync::Notify::new(),
        })
    }

    pub fn spawn(self: &Arc<Self>) {
        tokio::spawn(event_loop(self.clone()));
        if !self.intervals.container.is_zero() {
            tokio::spawn(container_poller(self.clone()));
        }
        if !self.intervals.config.is_zero() && self.file_source.is_some() {
            tokio::spawn(config_poller(self.clone()));
        }
    }

    pub fn events_failed(&self) -> bool {
        self.events_failed.load(Ordering::SeqCst)
    }

    pub fn fallback_active(&self) -> bool {
        *self.fallback_active.lock()
    }

    /// Starts the fallback poller if it is not already running. A second
    /// start while one is active is a no-op.
    fn start_fallback(self: &Arc<Self>) {
        if self.intervals.fallback.is_zero() {
            return;
        }
        {
            let mut active = self.fallback_active.lock();
            if *active {
                return;
            }
            *active = true;
        }

        let watcher = self.clone();
        tokio::spawn(async move {
            let mut shutdown = watcher.shutdown.subscribe();
            info!(period = ?watcher.intervals.fallback, "event stream failed, starting fallback poller");
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = watcher.recovered.notified() => break,
                    _ = tokio::time::sleep(watcher.intervals.fallback) => {
                        if !watcher.events_failed.load(Ordering::SeqCst) {
                            break;
                        }
                        let _ = watcher
                            .reconcile_tx
                            .send(ReconcileRequest::Containers)
                            .await;
                    }
                }
            }
            *watcher.fallback_active.lock() = false;
            info!("fallback poller stopped");
        });
    }
}

async fn event_loop(watcher: Arc<Watcher>) {
    let mut shutdown = watcher.shutdown.subscribe();
    let filter = format!("{ENABLED_LABEL}=true");

    loop {
        match watcher.provider.events(Some(&filter)).await {
            Ok(mut stream) => {
                loop {
                    tokio::select! {
                        _ = shutdown.recv() => return,
                        item = stream.next() => match item {
                            Some(Ok(event)) => {
                                if watcher.events_failed.swap(false, Ordering::SeqCst) {
                                    info!("event stream recovered");
                                    watcher.recovered.notify_waiters();
                                }
                                if RELEVANT_ACTIONS.contains(&event.action.as_str()) {
                                    debug!(
                                        action = %event.action,
                                        container = event.container_name.as_deref().unwrap_or(""),
                                        "container event"
                                    );
                                    let _ = watcher
                                        .reconcile_tx
                                        .send(ReconcileRequest::Containers)
                                        .await;
                                }
                            }
                            Some(Err(err)) => {
                                warn!(error = %err, "event stream error");
                                break;
                            }
                            None => {
                                warn!("event stream ended");
                                break;
                            }
                        },
                    }
                }
            }
            Err(err) => warn!(error = %err, "event subscription failed"),
        }

        watcher.events_failed.store(true, Ordering::SeqCst);
        watcher.start_fallback();
        tokio::select! {
            _ = shutdown.recv() => return,
            _ = tokio::time::sleep(EVENT_RECONNECT_DELAY) => {}
        }
    }
}

async fn container_poller(watcher: Arc<Watcher>) {
    let mut shutdown = watcher.shutdown.subscribe();
    loop {
        tokio::select! {
            _ = shutdown.recv() => return,
            _ = tokio::time::sleep(watcher.intervals.container) => {
                debug!("container poll tick");
                let _ = watcher.reconcile_tx.send(ReconcileRequest::Containers).await;
            }
        }
    }
}

async fn config_poller(watcher: Arc<Watcher>) {
    let source = watcher.file_source.clone().expect("config poller needs a file source");
    let mut shutdown = watcher.shutdown.subscribe();
    let mut last = source.stat();
    loop {
        tokio::select! {
            _ = shutdown.recv() => return,
            _ = tokio::time::sleep(watcher.intervals.config) => {
                let current = source.stat();
                if files_changed(&current, &last) {
                    info!("config file change detected");
                    let _ = watcher.reconcile_tx.send(ReconcileRequest::FilesChanged).await;
                }
                last = current;
            }
        }
    }
}
