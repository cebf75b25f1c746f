//! In-memory provider for tests: scripted containers, configurable exec
//! latency and a scriptable event stream.

use super::{
    ContainerEvent, ContainerInfo, ContainerProvider, ContainerSpec, EventStream, ExecSpec,
    OutputChunk, OutputStream, ProviderError, ServiceSpec,
};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use parking_lot::Mutex;
use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

/// One scripted response to an `events()` subscription.
pub enum EventsBehavior {
    /// The subscription itself fails.
    FailSubscribe,
    /// A live stream fed by the test through the given receiver.
    Stream(tokio::sync::mpsc::UnboundedReceiver<Result<ContainerEvent, ProviderError>>),
}

#[derive(Default)]
pub struct FakeProvider {
    containers: Mutex<Vec<ContainerInfo>>,
    exec_delay: Mutex<Duration>,
    exec_exit: AtomicI64,
    exec_calls: AtomicUsize,
    list_calls: AtomicUsize,
    events_calls: AtomicUsize,
    event_behaviors: Mutex<VecDeque<EventsBehavior>>,
    ping_ok: AtomicBool,
    missing_images: Mutex<BTreeSet<String>>,
    pulled: Mutex<Vec<String>>,
    created: Mutex<Vec<ContainerSpec>>,
    removed: Mutex<Vec<String>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        let fake = FakeProvider::default();
        fake.ping_ok.store(true, Ordering::SeqCst);
        fake
    }

    pub fn set_containers(&self, containers: Vec<ContainerInfo>) {
        *self.containers.lock() = containers;
    }

    pub fn set_exec_delay(&self, delay: Duration) {
        *self.exec_delay.lock() = delay;
    }

    pub fn set_exec_exit(&self, code: i64) {
        self.exec_exit.store(code, Ordering::SeqCst);
    }

    pub fn set_ping_ok(&self, ok: bool) {
        self.ping_ok.store(ok, Ordering::SeqCst);
    }

    pub fn mark_image_missing(&self, image: &str) {
        self.missing_images.lock().insert(image.to_string());
    }

    pub fn push_events(&self, behavior: EventsBehavior) {
        self.event_behaviors.lock().push_back(behavior);
    }

    pub fn exec_count(&self) -> usize {
        self.exec_calls.load(Ordering::SeqCst)
    }

    pub fn list_count(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn events_count(&self) -> usize {
        self.events_calls.load(Ordering::SeqCst)
    }

    pub fn pulled(&self) -> Vec<String> {
        self.pulled.lock().clone()
    }

    pub fn created(&self) -> Vec<ContainerSpec> {
        self.created.lock().clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().clone()
    }
}

#[async_trait]
impl ContainerProvider for FakeProvider {
    async fn ping(&self) -> Result<(), ProviderError> {
        if self.ping_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ProviderError::Transient("fake engine down".to_string()))
        }
    }

    async fn list_containers(
        &self,
        label_filter: Option<&str>,
    ) -> Result<Vec<ContainerInfo>, ProviderError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let containers = self.containers.lock().clone();
        Ok(match label_filter.and_then(|f| f.split_once('=')) {
            Some((key, value)) => containers
                .into_iter()
                .filter(|c| c.labels.get(key).map(String::as_str) == Some(value))
                .collect(),
            None => containers,
        })
    }

    async fn container_running(&self, name: &str) -> Result<bool, ProviderError> {
        Ok(self
            .containers
            .lock()
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.running)
            // Unknown containers count as running so tests need not
            // script every target.
            .unwrap_or(true))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, ProviderError> {
        let mut created = self.created.lock();
        created.push(spec.clone());
        Ok(format!("fake-container-{}", created.len()))
    }

    async fn start_container(&self, _id: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn stop_container(&self, _id: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), ProviderError> {
        self.removed.lock().push(id.to_string());
        Ok(())
    }

    async fn wait_container(&self, _id: &str) -> Result<i64, ProviderError> {
        Ok(0)
    }

    async fn container_output(&self, _id: &str) -> Result<Vec<OutputChunk>, ProviderError> {
        Ok(Vec::new())
    }

    async fn exec_in_container(
        &self,
        _container: &str,
        _spec: &ExecSpec,
    ) -> Result<(String, OutputStream), ProviderError> {
        self.exec_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.exec_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(("fake-exec".to_string(), stream::empty().boxed()))
    }

    async fn exec_exit_code(&self, _exec_id: &str) -> Result<Option<i64>, ProviderError> {
        Ok(Some(self.exec_exit.load(Ordering::SeqCst)))
    }

    async fn pull_image(&self, image: &str) -> Result<(), ProviderError> {
        self.pulled.lock().push(image.to_string());
        self.missing_images.lock().remove(image);
        Ok(())
    }

    async fn image_present(&self, image: &str) -> Result<bool, ProviderError> {
        Ok(!self.missing_images.lock().contains(image))
    }

    async fn find_network(&self, name: &str) -> Result<Option<String>, ProviderError> {
        Ok(Some(format!("net-{name}")))
    }

    async fn connect_network(
        &self,
        _network: &str,
        _container: &str,
    ) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn create_service(&self, spec: &ServiceSpec) -> Result<String, ProviderError> {
        Ok(format!("fake-service-{}", spec.name))
    }

    async fn service_completed(&self, _id: &str) -> Result<Option<bool>, ProviderError> {
        Ok(Some(true))
    }

    async fn remove_service(&self, _id: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn events(&self, _label_filter: Option<&str>) -> Result<EventStream, ProviderError> {
        self.events_calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self.event_behaviors.lock().pop_front();
        match behavior {
            Some(EventsBehavior::FailSubscribe) => {
                Err(ProviderError::Transient("event stream unavailable".to_string()))
            }
            Some(EventsBehavior::Stream(rx)) => Ok(stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })
            .boxed()),
            // No script: a silent stream that never ends.
            None => Ok(stream::pending().boxed()),
        }
    }
}
