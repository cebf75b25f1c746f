//! Narrow capability interface over the container engine. Core code only
//! sees this trait; the bollard-backed implementation lives in
//! [`docker`].

pub mod docker;
#[cfg(test)]
pub mod fake;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::collections::BTreeMap;
use thiserror::Error;

/// Engine failures, split into the kinds the rest of the daemon reacts
/// to: transient errors arm fallback polling, permanent ones surface as
/// execution errors directly.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("permission denied: {0}")]
    Denied(String),
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error("engine unavailable: {0}")]
    Transient(String),
    #[error("engine protocol error: {0}")]
    Protocol(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }

    /// Stable kind tag carried into execution records.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::NotFound(_) => "not-found",
            ProviderError::Denied(_) => "denied",
            ProviderError::Invalid(_) => "invalid",
            ProviderError::Transient(_) => "transient",
            ProviderError::Protocol(_) => "protocol",
        }
    }
}

/// What the label extractor and watcher need to know about a container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerInfo {
    pub id: String,
    /// Primary name with the leading slash stripped.
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub running: bool,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdStream {
    Out,
    Err,
}

/// One demultiplexed chunk of captured container output.
#[derive(Debug, Clone)]
pub struct OutputChunk {
    pub stream: StdStream,
    pub text: String,
}

#[derive(Debug, Clone, Default)]
pub struct ExecSpec {
    pub cmd: Vec<String>,
    pub user: Option<String>,
    pub dir: Option<String>,
    pub env: Vec<String>,
    pub tty: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    pub name: Option<String>,
    pub image: String,
    pub cmd: Option<Vec<String>>,
    /// `Some(vec![])` forces an empty entrypoint, overriding the image.
    pub entrypoint: Option<Vec<String>>,
    pub user: Option<String>,
    pub env: Vec<String>,
    pub volumes: Vec<String>,
    pub volumes_from: Vec<String>,
    pub network: Option<String>,
    pub hostname: Option<String>,
    pub tty: bool,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct ServiceSpec {
    pub name: String,
    pub image: String,
    pub cmd: Option<Vec<String>>,
    pub user: Option<String>,
    pub network: Option<String>,
    pub env: Vec<String>,
}

/// A container lifecycle event as seen on the engine's event stream.
#[derive(Debug, Clone)]
pub struct ContainerEvent {
    pub action: String,
    pub container_name: Option<String>,
}

pub type OutputStream = BoxStream<'static, Result<OutputChunk, ProviderError>>;
pub type EventStream = BoxStream<'static, Result<ContainerEvent, ProviderError>>;

/// The single seam between the daemon and the engine. Every operation is
/// cancellable by dropping the future; in-flight engine work is not
/// forcibly killed.
#[async_trait]
pub trait ContainerProvider: Send + Sync {
    async fn ping(&self) -> Result<(), ProviderError>;

    /// Containers carrying `label_filter` (a `key=value` expression), or
    /// all containers when `None`. Includes stopped ones.
    async fn list_containers(
        &self,
        label_filter: Option<&str>,
    ) -> Result<Vec<ContainerInfo>, ProviderError>;

    /// Whether the named container currently runs.
    async fn container_running(&self, name: &str) -> Result<bool, ProviderError>;

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, ProviderError>;
    async fn start_container(&self, id: &str) -> Result<(), ProviderError>;
    async fn stop_container(&self, id: &str) -> Result<(), ProviderError>;
    async fn remove_container(&self, id: &str) -> Result<(), ProviderError>;

    /// Blocks until the container exits; returns its exit code.
    async fn wait_container(&self, id: &str) -> Result<i64, ProviderError>;

    /// Collected stdout/stderr of a finished container.
    async fn container_output(&self, id: &str) -> Result<Vec<OutputChunk>, ProviderError>;

    /// Creates and starts an exec; returns its id and the attached
    /// output stream.
    async fn exec_in_container(
        &self,
        container: &str,
        spec: &ExecSpec,
    ) -> Result<(String, OutputStream), ProviderError>;

    /// Exit code of a finished exec, `None` while it still runs.
    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>, ProviderError>;

    async fn pull_image(&self, image: &str) -> Result<(), ProviderError>;
    async fn image_present(&self, image: &str) -> Result<bool, ProviderError>;

    /// Network id by name, if any.
    async fn find_network(&self, name: &str) -> Result<Option<String>, ProviderError>;
    async fn connect_network(&self, network: &str, container: &str)
    -> Result<(), ProviderError>;

    async fn create_service(&self, spec: &ServiceSpec) -> Result<String, ProviderError>;
    /// `None` while tasks still run, otherwise whether every task
    /// completed successfully.
    async fn service_completed(&self, id: &str) -> Result<Option<bool>, ProviderError>;
    async fn remove_service(&self, id: &str) -> Result<(), ProviderError>;

    /// Subscribes to container lifecycle events, optionally restricted
    /// by a label filter. The stream yields an error item and ends when
    /// the subscription breaks.
    async fn events(&self, label_filter: Option<&str>) -> Result<EventStream, ProviderError>;
}
