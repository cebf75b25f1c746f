//! Docker implementation of the provider contract via bollard. This is
//! the only module that names the concrete engine.

use super::{
    ContainerEvent, ContainerInfo, ContainerProvider, ContainerSpec, EventStream, ExecSpec,
    OutputChunk, OutputStream, ProviderError, ServiceSpec, StdStream,
};
use async_trait::async_trait;
use bollard::Docker;
use bollard::container::LogOutput;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptions, EventsOptions, InspectContainerOptions,
    ListContainersOptions, ListNetworksOptions, ListTasksOptions, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions, WaitContainerOptions,
};
use chrono::{DateTime, TimeZone, Utc};
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap};

pub struct DockerProvider {
    docker: Docker,
}

impl DockerProvider {
    /// Connects to the engine named by a `DOCKER_HOST`-style string.
    pub fn connect(docker_host: &str) -> Result<Self, ProviderError> {
        if let Some(path) = docker_host.strip_prefix("unix://") {
            let docker = Docker::connect_with_unix(path, 60, bollard::API_DEFAULT_VERSION)
                .map_err(map_err)?;
            return Ok(DockerProvider { docker });
        }
        if docker_host.starts_with("tcp://") {
            // Let bollard read TLS env vars (DOCKER_TLS_VERIFY, DOCKER_CERT_PATH):
            let docker = Docker::connect_with_local_defaults().map_err(map_err)?;
            return Ok(DockerProvider { docker });
        }
        Err(ProviderError::Invalid(format!("unsupported docker host: {docker_host}")))
    }
}

fn map_err(err: bollard::errors::Error) -> ProviderError {
    use bollard::errors::Error;
    match err {
        Error::DockerResponseServerError { status_code, message } => match status_code {
            404 => ProviderError::NotFound(message),
            401 | 403 => ProviderError::Denied(message),
            400 | 409 => ProviderError::Invalid(message),
            _ => ProviderError::Transient(format!("status {status_code}: {message}")),
        },
        Error::RequestTimeoutError => ProviderError::Transient("request timed out".to_string()),
        other => ProviderError::Transient(other.to_string()),
    }
}

fn label_filters(label_filter: Option<&str>) -> Option<HashMap<String, Vec<String>>> {
    label_filter.map(|expr| {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![expr.to_string()]);
        filters
    })
}

fn chunk_from(output: LogOutput) -> OutputChunk {
    match output {
        LogOutput::StdErr { message } => OutputChunk {
            stream: StdStream::Err,
            text: String::from_utf8_lossy(&message).into_owned(),
        },
        LogOutput::StdOut { message } | LogOutput::Console { message } => OutputChunk {
            stream: StdStream::Out,
            text: String::from_utf8_lossy(&message).into_owned(),
        },
        LogOutput::StdIn { .. } => OutputChunk { stream: StdStream::Out, text: String::new() },
    }
}

fn none_if_empty<T>(items: &[T]) -> Option<Vec<T>>
where
    T: Clone,
{
    if items.is_empty() { None } else { Some(items.to_vec()) }
}

#[async_trait]
impl ContainerProvider for DockerProvider {
    async fn ping(&self) -> Result<(), ProviderError> {
        self.docker.ping().await.map(|_| ()).map_err(map_err)
    }

    async fn list_containers(
        &self,
        label_filter: Option<&str>,
    ) -> Result<Vec<ContainerInfo>, ProviderError> {
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions {
                all: true,
                filters: label_filters(label_filter),
                ..Default::default()
            }))
            .await
            .map_err(map_err)?;

        let mut out = Vec::with_capacity(containers.len());
        for c in containers {
            let id = c.id.clone().unwrap_or_default();
            let name = c
                .names
                .as_ref()
                .and_then(|v| v.first())
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_else(|| id.chars().take(12).collect());
            let created_at: DateTime<Utc> = c
                .created
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
                .unwrap_or_default();
            let running = matches!(
                c.state,
                Some(bollard::models::ContainerSummaryStateEnum::RUNNING)
            );
            let labels: BTreeMap<String, String> =
                c.labels.unwrap_or_default().into_iter().collect();
            out.push(ContainerInfo { id, name, created_at, running, labels });
        }
        Ok(out)
    }

    async fn container_running(&self, name: &str) -> Result<bool, ProviderError> {
        let details = self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
            .map_err(map_err)?;
        Ok(details.state.as_ref().and_then(|s| s.running).unwrap_or(false))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, ProviderError> {
        let host_config = bollard::models::HostConfig {
            binds: none_if_empty(&spec.volumes),
            volumes_from: none_if_empty(&spec.volumes_from),
            ..Default::default()
        };
        let body = bollard::models::ContainerCreateBody {
            image: Some(spec.image.clone()),
            cmd: spec.cmd.clone(),
            entrypoint: spec.entrypoint.clone(),
            user: spec.user.clone(),
            env: none_if_empty(&spec.env),
            hostname: spec.hostname.clone(),
            tty: Some(spec.tty),
            labels: if spec.labels.is_empty() {
                None
            } else {
                Some(spec.labels.clone().into_iter().collect())
            },
            host_config: Some(host_config),
            ..Default::default()
        };
        let options = spec.name.clone().map(|name| CreateContainerOptions {
            name: Some(name),
            ..Default::default()
        });
        let created = self
            .docker
            .create_container(options, body)
            .await
            .map_err(map_err)?;
        Ok(created.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), ProviderError> {
        self.docker
            .start_container(id, None::<StartContainerOptions>)
            .await
            .map_err(map_err)
    }

    async fn stop_container(&self, id: &str) -> Result<(), ProviderError> {
        self.docker
            .stop_container(id, None::<StopContainerOptions>)
            .await
            .map_err(map_err)
    }

    async fn remove_container(&self, id: &str) -> Result<(), ProviderError> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions { force: true, ..Default::default() }),
            )
            .await
            .map_err(map_err)
    }

    async fn wait_container(&self, id: &str) -> Result<i64, ProviderError> {
        let mut wait = self.docker.wait_container(id, None::<WaitContainerOptions>);
        match wait.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports a non-zero exit as a wait error carrying
            // the code
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(err)) => Err(map_err(err)),
            None => Err(ProviderError::Protocol("wait stream ended".to_string())),
        }
    }

    async fn container_output(&self, id: &str) -> Result<Vec<OutputChunk>, ProviderError> {
        let mut logs = self.docker.logs(
            id,
            Some(LogsOptions { stdout: true, stderr: true, ..Default::default() }),
        );
        let mut chunks = Vec::new();
        while let Some(item) = logs.next().await {
            chunks.push(chunk_from(item.map_err(map_err)?));
        }
        Ok(chunks)
    }

    async fn exec_in_container(
        &self,
        container: &str,
        spec: &ExecSpec,
    ) -> Result<(String, OutputStream), ProviderError> {
        let exec = self
            .docker
            .create_exec(
                container,
                CreateExecOptions {
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    tty: Some(spec.tty),
                    cmd: Some(spec.cmd.clone()),
                    env: none_if_empty(&spec.env),
                    user: spec.user.clone(),
                    working_dir: spec.dir.clone(),
                    ..Default::default()
                },
            )
            .await
            .map_err(map_err)?
            .id;

        let stream: OutputStream = match self
            .docker
            .start_exec(&exec, None)
            .await
            .map_err(map_err)?
        {
            StartExecResults::Attached { output, .. } => output
                .map(|item| item.map(chunk_from).map_err(map_err))
                .boxed(),
            StartExecResults::Detached => futures::stream::empty().boxed(),
        };
        Ok((exec, stream))
    }

    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>, ProviderError> {
        let inspect = self.docker.inspect_exec(exec_id).await.map_err(map_err)?;
        if inspect.running.unwrap_or(false) {
            return Ok(None);
        }
        Ok(inspect.exit_code)
    }

    async fn pull_image(&self, image: &str) -> Result<(), ProviderError> {
        let mut pull = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: Some(image.to_string()),
                ..Default::default()
            }),
            None,
            None,
        );
        while let Some(progress) = pull.next().await {
            progress.map_err(map_err)?;
        }
        Ok(())
    }

    async fn image_present(&self, image: &str) -> Result<bool, ProviderError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(err) => match map_err(err) {
                ProviderError::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn find_network(&self, name: &str) -> Result<Option<String>, ProviderError> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![name.to_string()]);
        let networks = self
            .docker
            .list_networks(Some(ListNetworksOptions {
                filters: Some(filters),
                ..Default::default()
            }))
            .await
            .map_err(map_err)?;
        Ok(networks.into_iter().find_map(|n| n.id.or(n.name)))
    }

    async fn connect_network(
        &self,
        network: &str,
        container: &str,
    ) -> Result<(), ProviderError> {
        self.docker
            .connect_network(
                network,
                bollard::models::NetworkConnectRequest {
                    container: container.to_string(),
                    ..Default::default()
                },
            )
            .await
            .map_err(map_err)
    }

    async fn create_service(&self, spec: &ServiceSpec) -> Result<String, ProviderError> {
        let service_spec = bollard::models::ServiceSpec {
            name: Some(spec.name.clone()),
            task_template: Some(bollard::models::TaskSpec {
                container_spec: Some(bollard::models::TaskSpecContainerSpec {
                    image: Some(spec.image.clone()),
                    args: spec.cmd.clone(),
                    user: spec.user.clone(),
                    env: none_if_empty(&spec.env),
                    ..Default::default()
                }),
                restart_policy: Some(bollard::models::TaskSpecRestartPolicy {
                    condition: Some(
                        bollard::models::TaskSpecRestartPolicyConditionEnum::NONE,
                    ),
                    ..Default::default()
                }),
                networks: spec.network.as_ref().map(|network| {
                    vec![bollard::models::NetworkAttachmentConfig {
                        target: Some(network.clone()),
                        ..Default::default()
                    }]
                }),
                ..Default::default()
            }),
            mode: Some(bollard::models::ServiceSpecMode {
                replicated: Some(bollard::models::ServiceSpecModeReplicated {
                    replicas: Some(1),
                }),
                ..Default::default()
            }),
            ..Default::default()
        };

        let response = self
            .docker
            .create_service(service_spec, None)
            .await
            .map_err(map_err)?;
        response
            .id
            .ok_or_else(|| ProviderError::Protocol("service id missing".to_string()))
    }

    async fn service_completed(&self, id: &str) -> Result<Option<bool>, ProviderError> {
        use bollard::models::TaskState;

        let mut filters = HashMap::new();
        filters.insert("service".to_string(), vec![id.to_string()]);
        let tasks = self
            .docker
            .list_tasks(Some(ListTasksOptions {
                filters: Some(filters),
                ..Default::default()
            }))
            .await
            .map_err(map_err)?;
        if tasks.is_empty() {
            return Ok(None);
        }

        let mut success = true;
        for task in tasks {
            match task.status.and_then(|s| s.state) {
                Some(TaskState::COMPLETE) => {}
                Some(
                    TaskState::FAILED
                    | TaskState::REJECTED
                    | TaskState::SHUTDOWN
                    | TaskState::ORPHANED,
                ) => success = false,
                _ => return Ok(None),
            }
        }
        Ok(Some(success))
    }

    async fn remove_service(&self, id: &str) -> Result<(), ProviderError> {
        self.docker.delete_service(id).await.map_err(map_err)
    }

    async fn events(&self, label_filter: Option<&str>) -> Result<EventStream, ProviderError> {
        let mut filters = HashMap::new();
        filters.insert("type".to_string(), vec!["container".to_string()]);
        if let Some(expr) = label_filter {
            filters.insert("label".to_string(), vec![expr.to_string()]);
        }

        let stream = self
            .docker
            .events(Some(EventsOptions { filters: Some(filters), ..Default::default() }))
            .map(|item| match item {
                Ok(message) => Ok(ContainerEvent {
                    action: message.action.unwrap_or_default(),
                    container_name: message
                        .actor
                        .and_then(|actor| actor.attributes)
                        .and_then(|attributes| attributes.get("name").cloned()),
                }),
                Err(err) => Err(map_err(err)),
            })
            .boxed();
        Ok(stream)
    }
}
