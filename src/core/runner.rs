//! Per-kind execution: the terminal of every middleware chain. The
//! actual work runs in a spawned task so a panic inside a worker is
//! recovered into an `outcome=error, kind=panic` record.

use crate::config::model::{
    ComposeJobConfig, ExecJobConfig, JobSpec, LocalJobConfig, PullPolicy, RunJobConfig,
    ServiceRunJobConfig,
};
use crate::core::execution::{Execution, Outcome};
use crate::middleware::Terminal;
use crate::provider::{
    ContainerProvider, ContainerSpec, ExecSpec, OutputChunk, ProviderError, ServiceSpec,
    StdStream,
};
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

const SERVICE_POLL: std::time::Duration = std::time::Duration::from_millis(500);

/// How long a worker may keep running after shutdown is requested before
/// its execution is recorded as cancelled and detached.
const SHUTDOWN_GRACE: std::time::Duration = std::time::Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("exit code {0}")]
    NonZeroExit(i64),
    #[error("service task failed")]
    ServiceFailed,
    #[error("{0}")]
    Invalid(String),
}

impl RunError {
    fn kind(&self) -> &'static str {
        match self {
            RunError::Provider(e) => e.kind(),
            RunError::NonZeroExit(_) => "exit-code",
            RunError::ServiceFailed => "service-failed",
            RunError::Invalid(_) => "invalid",
        }
    }
}

#[derive(Debug, Default)]
struct Captured {
    stdout: String,
    stderr: String,
}

impl Captured {
    fn append(&mut self, chunk: &OutputChunk) {
        match chunk.stream {
            StdStream::Out => self.stdout.push_str(&chunk.text),
            StdStream::Err => self.stderr.push_str(&chunk.text),
        }
    }
}

/// Executes one job spec against the provider (or the host, for local
/// and compose kinds).
pub struct JobExecutor {
    spec: JobSpec,
    provider: Arc<dyn ContainerProvider>,
    shutdown: broadcast::Sender<()>,
}

impl JobExecutor {
    pub fn new(
        spec: JobSpec,
        provider: Arc<dyn ContainerProvider>,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        JobExecutor { spec, provider, shutdown }
    }
}

#[async_trait]
impl Terminal for JobExecutor {
    async fn execute(&self, exec: &mut Execution) {
        let spec = self.spec.clone();
        let provider = self.provider.clone();
        let mut worker = tokio::spawn(async move { run_job(&spec, provider.as_ref()).await });

        let mut shutdown_rx = self.shutdown.subscribe();
        let joined = tokio::select! {
            joined = &mut worker => Some(joined),
            _ = shutdown_rx.recv() => {
                // The daemon is going down: give the worker the grace
                // period, then record the cancellation and detach it.
                match tokio::time::timeout(SHUTDOWN_GRACE, &mut worker).await {
                    Ok(joined) => Some(joined),
                    Err(_) => None,
                }
            }
        };

        let now = Utc::now();
        match joined {
            None => exec.finish(Outcome::Cancelled, now),
            Some(Ok((captured, result))) => {
                exec.stdout = captured.stdout;
                exec.stderr = captured.stderr;
                match result {
                    Ok(()) => exec.finish(Outcome::Ok, now),
                    Err(err) => exec.finish(
                        Outcome::Error { kind: err.kind().to_string(), message: err.to_string() },
                        now,
                    ),
                }
            }
            Some(Err(join_err)) => {
                let kind = if join_err.is_panic() { "panic" } else { "join" };
                exec.finish(
                    Outcome::Error { kind: kind.to_string(), message: join_err.to_string() },
                    now,
                );
            }
        }
    }
}

async fn run_job(spec: &JobSpec, provider: &dyn ContainerProvider) -> (Captured, Result<(), RunError>) {
    let mut captured = Captured::default();
    let result = match spec {
        JobSpec::Exec(job) => run_exec(job, provider, &mut captured).await,
        JobSpec::Run(job) => run_container(job, provider, &mut captured).await,
        JobSpec::Local(job) => run_local(job, &mut captured).await,
        JobSpec::ServiceRun(job) => run_service(job, provider).await,
        JobSpec::Compose(job) => run_compose(job, &mut captured).await,
    };
    (captured, result)
}

async fn run_exec(
    job: &ExecJobConfig,
    provider: &dyn ContainerProvider,
    out: &mut Captured,
) -> Result<(), RunError> {
    let container = job
        .container
        .as_deref()
        .ok_or_else(|| RunError::Invalid("container not set".to_string()))?;
    if !provider.container_running(container).await? {
        return Err(RunError::Invalid(format!("container {container} is not running")));
    }

    let spec = ExecSpec {
        cmd: split_command(job.common.command.as_deref())?,
        user: job.user.clone(),
        dir: job.dir.clone(),
        env: job.environment.clone(),
        tty: job.tty,
    };
    let (exec_id, mut output) = provider.exec_in_container(container, &spec).await?;
    while let Some(chunk) = output.next().await {
        let chunk = chunk?;
        debug!(container = %container, stream = ?chunk.stream, "{}", chunk.text.trim_end());
        out.append(&chunk);
    }

    match provider.exec_exit_code(&exec_id).await? {
        Some(code) if code != 0 => Err(RunError::NonZeroExit(code)),
        _ => Ok(()),
    }
}

async fn run_container(
    job: &RunJobConfig,
    provider: &dyn ContainerProvider,
    out: &mut Captured,
) -> Result<(), RunError> {
    // Reuse mode: start an existing container and wait for it.
    if let Some(container) = &job.container {
        provider.start_container(container).await?;
        let code = provider.wait_container(container).await?;
        collect_output(provider, container, out).await;
        if job.delete == Some(true)
            && let Err(err) = provider.remove_container(container).await
        {
            warn!(container = %container, error = %err, "could not remove container");
        }
        return exit_result(code);
    }

    let image = job
        .image
        .as_deref()
        .ok_or_else(|| RunError::Invalid("image not set".to_string()))?;
    ensure_image(provider, image, job.pull).await?;

    let spec = ContainerSpec {
        name: None,
        image: image.to_string(),
        cmd: split_optional(job.common.command.as_deref())?,
        entrypoint: entrypoint_override(job.entrypoint.as_deref())?,
        user: job.user.clone(),
        env: job.environment.clone(),
        volumes: job.volumes.clone(),
        volumes_from: job.volumes_from.clone(),
        network: None,
        hostname: job.hostname.clone(),
        tty: job.tty,
        labels: Default::default(),
    };
    let id = provider.create_container(&spec).await?;

    let result = run_created_container(job, provider, &id, out).await;

    if job.delete.unwrap_or(true)
        && let Err(err) = provider.remove_container(&id).await
    {
        warn!(container = %id, error = %err, "could not remove container");
    }
    result
}

async fn run_created_container(
    job: &RunJobConfig,
    provider: &dyn ContainerProvider,
    id: &str,
    out: &mut Captured,
) -> Result<(), RunError> {
    if let Some(network) = &job.network {
        match provider.find_network(network).await? {
            Some(_) => provider.connect_network(network, id).await?,
            None => return Err(RunError::Invalid(format!("network {network} not found"))),
        }
    }
    provider.start_container(id).await?;
    let code = provider.wait_container(id).await?;
    collect_output(provider, id, out).await;
    exit_result(code)
}

async fn run_local(job: &LocalJobConfig, out: &mut Captured) -> Result<(), RunError> {
    let args = split_command(job.common.command.as_deref())?;
    run_host_command(&args, job.dir.as_deref(), &job.environment, out).await
}

async fn run_service(
    job: &ServiceRunJobConfig,
    provider: &dyn ContainerProvider,
) -> Result<(), RunError> {
    let image = job
        .image
        .as_deref()
        .ok_or_else(|| RunError::Invalid("image not set".to_string()))?;
    ensure_image(provider, image, job.pull).await?;

    let spec = ServiceSpec {
        name: format!("{}-{}", job.common.name, Utc::now().format("%Y%m%d%H%M%S%3f")),
        image: image.to_string(),
        cmd: split_optional(job.common.command.as_deref())?,
        user: job.user.clone(),
        network: job.network.clone(),
        env: job.environment.clone(),
    };
    let id = provider.create_service(&spec).await?;

    let result = loop {
        match provider.service_completed(&id).await {
            Ok(Some(true)) => break Ok(()),
            Ok(Some(false)) => break Err(RunError::ServiceFailed),
            Ok(None) => tokio::time::sleep(SERVICE_POLL).await,
            Err(err) => break Err(err.into()),
        }
    };

    if job.delete.unwrap_or(true)
        && let Err(err) = provider.remove_service(&id).await
    {
        warn!(service = %id, error = %err, "could not remove service");
    }
    result
}

async fn run_compose(job: &ComposeJobConfig, out: &mut Captured) -> Result<(), RunError> {
    let mut args: Vec<String> = vec!["compose".to_string()];
    if let Some(file) = &job.file {
        args.push("-f".to_string());
        args.push(file.clone());
    }
    match &job.service {
        Some(service) => {
            if job.exec {
                args.push("exec".to_string());
                args.push("-T".to_string());
            } else {
                args.push("run".to_string());
                args.push("--rm".to_string());
            }
            args.push(service.clone());
            if let Some(cmd) = split_optional(job.common.command.as_deref())? {
                args.extend(cmd);
            }
        }
        // Without a service the command is a raw compose subcommand.
        None => args.extend(split_command(job.common.command.as_deref())?),
    }

    let mut full = vec!["docker".to_string()];
    full.extend(args);
    run_host_command(&full, None, &job.environment, out).await
}

async fn run_host_command(
    args: &[String],
    dir: Option<&str>,
    environment: &[String],
    out: &mut Captured,
) -> Result<(), RunError> {
    let mut command = tokio::process::Command::new(&args[0]);
    command.args(&args[1..]);
    if let Some(dir) = dir {
        command.current_dir(dir);
    }
    for entry in environment {
        if let Some((key, value)) = entry.split_once('=') {
            command.env(key, value);
        }
    }

    let output = command
        .output()
        .await
        .map_err(|e| RunError::Invalid(format!("spawn {}: {e}", args[0])))?;
    out.stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    out.stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    exit_result(i64::from(output.status.code().unwrap_or(-1)))
}

async fn ensure_image(
    provider: &dyn ContainerProvider,
    image: &str,
    policy: PullPolicy,
) -> Result<(), RunError> {
    match policy {
        PullPolicy::Always => provider.pull_image(image).await?,
        PullPolicy::Missing => {
            if !provider.image_present(image).await? {
                provider.pull_image(image).await?;
            }
        }
        PullPolicy::Never => {
            if !provider.image_present(image).await? {
                return Err(RunError::Invalid(format!(
                    "image {image} not present and pull=never"
                )));
            }
        }
    }
    Ok(())
}

async fn collect_output(provider: &dyn ContainerProvider, id: &str, out: &mut Captured) {
    match provider.container_output(id).await {
        Ok(chunks) => {
            for chunk in &chunks {
                out.append(chunk);
            }
        }
        Err(err) => warn!(container = %id, error = %err, "could not collect container output"),
    }
}

fn exit_result(code: i64) -> Result<(), RunError> {
    if code == 0 { Ok(()) } else { Err(RunError::NonZeroExit(code)) }
}

fn split_command(command: Option<&str>) -> Result<Vec<String>, RunError> {
    let text = command.unwrap_or("").trim();
    if text.is_empty() {
        return Err(RunError::Invalid("command is empty".to_string()));
    }
    match shlex::split(text) {
        Some(args) if !args.is_empty() => Ok(args),
        _ => Err(RunError::Invalid(format!("could not parse command '{text}'"))),
    }
}

fn split_optional(command: Option<&str>) -> Result<Option<Vec<String>>, RunError> {
    match command.map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => split_command(Some(text)).map(Some),
    }
}

/// `entrypoint = ""` is an explicit empty override; absence keeps the
/// image's entrypoint.
fn entrypoint_override(entrypoint: Option<&str>) -> Result<Option<Vec<String>>, RunError> {
    match entrypoint {
        None => Ok(None),
        Some(text) if text.trim().is_empty() => Ok(Some(Vec::new())),
        Some(text) => split_command(Some(text)).map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_command_rejects_empty_and_parses_quotes() {
        assert!(split_command(None).is_err());
        assert!(split_command(Some("   ")).is_err());
        assert_eq!(
            split_command(Some("sh -c 'echo hi'")).unwrap(),
            vec!["sh".to_string(), "-c".to_string(), "echo hi".to_string()]
        );
    }

    #[test]
    fn entrypoint_override_tristate() {
        assert_eq!(entrypoint_override(None).unwrap(), None);
        assert_eq!(entrypoint_override(Some("")).unwrap(), Some(vec![]));
        assert_eq!(
            entrypoint_override(Some("/bin/sh -c")).unwrap(),
            Some(vec!["/bin/sh".to_string(), "-c".to_string()])
        );
    }

    #[tokio::test]
    async fn local_job_captures_output_and_exit_code() {
        let job = LocalJobConfig {
            common: crate::config::model::JobCommon {
                command: Some("sh -c 'echo out; echo err >&2'".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut out = Captured::default();
        run_local(&job, &mut out).await.unwrap();
        assert_eq!(out.stdout, "out\n");
        assert_eq!(out.stderr, "err\n");

        let failing = LocalJobConfig {
            common: crate::config::model::JobCommon {
                command: Some("sh -c 'exit 3'".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut out = Captured::default();
        match run_local(&failing, &mut out).await {
            Err(RunError::NonZeroExit(3)) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn local_job_env_and_dir() {
        let job = LocalJobConfig {
            common: crate::config::model::JobCommon {
                command: Some("sh -c 'echo $GREETING; pwd'".to_string()),
                ..Default::default()
            },
            dir: Some("/tmp".to_string()),
            environment: vec!["GREETING=hello".to_string()],
        };
        let mut out = Captured::default();
        run_local(&job, &mut out).await.unwrap();
        assert!(out.stdout.starts_with("hello\n"));
        assert!(out.stdout.contains("/tmp"));
    }
}
