//! Daemon wiring: provider, scheduler, reconciler and watcher share a
//! root shutdown channel; SIGTERM/SIGINT drains in-flight executions
//! before exit.

use crate::cli::DaemonArgs;
use crate::config::file::{FileSource, LoadMode};
use crate::config::model::PollConfig;
use crate::core::reconcile::{ReconcileRequest, Reconciler};
use crate::core::schedule::SystemClock;
use crate::core::scheduler::Scheduler;
use crate::provider::ContainerProvider;
use crate::provider::docker::DockerProvider;
use crate::watcher::Watcher;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

pub async fn run(
    args: DaemonArgs,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let provider: Arc<dyn ContainerProvider> = Arc::new(
        DockerProvider::connect(&args.docker_host)
            .with_context(|| format!("connect to {}", args.docker_host))?,
    );
    provider
        .ping()
        .await
        .context("container engine is not reachable")?;

    let file_source = FileSource::new(args.config.clone());

    // Boot-time read for the watcher knobs and surface sanity. Job
    // decoding happens inside the reconciler, which reloads on change.
    let mut poll = match file_source.load(LoadMode::Daemon) {
        Ok(loaded) => {
            check_web_auth(&args, &loaded.global.web);
            loaded.global.poll
        }
        Err(err) => {
            warn!(error = %err, "config file unavailable at boot, continuing with the label source alone");
            PollConfig::default()
        }
    };
    if let Some(interval) = &args.docker_poll_interval {
        poll.docker_poll_interval = Some(**interval);
    }
    if let Some(interval) = &args.config_poll_interval {
        poll.config_poll_interval = Some(**interval);
    }
    if let Some(interval) = &args.polling_fallback {
        poll.polling_fallback = Some(**interval);
    }
    let intervals = poll.effective();

    let scheduler = Scheduler::new(provider.clone(), Arc::new(SystemClock), shutdown_tx.clone());
    scheduler.start();

    let (reconcile_tx, reconcile_rx) = mpsc::channel(16);
    let reconciler = Reconciler::new(
        provider.clone(),
        scheduler.clone(),
        Some(file_source.clone()),
        reconcile_rx,
        shutdown_tx.clone(),
    );
    tokio::spawn(reconciler.run());
    reconcile_tx
        .send(ReconcileRequest::Boot)
        .await
        .context("reconciler is gone before boot")?;

    let watcher = Watcher::new(
        provider,
        reconcile_tx,
        shutdown_tx.clone(),
        intervals,
        Some(file_source),
    );
    watcher.spawn();

    info!(
        config = %args.config,
        container_poll = ?intervals.container,
        config_poll = ?intervals.config,
        fallback_poll = ?intervals.fallback,
        "daemon started"
    );

    let _ = shutdown_rx.recv().await;
    info!("shutting down, draining in-flight executions");
    scheduler.drain().await;
    info!("shutdown complete");
    Ok(())
}

fn check_web_auth(args: &DaemonArgs, web: &crate::config::model::WebConfig) {
    let enabled = args.enable_web || web.enable_web;
    let user = args.auth_user.clone().or_else(|| web.auth_user.clone());
    let password = args.auth_password.clone().or_else(|| web.auth_password.clone());
    if enabled && (user.is_none() || password.is_none()) {
        warn!("web surface enabled without auth-user/auth-password");
    }
}

/// `validate` subcommand: strict parse of the file source. Exit code 0
/// when clean, 1 on any error.
pub fn validate(pattern: &str) -> i32 {
    let source = FileSource::new(pattern);
    match source.load(LoadMode::Validate) {
        Ok(loaded) => {
            for warning in &loaded.warnings {
                warn!("{warning}");
            }
            if loaded.job_errors.is_empty() {
                info!(
                    jobs = loaded.jobs.len(),
                    webhooks = loaded.webhooks.len(),
                    files = loaded.files.len(),
                    "configuration is valid"
                );
                0
            } else {
                for err in &loaded.job_errors {
                    error!("{err}");
                }
                1
            }
        }
        Err(err) => {
            error!("{err}");
            1
        }
    }
}
