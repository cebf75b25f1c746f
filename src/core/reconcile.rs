//! Dual-source reconciliation: merges the file and label catalogs (file
//! wins on conflicts), diffs the result against the live scheduler and
//! applies the minimal remove/replace/add set. All catalog mutation is
//! funnelled through this single consumer, so no two passes overlap.

use crate::config::file::{FileSource, LoadMode, LoadedConfig};
use crate::config::labels::{self, ENABLED_LABEL, LabelCatalog};
use crate::config::model::{GlobalConfig, JobSpec, PollConfig, WebhookConfig};
use crate::core::job::JobKey;
use crate::core::scheduler::{Scheduler, build_global_sinks};
use crate::provider::{ContainerInfo, ContainerProvider};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// What woke the reconciler. Requests are coalesced: a burst collapses
/// into one pass, reloading files if any request in the burst asked to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileRequest {
    Boot,
    FilesChanged,
    Containers,
    Manual,
}

impl ReconcileRequest {
    fn reloads_files(&self) -> bool {
        !matches!(self, ReconcileRequest::Containers)
    }
}

/// Outcome of one pass, used for logging and assertions.
#[derive(Debug, Default)]
pub struct PassSummary {
    pub added: Vec<JobKey>,
    pub removed: Vec<JobKey>,
    pub replaced: Vec<JobKey>,
    pub startup_fired: Vec<JobKey>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl PassSummary {
    pub fn is_noop(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.replaced.is_empty()
            && self.warnings.is_empty()
            && self.errors.is_empty()
    }
}

/// The three diff sets between the desired catalog and the live
/// scheduler.
#[derive(Debug, Default, PartialEq)]
pub struct Diff {
    pub to_add: Vec<JobKey>,
    pub to_remove: Vec<JobKey>,
    pub to_replace: Vec<JobKey>,
}

pub fn diff(current: &BTreeMap<JobKey, JobSpec>, desired: &BTreeMap<JobKey, JobSpec>) -> Diff {
    let mut out = Diff::default();
    for key in current.keys() {
        if !desired.contains_key(key) {
            out.to_remove.push(key.clone());
        }
    }
    for (key, spec) in desired {
        match current.get(key) {
            None => out.to_add.push(key.clone()),
            Some(live) if live != spec => out.to_replace.push(key.clone()),
            Some(_) => {}
        }
    }
    out
}

/// File-wins merge of the two catalogs plus the collision lists the
/// caller turns into warnings.
#[derive(Debug, Default)]
pub struct MergedCatalog {
    pub global: GlobalConfig,
    pub jobs: BTreeMap<JobKey, JobSpec>,
    pub webhooks: BTreeMap<String, WebhookConfig>,
    pub job_collisions: Vec<JobKey>,
    pub webhook_collisions: Vec<String>,
}

pub fn merge(file: Option<&LoadedConfig>, label: &LabelCatalog) -> MergedCatalog {
    let empty = GlobalConfig::default();
    let file_global = file.map(|f| &f.global).unwrap_or(&empty);
    let global = merge_globals(file_global, &label.global);

    let mut jobs = label.jobs.clone();
    let mut job_collisions = Vec::new();
    if let Some(file) = file {
        for (key, spec) in &file.jobs {
            if jobs.contains_key(key) {
                job_collisions.push(key.clone());
            }
            jobs.insert(key.clone(), spec.clone());
        }
    }

    let mut webhooks = label.webhooks.clone();
    let mut webhook_collisions = Vec::new();
    if let Some(file) = file {
        for (name, webhook) in &file.webhooks {
            if webhooks.contains_key(name) {
                webhook_collisions.push(name.clone());
            }
            webhooks.insert(name.clone(), webhook.clone());
        }
    }

    // Materialise global defaults into every job so structural equality
    // reflects the effective configuration.
    for spec in jobs.values_mut() {
        finish_job(spec, &global);
    }

    MergedCatalog { global, jobs, webhooks, job_collisions, webhook_collisions }
}

/// Label-sourced global contributions fill gaps; file settings always
/// win, and the surface/safety knobs are file-only by construction (the
/// extractor refuses them).
fn merge_globals(file: &GlobalConfig, label: &GlobalConfig) -> GlobalConfig {
    GlobalConfig {
        default_user: file.default_user.clone().or_else(|| label.default_user.clone()),
        run_on_startup: file.run_on_startup.or(label.run_on_startup),
        allow_host_jobs_from_labels: file.allow_host_jobs_from_labels,
        sinks: file.sinks.merged_over(&label.sinks),
        web: file.web.clone(),
        poll: PollConfig {
            docker_poll_interval: file
                .poll
                .docker_poll_interval
                .or(label.poll.docker_poll_interval),
            config_poll_interval: file
                .poll
                .config_poll_interval
                .or(label.poll.config_poll_interval),
            polling_fallback: file.poll.polling_fallback.or(label.poll.polling_fallback),
            poll_interval: file.poll.poll_interval.or(label.poll.poll_interval),
            no_poll: file.poll.no_poll.or(label.poll.no_poll),
        },
    }
}

fn finish_job(spec: &mut JobSpec, global: &GlobalConfig) {
    let common = spec.common_mut();
    common.run_on_startup = common.run_on_startup.or(global.run_on_startup);
    common.sinks.inherit_touched(&global.sinks);

    if let Some(user) = &global.default_user {
        match spec {
            JobSpec::Exec(job) => {
                job.user.get_or_insert_with(|| user.clone());
            }
            JobSpec::Run(job) => {
                job.user.get_or_insert_with(|| user.clone());
            }
            JobSpec::ServiceRun(job) => {
                job.user.get_or_insert_with(|| user.clone());
            }
            JobSpec::Local(_) | JobSpec::Compose(_) => {}
        }
    }
}

pub struct Reconciler {
    provider: Arc<dyn ContainerProvider>,
    scheduler: Scheduler,
    file_source: Option<FileSource>,
    rx: mpsc::Receiver<ReconcileRequest>,
    shutdown: broadcast::Sender<()>,
    file_cache: Option<LoadedConfig>,
    containers: Vec<ContainerInfo>,
    warned_job_collisions: BTreeSet<JobKey>,
    warned_webhook_collisions: BTreeSet<String>,
    warned_host_jobs: BTreeSet<String>,
    warned_label_findings: BTreeSet<String>,
    prev_global_sinks: crate::config::model::SinkOverrides,
}

impl Reconciler {
    pub fn new(
        provider: Arc<dyn ContainerProvider>,
        scheduler: Scheduler,
        file_source: Option<FileSource>,
        rx: mpsc::Receiver<ReconcileRequest>,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        Reconciler {
            provider,
            scheduler,
            file_source,
            rx,
            shutdown,
            file_cache: None,
            containers: Vec::new(),
            warned_job_collisions: BTreeSet::new(),
            warned_webhook_collisions: BTreeSet::new(),
            warned_host_jobs: BTreeSet::new(),
            warned_label_findings: BTreeSet::new(),
            prev_global_sinks: Default::default(),
        }
    }

    pub async fn run(mut self) {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            let first = tokio::select! {
                _ = shutdown.recv() => return,
                request = self.rx.recv() => match request {
                    Some(request) => request,
                    None => return,
                },
            };
            let mut reload = first.reloads_files();
            while let Ok(request) = self.rx.try_recv() {
                reload |= request.reloads_files();
            }

            let summary = self.reconcile_once(reload).await;
            for warning in &summary.warnings {
                warn!("{warning}");
            }
            for error in &summary.errors {
                error!("{error}");
            }
            if !summary.is_noop() {
                info!(
                    added = summary.added.len(),
                    removed = summary.removed.len(),
                    replaced = summary.replaced.len(),
                    "reconcile applied"
                );
            } else {
                debug!("reconcile pass made no changes");
            }
        }
    }

    /// One full pass. Public so tests can drive the reconciler without
    /// the request loop.
    pub async fn reconcile_once(&mut self, reload_files: bool) -> PassSummary {
        let mut summary = PassSummary::default();

        if reload_files {
            self.reload_file_source(&mut summary);
        }

        match self
            .provider
            .list_containers(Some(&format!("{ENABLED_LABEL}=true")))
            .await
        {
            Ok(containers) => self.containers = containers,
            Err(err) => summary.warnings.push(format!(
                "could not list containers, reusing previous snapshot: {err}"
            )),
        }

        let allow_host_jobs = self
            .file_cache
            .as_ref()
            .map(|f| f.global.allow_host_jobs_from_labels)
            .unwrap_or(false);
        let label_catalog = labels::extract(&self.containers, allow_host_jobs);
        // Label findings recur on every snapshot while the offending
        // container persists; report each once until it changes, so an
        // unchanged snapshot reconciles silently.
        let mut seen = BTreeSet::new();
        for warning in &label_catalog.warnings {
            seen.insert(warning.clone());
            if self.warned_label_findings.insert(warning.clone()) {
                summary.warnings.push(warning.clone());
            }
        }
        self.warned_label_findings = seen;

        let mut seen_host_jobs = BTreeSet::new();
        for err in &label_catalog.errors {
            let text = err.to_string();
            seen_host_jobs.insert(text.clone());
            if self.warned_host_jobs.insert(text.clone()) {
                summary.errors.push(text);
            }
        }
        self.warned_host_jobs = seen_host_jobs;

        let merged = merge(self.file_cache.as_ref(), &label_catalog);
        self.warn_collisions(&merged, &mut summary);

        self.scheduler.set_webhooks(merged.webhooks.clone());

        if merged.global.sinks != self.prev_global_sinks {
            let sinks = build_global_sinks(&merged.global.sinks);
            if sinks.is_empty() {
                debug!("detaching scheduler-level notification sinks");
            } else {
                debug!(count = sinks.len(), "attaching scheduler-level notification sinks");
            }
            self.scheduler.set_scheduler_sinks(sinks);
            self.prev_global_sinks = merged.global.sinks.clone();
        }

        let current = self.scheduler.entries();
        let changes = diff(&current, &merged.jobs);

        for key in &changes.to_remove {
            if self.scheduler.remove(key) {
                summary.removed.push(key.clone());
            }
        }
        for key in &changes.to_replace {
            let spec = merged.jobs[key].clone();
            match self.scheduler.replace(spec) {
                Ok(()) => summary.replaced.push(key.clone()),
                Err(err) => summary.warnings.push(format!("replace failed: {err}")),
            }
        }
        for key in &changes.to_add {
            let spec = merged.jobs[key].clone();
            let on_startup = spec.common().run_on_startup.unwrap_or(false);
            match self.scheduler.add(spec) {
                Ok(()) => {
                    summary.added.push(key.clone());
                    if on_startup {
                        if self.scheduler.run_once(key).await {
                            summary.startup_fired.push(key.clone());
                        }
                    }
                }
                Err(err) => summary.warnings.push(format!("add failed: {err}")),
            }
        }

        summary
    }

    fn reload_file_source(&mut self, summary: &mut PassSummary) {
        let Some(source) = &self.file_source else {
            return;
        };
        match source.load(LoadMode::Daemon) {
            Ok(loaded) => {
                for err in &loaded.job_errors {
                    summary.warnings.push(err.to_string());
                }
                summary.warnings.extend(loaded.warnings.iter().cloned());
                self.file_cache = Some(loaded);
            }
            Err(err) => {
                if self.file_cache.is_none() {
                    summary.warnings.push(format!(
                        "config file source unavailable, continuing with labels only: {err}"
                    ));
                } else {
                    summary.warnings.push(format!(
                        "config reload failed, keeping previous file catalog: {err}"
                    ));
                }
            }
        }
    }

    fn warn_collisions(&mut self, merged: &MergedCatalog, summary: &mut PassSummary) {
        let mut current: BTreeSet<JobKey> = BTreeSet::new();
        for key in &merged.job_collisions {
            current.insert(key.clone());
            if self.warned_job_collisions.insert(key.clone()) {
                summary
                    .warnings
                    .push(format!("{key}: label-defined job overridden by the config file"));
            }
        }
        self.warned_job_collisions = current;

        let mut current: BTreeSet<String> = BTreeSet::new();
        for name in &merged.webhook_collisions {
            current.insert(name.clone());
            if self.warned_webhook_collisions.insert(name.clone()) {
                summary
                    .warnings
                    .push(format!("ignoring label-defined webhook {name}"));
            }
        }
        self.warned_webhook_collisions = current;
    }
}

/// State a job moves through; executions themselves carry the running
/// and skipped states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Absent,
    Added,
    Scheduled,
    Removed,
    Replaced,
}
