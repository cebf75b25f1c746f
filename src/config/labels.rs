//! Label-source extractor: derives jobs, webhooks and global settings
//! from the label sets of discovered containers, applying the precedence
//! and safety rules that keep hostile containers off the host.

use crate::config::LabelError;
use crate::config::decode::{DecodeFields, decode_pairs, normalise};
use crate::config::model::{GlobalConfig, JobSpec, WebhookConfig};
use crate::config::suggest::suggestion_suffix;
use crate::core::job::{JobKey, JobKind, Source, valid_catalog_name};
use crate::core::schedule::ScheduleExpr;
use crate::provider::ContainerInfo;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::debug;

/// Label namespace. `ofelia.enabled` gates a container in,
/// `ofelia.service` marks the daemon's own service container.
pub const LABEL_PREFIX: &str = "ofelia";
pub const ENABLED_LABEL: &str = "ofelia.enabled";
pub const SERVICE_LABEL: &str = "ofelia.service";
pub const COMPOSE_SERVICE_LABEL: &str = "com.docker.compose.service";

/// Global keys that must never be taken from labels: they widen the
/// daemon's own attack surface.
const FILE_ONLY_GLOBAL_KEYS: [&str; 7] = [
    "allowhostjobsfromlabels",
    "authuser",
    "authpassword",
    "enableweb",
    "webaddress",
    "enablepprof",
    "pprofaddress",
];

fn job_label_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(
            r"^ofelia\.(job-exec|job-run|job-local|job-service-run|job-compose)\.([A-Za-z0-9_-]+)\.(.+)$",
        )
        .expect("valid regex")
    })
}

fn webhook_label_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"^ofelia\.webhook\.([A-Za-z0-9_-]+)\.(.+)$").expect("valid regex")
    })
}

#[derive(Debug, Default)]
pub struct LabelCatalog {
    pub jobs: BTreeMap<JobKey, JobSpec>,
    pub webhooks: BTreeMap<String, WebhookConfig>,
    /// Global contributions from service containers, minus file-only
    /// keys.
    pub global: GlobalConfig,
    pub errors: Vec<LabelError>,
    pub warnings: Vec<String>,
}

#[derive(Debug)]
struct Candidate {
    container: String,
    running: bool,
    pairs: Vec<(String, String)>,
}

/// Derives the label catalog from a container snapshot. `allow_host_jobs`
/// is the file-configured safety toggle; label-defined `local` and
/// `compose` jobs are rejected while it is off.
pub fn extract(containers: &[ContainerInfo], allow_host_jobs: bool) -> LabelCatalog {
    let mut catalog = LabelCatalog::default();

    let mut sorted: Vec<&ContainerInfo> = containers
        .iter()
        .filter(|c| c.labels.get(ENABLED_LABEL).map(String::as_str) == Some("true"))
        .collect();
    // Running first, then newest created, then name ascending. Candidate
    // resolution below depends on this order.
    sorted.sort_by(|a, b| {
        b.running
            .cmp(&a.running)
            .then(b.created_at.cmp(&a.created_at))
            .then(a.name.cmp(&b.name))
    });

    // (kind, catalog name) -> candidates in container order
    let mut job_candidates: BTreeMap<(JobKind, String), Vec<Candidate>> = BTreeMap::new();
    let mut webhook_candidates: BTreeMap<String, Vec<Candidate>> = BTreeMap::new();
    let mut global_pairs: Vec<(String, String)> = Vec::new();

    for container in &sorted {
        let is_service = container.labels.get(SERVICE_LABEL).map(String::as_str) == Some("true");
        let job_prefix = container
            .labels
            .get(COMPOSE_SERVICE_LABEL)
            .cloned()
            .unwrap_or_else(|| container.name.clone());

        let mut per_job: BTreeMap<(JobKind, String), Vec<(String, String)>> = BTreeMap::new();
        let mut per_webhook: BTreeMap<String, Vec<(String, String)>> = BTreeMap::new();

        for (key, value) in &container.labels {
            if key == ENABLED_LABEL || key == SERVICE_LABEL {
                continue;
            }
            let Some(rest) = key.strip_prefix("ofelia.") else {
                continue;
            };

            if let Some(caps) = job_label_re().captures(key) {
                let kind = JobKind::from_section(&caps[1]).expect("regex-matched kind");
                let raw_name = caps[2].to_string();
                let param = caps[3].to_string();

                if !container.running && kind != JobKind::Run {
                    debug!(
                        container = %container.name,
                        job = %raw_name,
                        kind = %kind,
                        "ignoring job label on stopped container"
                    );
                    continue;
                }

                let scoped = match kind {
                    JobKind::Exec | JobKind::Run => format!("{job_prefix}.{raw_name}"),
                    _ => raw_name,
                };
                per_job
                    .entry((kind, scoped))
                    .or_default()
                    .push((param, value.clone()));
            } else if let Some(caps) = webhook_label_re().captures(key) {
                per_webhook
                    .entry(caps[1].to_string())
                    .or_default()
                    .push((caps[2].to_string(), value.clone()));
            } else if !rest.contains('.') {
                if is_service {
                    if FILE_ONLY_GLOBAL_KEYS.contains(&normalise(rest).as_str()) {
                        catalog.warnings.push(format!(
                            "container {}: global key '{rest}' cannot be set from labels",
                            container.name
                        ));
                    } else {
                        global_pairs.push((rest.to_string(), value.clone()));
                    }
                } else {
                    debug!(
                        container = %container.name,
                        key = %key,
                        "ignoring global label on non-service container"
                    );
                }
            } else {
                catalog.warnings.push(format!(
                    "container {}: unknown label namespace '{key}'",
                    container.name
                ));
            }
        }

        for ((kind, name), pairs) in per_job {
            // Host-executing kinds are restricted to the service
            // container, and gated by the global safety toggle.
            let host_kind = matches!(kind, JobKind::Local | JobKind::Compose);
            if matches!(kind, JobKind::Local | JobKind::ServiceRun | JobKind::Compose)
                && !is_service
            {
                catalog.warnings.push(format!(
                    "container {}: {} \"{name}\" requires a service container",
                    container.name,
                    kind.section()
                ));
                continue;
            }
            if host_kind && !allow_host_jobs {
                catalog.errors.push(LabelError::HostJobDenied {
                    container: container.name.clone(),
                    section: format!("{} \"{name}\"", kind.section()),
                });
                continue;
            }

            job_candidates.entry((kind, name)).or_default().push(Candidate {
                container: container.name.clone(),
                running: container.running,
                pairs,
            });
        }

        for (name, pairs) in per_webhook {
            webhook_candidates.entry(name).or_default().push(Candidate {
                container: container.name.clone(),
                running: container.running,
                pairs,
            });
        }
    }

    match decode_pairs(&mut catalog.global, &global_pairs) {
        Ok(report) => {
            let known = catalog.global.keys();
            for key in report.unknown {
                catalog.warnings.push(format!(
                    "unknown global key '{key}' from service container labels{}",
                    suggestion_suffix(&key, &known)
                ));
            }
        }
        Err(err) => catalog.warnings.push(format!("label globals: {err}")),
    }

    for ((kind, name), candidates) in &job_candidates {
        let winner = choose(candidates);
        decode_job(*kind, name, winner, &mut catalog);
    }

    for (name, candidates) in &webhook_candidates {
        let winner = choose(candidates);
        decode_webhook(name, winner, &mut catalog);
    }

    catalog
}

/// Rule 4: running wins over stopped; among running the label map parsed
/// last wins; among stopped the sort already put the newest-created,
/// name-ascending container first.
fn choose(candidates: &[Candidate]) -> &Candidate {
    candidates
        .iter()
        .filter(|c| c.running)
        .next_back()
        .unwrap_or(&candidates[0])
}

fn decode_job(kind: JobKind, name: &str, candidate: &Candidate, catalog: &mut LabelCatalog) {
    if !valid_catalog_name(name) {
        catalog
            .warnings
            .push(format!("container {}: invalid job name '{name}'", candidate.container));
        return;
    }

    let mut spec = JobSpec::new(kind, name);
    spec.common_mut().source = Source::Label;
    if let JobSpec::Exec(exec) = &mut spec {
        // An exec job defined on a container targets that container
        // unless the labels say otherwise.
        exec.container = Some(candidate.container.clone());
    }

    let report = match decode_pairs(&mut spec, &candidate.pairs) {
        Ok(report) => report,
        Err(err) => {
            catalog.errors.push(LabelError::Value {
                container: candidate.container.clone(),
                key: err.key,
                source: err.source,
            });
            return;
        }
    };
    let known = spec.keys();
    for key in report.unknown {
        catalog.warnings.push(format!(
            "container {}: unknown key '{key}' for {} \"{name}\"{}",
            candidate.container,
            kind.section(),
            suggestion_suffix(&key, &known)
        ));
    }

    let schedule = spec.common().schedule.as_deref().unwrap_or("").trim().to_string();
    if schedule.is_empty() {
        catalog.warnings.push(format!(
            "container {}: {} \"{name}\" has no schedule",
            candidate.container,
            kind.section()
        ));
        return;
    }
    if let Err(err) = schedule.parse::<ScheduleExpr>() {
        catalog.warnings.push(format!(
            "container {}: {} \"{name}\": {err}",
            candidate.container,
            kind.section()
        ));
        return;
    }
    if let Some(field) = spec.missing_required_field() {
        catalog.warnings.push(format!(
            "container {}: {} \"{name}\" missing required field '{field}'",
            candidate.container,
            kind.section()
        ));
        return;
    }

    catalog.jobs.insert(spec.key(), spec);
}

fn decode_webhook(name: &str, candidate: &Candidate, catalog: &mut LabelCatalog) {
    let mut webhook = WebhookConfig {
        name: name.to_string(),
        source: Source::Label,
        ..WebhookConfig::default()
    };
    let report = match decode_pairs(&mut webhook, &candidate.pairs) {
        Ok(report) => report,
        Err(err) => {
            catalog.errors.push(LabelError::Value {
                container: candidate.container.clone(),
                key: err.key,
                source: err.source,
            });
            return;
        }
    };
    let known = webhook.keys();
    for key in report.unknown {
        catalog.warnings.push(format!(
            "container {}: unknown key '{key}' for webhook \"{name}\"{}",
            candidate.container,
            suggestion_suffix(&key, &known)
        ));
    }
    if let Err(reason) = webhook.endpoint() {
        catalog.warnings.push(format!(
            "container {}: webhook \"{name}\": {reason}",
            candidate.container
        ));
        return;
    }
    catalog.webhooks.insert(name.to_string(), webhook);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn container(
        name: &str,
        running: bool,
        created_secs: i64,
        labels: &[(&str, &str)],
    ) -> ContainerInfo {
        let mut map = BTreeMap::new();
        map.insert(ENABLED_LABEL.to_string(), "true".to_string());
        for (k, v) in labels {
            map.insert(k.to_string(), v.to_string());
        }
        ContainerInfo {
            id: format!("id-{name}"),
            name: name.to_string(),
            created_at: Utc.timestamp_opt(created_secs, 0).unwrap(),
            running,
            labels: map,
        }
    }

    fn service_container(
        name: &str,
        running: bool,
        created_secs: i64,
        labels: &[(&str, &str)],
    ) -> ContainerInfo {
        let mut c = container(name, running, created_secs, labels);
        c.labels.insert(SERVICE_LABEL.to_string(), "true".to_string());
        c
    }

    #[test]
    fn disabled_containers_contribute_nothing() {
        let mut c = container(
            "web",
            true,
            100,
            &[
                ("ofelia.job-exec.ping.schedule", "@every 10s"),
                ("ofelia.job-exec.ping.command", "true"),
            ],
        );
        c.labels.remove(ENABLED_LABEL);
        let catalog = extract(&[c], false);
        assert!(catalog.jobs.is_empty());
    }

    #[test]
    fn exec_job_is_scoped_and_targets_its_container() {
        let c = container(
            "web-1",
            true,
            100,
            &[
                ("com.docker.compose.service", "web"),
                ("ofelia.job-exec.ping.schedule", "@every 10s"),
                ("ofelia.job-exec.ping.command", "curl localhost"),
            ],
        );
        let catalog = extract(&[c], false);
        let key = JobKey::new(JobKind::Exec, "web.ping");
        let JobSpec::Exec(job) = &catalog.jobs[&key] else { panic!() };
        assert_eq!(job.container.as_deref(), Some("web-1"));
        assert_eq!(job.common.source, Source::Label);
    }

    #[test]
    fn container_name_prefixes_when_no_compose_label() {
        let c = container(
            "standalone",
            true,
            100,
            &[
                ("ofelia.job-exec.ping.schedule", "@hourly"),
                ("ofelia.job-exec.ping.command", "true"),
            ],
        );
        let catalog = extract(&[c], false);
        assert!(catalog.jobs.contains_key(&JobKey::new(JobKind::Exec, "standalone.ping")));
    }

    #[test]
    fn stopped_containers_only_contribute_run_jobs() {
        let c = container(
            "stopped",
            false,
            100,
            &[
                ("ofelia.job-exec.a.schedule", "@hourly"),
                ("ofelia.job-exec.a.command", "true"),
                ("ofelia.job-run.b.schedule", "@hourly"),
                ("ofelia.job-run.b.image", "alpine"),
            ],
        );
        let catalog = extract(&[c], false);
        assert_eq!(catalog.jobs.len(), 1);
        assert!(catalog.jobs.contains_key(&JobKey::new(JobKind::Run, "stopped.b")));
    }

    #[test]
    fn host_jobs_from_labels_are_denied_by_default() {
        let c = service_container(
            "svc",
            true,
            100,
            &[
                ("ofelia.job-local.x.schedule", "@daily"),
                ("ofelia.job-local.x.command", "rm -rf /"),
            ],
        );
        let catalog = extract(&[c], false);
        assert!(catalog.jobs.is_empty());
        assert!(matches!(
            catalog.errors.as_slice(),
            [LabelError::HostJobDenied { .. }]
        ));
    }

    #[test]
    fn host_jobs_allowed_when_toggle_is_on() {
        let c = service_container(
            "svc",
            true,
            100,
            &[
                ("ofelia.job-local.x.schedule", "@daily"),
                ("ofelia.job-local.x.command", "echo ok"),
            ],
        );
        let catalog = extract(&[c], true);
        assert!(catalog.jobs.contains_key(&JobKey::new(JobKind::Local, "x")));
        assert!(catalog.errors.is_empty());
    }

    #[test]
    fn service_run_requires_service_container() {
        let c = container(
            "plain",
            true,
            100,
            &[
                ("ofelia.job-service-run.s.schedule", "@daily"),
                ("ofelia.job-service-run.s.image", "alpine"),
            ],
        );
        let catalog = extract(&[c], false);
        assert!(catalog.jobs.is_empty());
        assert!(catalog.warnings.iter().any(|w| w.contains("service container")));
    }

    #[test]
    fn running_container_wins_over_stopped() {
        let stopped = container(
            "web-old",
            false,
            200,
            &[
                ("com.docker.compose.service", "web"),
                ("ofelia.job-run.sync.schedule", "@hourly"),
                ("ofelia.job-run.sync.image", "old:1"),
            ],
        );
        let running = container(
            "web-new",
            true,
            100,
            &[
                ("com.docker.compose.service", "web"),
                ("ofelia.job-run.sync.schedule", "@hourly"),
                ("ofelia.job-run.sync.image", "new:2"),
            ],
        );
        let catalog = extract(&[stopped, running], false);
        let JobSpec::Run(job) = &catalog.jobs[&JobKey::new(JobKind::Run, "web.sync")] else {
            panic!()
        };
        assert_eq!(job.image.as_deref(), Some("new:2"));
    }

    #[test]
    fn stopped_vs_stopped_prefers_newer_created() {
        let older = container(
            "web-a",
            false,
            100,
            &[
                ("com.docker.compose.service", "web"),
                ("ofelia.job-run.sync.schedule", "@hourly"),
                ("ofelia.job-run.sync.image", "older"),
            ],
        );
        let newer = container(
            "web-b",
            false,
            500,
            &[
                ("com.docker.compose.service", "web"),
                ("ofelia.job-run.sync.schedule", "@hourly"),
                ("ofelia.job-run.sync.image", "newer"),
            ],
        );
        let catalog = extract(&[older, newer], false);
        let JobSpec::Run(job) = &catalog.jobs[&JobKey::new(JobKind::Run, "web.sync")] else {
            panic!()
        };
        assert_eq!(job.image.as_deref(), Some("newer"));
    }

    #[test]
    fn json_list_labels_decode() {
        let c = container(
            "web",
            true,
            100,
            &[
                ("ofelia.job-exec.env.schedule", "@hourly"),
                ("ofelia.job-exec.env.command", "env"),
                ("ofelia.job-exec.env.environment", r#"["A=1","B=2"]"#),
            ],
        );
        let catalog = extract(&[c], false);
        let JobSpec::Exec(job) = &catalog.jobs[&JobKey::new(JobKind::Exec, "web.env")] else {
            panic!()
        };
        assert_eq!(job.environment, vec!["A=1".to_string(), "B=2".to_string()]);
    }

    #[test]
    fn unknown_namespace_warns() {
        let c = container("web", true, 100, &[("ofelia.job-cron.x.schedule", "@daily")]);
        let catalog = extract(&[c], false);
        assert!(
            catalog
                .warnings
                .iter()
                .any(|w| w.contains("unknown label namespace 'ofelia.job-cron.x.schedule'"))
        );
    }

    #[test]
    fn service_container_contributes_global_keys_but_not_file_only_ones() {
        let c = service_container(
            "svc",
            true,
            100,
            &[
                ("ofelia.save-folder", "/var/log/jobs"),
                ("ofelia.allow-host-jobs-from-labels", "true"),
            ],
        );
        let catalog = extract(&[c], false);
        assert_eq!(catalog.global.sinks.save.folder.as_deref(), Some("/var/log/jobs"));
        // the safety toggle cannot be opened from a label
        assert!(!catalog.global.allow_host_jobs_from_labels);
        assert!(catalog.warnings.iter().any(|w| w.contains("cannot be set from labels")));
    }

    #[test]
    fn label_webhooks_are_tagged_label_source() {
        let c = container(
            "web",
            true,
            100,
            &[
                ("ofelia.webhook.alerts.url", "https://example.test/hook"),
                ("ofelia.webhook.alerts.trigger", "error"),
            ],
        );
        let catalog = extract(&[c], false);
        let webhook = &catalog.webhooks["alerts"];
        assert_eq!(webhook.source, Source::Label);
        assert_eq!(
            webhook.trigger,
            crate::config::model::TriggerPolicy::OnError
        );
    }

    #[test]
    fn missing_schedule_drops_with_warning() {
        let c = container("web", true, 100, &[("ofelia.job-exec.x.command", "true")]);
        let catalog = extract(&[c], false);
        assert!(catalog.jobs.is_empty());
        assert!(catalog.warnings.iter().any(|w| w.contains("has no schedule")));
    }
}
