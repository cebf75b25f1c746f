//! File-source loader: resolves a path or glob, parses each file's
//! INI-style sections, merges later-file-wins, decodes and validates, and
//! tags everything `source=file`.

use crate::config::decode::{DecodeFields, decode_pairs};
use crate::config::model::{GlobalConfig, JobSpec, WebhookConfig};
use crate::config::suggest::suggestion_suffix;
use crate::config::{ConfigError, ini, section_label};
use crate::core::job::{JobKind, Source, valid_name};
use crate::core::schedule::ScheduleExpr;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::SystemTime;

/// How strictly schedules are checked. A missing or empty schedule drops
/// the job under `Daemon` but passes a `Validate` run, where it counts as
/// absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    Daemon,
    Validate,
}

#[derive(Debug, Default)]
pub struct LoadedConfig {
    pub global: GlobalConfig,
    pub jobs: BTreeMap<crate::core::job::JobKey, JobSpec>,
    pub webhooks: BTreeMap<String, WebhookConfig>,
    /// Modification time of every file that contributed, for the config
    /// poller's change detection.
    pub files: BTreeMap<PathBuf, SystemTime>,
    /// Per-section problems that dropped a job but not the whole source.
    pub job_errors: Vec<ConfigError>,
    /// Unknown keys and other non-fatal findings.
    pub warnings: Vec<String>,
}

/// Returns the files a config pattern names. A pattern without glob
/// metacharacters that matches nothing resolves to itself, so a missing
/// literal path surfaces as an open error rather than silence.
pub fn resolve_config_files(pattern: &str) -> Vec<PathBuf> {
    let matched: Vec<PathBuf> = match glob::glob(pattern) {
        Ok(paths) => {
            let mut hits: Vec<PathBuf> = paths.filter_map(Result::ok).collect();
            hits.sort();
            hits
        }
        Err(_) => Vec::new(),
    };

    let has_meta = pattern.contains(['*', '?', '[']);
    if matched.is_empty() && !has_meta {
        return vec![PathBuf::from(pattern)];
    }
    matched
}

#[derive(Debug, Clone)]
pub struct FileSource {
    pattern: String,
}

impl FileSource {
    pub fn new(pattern: impl Into<String>) -> Self {
        FileSource { pattern: pattern.into() }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Stat snapshot of the currently-resolved file set, used by the
    /// config poller to detect changes without parsing.
    pub fn stat(&self) -> BTreeMap<PathBuf, SystemTime> {
        let mut out = BTreeMap::new();
        for path in resolve_config_files(&self.pattern) {
            if let Ok(meta) = std::fs::metadata(&path)
                && let Ok(mtime) = meta.modified()
            {
                out.insert(path, mtime);
            }
        }
        out
    }

    /// Parses and validates every resolved file. `Err` means the whole
    /// file source is unusable (unreadable file, syntax error); per-job
    /// problems land in `job_errors` instead.
    pub fn load(&self, mode: LoadMode) -> Result<LoadedConfig, ConfigError> {
        let mut loaded = LoadedConfig::default();

        // (kind, name) -> pairs; later file wins per section, global
        // sections merge key-by-key.
        let mut sections: BTreeMap<(String, Option<String>), Vec<(String, String)>> =
            BTreeMap::new();

        for path in resolve_config_files(&self.pattern) {
            let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                path: path.display().to_string(),
                source,
            })?;
            let doc = ini::parse(&text).map_err(|source| ConfigError::Syntax {
                path: path.display().to_string(),
                source,
            })?;

            if let Ok(meta) = std::fs::metadata(&path)
                && let Ok(mtime) = meta.modified()
            {
                loaded.files.insert(path.clone(), mtime);
            }

            for section in doc.sections {
                let id = (section.kind.clone(), section.name.clone());
                if section.kind == "global" {
                    sections.entry(id).or_default().extend(section.values);
                } else {
                    sections.insert(id, section.values);
                }
            }
        }

        for ((kind_token, name), pairs) in &sections {
            let label = section_label(kind_token, name.as_deref());
            match kind_token.as_str() {
                "global" => {
                    let report = match decode_pairs(&mut loaded.global, pairs) {
                        Ok(report) => report,
                        Err(source) => {
                            loaded
                                .job_errors
                                .push(ConfigError::Field { section: label, source });
                            continue;
                        }
                    };
                    let known = loaded.global.keys();
                    for key in report.unknown {
                        loaded.warnings.push(unknown_key_warning(&key, "global", None, &known));
                    }
                }
                "webhook" => {
                    let Some(name) = name else {
                        loaded.job_errors.push(ConfigError::BadName { section: label });
                        continue;
                    };
                    if let Err(err) = self.decode_webhook(name, pairs, &mut loaded) {
                        loaded.job_errors.push(err);
                    }
                }
                _ => match JobKind::from_section(kind_token) {
                    Some(kind) => {
                        if let Err(err) =
                            self.decode_job(kind, name.as_deref(), pairs, mode, &mut loaded)
                        {
                            loaded.job_errors.push(err);
                        }
                    }
                    None => {
                        loaded.job_errors.push(ConfigError::UnknownKind { section: label });
                    }
                },
            }
        }

        self.check_webhook_references(&mut loaded);
        Ok(loaded)
    }

    fn decode_webhook(
        &self,
        name: &str,
        pairs: &[(String, String)],
        loaded: &mut LoadedConfig,
    ) -> Result<(), ConfigError> {
        let label = section_label("webhook", Some(name));
        if !valid_name(name) {
            return Err(ConfigError::BadName { section: label });
        }

        let mut webhook = WebhookConfig {
            name: name.to_string(),
            source: Source::File,
            ..WebhookConfig::default()
        };
        let report = decode_pairs(&mut webhook, pairs)
            .map_err(|source| ConfigError::Field { section: label.clone(), source })?;
        let known = webhook.keys();
        for key in report.unknown {
            loaded
                .warnings
                .push(unknown_key_warning(&key, "webhook", Some(name), &known));
        }

        webhook.endpoint().map_err(|reason| ConfigError::Webhook {
            section: label,
            name: name.to_string(),
            reason,
        })?;
        loaded.webhooks.insert(name.to_string(), webhook);
        Ok(())
    }

    fn decode_job(
        &self,
        kind: JobKind,
        name: Option<&str>,
        pairs: &[(String, String)],
        mode: LoadMode,
        loaded: &mut LoadedConfig,
    ) -> Result<(), ConfigError> {
        let label = section_label(kind.section(), name);
        let Some(name) = name else {
            return Err(ConfigError::BadName { section: label });
        };
        if !valid_name(name) {
            return Err(ConfigError::BadName { section: label });
        }

        let mut spec = JobSpec::new(kind, name);
        spec.common_mut().source = Source::File;

        let report = decode_pairs(&mut spec, pairs)
            .map_err(|source| ConfigError::Field { section: label.clone(), source })?;
        let known = spec.keys();
        for key in report.unknown {
            loaded
                .warnings
                .push(unknown_key_warning(&key, kind.section(), Some(name), &known));
        }

        validate_schedule(&spec, &label, mode)?;
        if let Some(field) = spec.missing_required_field() {
            return Err(ConfigError::MissingField { section: label, field });
        }

        loaded.jobs.insert(spec.key(), spec);
        Ok(())
    }

    fn check_webhook_references(&self, loaded: &mut LoadedConfig) {
        for (key, job) in &loaded.jobs {
            for name in &job.common().webhooks {
                if !loaded.webhooks.contains_key(name) {
                    loaded
                        .warnings
                        .push(format!("{key} references unknown webhook '{name}'"));
                }
            }
        }
    }
}

fn validate_schedule(spec: &JobSpec, label: &str, mode: LoadMode) -> Result<(), ConfigError> {
    let text = spec.common().schedule.as_deref().unwrap_or("").trim();
    if text.is_empty() {
        return match mode {
            LoadMode::Daemon => Err(ConfigError::MissingField {
                section: label.to_string(),
                field: "schedule",
            }),
            // An absent schedule passes validation; the job may be meant
            // for explicit runs only.
            LoadMode::Validate => Ok(()),
        };
    }
    text.parse::<ScheduleExpr>()
        .map(|_| ())
        .map_err(|source| ConfigError::Schedule { section: label.to_string(), source })
}

fn unknown_key_warning(
    key: &str,
    kind: &str,
    name: Option<&str>,
    known: &[&'static str],
) -> String {
    let place = match name {
        Some(n) => format!("{kind} \"{n}\""),
        None => kind.to_string(),
    };
    format!(
        "Unknown configuration key '{key}' in {place}{}",
        suggestion_suffix(key, known)
    )
}

/// True when the stat snapshot differs from `previous`: a tracked file's
/// mtime advanced, or the resolved file set itself changed.
pub fn files_changed(
    current: &BTreeMap<PathBuf, SystemTime>,
    previous: &BTreeMap<PathBuf, SystemTime>,
) -> bool {
    current != previous
}
