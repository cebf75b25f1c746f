//! Typed configuration structs for jobs, the global block and webhooks,
//! plus the field-assignment impls the weak decoder drives.
//!
//! Sink blocks use `Option<bool>` for their toggles so a job that
//! explicitly sets `false` is distinguishable from one that inherited the
//! global value.

use crate::config::decode::{DecodeFields, RawValue, ValueError};
use crate::core::job::{JobKey, JobKind, Source};
use std::str::FromStr;
use std::time::Duration;

/// Keys shared by every job kind, squashed into each kind's namespace.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobCommon {
    pub name: String,
    pub schedule: Option<String>,
    pub command: Option<String>,
    pub run_on_startup: Option<bool>,
    pub no_overlap: bool,
    pub webhooks: Vec<String>,
    pub sinks: SinkOverrides,
    pub source: Source,
}

impl DecodeFields for JobCommon {
    fn assign(&mut self, key: &str, raw: &RawValue) -> Result<bool, ValueError> {
        match key {
            "schedule" => self.schedule = Some(raw.string()),
            "command" => self.command = Some(raw.string()),
            "runonstartup" => self.run_on_startup = Some(raw.boolean()?),
            "nooverlap" => self.no_overlap = raw.boolean()?,
            "webhook" => self.webhooks = raw.list()?,
            _ => return self.sinks.assign(key, raw),
        }
        Ok(true)
    }

    fn keys(&self) -> Vec<&'static str> {
        let mut keys = vec!["schedule", "command", "run-on-startup", "no-overlap", "webhook"];
        keys.extend(self.sinks.keys());
        keys
    }
}

/// Mail/slack/save override blocks. Present both on jobs and on the
/// global section; per-job blocks inherit unset fields from the global
/// block (see [`SinkOverrides::merged_over`]).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SinkOverrides {
    pub mail: MailBlock,
    pub slack: SlackBlock,
    pub save: SaveBlock,
}

impl SinkOverrides {
    pub fn is_empty(&self) -> bool {
        !self.mail.is_configured() && !self.slack.is_configured() && !self.save.is_configured()
    }

    /// Field-wise overlay: `self` wins where set, `base` fills the gaps.
    pub fn merged_over(&self, base: &SinkOverrides) -> SinkOverrides {
        SinkOverrides {
            mail: self.mail.merged_over(&base.mail),
            slack: self.slack.merged_over(&base.slack),
            save: self.save.merged_over(&base.save),
        }
    }

    /// Per-job inheritance: a block the job never mentioned stays empty
    /// (the scheduler-level sink covers it); a block the job touched
    /// inherits the global defaults underneath its own settings.
    pub fn inherit_touched(&mut self, global: &SinkOverrides) {
        if self.mail != MailBlock::default() {
            self.mail = self.mail.merged_over(&global.mail);
        }
        if self.slack != SlackBlock::default() {
            self.slack = self.slack.merged_over(&global.slack);
        }
        if self.save != SaveBlock::default() {
            self.save = self.save.merged_over(&global.save);
        }
    }
}

impl DecodeFields for SinkOverrides {
    fn assign(&mut self, key: &str, raw: &RawValue) -> Result<bool, ValueError> {
        if self.mail.assign(key, raw)? {
            return Ok(true);
        }
        if self.slack.assign(key, raw)? {
            return Ok(true);
        }
        self.save.assign(key, raw)
    }

    fn keys(&self) -> Vec<&'static str> {
        let mut keys = self.mail.keys();
        keys.extend(self.slack.keys());
        keys.extend(self.save.keys());
        keys
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MailBlock {
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
    pub email_to: Option<String>,
    pub email_from: Option<String>,
    pub only_on_error: Option<bool>,
}

impl MailBlock {
    pub fn is_configured(&self) -> bool {
        self.smtp_host.is_some() && self.email_to.is_some() && self.email_from.is_some()
    }

    pub fn merged_over(&self, base: &MailBlock) -> MailBlock {
        MailBlock {
            smtp_host: self.smtp_host.clone().or_else(|| base.smtp_host.clone()),
            smtp_port: self.smtp_port.or(base.smtp_port),
            smtp_user: self.smtp_user.clone().or_else(|| base.smtp_user.clone()),
            smtp_password: self.smtp_password.clone().or_else(|| base.smtp_password.clone()),
            email_to: self.email_to.clone().or_else(|| base.email_to.clone()),
            email_from: self.email_from.clone().or_else(|| base.email_from.clone()),
            only_on_error: self.only_on_error.or(base.only_on_error),
        }
    }
}

impl DecodeFields for MailBlock {
    fn assign(&mut self, key: &str, raw: &RawValue) -> Result<bool, ValueError> {
        match key {
            "smtphost" => self.smtp_host = Some(raw.string()),
            "smtpport" => self.smtp_port = Some(raw.integer()?),
            "smtpuser" => self.smtp_user = Some(raw.string()),
            "smtppassword" => self.smtp_password = Some(raw.string()),
            "emailto" => self.email_to = Some(raw.string()),
            "emailfrom" => self.email_from = Some(raw.string()),
            "mailonlyonerror" => self.only_on_error = Some(raw.boolean()?),
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn keys(&self) -> Vec<&'static str> {
        vec![
            "smtp-host",
            "smtp-port",
            "smtp-user",
            "smtp-password",
            "email-to",
            "email-from",
            "mail-only-on-error",
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlackBlock {
    pub webhook: Option<String>,
    pub only_on_error: Option<bool>,
}

impl SlackBlock {
    pub fn is_configured(&self) -> bool {
        self.webhook.is_some()
    }

    pub fn merged_over(&self, base: &SlackBlock) -> SlackBlock {
        SlackBlock {
            webhook: self.webhook.clone().or_else(|| base.webhook.clone()),
            only_on_error: self.only_on_error.or(base.only_on_error),
        }
    }
}

impl DecodeFields for SlackBlock {
    fn assign(&mut self, key: &str, raw: &RawValue) -> Result<bool, ValueError> {
        match key {
            "slackwebhook" => self.webhook = Some(raw.string()),
            "slackonlyonerror" => self.only_on_error = Some(raw.boolean()?),
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn keys(&self) -> Vec<&'static str> {
        vec!["slack-webhook", "slack-only-on-error"]
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaveBlock {
    pub folder: Option<String>,
    pub only_on_error: Option<bool>,
}

impl SaveBlock {
    pub fn is_configured(&self) -> bool {
        self.folder.is_some()
    }

    pub fn merged_over(&self, base: &SaveBlock) -> SaveBlock {
        SaveBlock {
            folder: self.folder.clone().or_else(|| base.folder.clone()),
            only_on_error: self.only_on_error.or(base.only_on_error),
        }
    }
}

impl DecodeFields for SaveBlock {
    fn assign(&mut self, key: &str, raw: &RawValue) -> Result<bool, ValueError> {
        match key {
            "savefolder" => self.folder = Some(raw.string()),
            "saveonlyonerror" => self.only_on_error = Some(raw.boolean()?),
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn keys(&self) -> Vec<&'static str> {
        vec!["save-folder", "save-only-on-error"]
    }
}

/// Image pull behaviour for run/service jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PullPolicy {
    Always,
    #[default]
    Missing,
    Never,
}

impl FromStr for PullPolicy {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "always" | "true" => Ok(PullPolicy::Always),
            "missing" | "if-not-present" => Ok(PullPolicy::Missing),
            "never" | "false" => Ok(PullPolicy::Never),
            _ => Err(ValueError::BadChoice(s.to_string(), "always, missing, never")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecJobConfig {
    pub common: JobCommon,
    pub container: Option<String>,
    pub user: Option<String>,
    pub dir: Option<String>,
    pub environment: Vec<String>,
    pub tty: bool,
}

impl DecodeFields for ExecJobConfig {
    fn assign(&mut self, key: &str, raw: &RawValue) -> Result<bool, ValueError> {
        match key {
            "container" => self.container = Some(raw.string()),
            "user" => self.user = Some(raw.string()),
            "dir" => self.dir = Some(raw.string()),
            "environment" => self.environment = raw.list()?,
            "tty" => self.tty = raw.boolean()?,
            _ => return self.common.assign(key, raw),
        }
        Ok(true)
    }

    fn keys(&self) -> Vec<&'static str> {
        let mut keys = vec!["container", "user", "dir", "environment", "tty"];
        keys.extend(self.common.keys());
        keys
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunJobConfig {
    pub common: JobCommon,
    pub image: Option<String>,
    /// Reuse an existing container instead of creating one from `image`.
    pub container: Option<String>,
    pub user: Option<String>,
    pub network: Option<String>,
    pub hostname: Option<String>,
    /// `None` means no override; `Some("")` is an explicit empty
    /// entrypoint, which suppresses the image's own.
    pub entrypoint: Option<String>,
    pub volumes: Vec<String>,
    pub volumes_from: Vec<String>,
    pub environment: Vec<String>,
    pub tty: bool,
    pub pull: PullPolicy,
    /// Delete the container after the run; defaults to true when the
    /// container was created by us.
    pub delete: Option<bool>,
}

impl DecodeFields for RunJobConfig {
    fn assign(&mut self, key: &str, raw: &RawValue) -> Result<bool, ValueError> {
        match key {
            "image" => self.image = Some(raw.string()),
            "container" => self.container = Some(raw.string()),
            "user" => self.user = Some(raw.string()),
            "network" => self.network = Some(raw.string()),
            "hostname" => self.hostname = Some(raw.string()),
            "entrypoint" => self.entrypoint = Some(raw.string()),
            "volume" => self.volumes = raw.list()?,
            "volumesfrom" => self.volumes_from = raw.list()?,
            "environment" => self.environment = raw.list()?,
            "tty" => self.tty = raw.boolean()?,
            "pull" => self.pull = raw.string().parse()?,
            "delete" => self.delete = Some(raw.boolean()?),
            _ => return self.common.assign(key, raw),
        }
        Ok(true)
    }

    fn keys(&self) -> Vec<&'static str> {
        let mut keys = vec![
            "image",
            "container",
            "user",
            "network",
            "hostname",
            "entrypoint",
            "volume",
            "volumes-from",
            "environment",
            "tty",
            "pull",
            "delete",
        ];
        keys.extend(self.common.keys());
        keys
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalJobConfig {
    pub common: JobCommon,
    pub dir: Option<String>,
    pub environment: Vec<String>,
}

impl DecodeFields for LocalJobConfig {
    fn assign(&mut self, key: &str, raw: &RawValue) -> Result<bool, ValueError> {
        match key {
            "dir" => self.dir = Some(raw.string()),
            "environment" => self.environment = raw.list()?,
            _ => return self.common.assign(key, raw),
        }
        Ok(true)
    }

    fn keys(&self) -> Vec<&'static str> {
        let mut keys = vec!["dir", "environment"];
        keys.extend(self.common.keys());
        keys
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceRunJobConfig {
    pub common: JobCommon,
    pub image: Option<String>,
    pub user: Option<String>,
    pub network: Option<String>,
    pub environment: Vec<String>,
    pub delete: Option<bool>,
    pub pull: PullPolicy,
}

impl DecodeFields for ServiceRunJobConfig {
    fn assign(&mut self, key: &str, raw: &RawValue) -> Result<bool, ValueError> {
        match key {
            "image" => self.image = Some(raw.string()),
            "user" => self.user = Some(raw.string()),
            "network" => self.network = Some(raw.string()),
            "environment" => self.environment = raw.list()?,
            "delete" => self.delete = Some(raw.boolean()?),
            "pull" => self.pull = raw.string().parse()?,
            _ => return self.common.assign(key, raw),
        }
        Ok(true)
    }

    fn keys(&self) -> Vec<&'static str> {
        let mut keys = vec!["image", "user", "network", "environment", "delete", "pull"];
        keys.extend(self.common.keys());
        keys
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComposeJobConfig {
    pub common: JobCommon,
    pub file: Option<String>,
    pub service: Option<String>,
    /// Exec into the running service instead of `run --rm`.
    pub exec: bool,
    pub environment: Vec<String>,
}

impl DecodeFields for ComposeJobConfig {
    fn assign(&mut self, key: &str, raw: &RawValue) -> Result<bool, ValueError> {
        match key {
            "file" => self.file = Some(raw.string()),
            "service" => self.service = Some(raw.string()),
            "exec" => self.exec = raw.boolean()?,
            "environment" => self.environment = raw.list()?,
            _ => return self.common.assign(key, raw),
        }
        Ok(true)
    }

    fn keys(&self) -> Vec<&'static str> {
        let mut keys = vec!["file", "service", "exec", "environment"];
        keys.extend(self.common.keys());
        keys
    }
}

/// Tagged variant over the five job kinds; the unit the catalogs and the
/// reconciler diff traffic in. Structural equality is derived equality.
#[derive(Debug, Clone, PartialEq)]
pub enum JobSpec {
    Exec(ExecJobConfig),
    Run(RunJobConfig),
    Local(LocalJobConfig),
    ServiceRun(ServiceRunJobConfig),
    Compose(ComposeJobConfig),
}

impl JobSpec {
    pub fn new(kind: JobKind, name: impl Into<String>) -> JobSpec {
        let mut spec = match kind {
            JobKind::Exec => JobSpec::Exec(ExecJobConfig::default()),
            JobKind::Run => JobSpec::Run(RunJobConfig::default()),
            JobKind::Local => JobSpec::Local(LocalJobConfig::default()),
            JobKind::ServiceRun => JobSpec::ServiceRun(ServiceRunJobConfig::default()),
            JobKind::Compose => JobSpec::Compose(ComposeJobConfig::default()),
        };
        spec.common_mut().name = name.into();
        spec
    }

    pub fn kind(&self) -> JobKind {
        match self {
            JobSpec::Exec(_) => JobKind::Exec,
            JobSpec::Run(_) => JobKind::Run,
            JobSpec::Local(_) => JobKind::Local,
            JobSpec::ServiceRun(_) => JobKind::ServiceRun,
            JobSpec::Compose(_) => JobKind::Compose,
        }
    }

    pub fn key(&self) -> JobKey {
        JobKey::new(self.kind(), self.common().name.clone())
    }

    pub fn common(&self) -> &JobCommon {
        match self {
            JobSpec::Exec(j) => &j.common,
            JobSpec::Run(j) => &j.common,
            JobSpec::Local(j) => &j.common,
            JobSpec::ServiceRun(j) => &j.common,
            JobSpec::Compose(j) => &j.common,
        }
    }

    pub fn common_mut(&mut self) -> &mut JobCommon {
        match self {
            JobSpec::Exec(j) => &mut j.common,
            JobSpec::Run(j) => &mut j.common,
            JobSpec::Local(j) => &mut j.common,
            JobSpec::ServiceRun(j) => &mut j.common,
            JobSpec::Compose(j) => &mut j.common,
        }
    }

    /// Kind-specific required fields, checked after decode and defaults.
    /// Returns the offending field name.
    pub fn missing_required_field(&self) -> Option<&'static str> {
        match self {
            JobSpec::Exec(j) => {
                if j.container.is_none() {
                    Some("container")
                } else if j.common.command.is_none() {
                    Some("command")
                } else {
                    None
                }
            }
            JobSpec::Run(j) => {
                if j.image.is_none() && j.container.is_none() {
                    Some("image")
                } else {
                    None
                }
            }
            JobSpec::Local(j) => {
                if j.common.command.is_none() {
                    Some("command")
                } else {
                    None
                }
            }
            JobSpec::ServiceRun(j) => {
                if j.image.is_none() {
                    Some("image")
                } else {
                    None
                }
            }
            JobSpec::Compose(j) => {
                if j.service.is_none() && j.common.command.is_none() {
                    Some("service")
                } else {
                    None
                }
            }
        }
    }

}

impl DecodeFields for JobSpec {
    fn assign(&mut self, key: &str, raw: &RawValue) -> Result<bool, ValueError> {
        match self {
            JobSpec::Exec(j) => j.assign(key, raw),
            JobSpec::Run(j) => j.assign(key, raw),
            JobSpec::Local(j) => j.assign(key, raw),
            JobSpec::ServiceRun(j) => j.assign(key, raw),
            JobSpec::Compose(j) => j.assign(key, raw),
        }
    }

    fn keys(&self) -> Vec<&'static str> {
        match self {
            JobSpec::Exec(j) => j.keys(),
            JobSpec::Run(j) => j.keys(),
            JobSpec::Local(j) => j.keys(),
            JobSpec::ServiceRun(j) => j.keys(),
            JobSpec::Compose(j) => j.keys(),
        }
    }
}

/// Execution-surface trigger for webhooks: `always` or only on errors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TriggerPolicy {
    #[default]
    Always,
    OnError,
}

impl FromStr for TriggerPolicy {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "always" => Ok(TriggerPolicy::Always),
            "error" | "on-error" => Ok(TriggerPolicy::OnError),
            _ => Err(ValueError::BadChoice(s.to_string(), "always, error")),
        }
    }
}

impl TriggerPolicy {
    pub fn fires_for(&self, outcome_is_error: bool) -> bool {
        match self {
            TriggerPolicy::Always => true,
            TriggerPolicy::OnError => outcome_is_error,
        }
    }
}

/// A named webhook endpoint. Label-sourced entries never overwrite
/// file-sourced entries of the same name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WebhookConfig {
    pub name: String,
    pub preset: Option<String>,
    pub url: Option<String>,
    pub id: Option<String>,
    pub token: Option<String>,
    pub trigger: TriggerPolicy,
    pub source: Source,
}

impl WebhookConfig {
    /// Resolves the preset + credentials into a URL.
    pub fn endpoint(&self) -> Result<String, String> {
        match self.preset.as_deref() {
            Some("slack") => match (&self.id, &self.token) {
                (Some(id), Some(token)) => {
                    Ok(format!("https://hooks.slack.com/services/{id}/{token}"))
                }
                _ => Err("slack preset requires 'id' and 'token'".to_string()),
            },
            Some("discord") => match (&self.id, &self.token) {
                (Some(id), Some(token)) => {
                    Ok(format!("https://discord.com/api/webhooks/{id}/{token}"))
                }
                _ => Err("discord preset requires 'id' and 'token'".to_string()),
            },
            Some("generic") | None => self
                .url
                .clone()
                .ok_or_else(|| "webhook requires 'url' when no preset is set".to_string()),
            Some(other) => Err(format!("unknown webhook preset '{other}'")),
        }
    }
}

impl DecodeFields for WebhookConfig {
    fn assign(&mut self, key: &str, raw: &RawValue) -> Result<bool, ValueError> {
        match key {
            "preset" => self.preset = Some(raw.string()),
            "url" => self.url = Some(raw.string()),
            "id" => self.id = Some(raw.string()),
            "token" => self.token = Some(raw.string()),
            "trigger" => self.trigger = raw.string().parse()?,
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn keys(&self) -> Vec<&'static str> {
        vec!["preset", "url", "id", "token", "trigger"]
    }
}

/// Web / auth / pprof surface knobs. Parsed and validated here; binding
/// the surfaces is the front-ends' concern.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WebConfig {
    pub enable_web: bool,
    pub web_address: Option<String>,
    pub enable_pprof: bool,
    pub pprof_address: Option<String>,
    pub auth_user: Option<String>,
    pub auth_password: Option<String>,
}

impl DecodeFields for WebConfig {
    fn assign(&mut self, key: &str, raw: &RawValue) -> Result<bool, ValueError> {
        match key {
            "enableweb" => self.enable_web = raw.boolean()?,
            "webaddress" => self.web_address = Some(raw.string()),
            "enablepprof" => self.enable_pprof = raw.boolean()?,
            "pprofaddress" => self.pprof_address = Some(raw.string()),
            "authuser" => self.auth_user = Some(raw.string()),
            "authpassword" => self.auth_password = Some(raw.string()),
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn keys(&self) -> Vec<&'static str> {
        vec![
            "enable-web",
            "web-address",
            "enable-pprof",
            "pprof-address",
            "auth-user",
            "auth-password",
        ]
    }
}

const DEFAULT_CONTAINER_POLL: Duration = Duration::from_secs(60);
const DEFAULT_CONFIG_POLL: Duration = Duration::from_secs(60);
const DEFAULT_FALLBACK_POLL: Duration = Duration::from_secs(30);

/// Poll and event knobs, including the legacy pair. `poll-interval` and
/// `no-poll` only apply where the corresponding new knob is unset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollConfig {
    pub docker_poll_interval: Option<Duration>,
    pub config_poll_interval: Option<Duration>,
    pub polling_fallback: Option<Duration>,
    pub poll_interval: Option<Duration>,
    pub no_poll: Option<bool>,
}

/// Resolved intervals; zero disables the poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveIntervals {
    pub container: Duration,
    pub config: Duration,
    pub fallback: Duration,
}

impl PollConfig {
    pub fn effective(&self) -> EffectiveIntervals {
        let no_poll = self.no_poll.unwrap_or(false);
        let legacy = self.poll_interval;

        let container = self.docker_poll_interval.unwrap_or(if no_poll {
            Duration::ZERO
        } else {
            legacy.unwrap_or(DEFAULT_CONTAINER_POLL)
        });
        let fallback = self.polling_fallback.unwrap_or(if no_poll {
            Duration::ZERO
        } else {
            legacy.unwrap_or(DEFAULT_FALLBACK_POLL)
        });
        let config = self
            .config_poll_interval
            .or(legacy)
            .unwrap_or(DEFAULT_CONFIG_POLL);

        EffectiveIntervals { container, config, fallback }
    }
}

impl DecodeFields for PollConfig {
    fn assign(&mut self, key: &str, raw: &RawValue) -> Result<bool, ValueError> {
        match key {
            "dockerpollinterval" => self.docker_poll_interval = Some(raw.duration()?),
            "configpollinterval" => self.config_poll_interval = Some(raw.duration()?),
            "pollingfallback" => self.polling_fallback = Some(raw.duration()?),
            "pollinterval" => self.poll_interval = Some(raw.duration()?),
            "nopoll" => self.no_poll = Some(raw.boolean()?),
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn keys(&self) -> Vec<&'static str> {
        vec![
            "docker-poll-interval",
            "config-poll-interval",
            "polling-fallback",
            "poll-interval",
            "no-poll",
        ]
    }
}

/// The `[global]` section: defaults inherited by jobs, the safety toggle
/// for label-defined host jobs, sink defaults and surface knobs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalConfig {
    pub default_user: Option<String>,
    pub run_on_startup: Option<bool>,
    pub allow_host_jobs_from_labels: bool,
    pub sinks: SinkOverrides,
    pub web: WebConfig,
    pub poll: PollConfig,
}

impl DecodeFields for GlobalConfig {
    fn assign(&mut self, key: &str, raw: &RawValue) -> Result<bool, ValueError> {
        match key {
            "defaultuser" => self.default_user = Some(raw.string()),
            "runonstartup" => self.run_on_startup = Some(raw.boolean()?),
            "allowhostjobsfromlabels" => self.allow_host_jobs_from_labels = raw.boolean()?,
            _ => {
                if self.sinks.assign(key, raw)? {
                    return Ok(true);
                }
                if self.web.assign(key, raw)? {
                    return Ok(true);
                }
                return self.poll.assign(key, raw);
            }
        }
        Ok(true)
    }

    fn keys(&self) -> Vec<&'static str> {
        let mut keys = vec!["default-user", "run-on-startup", "allow-host-jobs-from-labels"];
        keys.extend(self.sinks.keys());
        keys.extend(self.web.keys());
        keys.extend(self.poll.keys());
        keys
    }
}
