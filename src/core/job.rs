use serde::Serialize;
use std::fmt::{Display, Formatter};
use std::sync::OnceLock;

/// The five ways a command can be executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    Exec,
    Run,
    Local,
    ServiceRun,
    Compose,
}

impl JobKind {
    /// Config-file section token, also used in error breadcrumbs.
    pub fn section(&self) -> &'static str {
        match self {
            JobKind::Exec => "job-exec",
            JobKind::Run => "job-run",
            JobKind::Local => "job-local",
            JobKind::ServiceRun => "job-service-run",
            JobKind::Compose => "job-compose",
        }
    }

    pub fn from_section(token: &str) -> Option<JobKind> {
        match token {
            "job-exec" => Some(JobKind::Exec),
            "job-run" => Some(JobKind::Run),
            "job-local" => Some(JobKind::Local),
            "job-service-run" => Some(JobKind::ServiceRun),
            "job-compose" => Some(JobKind::Compose),
            _ => None,
        }
    }

    pub const ALL: [JobKind; 5] = [
        JobKind::Exec,
        JobKind::Run,
        JobKind::Local,
        JobKind::ServiceRun,
        JobKind::Compose,
    ];
}

impl Display for JobKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.section())
    }
}

/// Job identity: unique per kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct JobKey {
    pub kind: JobKind,
    pub name: String,
}

impl JobKey {
    pub fn new(kind: JobKind, name: impl Into<String>) -> Self {
        JobKey { kind, name: name.into() }
    }
}

impl Display for JobKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} \"{}\"", self.kind.section(), self.name)
    }
}

/// Which live source defined a job or webhook. File entries are
/// authoritative on conflicts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    #[default]
    File,
    Label,
}

impl Display for Source {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::File => f.write_str("file"),
            Source::Label => f.write_str("label"),
        }
    }
}

fn name_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid regex"))
}

fn catalog_name_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"^[A-Za-z0-9_.-]+$").expect("valid regex"))
}

/// Bare job-name segment as written in a file section or a label key.
pub fn valid_name(name: &str) -> bool {
    name_re().is_match(name)
}

/// Catalog-level name, which may carry the `prefix.job` dot introduced by
/// label scoping.
pub fn valid_catalog_name(name: &str) -> bool {
    catalog_name_re().is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_round_trip() {
        for kind in JobKind::ALL {
            assert_eq!(JobKind::from_section(kind.section()), Some(kind));
        }
        assert_eq!(JobKind::from_section("job-cron"), None);
    }

    #[test]
    fn key_display_matches_breadcrumb_format() {
        let key = JobKey::new(JobKind::Exec, "backup");
        assert_eq!(key.to_string(), "job-exec \"backup\"");
    }

    #[test]
    fn name_validation() {
        assert!(valid_name("backup_2-daily"));
        assert!(!valid_name("has space"));
        assert!(!valid_name("dotted.name"));
        assert!(valid_catalog_name("web.backup"));
        assert!(!valid_catalog_name("bad/name"));
    }
}
