use crate::core::job::JobKey;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// How a single firing of a job ended. This is the record sinks consume;
/// a skipped overlap is an outcome of its own, not an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum Outcome {
    Ok,
    Error { kind: String, message: String },
    SkippedOverlap,
    Cancelled,
}

impl Outcome {
    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::Error { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Ok => "ok",
            Outcome::Error { .. } => "error",
            Outcome::SkippedOverlap => "skipped-overlap",
            Outcome::Cancelled => "cancelled",
        }
    }
}

/// One completed (or skipped) execution of a job.
#[derive(Debug, Clone, Serialize)]
pub struct Execution {
    pub job: JobKey,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub outcome: Outcome,
    pub stdout: String,
    pub stderr: String,
}

impl Execution {
    pub fn begin(job: JobKey, now: DateTime<Utc>) -> Self {
        Execution {
            job,
            started_at: now,
            finished_at: None,
            outcome: Outcome::Ok,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    pub fn finish(&mut self, outcome: Outcome, now: DateTime<Utc>) {
        self.outcome = outcome;
        self.finished_at = Some(now);
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at.unwrap_or(self.started_at) - self.started_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::job::JobKind;

    #[test]
    fn outcome_labels() {
        assert_eq!(Outcome::Ok.label(), "ok");
        assert_eq!(Outcome::SkippedOverlap.label(), "skipped-overlap");
        assert!(
            Outcome::Error { kind: "panic".into(), message: "boom".into() }.is_error()
        );
        assert!(!Outcome::Cancelled.is_error());
    }

    #[test]
    fn execution_serialises_for_sinks() {
        let mut exec = Execution::begin(JobKey::new(JobKind::Local, "cleanup"), Utc::now());
        exec.finish(Outcome::Ok, Utc::now());
        let json = serde_json::to_value(&exec).unwrap();
        assert_eq!(json["outcome"], "ok");
        assert_eq!(json["job"]["kind"], "local");
        assert_eq!(json["job"]["name"], "cleanup");
    }
}
