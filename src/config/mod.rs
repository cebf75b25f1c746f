pub mod decode;
pub mod file;
pub mod ini;
pub mod labels;
pub mod model;
pub mod suggest;

use crate::config::decode::{FieldError, ValueError};
use crate::core::schedule::ScheduleError;
use thiserror::Error;

/// Renders the `[job-exec "name"]` breadcrumb used in every
/// configuration error.
pub fn section_label(kind: &str, name: Option<&str>) -> String {
    match name {
        Some(n) => format!("[{kind} \"{n}\"]"),
        None => format!("[{kind}]"),
    }
}

/// Errors from the file source. Fatal for `validate`; at daemon boot they
/// are logged and the daemon continues with the label source alone.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}: {source}")]
    Syntax {
        path: String,
        #[source]
        source: ini::IniError,
    },
    #[error("{section} unknown section kind")]
    UnknownKind { section: String },
    #[error("{section} invalid name")]
    BadName { section: String },
    #[error("{section} missing required field '{field}'")]
    MissingField { section: String, field: &'static str },
    #[error("{section} {source}")]
    Field {
        section: String,
        #[source]
        source: FieldError,
    },
    #[error("{section} schedule: {source}")]
    Schedule {
        section: String,
        #[source]
        source: ScheduleError,
    },
    #[error("{section} webhook '{name}': {reason}")]
    Webhook {
        section: String,
        name: String,
        reason: String,
    },
}

/// Errors from the label source; never fatal, always reported per
/// offending container.
#[derive(Debug, Error)]
pub enum LabelError {
    #[error("container {container}: malformed label key '{key}'")]
    MalformedKey { container: String, key: String },
    #[error("container {container}: {key}: {source}")]
    Value {
        container: String,
        key: String,
        #[source]
        source: ValueError,
    },
    #[error(
        "container {container}: refusing host job {section} from labels (allow-host-jobs-from-labels=false)"
    )]
    HostJobDenied { container: String, section: String },
}
