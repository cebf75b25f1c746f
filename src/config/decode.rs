//! Weakly-typed decoding of loose key/value input (INI sections, label
//! maps) into the typed configuration structs.
//!
//! Keys are matched case-insensitively after stripping `-` and `_`, so
//! `no-overlap`, `No_Overlap` and `NOOVERLAP` all address the same field.
//! Scalars promote to single-element lists, numeric and boolean strings
//! coerce, and list-valued fields accept a JSON array in a single scalar.

use std::time::Duration;
use thiserror::Error;

/// `normalise("No-Overlap") == "nooverlap"`. Pure, and the only key
/// canonicalisation used anywhere in the decoder.
pub fn normalise(key: &str) -> String {
    key.chars()
        .filter(|c| *c != '-' && *c != '_')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// A raw configuration value before typing: a single scalar, or the
/// accumulation of a repeated key.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Scalar(String),
    List(Vec<String>),
}

#[derive(Debug, Error, PartialEq)]
pub enum ValueError {
    #[error("expected a single value, got a list")]
    ExpectedScalar,
    #[error("invalid boolean '{0}'")]
    BadBool(String),
    #[error("invalid number '{0}'")]
    BadNumber(String),
    #[error("invalid duration '{0}': {1}")]
    BadDuration(String, String),
    #[error("invalid JSON list '{0}': {1}")]
    BadJsonList(String, String),
    #[error("invalid value '{0}', expected one of {1}")]
    BadChoice(String, &'static str),
}

impl RawValue {
    pub fn push(&mut self, value: String) {
        match self {
            RawValue::Scalar(existing) => {
                *self = RawValue::List(vec![std::mem::take(existing), value]);
            }
            RawValue::List(items) => items.push(value),
        }
    }

    /// Scalar view; a repeated key resolves to its last occurrence.
    pub fn string(&self) -> String {
        match self {
            RawValue::Scalar(s) => s.clone(),
            RawValue::List(items) => items.last().cloned().unwrap_or_default(),
        }
    }

    pub fn boolean(&self) -> Result<bool, ValueError> {
        let s = self.string();
        match s.to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(ValueError::BadBool(s)),
        }
    }

    pub fn integer<T: std::str::FromStr>(&self) -> Result<T, ValueError> {
        let s = self.string();
        s.trim().parse().map_err(|_| ValueError::BadNumber(s))
    }

    /// Durations accept humantime syntax (`30s`, `5m`, `1h30m`) or a bare
    /// integer meaning seconds.
    pub fn duration(&self) -> Result<Duration, ValueError> {
        let s = self.string();
        let trimmed = s.trim();
        if let Ok(secs) = trimmed.parse::<u64>() {
            return Ok(Duration::from_secs(secs));
        }
        humantime::parse_duration(trimmed)
            .map_err(|e| ValueError::BadDuration(s, e.to_string()))
    }

    /// List view: lists pass through, scalars promote to one element, and
    /// a scalar starting with `[` is decoded as a JSON array.
    pub fn list(&self) -> Result<Vec<String>, ValueError> {
        match self {
            RawValue::List(items) => Ok(items.clone()),
            RawValue::Scalar(s) => {
                let trimmed = s.trim();
                if trimmed.starts_with('[') {
                    let parsed: Vec<serde_json::Value> = serde_json::from_str(trimmed)
                        .map_err(|e| ValueError::BadJsonList(s.clone(), e.to_string()))?;
                    Ok(parsed
                        .into_iter()
                        .map(|v| match v {
                            serde_json::Value::String(s) => s,
                            other => other.to_string(),
                        })
                        .collect())
                } else {
                    Ok(vec![s.clone()])
                }
            }
        }
    }
}

/// Implemented by every decodable configuration struct. `assign` receives
/// the normalised key and reports whether it was consumed; embedded
/// ("squashed") blocks are consulted from the parent's `assign`, which
/// collapses their keys into the parent namespace. `keys` lists canonical
/// spellings for did-you-mean suggestions, including squashed blocks.
pub trait DecodeFields {
    fn assign(&mut self, key: &str, raw: &RawValue) -> Result<bool, ValueError>;
    fn keys(&self) -> Vec<&'static str>;
}

#[derive(Debug, Error, PartialEq)]
#[error("key '{key}': {source}")]
pub struct FieldError {
    pub key: String,
    pub source: ValueError,
}

#[derive(Debug, Default, Clone)]
pub struct DecodeReport {
    /// Original spellings of consumed keys.
    pub consumed: Vec<String>,
    /// Original spellings of keys no field claimed.
    pub unknown: Vec<String>,
}

/// Folds ordered `(key, value)` pairs (repeats accumulate into lists,
/// preserving order) and assigns them into `target`.
pub fn decode_pairs<T: DecodeFields>(
    target: &mut T,
    pairs: &[(String, String)],
) -> Result<DecodeReport, FieldError> {
    let mut folded: Vec<(String, RawValue)> = Vec::new();
    for (key, value) in pairs {
        match folded.iter_mut().find(|(k, _)| normalise(k) == normalise(key)) {
            Some((_, raw)) => raw.push(value.clone()),
            None => folded.push((key.clone(), RawValue::Scalar(value.clone()))),
        }
    }

    let mut report = DecodeReport::default();
    for (key, raw) in &folded {
        let consumed = target
            .assign(&normalise(key), raw)
            .map_err(|source| FieldError { key: key.clone(), source })?;
        if consumed {
            report.consumed.push(key.clone());
        } else {
            report.unknown.push(key.clone());
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalise_is_case_and_separator_insensitive() {
        assert_eq!(normalise("No-Overlap"), "nooverlap");
        assert_eq!(normalise("no_overlap"), "nooverlap");
        assert_eq!(normalise("NOOVERLAP"), "nooverlap");
        assert_eq!(normalise("smtp-host"), normalise("SMTP_HOST"));
    }

    #[test]
    fn scalar_promotes_to_singleton_list() {
        let raw = RawValue::Scalar("/a:/a".to_string());
        assert_eq!(raw.list().unwrap(), vec!["/a:/a".to_string()]);
    }

    #[test]
    fn json_array_escape_hatch() {
        let raw = RawValue::Scalar(r#"["FOO=1", "BAR=2"]"#.to_string());
        assert_eq!(raw.list().unwrap(), vec!["FOO=1".to_string(), "BAR=2".to_string()]);

        let bad = RawValue::Scalar("[not json".to_string());
        assert!(matches!(bad.list(), Err(ValueError::BadJsonList(_, _))));
    }

    #[test]
    fn booleans_and_numbers_coerce() {
        assert!(RawValue::Scalar("True".into()).boolean().unwrap());
        assert!(!RawValue::Scalar("0".into()).boolean().unwrap());
        assert!(RawValue::Scalar("yes".into()).boolean().is_err());
        assert_eq!(RawValue::Scalar("2525".into()).integer::<u16>().unwrap(), 2525);
    }

    #[test]
    fn durations_accept_humantime_and_bare_seconds() {
        assert_eq!(
            RawValue::Scalar("90".into()).duration().unwrap(),
            Duration::from_secs(90)
        );
        assert_eq!(
            RawValue::Scalar("1m30s".into()).duration().unwrap(),
            Duration::from_secs(90)
        );
    }

    #[test]
    fn repeated_keys_fold_into_lists() {
        #[derive(Default)]
        struct Probe {
            volumes: Vec<String>,
        }
        impl DecodeFields for Probe {
            fn assign(&mut self, key: &str, raw: &RawValue) -> Result<bool, ValueError> {
                match key {
                    "volume" => self.volumes = raw.list()?,
                    _ => return Ok(false),
                }
                Ok(true)
            }
            fn keys(&self) -> Vec<&'static str> {
                vec!["volume"]
            }
        }

        let pairs = vec![
            ("volume".to_string(), "/a:/a".to_string()),
            ("Volume".to_string(), "/b:/b".to_string()),
        ];
        let mut probe = Probe::default();
        let report = decode_pairs(&mut probe, &pairs).unwrap();
        assert_eq!(probe.volumes, vec!["/a:/a".to_string(), "/b:/b".to_string()]);
        assert_eq!(report.consumed, vec!["volume".to_string()]);
        assert!(report.unknown.is_empty());
    }

    #[test]
    fn unknown_keys_are_reported_with_original_spelling() {
        #[derive(Default)]
        struct Probe;
        impl DecodeFields for Probe {
            fn assign(&mut self, _key: &str, _raw: &RawValue) -> Result<bool, ValueError> {
                Ok(false)
            }
            fn keys(&self) -> Vec<&'static str> {
                vec![]
            }
        }
        let pairs = vec![("Schdule".to_string(), "@daily".to_string())];
        let report = decode_pairs(&mut Probe, &pairs).unwrap();
        assert_eq!(report.unknown, vec!["Schdule".to_string()]);
    }
}
