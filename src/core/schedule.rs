use chrono::{DateTime, Utc};
use cron::Schedule;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const EVERY_PREFIX: &str = "@every ";

/// Wall-clock source, injectable so schedule math is testable without
/// sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A parsed schedule expression: either a next-fire oracle or a sentinel
/// that keeps the job registered without ever firing on its own.
#[derive(Debug, Clone)]
pub enum ScheduleExpr {
    /// Cron expression, normalised to the six-field form. The original
    /// text is kept for display and structural comparison.
    Cron(Box<Schedule>, String),
    /// Fixed period measured from the previous dispatch tick.
    Every(Duration),
    /// `@triggered`, `@manual` or `@none`: only explicit runs.
    Sentinel(Sentinel),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentinel {
    Triggered,
    Manual,
    None,
}

#[derive(Debug, Error, PartialEq)]
pub enum ScheduleError {
    #[error("empty schedule expression")]
    Empty,
    #[error("invalid duration in '{0}': {1}")]
    BadDuration(String, String),
    #[error("unsupported schedule '{0}': {1}")]
    BadExpression(String, String),
}

impl FromStr for ScheduleExpr {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ScheduleError::Empty);
        }

        match s {
            "@triggered" => return Ok(ScheduleExpr::Sentinel(Sentinel::Triggered)),
            "@manual" => return Ok(ScheduleExpr::Sentinel(Sentinel::Manual)),
            "@none" => return Ok(ScheduleExpr::Sentinel(Sentinel::None)),
            _ => {}
        }

        if let Some(rest) = s.strip_prefix(EVERY_PREFIX) {
            let dur = humantime::parse_duration(rest.trim())
                .map_err(|e| ScheduleError::BadDuration(s.to_string(), e.to_string()))?;
            return Ok(ScheduleExpr::Every(dur));
        }

        let normalised = match s {
            "@yearly" | "@annually" => "0 0 0 1 1 *".to_string(),
            "@monthly" => "0 0 0 1 * *".to_string(),
            "@weekly" => "0 0 0 * * SUN".to_string(),
            "@daily" | "@midnight" => "0 0 0 * * *".to_string(),
            "@hourly" => "0 0 * * * *".to_string(),
            other => match other.split_whitespace().count() {
                // Standard five-field cron gains a seconds column.
                5 => format!("0 {other}"),
                _ => other.to_string(),
            },
        };

        let schedule = Schedule::from_str(&normalised)
            .map_err(|e| ScheduleError::BadExpression(s.to_string(), e.to_string()))?;
        Ok(ScheduleExpr::Cron(Box::new(schedule), s.to_string()))
    }
}

impl ScheduleExpr {
    /// Whether the expression ever produces a fire time on its own.
    pub fn is_schedulable(&self) -> bool {
        !matches!(self, ScheduleExpr::Sentinel(_))
    }

    /// Next fire strictly after `now`, or `None` for sentinels.
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            ScheduleExpr::Cron(schedule, _) => schedule.after(&now).next(),
            ScheduleExpr::Every(d) => {
                let d = chrono::Duration::from_std(*d).ok()?;
                Some(now + d)
            }
            ScheduleExpr::Sentinel(_) => Option::None,
        }
    }
}

impl Display for ScheduleExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleExpr::Cron(_, text) => f.write_str(text),
            ScheduleExpr::Every(d) => {
                f.write_fmt(format_args!("@every {}", humantime::format_duration(*d)))
            }
            ScheduleExpr::Sentinel(Sentinel::Triggered) => f.write_str("@triggered"),
            ScheduleExpr::Sentinel(Sentinel::Manual) => f.write_str("@manual"),
            ScheduleExpr::Sentinel(Sentinel::None) => f.write_str("@none"),
        }
    }
}

impl PartialEq for ScheduleExpr {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_five_field_cron() {
        let expr: ScheduleExpr = "*/5 * * * *".parse().unwrap();
        assert!(expr.is_schedulable());
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 2, 30).unwrap();
        let next = expr.next_after(now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 1, 12, 5, 0).unwrap());
    }

    #[test]
    fn parses_six_field_cron_with_seconds() {
        let expr: ScheduleExpr = "30 * * * * *".parse().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(
            expr.next_after(now).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 30).unwrap()
        );
    }

    #[test]
    fn parses_descriptors() {
        for descriptor in [
            "@yearly", "@annually", "@monthly", "@weekly", "@daily", "@midnight", "@hourly",
        ] {
            let expr: ScheduleExpr = descriptor.parse().unwrap();
            assert!(expr.is_schedulable(), "{descriptor}");
        }
        let daily: ScheduleExpr = "@daily".parse().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 18, 0, 0).unwrap();
        assert_eq!(
            daily.next_after(now).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn parses_every_duration() {
        let expr: ScheduleExpr = "@every 5m".parse().unwrap();
        match expr {
            ScheduleExpr::Every(d) => assert_eq!(d, Duration::from_secs(300)),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn sentinels_are_unschedulable_but_valid() {
        for s in ["@triggered", "@manual", "@none"] {
            let expr: ScheduleExpr = s.parse().unwrap();
            assert!(!expr.is_schedulable());
            assert_eq!(expr.next_after(Utc::now()), Option::None);
            assert_eq!(expr.to_string(), s);
        }
    }

    #[test]
    fn empty_expression_is_an_error() {
        assert_eq!("".parse::<ScheduleExpr>(), Err(ScheduleError::Empty));
        assert_eq!("  ".parse::<ScheduleExpr>(), Err(ScheduleError::Empty));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!("@sometimes".parse::<ScheduleExpr>().is_err());
        assert!("not a schedule".parse::<ScheduleExpr>().is_err());
    }

    #[test]
    fn display_round_trips() {
        for s in ["@every 30s", "@daily", "0 0 * * * *", "@manual"] {
            let expr: ScheduleExpr = s.parse().unwrap();
            let again: ScheduleExpr = expr.to_string().parse().unwrap();
            assert_eq!(expr, again);
        }
    }
}
