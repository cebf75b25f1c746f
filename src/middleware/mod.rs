//! Per-execution middleware: an ordered chain that wraps every fire,
//! terminating in the per-kind runner. Sinks deliver after the inner
//! chain completes; the overlap guard sits innermost so a skipped fire
//! still produces a record the sinks can observe.

pub mod mail;
pub mod save;
pub mod slack;
pub mod webhook;

use crate::core::execution::{Execution, Outcome};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Sink-transport failures. Logged at warning, never propagated into the
/// execution outcome.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("mail: {0}")]
    Mail(String),
    #[error("slack: {0}")]
    Slack(String),
    #[error("save: {0}")]
    Save(String),
    #[error("webhook '{0}': {1}")]
    Webhook(String, String),
}

/// The terminal of a middleware chain: the actual job execution.
#[async_trait]
pub trait Terminal: Send + Sync {
    async fn execute(&self, exec: &mut Execution);
}

#[async_trait]
pub trait Middleware: Send + Sync {
    /// Stable tag; a scheduler-level sink is skipped on chains whose job
    /// already carries a sink with the same tag.
    fn tag(&self) -> &'static str;

    async fn call(&self, exec: &mut Execution, chain: Chain<'_>);
}

/// Remaining middleware stack plus the terminal. `next` consumes the
/// chain, so a middleware can invoke the rest at most once; not calling
/// it stops the execution (the overlap guard does exactly that).
pub struct Chain<'a> {
    stack: &'a [Arc<dyn Middleware>],
    terminal: &'a dyn Terminal,
}

impl<'a> Chain<'a> {
    pub fn new(stack: &'a [Arc<dyn Middleware>], terminal: &'a dyn Terminal) -> Self {
        Chain { stack, terminal }
    }

    pub async fn next(self, exec: &mut Execution) {
        match self.stack.split_first() {
            Some((head, rest)) => {
                head.call(exec, Chain { stack: rest, terminal: self.terminal }).await;
            }
            None => self.terminal.execute(exec).await,
        }
    }
}

/// Serialises executions of one job and, with `no-overlap`, converts a
/// lost fire into a `skipped-overlap` record instead of queueing it.
pub struct OverlapGuard {
    lock: Arc<tokio::sync::Mutex<()>>,
    no_overlap: bool,
}

impl OverlapGuard {
    pub fn new(lock: Arc<tokio::sync::Mutex<()>>, no_overlap: bool) -> Self {
        OverlapGuard { lock, no_overlap }
    }
}

#[async_trait]
impl Middleware for OverlapGuard {
    fn tag(&self) -> &'static str {
        "overlap"
    }

    async fn call(&self, exec: &mut Execution, chain: Chain<'_>) {
        if self.no_overlap {
            match self.lock.try_lock() {
                Ok(_guard) => chain.next(exec).await,
                Err(_) => {
                    info!(job = %exec.job, "skipping fire, previous run still in progress");
                    exec.finish(Outcome::SkippedOverlap, Utc::now());
                }
            }
        } else {
            let _guard = self.lock.lock().await;
            chain.next(exec).await;
        }
    }
}

/// Shared trigger decision used by every sink: `only_on_error` unset
/// behaves as `always`.
pub fn should_deliver(only_on_error: Option<bool>, exec: &Execution) -> bool {
    !only_on_error.unwrap_or(false) || exec.outcome.is_error()
}

/// One-line human summary used by the mail and slack sinks.
pub fn summary_line(exec: &Execution) -> String {
    format!(
        "{} finished with outcome {} after {}s",
        exec.job,
        exec.outcome.label(),
        exec.duration().num_seconds()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::job::{JobKey, JobKind};
    use parking_lot::Mutex;

    struct RecordingTerminal {
        outcome: Outcome,
        calls: Arc<Mutex<usize>>,
    }

    #[async_trait]
    impl Terminal for RecordingTerminal {
        async fn execute(&self, exec: &mut Execution) {
            *self.calls.lock() += 1;
            exec.finish(self.outcome.clone(), Utc::now());
        }
    }

    struct TagRecorder {
        tag: &'static str,
        order: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Middleware for TagRecorder {
        fn tag(&self) -> &'static str {
            self.tag
        }

        async fn call(&self, exec: &mut Execution, chain: Chain<'_>) {
            chain.next(exec).await;
            self.order.lock().push(self.tag);
        }
    }

    fn exec_record() -> Execution {
        Execution::begin(JobKey::new(JobKind::Local, "t"), Utc::now())
    }

    #[tokio::test]
    async fn chain_reaches_terminal_and_unwinds_in_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let calls = Arc::new(Mutex::new(0));
        let stack: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(TagRecorder { tag: "outer", order: order.clone() }),
            Arc::new(TagRecorder { tag: "inner", order: order.clone() }),
        ];
        let terminal = RecordingTerminal { outcome: Outcome::Ok, calls: calls.clone() };

        let mut exec = exec_record();
        Chain::new(&stack, &terminal).next(&mut exec).await;

        assert_eq!(*calls.lock(), 1);
        assert_eq!(*order.lock(), vec!["inner", "outer"]);
        assert_eq!(exec.outcome, Outcome::Ok);
    }

    #[tokio::test]
    async fn overlap_guard_skips_when_lock_is_held() {
        let lock = Arc::new(tokio::sync::Mutex::new(()));
        let guard = OverlapGuard::new(lock.clone(), true);
        let calls = Arc::new(Mutex::new(0));
        let terminal = RecordingTerminal { outcome: Outcome::Ok, calls: calls.clone() };

        let held = lock.clone().lock_owned().await;
        let mut exec = exec_record();
        let stack: Vec<Arc<dyn Middleware>> = vec![];
        guard.call(&mut exec, Chain::new(&stack, &terminal)).await;

        assert_eq!(exec.outcome, Outcome::SkippedOverlap);
        assert!(exec.finished_at.is_some());
        assert_eq!(*calls.lock(), 0);

        drop(held);
        let mut exec = exec_record();
        guard.call(&mut exec, Chain::new(&stack, &terminal)).await;
        assert_eq!(exec.outcome, Outcome::Ok);
        assert_eq!(*calls.lock(), 1);
    }

    #[tokio::test]
    async fn without_no_overlap_the_fire_waits_instead_of_skipping() {
        let lock = Arc::new(tokio::sync::Mutex::new(()));
        let guard = Arc::new(OverlapGuard::new(lock.clone(), false));
        let calls = Arc::new(Mutex::new(0));

        let held = lock.clone().lock_owned().await;
        let waiting = {
            let guard = guard.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                let terminal = RecordingTerminal { outcome: Outcome::Ok, calls };
                let stack: Vec<Arc<dyn Middleware>> = vec![];
                let mut exec = exec_record();
                guard.call(&mut exec, Chain::new(&stack, &terminal)).await;
                exec.outcome
            })
        };

        tokio::task::yield_now().await;
        assert_eq!(*calls.lock(), 0);
        drop(held);
        assert_eq!(waiting.await.unwrap(), Outcome::Ok);
        assert_eq!(*calls.lock(), 1);
    }

    #[test]
    fn delivery_trigger_table() {
        let mut ok = exec_record();
        ok.finish(Outcome::Ok, Utc::now());
        let mut failed = exec_record();
        failed.finish(
            Outcome::Error { kind: "exit-code".into(), message: "status 1".into() },
            Utc::now(),
        );

        assert!(should_deliver(None, &ok));
        assert!(should_deliver(Some(false), &ok));
        assert!(!should_deliver(Some(true), &ok));
        assert!(should_deliver(Some(true), &failed));
    }
}
