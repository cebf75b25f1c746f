//! Live job registry and dispatch. A single dispatcher task watches a
//! min-heap of next-fire times and hands due jobs to a fire loop, which
//! spawns one task per execution; the per-job lock keeps executions of
//! one job serialised while different jobs interleave freely.

use crate::config::model::{JobSpec, SinkOverrides, WebhookConfig};
use crate::core::execution::{Execution, Outcome};
use crate::core::job::JobKey;
use crate::core::runner::JobExecutor;
use crate::core::schedule::{Clock, ScheduleError, ScheduleExpr};
use crate::middleware::mail::MailSink;
use crate::middleware::save::SaveSink;
use crate::middleware::slack::SlackSink;
use crate::middleware::webhook::{WebhookRegistry, WebhookSink, new_registry};
use crate::middleware::{Chain, Middleware, OverlapGuard};
use crate::provider::ContainerProvider;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("duplicate job {0}")]
    Duplicate(JobKey),
    #[error("{0} schedule: {1}")]
    BadSchedule(JobKey, ScheduleError),
}

struct Entry {
    spec: JobSpec,
    schedule: Option<ScheduleExpr>,
    lock: Arc<tokio::sync::Mutex<()>>,
    sinks: Vec<Arc<dyn Middleware>>,
    no_overlap: bool,
    generation: u64,
}

struct Inner {
    provider: Arc<dyn ContainerProvider>,
    clock: Arc<dyn Clock>,
    shutdown: broadcast::Sender<()>,
    entries: Mutex<HashMap<JobKey, Entry>>,
    /// Jobs whose timer needs (re)arming, drained by the dispatcher.
    pending_arm: Mutex<Vec<(JobKey, u64)>>,
    armed: tokio::sync::Notify,
    fire_tx: mpsc::Sender<JobKey>,
    scheduler_sinks: Mutex<Vec<Arc<dyn Middleware>>>,
    webhooks: WebhookRegistry,
    generation: AtomicU64,
    active: Mutex<Vec<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
    fire_rx: Arc<Mutex<Option<mpsc::Receiver<JobKey>>>>,
}

impl Scheduler {
    pub fn new(
        provider: Arc<dyn ContainerProvider>,
        clock: Arc<dyn Clock>,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        let (fire_tx, fire_rx) = mpsc::channel(64);
        Scheduler {
            inner: Arc::new(Inner {
                provider,
                clock,
                shutdown,
                entries: Mutex::new(HashMap::new()),
                pending_arm: Mutex::new(Vec::new()),
                armed: tokio::sync::Notify::new(),
                fire_tx,
                scheduler_sinks: Mutex::new(Vec::new()),
                webhooks: new_registry(),
                generation: AtomicU64::new(0),
                active: Mutex::new(Vec::new()),
            }),
            fire_rx: Arc::new(Mutex::new(Some(fire_rx))),
        }
    }

    /// Spawns the dispatcher and fire loop. Callable once.
    pub fn start(&self) {
        let rx = self.fire_rx.lock().take().expect("scheduler already started");
        tokio::spawn(dispatcher(self.inner.clone()));
        tokio::spawn(fire_loop(self.inner.clone(), rx));
    }

    pub fn add(&self, spec: JobSpec) -> Result<(), SchedulerError> {
        let key = spec.key();
        let schedule = parse_schedule(&spec)?;
        let sinks = build_job_sinks(&spec, &self.inner.webhooks);
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);

        {
            let mut entries = self.inner.entries.lock();
            if entries.contains_key(&key) {
                return Err(SchedulerError::Duplicate(key));
            }
            let no_overlap = spec.common().no_overlap;
            entries.insert(
                key.clone(),
                Entry {
                    spec,
                    schedule,
                    lock: Arc::new(tokio::sync::Mutex::new(())),
                    sinks,
                    no_overlap,
                    generation,
                },
            );
        }

        self.arm(key, generation);
        Ok(())
    }

    /// Logically remove-then-add. The per-job lock is carried over so an
    /// in-flight run of the old definition still serialises with the
    /// replacement; any queued fire of the old timer is discarded.
    pub fn replace(&self, spec: JobSpec) -> Result<(), SchedulerError> {
        let key = spec.key();
        let schedule = parse_schedule(&spec)?;
        let sinks = build_job_sinks(&spec, &self.inner.webhooks);
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);

        {
            let mut entries = self.inner.entries.lock();
            let lock = entries
                .remove(&key)
                .map(|old| old.lock)
                .unwrap_or_else(|| Arc::new(tokio::sync::Mutex::new(())));
            let no_overlap = spec.common().no_overlap;
            entries.insert(
                key.clone(),
                Entry { spec, schedule, lock, sinks, no_overlap, generation },
            );
        }

        self.arm(key, generation);
        Ok(())
    }

    /// Detaches the job's timer. A running execution is not cancelled,
    /// but no further fires will be scheduled.
    pub fn remove(&self, key: &JobKey) -> bool {
        self.inner.entries.lock().remove(key).is_some()
    }

    pub fn entries(&self) -> BTreeMap<JobKey, JobSpec> {
        self.inner
            .entries
            .lock()
            .iter()
            .map(|(k, e)| (k.clone(), e.spec.clone()))
            .collect()
    }

    pub fn contains(&self, key: &JobKey) -> bool {
        self.inner.entries.lock().contains_key(key)
    }

    /// Fires a job immediately, irrespective of its schedule. Counts
    /// toward overlap like any other fire.
    pub async fn run_once(&self, key: &JobKey) -> bool {
        if !self.contains(key) {
            return false;
        }
        self.inner.fire_tx.send(key.clone()).await.is_ok()
    }

    pub async fn run_all(&self) {
        let keys: Vec<JobKey> = self.inner.entries.lock().keys().cloned().collect();
        for key in keys {
            let _ = self.inner.fire_tx.send(key).await;
        }
    }

    /// Replaces the scheduler-level sink chain (built from the global
    /// sink config by the reconciler).
    pub fn set_scheduler_sinks(&self, sinks: Vec<Arc<dyn Middleware>>) {
        *self.inner.scheduler_sinks.lock() = sinks;
    }

    pub fn set_webhooks(&self, webhooks: BTreeMap<String, WebhookConfig>) {
        *self.inner.webhooks.lock() = webhooks;
    }

    pub fn webhook_registry(&self) -> WebhookRegistry {
        self.inner.webhooks.clone()
    }

    /// Waits for in-flight executions to settle. Each execution task
    /// already bounds itself with the shutdown grace period, so this
    /// terminates.
    pub async fn drain(&self) {
        loop {
            let handles: Vec<JoinHandle<()>> = {
                let mut active = self.inner.active.lock();
                active.drain(..).collect()
            };
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                let _ = handle.await;
            }
        }
    }

    fn arm(&self, key: JobKey, generation: u64) {
        self.inner.pending_arm.lock().push((key, generation));
        self.inner.armed.notify_one();
    }
}

fn parse_schedule(spec: &JobSpec) -> Result<Option<ScheduleExpr>, SchedulerError> {
    let text = spec.common().schedule.as_deref().unwrap_or("").trim();
    if text.is_empty() {
        // No schedule: registered for explicit runs only.
        return Ok(None);
    }
    match text.parse::<ScheduleExpr>() {
        Ok(expr) if expr.is_schedulable() => Ok(Some(expr)),
        Ok(_) => Ok(None),
        Err(err) => Err(SchedulerError::BadSchedule(spec.key(), err)),
    }
}

/// Sinks a job carries on its own, from its effective sink blocks and
/// webhook references.
fn build_job_sinks(spec: &JobSpec, registry: &WebhookRegistry) -> Vec<Arc<dyn Middleware>> {
    let mut sinks: Vec<Arc<dyn Middleware>> = Vec::new();
    let blocks = &spec.common().sinks;
    if blocks.mail.is_configured() {
        sinks.push(Arc::new(MailSink::new(blocks.mail.clone())));
    }
    if blocks.slack.is_configured() {
        sinks.push(Arc::new(SlackSink::new(blocks.slack.clone())));
    }
    if blocks.save.is_configured() {
        sinks.push(Arc::new(SaveSink::new(blocks.save.clone())));
    }
    if !spec.common().webhooks.is_empty() {
        sinks.push(Arc::new(WebhookSink::new(
            spec.common().webhooks.clone(),
            registry.clone(),
        )));
    }
    sinks
}

/// Scheduler-level sinks from the global config blocks.
pub fn build_global_sinks(sinks: &SinkOverrides) -> Vec<Arc<dyn Middleware>> {
    let mut out: Vec<Arc<dyn Middleware>> = Vec::new();
    if sinks.mail.is_configured() {
        out.push(Arc::new(MailSink::new(sinks.mail.clone())));
    }
    if sinks.slack.is_configured() {
        out.push(Arc::new(SlackSink::new(sinks.slack.clone())));
    }
    if sinks.save.is_configured() {
        out.push(Arc::new(SaveSink::new(sinks.save.clone())));
    }
    out
}

type HeapItem = Reverse<(DateTime<Utc>, u64, JobKey)>;

async fn dispatcher(inner: Arc<Inner>) {
    let mut shutdown = inner.shutdown.subscribe();
    let mut heap: BinaryHeap<HeapItem> = BinaryHeap::new();

    loop {
        {
            let pending: Vec<(JobKey, u64)> =
                std::mem::take(&mut *inner.pending_arm.lock());
            let now = inner.clock.now();
            for (key, generation) in pending {
                if let Some(at) = next_fire(&inner, &key, generation, now) {
                    heap.push(Reverse((at, generation, key)));
                }
            }
        }

        let wait = heap.peek().map(|Reverse((at, _, _))| {
            (*at - inner.clock.now()).to_std().unwrap_or_default()
        });

        tokio::select! {
            _ = shutdown.recv() => return,
            _ = inner.armed.notified() => {}
            _ = sleep_or_forever(wait) => {
                let now = inner.clock.now();
                while let Some(Reverse((at, generation, key))) = heap.peek().cloned() {
                    if at > now {
                        break;
                    }
                    heap.pop();
                    let live = inner
                        .entries
                        .lock()
                        .get(&key)
                        .map(|e| e.generation == generation)
                        .unwrap_or(false);
                    if !live {
                        // Removed or replaced since arming; drop the
                        // stale timer.
                        continue;
                    }
                    debug!(job = %key, "dispatching fire");
                    if inner.fire_tx.send(key.clone()).await.is_err() {
                        return;
                    }
                    if let Some(next) = next_fire(&inner, &key, generation, now) {
                        heap.push(Reverse((next, generation, key)));
                    }
                }
            }
        }
    }
}

async fn sleep_or_forever(wait: Option<std::time::Duration>) {
    match wait {
        Some(d) => tokio::time::sleep(d).await,
        None => futures::future::pending().await,
    }
}

fn next_fire(
    inner: &Inner,
    key: &JobKey,
    generation: u64,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let entries = inner.entries.lock();
    let entry = entries.get(key)?;
    if entry.generation != generation {
        return None;
    }
    entry.schedule.as_ref()?.next_after(now)
}

async fn fire_loop(inner: Arc<Inner>, mut rx: mpsc::Receiver<JobKey>) {
    let mut shutdown = inner.shutdown.subscribe();
    loop {
        let key = tokio::select! {
            _ = shutdown.recv() => return,
            key = rx.recv() => match key {
                Some(key) => key,
                None => return,
            },
        };

        let snapshot = {
            let entries = inner.entries.lock();
            entries.get(&key).map(|e| {
                (e.spec.clone(), e.lock.clone(), e.sinks.clone(), e.no_overlap)
            })
        };
        let Some((spec, lock, sinks, no_overlap)) = snapshot else {
            continue;
        };

        let handle = tokio::spawn(run_execution(inner.clone(), spec, lock, sinks, no_overlap));
        let mut active = inner.active.lock();
        active.retain(|h| !h.is_finished());
        active.push(handle);
    }
}

async fn run_execution(
    inner: Arc<Inner>,
    spec: JobSpec,
    lock: Arc<tokio::sync::Mutex<()>>,
    job_sinks: Vec<Arc<dyn Middleware>>,
    no_overlap: bool,
) {
    let key = spec.key();

    // Sinks wrap the guarded execution so even a skipped fire produces a
    // record they can observe; a scheduler-level sink is dropped where
    // the job already carries one of the same kind.
    let mut chain = job_sinks;
    for sink in inner.scheduler_sinks.lock().iter() {
        if !chain.iter().any(|m| m.tag() == sink.tag()) {
            chain.push(sink.clone());
        }
    }
    chain.push(Arc::new(OverlapGuard::new(lock, no_overlap)));

    let terminal = JobExecutor::new(spec, inner.provider.clone(), inner.shutdown.clone());
    let mut exec = Execution::begin(key.clone(), inner.clock.now());
    debug!(job = %key, "execution started");
    Chain::new(&chain, &terminal).next(&mut exec).await;
    if exec.finished_at.is_none() {
        let outcome = exec.outcome.clone();
        exec.finish(outcome, inner.clock.now());
    }

    let duration_ms = exec.duration().num_milliseconds();
    match &exec.outcome {
        Outcome::Ok => {
            info!(job = %key, duration_ms, "execution finished");
        }
        Outcome::SkippedOverlap => {
            info!(job = %key, "execution skipped (overlap)");
        }
        Outcome::Cancelled => {
            warn!(job = %key, duration_ms, "execution cancelled");
        }
        Outcome::Error { kind, message } => {
            error!(job = %key, kind = %kind, message = %message, duration_ms, "execution failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::decode::decode_pairs;
    use crate::core::job::JobKind;
    use crate::core::schedule::SystemClock;
    use crate::middleware::Terminal;
    use crate::provider::fake::FakeProvider;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Sink that records every observed outcome, for asserting on
    /// execution records without a persistence layer.
    struct RecordingSink {
        outcomes: Arc<Mutex<Vec<Outcome>>>,
    }

    #[async_trait]
    impl Middleware for RecordingSink {
        fn tag(&self) -> &'static str {
            "recording"
        }

        async fn call(&self, exec: &mut Execution, chain: Chain<'_>) {
            chain.next(exec).await;
            self.outcomes.lock().push(exec.outcome.clone());
        }
    }

    fn local_job(name: &str, schedule: &str, command: &str, no_overlap: bool) -> JobSpec {
        let mut spec = JobSpec::new(JobKind::Local, name);
        let pairs = vec![
            ("schedule".to_string(), schedule.to_string()),
            ("command".to_string(), command.to_string()),
            ("no-overlap".to_string(), no_overlap.to_string()),
        ];
        decode_pairs(&mut spec, &pairs).unwrap();
        spec
    }

    fn exec_job(name: &str, schedule: &str, no_overlap: bool) -> JobSpec {
        let mut spec = JobSpec::new(JobKind::Exec, name);
        let pairs = vec![
            ("schedule".to_string(), schedule.to_string()),
            ("command".to_string(), "true".to_string()),
            ("container".to_string(), "worker".to_string()),
            ("no-overlap".to_string(), no_overlap.to_string()),
        ];
        decode_pairs(&mut spec, &pairs).unwrap();
        spec
    }

    fn new_scheduler(provider: Arc<FakeProvider>) -> (Scheduler, broadcast::Sender<()>) {
        let (shutdown_tx, _) = broadcast::channel(1);
        let scheduler = Scheduler::new(provider, Arc::new(SystemClock), shutdown_tx.clone());
        (scheduler, shutdown_tx)
    }

    #[tokio::test]
    async fn duplicate_add_is_rejected() {
        let provider = Arc::new(FakeProvider::new());
        let (scheduler, _tx) = new_scheduler(provider);
        scheduler.add(local_job("a", "@daily", "true", false)).unwrap();
        match scheduler.add(local_job("a", "@hourly", "false", false)) {
            Err(SchedulerError::Duplicate(key)) => {
                assert_eq!(key, JobKey::new(JobKind::Local, "a"));
            }
            other => panic!("unexpected: {other:?}"),
        }
        // the first definition remains
        let entries = scheduler.entries();
        assert_eq!(
            entries[&JobKey::new(JobKind::Local, "a")].common().schedule.as_deref(),
            Some("@daily")
        );
    }

    #[tokio::test]
    async fn bad_schedule_is_rejected() {
        let provider = Arc::new(FakeProvider::new());
        let (scheduler, _tx) = new_scheduler(provider);
        assert!(matches!(
            scheduler.add(local_job("a", "@sometimes", "true", false)),
            Err(SchedulerError::BadSchedule(_, _))
        ));
    }

    #[tokio::test]
    async fn remove_and_entries_round_trip() {
        let provider = Arc::new(FakeProvider::new());
        let (scheduler, _tx) = new_scheduler(provider);
        let key = JobKey::new(JobKind::Local, "a");
        scheduler.add(local_job("a", "@daily", "true", false)).unwrap();
        assert!(scheduler.contains(&key));
        assert!(scheduler.remove(&key));
        assert!(!scheduler.remove(&key));
        assert!(scheduler.entries().is_empty());
    }

    #[tokio::test]
    async fn run_once_fires_unscheduled_jobs() {
        let provider = Arc::new(FakeProvider::new());
        let (scheduler, _tx) = new_scheduler(provider);
        scheduler.start();

        let outcomes = Arc::new(Mutex::new(Vec::new()));
        scheduler.set_scheduler_sinks(vec![Arc::new(RecordingSink {
            outcomes: outcomes.clone(),
        })]);

        scheduler.add(local_job("manual", "@manual", "sh -c 'exit 0'", false)).unwrap();
        let key = JobKey::new(JobKind::Local, "manual");
        assert!(scheduler.run_once(&key).await);

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if !outcomes.lock().is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("execution should complete");
        assert_eq!(outcomes.lock().as_slice(), &[Outcome::Ok]);
    }

    #[tokio::test(start_paused = true)]
    async fn overlap_guard_skips_and_recovers() {
        let provider = Arc::new(FakeProvider::new());
        provider.set_exec_delay(Duration::from_secs(70));
        let (scheduler, _tx) = new_scheduler(provider.clone());
        scheduler.start();

        let outcomes = Arc::new(Mutex::new(Vec::new()));
        scheduler.set_scheduler_sinks(vec![Arc::new(RecordingSink {
            outcomes: outcomes.clone(),
        })]);

        scheduler.add(exec_job("busy", "@every 30s", true)).unwrap();

        // t=30 fire runs until t=100; t=60 and t=90 are skipped; t=120
        // runs again. Wait until four records accumulated.
        tokio::time::timeout(Duration::from_secs(400), async {
            loop {
                if outcomes.lock().len() >= 4 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .expect("four fires should complete");

        let seen = outcomes.lock().clone();
        let skips = seen.iter().filter(|o| **o == Outcome::SkippedOverlap).count();
        let runs = seen.iter().filter(|o| **o == Outcome::Ok).count();
        assert!(skips >= 2, "expected at least two skipped fires, got {seen:?}");
        assert!(runs >= 1, "expected at least one completed run, got {seen:?}");
        // the very first record must be a skip or an ok, never an error
        assert!(seen.iter().all(|o| !o.is_error()), "{seen:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_fire_executes_on_interval() {
        let provider = Arc::new(FakeProvider::new());
        let (scheduler, _tx) = new_scheduler(provider.clone());
        scheduler.start();

        let outcomes = Arc::new(Mutex::new(Vec::new()));
        scheduler.set_scheduler_sinks(vec![Arc::new(RecordingSink {
            outcomes: outcomes.clone(),
        })]);

        scheduler.add(exec_job("tick", "@every 10s", false)).unwrap();
        tokio::time::timeout(Duration::from_secs(120), async {
            loop {
                if outcomes.lock().len() >= 2 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("two interval fires");
        assert!(provider.exec_count() >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn removed_job_fires_no_more() {
        let provider = Arc::new(FakeProvider::new());
        let (scheduler, _tx) = new_scheduler(provider.clone());
        scheduler.start();

        scheduler.add(exec_job("gone", "@every 10s", false)).unwrap();
        let key = JobKey::new(JobKind::Exec, "gone");
        assert!(scheduler.remove(&key));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(provider.exec_count(), 0);
    }
}
