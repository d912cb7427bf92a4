//! Drains the [ViewQueue] into the [ViewStore] on a fixed cadence.
//!
//! The worker is a small state machine:
//!
//! ```text
//! Idle --enqueue--> Armed --timer--> Draining --queue empty--> Idle
//! ```
//!
//! Enqueues while `Armed` do not re-arm the timer, so a burst of views results in one flush.
//! A pass drains in `batch_size` steps until the queue is empty, and passes never overlap:
//! the worker and [Flusher::drain_all] callers share one pass lock.

use std::collections::HashMap;
use std::ops::AddAssign;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use derive_new::new;
use futures::{stream, Future, StreamExt as _};
use serde::Serialize;
use tokio::sync::{watch, Mutex, Notify};
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::Retry;
use tracing::instrument;

use crate::config::EngineConfig;
use crate::model::{now, Timestamp, ViewEvent, ViewRecord};
use crate::queue::ViewQueue;
use crate::store::{with_timeout, StoreError, ViewStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushState {
    Idle,
    Armed,
    Draining,
}

/// What happened to the events handled by one flush pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, new)]
pub struct FlushReport {
    pub events: usize,
    pub groups: usize,
    pub written: usize,
    /// Events dropped because their content does not exist.
    pub missing: usize,
    /// Events lost because the store kept failing.
    pub failed: usize,
}

impl AddAssign for FlushReport {
    fn add_assign(&mut self, other: Self) {
        self.events += other.events;
        self.groups += other.groups;
        self.written += other.written;
        self.missing += other.missing;
        self.failed += other.failed;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushSettings {
    pub batch_size: usize,
    pub concurrency: usize,
    pub retries: usize,
    pub store_timeout: Duration,
}

impl From<&EngineConfig> for FlushSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            concurrency: config.flush_concurrency.max(1),
            retries: config.flush_retries,
            store_timeout: config.store_timeout,
        }
    }
}

/// Inputs the published [FlushState] is derived from.
///
/// Only the worker arms and disarms; only a running pass marks draining.
#[derive(Debug, Default)]
struct Phase {
    armed: bool,
    draining: bool,
}

impl Phase {
    fn state(&self) -> FlushState {
        if self.draining {
            FlushState::Draining
        } else if self.armed {
            FlushState::Armed
        } else {
            FlushState::Idle
        }
    }
}

enum GroupOutcome {
    Written(usize),
    Missing(usize),
    Failed(usize),
}

/// Performs flush passes. Shared between the scheduler worker and manual flushes.
#[derive(Debug)]
pub struct Flusher<S> {
    store: Arc<S>,
    queue: Arc<ViewQueue>,
    settings: FlushSettings,
    pass: Mutex<()>,
    phase: std::sync::Mutex<Phase>,
    state: watch::Sender<FlushState>,
}

impl<S> Flusher<S> {
    pub fn state(&self) -> FlushState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<FlushState> {
        self.state.subscribe()
    }

    fn update(&self, change: impl FnOnce(&mut Phase)) {
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        change(&mut phase);

        let next = phase.state();
        self.state.send_if_modified(|state| std::mem::replace(state, next) != next);
    }

    fn set_armed(&self, armed: bool) {
        self.update(|phase| phase.armed = armed);
    }
}

/// Marks a pass as draining until dropped.
struct Draining<'a, S>(&'a Flusher<S>);

impl<'a, S> Draining<'a, S> {
    fn start(flusher: &'a Flusher<S>) -> Self {
        flusher.update(|phase| phase.draining = true);
        Self(flusher)
    }
}

impl<S> Drop for Draining<'_, S> {
    fn drop(&mut self) {
        self.0.update(|phase| phase.draining = false);
    }
}

impl<S: ViewStore> Flusher<S> {
    pub fn new(store: Arc<S>, queue: Arc<ViewQueue>, settings: FlushSettings) -> Self {
        let (state, _) = watch::channel(FlushState::Idle);

        Self {
            store,
            queue,
            settings,
            pass: Mutex::new(()),
            phase: std::sync::Mutex::new(Phase::default()),
            state,
        }
    }

    /// Runs one flush pass, draining until the queue is empty.
    ///
    /// If another pass is in flight this waits for it to finish first.
    #[instrument(skip(self))]
    pub async fn drain_all(&self) -> FlushReport {
        let _pass = self.pass.lock().await;
        let draining = Draining::start(self);

        let mut report = FlushReport::default();
        loop {
            let batch = self.queue.drain(self.settings.batch_size);
            if batch.is_empty() {
                break;
            }

            report += self.flush_batch(batch).await;
        }

        drop(draining);

        if report.events > 0 {
            tracing::info!(?report, "flushed queued views");
        }

        report
    }

    async fn flush_batch(&self, batch: Vec<ViewEvent>) -> FlushReport {
        let viewed_at = now();
        let events = batch.len();
        let groups = group_by_content(batch);

        let mut report = FlushReport {
            events,
            groups: groups.len(),
            ..FlushReport::default()
        };

        tracing::debug!(events, groups = report.groups, "flushing a batch of views");

        let outcomes: Vec<GroupOutcome> = stream::iter(groups)
            .map(|(content_id, events)| self.flush_group(content_id, events, viewed_at))
            .buffer_unordered(self.settings.concurrency)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                GroupOutcome::Written(count) => report.written += count,
                GroupOutcome::Missing(count) => report.missing += count,
                GroupOutcome::Failed(count) => report.failed += count,
            }
        }

        report
    }

    async fn flush_group(
        &self, content_id: String, events: Vec<ViewEvent>, viewed_at: Timestamp,
    ) -> GroupOutcome {
        let count = events.len();
        let records: Vec<ViewRecord> = events
            .into_iter()
            .map(|event| ViewRecord::from_event(event, viewed_at))
            .collect();

        let result = Retry::spawn(self.backoff(), || self.write_group(&content_id, &records)).await;

        match result {
            Ok(true) => GroupOutcome::Written(count),
            Ok(false) => {
                tracing::warn!(%content_id, events = count, "content does not exist, dropping its queued views");
                GroupOutcome::Missing(count)
            }
            Err(error) => {
                tracing::error!(%content_id, events = count, %error, "failed to flush queued views, dropping them");
                GroupOutcome::Failed(count)
            }
        }
    }

    /// Writes one content group. Returns `false` without writing if the content is gone.
    async fn write_group(&self, content_id: &str, records: &[ViewRecord]) -> Result<bool, StoreError> {
        let limit = self.settings.store_timeout;

        if !with_timeout("exists", limit, self.store.exists(content_id)).await? {
            return Ok(false);
        }

        let writes = records
            .iter()
            .map(|record| with_timeout("upsert", limit, self.store.upsert(record)));
        futures::future::try_join_all(writes).await?;

        Ok(true)
    }

    fn backoff(&self) -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(2)
            .factor(50)
            .max_delay(Duration::from_secs(5))
            .take(self.settings.retries)
    }
}

fn group_by_content(batch: Vec<ViewEvent>) -> HashMap<String, Vec<ViewEvent>> {
    let mut groups: HashMap<String, Vec<ViewEvent>> = HashMap::new();
    for event in batch {
        groups.entry(event.content_id.clone()).or_default().push(event);
    }
    groups
}

type QuitSignal = tokio::sync::oneshot::Receiver<Quit>;

#[derive(Debug, Clone, Copy)]
struct Quit;

#[derive(Debug)]
struct WorkerTask {
    tx: tokio::sync::oneshot::Sender<Quit>,
    handle: tokio::task::JoinHandle<()>,
}

impl WorkerTask {
    fn spawn<F>(f: impl FnOnce(QuitSignal) -> F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let handle = tokio::task::spawn(f(rx));
        Self { tx, handle }
    }

    async fn shutdown(self) {
        let _ = self.tx.send(Quit);
        let _ = self.handle.await;
    }
}

/// Handle to the background flush worker.
#[derive(Debug)]
pub struct Scheduler {
    signal: Arc<Notify>,
    task: Mutex<Option<WorkerTask>>,
}

impl Scheduler {
    /// Spawns the worker. Must be called from within a tokio runtime.
    pub fn spawn<S: ViewStore>(flusher: Arc<Flusher<S>>, interval: Duration) -> Self {
        let signal = Arc::new(Notify::new());
        let worker_signal = signal.clone();

        let task = WorkerTask::spawn(|quit| run(flusher, worker_signal, interval, quit));
        tracing::debug!(?interval, "started the flush scheduler");

        Self {
            signal,
            task: Mutex::new(Some(task)),
        }
    }

    /// Tells the worker there is something to flush.
    pub fn notify(&self) {
        self.signal.notify_one();
    }

    /// Stops the worker, waiting for an in-flight pass to finish.
    pub async fn shutdown(&self) {
        if let Some(task) = self.task.lock().await.take() {
            task.shutdown().await;
            tracing::debug!("stopped the flush scheduler");
        }
    }
}

async fn run<S: ViewStore>(
    flusher: Arc<Flusher<S>>, signal: Arc<Notify>, interval: Duration, mut quit: QuitSignal,
) {
    loop {
        tokio::select! {
            _ = signal.notified() => {},
            _ = &mut quit => break,
        }

        if flusher.queue.is_empty() {
            continue;
        }

        flusher.set_armed(true);

        tokio::select! {
            _ = tokio::time::sleep(interval) => {},
            _ = &mut quit => break,
        }

        flusher.set_armed(false);
        flusher.drain_all().await;
    }

    flusher.set_armed(false);
}
