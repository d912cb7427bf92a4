//! The caller facing surface of view tracking.
//!
//! A call site picks one of two write paths: [ViewTracker::queue_view] buffers the view and
//! lets the scheduler write it later, [ViewTracker::track_view_sync] writes it now and returns
//! the fresh count.

use std::sync::Arc;
use std::time::Duration;

use snafu::{ensure, ResultExt as _};
use tokio::sync::watch;
use tracing::instrument;

use crate::config::EngineConfig;
use crate::counter::Counter;
use crate::error::{ContentNotFoundSnafu, InvalidFieldSnafu, StoreSnafu, ViewError};
use crate::model::{now, BatchStats, Source, Stat, ViewCount, ViewEvent, ViewRecord};
use crate::queue::{Enqueued, QueueStats, ViewQueue};
use crate::scheduler::{FlushReport, FlushSettings, FlushState, Flusher, Scheduler};
use crate::store::{with_timeout, ViewStore};

#[derive(Debug)]
pub struct ViewTracker<S> {
    store: Arc<S>,
    queue: Arc<ViewQueue>,
    flusher: Arc<Flusher<S>>,
    scheduler: Scheduler,
    counter: Counter<S>,
    timeout: Duration,
}

impl<S: ViewStore> ViewTracker<S> {
    /// Builds the engine and starts its flush worker. Must be called from within a tokio runtime.
    pub fn new(store: Arc<S>, config: &EngineConfig) -> Self {
        let queue = Arc::new(ViewQueue::new(config.max_pending));
        let flusher = Arc::new(Flusher::new(
            store.clone(),
            queue.clone(),
            FlushSettings::from(config),
        ));
        let scheduler = Scheduler::spawn(flusher.clone(), config.flush_interval);
        let counter = Counter::new(store.clone(), config.store_timeout);

        Self {
            store,
            queue,
            flusher,
            scheduler,
            counter,
            timeout: config.store_timeout,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Buffers a view for the next flush. Never touches the store.
    pub fn queue_view(
        &self, content_id: &str, viewer_id: &str, client_ip: &str, source: Source,
    ) -> Enqueued {
        let outcome = self
            .queue
            .enqueue(ViewEvent::new(content_id, viewer_id, client_ip, source));

        if outcome.is_pending() {
            self.scheduler.notify();
        }

        outcome
    }

    /// Records a view immediately and returns the content's fresh count.
    #[instrument(skip(self))]
    pub async fn track_view_sync(
        &self, content_id: &str, viewer_id: &str, client_ip: &str, source: Source,
    ) -> Result<ViewCount, ViewError> {
        let event = ViewEvent::new(content_id, viewer_id, client_ip, source);
        if let Some(field) = event.blank_field() {
            return InvalidFieldSnafu { field }.fail();
        }

        let exists = with_timeout("exists", self.timeout, self.store.exists(content_id))
            .await
            .context(StoreSnafu)?;
        ensure!(exists, ContentNotFoundSnafu { content_id });

        let record = ViewRecord::from_event(event, now());
        with_timeout("upsert", self.timeout, self.store.upsert(&record))
            .await
            .context(StoreSnafu)?;

        Ok(ViewCount::new(self.counter.count(content_id).await))
    }

    /// Distinct visitor count, `0` when the store cannot answer.
    pub async fn get_view_count(&self, content_id: &str) -> ViewCount {
        ViewCount::new(self.counter.count(content_id).await)
    }

    pub async fn get_batch_stats(
        &self, content_ids: &[String], stats: &[Stat],
    ) -> Result<BatchStats, ViewError> {
        self.counter.batch_count(content_ids, stats).await
    }

    /// Flushes everything pending right now, waiting for an in-flight pass first.
    pub async fn flush_now(&self) -> FlushReport {
        self.flusher.drain_all().await
    }

    pub fn flush_state(&self) -> FlushState {
        self.flusher.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<FlushState> {
        self.flusher.subscribe()
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Stops the flush worker, then writes whatever is still pending.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> FlushReport {
        self.scheduler.shutdown().await;
        let report = self.flusher.drain_all().await;

        tracing::info!(?report, "view tracker stopped");
        report
    }
}
