//! In-memory buffer of pending view events, deduplicated by [ViewKey].

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::model::{Source, ViewEvent, ViewKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Enqueued {
    /// A new pending event was added.
    Queued,
    /// The triple was already pending, only its source was replaced.
    Coalesced,
    /// The event had a blank identity field and was dropped.
    Rejected,
}

impl Enqueued {
    pub fn is_pending(self) -> bool {
        !matches!(self, Enqueued::Rejected)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub queued: u64,
    pub coalesced: u64,
    pub rejected: u64,
    pub evicted: u64,
}

#[derive(Debug, Default)]
struct Pending {
    order: VecDeque<ViewKey>,
    sources: HashMap<ViewKey, Source>,
    stats: QueueStats,
}

/// Holds at most one pending event per `(content_id, viewer_id, client_ip)` triple.
///
/// Enqueueing and draining share a single lock, so a drain never observes a half-applied
/// enqueue. When `capacity` distinct triples are pending, a new triple evicts the oldest one.
#[derive(Debug)]
pub struct ViewQueue {
    pending: Mutex<Pending>,
    capacity: usize,
}

impl ViewQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: Mutex::new(Pending::default()),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn enqueue(&self, event: ViewEvent) -> Enqueued {
        if let Some(field) = event.blank_field() {
            tracing::warn!(
                field,
                content_id = %event.content_id,
                "dropping view event with an empty identity field"
            );
            self.lock().stats.rejected += 1;
            return Enqueued::Rejected;
        }

        let source = event.source.clone();
        let key = event.key();

        let mut pending = self.lock();

        if let Some(existing) = pending.sources.get_mut(&key) {
            *existing = source;
            pending.stats.coalesced += 1;
            return Enqueued::Coalesced;
        }

        if pending.order.len() >= self.capacity {
            if let Some(oldest) = pending.order.pop_front() {
                pending.sources.remove(&oldest);
                pending.stats.evicted += 1;
                tracing::warn!(
                    content_id = %oldest.content_id,
                    capacity = self.capacity,
                    "view queue is full, evicted the oldest pending view"
                );
            }
        }

        pending.order.push_back(key.clone());
        pending.sources.insert(key, source);
        pending.stats.queued += 1;

        Enqueued::Queued
    }

    /// Removes up to `max` pending events, oldest first.
    pub fn drain(&self, max: usize) -> Vec<ViewEvent> {
        let mut pending = self.lock();
        let take = max.min(pending.order.len());

        let keys: Vec<ViewKey> = pending.order.drain(..take).collect();

        keys.into_iter()
            .filter_map(|key| {
                let source = pending.sources.remove(&key)?;
                Some(ViewEvent::from_key(key, source))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().order.is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        let pending = self.lock();
        QueueStats {
            pending: pending.order.len(),
            ..pending.stats
        }
    }
}
