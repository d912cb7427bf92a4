use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use dashmap::DashMap;

use super::{Result, UnavailableSnafu, ViewStore};
use crate::model::{ViewKey, ViewRecord};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Engagement {
    pub likes: u64,
    pub comments: u64,
}

/// An in-process view store.
///
/// Content items must be registered with [MemoryStore::create_content] before views for them
/// are accepted by the engine. The store can be switched into an outage where every call fails
/// with [super::StoreError::Unavailable].
#[derive(Debug, Default)]
pub struct MemoryStore {
    content: DashMap<String, Engagement>,
    views: DashMap<ViewKey, ViewRecord>,
    upserts: AtomicUsize,
    outage: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_content(&self, content_id: impl Into<String>) {
        self.content.entry(content_id.into()).or_default();
    }

    /// Removes the content item together with every view recorded for it.
    pub fn delete_content(&self, content_id: &str) {
        self.content.remove(content_id);
        self.views.retain(|key, _| key.content_id != content_id);
    }

    pub fn set_engagement(&self, content_id: impl Into<String>, engagement: Engagement) {
        self.content.insert(content_id.into(), engagement);
    }

    pub fn set_outage(&self, down: bool) {
        self.outage.store(down, Ordering::SeqCst);
    }

    /// Number of upsert calls received so far, successful or not.
    pub fn upsert_calls(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    pub fn record(&self, key: &ViewKey) -> Option<ViewRecord> {
        self.views.get(key).map(|record| record.clone())
    }

    pub fn record_count(&self) -> usize {
        self.views.len()
    }

    fn check_available(&self) -> Result<()> {
        if self.outage.load(Ordering::SeqCst) {
            return UnavailableSnafu {
                message: "memory store is in a simulated outage",
            }
            .fail();
        }

        Ok(())
    }

    fn engagement(&self, content_id: &str) -> Engagement {
        self.content
            .get(content_id)
            .map(|engagement| *engagement)
            .unwrap_or_default()
    }
}

impl ViewStore for MemoryStore {
    async fn exists(&self, content_id: &str) -> Result<bool> {
        self.check_available()?;
        Ok(self.content.contains_key(content_id))
    }

    async fn upsert(&self, record: &ViewRecord) -> Result<()> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        self.views
            .entry(record.key())
            .and_modify(|existing| {
                existing.source = record.source.clone();
                existing.viewed_at = record.viewed_at;
            })
            .or_insert_with(|| record.clone());

        Ok(())
    }

    async fn count_views(&self, content_id: &str) -> Result<u64> {
        self.check_available()?;

        let count = self
            .views
            .iter()
            .filter(|entry| entry.key().content_id == content_id)
            .count();

        Ok(count as u64)
    }

    async fn count_likes(&self, content_id: &str) -> Result<u64> {
        self.check_available()?;
        Ok(self.engagement(content_id).likes)
    }

    async fn count_comments(&self, content_id: &str) -> Result<u64> {
        self.check_available()?;
        Ok(self.engagement(content_id).comments)
    }
}
