//! Read side of view tracking. Counts come straight from the store, there is no cache.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use snafu::ensure;
use tracing::instrument;

use crate::error::{BatchSizeSnafu, InvalidFieldSnafu, ViewError};
use crate::model::{BatchStats, Stat};
use crate::store::{with_timeout, ViewStore};

/// Most distinct content ids a single batch request may ask for.
pub const MAX_BATCH: usize = 50;

#[derive(Debug)]
pub struct Counter<S> {
    store: Arc<S>,
    timeout: Duration,
}

impl<S> Clone for Counter<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            timeout: self.timeout,
        }
    }
}

impl<S: ViewStore> Counter<S> {
    pub fn new(store: Arc<S>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Number of distinct visitors of `content_id`.
    ///
    /// Fails open: a store error or timeout is logged and reported as `0`.
    #[instrument(skip(self))]
    pub async fn count(&self, content_id: &str) -> u64 {
        self.cell(content_id, Stat::Views).await
    }

    /// Counts `stats` for every distinct id in `content_ids`.
    ///
    /// Duplicate ids are folded before the size check. Each cell is read on its own, so one
    /// failing read only zeroes that cell.
    #[instrument(skip(self, content_ids), fields(ids = content_ids.len()))]
    pub async fn batch_count(
        &self, content_ids: &[String], stats: &[Stat],
    ) -> Result<BatchStats, ViewError> {
        let ids: BTreeSet<&str> = content_ids.iter().map(String::as_str).collect();

        ensure!(
            !ids.iter().any(|id| id.trim().is_empty()),
            InvalidFieldSnafu { field: "content_id" }
        );
        ensure!(
            (1..=MAX_BATCH).contains(&ids.len()),
            BatchSizeSnafu {
                len: ids.len(),
                max: MAX_BATCH
            }
        );

        let stats: BTreeSet<Stat> = if stats.is_empty() {
            BTreeSet::from([Stat::Views])
        } else {
            stats.iter().copied().collect()
        };

        let cells = ids
            .iter()
            .flat_map(|id| stats.iter().map(move |stat| (*id, *stat)))
            .map(|(id, stat)| async move { (id, stat, self.cell(id, stat).await) });

        let mut result: BatchStats = ids
            .iter()
            .map(|id| (id.to_string(), BTreeMap::new()))
            .collect();

        for (id, stat, value) in join_all(cells).await {
            if let Some(row) = result.get_mut(id) {
                row.insert(stat, value);
            }
        }

        Ok(result)
    }

    async fn cell(&self, content_id: &str, stat: Stat) -> u64 {
        match with_timeout("count", self.timeout, self.store.count(content_id, stat)).await {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!(%content_id, ?stat, %error, "failed to read a count, reporting 0");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{now, Source, ViewRecord};
    use crate::store::{Engagement, MemoryStore, UnavailableSnafu};

    fn counter(store: MemoryStore) -> (Arc<MemoryStore>, Counter<MemoryStore>) {
        let store = Arc::new(store);
        (store.clone(), Counter::new(store, Duration::from_secs(5)))
    }

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    async fn view(store: &MemoryStore, content: &str, viewer: &str) {
        let record = ViewRecord::new(content.into(), viewer.into(), "1.1.1.1".into(), Source::App, now());
        store.upsert(&record).await.unwrap();
    }

    #[tokio::test]
    async fn count_reports_distinct_viewers() {
        let (store, counter) = counter(MemoryStore::new());
        view(&store, "post", "u1").await;
        view(&store, "post", "u1").await;
        view(&store, "post", "u2").await;

        assert_eq!(counter.count("post").await, 2);
        assert_eq!(counter.count("unknown").await, 0);
    }

    #[tokio::test]
    async fn count_fails_open() {
        let (store, counter) = counter(MemoryStore::new());
        view(&store, "post", "u1").await;
        store.set_outage(true);

        assert_eq!(counter.count("post").await, 0);
    }

    #[tokio::test]
    async fn batch_defaults_to_views_and_folds_duplicates() {
        let (store, counter) = counter(MemoryStore::new());
        view(&store, "a", "u1").await;
        view(&store, "a", "u2").await;

        let stats = counter.batch_count(&ids(&["a", "a", "b"]), &[]).await.unwrap();

        assert_eq!(stats.len(), 2);
        assert_eq!(stats["a"], BTreeMap::from([(Stat::Views, 2)]));
        assert_eq!(stats["b"], BTreeMap::from([(Stat::Views, 0)]));
    }

    #[tokio::test]
    async fn batch_reads_every_requested_stat() {
        let (store, counter) = counter(MemoryStore::new());
        store.set_engagement("a", Engagement { likes: 3, comments: 1 });
        view(&store, "a", "u1").await;

        let stats = counter
            .batch_count(&ids(&["a"]), &[Stat::Likes, Stat::Comments, Stat::Views])
            .await
            .unwrap();

        assert_eq!(
            stats["a"],
            BTreeMap::from([(Stat::Views, 1), (Stat::Likes, 3), (Stat::Comments, 1)])
        );
    }

    #[tokio::test]
    async fn batch_bounds_are_enforced() {
        let (_, counter) = counter(MemoryStore::new());

        let error = counter.batch_count(&[], &[]).await.unwrap_err();
        assert!(matches!(error, ViewError::BatchSize { len: 0, .. }));

        let many: Vec<String> = (0..51).map(|i| format!("post-{i}")).collect();
        let error = counter.batch_count(&many, &[]).await.unwrap_err();
        assert!(matches!(error, ViewError::BatchSize { len: 51, max: MAX_BATCH, .. }));

        let exactly: Vec<String> = (0..50).map(|i| format!("post-{i}")).collect();
        assert_eq!(counter.batch_count(&exactly, &[]).await.unwrap().len(), 50);
    }

    #[tokio::test]
    async fn fifty_one_ids_with_duplicates_fit() {
        let (_, counter) = counter(MemoryStore::new());
        let mut many: Vec<String> = (0..50).map(|i| format!("post-{i}")).collect();
        many.push("post-0".into());

        assert_eq!(counter.batch_count(&many, &[]).await.unwrap().len(), 50);
    }

    #[tokio::test]
    async fn blank_ids_are_rejected() {
        let (_, counter) = counter(MemoryStore::new());
        let error = counter.batch_count(&ids(&["a", " "]), &[]).await.unwrap_err();

        assert!(matches!(error, ViewError::InvalidField { field: "content_id", .. }));
    }

    #[tokio::test]
    async fn failing_cells_report_zero() {
        let (store, counter) = counter(MemoryStore::new());
        view(&store, "a", "u1").await;
        store.set_outage(true);

        let stats = counter.batch_count(&ids(&["a"]), &[Stat::Views, Stat::Likes]).await.unwrap();

        assert_eq!(stats["a"], BTreeMap::from([(Stat::Views, 0), (Stat::Likes, 0)]));
    }

    /// Fails `count_likes` for a single content id.
    #[derive(Debug)]
    struct BrokenLikes {
        inner: MemoryStore,
        broken: &'static str,
    }

    impl ViewStore for BrokenLikes {
        async fn exists(&self, content_id: &str) -> crate::store::Result<bool> {
            self.inner.exists(content_id).await
        }

        async fn upsert(&self, record: &ViewRecord) -> crate::store::Result<()> {
            self.inner.upsert(record).await
        }

        async fn count_views(&self, content_id: &str) -> crate::store::Result<u64> {
            self.inner.count_views(content_id).await
        }

        async fn count_likes(&self, content_id: &str) -> crate::store::Result<u64> {
            if content_id == self.broken {
                return UnavailableSnafu { message: "likes shard down" }.fail();
            }
            self.inner.count_likes(content_id).await
        }

        async fn count_comments(&self, content_id: &str) -> crate::store::Result<u64> {
            self.inner.count_comments(content_id).await
        }
    }

    #[tokio::test]
    async fn one_failing_cell_leaves_the_others_intact() {
        let inner = MemoryStore::new();
        inner.set_engagement("b", Engagement { likes: 3, comments: 0 });
        view(&inner, "a", "u1").await;
        view(&inner, "b", "u1").await;
        view(&inner, "b", "u2").await;

        let store = Arc::new(BrokenLikes { inner, broken: "a" });
        let counter = Counter::new(store, Duration::from_secs(5));

        let stats = counter
            .batch_count(&ids(&["a", "b"]), &[Stat::Views, Stat::Likes])
            .await
            .unwrap();

        assert_eq!(stats["a"], BTreeMap::from([(Stat::Views, 1), (Stat::Likes, 0)]));
        assert_eq!(stats["b"], BTreeMap::from([(Stat::Views, 2), (Stat::Likes, 3)]));
    }
}
