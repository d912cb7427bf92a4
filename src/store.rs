use std::future::Future;
use std::time::Duration;

use snafu::{Location, Snafu};
use url::Url;

use crate::model::{Stat, ViewRecord};
use crate::Located;

pub use memory::{Engagement, MemoryStore};
pub use surreal::{AsCredentials, Auth, Connection, Query, SurrealStore};

mod memory;
mod surreal;

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StoreError {
    #[snafu(display("failed to query the database at {location}: {source}"))]
    DatabaseQuery {
        source: surrealdb::Error,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("failed to deserialize the database response at {location}: {source}"))]
    DatabaseDeserialize {
        source: surrealdb::Error,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("cannot connect to the database `{url}` at {location}: {source}"))]
    DatabaseConnection {
        url: Url,
        source: surrealdb::Error,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("url `{url}` is missing a namespace parameter (ns) at {location}"))]
    NoNamespace {
        url: Url,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("url `{url}` is missing a database parameter (db) at {location}"))]
    NoDatabase {
        url: Url,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("`{operation}` did not complete within {limit:?}"))]
    Timeout {
        operation: &'static str,
        limit: Duration,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("view store is unavailable: {message}"))]
    Unavailable {
        message: String,
        #[snafu(implicit)]
        location: Location,
    },
}

impl Located for StoreError {
    fn location(&self) -> Location {
        match self {
            StoreError::DatabaseQuery { location, .. }
            | StoreError::DatabaseDeserialize { location, .. }
            | StoreError::DatabaseConnection { location, .. }
            | StoreError::NoNamespace { location, .. }
            | StoreError::NoDatabase { location, .. }
            | StoreError::Timeout { location, .. }
            | StoreError::Unavailable { location, .. } => *location,
        }
    }
}

/// The durable side of view tracking.
///
/// `upsert` must be idempotent on the `(content_id, viewer_id, client_ip)` triple: a second
/// write for the same triple only refreshes `viewed_at` and `source`, so `count_views` always
/// reports distinct visitors.
pub trait ViewStore: Send + Sync + 'static {
    /// Whether the content item exists. Views are only recorded for existing content.
    fn exists(&self, content_id: &str) -> impl Future<Output = Result<bool>> + Send;

    fn upsert(&self, record: &ViewRecord) -> impl Future<Output = Result<()>> + Send;

    fn count_views(&self, content_id: &str) -> impl Future<Output = Result<u64>> + Send;

    fn count_likes(&self, content_id: &str) -> impl Future<Output = Result<u64>> + Send;

    fn count_comments(&self, content_id: &str) -> impl Future<Output = Result<u64>> + Send;

    fn count(&self, content_id: &str, stat: Stat) -> impl Future<Output = Result<u64>> + Send {
        async move {
            match stat {
                Stat::Views => self.count_views(content_id).await,
                Stat::Likes => self.count_likes(content_id).await,
                Stat::Comments => self.count_comments(content_id).await,
            }
        }
    }
}

/// Bounds a store call by `limit`, turning an elapsed deadline into [StoreError::Timeout].
pub async fn with_timeout<T>(
    operation: &'static str, limit: Duration, call: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => TimeoutSnafu { operation, limit }.fail(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn slow_calls_time_out() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(1u64)
        };

        let error = with_timeout("count_views", Duration::from_secs(5), slow)
            .await
            .unwrap_err();

        assert!(matches!(error, StoreError::Timeout { operation: "count_views", .. }));
    }

    #[tokio::test]
    async fn fast_calls_pass_through() {
        let value = with_timeout("exists", Duration::from_secs(5), async { Ok(true) })
            .await
            .unwrap();

        assert!(value);
    }
}
