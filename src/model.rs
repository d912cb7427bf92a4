use std::collections::BTreeMap;

use derive_new::new;
use serde::{Deserialize, Serialize};

pub type Timestamp = chrono::DateTime<chrono::Utc>;

pub fn now() -> Timestamp {
    chrono::Utc::now()
}

/// The surface a view was generated on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    App,
    Widget,
    #[serde(untagged)]
    Other(String),
}

impl Source {
    pub fn as_str(&self) -> &str {
        match self {
            Source::App => "app",
            Source::Widget => "widget",
            Source::Other(tag) => tag,
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Source {
    fn from(tag: &str) -> Self {
        match tag {
            "app" => Source::App,
            "widget" => Source::Widget,
            other => Source::Other(other.to_string()),
        }
    }
}

/// Identity of a view record: one visitor, from one address, on one piece of content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, new)]
pub struct ViewKey {
    pub content_id: String,
    pub viewer_id: String,
    pub client_ip: String,
}

/// A single "this visitor saw this content" signal, before deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewEvent {
    pub content_id: String,
    pub viewer_id: String,
    pub client_ip: String,
    pub source: Source,
}

impl ViewEvent {
    pub fn new(
        content_id: impl Into<String>, viewer_id: impl Into<String>, client_ip: impl Into<String>,
        source: Source,
    ) -> Self {
        Self {
            content_id: content_id.into(),
            viewer_id: viewer_id.into(),
            client_ip: client_ip.into(),
            source,
        }
    }

    pub fn from_key(key: ViewKey, source: Source) -> Self {
        let ViewKey {
            content_id,
            viewer_id,
            client_ip,
        } = key;

        Self {
            content_id,
            viewer_id,
            client_ip,
            source,
        }
    }

    pub fn key(&self) -> ViewKey {
        ViewKey::new(
            self.content_id.clone(),
            self.viewer_id.clone(),
            self.client_ip.clone(),
        )
    }

    /// Returns the name of the first identity field that is blank.
    pub fn blank_field(&self) -> Option<&'static str> {
        [
            ("content_id", &self.content_id),
            ("viewer_id", &self.viewer_id),
            ("client_ip", &self.client_ip),
        ]
        .into_iter()
        .find_map(|(name, value)| value.trim().is_empty().then_some(name))
    }
}

/// The durable, deduplicated record of a visitor having viewed a piece of content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct ViewRecord {
    pub content_id: String,
    pub viewer_id: String,
    pub client_ip: String,
    pub source: Source,
    pub viewed_at: Timestamp,
}

impl ViewRecord {
    pub fn from_event(event: ViewEvent, viewed_at: Timestamp) -> Self {
        Self::new(
            event.content_id,
            event.viewer_id,
            event.client_ip,
            event.source,
            viewed_at,
        )
    }

    pub fn key(&self) -> ViewKey {
        ViewKey::new(
            self.content_id.clone(),
            self.viewer_id.clone(),
            self.client_ip.clone(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stat {
    Views,
    Likes,
    Comments,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, new)]
#[serde(rename_all = "camelCase")]
pub struct ViewCount {
    pub view_count: u64,
}

pub type BatchStats = BTreeMap<String, BTreeMap<Stat, u64>>;
