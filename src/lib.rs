pub mod api;
pub mod config;
pub mod counter;
pub mod engine;
pub mod error;
pub mod identity;
pub mod logger;
pub mod model;
pub mod queue;
pub mod scheduler;
pub mod store;

pub trait Located {
    fn location(&self) -> snafu::Location;
}

pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::engine::ViewTracker;
    pub use crate::error::{ErrorKind, ViewError};
    pub use crate::model::{now, Source, Stat, Timestamp, ViewCount, ViewEvent, ViewKey, ViewRecord};
    pub use crate::queue::{Enqueued, ViewQueue};
    pub use crate::scheduler::{FlushReport, FlushState};
    pub use crate::store::{MemoryStore, StoreError, SurrealStore, ViewStore};
}
