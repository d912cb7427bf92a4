use std::net::SocketAddr;

use serde::Serialize;
use snafu::{Location, Snafu};

use crate::config::ConfigError;
use crate::store::StoreError;
use crate::Located;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ApplicationError {
    /// could not load the configuration from the environment
    ConfigLoad {
        source: ConfigError,
        #[snafu(implicit)]
        location: Location,
    },

    /// Could not connect to the view store
    ConnectDatabase {
        source: StoreError,
        #[snafu(implicit)]
        location: Location,
    },

    /// Could not serve the application
    WebServer {
        source: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },

    /// Could not bind to the given address, check if it's already in use
    BindAddress {
        address: SocketAddr,
        source: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("invalid log filter `{directives}`: {source}"))]
    LogFilter {
        directives: String,
        source: tracing_subscriber::filter::ParseError,
        #[snafu(implicit)]
        location: Location,
    },

    /// Could not initialize the logger
    InitializeLogger {
        source: tracing::subscriber::SetGlobalDefaultError,
        #[snafu(implicit)]
        location: Location,
    },
}

/// Errors surfaced to callers of the view tracking operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ViewError {
    #[snafu(display("`{field}` must not be empty"))]
    InvalidField {
        field: &'static str,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("expected between 1 and {max} content ids, got {len}"))]
    BatchSize {
        len: usize,
        max: usize,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("content `{content_id}` does not exist"))]
    ContentNotFound {
        content_id: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("view store is unavailable: {source}"))]
    Store {
        source: StoreError,
        #[snafu(implicit)]
        location: Location,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    StoreUnavailable,
}

impl ViewError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ViewError::InvalidField { .. } | ViewError::BatchSize { .. } => ErrorKind::Validation,
            ViewError::ContentNotFound { .. } => ErrorKind::NotFound,
            ViewError::Store { .. } => ErrorKind::StoreUnavailable,
        }
    }
}

impl Located for ViewError {
    fn location(&self) -> Location {
        match self {
            ViewError::InvalidField { location, .. }
            | ViewError::BatchSize { location, .. }
            | ViewError::ContentNotFound { location, .. }
            | ViewError::Store { location, .. } => *location,
        }
    }
}
