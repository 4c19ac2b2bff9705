//! Error types for roomalloc

use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Record kinds an error can point at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Room,
    Application,
    Allocation,
    Hostel,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Room => write!(f, "room"),
            Entity::Application => write!(f, "application"),
            Entity::Allocation => write!(f, "allocation"),
            Entity::Hostel => write!(f, "hostel"),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    // === Allocation Errors ===
    #[error("{entity} not found: {id}")]
    NotFound { entity: Entity, id: String },

    #[error("Room {0} is fully occupied")]
    Full(String),

    #[error("Invalid state for {entity} {id}: {reason}")]
    InvalidState {
        entity: Entity,
        id: String,
        reason: String,
    },

    #[error("Concurrent modification: {0}")]
    Conflict(String),

    #[error("Operation timeout: {0}")]
    Timeout(String),

    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Storage Errors ===
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupted data: {0}")]
    Corrupted(String),

    // === Input & Config Errors ===
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(entity: Entity, id: impl Into<String>) -> Self {
        Error::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn invalid_state(entity: Entity, id: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidState {
            entity,
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Is this a retryable error?
    ///
    /// Only optimistic-concurrency collisions are; they denote a benign race.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    /// Stable tag used in API error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "not_found",
            Error::Full(_) => "full",
            Error::InvalidState { .. } => "invalid_state",
            Error::Conflict(_) => "conflict",
            Error::Timeout(_) => "timeout",
            Error::InvalidInput(_) => "invalid_input",
            Error::Io(_)
            | Error::RocksDb(_)
            | Error::Serialization(_)
            | Error::Corrupted(_)
            | Error::InvalidConfig(_)
            | Error::Config(_)
            | Error::Internal(_) => "internal",
        }
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Full(_) | Error::Conflict(_) => StatusCode::CONFLICT,
            Error::InvalidState { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
