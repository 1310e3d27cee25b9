//! Error types for the attribution storage engine.
//!
//! Public engine operations never surface these directly: they are
//! propagated internally with `?` and collapsed into `InternalError`
//! statuses at the API boundary (see `storage`).

use thiserror::Error;

/// Failure while reading or writing the attribution database.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("schema version {found} is newer than supported version {supported}")]
    IncompatibleVersion { found: i64, supported: i64 },

    #[error("corrupt row in {table}: {reason}")]
    Corrupt { table: &'static str, reason: String },
}

impl StorageError {
    pub fn corrupt(table: &'static str, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            table,
            reason: reason.into(),
        }
    }
}

/// Rejected origin string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OriginError {
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("opaque origin: {0}")]
    Opaque(String),

    #[error("origin is not potentially trustworthy: {0}")]
    Untrustworthy(String),
}

/// Registration data that violates the size limits of filters or keys.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("filter key '{0}' is reserved")]
    ReservedFilterKey(String),

    #[error("too many filter keys: {0}")]
    TooManyFilterKeys(usize),

    #[error("too many values for filter key '{key}': {count}")]
    TooManyFilterValues { key: String, count: usize },

    #[error("filter string too long: {0}")]
    FilterStringTooLong(String),

    #[error("too many aggregation keys: {0}")]
    TooManyAggregationKeys(usize),

    #[error("aggregation key id too long: {0}")]
    AggregationKeyIdTooLong(String),
}

/// Invalid engine configuration.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid configuration value: {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}
