use thiserror::Error;

/// Failure while fetching from a remote source
#[derive(Debug, Error)]
pub enum SourceError {
    /// Connection failure, timeout, or body read error
    #[error("transport error for {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Anything other than HTTP 200
    #[error("API request to {url} failed with status {status}")]
    Status { url: String, status: u16 },

    /// Body is not JSON or has no `events` array
    #[error("invalid response format from {url}: {reason}")]
    InvalidResponse { url: String, reason: String },
}

/// Failure in one of the durable stores (events, cursors, locks, request times)
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("{0} mutex poisoned")]
    Poisoned(&'static str),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse source list: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Failure of a single source's fetch/store step inside a round
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The per-source task panicked or was torn down
    #[error("source task failed: {0}")]
    Task(String),
}
