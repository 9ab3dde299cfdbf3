//! Error types and handling for fathom-core operations.
//!
//! Errors are categorized to match the propagation policy of the runtime:
//! configuration problems are fatal and surfaced to the caller, fetch
//! failures are recorded per URL and retried, storage problems are retried
//! by the self-healing connect helper and only escalate to
//! [`Error::DatabaseCritical`] once retries are exhausted.

use thiserror::Error;

/// The main error type for fathom-core operations.
///
/// All public functions in fathom-core return `Result<T, Error>`. Variants
/// preserve the underlying error where one exists so callers can inspect
/// the full source chain.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Network operation failed.
    ///
    /// Covers HTTP requests for page fetches, sitemap downloads, and the
    /// fallback extractor service. The underlying `reqwest::Error` is
    /// preserved for connection-level detail.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Configuration is invalid or inaccessible.
    ///
    /// Invalid deployment JSON, duplicate tenant codenames, missing
    /// source fields, or an unparseable cron expression. Fatal: surfaced
    /// to the caller at load time.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource was not found.
    ///
    /// Unknown tenant codename, missing document, or an empty browse
    /// path. Caller-visible but non-fatal.
    #[error("Not found: {0}")]
    NotFound(String),

    /// URL is malformed or cannot be normalized.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// A per-URL fetch failed.
    ///
    /// The reason string (`"status=500"`, `"timeout"`,
    /// `"fallback_disabled"`, ...) is recorded on the URL metadata row and
    /// drives retry scheduling.
    #[error("Fetch failed for '{url}': {reason}")]
    Fetch {
        /// URL that failed to fetch.
        url: String,
        /// Reason attached to the URL metadata record.
        reason: String,
    },

    /// Search index operation failed.
    ///
    /// Segment build or query errors. An index build failure leaves the
    /// previous segment active.
    #[error("Index error: {0}")]
    Index(String),

    /// Storage operation failed.
    ///
    /// File moves inside a unit of work, manifest writes, and transient
    /// SQLite problems before the retry budget is exhausted.
    #[error("Storage error: {0}")]
    Storage(String),

    /// SQLite gave up after bounded reconnect retries.
    ///
    /// Raised by the state store's self-healing connect helper. The
    /// tenant runtime logs this and degrades to read-only operation.
    #[error("Database critical: {0}")]
    DatabaseCritical(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Operation timed out.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Operation was cancelled (shutdown or trigger abort).
    ///
    /// Propagated without modification; shutdown paths tolerate it.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Generic error for uncategorized failures.
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl Error {
    /// Check if the error might be recoverable through retry logic.
    ///
    /// Returns `true` for errors that are typically temporary: network
    /// timeouts and connection failures, fetch failures (retried on the
    /// next sync), transient I/O and storage errors. Configuration and
    /// not-found errors are permanent.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Network(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout(_) | Self::Fetch { .. } | Self::Storage(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }

    /// Get the error category as a static string identifier.
    ///
    /// Used for structured logging and event rows.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Network(_) => "network",
            Self::Config(_) => "config",
            Self::NotFound(_) => "not_found",
            Self::InvalidUrl(_) => "invalid_url",
            Self::Fetch { .. } => "fetch",
            Self::Index(_) => "index",
            Self::Storage(_) => "storage",
            Self::DatabaseCritical(_) => "database_critical",
            Self::Serialization(_) => "serialization",
            Self::Timeout(_) => "timeout",
            Self::Cancelled(_) => "cancelled",
            Self::Other(_) => "other",
        }
    }

    /// Short reason string suitable for `url_metadata.last_failure_reason`.
    #[must_use]
    pub fn failure_reason(&self) -> String {
        match self {
            Self::Fetch { reason, .. } => reason.clone(),
            Self::Timeout(_) => "timeout".to_string(),
            other => other.category().to_string(),
        }
    }
}

/// Convenience type alias for `std::result::Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
