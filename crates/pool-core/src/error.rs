//! Error kinds for the pool manager.
//!
//! Mirrors the propagation policy in the spec: probe- and source-level
//! errors are absorbed inside their loop, dial-level errors surface to
//! the calling SOCKS5 session, and startup errors are fatal.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("invalid configuration for source `{source}`: {reason}")]
    ConfigInvalid { source: String, reason: String },

    #[error("config/alive-data I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("transient fetch error from source `{source}`: {reason}")]
    SourceTransient { source: String, reason: String },

    #[error("authoritative rejection from source `{source}`: {reason}")]
    SourceAuthoritative { source: String, reason: String },

    #[error("probe failed for `{url}`")]
    ProbeFailed { url: String },

    #[error("no available proxies in pool")]
    NoAvailableProxies,

    #[error("dial through `{url}` failed: {reason}")]
    DialFailed { url: String, reason: String },
}

pub type Result<T> = std::result::Result<T, PoolError>;
