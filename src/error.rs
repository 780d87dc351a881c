//! Error types used across the crawl engine.
//!
//! The taxonomy distinguishes errors the loop recovers from locally
//! (transient network failures, handler-signaled invalid responses) from
//! errors that must surface to the caller of [`Crawler::run`]
//! (fatal handler errors, programmer misuse).
//!
//! [`Crawler::run`]: crate::crawler::Crawler::run

use thiserror::Error;

/// Errors produced by the crawl engine and its collaborators.
#[derive(Error, Debug)]
pub enum CrawlError {
    /// Malformed URL or unbuildable request. Rejected immediately, never
    /// retried, recorded in the rejection collection.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Transient transport failure (connect, timeout, DNS, TLS). Retried up
    /// to the network try limit, then rejected.
    #[error("network error: {reason}")]
    Network {
        /// Short description of the transport failure.
        reason: String,
    },

    /// Handler-detected semantic failure (unexpected status, integrity
    /// check). Retried up to the task try limit, then rejected.
    #[error("response not valid: {0}")]
    ResponseNotValid(String),

    /// Non-recoverable error. Stops the whole run and surfaces from
    /// the run entry point.
    #[error("fatal: {0}")]
    Fatal(String),

    /// Programmer error (conflicting clone overrides, reserved or unknown
    /// handler names, zero worker slots). Raised at the detecting call site.
    #[error("misuse: {0}")]
    Misuse(String),

    /// The task queue backend itself is unavailable.
    #[error("task queue backend unavailable: {0}")]
    QueueBackend(String),

    /// Fail-fast guard on transport submission past capacity. Callers are
    /// expected to check `ready_for_task()` first.
    #[error("transport at capacity")]
    TransportAtCapacity,
}

impl CrawlError {
    /// Short stable label (kebab-case) for counters and collections.
    pub fn label(&self) -> &'static str {
        match self {
            CrawlError::InvalidRequest(_) => "invalid-request",
            CrawlError::Network { .. } => "network-error",
            CrawlError::ResponseNotValid(_) => "response-not-valid",
            CrawlError::Fatal(_) => "fatal",
            CrawlError::Misuse(_) => "misuse",
            CrawlError::QueueBackend(_) => "queue-backend",
            CrawlError::TransportAtCapacity => "transport-at-capacity",
        }
    }

    /// Whether the error must abort the run instead of being recorded.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CrawlError::Fatal(_))
    }
}
