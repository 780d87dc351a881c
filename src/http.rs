//! Request and response value objects exchanged with the transport.
//!
//! The crawl loop treats these as opaque beyond the URL (for logging and
//! cache keys) and the method (for cache idempotency). A [`FetchResult`]
//! pairs the originating task with a pre-dispatch snapshot of its request,
//! so a retry never observes state mutated by a previous attempt.

use std::time::Duration;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::CrawlError;
use crate::proxy::ProxyServer;
use crate::task::Task;

/// Specification of one outbound fetch.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Target URL.
    pub url: Url,
    /// HTTP method; only idempotent methods are eligible for the cache.
    pub method: Method,
    /// Extra request headers, in insertion order.
    pub headers: Vec<(String, String)>,
    /// Optional request body.
    pub body: Option<Vec<u8>>,
    /// Per-task proxy override; takes precedence over rotation.
    pub proxy: Option<ProxyServer>,
    /// Per-request timeout; the transport default applies when absent.
    pub timeout: Option<Duration>,
}

impl FetchRequest {
    /// Creates a GET request for the given URL.
    pub fn new(url: Url) -> Self {
        FetchRequest {
            url,
            method: Method::GET,
            headers: Vec::new(),
            body: None,
            proxy: None,
            timeout: None,
        }
    }

    /// Parses `url` and creates a GET request for it.
    pub fn parse(url: &str) -> Result<Self, CrawlError> {
        let url = Url::parse(url).map_err(|e| CrawlError::InvalidRequest(format!("{url}: {e}")))?;
        Ok(Self::new(url))
    }

    /// Adds a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Whether the request method is safe to serve from the cache.
    pub fn is_idempotent(&self) -> bool {
        matches!(self.method, Method::GET | Method::HEAD)
    }
}

/// A completed fetch payload.
///
/// Serializable so cache backends can persist it as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResponse {
    /// Final URL after redirects.
    pub url: Url,
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: Vec<(String, String)>,
    /// Raw body bytes.
    pub body: Vec<u8>,
    /// Wall-clock time the fetch took.
    pub elapsed: Duration,
    /// True when the payload was served by the cache collaborator.
    pub from_cache: bool,
}

impl FetchResponse {
    /// Body decoded as UTF-8, lossily.
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// True for 2xx status codes.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// What happened to one dispatched task.
#[derive(Debug)]
pub enum FetchOutcome {
    /// The transport produced a response.
    Success(FetchResponse),
    /// Transient transport failure; the loop decides whether to retry.
    NetworkError {
        /// Short description of the failure.
        reason: String,
    },
    /// The request could not be built at all; never retried.
    InvalidRequest {
        /// What was wrong with the request.
        reason: String,
    },
}

/// Transport-to-loop payload for one completed task.
#[derive(Debug)]
pub struct FetchResult {
    /// The originating task, counters included.
    pub task: Task,
    /// Snapshot of the request as it was before dispatch.
    pub request_backup: FetchRequest,
    /// Fetch outcome.
    pub outcome: FetchOutcome,
}
