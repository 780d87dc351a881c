//! # Task Module
//!
//! Defines the [`Task`] value object, one unit of crawl work.
//!
//! ## Overview
//!
//! A task names the handler that will process its result, carries the fetch
//! specification, and keeps the bookkeeping the retry machinery needs: two
//! independent try counters, an optional priority, an optional earliest
//! execution time, and an open metadata bag.
//!
//! Tasks are cheap to clone. Deriving a variant of an existing task goes
//! through [`Task::clone_with`], which copies every field by value and
//! rejects ambiguous overrides (a new URL and a full replacement request at
//! the same time).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use url::Url;

use crate::error::CrawlError;
use crate::handler::TaskHandler;
use crate::http::FetchRequest;

/// Task names claimed by the engine itself; user tasks and handlers must
/// not use them.
pub const RESERVED_TASK_NAMES: &[&str] = &["initial", "generator"];

/// Metadata key: skip the cache lookup for this task.
pub const META_DISABLE_CACHE: &str = "disable_cache";
/// Metadata key: bypass the cache lookup but store the fresh response.
pub const META_REFRESH_CACHE: &str = "refresh_cache";
/// Metadata key: deliver the raw payload without handler-side decoding.
pub const META_RAW: &str = "raw";

/// One unit of crawl work: a request plus bookkeeping.
#[derive(Clone)]
pub struct Task {
    /// Name of the handler that processes this task's result.
    pub name: String,
    /// Fetch specification.
    pub request: FetchRequest,
    /// Lower value is served first; `None` is assigned automatically on
    /// enqueue. An explicitly set priority is never overwritten.
    pub priority: Option<i32>,
    /// Times the loop accepted this task for processing.
    pub task_try_count: u32,
    /// Times this task was dispatched to the transport.
    pub network_try_count: u32,
    /// Earliest instant the task may be dequeued.
    pub schedule_time: Option<Instant>,
    /// Open key/value bag for user data and retry bookkeeping.
    pub meta: HashMap<String, Value>,
    /// Handler invoked instead of the normal one when try limits are
    /// exceeded.
    pub fallback_name: Option<String>,
    /// Per-task handler override; wins over the registry lookup.
    pub callback: Option<Arc<dyn TaskHandler>>,
}

/// Field overrides accepted by [`Task::clone_with`].
#[derive(Default)]
pub struct TaskOverrides {
    /// Replacement handler name.
    pub name: Option<String>,
    /// Replacement URL, keeping the rest of the request.
    pub url: Option<String>,
    /// Full replacement request. Mutually exclusive with `url`.
    pub request: Option<FetchRequest>,
    /// Replacement priority.
    pub priority: Option<i32>,
    /// Delay from now until the clone becomes eligible.
    pub schedule_in: Option<Duration>,
    /// Replacement fallback handler name.
    pub fallback_name: Option<String>,
}

impl Task {
    /// Creates a task for `handler_name` fetching `url`.
    ///
    /// Fails with [`CrawlError::Misuse`] when the name is reserved and with
    /// [`CrawlError::InvalidRequest`] when the URL does not parse.
    pub fn new(handler_name: impl Into<String>, url: &str) -> Result<Self, CrawlError> {
        let name = handler_name.into();
        Self::check_name(&name)?;
        Ok(Task {
            name,
            request: FetchRequest::parse(url)?,
            priority: None,
            task_try_count: 0,
            network_try_count: 0,
            schedule_time: None,
            meta: HashMap::new(),
            fallback_name: None,
            callback: None,
        })
    }

    /// Creates a task from an already-built request.
    pub fn from_request(
        handler_name: impl Into<String>,
        request: FetchRequest,
    ) -> Result<Self, CrawlError> {
        let name = handler_name.into();
        Self::check_name(&name)?;
        Ok(Task {
            name,
            request,
            priority: None,
            task_try_count: 0,
            network_try_count: 0,
            schedule_time: None,
            meta: HashMap::new(),
            fallback_name: None,
            callback: None,
        })
    }

    fn check_name(name: &str) -> Result<(), CrawlError> {
        if RESERVED_TASK_NAMES.contains(&name) {
            return Err(CrawlError::Misuse(format!(
                "task name {name:?} is reserved"
            )));
        }
        Ok(())
    }

    /// Sets an explicit priority. Lower values are served first.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Makes the task ineligible for dequeue until `delay` from now.
    pub fn delayed_by(mut self, delay: Duration) -> Self {
        self.schedule_time = Some(Instant::now() + delay);
        self
    }

    /// Inserts a metadata entry.
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// Sets the fallback handler invoked on limit exhaustion.
    pub fn with_fallback(mut self, handler_name: impl Into<String>) -> Self {
        self.fallback_name = Some(handler_name.into());
        self
    }

    /// Overrides the handler for this task only.
    ///
    /// Together with saved state in [`Task::meta`], this is how a handler
    /// chains a follow-up fetch: yield a task pointing back at a
    /// continuation handler and the loop feeds it exactly one result.
    pub fn with_callback(mut self, handler: Arc<dyn TaskHandler>) -> Self {
        self.callback = Some(handler);
        self
    }

    /// The task's target URL.
    pub fn url(&self) -> &Url {
        &self.request.url
    }

    /// True when the metadata flag `key` is set to `true`.
    pub fn meta_flag(&self, key: &str) -> bool {
        self.meta.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Sets a boolean metadata flag in place.
    pub fn set_meta_flag(&mut self, key: &str, value: bool) {
        self.meta.insert(key.to_string(), Value::Bool(value));
    }

    /// Derives a new task, copying all fields and applying `overrides`.
    ///
    /// Supplying both a replacement URL and a full replacement request is
    /// ambiguous and fails with [`CrawlError::Misuse`].
    pub fn clone_with(&self, overrides: TaskOverrides) -> Result<Self, CrawlError> {
        if overrides.url.is_some() && overrides.request.is_some() {
            return Err(CrawlError::Misuse(
                "clone_with accepts either a url or a request, not both".into(),
            ));
        }

        let mut task = self.clone();
        if let Some(name) = overrides.name {
            Self::check_name(&name)?;
            task.name = name;
        }
        if let Some(url) = overrides.url {
            task.request.url = Url::parse(&url)
                .map_err(|e| CrawlError::InvalidRequest(format!("{url}: {e}")))?;
        }
        if let Some(request) = overrides.request {
            task.request = request;
        }
        if let Some(priority) = overrides.priority {
            task.priority = Some(priority);
        }
        if let Some(delay) = overrides.schedule_in {
            task.schedule_time = Some(Instant::now() + delay);
        }
        if let Some(fallback) = overrides.fallback_name {
            task.fallback_name = Some(fallback);
        }
        Ok(task)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("url", &self.request.url.as_str())
            .field("priority", &self.priority)
            .field("task_try_count", &self.task_try_count)
            .field("network_try_count", &self.network_try_count)
            .field("schedule_time", &self.schedule_time)
            .field("fallback_name", &self.fallback_name)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}
