//! # Transport Module
//!
//! The bounded-concurrency dispatcher of outbound requests.
//!
//! ## Overview
//!
//! The transport owns the worker-slot resource: at most `thread_number`
//! requests are in flight at any instant, and the crawl loop checks
//! [`NetworkTransport::ready_for_task`] before submitting. Submission never
//! blocks; completed work is surfaced through
//! [`NetworkTransport::iterate_results`] in completion order, which is
//! independent of dispatch priority.
//!
//! [`HttpTransport`] is the concrete implementation: one Tokio worker task
//! per in-flight request over a shared `reqwest` client. Event-driven or
//! thread-pool implementations plug in behind the same trait.

mod http;

pub use http::HttpTransport;

use async_trait::async_trait;

use crate::error::CrawlError;
use crate::http::{FetchRequest, FetchResult};
use crate::task::Task;

/// Bounded asynchronous executor of fetch tasks.
#[async_trait]
pub trait NetworkTransport: Send {
    /// True when a worker slot is free.
    fn ready_for_task(&self) -> bool;

    /// Count of requests currently in flight.
    fn active_task_number(&self) -> usize;

    /// Submits a task for asynchronous execution without blocking.
    ///
    /// `request_backup` is the pre-dispatch snapshot returned with the
    /// result so retries never observe mutated request state. Fails fast
    /// with [`CrawlError::TransportAtCapacity`] instead of silently
    /// dropping when no slot is free.
    fn process_task(&mut self, task: Task, request_backup: FetchRequest)
        -> Result<(), CrawlError>;

    /// Advances the underlying workers by one non-blocking step.
    ///
    /// Called unconditionally once per loop iteration. A transient
    /// transport failure is reported through the result channel as a
    /// network-error outcome, never raised from here.
    async fn process_handlers(&mut self);

    /// Drains whatever results completed since the last call.
    ///
    /// Never blocks; returns an empty batch when nothing is ready.
    fn iterate_results(&mut self) -> Vec<FetchResult>;
}
