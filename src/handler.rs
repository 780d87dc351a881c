//! # Handler Module
//!
//! Defines the contracts user code implements to consume crawl results.
//!
//! ## Overview
//!
//! A [`TaskHandler`] receives a completed response together with its task
//! and yields an output of zero or more new tasks and data records. A
//! [`DataHandler`] consumes the data records by name. A
//! [`FallbackHandler`] is invoked instead of the normal handler when a
//! task runs out of tries.
//!
//! Handlers are looked up through an explicit [`HandlerRegistry`] built
//! once at construction, so a missing handler for a seed task is a
//! construction-time error rather than a runtime surprise. A handler that
//! returns [`CrawlError::ResponseNotValid`] sends its task back through
//! the retry path; [`CrawlError::Fatal`] stops the run; any other error is
//! recorded as a fault and the run continues.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::CrawlError;
use crate::http::FetchResponse;
use crate::task::{Task, RESERVED_TASK_NAMES};

/// A named data record yielded by a handler.
#[derive(Debug, Clone)]
pub struct Data {
    /// Name of the data handler that consumes this record.
    pub name: String,
    /// The record itself.
    pub value: Value,
}

impl Data {
    /// Creates a record for the named data handler.
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Data {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Everything one handler invocation produced.
#[derive(Default)]
pub struct HandlerOutput {
    tasks: Vec<Task>,
    data: Vec<Data>,
}

impl HandlerOutput {
    /// Creates an empty output.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a task to re-enter the queue.
    pub fn push_task(&mut self, task: Task) {
        self.tasks.push(task);
    }

    /// Adds a data record for its data handler.
    pub fn push_data(&mut self, data: Data) {
        self.data.push(data);
    }

    /// Consumes the output into its tasks and data records.
    pub fn into_parts(self) -> (Vec<Task>, Vec<Data>) {
        (self.tasks, self.data)
    }

    /// True when nothing was produced.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty() && self.data.is_empty()
    }
}

/// Consumes one completed fetch for its task.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Processes `response`, yielding follow-up tasks and data records.
    async fn handle(&self, response: &FetchResponse, task: &Task)
        -> Result<HandlerOutput, CrawlError>;
}

/// Consumes data records yielded by task handlers.
#[async_trait]
pub trait DataHandler: Send + Sync {
    /// Processes one data record.
    async fn handle(&self, data: &Data) -> Result<(), CrawlError>;
}

/// Invoked when a task exceeds its try limits.
///
/// Produces nothing automatically; any further work must be enqueued
/// explicitly by user code elsewhere.
#[async_trait]
pub trait FallbackHandler: Send + Sync {
    /// Observes the rejected task.
    async fn handle(&self, task: &Task);
}

/// Name-to-handler dispatch tables, built once at construction.
#[derive(Default)]
pub(crate) struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    data_handlers: HashMap<String, Arc<dyn DataHandler>>,
    fallbacks: HashMap<String, Arc<dyn FallbackHandler>>,
}

impl HandlerRegistry {
    fn check_name(name: &str) -> Result<(), CrawlError> {
        if RESERVED_TASK_NAMES.contains(&name) {
            return Err(CrawlError::Misuse(format!(
                "handler name {name:?} is reserved"
            )));
        }
        Ok(())
    }

    pub(crate) fn register(
        &mut self,
        name: &str,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<(), CrawlError> {
        Self::check_name(name)?;
        if self.handlers.insert(name.to_string(), handler).is_some() {
            return Err(CrawlError::Misuse(format!(
                "task handler {name:?} registered twice"
            )));
        }
        Ok(())
    }

    pub(crate) fn register_data(
        &mut self,
        name: &str,
        handler: Arc<dyn DataHandler>,
    ) -> Result<(), CrawlError> {
        if self.data_handlers.insert(name.to_string(), handler).is_some() {
            return Err(CrawlError::Misuse(format!(
                "data handler {name:?} registered twice"
            )));
        }
        Ok(())
    }

    pub(crate) fn register_fallback(
        &mut self,
        name: &str,
        handler: Arc<dyn FallbackHandler>,
    ) -> Result<(), CrawlError> {
        if self.fallbacks.insert(name.to_string(), handler).is_some() {
            return Err(CrawlError::Misuse(format!(
                "fallback handler {name:?} registered twice"
            )));
        }
        Ok(())
    }

    pub(crate) fn get(&self, name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(name).cloned()
    }

    pub(crate) fn get_data(&self, name: &str) -> Option<Arc<dyn DataHandler>> {
        self.data_handlers.get(name).cloned()
    }

    pub(crate) fn get_fallback(&self, name: &str) -> Option<Arc<dyn FallbackHandler>> {
        self.fallbacks.get(name).cloned()
    }

    pub(crate) fn has(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}
