//! # Builder Module
//!
//! Provides the [`CrawlerBuilder`], a fluent API for assembling a
//! configured [`Crawler`].
//!
//! ## Overview
//!
//! The builder wires handlers, seeds, the optional generator, and the
//! pluggable collaborators (queue, transport, cache, proxy source, command
//! channel) into a crawler. Validation is eager: reserved or duplicate
//! handler names, seeds without a registered handler, and a zero worker
//! budget are all construction-time errors, not runtime surprises.
//!
//! ## Example
//!
//! ```rust,ignore
//! use fetchflow::{CrawlerBuilder, Task};
//!
//! let mut crawler = CrawlerBuilder::new()
//!     .thread_number(8)
//!     .handler("page", PageHandler)
//!     .seed(Task::new("page", "https://example.com/")?)
//!     .build()?;
//! let report = crawler.run().await?;
//! ```

use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use rand::rngs::SmallRng;
use rand::SeedableRng;
use serde_json::Value;

use crate::cache::ResponseCache;
use crate::command::CommandChannel;
use crate::config::{CrawlerConfig, PriorityMode};
use crate::crawler::{CrawlPhase, Crawler};
use crate::error::CrawlError;
use crate::generator::TaskGenerator;
use crate::handler::{DataHandler, FallbackHandler, HandlerRegistry, TaskHandler};
use crate::proxy::ProxySource;
use crate::queue::{MemoryTaskQueue, TaskQueue};
use crate::retry::RetryPolicy;
use crate::stats::{IntervalSnapshotter, StatsCollector};
use crate::task::Task;
use crate::transport::{HttpTransport, NetworkTransport};

/// Fluent construction of a [`Crawler`].
#[derive(Default)]
pub struct CrawlerBuilder {
    config: CrawlerConfig,
    registry: HandlerRegistry,
    seeds: Vec<Task>,
    generator: Option<TaskGenerator>,
    queue: Option<Box<dyn TaskQueue>>,
    transport: Option<Box<dyn NetworkTransport>>,
    cache: Option<Arc<dyn ResponseCache>>,
    proxies: Option<Box<dyn ProxySource>>,
    commands: Option<CommandChannel>,
    command_handlers: crate::crawler::core::CommandHandlerMap,
    deferred_errors: Vec<CrawlError>,
}

impl CrawlerBuilder {
    /// Creates a builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: CrawlerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the worker-slot budget (maximum concurrent requests).
    pub fn thread_number(mut self, thread_number: usize) -> Self {
        self.config.thread_number = thread_number;
        self
    }

    /// Sets the task try limit.
    pub fn task_try_limit(mut self, limit: u32) -> Self {
        self.config.task_try_limit = limit;
        self
    }

    /// Sets the network try limit.
    pub fn network_try_limit(mut self, limit: u32) -> Self {
        self.config.network_try_limit = limit;
        self
    }

    /// Sets how tasks without an explicit priority get one.
    pub fn priority_mode(mut self, mode: PriorityMode) -> Self {
        self.config.priority_mode = mode;
        self
    }

    /// Sets the periodic stats report cadence.
    pub fn stats_interval(mut self, interval: std::time::Duration) -> Self {
        self.config.stats_interval = interval;
        self
    }

    /// Sets the bounded idle sleep.
    pub fn idle_sleep(mut self, sleep: std::time::Duration) -> Self {
        self.config.idle_sleep = sleep;
        self
    }

    /// Sets the transport default per-request timeout.
    pub fn request_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Registers the task handler dispatched for tasks named `name`.
    pub fn handler(mut self, name: &str, handler: impl TaskHandler + 'static) -> Self {
        if let Err(e) = self.registry.register(name, Arc::new(handler)) {
            self.deferred_errors.push(e);
        }
        self
    }

    /// Registers an already-shared task handler.
    pub fn shared_handler(mut self, name: &str, handler: Arc<dyn TaskHandler>) -> Self {
        if let Err(e) = self.registry.register(name, handler) {
            self.deferred_errors.push(e);
        }
        self
    }

    /// Registers the data handler for records named `name`.
    pub fn data_handler(mut self, name: &str, handler: impl DataHandler + 'static) -> Self {
        if let Err(e) = self.registry.register_data(name, Arc::new(handler)) {
            self.deferred_errors.push(e);
        }
        self
    }

    /// Registers a fallback handler invokable as `name`.
    pub fn fallback_handler(mut self, name: &str, handler: impl FallbackHandler + 'static) -> Self {
        if let Err(e) = self.registry.register_fallback(name, Arc::new(handler)) {
            self.deferred_errors.push(e);
        }
        self
    }

    /// Adds a task enqueued when the run starts.
    pub fn seed(mut self, task: Task) -> Self {
        self.seeds.push(task);
        self
    }

    /// Adds several start tasks.
    pub fn seeds(mut self, tasks: impl IntoIterator<Item = Task>) -> Self {
        self.seeds.extend(tasks);
        self
    }

    /// Supplies the lazy task generator for this run.
    pub fn generator(mut self, source: impl Iterator<Item = Task> + Send + 'static) -> Self {
        self.generator = Some(TaskGenerator::new(source));
        self
    }

    /// Replaces the in-memory queue with another backend.
    pub fn queue(mut self, queue: impl TaskQueue + 'static) -> Self {
        self.queue = Some(Box::new(queue));
        self
    }

    /// Replaces the HTTP transport with another implementation.
    pub fn transport(mut self, transport: impl NetworkTransport + 'static) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    /// Attaches a response cache collaborator.
    pub fn cache(mut self, cache: impl ResponseCache + 'static) -> Self {
        self.cache = Some(Arc::new(cache));
        self
    }

    /// Attaches a proxy source for per-task rotation.
    pub fn proxy_source(mut self, proxies: impl ProxySource + 'static) -> Self {
        self.proxies = Some(Box::new(proxies));
        self
    }

    /// Attaches the out-of-band command channel.
    pub fn command_channel(mut self, channel: CommandChannel) -> Self {
        self.commands = Some(channel);
        self
    }

    /// Registers a user command handler dispatched by name.
    pub fn command_handler(
        mut self,
        name: &str,
        handler: impl FnMut(&Value) -> Value + Send + 'static,
    ) -> Self {
        self.command_handlers
            .insert(name.to_string(), Box::new(handler));
        self
    }

    /// Validates the wiring and builds the crawler.
    pub fn build(mut self) -> Result<Crawler, CrawlError> {
        if let Some(error) = self.deferred_errors.into_iter().next() {
            return Err(error);
        }
        if self.config.thread_number == 0 {
            return Err(CrawlError::Misuse(
                "thread_number must be greater than zero".into(),
            ));
        }
        if self.config.generator_queue_factor == 0 {
            return Err(CrawlError::Misuse(
                "generator_queue_factor must be greater than zero".into(),
            ));
        }

        for task in &self.seeds {
            if task.callback.is_none() && !self.registry.has(&task.name) {
                return Err(CrawlError::Misuse(format!(
                    "seed task {:?} has no registered handler",
                    task.name
                )));
            }
            if let Some(fallback) = &task.fallback_name {
                if self.registry.get_fallback(fallback).is_none() {
                    return Err(CrawlError::Misuse(format!(
                        "seed task {:?} names unregistered fallback {fallback:?}",
                        task.name
                    )));
                }
            }
        }

        let transport: Box<dyn NetworkTransport> = match self.transport.take() {
            Some(transport) => transport,
            None => Box::new(HttpTransport::new(
                self.config.thread_number,
                self.config.request_timeout,
            )?),
        };
        let queue = self
            .queue
            .take()
            .unwrap_or_else(|| Box::new(MemoryTaskQueue::new()));

        let retry_policy = RetryPolicy {
            task_try_limit: self.config.task_try_limit,
            network_try_limit: self.config.network_try_limit,
        };
        let snapshotter = IntervalSnapshotter::new(
            self.config.stats_interval,
            IntervalSnapshotter::DEFAULT_WATCHED
                .iter()
                .map(|key| key.to_string())
                .collect(),
        );

        Ok(Crawler {
            config: self.config,
            queue,
            transport,
            registry: self.registry,
            retry_policy,
            generator: self.generator,
            cache: self.cache,
            proxies: self.proxies,
            commands: self.commands,
            command_handlers: self.command_handlers,
            stats: Arc::new(StatsCollector::new()),
            snapshotter,
            stop_flag: Arc::new(AtomicBool::new(false)),
            phase: CrawlPhase::Starting,
            rng: SmallRng::from_entropy(),
            pending_results: VecDeque::new(),
            seeds: self.seeds,
        })
    }
}
