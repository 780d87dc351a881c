//! The crawl loop itself.
//!
//! A single-threaded cooperative loop owns all scheduling decisions; the
//! transport is the only component with true parallelism. The loop never
//! blocks except for a bounded idle sleep when an iteration had nothing to
//! do. A run ends when the queue is empty, the transport idle, and the
//! generator exhausted, or earlier on a fatal error or an explicit stop.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::rngs::SmallRng;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::ResponseCache;
use crate::command::{CommandChannel, COMMAND_STATS, COMMAND_STOP};
use crate::config::CrawlerConfig;
use crate::error::CrawlError;
use crate::generator::TaskGenerator;
use crate::handler::HandlerRegistry;
use crate::http::FetchResult;
use crate::proxy::ProxySource;
use crate::queue::TaskQueue;
use crate::retry::RetryPolicy;
use crate::stats::{IntervalSnapshotter, StatsCollector, StatsSnapshot};
use crate::task::Task;
use crate::transport::NetworkTransport;

/// Lifecycle of one crawl run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlPhase {
    /// Seeding the queue, nothing dispatched yet.
    Starting,
    /// The main loop is iterating.
    Running,
    /// Flushing in-flight results before stopping.
    Draining,
    /// Terminal state.
    Stopped,
}

/// Cooperative cancellation token for a running crawl.
///
/// Cloneable and shareable with operator threads; the loop observes the
/// flag at the top of each iteration and drains instead of aborting
/// in-flight requests.
#[derive(Clone)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    /// Requests a graceful shutdown.
    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether a shutdown was requested.
    pub fn is_stop_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// User command handlers registered at build time.
pub(crate) type CommandHandlerMap = HashMap<String, Box<dyn FnMut(&Value) -> Value + Send>>;

pub(crate) struct DispatchCycle {
    pub(crate) activity: usize,
    pub(crate) queue_empty: bool,
}

/// The central orchestrator of a crawl run.
pub struct Crawler {
    pub(crate) config: CrawlerConfig,
    pub(crate) queue: Box<dyn TaskQueue>,
    pub(crate) transport: Box<dyn NetworkTransport>,
    pub(crate) registry: HandlerRegistry,
    pub(crate) retry_policy: RetryPolicy,
    pub(crate) generator: Option<TaskGenerator>,
    pub(crate) cache: Option<Arc<dyn ResponseCache>>,
    pub(crate) proxies: Option<Box<dyn ProxySource>>,
    pub(crate) commands: Option<CommandChannel>,
    pub(crate) command_handlers: CommandHandlerMap,
    pub(crate) stats: Arc<StatsCollector>,
    pub(crate) snapshotter: IntervalSnapshotter,
    pub(crate) stop_flag: Arc<AtomicBool>,
    pub(crate) phase: CrawlPhase,
    pub(crate) rng: SmallRng,
    /// Results synthesized without the transport (cache hits).
    pub(crate) pending_results: VecDeque<FetchResult>,
    pub(crate) seeds: Vec<Task>,
}

impl Crawler {
    /// Current lifecycle phase.
    pub fn phase(&self) -> CrawlPhase {
        self.phase
    }

    /// Shared view of the run's statistics.
    pub fn stats(&self) -> Arc<StatsCollector> {
        Arc::clone(&self.stats)
    }

    /// Cancellation token observed once per loop iteration.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            flag: Arc::clone(&self.stop_flag),
        }
    }

    /// Tasks not yet dequeued, delayed ones included.
    pub fn queue_size(&self) -> usize {
        self.queue.size()
    }

    /// Requests currently in flight inside the transport.
    pub fn active_task_number(&self) -> usize {
        self.transport.active_task_number()
    }

    /// Runs the crawl to completion and returns the final statistics.
    ///
    /// Blocks (asynchronously) until the terminal state is reached. Fatal
    /// handler errors and misuse errors surface as `Err`; everything
    /// transient is retried or rejected with bookkeeping and never escapes
    /// the loop.
    pub async fn run(&mut self) -> Result<StatsSnapshot, CrawlError> {
        self.phase = CrawlPhase::Starting;
        info!(
            thread_number = self.config.thread_number,
            seeds = self.seeds.len(),
            "crawl starting"
        );
        self.stats.timer_start("total");

        let outcome = self.run_to_completion().await;

        self.phase = CrawlPhase::Stopped;
        self.stats.timer_stop("total");
        match outcome {
            Ok(()) => {
                info!("crawl finished{}", self.stats);
                Ok(self.stats.snapshot())
            }
            Err(e) => {
                warn!(error = %e, "crawl aborted");
                Err(e)
            }
        }
    }

    async fn run_to_completion(&mut self) -> Result<(), CrawlError> {
        let seeds = std::mem::take(&mut self.seeds);
        for task in seeds {
            self.enqueue_task(task)?;
        }
        self.phase = CrawlPhase::Running;

        loop {
            if self.stop_flag.load(Ordering::SeqCst) {
                debug!("stop requested");
                self.phase = CrawlPhase::Draining;
                return self.drain().await;
            }

            self.emit_interval_report();
            self.process_commands();
            self.refill_from_generator()?;

            let cycle = self.pump_queue().await?;

            // Observing the transport idle *before* draining its results
            // guarantees every result is already visible below.
            let was_idle = self.transport.active_task_number() == 0;
            self.transport.process_handlers().await;

            let mut results: Vec<FetchResult> = self.pending_results.drain(..).collect();
            results.extend(self.transport.iterate_results());
            let delivered = results.len();
            for result in results {
                self.process_result(result).await?;
            }

            let generator_done = self.generator.as_ref().map_or(true, |g| !g.is_enabled());
            if delivered == 0
                && cycle.activity == 0
                && cycle.queue_empty
                && was_idle
                && generator_done
                && self.pending_results.is_empty()
                && self.transport.active_task_number() == 0
            {
                self.phase = CrawlPhase::Draining;
                return self.drain().await;
            }

            if delivered == 0 && cycle.activity == 0 {
                tokio::time::sleep(self.config.idle_sleep).await;
            }
        }
    }

    /// Flushes in-flight results, then stops.
    ///
    /// In-flight requests finish or time out naturally; nothing new is
    /// dispatched. Tasks yielded by handlers during the flush stay queued.
    async fn drain(&mut self) -> Result<(), CrawlError> {
        debug!(
            active = self.transport.active_task_number(),
            "draining in-flight requests"
        );
        loop {
            self.transport.process_handlers().await;

            let mut results: Vec<FetchResult> = self.pending_results.drain(..).collect();
            results.extend(self.transport.iterate_results());
            let delivered = !results.is_empty();
            for result in results {
                self.process_result(result).await?;
            }

            if self.transport.active_task_number() == 0 {
                for result in self.transport.iterate_results() {
                    self.process_result(result).await?;
                }
                return Ok(());
            }
            if !delivered {
                tokio::time::sleep(self.config.idle_sleep).await;
            }
        }
    }

    fn emit_interval_report(&mut self) {
        if let Some(report) = self.snapshotter.maybe_tick(&self.stats) {
            info!(deltas = ?report.deltas, "crawl progress");
            if let Ok(value) = serde_json::to_value(&report) {
                self.stats.collect("snapshots", value);
            }
        }
    }

    /// Drains pending remote commands, synchronously, once per iteration.
    fn process_commands(&mut self) {
        let Some(channel) = self.commands.clone() else {
            return;
        };
        while let Some(command) = channel.pop_command() {
            debug!(command = %command.name, id = command.id, "processing command");
            let result = match command.name.as_str() {
                COMMAND_STATS => {
                    serde_json::to_value(self.stats.snapshot()).unwrap_or(Value::Null)
                }
                COMMAND_STOP => {
                    self.stop_flag.store(true, Ordering::SeqCst);
                    Value::Bool(true)
                }
                name => match self.command_handlers.get_mut(name) {
                    Some(handler) => handler(&command.payload),
                    None => {
                        warn!(command = name, "unknown command");
                        Value::Null
                    }
                },
            };
            channel.put_result(command.id, result);
        }
    }
}
