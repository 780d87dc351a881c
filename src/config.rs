//! Crawl configuration.

use std::time::Duration;

/// How tasks without an explicit priority get one.
///
/// An explicitly assigned priority always wins over either mode.
#[derive(Debug, Clone, Copy)]
pub enum PriorityMode {
    /// Every automatic priority is this value.
    Fixed(i32),
    /// Automatic priorities are drawn uniformly from `min..=max`.
    Random {
        /// Inclusive lower bound.
        min: i32,
        /// Inclusive upper bound.
        max: i32,
    },
}

impl Default for PriorityMode {
    fn default() -> Self {
        PriorityMode::Random { min: 50, max: 100 }
    }
}

/// Tunable knobs of the crawl loop and its transport.
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Maximum concurrent in-flight requests (worker slots).
    pub thread_number: usize,
    /// Maximum times a task may be accepted for processing.
    pub task_try_limit: u32,
    /// Maximum times a task may be dispatched to the transport.
    pub network_try_limit: u32,
    /// Automatic priority assignment for tasks without one.
    pub priority_mode: PriorityMode,
    /// Watermark multiplier: the generator refills the queue while its size
    /// is below `thread_number * generator_queue_factor`.
    pub generator_queue_factor: usize,
    /// Hard cap on the watermark and thus on any single refill batch.
    pub max_generator_chunk: usize,
    /// Bounded sleep when an iteration had nothing to do.
    pub idle_sleep: Duration,
    /// Cadence of periodic stats delta reports.
    pub stats_interval: Duration,
    /// Transport default per-request timeout.
    pub request_timeout: Duration,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        CrawlerConfig {
            thread_number: num_cpus::get().clamp(2, 16),
            task_try_limit: 10,
            network_try_limit: 10,
            priority_mode: PriorityMode::default(),
            generator_queue_factor: 10,
            max_generator_chunk: 1000,
            idle_sleep: Duration::from_millis(100),
            stats_interval: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl CrawlerConfig {
    /// Queue-size threshold below which the generator is asked for more
    /// tasks.
    pub fn watermark(&self) -> usize {
        (self.thread_number * self.generator_queue_factor).min(self.max_generator_chunk)
    }
}
