//! # Statistics Module
//!
//! Collects and stores metrics about the crawl run.
//!
//! ## Overview
//!
//! The [`StatsCollector`] tracks three kinds of data: monotonically
//! increasing named counters (`request`, `request-network`, `task-<name>`,
//! ...), named collections of recorded values (rejected URLs, fault
//! descriptions), and per-key interval timers. The crawl loop owns the
//! collector; it is internally synchronized so transport timing can be
//! folded in without ceremony.
//!
//! A [`StatsSnapshot`] captures consistent state for reporting and is what
//! the run entry point returns. [`IntervalSnapshotter`] computes deltas of
//! a fixed counter set at a configurable cadence and yields one record per
//! elapsed interval.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::error;

#[derive(Debug, Default)]
struct TimerSlot {
    total: Duration,
    started: Option<Instant>,
}

/// Collects counters, collections, and timers for one crawl run.
#[derive(Debug)]
pub struct StatsCollector {
    start_time: Instant,
    counters: DashMap<String, u64>,
    collections: Mutex<HashMap<String, Vec<Value>>>,
    timers: DashMap<String, TimerSlot>,
}

impl StatsCollector {
    /// Creates a collector with everything zeroed.
    pub fn new() -> Self {
        StatsCollector {
            start_time: Instant::now(),
            counters: DashMap::new(),
            collections: Mutex::new(HashMap::new()),
            timers: DashMap::new(),
        }
    }

    /// Increments `key` by one.
    pub fn inc(&self, key: &str) {
        self.inc_by(key, 1);
    }

    /// Increments `key` by `delta`.
    pub fn inc_by(&self, key: &str, delta: u64) {
        *self.counters.entry(key.to_string()).or_insert(0) += delta;
    }

    /// Current value of a counter; zero when never incremented.
    pub fn counter(&self, key: &str) -> u64 {
        self.counters.get(key).map(|v| *v).unwrap_or(0)
    }

    /// Appends `value` to the named collection.
    pub fn collect(&self, key: &str, value: impl Into<Value>) {
        self.collections
            .lock()
            .entry(key.to_string())
            .or_default()
            .push(value.into());
    }

    /// Number of values recorded under `key`.
    pub fn collection_len(&self, key: &str) -> usize {
        self.collections.lock().get(key).map(Vec::len).unwrap_or(0)
    }

    /// Starts (or restarts) the named timer.
    pub fn timer_start(&self, key: &str) {
        self.timers
            .entry(key.to_string())
            .or_default()
            .started = Some(Instant::now());
    }

    /// Stops the named timer, folding the elapsed span into its total.
    ///
    /// Stopping a timer that was never started is reported and returns
    /// zero; it does not abort anything.
    pub fn timer_stop(&self, key: &str) -> Duration {
        let mut slot = self.timers.entry(key.to_string()).or_default();
        match slot.started.take() {
            Some(started) => {
                let elapsed = started.elapsed();
                slot.total += elapsed;
                elapsed
            }
            None => {
                error!(timer = key, "stopping a timer that was not started");
                Duration::ZERO
            }
        }
    }

    /// Folds an externally measured duration into the named timer.
    pub fn timer_add(&self, key: &str, elapsed: Duration) {
        self.timers.entry(key.to_string()).or_default().total += elapsed;
    }

    /// Accumulated total of the named timer.
    pub fn timer_total(&self, key: &str) -> Duration {
        self.timers
            .get(key)
            .map(|slot| slot.total)
            .unwrap_or(Duration::ZERO)
    }

    /// Captures a consistent snapshot of everything recorded so far.
    pub fn snapshot(&self) -> StatsSnapshot {
        let counters = self
            .counters
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        let collections = self.collections.lock().clone();
        let timers = self
            .timers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().total))
            .collect();
        StatsSnapshot {
            elapsed: self.start_time.elapsed(),
            counters,
            collections,
            timers,
        }
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StatsCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot();

        writeln!(f, "\nCrawl Statistics")?;
        writeln!(f, "----------------")?;
        writeln!(f, "  duration : {:?}", snapshot.elapsed)?;

        let mut counters: Vec<_> = snapshot.counters.iter().collect();
        counters.sort();
        let counters = counters
            .iter()
            .map(|(key, value)| format!("{key}: {value}"))
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(
            f,
            "  counters : {}",
            if counters.is_empty() {
                "none"
            } else {
                counters.as_str()
            }
        )?;

        let mut timers: Vec<_> = snapshot.timers.into_iter().collect();
        timers.sort_by(|a, b| a.0.cmp(&b.0));
        for (key, total) in timers {
            writeln!(f, "  timer    : {key}: {total:?}")?;
        }

        for (key, values) in &snapshot.collections {
            writeln!(f, "  records  : {key}: {}", values.len())?;
        }
        Ok(())
    }
}

/// Point-in-time view of the collector, returned by the run entry point.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    /// Time since the collector was created.
    pub elapsed: Duration,
    /// Counter values by key.
    pub counters: HashMap<String, u64>,
    /// Recorded collections by key.
    pub collections: HashMap<String, Vec<Value>>,
    /// Accumulated timer totals by key.
    pub timers: HashMap<String, Duration>,
}

impl StatsSnapshot {
    /// Counter value; zero when the key was never incremented.
    pub fn counter(&self, key: &str) -> u64 {
        self.counters.get(key).copied().unwrap_or(0)
    }
}

/// Per-interval counter deltas.
#[derive(Debug, Clone, Serialize)]
pub struct IntervalReport {
    /// Counter increments since the previous report.
    pub deltas: HashMap<String, u64>,
}

/// Emits one [`IntervalReport`] per elapsed stats interval.
pub struct IntervalSnapshotter {
    interval: Duration,
    last_tick: Instant,
    watched: Vec<String>,
    last_values: HashMap<String, u64>,
}

impl IntervalSnapshotter {
    /// Counters reported by default.
    pub const DEFAULT_WATCHED: &'static [&'static str] =
        &["request", "request-network", "request-cache", "task-rejected"];

    /// Creates a snapshotter for the given cadence and counter set.
    pub fn new(interval: Duration, watched: Vec<String>) -> Self {
        IntervalSnapshotter {
            interval,
            last_tick: Instant::now(),
            watched,
            last_values: HashMap::new(),
        }
    }

    /// Returns the deltas of the watched counters when the interval has
    /// elapsed, `None` otherwise.
    pub fn maybe_tick(&mut self, stats: &StatsCollector) -> Option<IntervalReport> {
        if self.last_tick.elapsed() < self.interval {
            return None;
        }
        self.last_tick = Instant::now();

        let mut deltas = HashMap::with_capacity(self.watched.len());
        for key in &self.watched {
            let current = stats.counter(key);
            let previous = self.last_values.insert(key.clone(), current).unwrap_or(0);
            deltas.insert(key.clone(), current - previous);
        }
        Some(IntervalReport { deltas })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = StatsCollector::new();
        stats.inc("request");
        stats.inc("request");
        stats.inc_by("traffic-bytes", 1024);
        assert_eq!(stats.counter("request"), 2);
        assert_eq!(stats.counter("traffic-bytes"), 1024);
        assert_eq!(stats.counter("missing"), 0);
    }

    #[test]
    fn collections_record_in_order() {
        let stats = StatsCollector::new();
        stats.collect("reject-url", "http://example.com/a");
        stats.collect("reject-url", "http://example.com/b");
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.collections["reject-url"].len(), 2);
        assert_eq!(
            snapshot.collections["reject-url"][0],
            Value::from("http://example.com/a")
        );
    }

    #[test]
    fn stopping_an_unstarted_timer_returns_zero() {
        let stats = StatsCollector::new();
        assert_eq!(stats.timer_stop("network"), Duration::ZERO);
        assert_eq!(stats.timer_total("network"), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn timers_accumulate_elapsed_spans() {
        let stats = StatsCollector::new();
        stats.timer_start("network");
        tokio::time::advance(Duration::from_secs(2)).await;
        stats.timer_stop("network");
        stats.timer_add("network", Duration::from_secs(1));
        assert_eq!(stats.timer_total("network"), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn interval_snapshotter_reports_deltas() {
        let stats = StatsCollector::new();
        let mut snapshotter =
            IntervalSnapshotter::new(Duration::from_secs(10), vec!["request".to_string()]);

        stats.inc("request");
        assert!(snapshotter.maybe_tick(&stats).is_none());

        tokio::time::advance(Duration::from_secs(11)).await;
        stats.inc("request");
        let report = snapshotter.maybe_tick(&stats).unwrap();
        assert_eq!(report.deltas["request"], 2);

        tokio::time::advance(Duration::from_secs(11)).await;
        stats.inc("request");
        let report = snapshotter.maybe_tick(&stats).unwrap();
        assert_eq!(report.deltas["request"], 1);
    }
}
