//! Lazy task generation with flow control.
//!
//! The generator wraps a caller-supplied iterator of tasks. It is pulled,
//! never pushed: the crawl loop asks for at most the queue's current
//! deficit below the watermark, so a generator that is much faster than the
//! network never inflates memory. Exhaustion is a `None` from the iterator
//! and permanently disables the generator for the run; it is not an error.

use tracing::debug;

use crate::task::Task;

/// Flow-controlled wrapper around a user task source.
pub struct TaskGenerator {
    source: Box<dyn Iterator<Item = Task> + Send>,
    enabled: bool,
    produced: u64,
}

impl TaskGenerator {
    /// Wraps `source` as the run's task generator.
    pub fn new(source: impl Iterator<Item = Task> + Send + 'static) -> Self {
        TaskGenerator {
            source: Box::new(source),
            enabled: true,
            produced: 0,
        }
    }

    /// Whether the generator may still produce tasks.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Total tasks produced so far.
    pub fn produced(&self) -> u64 {
        self.produced
    }

    /// Pulls up to `limit` tasks; disables itself once the source runs dry.
    pub fn pull(&mut self, limit: usize) -> Vec<Task> {
        if !self.enabled || limit == 0 {
            return Vec::new();
        }
        let mut batch = Vec::with_capacity(limit);
        while batch.len() < limit {
            match self.source.next() {
                Some(task) => batch.push(task),
                None => {
                    self.enabled = false;
                    debug!(produced = self.produced + batch.len() as u64, "task generator exhausted");
                    break;
                }
            }
        }
        self.produced += batch.len() as u64;
        batch
    }
}
