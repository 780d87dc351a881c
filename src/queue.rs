//! # Queue Module
//!
//! Implements the priority and delay aware task queue that feeds the crawl
//! loop.
//!
//! ## Overview
//!
//! The queue orders pending work by priority (numerically smallest first),
//! breaking ties by insertion order, and withholds delayed tasks until
//! their schedule time arrives. [`TaskQueue`] is the pluggable backend
//! trait; [`MemoryTaskQueue`] is the in-memory reference implementation.
//! On-disk or remote backends live behind the same trait and must provide
//! the same ordering plus atomic single-consumer `get`.
//!
//! ## Algorithm
//!
//! Two binary heaps: a ready heap keyed by `(priority, insertion sequence)`
//! and a delayed heap keyed by due instant. `get` first migrates every
//! delayed task whose time has arrived into the ready heap, then pops the
//! ready heap. Insert and extract are both O(log n).

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use tokio::time::Instant;

use crate::error::CrawlError;
use crate::task::Task;

/// Priority given to tasks that reach the queue without one assigned.
pub const FALLBACK_PRIORITY: i32 = 100;

/// Outcome of one [`TaskQueue::get`] call.
#[derive(Debug)]
pub enum QueuePoll {
    /// An eligible task, highest priority first.
    Ready(Task),
    /// The queue holds tasks, but every one of them is still delayed.
    PendingDelay,
    /// The queue holds nothing at all.
    Empty,
}

/// Pluggable queue backend contract.
///
/// Priority and schedule time travel on the task itself. `put` fails only
/// when the backend is unavailable; equal priorities are expected and never
/// collide.
pub trait TaskQueue: Send {
    /// Inserts a task.
    fn put(&mut self, task: Task) -> Result<(), CrawlError>;

    /// Removes and returns the next eligible task, if any.
    ///
    /// A single call hands any given task to exactly one caller.
    fn get(&mut self) -> Result<QueuePoll, CrawlError>;

    /// Count of tasks not yet dequeued, delayed ones included.
    fn size(&self) -> usize;

    /// Discards all pending tasks. Administrative resets and tests only.
    fn clear(&mut self);
}

struct ReadyEntry {
    priority: i32,
    seq: u64,
    task: Task,
}

impl PartialEq for ReadyEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for ReadyEntry {}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.priority, self.seq).cmp(&(other.priority, other.seq))
    }
}

struct DelayedEntry {
    due: Instant,
    seq: u64,
    task: Task,
}

impl PartialEq for DelayedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for DelayedEntry {}

impl PartialOrd for DelayedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.due, self.seq).cmp(&(other.due, other.seq))
    }
}

/// In-memory reference queue backend.
#[derive(Default)]
pub struct MemoryTaskQueue {
    ready: BinaryHeap<Reverse<ReadyEntry>>,
    delayed: BinaryHeap<Reverse<DelayedEntry>>,
    seq: u64,
}

impl MemoryTaskQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.seq;
        self.seq += 1;
        seq
    }

    fn migrate_due(&mut self, now: Instant) {
        while let Some(Reverse(entry)) = self.delayed.peek() {
            if entry.due > now {
                break;
            }
            let Reverse(entry) = self.delayed.pop().expect("peeked entry");
            let priority = entry.task.priority.unwrap_or(FALLBACK_PRIORITY);
            self.ready.push(Reverse(ReadyEntry {
                priority,
                seq: entry.seq,
                task: entry.task,
            }));
        }
    }
}

impl TaskQueue for MemoryTaskQueue {
    fn put(&mut self, task: Task) -> Result<(), CrawlError> {
        let seq = self.next_seq();
        match task.schedule_time {
            Some(due) if due > Instant::now() => {
                self.delayed.push(Reverse(DelayedEntry { due, seq, task }));
            }
            _ => {
                let priority = task.priority.unwrap_or(FALLBACK_PRIORITY);
                self.ready.push(Reverse(ReadyEntry {
                    priority,
                    seq,
                    task,
                }));
            }
        }
        Ok(())
    }

    fn get(&mut self) -> Result<QueuePoll, CrawlError> {
        self.migrate_due(Instant::now());
        if let Some(Reverse(entry)) = self.ready.pop() {
            return Ok(QueuePoll::Ready(entry.task));
        }
        if self.delayed.is_empty() {
            Ok(QueuePoll::Empty)
        } else {
            Ok(QueuePoll::PendingDelay)
        }
    }

    fn size(&self) -> usize {
        self.ready.len() + self.delayed.len()
    }

    fn clear(&mut self) {
        self.ready.clear();
        self.delayed.clear();
    }
}
