//! # Crawler Module
//!
//! Implements the crawl loop that orchestrates the engine.
//!
//! ## Overview
//!
//! The crawler owns every scheduling decision: it pulls ready tasks from
//! the queue, validates try counters, consults the cache, submits work to
//! the transport under the worker-slot budget, and routes completed
//! results to user handlers. Handlers yield new tasks and data records;
//! tasks re-enter the queue and the loop continues until the queue is
//! empty, the transport idle, and the generator exhausted.
//!
//! ## Key Components
//!
//! - **Crawler**: the run-to-completion state machine
//!   (`Starting → Running → Draining → Stopped`)
//! - **Dispatch path**: try-count accounting, limit checks, cache
//!   consultation, proxy rotation, transport submission
//! - **Result path**: stats accounting, cache writes, handler invocation,
//!   retry and rejection bookkeeping
//!
//! All state is instance-scoped; the only shared pieces are the stats
//! collector and the stop flag, both behind `Arc`.

pub(crate) mod core;
mod dispatch;
mod results;

pub use self::core::{CrawlPhase, Crawler, StopHandle};
