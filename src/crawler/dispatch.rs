//! The dispatch path: from a queued task to a transport submission.
//!
//! Accepting a task consumes one task try, runs the limit check, consults
//! the cache, rotates the proxy, and only then spends a network try on the
//! transport. Cache hits synthesize a result directly and never touch the
//! network.

use rand::Rng;
use serde_json::json;
use tracing::{error, trace, warn};

use crate::config::PriorityMode;
use crate::crawler::core::{Crawler, DispatchCycle};
use crate::error::CrawlError;
use crate::http::{FetchOutcome, FetchResult};
use crate::queue::QueuePoll;
use crate::retry::{LimitVerdict, RejectReason};
use crate::task::{Task, META_DISABLE_CACHE, META_REFRESH_CACHE};

/// Queue polls per iteration while hunting for a dispatchable task.
const GET_TASK_ATTEMPTS: usize = 5;

impl Crawler {
    /// Pulls from the generator while the queue sits below the watermark.
    pub(crate) fn refill_from_generator(&mut self) -> Result<(), CrawlError> {
        let Some(generator) = self.generator.as_mut() else {
            return Ok(());
        };
        if !generator.is_enabled() {
            return Ok(());
        }
        let watermark = self.config.watermark();
        let queued = self.queue.size();
        if queued >= watermark {
            return Ok(());
        }

        let batch = generator.pull(watermark - queued);
        if !batch.is_empty() {
            trace!(count = batch.len(), "generator refill");
        }
        for task in batch {
            self.stats.inc("task-generator");
            self.enqueue_task(task)?;
        }
        Ok(())
    }

    /// Hunts for dispatchable tasks while the transport has free slots.
    pub(crate) async fn pump_queue(&mut self) -> Result<DispatchCycle, CrawlError> {
        let mut cycle = DispatchCycle {
            activity: 0,
            queue_empty: false,
        };
        if !self.transport.ready_for_task() {
            return Ok(cycle);
        }

        for _ in 0..GET_TASK_ATTEMPTS {
            match self.queue.get()? {
                QueuePoll::Ready(task) => {
                    self.accept_task(task).await?;
                    cycle.activity += 1;
                    if !self.transport.ready_for_task() {
                        break;
                    }
                }
                // Only delayed tasks remain; a later poll may see one come
                // due, and the idle sleep bounds the spin either way.
                QueuePoll::PendingDelay => continue,
                QueuePoll::Empty => {
                    cycle.queue_empty = true;
                    break;
                }
            }
        }
        Ok(cycle)
    }

    /// Validates priority, handler, and fallback wiring, then inserts.
    ///
    /// The automatic priority never overwrites an explicit one.
    pub(crate) fn enqueue_task(&mut self, mut task: Task) -> Result<(), CrawlError> {
        if task.callback.is_none() && !self.registry.has(&task.name) {
            return Err(CrawlError::Misuse(format!(
                "no handler registered for task {:?}",
                task.name
            )));
        }
        if let Some(fallback) = &task.fallback_name {
            if self.registry.get_fallback(fallback).is_none() {
                return Err(CrawlError::Misuse(format!(
                    "no fallback handler registered as {fallback:?}"
                )));
            }
        }
        if task.priority.is_none() {
            task.priority = Some(match self.config.priority_mode {
                PriorityMode::Fixed(value) => value,
                PriorityMode::Random { min, max } => self.rng.gen_range(min..=max),
            });
        }
        self.queue.put(task)
    }

    /// Processes one dequeued task: limit check, cache, then transport.
    async fn accept_task(&mut self, mut task: Task) -> Result<(), CrawlError> {
        task.task_try_count += 1;
        trace!(
            task = %task.name,
            url = %task.url(),
            task_try = task.task_try_count,
            "task accepted"
        );

        if let LimitVerdict::Reject(reason) = self.retry_policy.check_limits(&task) {
            self.reject_task(task, reason).await;
            return Ok(());
        }

        if self.cache_allowed(&task) {
            let cache = self.cache.clone().expect("cache presence checked");
            if let Some(mut response) = cache
                .get(task.url(), Some(self.config.request_timeout))
                .await
            {
                trace!(url = %task.url(), "cache hit");
                response.from_cache = true;
                let request_backup = task.request.clone();
                self.pending_results.push_back(FetchResult {
                    task,
                    request_backup,
                    outcome: FetchOutcome::Success(response),
                });
                return Ok(());
            }
        }

        if task.request.proxy.is_none() {
            if let Some(proxies) = self.proxies.as_mut() {
                task.request.proxy = proxies.next_proxy();
            }
        }

        task.network_try_count += 1;
        let request_backup = task.request.clone();
        self.stats.inc("request-network");
        if let Err(e) = self.transport.process_task(task, request_backup) {
            // The slot was checked before the queue poll; losing it here
            // means the transport contract is broken.
            error!(error = %e, "transport refused a task after reporting ready");
            return Err(e);
        }
        Ok(())
    }

    fn cache_allowed(&self, task: &Task) -> bool {
        self.cache.is_some()
            && task.request.is_idempotent()
            && !task.meta_flag(META_DISABLE_CACHE)
            && !task.meta_flag(META_REFRESH_CACHE)
    }

    /// Records a rejection and runs the fallback handler if one is wired.
    pub(crate) async fn reject_task(&mut self, task: Task, reason: RejectReason) {
        warn!(
            task = %task.name,
            url = %task.url(),
            reason = reason.as_str(),
            "task rejected"
        );
        self.stats.inc("task-rejected");
        self.stats.collect(
            "reject-url",
            json!({ "url": task.url().as_str(), "reason": reason.as_str() }),
        );

        if let Some(name) = task.fallback_name.clone() {
            match self.registry.get_fallback(&name) {
                Some(fallback) => {
                    self.stats.inc(&format!("fallback-{name}"));
                    fallback.handle(&task).await;
                }
                // Wiring is validated on enqueue; an unregistered name here
                // means the registry changed underneath us.
                None => error!(fallback = %name, "fallback handler disappeared"),
            }
        }
    }
}
