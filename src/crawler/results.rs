//! The result path: from a completed fetch to handler bookkeeping.
//!
//! Results arrive in completion order, which is independent of dispatch
//! priority. Successful responses go to their handler (per-task callback
//! first, registry second); transient network failures go back through the
//! retry machinery; invalid requests are recorded and never retried.
//! Handler faults are recorded and survive the loop unless fatal.

use serde_json::json;
use tracing::{debug, error, trace, warn};

use crate::crawler::core::Crawler;
use crate::error::CrawlError;
use crate::handler::HandlerOutput;
use crate::http::{FetchOutcome, FetchRequest, FetchResponse, FetchResult};
use crate::retry::RejectReason;
use crate::task::{Task, META_DISABLE_CACHE, META_REFRESH_CACHE};

impl Crawler {
    /// Routes one completed result.
    pub(crate) async fn process_result(&mut self, result: FetchResult) -> Result<(), CrawlError> {
        let FetchResult {
            task,
            request_backup,
            outcome,
        } = result;

        match outcome {
            FetchOutcome::Success(response) => self.process_response(task, response).await,
            FetchOutcome::NetworkError { reason } => {
                self.process_network_error(task, request_backup, reason).await
            }
            FetchOutcome::InvalidRequest { reason } => {
                warn!(url = %task.url(), reason = %reason, "invalid request");
                self.stats.inc("invalid-request");
                self.stats.collect(
                    "reject-url",
                    json!({
                        "url": task.url().as_str(),
                        "reason": reason,
                        "kind": "invalid-request",
                    }),
                );
                Ok(())
            }
        }
    }

    async fn process_response(
        &mut self,
        task: Task,
        response: FetchResponse,
    ) -> Result<(), CrawlError> {
        self.stats.inc("request");
        self.stats.inc(&format!("http-{}", response.status));
        if response.from_cache {
            self.stats.inc("request-cache");
        } else {
            self.stats.inc_by("traffic-bytes", response.body.len() as u64);
            self.stats.timer_add("network", response.elapsed);
        }

        if self.should_store(&task, &response) {
            let cache = self.cache.clone().expect("cache presence checked");
            cache.save(task.url(), &response).await;
        }

        let handler = match task.callback.clone().or_else(|| self.registry.get(&task.name)) {
            Some(handler) => handler,
            // Wiring is validated on enqueue; missing here means the
            // registry changed underneath us.
            None => {
                return Err(CrawlError::Misuse(format!(
                    "no handler registered for task {:?}",
                    task.name
                )))
            }
        };

        self.stats.inc(&format!("task-{}", task.name));
        trace!(task = %task.name, url = %task.url(), status = response.status, "handler invoked");

        match handler.handle(&response, &task).await {
            Ok(output) => self.process_handler_output(output).await,
            Err(CrawlError::ResponseNotValid(why)) => {
                debug!(task = %task.name, url = %task.url(), why = %why, "response not valid, retrying");
                self.stats.inc("task-retry");
                let mut retry = task.clone();
                retry.set_meta_flag(META_REFRESH_CACHE, true);
                self.enqueue_task(retry)
            }
            Err(e) => self.record_handler_fault(&task.name, task.url().as_str(), e),
        }
    }

    /// Transient transport failure: another attempt while the budget
    /// lasts, a rejection afterwards.
    async fn process_network_error(
        &mut self,
        task: Task,
        request_backup: FetchRequest,
        reason: String,
    ) -> Result<(), CrawlError> {
        warn!(
            url = %task.url(),
            reason = %reason,
            network_try = task.network_try_count,
            "network error"
        );
        self.stats.inc("network-error");

        if self.retry_policy.wants_network_retry(&task) {
            let mut retry = task;
            // Restore the pre-dispatch request and give back the task try:
            // a network retry consumes network budget only.
            retry.request = request_backup;
            retry.task_try_count = retry.task_try_count.saturating_sub(1);
            retry.set_meta_flag(META_REFRESH_CACHE, true);
            self.stats.inc("network-retry");
            self.enqueue_task(retry)
        } else {
            self.reject_task(task, RejectReason::NetworkTryCount).await;
            Ok(())
        }
    }

    /// Re-enqueues yielded tasks and routes yielded data records.
    async fn process_handler_output(&mut self, output: HandlerOutput) -> Result<(), CrawlError> {
        let (tasks, data) = output.into_parts();
        for task in tasks {
            self.enqueue_task(task)?;
        }
        for record in data {
            let Some(handler) = self.registry.get_data(&record.name) else {
                return Err(CrawlError::Misuse(format!(
                    "no data handler registered for {:?}",
                    record.name
                )));
            };
            self.stats.inc(&format!("data-{}", record.name));
            if let Err(e) = handler.handle(&record).await {
                self.record_handler_fault(&record.name, "", e)?;
            }
        }
        Ok(())
    }

    /// Records a handler fault; only the fatal category escapes the loop.
    fn record_handler_fault(
        &mut self,
        handler: &str,
        url: &str,
        error: CrawlError,
    ) -> Result<(), CrawlError> {
        self.stats.collect(
            "fatal",
            json!({
                "handler": handler,
                "error": error.to_string(),
                "kind": error.label(),
                "url": url,
            }),
        );
        if error.is_fatal() {
            self.stats.inc("fatal");
            error!(handler = handler, error = %error, "fatal handler error");
            Err(error)
        } else {
            self.stats.inc("handler-error");
            error!(handler = handler, error = %error, "handler error");
            Ok(())
        }
    }

    fn should_store(&self, task: &Task, response: &FetchResponse) -> bool {
        self.cache.is_some()
            && !response.from_cache
            && response.is_success()
            && task.request.is_idempotent()
            && !task.meta_flag(META_DISABLE_CACHE)
    }
}
