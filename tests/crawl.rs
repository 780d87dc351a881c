//! Loop-level behavior of the crawl engine, driven through a scripted
//! transport so no test touches the network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fetchflow::prelude::*;
use fetchflow::{
    CommandChannel, FetchOutcome, FetchRequest, FetchResult, MemoryCache, NetworkTransport,
    PriorityMode, COMMAND_STATS, COMMAND_STOP,
};
use parking_lot::Mutex;
use serde_json::Value;

type Script = Arc<dyn Fn(&Task) -> FetchOutcome + Send + Sync>;

/// Transport double: completes every in-flight task on the next
/// `process_handlers` call according to a per-task script.
struct ScriptedTransport {
    thread_number: usize,
    script: Script,
    in_flight: Vec<(Task, FetchRequest)>,
    results: VecDeque<FetchResult>,
    active: usize,
    max_active_seen: Arc<AtomicUsize>,
    dispatch_log: Arc<Mutex<Vec<String>>>,
}

impl ScriptedTransport {
    fn new(thread_number: usize, script: Script) -> Self {
        ScriptedTransport {
            thread_number,
            script,
            in_flight: Vec::new(),
            results: VecDeque::new(),
            active: 0,
            max_active_seen: Arc::new(AtomicUsize::new(0)),
            dispatch_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn always_ok(thread_number: usize) -> Self {
        Self::new(thread_number, Arc::new(|task: &Task| ok_outcome(task)))
    }
}

#[async_trait]
impl NetworkTransport for ScriptedTransport {
    fn ready_for_task(&self) -> bool {
        self.active < self.thread_number
    }

    fn active_task_number(&self) -> usize {
        self.active
    }

    fn process_task(
        &mut self,
        task: Task,
        request_backup: FetchRequest,
    ) -> Result<(), CrawlError> {
        if !self.ready_for_task() {
            return Err(CrawlError::TransportAtCapacity);
        }
        self.active += 1;
        self.max_active_seen
            .fetch_max(self.active, Ordering::SeqCst);
        self.dispatch_log.lock().push(task.name.clone());
        self.in_flight.push((task, request_backup));
        Ok(())
    }

    async fn process_handlers(&mut self) {
        for (task, request_backup) in self.in_flight.drain(..) {
            let outcome = (self.script)(&task);
            self.results.push_back(FetchResult {
                task,
                request_backup,
                outcome,
            });
            self.active -= 1;
        }
    }

    fn iterate_results(&mut self) -> Vec<FetchResult> {
        self.results.drain(..).collect()
    }
}

fn ok_outcome(task: &Task) -> FetchOutcome {
    FetchOutcome::Success(FetchResponse {
        url: task.url().clone(),
        status: 200,
        headers: Vec::new(),
        body: b"ok".to_vec(),
        elapsed: Duration::from_millis(1),
        from_cache: false,
    })
}

/// Handler double recording every invocation.
#[derive(Default)]
struct RecordingHandler {
    invocations: Mutex<Vec<(String, u32)>>,
}

impl RecordingHandler {
    fn names(&self) -> Vec<String> {
        self.invocations
            .lock()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn network_tries(&self) -> Vec<u32> {
        self.invocations
            .lock()
            .iter()
            .map(|(_, tries)| *tries)
            .collect()
    }
}

#[async_trait]
impl TaskHandler for RecordingHandler {
    async fn handle(
        &self,
        _response: &FetchResponse,
        task: &Task,
    ) -> Result<HandlerOutput, CrawlError> {
        self.invocations
            .lock()
            .push((task.name.clone(), task.network_try_count));
        Ok(HandlerOutput::new())
    }
}

/// Handler double that rejects every response as not valid.
struct NeverValidHandler;

#[async_trait]
impl TaskHandler for NeverValidHandler {
    async fn handle(
        &self,
        _response: &FetchResponse,
        _task: &Task,
    ) -> Result<HandlerOutput, CrawlError> {
        Err(CrawlError::ResponseNotValid("unexpected payload".into()))
    }
}

#[derive(Default)]
struct RecordingFallback {
    rejected: Mutex<Vec<String>>,
}

#[async_trait]
impl FallbackHandler for RecordingFallback {
    async fn handle(&self, task: &Task) {
        self.rejected.lock().push(task.url().to_string());
    }
}

#[tokio::test(start_paused = true)]
async fn tasks_dispatch_in_priority_order() {
    let transport = ScriptedTransport::always_ok(1);
    let dispatch_log = Arc::clone(&transport.dispatch_log);

    let mut crawler = CrawlerBuilder::new()
        .thread_number(1)
        .transport(transport)
        .shared_handler("p1", Arc::new(RecordingHandler::default()))
        .shared_handler("p2", Arc::new(RecordingHandler::default()))
        .shared_handler("p4", Arc::new(RecordingHandler::default()))
        .shared_handler("p5", Arc::new(RecordingHandler::default()))
        .seeds([
            Task::new("p4", "http://example.com/4").unwrap().with_priority(4),
            Task::new("p2", "http://example.com/2").unwrap().with_priority(2),
            Task::new("p1", "http://example.com/1").unwrap().with_priority(1),
            Task::new("p5", "http://example.com/5").unwrap().with_priority(5),
        ])
        .build()
        .unwrap();

    crawler.run().await.unwrap();
    assert_eq!(*dispatch_log.lock(), ["p1", "p2", "p4", "p5"]);
}

#[tokio::test(start_paused = true)]
async fn task_try_limit_rejects_after_exact_attempts() {
    let transport = ScriptedTransport::always_ok(1);
    let dispatch_log = Arc::clone(&transport.dispatch_log);
    let fallback = Arc::new(RecordingFallback::default());

    let mut crawler = CrawlerBuilder::new()
        .thread_number(1)
        .task_try_limit(2)
        .transport(transport)
        .handler("page", NeverValidHandler)
        .fallback_handler("salvage", SharedFallback(Arc::clone(&fallback)))
        .seed(
            Task::new("page", "http://example.com/flaky")
                .unwrap()
                .with_fallback("salvage"),
        )
        .build()
        .unwrap();

    let report = crawler.run().await.unwrap();

    assert_eq!(dispatch_log.lock().len(), 2);
    assert_eq!(report.counter("task-rejected"), 1);
    let rejections = &report.collections["reject-url"];
    assert_eq!(rejections.len(), 1);
    assert_eq!(rejections[0]["reason"], "task-try-count");
    assert_eq!(
        *fallback.rejected.lock(),
        ["http://example.com/flaky"]
    );
}

struct SharedFallback(Arc<RecordingFallback>);

#[async_trait]
impl FallbackHandler for SharedFallback {
    async fn handle(&self, task: &Task) {
        self.0.handle(task).await;
    }
}

#[tokio::test(start_paused = true)]
async fn network_retries_then_succeeds_once() {
    let transport = ScriptedTransport::new(
        1,
        Arc::new(|task: &Task| {
            if task.network_try_count < 3 {
                FetchOutcome::NetworkError {
                    reason: "connect: refused".into(),
                }
            } else {
                ok_outcome(task)
            }
        }),
    );
    let handler = Arc::new(RecordingHandler::default());

    let mut crawler = CrawlerBuilder::new()
        .thread_number(1)
        .network_try_limit(5)
        .transport(transport)
        .shared_handler("page", Arc::clone(&handler) as Arc<dyn TaskHandler>)
        .seed(Task::new("page", "http://example.com/").unwrap())
        .build()
        .unwrap();

    let report = crawler.run().await.unwrap();

    assert_eq!(handler.names().len(), 1);
    assert_eq!(handler.network_tries(), [3]);
    assert_eq!(report.counter("request-network"), 3);
    assert_eq!(report.counter("network-retry"), 2);
    assert_eq!(report.counter("task-rejected"), 0);
}

#[tokio::test(start_paused = true)]
async fn in_flight_requests_never_exceed_the_budget() {
    let transport = ScriptedTransport::always_ok(3);
    let max_active_seen = Arc::clone(&transport.max_active_seen);

    let mut crawler = CrawlerBuilder::new()
        .thread_number(3)
        .transport(transport)
        .shared_handler("page", Arc::new(RecordingHandler::default()))
        .seeds((0..20).map(|i| {
            Task::new("page", &format!("http://example.com/{i}")).unwrap()
        }))
        .build()
        .unwrap();

    let report = crawler.run().await.unwrap();

    assert!(max_active_seen.load(Ordering::SeqCst) <= 3);
    assert_eq!(report.counter("request"), 20);
}

#[tokio::test(start_paused = true)]
async fn generator_run_drains_queue_and_transport() {
    let transport = ScriptedTransport::always_ok(2);

    let mut crawler = CrawlerBuilder::new()
        .thread_number(2)
        .transport(transport)
        .shared_handler("page", Arc::new(RecordingHandler::default()))
        .generator(
            (0..25).map(|i| Task::new("page", &format!("http://example.com/g/{i}")).unwrap()),
        )
        .build()
        .unwrap();

    let report = crawler.run().await.unwrap();

    assert_eq!(report.counter("request"), 25);
    assert_eq!(report.counter("task-generator"), 25);
    assert_eq!(crawler.queue_size(), 0);
    assert_eq!(crawler.active_task_number(), 0);
}

#[tokio::test(start_paused = true)]
async fn delayed_tasks_execute_in_ascending_delay_order() {
    let transport = ScriptedTransport::always_ok(1);
    let handler = Arc::new(RecordingHandler::default());

    let shared: Arc<dyn TaskHandler> = handler.clone();
    let mut crawler = CrawlerBuilder::new()
        .thread_number(1)
        .priority_mode(PriorityMode::Fixed(10))
        .transport(transport)
        .shared_handler("d0", shared.clone())
        .shared_handler("d500", shared.clone())
        .shared_handler("d1000", shared.clone())
        .shared_handler("d1500", shared)
        .seeds([
            Task::new("d1500", "http://example.com/d1500")
                .unwrap()
                .delayed_by(Duration::from_millis(1500)),
            Task::new("d0", "http://example.com/d0").unwrap(),
            Task::new("d500", "http://example.com/d500")
                .unwrap()
                .delayed_by(Duration::from_millis(500)),
            Task::new("d1000", "http://example.com/d1000")
                .unwrap()
                .delayed_by(Duration::from_millis(1000)),
        ])
        .build()
        .unwrap();

    crawler.run().await.unwrap();
    assert_eq!(handler.names(), ["d0", "d500", "d1000", "d1500"]);
}

#[tokio::test(start_paused = true)]
async fn five_immediate_tasks_count_five_requests() {
    let transport = ScriptedTransport::always_ok(5);

    let mut crawler = CrawlerBuilder::new()
        .thread_number(5)
        .transport(transport)
        .shared_handler("page", Arc::new(RecordingHandler::default()))
        .seeds((0..5).map(|i| Task::new("page", &format!("http://example.com/{i}")).unwrap()))
        .build()
        .unwrap();

    let report = crawler.run().await.unwrap();

    assert_eq!(report.counter("request"), 5);
    assert_eq!(crawler.queue_size(), 0);
}

#[tokio::test(start_paused = true)]
async fn timed_out_task_is_rejected_without_handler_invocation() {
    let transport = ScriptedTransport::new(
        1,
        Arc::new(|_: &Task| FetchOutcome::NetworkError {
            reason: "timeout: operation timed out".into(),
        }),
    );
    let handler = Arc::new(RecordingHandler::default());

    let mut crawler = CrawlerBuilder::new()
        .thread_number(1)
        .network_try_limit(1)
        .transport(transport)
        .shared_handler("page", Arc::clone(&handler) as Arc<dyn TaskHandler>)
        .seed(Task::new("page", "http://example.com/slow").unwrap())
        .build()
        .unwrap();

    let report = crawler.run().await.unwrap();

    assert_eq!(report.counter("request-network"), 1);
    assert_eq!(report.counter("task-rejected"), 1);
    assert_eq!(report.collections["reject-url"].len(), 1);
    assert!(handler.names().is_empty());
}

#[tokio::test(start_paused = true)]
async fn second_fetch_of_a_cached_url_skips_the_network() {
    let transport = ScriptedTransport::always_ok(1);
    let dispatch_log = Arc::clone(&transport.dispatch_log);
    let handler = Arc::new(RecordingHandler::default());

    let shared: Arc<dyn TaskHandler> = handler.clone();
    let mut crawler = CrawlerBuilder::new()
        .thread_number(1)
        .transport(transport)
        .cache(MemoryCache::new())
        .shared_handler("first", shared.clone())
        .shared_handler("second", shared)
        .seeds([
            Task::new("first", "http://example.com/page").unwrap().with_priority(1),
            Task::new("second", "http://example.com/page").unwrap().with_priority(2),
        ])
        .build()
        .unwrap();

    let report = crawler.run().await.unwrap();

    assert_eq!(handler.names(), ["first", "second"]);
    assert_eq!(dispatch_log.lock().len(), 1);
    assert_eq!(report.counter("request"), 2);
    assert_eq!(report.counter("request-network"), 1);
    assert_eq!(report.counter("request-cache"), 1);
}

/// Index handler yielding two page tasks and one data record.
struct IndexHandler;

#[async_trait]
impl TaskHandler for IndexHandler {
    async fn handle(
        &self,
        _response: &FetchResponse,
        _task: &Task,
    ) -> Result<HandlerOutput, CrawlError> {
        let mut output = HandlerOutput::new();
        output.push_task(Task::new("page", "http://example.com/a")?);
        output.push_task(Task::new("page", "http://example.com/b")?);
        output.push_data(Data::new("title", "Example Domain"));
        Ok(output)
    }
}

#[derive(Default)]
struct RecordingDataHandler {
    records: Mutex<Vec<Value>>,
}

#[async_trait]
impl DataHandler for RecordingDataHandler {
    async fn handle(&self, data: &Data) -> Result<(), CrawlError> {
        self.records.lock().push(data.value.clone());
        Ok(())
    }
}

struct SharedData(Arc<RecordingDataHandler>);

#[async_trait]
impl DataHandler for SharedData {
    async fn handle(&self, data: &Data) -> Result<(), CrawlError> {
        self.0.handle(data).await
    }
}

#[tokio::test(start_paused = true)]
async fn handler_output_feeds_tasks_and_data_back() {
    let transport = ScriptedTransport::always_ok(2);
    let data = Arc::new(RecordingDataHandler::default());

    let mut crawler = CrawlerBuilder::new()
        .thread_number(2)
        .transport(transport)
        .handler("index", IndexHandler)
        .shared_handler("page", Arc::new(RecordingHandler::default()))
        .data_handler("title", SharedData(Arc::clone(&data)))
        .seed(Task::new("index", "http://example.com/").unwrap())
        .build()
        .unwrap();

    let report = crawler.run().await.unwrap();

    assert_eq!(report.counter("request"), 3);
    assert_eq!(report.counter("task-index"), 1);
    assert_eq!(report.counter("task-page"), 2);
    assert_eq!(report.counter("data-title"), 1);
    assert_eq!(*data.records.lock(), [Value::from("Example Domain")]);
}

#[tokio::test(start_paused = true)]
async fn per_task_callback_overrides_the_registry() {
    let transport = ScriptedTransport::always_ok(1);
    let callback = Arc::new(RecordingHandler::default());
    let registry_handler = Arc::new(RecordingHandler::default());

    let mut crawler = CrawlerBuilder::new()
        .thread_number(1)
        .transport(transport)
        .shared_handler("detail", Arc::clone(&registry_handler) as Arc<dyn TaskHandler>)
        .seed(
            Task::new("detail", "http://example.com/item")
                .unwrap()
                .with_callback(Arc::clone(&callback) as Arc<dyn TaskHandler>),
        )
        .build()
        .unwrap();

    crawler.run().await.unwrap();

    assert_eq!(callback.names(), ["detail"]);
    assert!(registry_handler.names().is_empty());
}

struct FatalHandler;

#[async_trait]
impl TaskHandler for FatalHandler {
    async fn handle(
        &self,
        _response: &FetchResponse,
        _task: &Task,
    ) -> Result<HandlerOutput, CrawlError> {
        Err(CrawlError::Fatal("storage gone".into()))
    }
}

#[tokio::test(start_paused = true)]
async fn fatal_handler_error_surfaces_from_run() {
    let transport = ScriptedTransport::always_ok(1);

    let mut crawler = CrawlerBuilder::new()
        .thread_number(1)
        .transport(transport)
        .handler("page", FatalHandler)
        .seed(Task::new("page", "http://example.com/").unwrap())
        .build()
        .unwrap();

    let result = crawler.run().await;
    assert!(matches!(result, Err(CrawlError::Fatal(_))));

    let stats = crawler.stats();
    assert_eq!(stats.counter("fatal"), 1);
    assert_eq!(stats.collection_len("fatal"), 1);
}

#[tokio::test(start_paused = true)]
async fn commands_are_served_while_the_loop_runs() {
    let transport = ScriptedTransport::always_ok(1);
    let channel = CommandChannel::new();
    let operator = channel.clone();

    let mut crawler = CrawlerBuilder::new()
        .thread_number(1)
        .transport(transport)
        .command_channel(channel)
        .shared_handler("page", Arc::new(RecordingHandler::default()))
        .seed(Task::new("page", "http://example.com/").unwrap())
        .build()
        .unwrap();

    let stats_id = operator.put_command(COMMAND_STATS, Value::Null);
    crawler.run().await.unwrap();

    let snapshot = operator.pop_result(stats_id).expect("stats reply");
    assert!(snapshot["counters"].is_object());
}

#[tokio::test(start_paused = true)]
async fn stop_command_drains_instead_of_finishing_the_queue() {
    let transport = ScriptedTransport::always_ok(1);
    let channel = CommandChannel::new();
    let operator = channel.clone();

    let mut crawler = CrawlerBuilder::new()
        .thread_number(1)
        .transport(transport)
        .command_channel(channel)
        .shared_handler("page", Arc::new(RecordingHandler::default()))
        .seeds((0..10).map(|i| Task::new("page", &format!("http://example.com/{i}")).unwrap()))
        .build()
        .unwrap();

    operator.put_command(COMMAND_STOP, Value::Null);
    let report = crawler.run().await.unwrap();

    // The iteration that observes the command still dispatches once; the
    // flag is honored at the top of the next iteration and the remaining
    // queue is kept, not lost.
    assert_eq!(report.counter("request"), 1);
    assert_eq!(crawler.queue_size(), 9);
    assert_eq!(crawler.active_task_number(), 0);
}

#[tokio::test(start_paused = true)]
async fn stop_handle_is_honored_before_any_dispatch() {
    let transport = ScriptedTransport::always_ok(1);

    let mut crawler = CrawlerBuilder::new()
        .thread_number(1)
        .transport(transport)
        .shared_handler("page", Arc::new(RecordingHandler::default()))
        .seeds((0..3).map(|i| Task::new("page", &format!("http://example.com/{i}")).unwrap()))
        .build()
        .unwrap();

    let handle = crawler.stop_handle();
    handle.stop();
    assert!(handle.is_stop_requested());

    let report = crawler.run().await.unwrap();
    assert_eq!(report.counter("request"), 0);
    assert_eq!(crawler.queue_size(), 3);
}

#[tokio::test(start_paused = true)]
async fn unknown_seed_handler_is_a_build_error() {
    let result = CrawlerBuilder::new()
        .thread_number(1)
        .transport(ScriptedTransport::always_ok(1))
        .seed(Task::new("page", "http://example.com/").unwrap())
        .build();
    assert!(matches!(result, Err(CrawlError::Misuse(_))));
}
