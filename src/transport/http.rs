//! Reqwest-backed transport.
//!
//! One Tokio worker task per in-flight request, collected in a `JoinSet`
//! and reaped by `process_handlers`. Results travel over an unbounded
//! channel so workers never block on the loop. Because `reqwest` scopes a
//! proxy to a whole client, proxied requests go through a lazily built
//! per-proxy client pool.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, trace};

use crate::error::CrawlError;
use crate::http::{FetchOutcome, FetchRequest, FetchResponse, FetchResult};
use crate::proxy::ProxyServer;
use crate::task::Task;
use crate::transport::NetworkTransport;

/// Transport executing fetches over a shared `reqwest` client.
pub struct HttpTransport {
    client: reqwest::Client,
    proxied_clients: DashMap<String, reqwest::Client>,
    thread_number: usize,
    default_timeout: Duration,
    active: Arc<AtomicUsize>,
    workers: JoinSet<()>,
    results_tx: kanal::Sender<FetchResult>,
    results_rx: kanal::Receiver<FetchResult>,
}

impl HttpTransport {
    /// Creates a transport with `thread_number` worker slots.
    pub fn new(thread_number: usize, default_timeout: Duration) -> Result<Self, CrawlError> {
        if thread_number == 0 {
            return Err(CrawlError::Misuse(
                "transport needs at least one worker slot".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .gzip(true)
            .deflate(true)
            .build()
            .map_err(|e| CrawlError::Misuse(format!("building http client: {e}")))?;
        let (results_tx, results_rx) = kanal::unbounded();
        Ok(HttpTransport {
            client,
            proxied_clients: DashMap::new(),
            thread_number,
            default_timeout,
            active: Arc::new(AtomicUsize::new(0)),
            workers: JoinSet::new(),
            results_tx,
            results_rx,
        })
    }

    /// Client routed through `proxy`, built once per distinct endpoint.
    fn client_for(&self, proxy: Option<&ProxyServer>) -> Result<reqwest::Client, String> {
        let Some(server) = proxy else {
            return Ok(self.client.clone());
        };

        let key = format!(
            "{}|{}",
            server.address(),
            server.username.as_deref().unwrap_or("")
        );
        if let Some(client) = self.proxied_clients.get(&key) {
            return Ok(client.clone());
        }

        let mut proxy = reqwest::Proxy::all(server.address())
            .map_err(|e| format!("proxy {}: {e}", server.address()))?;
        if let (Some(user), Some(password)) = (&server.username, &server.password) {
            proxy = proxy.basic_auth(user, password);
        }
        let client = reqwest::Client::builder()
            .gzip(true)
            .deflate(true)
            .proxy(proxy)
            .build()
            .map_err(|e| format!("proxied client {}: {e}", server.address()))?;
        self.proxied_clients.insert(key, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl NetworkTransport for HttpTransport {
    fn ready_for_task(&self) -> bool {
        self.active.load(Ordering::SeqCst) < self.thread_number
    }

    fn active_task_number(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    fn process_task(
        &mut self,
        task: Task,
        request_backup: FetchRequest,
    ) -> Result<(), CrawlError> {
        if !self.ready_for_task() {
            return Err(CrawlError::TransportAtCapacity);
        }

        let request = task.request.clone();
        let client = match self.client_for(request.proxy.as_ref()) {
            Ok(client) => client,
            Err(reason) => {
                // An unbuildable proxy makes this one request invalid, not
                // the transport.
                let _ = self.results_tx.send(FetchResult {
                    task,
                    request_backup,
                    outcome: FetchOutcome::InvalidRequest { reason },
                });
                return Ok(());
            }
        };

        let timeout = request.timeout.unwrap_or(self.default_timeout);
        let tx = self.results_tx.clone();
        let active = Arc::clone(&self.active);
        active.fetch_add(1, Ordering::SeqCst);
        trace!(url = %request.url, "dispatching request");

        self.workers.spawn(async move {
            let outcome = execute(client, &request, timeout).await;
            let _ = tx.send(FetchResult {
                task,
                request_backup,
                outcome,
            });
            // Result first, then the slot: an observed-idle transport has
            // already made all of its results visible.
            active.fetch_sub(1, Ordering::SeqCst);
        });
        Ok(())
    }

    async fn process_handlers(&mut self) {
        while let Some(joined) = self.workers.try_join_next() {
            if let Err(e) = joined {
                if e.is_panic() {
                    error!("fetch worker panicked: {e}");
                }
            }
        }
        // Give spawned workers a chance to progress on single-threaded
        // runtimes.
        tokio::task::yield_now().await;
    }

    fn iterate_results(&mut self) -> Vec<FetchResult> {
        let mut results = Vec::new();
        while let Ok(Some(result)) = self.results_rx.try_recv() {
            results.push(result);
        }
        results
    }
}

async fn execute(
    client: reqwest::Client,
    request: &FetchRequest,
    timeout: Duration,
) -> FetchOutcome {
    let started = Instant::now();

    let mut builder = client
        .request(request.method.clone(), request.url.clone())
        .timeout(timeout);
    for (name, value) in &request.headers {
        builder = builder.header(name, value);
    }
    if let Some(body) = &request.body {
        builder = builder.body(body.clone());
    }

    let response = match builder.send().await {
        Ok(response) => response,
        Err(e) if e.is_builder() => {
            return FetchOutcome::InvalidRequest {
                reason: e.to_string(),
            }
        }
        Err(e) => {
            return FetchOutcome::NetworkError {
                reason: describe_error(&e),
            }
        }
    };

    let status = response.status().as_u16();
    let url = response.url().clone();
    let headers = response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();

    match response.bytes().await {
        Ok(body) => FetchOutcome::Success(FetchResponse {
            url,
            status,
            headers,
            body: body.to_vec(),
            elapsed: started.elapsed(),
            from_cache: false,
        }),
        Err(e) => FetchOutcome::NetworkError {
            reason: describe_error(&e),
        },
    }
}

fn describe_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("timeout: {e}")
    } else if e.is_connect() {
        format!("connect: {e}")
    } else {
        e.to_string()
    }
}
