//! # fetchflow
//!
//! Concurrent web-crawl engine: a cooperative crawl loop dispatching fetch
//! tasks under a bounded concurrency budget, with priority and delay aware
//! queueing, multi-tier retries, an optional response cache, and
//! user-supplied handlers that may yield further tasks.
//!
//! ## Example
//!
//! ```rust,ignore
//! use fetchflow::prelude::*;
//!
//! struct PageHandler;
//!
//! #[async_trait]
//! impl TaskHandler for PageHandler {
//!     async fn handle(
//!         &self,
//!         response: &FetchResponse,
//!         task: &Task,
//!     ) -> Result<HandlerOutput, CrawlError> {
//!         let mut output = HandlerOutput::new();
//!         if !response.is_success() {
//!             return Err(CrawlError::ResponseNotValid(format!(
//!                 "status {}",
//!                 response.status
//!             )));
//!         }
//!         // Extract links, yield follow-up tasks and data records:
//!         // output.push_task(Task::new("page", &next_url)?);
//!         // output.push_data(Data::new("title", title));
//!         Ok(output)
//!     }
//! }
//!
//! async fn crawl() -> Result<(), CrawlError> {
//!     let mut crawler = CrawlerBuilder::new()
//!         .thread_number(8)
//!         .handler("page", PageHandler)
//!         .seed(Task::new("page", "https://example.com/")?)
//!         .build()?;
//!     let report = crawler.run().await?;
//!     println!("requests: {}", report.counter("request"));
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod cache;
pub mod command;
pub mod config;
pub mod crawler;
pub mod error;
pub mod generator;
pub mod handler;
pub mod http;
pub mod prelude;
pub mod proxy;
pub mod queue;
pub mod retry;
pub mod stats;
pub mod task;
pub mod transport;

pub use builder::CrawlerBuilder;
pub use cache::{MemoryCache, ResponseCache};
pub use command::{Command, CommandChannel, COMMAND_STATS, COMMAND_STOP};
pub use config::{CrawlerConfig, PriorityMode};
pub use crawler::{CrawlPhase, Crawler, StopHandle};
pub use error::CrawlError;
pub use generator::TaskGenerator;
pub use handler::{Data, DataHandler, FallbackHandler, HandlerOutput, TaskHandler};
pub use http::{FetchOutcome, FetchRequest, FetchResponse, FetchResult};
pub use proxy::{ProxyScheme, ProxyServer, ProxySource, RoundRobinProxySource};
pub use queue::{MemoryTaskQueue, QueuePoll, TaskQueue};
pub use retry::{LimitVerdict, RejectReason, RetryPolicy};
pub use stats::{StatsCollector, StatsSnapshot};
pub use task::{Task, TaskOverrides};
pub use transport::{HttpTransport, NetworkTransport};

pub use async_trait::async_trait;
pub use tokio;
