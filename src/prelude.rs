//! A "prelude" for users of the `fetchflow` crate.
//!
//! Re-exports the most commonly used traits and structs so they can be
//! imported in one line.
//!
//! # Example
//!
//! ```
//! use fetchflow::prelude::*;
//! ```

pub use crate::{
    // Core structs
    Crawler,
    CrawlerBuilder,
    Task,
    // Handler contracts
    Data,
    DataHandler,
    FallbackHandler,
    HandlerOutput,
    TaskHandler,
    // Fetch types
    FetchRequest,
    FetchResponse,
    // Errors
    CrawlError,
    // Essential re-export for trait implementation
    async_trait,
};
