//! Response cache collaborator boundary.
//!
//! The loop consults the cache before dispatch (idempotent requests only,
//! unless the task disables it) and stores successful cacheable responses
//! afterwards. Storage format and eviction are the backend's business;
//! [`MemoryCache`] is the in-memory reference implementation used in tests.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use url::Url;

use crate::http::FetchResponse;

/// Key-value store mapping request URLs to previously fetched responses.
#[async_trait]
pub trait ResponseCache: Send + Sync {
    /// Looks up a cached response for `url`.
    ///
    /// `timeout` bounds how long the backend may spend on the lookup;
    /// backends without network round-trips may ignore it.
    async fn get(&self, url: &Url, timeout: Option<Duration>) -> Option<FetchResponse>;

    /// Stores `response` under `url`.
    async fn save(&self, url: &Url, response: &FetchResponse);
}

/// In-memory cache backend.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, FetchResponse>,
}

impl MemoryCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored responses.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ResponseCache for MemoryCache {
    async fn get(&self, url: &Url, _timeout: Option<Duration>) -> Option<FetchResponse> {
        self.entries.get(url.as_str()).map(|entry| entry.clone())
    }

    async fn save(&self, url: &Url, response: &FetchResponse) {
        self.entries.insert(url.to_string(), response.clone());
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn response(url: &Url) -> FetchResponse {
        FetchResponse {
            url: url.clone(),
            status: 200,
            headers: Vec::new(),
            body: b"cached".to_vec(),
            elapsed: Duration::from_millis(5),
            from_cache: false,
        }
    }

    #[tokio::test]
    async fn save_then_get_round_trips() {
        let cache = MemoryCache::new();
        let url = Url::parse("http://example.com/page").unwrap();

        assert!(cache.get(&url, None).await.is_none());
        cache.save(&url, &response(&url)).await;

        let hit = cache.get(&url, None).await.unwrap();
        assert_eq!(hit.body, b"cached");
        assert_eq!(cache.len(), 1);
    }
}
