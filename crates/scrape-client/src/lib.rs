//! Shared HTTP fetch layer for scraped origins.
//!
//! External sites tolerate one request at a time per origin domain with a
//! politeness delay between them. The limiter owns a map from domain to
//! (mutex, last-request timestamp); the mutex is held across the delay and
//! the request itself, so at most one request per domain is ever in flight.
//! Fetched bodies are durably cached by URL through the [`ScrapeCache`]
//! trait so repeat pipeline runs inside the cache TTL never re-hit the
//! origin.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use signal_core::SignalError;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Durable URL-keyed response cache. Implemented by the data store.
#[async_trait]
pub trait ScrapeCache: Send + Sync {
    /// Cached body for `url`, if a non-expired entry exists.
    async fn get_cached(&self, url: &str) -> Result<Option<String>, SignalError>;

    async fn save(&self, url: &str, content: &str) -> Result<(), SignalError>;
}

/// Per-domain politeness limiter: one in-flight request per origin domain,
/// spaced at least `min_interval` apart.
pub struct DomainRateLimiter {
    domains: Mutex<HashMap<String, Arc<Mutex<Option<Instant>>>>>,
    min_interval: Duration,
}

impl DomainRateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            domains: Mutex::new(HashMap::new()),
            min_interval,
        }
    }

    async fn slot(&self, domain: &str) -> Arc<Mutex<Option<Instant>>> {
        let mut domains = self.domains.lock().await;
        domains
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// Wait out the domain's politeness window and stamp it. The returned
    /// guard must be held until the request completes.
    pub async fn acquire(&self, domain: &str) -> OwnedMutexGuard<Option<Instant>> {
        let slot = self.slot(domain).await;
        let mut guard = slot.lock_owned().await;
        if let Some(last) = *guard {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *guard = Some(Instant::now());
        guard
    }
}

/// HTTP client for scraped origins: browser headers, redirects followed,
/// per-domain rate limiting, durable response caching.
pub struct ScrapeClient {
    client: reqwest::Client,
    limiter: DomainRateLimiter,
    cache: Option<Arc<dyn ScrapeCache>>,
}

impl ScrapeClient {
    pub fn new(cache: Option<Arc<dyn ScrapeCache>>) -> Self {
        Self::with_min_interval(cache, Duration::from_secs(1))
    }

    pub fn with_min_interval(cache: Option<Arc<dyn ScrapeCache>>, min_interval: Duration) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            limiter: DomainRateLimiter::new(min_interval),
            cache,
        }
    }

    /// Fetch a URL body, consulting the durable cache first.
    pub async fn fetch(&self, url: &str) -> Result<String, SignalError> {
        if let Some(cache) = &self.cache {
            if let Some(content) = cache.get_cached(url).await? {
                tracing::debug!("Cache hit for {}", url);
                return Ok(content);
            }
        }

        let domain = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(String::from))
            .unwrap_or_default();

        let guard = self.limiter.acquire(&domain).await;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SignalError::ApiError(e.to_string()))?
            .error_for_status()
            .map_err(|e| SignalError::ApiError(e.to_string()))?;
        let text = response
            .text()
            .await
            .map_err(|e| SignalError::ApiError(e.to_string()))?;
        drop(guard);

        if let Some(cache) = &self.cache {
            cache.save(url, &text).await?;
        }

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn same_domain_requests_are_spaced() {
        let limiter = DomainRateLimiter::new(Duration::from_secs(1));

        let start = Instant::now();
        drop(limiter.acquire("example.com").await);
        drop(limiter.acquire("example.com").await);
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn different_domains_are_independent() {
        let limiter = DomainRateLimiter::new(Duration::from_secs(1));

        let start = Instant::now();
        drop(limiter.acquire("one.example.com").await);
        drop(limiter.acquire("two.example.com").await);
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_interval_does_not_delay() {
        let limiter = DomainRateLimiter::new(Duration::from_secs(1));

        drop(limiter.acquire("example.com").await);
        tokio::time::sleep(Duration::from_secs(2)).await;

        let start = Instant::now();
        drop(limiter.acquire("example.com").await);
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
