pub mod cache;
pub mod http;
pub mod rate_limit;

pub use cache::{CacheOptions, CachingFetcher};
pub use http::{ErrorBudget, HttpConfig, HttpFetcher};
pub use rate_limit::RateLimiter;

use crate::warc::WarcWriter;

/// Network side of the cache: downloads `url`, stores the request/response pair in
/// `writer` and returns the decoded text. `Ok(None)` is a recoverable failure.
pub trait LiveFetcher {
    fn fetch(&self, url: &str, writer: &mut WarcWriter) -> anyhow::Result<Option<String>>;
}
