use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Context as _;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HOST, TRANSFER_ENCODING, USER_AGENT};
use url::Url;

use crate::encoding::decode_page;
use crate::error::FetchError;
use crate::fetch::LiveFetcher;
use crate::fetch::rate_limit::RateLimiter;
use crate::warc::{HttpHead, WarcRecord, WarcWriter};

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub user_agent: String,
    pub timeout: Duration,
    /// Requests allowed per `rate_limit_period`; zero disables the limiter.
    pub rate_limit_calls: usize,
    pub rate_limit_period: Duration,
    /// Download errors tolerated before the crawl is aborted.
    pub max_errors: usize,
    pub keep_cookies: bool,
    pub extra_headers: Vec<(String, String)>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: format!(
                "Mozilla/5.0 (compatible; {}/{})",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            ),
            timeout: Duration::from_secs(30),
            rate_limit_calls: 2,
            rate_limit_period: Duration::from_secs(1),
            max_errors: 10,
            keep_cookies: false,
            extra_headers: Vec::new(),
        }
    }
}

/// Cumulative download error counter shared by every clone.
#[derive(Debug, Clone)]
pub struct ErrorBudget {
    count: Arc<AtomicUsize>,
    limit: usize,
}

impl ErrorBudget {
    pub fn new(limit: usize) -> Self {
        Self {
            count: Arc::new(AtomicUsize::new(0)),
            limit,
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Counts one error; fails once the count exceeds the limit.
    pub fn record_error(&self) -> Result<usize, FetchError> {
        let count = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        if count > self.limit {
            return Err(FetchError::ErrorBudgetExceeded {
                count,
                limit: self.limit,
            });
        }
        Ok(count)
    }
}

#[derive(Debug)]
struct Downloaded {
    request: WarcRecord,
    response: WarcRecord,
    text: String,
}

/// Rate limited, single-attempt HTTP GET that stores what it downloads.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
    config: Arc<HttpConfig>,
    limiter: RateLimiter,
    budget: ErrorBudget,
}

impl HttpFetcher {
    pub fn new(config: HttpConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(10));
        if config.keep_cookies {
            builder = builder.cookie_provider(Arc::new(reqwest::cookie::Jar::default()));
        }
        let client = builder.build().context("build http client")?;

        Ok(Self {
            client,
            limiter: RateLimiter::new(config.rate_limit_calls, config.rate_limit_period),
            budget: ErrorBudget::new(config.max_errors),
            config: Arc::new(config),
        })
    }

    pub fn error_count(&self) -> usize {
        self.budget.count()
    }

    pub fn budget(&self) -> &ErrorBudget {
        &self.budget
    }

    /// `key` is the url as the crawler knows it; `url` is its percent-encoded form.
    fn download(&self, key: &str, url: &Url) -> anyhow::Result<Downloaded> {
        let mut builder = self
            .client
            .get(url.clone())
            .header(USER_AGENT, &self.config.user_agent)
            .header(ACCEPT, "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8");
        for (name, value) in &self.config.extra_headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let request = builder.build().context("build request")?;

        let mut request_head = HttpHead::new(format!("GET {} HTTP/1.1", request_target(url)));
        if let Some(host) = host_header(url) {
            request_head = request_head.with_header(HOST.as_str(), host);
        }
        for (name, value) in request.headers() {
            request_head = request_head
                .with_header(name.as_str(), String::from_utf8_lossy(value.as_bytes()));
        }

        let response = self.client.execute(request).context("send request")?;
        let status = response.status();
        if status != StatusCode::OK {
            anyhow::bail!("unexpected http status {status}");
        }

        let mut response_head = HttpHead::new(status_line(response.version(), status));
        for (name, value) in response.headers() {
            if *name == TRANSFER_ENCODING {
                continue;
            }
            response_head = response_head
                .with_header(name.as_str(), String::from_utf8_lossy(value.as_bytes()));
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let peer_ip = response.remote_addr().map(|addr| addr.ip());

        let body = response.bytes().context("read response body")?;
        if body.is_empty() {
            anyhow::bail!("empty response body");
        }

        let decoded = decode_page(&body, content_type.as_deref());
        if decoded.lossy {
            tracing::warn!(
                url = %url,
                "could not detect page encoding; decoded as utf-8 ignoring errors"
            );
        }

        let request = WarcRecord::request(key, &request_head);
        let response = WarcRecord::response(
            key,
            &response_head,
            &body,
            peer_ip,
            decoded.encoding,
            request.record_id(),
        );

        Ok(Downloaded {
            request,
            response,
            text: decoded.text,
        })
    }

    fn failed(&self, url: &str, reason: &anyhow::Error) -> anyhow::Result<Option<String>> {
        tracing::warn!(%url, reason = %format!("{reason:#}"), "download failed");
        let count = self.budget.record_error()?;
        tracing::debug!(count, limit = self.budget.limit(), "download error counted");
        Ok(None)
    }
}

impl LiveFetcher for HttpFetcher {
    fn fetch(&self, url: &str, writer: &mut WarcWriter) -> anyhow::Result<Option<String>> {
        if writer.is_bad(url) {
            tracing::info!(%url, "skipping known-bad url");
            return Ok(None);
        }
        if writer.is_good(url) {
            tracing::info!(%url, "url was already downloaded in this run; skipping");
            return Ok(None);
        }

        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(err) => return self.failed(url, &anyhow::Error::new(err).context("parse url")),
        };

        self.limiter.wait();
        tracing::debug!(%url, "downloading");
        match self.download(url, &parsed) {
            Ok(downloaded) => {
                writer.write_pair(&downloaded.request, &downloaded.response, url)?;
                Ok(Some(downloaded.text))
            }
            Err(err) => self.failed(url, &err),
        }
    }
}

fn request_target(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{query}", url.path()),
        None => url.path().to_owned(),
    }
}

fn host_header(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    })
}

fn status_line(version: reqwest::Version, status: StatusCode) -> String {
    let protocol = if version == reqwest::Version::HTTP_09 {
        "HTTP/0.9"
    } else if version == reqwest::Version::HTTP_10 {
        "HTTP/1.0"
    } else if version == reqwest::Version::HTTP_2 {
        "HTTP/2"
    } else if version == reqwest::Version::HTTP_3 {
        "HTTP/3"
    } else {
        "HTTP/1.1"
    };
    match status.canonical_reason() {
        Some(reason) => format!("{protocol} {} {reason}", status.as_u16()),
        None => format!("{protocol} {}", status.as_u16()),
    }
}
