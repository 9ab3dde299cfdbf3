//! Site crawler: frontier BFS over same-host links with adaptive
//! concurrency and per-host rate limiting.
//!
//! Discovery emits URLs through a callback as they pass the tenant's
//! whitelist/blacklist, so enqueueing can start before the crawl
//! finishes. Only URLs on a start-URL host enter the frontier at all.
//!
//! Fetching is dual-path: hosts default to a plain HTTP GET and are
//! promoted to render-service-first after bot-protection responses
//! exhaust their retries. 429s feed the adaptive limiters and are
//! retried after the host's backoff.

/// Adaptive concurrency and per-host rate limiting.
pub mod limiter;
/// Sitemap parsing and recursive index fetching.
pub mod sitemap;

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::{Client, StatusCode};
use scraper::{Html, Selector};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::url_translator::normalize_url;
use crate::{Error, Result};

pub use limiter::{AdaptiveConcurrencyLimiter, AdaptiveRateLimiter, LimiterSnapshot};

/// Cookie jar filename under the tenant directory.
pub const COOKIES_FILENAME: &str = ".cookies.json";

/// Retries for 429/403 responses before giving up or switching paths.
const FETCH_RETRIES: u32 = 3;

/// Back-off applied when the render service reports resource exhaustion.
const RENDER_OVERLOAD_BACKOFF: Duration = Duration::from_secs(30);

/// Which fetch strategy a host currently gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum FetchPath {
    /// Plain HTTP GET first, render service as bot-protection fallback.
    #[default]
    HttpFirst,
    /// Render service first, HTTP as fallback.
    BrowserFirst,
}

/// Crawler configuration for one tenant.
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Seed URLs; their hosts bound the crawl.
    pub start_urls: Vec<String>,
    /// Only URLs under one of these prefixes are emitted (empty = all).
    pub url_whitelist_prefixes: Vec<String>,
    /// URLs under any of these prefixes are never emitted.
    pub url_blacklist_prefixes: Vec<String>,
    /// Overall timeout per request.
    pub http_timeout: Duration,
    /// External headless-render service, when available.
    pub render_service_endpoint: Option<String>,
    /// Cookie jar location; `None` disables persistence.
    pub cookies_path: Option<PathBuf>,
    /// Hard cap on visited pages.
    pub max_pages: usize,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            start_urls: Vec::new(),
            url_whitelist_prefixes: Vec::new(),
            url_blacklist_prefixes: Vec::new(),
            http_timeout: Duration::from_secs(30),
            render_service_endpoint: None,
            cookies_path: None,
            max_pages: 10_000,
        }
    }
}

/// Frontier BFS crawler bound to one tenant's configuration.
pub struct Crawler {
    client: Client,
    config: CrawlerConfig,
    concurrency: AdaptiveConcurrencyLimiter,
    rate_limiter: Arc<AdaptiveRateLimiter>,
    host_paths: Mutex<HashMap<String, FetchPath>>,
    cookies: Mutex<HashMap<String, String>>,
}

impl Crawler {
    /// Build a crawler, loading any persisted cookies.
    pub fn new(
        config: CrawlerConfig,
        concurrency: AdaptiveConcurrencyLimiter,
        rate_limiter: Arc<AdaptiveRateLimiter>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.http_timeout)
            .user_agent(concat!("fathom/", env!("CARGO_PKG_VERSION")))
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(Error::Network)?;

        let cookies = config
            .cookies_path
            .as_ref()
            .filter(|path| path.exists())
            .and_then(|path| fs::read_to_string(path).ok())
            .and_then(|raw| serde_json::from_str::<HashMap<String, String>>(&raw).ok())
            .unwrap_or_default();

        Ok(Self {
            client,
            config,
            concurrency,
            rate_limiter,
            host_paths: Mutex::new(HashMap::new()),
            cookies: Mutex::new(cookies),
        })
    }

    /// Whether the tenant wants this URL at all.
    #[must_use]
    pub fn should_process_url(&self, url: &str) -> bool {
        if self
            .config
            .url_blacklist_prefixes
            .iter()
            .any(|prefix| url.starts_with(prefix.as_str()))
        {
            return false;
        }
        if self.config.url_whitelist_prefixes.is_empty() {
            return true;
        }
        self.config
            .url_whitelist_prefixes
            .iter()
            .any(|prefix| url.starts_with(prefix.as_str()))
    }

    /// Crawl from the seed URLs, emitting accepted URLs through the
    /// callback as they are discovered. Returns the full accepted set.
    #[instrument(skip_all, fields(seeds = self.config.start_urls.len()))]
    pub async fn crawl<F>(&self, mut on_url_discovered: F) -> Result<BTreeSet<String>>
    where
        F: FnMut(&str),
    {
        let mut allowed_hosts: HashSet<String> = HashSet::new();
        let mut frontier: VecDeque<String> = VecDeque::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut collected: BTreeSet<String> = BTreeSet::new();

        for seed in &self.config.start_urls {
            match normalize_url(seed) {
                Ok(normalized) => {
                    if let Some(host) = host_of(&normalized) {
                        allowed_hosts.insert(host);
                    }
                    frontier.push_back(normalized);
                },
                Err(e) => warn!(seed, error = %e, "Skipping unparseable seed URL"),
            }
        }

        while let Some(url) = frontier.pop_front() {
            if visited.len() >= self.config.max_pages {
                warn!(max_pages = self.config.max_pages, "Crawl page cap reached");
                break;
            }
            if !visited.insert(url.clone()) {
                continue;
            }

            if self.should_process_url(&url) && collected.insert(url.clone()) {
                on_url_discovered(&url);
            }

            let html = {
                let _permit = self.concurrency.acquire().await;
                match self.fetch_page(&url).await {
                    Ok(html) => html,
                    Err(e) => {
                        debug!(url, error = %e, "Crawl fetch failed");
                        continue;
                    },
                }
            };
            self.concurrency.record_success();
            if let Some(host) = host_of(&url) {
                self.rate_limiter.record_success(&host);
            }

            for link in extract_links(&html, &url) {
                let Some(host) = host_of(&link) else { continue };
                if !allowed_hosts.contains(&host) || visited.contains(&link) {
                    continue;
                }
                frontier.push_back(link);
            }
        }

        self.save_cookies();
        info!(
            visited = visited.len(),
            collected = collected.len(),
            "Crawl complete"
        );
        Ok(collected)
    }

    /// Fetch one page following the host's current strategy.
    async fn fetch_page(&self, url: &str) -> Result<String> {
        let host = host_of(url).unwrap_or_default();
        let path = {
            let paths = self
                .host_paths
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            paths.get(&host).copied().unwrap_or_default()
        };

        match path {
            FetchPath::BrowserFirst => match self.render_get(url).await {
                Ok(html) => Ok(html),
                Err(e) => {
                    debug!(url, error = %e, "Render path failed; falling back to HTTP");
                    self.http_get_with_retries(url, &host).await
                },
            },
            FetchPath::HttpFirst => match self.http_get_with_retries(url, &host).await {
                Ok(html) => Ok(html),
                Err(Error::Fetch { reason, .. })
                    if reason == "status=403" && self.config.render_service_endpoint.is_some() =>
                {
                    // Bot protection exhausted its retries; promote the
                    // host to the browser path.
                    self.mark_browser_first(&host);
                    self.render_get(url).await
                },
                Err(other) => Err(other),
            },
        }
    }

    fn mark_browser_first(&self, host: &str) {
        let mut paths = self
            .host_paths
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        paths.insert(host.to_string(), FetchPath::BrowserFirst);
        info!(host, "Host promoted to render-first fetching");
    }

    /// Plain GET with 429/403 retry handling.
    async fn http_get_with_retries(&self, url: &str, host: &str) -> Result<String> {
        let mut last_reason = String::new();
        for attempt in 0..=FETCH_RETRIES {
            self.rate_limiter.wait_for_host(host).await;

            let request = {
                let cookies = self
                    .cookies
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                let mut request = self.client.get(url);
                if let Some(cookie) = cookies.get(host) {
                    request = request.header(reqwest::header::COOKIE, cookie);
                }
                request
            };
            let response = request.send().await.map_err(|e| {
                if e.is_timeout() {
                    Error::Fetch {
                        url: url.to_string(),
                        reason: "timeout".to_string(),
                    }
                } else {
                    Error::Network(e)
                }
            })?;

            self.remember_cookies(host, &response);
            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                self.rate_limiter.record_rate_limited(host);
                self.concurrency.record_rate_limited();
                last_reason = "status=429".to_string();
                debug!(url, attempt, "Rate limited; backing off");
                continue;
            }
            if status == StatusCode::FORBIDDEN {
                last_reason = "status=403".to_string();
                debug!(url, attempt, "Bot-protection-like status");
                continue;
            }
            if !status.is_success() {
                return Err(Error::Fetch {
                    url: url.to_string(),
                    reason: format!("status={}", status.as_u16()),
                });
            }
            return response.text().await.map_err(Error::Network);
        }
        Err(Error::Fetch {
            url: url.to_string(),
            reason: last_reason,
        })
    }

    /// Fetch via the external headless-render service.
    async fn render_get(&self, url: &str) -> Result<String> {
        let Some(endpoint) = &self.config.render_service_endpoint else {
            return Err(Error::Fetch {
                url: url.to_string(),
                reason: "render_unavailable".to_string(),
            });
        };
        let response = self
            .client
            .post(endpoint)
            .json(&serde_json::json!({ "url": url }))
            .send()
            .await
            .map_err(Error::Network)?;
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            if let Some(host) = host_of(url) {
                self.rate_limiter.record_rate_limited(&host);
            }
            self.concurrency.record_rate_limited();
            return Err(Error::Fetch {
                url: url.to_string(),
                reason: "status=429".to_string(),
            });
        }
        if status == StatusCode::SERVICE_UNAVAILABLE {
            // Renderer out of resources; give this URL up for the run.
            tokio::time::sleep(RENDER_OVERLOAD_BACKOFF).await;
            return Err(Error::Fetch {
                url: url.to_string(),
                reason: "render_overloaded".to_string(),
            });
        }
        if !status.is_success() {
            return Err(Error::Fetch {
                url: url.to_string(),
                reason: format!("render_status={}", status.as_u16()),
            });
        }
        let payload: serde_json::Value = response.json().await.map_err(Error::Network)?;
        payload
            .get("html")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::Fetch {
                url: url.to_string(),
                reason: "render_empty".to_string(),
            })
    }

    fn remember_cookies(&self, host: &str, response: &reqwest::Response) {
        let pairs: Vec<String> = response
            .headers()
            .get_all(reqwest::header::SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|raw| raw.split(';').next())
            .map(str::to_string)
            .collect();
        if pairs.is_empty() {
            return;
        }
        let mut cookies = self
            .cookies
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        cookies.insert(host.to_string(), pairs.join("; "));
    }

    fn save_cookies(&self) {
        let Some(path) = &self.config.cookies_path else {
            return;
        };
        let cookies = self
            .cookies
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if cookies.is_empty() {
            return;
        }
        match serde_json::to_string_pretty(&*cookies) {
            Ok(encoded) => {
                if let Err(e) = fs::write(path, encoded) {
                    warn!(path = %path.display(), error = %e, "Failed to persist cookies");
                }
            },
            Err(e) => warn!(error = %e, "Failed to encode cookies"),
        }
    }
}

fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
}

/// Extract and normalize same-document links from a page.
fn extract_links(html: &str, base_url: &str) -> Vec<String> {
    let Ok(base) = Url::parse(base_url) else {
        return Vec::new();
    };
    let Ok(anchor) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let document = Html::parse_document(html);
    let mut links = Vec::new();
    for element in document.select(&anchor) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        if href.starts_with('#') || href.starts_with("mailto:") || href.starts_with("javascript:") {
            continue;
        }
        let Ok(resolved) = base.join(href) else {
            continue;
        };
        if let Ok(normalized) = normalize_url(resolved.as_str()) {
            if !links.contains(&normalized) {
                links.push(normalized);
            }
        }
    }
    links
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn crawler(config: CrawlerConfig) -> Crawler {
        Crawler::new(
            config,
            AdaptiveConcurrencyLimiter::new(2, 4),
            Arc::new(AdaptiveRateLimiter::new()),
        )
        .unwrap()
    }

    fn page_with_links(links: &[&str]) -> String {
        let anchors: String = links
            .iter()
            .map(|href| format!(r#"<a href="{href}">link</a>"#))
            .collect();
        format!("<html><body><main>{anchors}</main></body></html>")
    }

    #[tokio::test]
    async fn crawl_discovers_linked_pages_breadth_first() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/docs/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(page_with_links(&["/docs/a/", "/docs/b/"])),
            )
            .mount(&server)
            .await;
        for p in ["/docs/a/", "/docs/b/"] {
            Mock::given(method("GET"))
                .and(path(p))
                .respond_with(
                    ResponseTemplate::new(200).set_body_string(page_with_links(&[])),
                )
                .mount(&server)
                .await;
        }

        let crawler = crawler(CrawlerConfig {
            start_urls: vec![format!("{}/docs/", server.uri())],
            ..CrawlerConfig::default()
        });

        let mut streamed = Vec::new();
        let collected = crawler.crawl(|url| streamed.push(url.to_string())).await.unwrap();

        assert_eq!(collected.len(), 3);
        assert_eq!(streamed.len(), 3);
        assert!(collected.iter().any(|u| u.ends_with("/docs/a/")));
        assert!(collected.iter().any(|u| u.ends_with("/docs/b/")));
    }

    #[tokio::test]
    async fn crawl_never_leaves_the_start_hosts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/docs/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(page_with_links(&[
                "https://other-host.example/docs/",
                "/docs/local/",
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/docs/local/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(page_with_links(&[])))
            .mount(&server)
            .await;

        let crawler = crawler(CrawlerConfig {
            start_urls: vec![format!("{}/docs/", server.uri())],
            ..CrawlerConfig::default()
        });
        let collected = crawler.crawl(|_| {}).await.unwrap();

        assert!(collected.iter().all(|u| u.starts_with(&server.uri())));
        assert_eq!(collected.len(), 2);
    }

    #[tokio::test]
    async fn whitelist_and_blacklist_filter_emitted_urls() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/docs/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(page_with_links(&[
                "/docs/keep/",
                "/docs/internal/private/",
                "/blog/post/",
            ])))
            .mount(&server)
            .await;
        for p in ["/docs/keep/", "/docs/internal/private/", "/blog/post/"] {
            Mock::given(method("GET"))
                .and(path(p))
                .respond_with(
                    ResponseTemplate::new(200).set_body_string(page_with_links(&[])),
                )
                .mount(&server)
                .await;
        }

        let base = server.uri();
        let crawler = crawler(CrawlerConfig {
            start_urls: vec![format!("{base}/docs/")],
            url_whitelist_prefixes: vec![format!("{base}/docs/")],
            url_blacklist_prefixes: vec![format!("{base}/docs/internal/")],
            ..CrawlerConfig::default()
        });
        let collected = crawler.crawl(|_| {}).await.unwrap();

        assert!(collected.iter().any(|u| u.ends_with("/docs/keep/")));
        assert!(!collected.iter().any(|u| u.contains("/internal/")));
        assert!(!collected.iter().any(|u| u.contains("/blog/")));
    }

    #[tokio::test]
    async fn rate_limited_responses_shrink_the_limiter() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/docs/"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let concurrency = AdaptiveConcurrencyLimiter::new(2, 8);
        let rate_limiter = Arc::new(AdaptiveRateLimiter::new());
        // Grow the limit first so the halving is observable.
        for _ in 0..50 {
            concurrency.record_success();
        }
        let grown = concurrency.snapshot().current_limit;
        assert!(grown >= 4);

        let crawler = Crawler::new(
            CrawlerConfig {
                start_urls: vec![format!("{}/docs/", server.uri())],
                ..CrawlerConfig::default()
            },
            concurrency.clone(),
            Arc::clone(&rate_limiter),
        )
        .unwrap();
        let collected = crawler.crawl(|_| {}).await.unwrap();

        // The URL is still reported as discovered even though fetching
        // failed; the fetch pool decides what to do with it later.
        assert_eq!(collected.len(), 1);
        assert!(concurrency.snapshot().current_limit < grown);
        let host = Url::parse(&server.uri()).unwrap().host_str().unwrap().to_string();
        assert!(rate_limiter.current_backoff(&host) > Duration::ZERO);
    }

    #[tokio::test]
    async fn cookies_persist_between_runs() {
        let dir = TempDir::new().unwrap();
        let cookies_path = dir.path().join(COOKIES_FILENAME);
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/docs/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(page_with_links(&[]))
                    .insert_header("Set-Cookie", "session=abc123; Path=/"),
            )
            .mount(&server)
            .await;

        let config = CrawlerConfig {
            start_urls: vec![format!("{}/docs/", server.uri())],
            cookies_path: Some(cookies_path.clone()),
            ..CrawlerConfig::default()
        };
        crawler(config.clone()).crawl(|_| {}).await.unwrap();

        assert!(cookies_path.exists());
        let stored: HashMap<String, String> =
            serde_json::from_str(&fs::read_to_string(&cookies_path).unwrap()).unwrap();
        assert!(stored.values().any(|v| v.contains("session=abc123")));

        // A new crawler re-loads the jar.
        let reloaded = crawler(config);
        let cookies = reloaded.cookies.lock().unwrap();
        assert!(!cookies.is_empty());
    }

    #[test]
    fn link_extraction_normalizes_and_dedupes() {
        let html = r##"<html><body>
            <a href="/docs/a">one</a>
            <a href="/docs/a/">dup</a>
            <a href="#fragment">skip</a>
            <a href="mailto:x@y.z">skip</a>
            <a href="relative/page.html">rel</a>
        </body></html>"##;
        let links = extract_links(html, "https://ex.com/docs/");

        assert_eq!(
            links,
            vec![
                "https://ex.com/docs/a/".to_string(),
                "https://ex.com/docs/relative/page.html".to_string(),
            ]
        );
    }

    #[test]
    fn should_process_url_honors_prefixes() {
        let crawler = crawler(CrawlerConfig {
            url_whitelist_prefixes: vec!["https://ex.com/docs/".to_string()],
            url_blacklist_prefixes: vec!["https://ex.com/docs/private/".to_string()],
            ..CrawlerConfig::default()
        });

        assert!(crawler.should_process_url("https://ex.com/docs/page/"));
        assert!(!crawler.should_process_url("https://ex.com/blog/page/"));
        assert!(!crawler.should_process_url("https://ex.com/docs/private/page/"));
    }
}
