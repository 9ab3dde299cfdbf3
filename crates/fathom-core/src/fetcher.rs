//! Per-URL document fetching.
//!
//! The fetch sequence per URL:
//!
//! 1. Markdown mirror shortcut, when the tenant configures a suffix: the
//!    URL's `.html` (or empty) extension is swapped for the suffix and
//!    fetched directly; a non-empty body becomes a document with no HTML
//!    extraction.
//! 2. Primary fetch: HTTP GET plus the in-process article extractor.
//! 3. Fallback extractor: an external HTTP service, only consulted when
//!    the primary yields nothing. Skipped for static assets and when
//!    disabled; retried up to the configured budget.
//!
//! Failure reasons (`status=500`, `timeout`, `fallback_disabled`, ...) are
//! attached to the URL metadata record by the caller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::ArticleExtractorFallback;
use crate::document::{Document, DocumentContent, DocumentMetadata};
use crate::extract::{extract_article, first_prose_paragraph};
use crate::state_store::FetchStatus;
use crate::{Error, Result};

/// Path fragments and extensions that identify static assets; the
/// fallback extractor is never called for these.
const ASSET_EXTENSIONS: &[&str] = &[
    ".js", ".css", ".png", ".jpg", ".jpeg", ".gif", ".svg", ".ico", ".woff", ".woff2", ".ttf",
    ".map", ".webp",
];
const ASSET_PATH_MARKERS: &[&str] = &["/_static/", "/_assets/", "/static/js/", "/static/css/"];

/// Sleep between fallback extractor retries.
const FALLBACK_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Fetch attempt counters for status reporting.
#[derive(Debug, Default)]
pub struct FetchMetrics {
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
}

/// Point-in-time copy of [`FetchMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct FetchMetricsSnapshot {
    /// Total fetches attempted.
    pub attempts: u64,
    /// Fetches that produced a document.
    pub successes: u64,
    /// Fetches that failed.
    pub failures: u64,
}

impl FetchMetrics {
    /// Current counter values.
    #[must_use]
    pub fn snapshot(&self) -> FetchMetricsSnapshot {
        FetchMetricsSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Fetcher configuration, resolved from tenant + infrastructure config.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Overall timeout per HTTP request.
    pub http_timeout: Duration,
    /// Optional markdown mirror suffix (e.g. `.md`).
    pub markdown_mirror_suffix: Option<String>,
    /// Fallback extractor service settings.
    pub fallback: ArticleExtractorFallback,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            http_timeout: Duration::from_secs(30),
            markdown_mirror_suffix: None,
            fallback: ArticleExtractorFallback::default(),
        }
    }
}

/// Response shape of the fallback extractor service.
#[derive(Debug, Deserialize)]
struct FallbackExtraction {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    markdown: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    excerpt: Option<String>,
}

/// Fetches single URLs and turns them into documents.
#[derive(Debug, Clone)]
pub struct DocFetcher {
    client: Client,
    config: FetcherConfig,
    metrics: Arc<FetchMetrics>,
}

impl DocFetcher {
    /// Build a fetcher with its own HTTP client.
    pub fn new(config: FetcherConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.http_timeout)
            .user_agent(concat!("fathom/", env!("CARGO_PKG_VERSION")))
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(Error::Network)?;
        Ok(Self {
            client,
            config,
            metrics: Arc::new(FetchMetrics::default()),
        })
    }

    /// Shared metrics handle.
    #[must_use]
    pub fn metrics(&self) -> Arc<FetchMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Fetch a URL and produce a document, or a typed failure whose
    /// reason string lands on the URL metadata record.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn fetch(&self, url: &str) -> Result<Document> {
        self.metrics.attempts.fetch_add(1, Ordering::Relaxed);
        let result = self.fetch_inner(url).await;
        match &result {
            Ok(_) => {
                self.metrics.successes.fetch_add(1, Ordering::Relaxed);
            },
            Err(e) => {
                self.metrics.failures.fetch_add(1, Ordering::Relaxed);
                debug!(error = %e, "Fetch failed");
            },
        }
        result
    }

    async fn fetch_inner(&self, url: &str) -> Result<Document> {
        if let Some(suffix) = &self.config.markdown_mirror_suffix {
            if let Some(document) = self.try_markdown_mirror(url, suffix).await? {
                return Ok(document);
            }
        }

        let html = match self.get_html(url).await {
            Ok(html) => html,
            Err(primary_err) => {
                // Primary transport failed outright; the fallback service
                // gets one chance before the failure propagates.
                return match self.try_fallback(url).await? {
                    Some(document) => Ok(document),
                    None => Err(primary_err),
                };
            },
        };

        match extract_article(&html, url) {
            Ok(article) if article.is_substantive() => {
                document_from_parts(
                    url,
                    article.title,
                    article.markdown,
                    Some(article.text),
                    article.excerpt,
                    "article",
                )
            },
            _ => match self.try_fallback(url).await? {
                Some(document) => Ok(document),
                None => Err(Error::Fetch {
                    url: url.to_string(),
                    reason: "empty_extraction".to_string(),
                }),
            },
        }
    }

    /// GET a page body, mapping transport problems to typed reasons.
    async fn get_html(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Fetch {
                    url: url.to_string(),
                    reason: "timeout".to_string(),
                }
            } else {
                Error::Network(e)
            }
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Fetch {
                url: url.to_string(),
                reason: format!("status={}", status.as_u16()),
            });
        }
        response.text().await.map_err(Error::Network)
    }

    /// Markdown mirror shortcut: swap the extension for the mirror suffix
    /// and take the body verbatim when the mirror responds.
    async fn try_markdown_mirror(&self, url: &str, suffix: &str) -> Result<Option<Document>> {
        let Some(mirror_url) = markdown_mirror_url(url, suffix) else {
            return Ok(None);
        };
        let response = match self.client.get(&mirror_url).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!(mirror_url, error = %e, "Markdown mirror unreachable");
                return Ok(None);
            },
        };
        if response.status() != StatusCode::OK {
            return Ok(None);
        }
        let body = response.text().await.map_err(Error::Network)?;
        if body.trim().is_empty() {
            return Ok(None);
        }

        let title = body
            .lines()
            .find_map(|line| line.strip_prefix("# "))
            .map_or_else(|| title_from_tail(url), |t| t.trim().to_string());
        let excerpt = first_prose_paragraph(&body);
        debug!(mirror_url, "Markdown mirror hit");
        document_from_parts(url, title, body, None, excerpt, "mirror").map(Some)
    }

    /// Second-chance extraction via the external service.
    ///
    /// Returns `Ok(None)` when the fallback is disabled, skipped, or
    /// exhausted; hard errors only come from cancellation.
    async fn try_fallback(&self, url: &str) -> Result<Option<Document>> {
        if !self.config.fallback.enabled {
            debug!(reason = "fallback_disabled", "Skipping fallback extractor");
            return Ok(None);
        }
        if is_static_asset(url) {
            debug!(reason = "fallback_skipped_asset", "Skipping fallback extractor");
            return Ok(None);
        }
        let Some(endpoint) = &self.config.fallback.endpoint else {
            return Ok(None);
        };

        for attempt in 0..=self.config.fallback.max_retries {
            let response = self
                .client
                .post(endpoint)
                .json(&serde_json::json!({ "url": url }))
                .send()
                .await;
            match response {
                Ok(response) if response.status().is_success() => {
                    let payload: FallbackExtraction =
                        response.json().await.map_err(Error::Network)?;
                    let markdown = payload.markdown.unwrap_or_default();
                    let text = payload.text.unwrap_or_default();
                    if markdown.trim().is_empty() && text.trim().is_empty() {
                        return Ok(None);
                    }
                    let excerpt = payload
                        .excerpt
                        .unwrap_or_else(|| first_prose_paragraph(&markdown));
                    let title = payload
                        .title
                        .filter(|t| !t.trim().is_empty())
                        .unwrap_or_else(|| title_from_tail(url));
                    return document_from_parts(
                        url,
                        title,
                        markdown,
                        Some(text),
                        excerpt,
                        "fallback",
                    )
                    .map(Some);
                },
                Ok(response) => {
                    warn!(status = %response.status(), attempt, "Fallback extractor error status");
                },
                Err(e) => {
                    warn!(error = %e, attempt, "Fallback extractor request failed");
                },
            }
            if attempt < self.config.fallback.max_retries {
                tokio::time::sleep(FALLBACK_RETRY_DELAY).await;
            }
        }
        Ok(None)
    }
}

fn document_from_parts(
    url: &str,
    title: String,
    markdown: String,
    text: Option<String>,
    excerpt: String,
    extraction_method: &str,
) -> Result<Document> {
    Document::new(
        url,
        title,
        DocumentContent { markdown, text },
        excerpt,
        DocumentMetadata {
            status: FetchStatus::Success,
            last_fetched_at: Some(Utc::now()),
            extraction_method: Some(extraction_method.to_string()),
            ..DocumentMetadata::default()
        },
    )
    .map_err(|e| Error::Fetch {
        url: url.to_string(),
        reason: format!("invalid_document: {e}"),
    })
}

/// Swap a URL's `.html` (or missing) extension for the mirror suffix.
#[must_use]
pub fn markdown_mirror_url(url: &str, suffix: &str) -> Option<String> {
    let mut parsed = Url::parse(url).ok()?;
    let path = parsed.path().to_string();

    let new_path = if let Some(stripped) = path.strip_suffix(".html") {
        format!("{stripped}{suffix}")
    } else if path.ends_with('/') {
        format!("{path}index{suffix}")
    } else {
        let last = path.rsplit('/').next().unwrap_or("");
        if last.contains('.') {
            return None;
        }
        format!("{path}{suffix}")
    };
    parsed.set_path(&new_path);
    Some(parsed.to_string())
}

/// True for URLs the fallback extractor must never be asked about.
#[must_use]
pub fn is_static_asset(url: &str) -> bool {
    let lowered = url.to_lowercase();
    let path_only = lowered.split(['?', '#']).next().unwrap_or(&lowered);
    ASSET_EXTENSIONS.iter().any(|ext| path_only.ends_with(ext))
        || ASSET_PATH_MARKERS.iter().any(|m| path_only.contains(m))
}

fn title_from_tail(url: &str) -> String {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty() && !s.contains("://"))
        .map_or_else(|| url.to_string(), str::to_string)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher(config: FetcherConfig) -> DocFetcher {
        DocFetcher::new(config).unwrap()
    }

    const ARTICLE_HTML: &str = r#"<html><head><title>Guide</title></head>
        <body><main><h1>Guide</h1><p>Useful guidance lives here.</p></main></body></html>"#;

    #[tokio::test]
    async fn primary_fetch_extracts_article() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/docs/guide.html"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ARTICLE_HTML))
            .mount(&server)
            .await;

        let fetcher = fetcher(FetcherConfig::default());
        let url = format!("{}/docs/guide.html", server.uri());
        let document = fetcher.fetch(&url).await.unwrap();

        assert_eq!(document.title, "Guide");
        assert!(document.content.markdown.contains("Useful guidance"));
        assert_eq!(
            document.metadata.extraction_method.as_deref(),
            Some("article")
        );

        let metrics = fetcher.metrics().snapshot();
        assert_eq!(metrics.attempts, 1);
        assert_eq!(metrics.successes, 1);
        assert_eq!(metrics.failures, 0);
    }

    #[tokio::test]
    async fn non_success_status_is_a_typed_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let fetcher = fetcher(FetcherConfig::default());
        let url = format!("{}/docs/broken.html", server.uri());
        let err = fetcher.fetch(&url).await.unwrap_err();

        assert_eq!(err.failure_reason(), "status=500");
        let metrics = fetcher.metrics().snapshot();
        assert_eq!(metrics.failures, 1);
    }

    #[tokio::test]
    async fn markdown_mirror_short_circuits_extraction() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/docs/guide.md"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("# Mirrored Guide\n\nMirror body text."),
            )
            .mount(&server)
            .await;

        let fetcher = fetcher(FetcherConfig {
            markdown_mirror_suffix: Some(".md".to_string()),
            ..FetcherConfig::default()
        });
        let url = format!("{}/docs/guide.html", server.uri());
        let document = fetcher.fetch(&url).await.unwrap();

        assert_eq!(document.title, "Mirrored Guide");
        assert_eq!(document.content.markdown, "# Mirrored Guide\n\nMirror body text.");
        assert_eq!(
            document.metadata.extraction_method.as_deref(),
            Some("mirror")
        );
    }

    #[tokio::test]
    async fn mirror_miss_falls_through_to_primary() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/docs/guide.md"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/docs/guide.html"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ARTICLE_HTML))
            .mount(&server)
            .await;

        let fetcher = fetcher(FetcherConfig {
            markdown_mirror_suffix: Some(".md".to_string()),
            ..FetcherConfig::default()
        });
        let url = format!("{}/docs/guide.html", server.uri());
        let document = fetcher.fetch(&url).await.unwrap();
        assert_eq!(
            document.metadata.extraction_method.as_deref(),
            Some("article")
        );
    }

    #[tokio::test]
    async fn fallback_extractor_rescues_empty_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/docs/empty.html"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("<html><body></body></html>"),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/extract"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "title": "Rescued",
                "markdown": "# Rescued\n\nFrom the fallback.",
                "text": "Rescued From the fallback.",
            })))
            .mount(&server)
            .await;

        let fetcher = fetcher(FetcherConfig {
            fallback: ArticleExtractorFallback {
                enabled: true,
                endpoint: Some(format!("{}/extract", server.uri())),
                max_retries: 1,
            },
            ..FetcherConfig::default()
        });
        let url = format!("{}/docs/empty.html", server.uri());
        let document = fetcher.fetch(&url).await.unwrap();

        assert_eq!(document.title, "Rescued");
        assert_eq!(
            document.metadata.extraction_method.as_deref(),
            Some("fallback")
        );
    }

    #[tokio::test]
    async fn disabled_fallback_reports_empty_extraction() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("<html><body></body></html>"),
            )
            .mount(&server)
            .await;

        let fetcher = fetcher(FetcherConfig::default());
        let url = format!("{}/docs/empty.html", server.uri());
        let err = fetcher.fetch(&url).await.unwrap_err();
        assert_eq!(err.failure_reason(), "empty_extraction");
    }

    #[test]
    fn asset_urls_are_recognized() {
        assert!(is_static_asset("https://ex.com/bundle.js"));
        assert!(is_static_asset("https://ex.com/theme.css?v=3"));
        assert!(is_static_asset("https://ex.com/_static/logo.png"));
        assert!(!is_static_asset("https://ex.com/docs/page.html"));
    }

    #[test]
    fn mirror_url_swaps_extensions() {
        assert_eq!(
            markdown_mirror_url("https://ex.com/docs/page.html", ".md").unwrap(),
            "https://ex.com/docs/page.md"
        );
        assert_eq!(
            markdown_mirror_url("https://ex.com/docs/page", ".md").unwrap(),
            "https://ex.com/docs/page.md"
        );
        assert_eq!(
            markdown_mirror_url("https://ex.com/docs/", ".md").unwrap(),
            "https://ex.com/docs/index.md"
        );
        // Non-HTML extensions have no mirror.
        assert!(markdown_mirror_url("https://ex.com/data.json", ".md").is_none());
    }
}
