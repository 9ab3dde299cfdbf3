//! The per-tenant runtime: assembles storage, ingestion, and search into
//! one object exposing the tenant API (search / fetch / browse / health /
//! sync control).
//!
//! The active segment is swapped atomically behind a lock; readers clone
//! the `Arc` and keep scoring against the old segment until they finish,
//! after which its handle drops. CPU- and disk-bound work (scoring,
//! segment builds) runs on the blocking pool, never on the event loop.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::config::{InfrastructureConfig, OperationMode, SourceType, TenantConfig};
use crate::crawler::{
    AdaptiveConcurrencyLimiter, AdaptiveRateLimiter, Crawler, CrawlerConfig, COOKIES_FILENAME,
};
use crate::fetcher::{DocFetcher, FetcherConfig, FetchMetrics, FetchMetricsSnapshot};
use crate::indexer::{BuildOptions, Indexer, IndexerContext};
use crate::keywords::analyze_query;
use crate::scheduler::crawl::CrawlSyncCycle;
use crate::scheduler::git::GitSyncCycle;
use crate::scheduler::{
    Scheduler, SchedulerStats, SyncCycle, SyncObserver, SyncOutcome, TriggerResponse,
};
use crate::search::bm25::Bm25Engine;
use crate::search::snippet::build_snippet;
use crate::search::storage::Segment;
use crate::state_store::CrawlStateStore;
use crate::url_translator::{UrlTranslator, METADATA_DIR, SEGMENTS_DIR, STAGING_PREFIX};
use crate::{Error, Result};

/// Truncation point for `surrounding` fetch context.
const SURROUNDING_CONTEXT_CHARS: usize = 8000;

/// Default and maximum browse depth.
const DEFAULT_BROWSE_DEPTH: usize = 5;

/// How much content to return from `fetch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchContext {
    /// Whole document.
    #[default]
    Full,
    /// First stretch of the document with a truncation marker.
    Surrounding,
    /// Metadata only, no content.
    None,
}

impl FetchContext {
    /// Parse a context name; unknown values mean `full`.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "surrounding" => Self::Surrounding,
            "none" => Self::None,
            _ => Self::Full,
        }
    }
}

/// Per-result ranking explanation.
#[derive(Debug, Clone, Serialize)]
pub struct MatchTrace {
    /// Pipeline stage number.
    pub stage: u32,
    /// Stage label.
    pub stage_name: String,
    /// The query variant that matched (analyzed terms).
    pub query_variant: String,
    /// Why this document matched.
    pub match_reason: String,
    /// Informational; always empty for the BM25 engine.
    pub ripgrep_flags: String,
    /// Score plus extracted query keywords.
    pub ranking_factors: serde_json::Value,
}

/// One search hit.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    /// Document URL.
    pub url: String,
    /// Document title.
    pub title: String,
    /// Sentence-aware highlighted snippet.
    pub snippet: String,
    /// BM25F score.
    pub score: f64,
    /// Ranking explanation.
    pub match_trace: MatchTrace,
}

/// Search API response.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchResponse {
    /// Ranked results.
    pub results: Vec<SearchResult>,
    /// Number of results returned.
    pub total_results: usize,
    /// Echo of the query.
    pub query: String,
    /// Set only on failure; empty result sets are not errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Fetch API response.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchResponse {
    /// Document URL.
    pub url: String,
    /// Document title.
    pub title: String,
    /// Markdown content (possibly truncated).
    pub content: String,
    /// Set when the document could not be served.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One node in the browse tree.
#[derive(Debug, Clone, Serialize)]
pub struct BrowseNode {
    /// File or directory name.
    pub name: String,
    /// Document title, when resolvable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Document URL, when resolvable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Whether the node has visible children.
    pub has_children: bool,
    /// Child nodes, present up to the requested depth.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<BrowseNode>>,
}

/// Browse API response.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BrowseTreeResponse {
    /// Requested root path.
    pub root_path: String,
    /// Effective depth.
    pub depth: usize,
    /// Top-level nodes.
    pub nodes: Vec<BrowseNode>,
    /// Set when browsing failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregated tenant health.
#[derive(Debug, Clone, Serialize)]
pub struct TenantHealth {
    /// Tenant codename.
    pub codename: String,
    /// `healthy`, `indexing`, or `degraded`.
    pub status: String,
    /// Documents in the active segment (0 while unindexed).
    pub document_count: usize,
    /// Source kind.
    pub source_type: SourceType,
    /// Scheduler statistics, when a scheduler exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<SchedulerStats>,
    /// Last successful sync completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Fetcher counters, when the tenant fetches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetch_metrics: Option<FetchMetricsSnapshot>,
}

/// The per-tenant assembly of storage, ingestion, and search.
pub struct TenantRuntime {
    config: TenantConfig,
    infrastructure: InfrastructureConfig,
    docs_root: PathBuf,
    translator: UrlTranslator,
    engine: Bm25Engine,
    indexer: Arc<Indexer>,
    state_store: Option<CrawlStateStore>,
    fetch_metrics: Mutex<Option<Arc<FetchMetrics>>>,
    concurrency: AdaptiveConcurrencyLimiter,
    scheduler: Mutex<Option<Arc<Scheduler>>>,
    active_segment: RwLock<Option<Arc<Segment>>>,
    self_weak: Weak<TenantRuntime>,
}

impl std::fmt::Debug for TenantRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantRuntime")
            .field("codename", &self.config.codename)
            .finish_non_exhaustive()
    }
}

impl TenantRuntime {
    /// Build a runtime for a tenant. Directories are created; the index
    /// is not touched until `initialize` or the first search.
    pub fn new(config: TenantConfig, infrastructure: InfrastructureConfig) -> Result<Arc<Self>> {
        let docs_root = config.docs_root(&infrastructure);
        fs::create_dir_all(docs_root.join(METADATA_DIR))
            .map_err(|e| Error::Storage(format!("Failed to create docs root: {e}")))?;

        let indexer = Indexer::new(IndexerContext {
            codename: config.codename.clone(),
            docs_root: docs_root.clone(),
            segments_dir: docs_root.join(SEGMENTS_DIR),
            source_type: config.source_type,
            url_whitelist_prefixes: config.url_whitelist_prefixes.clone(),
            url_blacklist_prefixes: config.url_blacklist_prefixes.clone(),
            analyzer_profile: config.search.analyzer_profile.clone(),
            max_segments: infrastructure.max_segments,
        })?;

        let engine = Bm25Engine::new(
            crate::search::schema::schema_for_profile(config.search.analyzer_profile.as_deref()),
            config.search.ranking_options(),
        );

        let state_store = matches!(config.source_type, SourceType::Online)
            .then(|| CrawlStateStore::new(&docs_root, infrastructure.min_fetch_interval_hours))
            .transpose()?;

        let concurrency = AdaptiveConcurrencyLimiter::new(
            crate::crawler::limiter::DEFAULT_MIN_LIMIT,
            infrastructure.max_concurrent_requests,
        );

        Ok(Arc::new_cyclic(|weak| Self {
            translator: UrlTranslator::new(&docs_root),
            docs_root,
            engine,
            indexer: Arc::new(indexer),
            state_store,
            fetch_metrics: Mutex::new(None),
            concurrency,
            scheduler: Mutex::new(None),
            active_segment: RwLock::new(None),
            self_weak: weak.clone(),
            config,
            infrastructure,
        }))
    }

    /// Tenant codename.
    #[must_use]
    pub fn codename(&self) -> &str {
        &self.config.codename
    }

    /// Tenant document root.
    #[must_use]
    pub fn docs_root(&self) -> &Path {
        &self.docs_root
    }

    /// Build the scheduler and warm the index.
    ///
    /// The scheduler auto-starts when the tenant has a refresh schedule or
    /// wants an initial sync; tenants without a usable source simply get
    /// no scheduler.
    pub fn initialize(&self, run_initial_sync: bool) -> Result<()> {
        if let Err(e) = self.reload_search_index() {
            debug!(error = %e, "No index to warm yet");
        }

        let Some(cycle) = self.build_sync_cycle()? else {
            info!(tenant = %self.config.codename, "No sync cycle for tenant");
            return Ok(());
        };

        let hook: Arc<dyn SyncObserver> = Arc::new(PostSyncIndexHook {
            runtime: self.self_weak.clone(),
        });
        let scheduler = Arc::new(Scheduler::new(
            cycle,
            vec![hook],
            self.config.refresh_schedule.as_deref(),
        )?);
        if scheduler.initialize(run_initial_sync) {
            *self
                .scheduler
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(scheduler);
        }
        Ok(())
    }

    fn build_sync_cycle(&self) -> Result<Option<Arc<dyn SyncCycle>>> {
        let offline = self.infrastructure.operation_mode == OperationMode::Offline;
        match self.config.source_type {
            SourceType::Filesystem => Ok(None),
            SourceType::Git => {
                let Some(repo_url) = self.config.git_repo_url.clone() else {
                    return Ok(None);
                };
                Ok(Some(Arc::new(GitSyncCycle {
                    codename: self.config.codename.clone(),
                    docs_root: self.docs_root.clone(),
                    repo_url,
                    branch: self.config.git_branch.clone(),
                    subpaths: self.config.git_subpaths.clone(),
                    strip_prefix: self.config.strip_prefix.clone(),
                    auth_token_env: self.config.auth_token_env.clone(),
                    offline,
                })))
            },
            SourceType::Online => {
                let Some(state_store) = self.state_store.clone() else {
                    return Ok(None);
                };
                let fetcher = DocFetcher::new(FetcherConfig {
                    http_timeout: Duration::from_secs(self.infrastructure.http_timeout),
                    markdown_mirror_suffix: self.config.markdown_mirror_suffix.clone(),
                    fallback: self.infrastructure.article_extractor_fallback.clone(),
                })?;
                *self
                    .fetch_metrics
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner) =
                    Some(fetcher.metrics());

                let start_urls = self
                    .config
                    .docs_entry_url
                    .clone()
                    .into_iter()
                    .collect::<Vec<_>>();
                let crawler = Arc::new(Crawler::new(
                    CrawlerConfig {
                        start_urls,
                        url_whitelist_prefixes: self.config.url_whitelist_prefixes.clone(),
                        url_blacklist_prefixes: self.config.url_blacklist_prefixes.clone(),
                        http_timeout: Duration::from_secs(self.infrastructure.http_timeout),
                        render_service_endpoint: self
                            .infrastructure
                            .render_service_endpoint
                            .clone(),
                        cookies_path: Some(self.docs_root.join(COOKIES_FILENAME)),
                        ..CrawlerConfig::default()
                    },
                    self.concurrency.clone(),
                    Arc::new(AdaptiveRateLimiter::new()),
                )?);

                Ok(Some(Arc::new(CrawlSyncCycle {
                    codename: self.config.codename.clone(),
                    docs_root: self.docs_root.clone(),
                    sitemap_url: self.config.docs_sitemap_url.clone(),
                    entry_url: self.config.docs_entry_url.clone(),
                    state_store,
                    fetcher,
                    crawler,
                    concurrency: self.concurrency.clone(),
                    offline,
                    event_retention_days: self.infrastructure.event_retention_days,
                })))
            },
        }
    }

    // ------------------------------------------------------------------
    // Index lifecycle

    /// Point the runtime at the manifest's latest segment.
    ///
    /// The previous segment's handle drops once in-flight readers
    /// release their clones; segment readers hold no long-lived file
    /// descriptors.
    pub fn reload_search_index(&self) -> Result<()> {
        let segment = self
            .indexer
            .store()
            .latest()?
            .ok_or_else(|| Error::Index("No segment available".to_string()))?;
        let doc_count = segment.doc_count;
        let mut active = self
            .active_segment
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let previous = active.replace(Arc::new(segment));
        drop(active);
        drop(previous);
        info!(tenant = %self.config.codename, doc_count, "Search index reloaded");
        Ok(())
    }

    fn active_segment(&self) -> Option<Arc<Segment>> {
        self.active_segment
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Lazily build and load the index when documents exist but no
    /// segment does.
    async fn ensure_index(&self) -> Option<Arc<Segment>> {
        if let Some(segment) = self.active_segment() {
            return Some(segment);
        }
        if self.reload_search_index().is_ok() {
            return self.active_segment();
        }

        let indexer = Arc::clone(&self.indexer);
        let build = tokio::task::spawn_blocking(move || {
            indexer.build_segment(&BuildOptions {
                persist: true,
                ..BuildOptions::default()
            })
        })
        .await;
        match build {
            Ok(Ok(report)) if !report.segment_ids.is_empty() => {
                if let Err(e) = self.reload_search_index() {
                    debug!(error = %e, "Lazy index build produced no loadable segment");
                }
            },
            Ok(Err(e)) => warn!(error = %e, "Lazy index build failed"),
            Err(e) => warn!(error = %e, "Lazy index build panicked"),
            _ => {},
        }
        self.active_segment()
    }

    /// Rebuild the segment and reload; called by the post-sync hook.
    /// Index failures leave the previous segment active.
    pub async fn rebuild_and_reload(&self) -> Result<()> {
        let indexer = Arc::clone(&self.indexer);
        let report = tokio::task::spawn_blocking(move || {
            indexer.build_segment(&BuildOptions {
                persist: true,
                ..BuildOptions::default()
            })
        })
        .await
        .map_err(|e| Error::Index(format!("Index build task failed: {e}")))??;

        debug!(
            indexed = report.documents_indexed,
            skipped = report.documents_skipped,
            "Post-sync index rebuild"
        );
        self.reload_search_index()
    }

    // ------------------------------------------------------------------
    // Tenant API

    /// BM25F search with sentence-aware snippets.
    ///
    /// `word_match` is carried into the trace but does not change
    /// ranking.
    #[instrument(skip(self), fields(tenant = %self.config.codename))]
    pub async fn search(
        &self,
        query: &str,
        max_results: usize,
        word_match: bool,
    ) -> SearchResponse {
        match self.search_inner(query, max_results, word_match).await {
            Ok(response) => response,
            Err(e) => SearchResponse {
                query: query.to_string(),
                error: Some(format!("Search failed: {e}")),
                ..SearchResponse::default()
            },
        }
    }

    async fn search_inner(
        &self,
        query: &str,
        max_results: usize,
        word_match: bool,
    ) -> Result<SearchResponse> {
        let Some(segment) = self.ensure_index().await else {
            return Ok(SearchResponse {
                query: query.to_string(),
                error: Some(format!(
                    "No search index available for {}",
                    self.config.codename
                )),
                ..SearchResponse::default()
            });
        };

        let engine = self.engine.clone();
        let query_tokens = engine.tokenize_query(query)?;
        if query_tokens.is_empty() {
            return Ok(SearchResponse {
                query: query.to_string(),
                ..SearchResponse::default()
            });
        }

        let snippet_config = self.config.search.snippet.clone();
        let analyzed = analyze_query(query, Some(&self.config.codename));
        let tokens_for_task = query_tokens.clone();
        let segment_for_task = Arc::clone(&segment);
        let ranked = tokio::task::spawn_blocking(move || {
            engine.score(&segment_for_task, &tokens_for_task, max_results)
        })
        .await
        .map_err(|e| Error::Index(format!("Scoring task failed: {e}")))??;

        let mut results = Vec::with_capacity(ranked.len());
        for hit in ranked {
            let stored = segment.get_document(&hit.doc_id)?.unwrap_or_default();
            let title = stored
                .get("title")
                .and_then(|v| v.as_str())
                .unwrap_or(&hit.doc_id)
                .to_string();
            let body = stored.get("body").and_then(|v| v.as_str()).unwrap_or("");
            let snippet = build_snippet(
                body,
                &query_tokens.ordered_terms,
                snippet_config.fragment_char_limit,
                snippet_config.surrounding_context(),
                snippet_config.resolved_style(),
            );

            results.push(SearchResult {
                url: hit.doc_id.clone(),
                title,
                snippet,
                score: hit.score,
                match_trace: MatchTrace {
                    stage: 1,
                    stage_name: "bm25f".to_string(),
                    query_variant: query_tokens.ordered_terms.join(" "),
                    match_reason: "bm25f ranked match".to_string(),
                    ripgrep_flags: String::new(),
                    ranking_factors: serde_json::json!({
                        "score": hit.score,
                        "word_match": word_match,
                        "base_term_count": query_tokens.base_term_count,
                        "keywords": analyzed.extracted_keywords,
                    }),
                },
            });
        }

        Ok(SearchResponse {
            total_results: results.len(),
            results,
            query: query.to_string(),
            error: None,
        })
    }

    /// Serve a document's markdown.
    pub async fn fetch(&self, uri: &str, context: FetchContext) -> FetchResponse {
        let path = self.resolve_document_path(uri);
        let Some(path) = path else {
            return FetchResponse {
                url: uri.to_string(),
                error: Some("Document not found".to_string()),
                ..FetchResponse::default()
            };
        };

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(_) => {
                return FetchResponse {
                    url: uri.to_string(),
                    error: Some("Document not found".to_string()),
                    ..FetchResponse::default()
                };
            },
        };

        let title = content
            .lines()
            .find_map(|line| line.strip_prefix("# "))
            .unwrap_or(uri)
            .trim()
            .to_string();

        let content = match context {
            FetchContext::Full => content,
            FetchContext::Surrounding => {
                if content.chars().count() > SURROUNDING_CONTEXT_CHARS {
                    let truncated: String =
                        content.chars().take(SURROUNDING_CONTEXT_CHARS).collect();
                    format!("{truncated}…")
                } else {
                    content
                }
            },
            FetchContext::None => String::new(),
        };

        FetchResponse {
            url: uri.to_string(),
            title,
            content,
            error: None,
        }
    }

    /// Resolve a URI to a file under `docs_root`: the hashed translation
    /// for URL-keyed tenants, or the relative path itself for tree-keyed
    /// ones.
    fn resolve_document_path(&self, uri: &str) -> Option<PathBuf> {
        if let Ok(path) = self.translator.markdown_path(uri) {
            if path.exists() {
                return Some(path);
            }
        }
        let relative = uri.trim_start_matches('/');
        if relative.contains("..") {
            return None;
        }
        let candidate = self.docs_root.join(relative);
        candidate.exists().then_some(candidate)
    }

    /// Browse the document tree.
    pub async fn browse_tree(&self, path: &str, depth: usize) -> BrowseTreeResponse {
        let depth = if depth == 0 {
            DEFAULT_BROWSE_DEPTH
        } else {
            depth.min(DEFAULT_BROWSE_DEPTH)
        };
        let relative = path.trim_matches('/');
        if relative.contains("..") {
            return BrowseTreeResponse {
                root_path: path.to_string(),
                depth,
                error: Some("Invalid path".to_string()),
                ..BrowseTreeResponse::default()
            };
        }
        let root = if relative.is_empty() {
            self.docs_root.clone()
        } else {
            self.docs_root.join(relative)
        };
        if !root.is_dir() {
            return BrowseTreeResponse {
                root_path: path.to_string(),
                depth,
                error: Some("Path not found".to_string()),
                ..BrowseTreeResponse::default()
            };
        }

        BrowseTreeResponse {
            root_path: path.to_string(),
            depth,
            nodes: browse_dir(&root, depth),
            error: None,
        }
    }

    /// Start a sync now. `success` reflects admission, not completion.
    pub fn trigger_sync(&self, _force_crawler: bool, force_full_sync: bool) -> TriggerResponse {
        let scheduler = self
            .scheduler
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        match scheduler {
            Some(scheduler) => scheduler.trigger_sync(force_full_sync),
            None => TriggerResponse {
                success: false,
                message: "no scheduler for tenant".to_string(),
            },
        }
    }

    /// Scheduler + ingestion status for `sync/status`.
    pub fn sync_status(&self) -> serde_json::Value {
        let scheduler = self
            .scheduler
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        let stats = scheduler.as_ref().map(|s| s.stats());
        let snapshot = self
            .state_store
            .as_ref()
            .and_then(|store| store.get_status_snapshot().ok());
        let fetch_metrics = self
            .fetch_metrics
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_ref()
            .map(|m| m.snapshot());

        serde_json::json!({
            "scheduler_initialized": stats.as_ref().is_some_and(|s| s.is_initialized),
            "scheduler_running": stats.as_ref().is_some_and(|s| s.running),
            "stats": {
                "mode": stats.as_ref().map(|s| s.mode.clone()),
                "sync_count": stats.as_ref().map_or(0, |s| s.sync_count),
                "errors": stats.as_ref().map_or(0, |s| s.errors),
                "queue_depth": snapshot.as_ref().map_or(0, |s| s.queue_depth),
                "metadata_total_urls": snapshot.as_ref().map_or(0, |s| s.metadata_total_urls),
                "metadata_successful": snapshot.as_ref().map_or(0, |s| s.metadata_successful),
                "metadata_pending": snapshot.as_ref().map_or(0, |s| s.metadata_pending),
                "metadata_due_urls": snapshot.as_ref().map_or(0, |s| s.metadata_due_urls),
                "failed_url_count": snapshot.as_ref().map_or(0, |s| s.failed_url_count),
                "fetch_metrics": fetch_metrics,
                "concurrency": self.concurrency.snapshot(),
            },
        })
    }

    /// Aggregated tenant health.
    pub fn health(&self) -> TenantHealth {
        let scheduler = self
            .scheduler
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        let stats = scheduler.as_ref().map(|s| s.stats());
        let document_count = self.active_segment().map_or(0, |s| s.doc_count);
        let status = if document_count > 0 {
            "healthy"
        } else if stats.as_ref().is_some_and(|s| s.errors > 0) {
            "degraded"
        } else {
            "indexing"
        };

        TenantHealth {
            codename: self.config.codename.clone(),
            status: status.to_string(),
            document_count,
            source_type: self.config.source_type,
            last_sync_at: stats.as_ref().and_then(|s| s.last_sync_at),
            scheduler: stats,
            fetch_metrics: self
                .fetch_metrics
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .as_ref()
                .map(|m| m.snapshot()),
        }
    }

    /// Stop the scheduler and release the active segment.
    pub async fn shutdown(&self) {
        let scheduler = self
            .scheduler
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(scheduler) = scheduler {
            scheduler.stop().await;
        }
        self.active_segment
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        info!(tenant = %self.config.codename, "Tenant runtime shut down");
    }
}

/// Post-sync hook: rebuild the index and swap the active segment.
struct PostSyncIndexHook {
    runtime: Weak<TenantRuntime>,
}

#[async_trait]
impl SyncObserver for PostSyncIndexHook {
    async fn on_sync_complete(&self, outcome: &SyncOutcome) -> Result<()> {
        let Some(runtime) = self.runtime.upgrade() else {
            return Ok(());
        };
        debug!(
            tenant = %runtime.config.codename,
            documents = outcome.documents_processed,
            "Rebuilding index after sync"
        );
        runtime.rebuild_and_reload().await
    }
}

/// True for the hash-named markdown files of URL-keyed tenants.
fn is_hashed_markdown(name: &str) -> bool {
    name.strip_suffix(".md")
        .is_some_and(|stem| stem.len() == 64 && stem.chars().all(|c| c.is_ascii_hexdigit()))
}

fn is_hidden_entry(name: &str) -> bool {
    name == METADATA_DIR
        || name == SEGMENTS_DIR
        || name.starts_with(STAGING_PREFIX)
        || name.starts_with('.')
}

/// Recursively collect visible browse nodes; directories without visible
/// children are hidden.
fn browse_dir(dir: &Path, depth: usize) -> Vec<BrowseNode> {
    if depth == 0 {
        return Vec::new();
    }
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut nodes = Vec::new();
    let mut sorted: Vec<_> = entries.filter_map(std::result::Result::ok).collect();
    sorted.sort_by_key(std::fs::DirEntry::file_name);

    for entry in sorted {
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_hidden_entry(&name) || is_hashed_markdown(&name) {
            continue;
        }
        let path = entry.path();
        if path.is_dir() {
            let children = browse_dir(&path, depth - 1);
            let has_children = if depth > 1 {
                !children.is_empty()
            } else {
                dir_has_visible_children(&path)
            };
            if !has_children {
                continue;
            }
            nodes.push(BrowseNode {
                name,
                title: None,
                url: None,
                has_children,
                children: (depth > 1).then_some(children),
            });
        } else if name.ends_with(".md") {
            let title = fs::read_to_string(&path).ok().and_then(|content| {
                content
                    .lines()
                    .find_map(|line| line.strip_prefix("# ").map(|t| t.trim().to_string()))
            });
            nodes.push(BrowseNode {
                name,
                title,
                url: None,
                has_children: false,
                children: None,
            });
        }
    }
    nodes
}

fn dir_has_visible_children(dir: &Path) -> bool {
    let Ok(entries) = fs::read_dir(dir) else {
        return false;
    };
    for entry in entries.filter_map(std::result::Result::ok) {
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_hidden_entry(&name) || is_hashed_markdown(&name) {
            continue;
        }
        let path = entry.path();
        if path.is_dir() {
            if dir_has_visible_children(&path) {
                return true;
            }
        } else if name.ends_with(".md") {
            return true;
        }
    }
    false
}
