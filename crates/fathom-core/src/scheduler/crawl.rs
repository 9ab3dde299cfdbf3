//! The online sync cycle: discovery, progressive enqueue, and a fetch
//! pool draining the queue under adaptive concurrency.
//!
//! Discovery (sitemap parse or seed crawl) and the fetch pool run
//! concurrently: URLs are enqueued as they are discovered and workers
//! start pulling before discovery finishes. Every fetched document is
//! committed through its own unit of work, so a crash mid-sync never
//! leaves a half-written document.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::crawler::sitemap::fetch_sitemap;
use crate::crawler::{AdaptiveConcurrencyLimiter, Crawler};
use crate::fetcher::DocFetcher;
use crate::scheduler::{SyncCycle, SyncOutcome};
use crate::state_store::{CrawlStateStore, SyncProgress};
use crate::unit_of_work::{sweep_stale_staging, UnitOfWork, DEFAULT_STAGING_MAX_AGE};
use crate::url_translator::normalize_url;
use crate::{Error, Result};

/// Name of the cooperative lock guarding writes to `docs_root`.
const CRAWL_LOCK: &str = "crawl";

/// Lock TTL; a crashed sync can be taken over after this.
const CRAWL_LOCK_TTL_SECS: u64 = 60 * 60;

/// Idle sleep while waiting for discovery to produce more URLs.
const DRAIN_IDLE_SLEEP: Duration = Duration::from_millis(200);

/// Everything a crawl cycle needs, assembled by the tenant runtime.
pub struct CrawlSyncCycle {
    /// Tenant codename, for logging and lock ownership.
    pub codename: String,
    /// Tenant document root.
    pub docs_root: PathBuf,
    /// Sitemap URL, preferred discovery source.
    pub sitemap_url: Option<String>,
    /// Entry URL for seed crawls when no sitemap exists.
    pub entry_url: Option<String>,
    /// Per-tenant crawl state.
    pub state_store: CrawlStateStore,
    /// Per-URL fetcher.
    pub fetcher: DocFetcher,
    /// Seed crawler for entry-URL discovery.
    pub crawler: Arc<Crawler>,
    /// Shared concurrency limiter for the fetch pool.
    pub concurrency: AdaptiveConcurrencyLimiter,
    /// Offline mode: never start a network sync.
    pub offline: bool,
    /// Event retention applied during maintenance.
    pub event_retention_days: u32,
}

#[async_trait]
impl SyncCycle for CrawlSyncCycle {
    fn mode(&self) -> &'static str {
        "crawl"
    }

    fn enabled(&self) -> bool {
        !self.offline && (self.sitemap_url.is_some() || self.entry_url.is_some())
    }

    #[instrument(skip(self), fields(tenant = %self.codename))]
    async fn run(&self, force_full: bool) -> Result<SyncOutcome> {
        let owner = format!("{}-{}", self.codename, Uuid::new_v4());
        let (lease, holder) =
            self.state_store
                .try_acquire_lock(CRAWL_LOCK, &owner, CRAWL_LOCK_TTL_SECS)?;
        let Some(lease) = lease else {
            let holder = holder.unwrap_or_else(|| "unknown".to_string());
            warn!(holder, "Crawl lock held; skipping sync");
            return Ok(SyncOutcome {
                mode: self.mode().to_string(),
                warnings: vec![format!("crawl lock held by {holder}")],
                ..SyncOutcome::default()
            });
        };

        let result = self.run_locked(force_full).await;
        if let Err(e) = self.state_store.release_lock(&lease) {
            warn!(error = %e, "Failed to release crawl lock");
        }
        result
    }
}

impl CrawlSyncCycle {
    async fn run_locked(&self, force_full: bool) -> Result<SyncOutcome> {
        self.state_store.cleanup_legacy_artifacts()?;
        sweep_stale_staging(&self.docs_root, DEFAULT_STAGING_MAX_AGE)?;

        self.state_store.save_sync_progress(&SyncProgress {
            phase: "discovery".to_string(),
            started_at: Some(Utc::now().to_rfc3339()),
            ..SyncProgress::default()
        })?;

        if force_full {
            let requeued = self.state_store.requeue_failed_urls()?;
            debug!(requeued, "Requeued previously failed URLs");
        }

        let discovered = Arc::new(AtomicU64::new(0));
        let processed = Arc::new(AtomicU64::new(0));
        let errors = Arc::new(AtomicU64::new(0));
        let discovery_done = Arc::new(AtomicBool::new(false));

        let discovery = self.discover(force_full, &discovered, &discovery_done);
        let drain = self.drain_queue(&processed, &errors, &discovery_done);
        let (discovery_result, ()) = tokio::join!(discovery, drain);
        if let Err(e) = discovery_result {
            // Fetching what was discovered so far already happened; the
            // failure still fails the cycle so the scheduler backs off.
            errors.fetch_add(1, Ordering::Relaxed);
            self.save_final_progress(&discovered, &processed, &errors)?;
            return Err(e);
        }

        if let Err(e) = self.state_store.maintenance(self.event_retention_days) {
            warn!(error = %e, "Event maintenance failed");
        }
        self.save_final_progress(&discovered, &processed, &errors)?;

        Ok(SyncOutcome {
            mode: self.mode().to_string(),
            documents_processed: processed.load(Ordering::Relaxed),
            errors: errors.load(Ordering::Relaxed),
            ..SyncOutcome::default()
        })
    }

    fn save_final_progress(
        &self,
        discovered: &AtomicU64,
        processed: &AtomicU64,
        errors: &AtomicU64,
    ) -> Result<()> {
        self.state_store.save_sync_progress(&SyncProgress {
            phase: "done".to_string(),
            discovered: discovered.load(Ordering::Relaxed),
            processed: processed.load(Ordering::Relaxed),
            errors: errors.load(Ordering::Relaxed),
            started_at: None,
        })
    }

    /// Sitemap or seed-crawl discovery with progressive enqueue.
    async fn discover(
        &self,
        force_full: bool,
        discovered: &Arc<AtomicU64>,
        discovery_done: &Arc<AtomicBool>,
    ) -> Result<()> {
        let result = self.discover_inner(force_full, discovered).await;
        discovery_done.store(true, Ordering::SeqCst);
        result
    }

    async fn discover_inner(
        &self,
        force_full: bool,
        discovered: &Arc<AtomicU64>,
    ) -> Result<()> {
        if let Some(sitemap_url) = &self.sitemap_url {
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .user_agent(concat!("fathom/", env!("CARGO_PKG_VERSION")))
                .build()
                .map_err(Error::Network)?;
            let entries = fetch_sitemap(&client, sitemap_url).await?;
            info!(count = entries.len(), "Sitemap discovery complete");
            for entry in entries {
                let Ok(normalized) = normalize_url(&entry.url) else {
                    continue;
                };
                if !self.crawler.should_process_url(&normalized) {
                    continue;
                }
                let enqueued = self.state_store.enqueue_urls(
                    &[normalized.clone()],
                    "sitemap",
                    0,
                    force_full,
                )?;
                if enqueued > 0 {
                    discovered.fetch_add(1, Ordering::Relaxed);
                    self.state_store.record_event(
                        &normalized,
                        "crawl_discovered",
                        Some("ok"),
                        Some("sitemap"),
                        None,
                        None,
                    )?;
                }
            }
            return Ok(());
        }

        if self.entry_url.is_some() {
            let store = self.state_store.clone();
            let discovered = Arc::clone(discovered);
            self.crawler
                .crawl(move |url| {
                    match store.enqueue_urls(&[url.to_string()], "discovered", 0, force_full) {
                        Ok(n) if n > 0 => {
                            discovered.fetch_add(1, Ordering::Relaxed);
                            let _ = store.record_event(
                                url,
                                "crawl_discovered",
                                Some("ok"),
                                Some("crawl"),
                                None,
                                None,
                            );
                        },
                        Ok(_) => {},
                        Err(e) => warn!(url, error = %e, "Failed to enqueue discovered URL"),
                    }
                })
                .await?;
            return Ok(());
        }

        Err(Error::Config(format!(
            "Tenant '{}' has no discovery source",
            self.codename
        )))
    }

    /// Drain the queue until discovery is done and the queue is empty.
    async fn drain_queue(
        &self,
        processed: &Arc<AtomicU64>,
        errors: &Arc<AtomicU64>,
        discovery_done: &Arc<AtomicBool>,
    ) {
        loop {
            let batch_size = self.concurrency.snapshot().current_limit.max(1);
            let batch = match self.state_store.dequeue_batch(batch_size) {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(error = %e, "Dequeue failed");
                    errors.fetch_add(1, Ordering::Relaxed);
                    break;
                },
            };

            if batch.is_empty() {
                if discovery_done.load(Ordering::SeqCst) {
                    break;
                }
                tokio::time::sleep(DRAIN_IDLE_SLEEP).await;
                continue;
            }

            let workers = batch.into_iter().map(|url| async move {
                let _permit = self.concurrency.acquire().await;
                self.process_url(&url).await
            });
            for outcome in futures::future::join_all(workers).await {
                match outcome {
                    Ok(()) => {
                        processed.fetch_add(1, Ordering::Relaxed);
                        self.concurrency.record_success();
                    },
                    Err(_) => {
                        errors.fetch_add(1, Ordering::Relaxed);
                    },
                }
            }
        }
    }

    /// Fetch one URL and commit it through a unit of work.
    ///
    /// File writes and SQLite bookkeeping run on the blocking pool so the
    /// fetch workers never stall the event loop.
    async fn process_url(&self, url: &str) -> Result<()> {
        let started = std::time::Instant::now();
        let store = self.state_store.clone();
        let url_owned = url.to_string();

        match self.fetcher.fetch(url).await {
            Ok(document) => {
                let docs_root = self.docs_root.clone();
                tokio::task::spawn_blocking(move || -> Result<()> {
                    let mut uow = UnitOfWork::begin(&docs_root)?;
                    let rel_path = uow.relative_markdown_path(&document.url)?;
                    uow.add_document(&document)?;
                    uow.commit()?;

                    store.record_fetch_success(&url_owned, &rel_path.to_string_lossy())?;
                    store.record_event(
                        &url_owned,
                        "fetch_success",
                        Some("ok"),
                        None,
                        None,
                        Some(i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX)),
                    )
                })
                .await
                .map_err(|e| Error::Storage(format!("Commit task failed: {e}")))?
            },
            Err(e) => {
                let reason = e.failure_reason();
                if reason == "status=429" {
                    self.concurrency.record_rate_limited();
                }
                tokio::task::spawn_blocking(move || -> Result<()> {
                    store.record_fetch_failure(&url_owned, &reason)?;
                    store.record_event(
                        &url_owned,
                        "fetch_failure",
                        Some("failed"),
                        Some(&reason),
                        None,
                        Some(i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX)),
                    )
                })
                .await
                .map_err(|e| Error::Storage(format!("Bookkeeping task failed: {e}")))??;
                Err(e)
            },
        }
    }
}
