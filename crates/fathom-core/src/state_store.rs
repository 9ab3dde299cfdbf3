//! SQLite-backed crawl state: URL metadata, the pending queue, the event
//! log, checkpoints, and cooperative lock leases.
//!
//! One database per tenant. All mutations run in short transactions;
//! readers use query-only connections. The connect helper is self-healing:
//! it creates missing parent directories and retries transient SQLite
//! errors a bounded number of times before escalating to
//! [`Error::DatabaseCritical`].
//!
//! Callers on the async runtime wrap these methods in
//! `tokio::task::spawn_blocking`; connections are opened per operation so
//! the store is freely cloneable across tasks.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::url_translator::normalize_url;
use crate::{Error, Result};

/// Database filename inside the tenant directory.
pub const STATE_DB_FILENAME: &str = ".crawl_state.sqlite";

/// Bounded retry budget for opening the database.
const MAX_CONNECT_RETRIES: u32 = 3;

/// Sleep between connect retries.
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Pre-SQLite scheduler metadata directory, removed on sight.
const LEGACY_META_DIR: &str = "__scheduler_meta";

/// Per-URL fetch outcome recorded in metadata and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    /// Known but not yet fetched.
    Pending,
    /// Last fetch succeeded.
    Success,
    /// Last fetch failed.
    Failed,
}

impl FetchStatus {
    /// Stable string form stored in the database.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// The crawler's per-URL state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UrlMetadataRecord {
    /// Original URL as discovered.
    pub url: String,
    /// When the URL was first seen.
    pub first_seen_at: Option<DateTime<Utc>>,
    /// Last successful or attempted fetch time.
    pub last_fetched_at: Option<DateTime<Utc>>,
    /// Last failure time.
    pub last_failure_at: Option<DateTime<Utc>>,
    /// Last fetch outcome.
    pub last_status: Option<FetchStatus>,
    /// Earliest time the URL is due again.
    pub next_due_at: Option<DateTime<Utc>>,
    /// Consecutive failure count.
    pub retry_count: u32,
    /// Reason string from the last failure.
    pub last_failure_reason: Option<String>,
    /// Relative path of the stored markdown, once fetched.
    pub markdown_rel_path: Option<String>,
}

/// A cooperative lock held inside the state store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLease {
    /// Lock name (e.g. `crawl`).
    pub name: String,
    /// Owner token.
    pub owner: String,
    /// Acquisition time.
    pub acquired_at: DateTime<Utc>,
    /// TTL expiry; the lock can be taken over after this.
    pub expires_at: DateTime<Utc>,
}

/// One event log row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Event time.
    pub event_at: String,
    /// Canonical URL the event concerns.
    pub canonical_url: String,
    /// Original URL.
    pub url: String,
    /// Event type (`fetch_success`, `fetch_failure`, `crawl_discovered`, ...).
    pub event_type: String,
    /// Status label.
    pub status: Option<String>,
    /// Failure reason, when applicable.
    pub reason: Option<String>,
    /// Free-form detail.
    pub detail: Option<String>,
    /// Operation duration in milliseconds.
    pub duration_ms: Option<i64>,
}

/// Aggregated event history over a recent window.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EventHistory {
    /// Events inside the window.
    pub total_events: u64,
    /// Count per status label.
    pub status_counts: BTreeMap<String, u64>,
    /// Count per event type.
    pub type_counts: BTreeMap<String, u64>,
    /// Count per time bucket (bucket start, RFC 3339).
    pub buckets: BTreeMap<String, u64>,
}

/// Filters for the raw event log.
#[derive(Debug, Clone, Default)]
pub struct EventLogFilter {
    /// Only events with this status.
    pub status: Option<String>,
    /// Only events of this type.
    pub event_type: Option<String>,
    /// Only events whose URL contains this substring.
    pub url_contains: Option<String>,
    /// Result cap; defaults to 100.
    pub limit: Option<usize>,
}

/// Aggregate counters surfaced in `sync/status`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusSnapshot {
    /// Total tracked URLs.
    pub metadata_total_urls: u64,
    /// URLs whose last fetch succeeded.
    pub metadata_successful: u64,
    /// URLs never fetched successfully or pending.
    pub metadata_pending: u64,
    /// URLs whose `next_due_at` has passed.
    pub metadata_due_urls: u64,
    /// URLs whose last fetch failed.
    pub failed_url_count: u64,
    /// Pending queue depth.
    pub queue_depth: u64,
    /// Earliest `first_seen_at` across the corpus.
    pub metadata_first_seen_at: Option<String>,
    /// Most recent successful fetch time.
    pub metadata_last_success_at: Option<String>,
}

/// Per-tenant resumable sync progress, persisted as a checkpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncProgress {
    /// Current phase (`discovery`, `fetch`, `index`, `done`).
    pub phase: String,
    /// URLs discovered so far.
    pub discovered: u64,
    /// URLs processed so far.
    pub processed: u64,
    /// Errors encountered.
    pub errors: u64,
    /// Run start time (RFC 3339).
    pub started_at: Option<String>,
}

const SYNC_PROGRESS_KEY: &str = "sync_progress";

/// SQLite-backed store for a tenant's crawl state.
#[derive(Debug, Clone)]
pub struct CrawlStateStore {
    db_root: PathBuf,
    db_path: PathBuf,
    min_fetch_interval_hours: u64,
}

impl CrawlStateStore {
    /// Open (creating if needed) the state store under `db_root`.
    pub fn new(db_root: impl Into<PathBuf>, min_fetch_interval_hours: u64) -> Result<Self> {
        let db_root = db_root.into();
        let db_path = db_root.join(STATE_DB_FILENAME);
        let store = Self {
            db_root,
            db_path,
            min_fetch_interval_hours,
        };
        store.init_schema()?;
        Ok(store)
    }

    /// The directory the database lives in.
    #[must_use]
    pub fn db_root(&self) -> &Path {
        &self.db_root
    }

    /// Path to the database file.
    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Self-healing connect: creates the parent directory when missing and
    /// retries transient open failures before escalating.
    fn connect(&self, read_only: bool) -> Result<Connection> {
        let mut last_error: Option<rusqlite::Error> = None;
        for attempt in 0..MAX_CONNECT_RETRIES {
            if !self.db_root.exists() {
                if let Err(e) = fs::create_dir_all(&self.db_root) {
                    warn!(error = %e, "Failed to create state store directory");
                }
            }
            match Connection::open(&self.db_path) {
                Ok(conn) => {
                    conn.busy_timeout(Duration::from_secs(5))?;
                    conn.execute_batch(
                        "PRAGMA journal_mode = WAL;
                         PRAGMA synchronous = NORMAL;",
                    )?;
                    if read_only {
                        conn.execute_batch("PRAGMA query_only = ON;")?;
                    }
                    return Ok(conn);
                },
                Err(e) => {
                    debug!(attempt, error = %e, "State store connect failed");
                    last_error = Some(e);
                    if attempt + 1 < MAX_CONNECT_RETRIES {
                        std::thread::sleep(CONNECT_RETRY_DELAY);
                    }
                },
            }
        }
        let detail = last_error.map_or_else(String::new, |e| e.to_string());
        Err(Error::DatabaseCritical(format!(
            "Failed to open state store after {MAX_CONNECT_RETRIES} attempts: {detail}"
        )))
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.connect(false)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS url_metadata (
                 canonical_url TEXT PRIMARY KEY,
                 url TEXT NOT NULL,
                 first_seen_at TEXT,
                 last_fetched_at TEXT,
                 last_failure_at TEXT,
                 last_status TEXT,
                 next_due_at TEXT,
                 retry_count INTEGER NOT NULL DEFAULT 0,
                 last_failure_reason TEXT,
                 markdown_rel_path TEXT
             );
             CREATE TABLE IF NOT EXISTS crawl_queue (
                 canonical_url TEXT PRIMARY KEY,
                 url TEXT NOT NULL,
                 priority INTEGER NOT NULL DEFAULT 0,
                 reason TEXT,
                 enqueued_at TEXT NOT NULL,
                 force INTEGER NOT NULL DEFAULT 0
             );
             CREATE TABLE IF NOT EXISTS crawl_events (
                 event_at TEXT NOT NULL,
                 canonical_url TEXT,
                 url TEXT,
                 event_type TEXT NOT NULL,
                 status TEXT,
                 reason TEXT,
                 detail TEXT,
                 duration_ms INTEGER
             );
             CREATE INDEX IF NOT EXISTS idx_crawl_events_at
                 ON crawl_events(event_at);
             CREATE TABLE IF NOT EXISTS crawl_checkpoints (
                 key TEXT PRIMARY KEY,
                 value_json TEXT NOT NULL,
                 updated_at TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS crawl_checkpoint_history (
                 key TEXT NOT NULL,
                 value_json TEXT NOT NULL,
                 updated_at TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS crawl_locks (
                 name TEXT PRIMARY KEY,
                 owner TEXT NOT NULL,
                 acquired_at TEXT NOT NULL,
                 expires_at TEXT NOT NULL
             );",
        )?;
        Ok(())
    }

    /// Remove artifacts from the pre-SQLite scheduler layout.
    pub fn cleanup_legacy_artifacts(&self) -> Result<()> {
        let legacy = self.db_root.join(LEGACY_META_DIR);
        if legacy.exists() {
            fs::remove_dir_all(&legacy)
                .map_err(|e| Error::Storage(format!("Failed to remove legacy metadata: {e}")))?;
            debug!(path = %legacy.display(), "Removed legacy scheduler metadata");
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // URL metadata

    /// Merge-update a URL's metadata row, creating it when absent.
    ///
    /// Only `Some` fields overwrite existing values; `first_seen_at`
    /// defaults to now on first insert.
    pub fn upsert_url_metadata(&self, update: &UrlMetadataRecord) -> Result<()> {
        let canonical = normalize_url(&update.url)?;
        let conn = self.connect(false)?;
        let existing = Self::load_row(&conn, &canonical)?;

        let mut merged = existing.unwrap_or_else(|| UrlMetadataRecord {
            url: update.url.clone(),
            first_seen_at: Some(Utc::now()),
            ..UrlMetadataRecord::default()
        });
        merged.url = update.url.clone();
        if update.first_seen_at.is_some() {
            merged.first_seen_at = update.first_seen_at;
        }
        if update.last_fetched_at.is_some() {
            merged.last_fetched_at = update.last_fetched_at;
        }
        if update.last_failure_at.is_some() {
            merged.last_failure_at = update.last_failure_at;
        }
        if update.last_status.is_some() {
            merged.last_status = update.last_status;
        }
        if update.next_due_at.is_some() {
            merged.next_due_at = update.next_due_at;
        }
        if update.retry_count > 0 {
            merged.retry_count = update.retry_count;
        }
        if update.last_failure_reason.is_some() {
            merged.last_failure_reason = update.last_failure_reason.clone();
        }
        if update.markdown_rel_path.is_some() {
            merged.markdown_rel_path = update.markdown_rel_path.clone();
        }

        conn.execute(
            "INSERT OR REPLACE INTO url_metadata
             (canonical_url, url, first_seen_at, last_fetched_at, last_failure_at,
              last_status, next_due_at, retry_count, last_failure_reason, markdown_rel_path)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                canonical,
                merged.url,
                merged.first_seen_at.map(|t| t.to_rfc3339()),
                merged.last_fetched_at.map(|t| t.to_rfc3339()),
                merged.last_failure_at.map(|t| t.to_rfc3339()),
                merged.last_status.map(FetchStatus::as_str),
                merged.next_due_at.map(|t| t.to_rfc3339()),
                merged.retry_count,
                merged.last_failure_reason,
                merged.markdown_rel_path,
            ],
        )?;
        Ok(())
    }

    fn load_row(conn: &Connection, canonical: &str) -> Result<Option<UrlMetadataRecord>> {
        let mut stmt = conn.prepare(
            "SELECT url, first_seen_at, last_fetched_at, last_failure_at, last_status,
                    next_due_at, retry_count, last_failure_reason, markdown_rel_path
             FROM url_metadata WHERE canonical_url = ?1",
        )?;
        let record = stmt
            .query_row(params![canonical], |row| {
                Ok(UrlMetadataRecord {
                    url: row.get(0)?,
                    first_seen_at: parse_time(row.get::<_, Option<String>>(1)?),
                    last_fetched_at: parse_time(row.get::<_, Option<String>>(2)?),
                    last_failure_at: parse_time(row.get::<_, Option<String>>(3)?),
                    last_status: row
                        .get::<_, Option<String>>(4)?
                        .as_deref()
                        .and_then(FetchStatus::parse),
                    next_due_at: parse_time(row.get::<_, Option<String>>(5)?),
                    retry_count: row.get(6)?,
                    last_failure_reason: row.get(7)?,
                    markdown_rel_path: row.get(8)?,
                })
            })
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(record)
    }

    /// Load a URL's metadata record.
    pub fn load_url_metadata(&self, url: &str) -> Result<Option<UrlMetadataRecord>> {
        let canonical = normalize_url(url)?;
        let conn = self.connect(true)?;
        Self::load_row(&conn, &canonical)
    }

    /// True iff the URL's last fetch succeeded within the interval.
    pub fn was_recently_fetched(&self, url: &str, interval_hours: u64) -> Result<bool> {
        let Some(record) = self.load_url_metadata(url)? else {
            return Ok(false);
        };
        if record.last_status != Some(FetchStatus::Success) {
            return Ok(false);
        }
        let Some(fetched_at) = record.last_fetched_at else {
            return Ok(false);
        };
        let age = Utc::now().signed_duration_since(fetched_at);
        Ok(age < chrono::Duration::hours(i64::try_from(interval_hours).unwrap_or(i64::MAX)))
    }

    /// Record a successful fetch, pointing metadata at the stored
    /// markdown.
    pub fn record_fetch_success(&self, url: &str, markdown_rel_path: &str) -> Result<()> {
        let now = Utc::now();
        self.upsert_url_metadata(&UrlMetadataRecord {
            url: url.to_string(),
            last_fetched_at: Some(now),
            last_status: Some(FetchStatus::Success),
            next_due_at: Some(
                now + chrono::Duration::hours(
                    i64::try_from(self.min_fetch_interval_hours).unwrap_or(4),
                ),
            ),
            markdown_rel_path: Some(markdown_rel_path.to_string()),
            ..UrlMetadataRecord::default()
        })?;
        // A success also clears the failure counters.
        let canonical = normalize_url(url)?;
        let conn = self.connect(false)?;
        conn.execute(
            "UPDATE url_metadata SET retry_count = 0, last_failure_reason = NULL
             WHERE canonical_url = ?1",
            params![canonical],
        )?;
        Ok(())
    }

    /// Record a failed fetch, bumping the retry counter.
    pub fn record_fetch_failure(&self, url: &str, reason: &str) -> Result<()> {
        let canonical = normalize_url(url)?;
        let now = Utc::now();
        let retry_count = self
            .load_url_metadata(url)?
            .map_or(0, |r| r.retry_count)
            .saturating_add(1);
        self.upsert_url_metadata(&UrlMetadataRecord {
            url: url.to_string(),
            last_failure_at: Some(now),
            last_status: Some(FetchStatus::Failed),
            retry_count,
            last_failure_reason: Some(reason.to_string()),
            // Exponential backoff on the due time, capped at a day.
            next_due_at: Some(
                now + chrono::Duration::minutes(
                    (15_i64 << retry_count.min(6)).min(24 * 60),
                ),
            ),
            ..UrlMetadataRecord::default()
        })?;
        debug!(url = %canonical, reason, retry_count, "Fetch failure recorded");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queue

    /// Enqueue URLs for fetching.
    ///
    /// URLs successfully fetched within the configured min-fetch interval
    /// are skipped unless `force` is set. The queue holds at most one
    /// entry per canonical URL. Returns the number actually enqueued.
    pub fn enqueue_urls(
        &self,
        urls: &[String],
        reason: &str,
        priority: i64,
        force: bool,
    ) -> Result<usize> {
        let now = Utc::now().to_rfc3339();
        let mut enqueued = 0;
        for url in urls {
            let canonical = match normalize_url(url) {
                Ok(c) => c,
                Err(e) => {
                    warn!(url, error = %e, "Skipping unparseable URL");
                    continue;
                },
            };

            // Metadata row exists for every URL we have ever seen.
            if self.load_url_metadata(url)?.is_none() {
                self.upsert_url_metadata(&UrlMetadataRecord {
                    url: url.clone(),
                    last_status: Some(FetchStatus::Pending),
                    next_due_at: Some(Utc::now()),
                    ..UrlMetadataRecord::default()
                })?;
            }

            if !force && self.was_recently_fetched(url, self.min_fetch_interval_hours)? {
                continue;
            }

            let conn = self.connect(false)?;
            conn.execute(
                "INSERT OR REPLACE INTO crawl_queue
                 (canonical_url, url, priority, reason, enqueued_at, force)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![canonical, url, priority, reason, now, i64::from(force)],
            )?;
            enqueued += 1;
        }
        Ok(enqueued)
    }

    /// Remove and return up to `n` queued URLs ordered by
    /// `priority DESC, enqueued_at ASC`.
    pub fn dequeue_batch(&self, n: usize) -> Result<Vec<String>> {
        let conn = self.connect(false)?;
        let tx = conn.unchecked_transaction()?;
        let urls: Vec<(String, String)> = {
            let mut stmt = tx.prepare(
                "SELECT canonical_url, url FROM crawl_queue
                 ORDER BY priority DESC, enqueued_at ASC
                 LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![i64::try_from(n).unwrap_or(i64::MAX)], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };
        for (canonical, _) in &urls {
            tx.execute(
                "DELETE FROM crawl_queue WHERE canonical_url = ?1",
                params![canonical],
            )?;
        }
        tx.commit()?;
        Ok(urls.into_iter().map(|(_, url)| url).collect())
    }

    /// Current queue depth.
    pub fn queue_depth(&self) -> Result<u64> {
        let conn = self.connect(true)?;
        let depth: i64 = conn.query_row("SELECT COUNT(*) FROM crawl_queue", [], |row| row.get(0))?;
        Ok(u64::try_from(depth).unwrap_or(0))
    }

    /// Re-enqueue every URL whose last fetch failed. Returns the count.
    pub fn requeue_failed_urls(&self) -> Result<usize> {
        let failed: Vec<String> = {
            let conn = self.connect(true)?;
            let mut stmt = conn.prepare(
                "SELECT url FROM url_metadata WHERE last_status = 'failed'",
            )?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };
        self.enqueue_urls(&failed, "retry", 0, true)
    }

    /// Empty the queue, recording a `queue_cleared` event. Returns the
    /// number of removed entries.
    pub fn clear_queue(&self, reason: &str) -> Result<usize> {
        let conn = self.connect(false)?;
        let removed = conn.execute("DELETE FROM crawl_queue", [])?;
        drop(conn);
        self.record_event(
            "",
            "queue_cleared",
            Some("ok"),
            Some(reason),
            None,
            None,
        )?;
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Events

    /// Append an event row.
    pub fn record_event(
        &self,
        url: &str,
        event_type: &str,
        status: Option<&str>,
        reason: Option<&str>,
        detail: Option<&str>,
        duration_ms: Option<i64>,
    ) -> Result<()> {
        let canonical = if url.is_empty() {
            String::new()
        } else {
            normalize_url(url).unwrap_or_else(|_| url.to_string())
        };
        let conn = self.connect(false)?;
        conn.execute(
            "INSERT INTO crawl_events
             (event_at, canonical_url, url, event_type, status, reason, detail, duration_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                Utc::now().to_rfc3339(),
                canonical,
                url,
                event_type,
                status,
                reason,
                detail,
                duration_ms,
            ],
        )?;
        Ok(())
    }

    /// Aggregate events within the window into status, type, and time
    /// bucket counts.
    pub fn get_event_history(&self, minutes: i64, bucket_seconds: i64) -> Result<EventHistory> {
        let cutoff = (Utc::now() - chrono::Duration::minutes(minutes)).to_rfc3339();
        let conn = self.connect(true)?;
        let mut stmt = conn.prepare(
            "SELECT event_at, event_type, status FROM crawl_events WHERE event_at >= ?1",
        )?;
        let rows = stmt.query_map(params![cutoff], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;

        let bucket_seconds = bucket_seconds.max(1);
        let mut history = EventHistory::default();
        for row in rows {
            let (event_at, event_type, status) = row?;
            history.total_events += 1;
            *history.type_counts.entry(event_type).or_insert(0) += 1;
            if let Some(status) = status {
                *history.status_counts.entry(status).or_insert(0) += 1;
            }
            if let Ok(parsed) = DateTime::parse_from_rfc3339(&event_at) {
                let ts = parsed.timestamp();
                let bucket_start = ts - ts.rem_euclid(bucket_seconds);
                if let Some(bucket) = DateTime::from_timestamp(bucket_start, 0) {
                    *history.buckets.entry(bucket.to_rfc3339()).or_insert(0) += 1;
                }
            }
        }
        Ok(history)
    }

    /// Raw event rows matching the filter, newest first.
    pub fn get_event_log(&self, filter: &EventLogFilter) -> Result<Vec<EventRecord>> {
        let conn = self.connect(true)?;
        let mut sql = String::from(
            "SELECT event_at, canonical_url, url, event_type, status, reason, detail, duration_ms
             FROM crawl_events WHERE 1=1",
        );
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(status) = &filter.status {
            sql.push_str(" AND status = ?");
            args.push(Box::new(status.clone()));
        }
        if let Some(event_type) = &filter.event_type {
            sql.push_str(" AND event_type = ?");
            args.push(Box::new(event_type.clone()));
        }
        if let Some(fragment) = &filter.url_contains {
            sql.push_str(" AND url LIKE ?");
            args.push(Box::new(format!("%{fragment}%")));
        }
        sql.push_str(" ORDER BY event_at DESC LIMIT ?");
        args.push(Box::new(
            i64::try_from(filter.limit.unwrap_or(100)).unwrap_or(100),
        ));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), |row| {
            Ok(EventRecord {
                event_at: row.get(0)?,
                canonical_url: row.get(1)?,
                url: row.get(2)?,
                event_type: row.get(3)?,
                status: row.get(4)?,
                reason: row.get(5)?,
                detail: row.get(6)?,
                duration_ms: row.get(7)?,
            })
        })?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    /// Prune events older than the retention window. Returns rows removed.
    pub fn maintenance(&self, event_retention_days: u32) -> Result<usize> {
        let cutoff =
            (Utc::now() - chrono::Duration::days(i64::from(event_retention_days))).to_rfc3339();
        let conn = self.connect(false)?;
        let removed = conn.execute(
            "DELETE FROM crawl_events WHERE event_at < ?1",
            params![cutoff],
        )?;
        if removed > 0 {
            debug!(removed, "Pruned old crawl events");
        }
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Status

    /// Aggregate counters for `sync/status`.
    pub fn get_status_snapshot(&self) -> Result<StatusSnapshot> {
        let now = Utc::now().to_rfc3339();
        let conn = self.connect(true)?;
        let count = |sql: &str| -> Result<u64> {
            let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
            Ok(u64::try_from(n).unwrap_or(0))
        };

        let mut snapshot = StatusSnapshot {
            metadata_total_urls: count("SELECT COUNT(*) FROM url_metadata")?,
            metadata_successful: count(
                "SELECT COUNT(*) FROM url_metadata WHERE last_status = 'success'",
            )?,
            metadata_pending: count(
                "SELECT COUNT(*) FROM url_metadata WHERE last_status = 'pending' OR last_status IS NULL",
            )?,
            failed_url_count: count(
                "SELECT COUNT(*) FROM url_metadata WHERE last_status = 'failed'",
            )?,
            queue_depth: count("SELECT COUNT(*) FROM crawl_queue")?,
            ..StatusSnapshot::default()
        };
        snapshot.metadata_due_urls = u64::try_from(conn.query_row(
            "SELECT COUNT(*) FROM url_metadata WHERE next_due_at IS NOT NULL AND next_due_at <= ?1",
            params![now],
            |row| row.get::<_, i64>(0),
        )?)
        .unwrap_or(0);
        snapshot.metadata_first_seen_at = conn.query_row(
            "SELECT MIN(first_seen_at) FROM url_metadata",
            [],
            |row| row.get(0),
        )?;
        snapshot.metadata_last_success_at = conn.query_row(
            "SELECT MAX(last_fetched_at) FROM url_metadata WHERE last_status = 'success'",
            [],
            |row| row.get(0),
        )?;
        Ok(snapshot)
    }

    // ------------------------------------------------------------------
    // Checkpoints

    /// Upsert a checkpoint, optionally appending to the history table.
    pub fn save_checkpoint(
        &self,
        key: &str,
        value: &serde_json::Value,
        keep_history: bool,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let encoded = serde_json::to_string(value)?;
        let conn = self.connect(false)?;
        conn.execute(
            "INSERT OR REPLACE INTO crawl_checkpoints (key, value_json, updated_at)
             VALUES (?1, ?2, ?3)",
            params![key, encoded, now],
        )?;
        if keep_history {
            conn.execute(
                "INSERT INTO crawl_checkpoint_history (key, value_json, updated_at)
                 VALUES (?1, ?2, ?3)",
                params![key, encoded, now],
            )?;
        }
        Ok(())
    }

    /// Load a checkpoint value.
    pub fn load_checkpoint(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let conn = self.connect(true)?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT value_json FROM crawl_checkpoints WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        raw.map(|r| serde_json::from_str(&r).map_err(Error::from))
            .transpose()
    }

    /// Persist sync progress for crash resume.
    pub fn save_sync_progress(&self, progress: &SyncProgress) -> Result<()> {
        self.save_checkpoint(SYNC_PROGRESS_KEY, &serde_json::to_value(progress)?, false)
    }

    /// Load the last persisted sync progress.
    pub fn load_sync_progress(&self) -> Result<Option<SyncProgress>> {
        Ok(self
            .load_checkpoint(SYNC_PROGRESS_KEY)?
            .and_then(|value| serde_json::from_value(value).ok()))
    }

    // ------------------------------------------------------------------
    // Locks

    /// Try to acquire a named lock.
    ///
    /// Returns `(Some(lease), None)` on success or `(None, Some(owner))`
    /// when another owner holds an unexpired lease. Expired leases are
    /// taken over; re-acquiring by the same owner extends the TTL.
    pub fn try_acquire_lock(
        &self,
        name: &str,
        owner: &str,
        ttl_seconds: u64,
    ) -> Result<(Option<LockLease>, Option<String>)> {
        let now = Utc::now();
        let conn = self.connect(false)?;
        let existing: Option<(String, String)> = conn
            .query_row(
                "SELECT owner, expires_at FROM crawl_locks WHERE name = ?1",
                params![name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        if let Some((current_owner, expires_at)) = existing {
            let expired = DateTime::parse_from_rfc3339(&expires_at)
                .map(|t| t.with_timezone(&Utc) <= now)
                .unwrap_or(true);
            if !expired && current_owner != owner {
                return Ok((None, Some(current_owner)));
            }
        }

        let expires_at = now
            + chrono::Duration::seconds(i64::try_from(ttl_seconds).unwrap_or(i64::MAX));
        conn.execute(
            "INSERT OR REPLACE INTO crawl_locks (name, owner, acquired_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![name, owner, now.to_rfc3339(), expires_at.to_rfc3339()],
        )?;
        Ok((
            Some(LockLease {
                name: name.to_string(),
                owner: owner.to_string(),
                acquired_at: now,
                expires_at,
            }),
            None,
        ))
    }

    /// Release a held lease; a lease taken over by someone else is left
    /// alone.
    pub fn release_lock(&self, lease: &LockLease) -> Result<()> {
        let conn = self.connect(false)?;
        conn.execute(
            "DELETE FROM crawl_locks WHERE name = ?1 AND owner = ?2",
            params![lease.name, lease.owner],
        )?;
        Ok(())
    }

    /// Forcibly remove a lock regardless of owner.
    pub fn break_lock(&self, name: &str) -> Result<()> {
        let conn = self.connect(false)?;
        conn.execute("DELETE FROM crawl_locks WHERE name = ?1", params![name])?;
        Ok(())
    }
}

fn parse_time(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}
