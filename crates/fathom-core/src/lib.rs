//! # fathom-core
//!
//! Core library for fathom — a multi-tenant documentation search service.
//!
//! Each tenant is one documentation corpus, ingested from a live web site
//! (sitemap or entry-URL crawl), a local filesystem tree, or a sparse git
//! checkout, normalized to markdown, indexed into a per-tenant on-disk
//! inverted index, and served through a uniform search/fetch/browse API.
//!
//! ## Architecture
//!
//! Ingestion flows discovery → crawl state store → fetch pool → unit of
//! work → post-sync index rebuild. Queries flow registry → tenant runtime
//! → BM25F engine over the active segment → snippet builder.
//!
//! - **Ingestion**: [`crawler`], [`fetcher`], [`state_store`],
//!   [`unit_of_work`], [`scheduler`]
//! - **Index**: [`analyzers`], [`search`], [`indexer`], [`audit`]
//! - **Runtime**: [`tenant`], [`registry`], [`config`]
//!
//! ## Concurrency
//!
//! Single-process cooperative multitasking on tokio. CPU- and disk-bound
//! work (scoring, SQLite, segment builds) runs on the blocking pool and
//! never on the event-loop thread. Segments are immutable after seal; the
//! active segment reference is swapped atomically by the tenant runtime.

/// Text analyzers for indexing and queries.
pub mod analyzers;
/// Index audit against the on-disk corpus.
pub mod audit;
/// Deployment configuration.
pub mod config;
/// Site crawler with adaptive concurrency.
pub mod crawler;
/// The document aggregate.
pub mod document;
/// Error types and result alias.
pub mod error;
/// In-process article extraction.
pub mod extract;
/// Per-URL document fetching.
pub mod fetcher;
/// Segment builder.
pub mod indexer;
/// Keyword extraction and query analysis.
pub mod keywords;
/// Tenant registry and routing.
pub mod registry;
/// Cron-driven sync scheduling.
pub mod scheduler;
/// Schema, segments, BM25F, snippets.
pub mod search;
/// SQLite-backed crawl state.
pub mod state_store;
/// Per-tenant runtime and API.
pub mod tenant;
/// Transactional markdown + metadata writes.
pub mod unit_of_work;
/// URL normalization and path translation.
pub mod url_translator;

pub use config::{DeploymentConfig, InfrastructureConfig, SourceType, TenantConfig};
pub use document::{Document, DocumentContent, DocumentMetadata};
pub use error::{Error, Result};
pub use fetcher::{DocFetcher, FetcherConfig};
pub use indexer::{Indexer, IndexerContext};
pub use registry::TenantRegistry;
pub use scheduler::{Scheduler, SyncCycle, SyncObserver, SyncOutcome};
pub use search::{Bm25Engine, Schema, Segment, SegmentStore};
pub use state_store::CrawlStateStore;
pub use tenant::{FetchContext, SearchResponse, TenantRuntime};
pub use unit_of_work::UnitOfWork;
pub use url_translator::UrlTranslator;
