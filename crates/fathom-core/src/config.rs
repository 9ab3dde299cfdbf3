//! Deployment configuration: infrastructure settings plus per-tenant
//! source definitions.
//!
//! Configuration is a single `deployment.json` validated up front; invalid
//! files fail the load rather than individual tenants. Every optional knob
//! has an explicit default so the rest of the system never reads missing
//! keys.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::search::bm25::RankingOptions;
use crate::search::snippet::{DEFAULT_MAX_CHARS, DEFAULT_SURROUNDING_CONTEXT};
use crate::search::SnippetStyle;
use crate::{Error, Result};

/// Where a tenant's documents come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Local filesystem tree, indexed in place.
    Filesystem,
    /// Live web site crawled via sitemap or entry URLs.
    Online,
    /// Sparse git checkout synced on a schedule.
    Git,
}

/// Whether network syncs are permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    /// Normal operation: crawl, fetch, and sync.
    #[default]
    Online,
    /// Serve cached documents only; schedulers refuse network syncs.
    Offline,
}

/// Fallback article extractor service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleExtractorFallback {
    /// Whether the fallback service may be called at all.
    #[serde(default)]
    pub enabled: bool,
    /// Service endpoint; required when enabled.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Retry budget per URL.
    #[serde(default = "default_fallback_retries")]
    pub max_retries: u32,
}

const fn default_fallback_retries() -> u32 {
    2
}

impl Default for ArticleExtractorFallback {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            max_retries: default_fallback_retries(),
        }
    }
}

/// Process-wide infrastructure settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfrastructureConfig {
    /// Overall HTTP timeout per request, in seconds.
    #[serde(default = "default_http_timeout")]
    pub http_timeout: u64,
    /// Ceiling for the adaptive concurrency limiter.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
    /// Online vs offline operation.
    #[serde(default)]
    pub operation_mode: OperationMode,
    /// Log level handed to the subscriber in the binary.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Base directory for tenant data when a tenant has no explicit root.
    #[serde(default = "default_data_root")]
    pub data_root_dir: PathBuf,
    /// Skip re-fetching URLs fetched successfully within this window.
    #[serde(default = "default_min_fetch_interval")]
    pub min_fetch_interval_hours: u64,
    /// Crawl event rows older than this are pruned during maintenance.
    #[serde(default = "default_event_retention")]
    pub event_retention_days: u32,
    /// Retention cap on stored index segments.
    #[serde(default = "default_max_segments")]
    pub max_segments: usize,
    /// External headless-render service endpoint for browser-path fetches.
    #[serde(default)]
    pub render_service_endpoint: Option<String>,
    /// Fallback article extractor service.
    #[serde(default)]
    pub article_extractor_fallback: ArticleExtractorFallback,
}

const fn default_http_timeout() -> u64 {
    30
}

const fn default_max_concurrent() -> usize {
    16
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_root() -> PathBuf {
    PathBuf::from("./data")
}

const fn default_min_fetch_interval() -> u64 {
    4
}

const fn default_event_retention() -> u32 {
    30
}

const fn default_max_segments() -> usize {
    crate::search::storage::DEFAULT_MAX_SEGMENTS
}

impl Default for InfrastructureConfig {
    fn default() -> Self {
        Self {
            http_timeout: default_http_timeout(),
            max_concurrent_requests: default_max_concurrent(),
            operation_mode: OperationMode::default(),
            log_level: default_log_level(),
            data_root_dir: default_data_root(),
            min_fetch_interval_hours: default_min_fetch_interval(),
            event_retention_days: default_event_retention(),
            max_segments: default_max_segments(),
            render_service_endpoint: None,
            article_extractor_fallback: ArticleExtractorFallback::default(),
        }
    }
}

/// Ranking knobs under `search.ranking`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    /// BM25 `k1`.
    #[serde(default = "default_k1")]
    pub bm25_k1: f64,
    /// BM25 `b`.
    #[serde(default = "default_b")]
    pub bm25_b: f64,
    /// Phrase proximity multiplier toggle.
    #[serde(default = "default_true")]
    pub enable_proximity_bonus: bool,
    /// Thesaurus expansion toggle.
    #[serde(default = "default_true")]
    pub enable_synonyms: bool,
    /// Fuzzy fallback toggle.
    #[serde(default = "default_true")]
    pub enable_fuzzy: bool,
    /// English preference multiplier toggle. Biases mixed-language
    /// corpora toward English documents.
    #[serde(default = "default_true")]
    pub enable_language_boost: bool,
}

const fn default_k1() -> f64 {
    1.2
}

const fn default_b() -> f64 {
    0.75
}

const fn default_true() -> bool {
    true
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            bm25_k1: default_k1(),
            bm25_b: default_b(),
            enable_proximity_bonus: true,
            enable_synonyms: true,
            enable_fuzzy: true,
            enable_language_boost: true,
        }
    }
}

/// Snippet rendering settings under `search.snippet`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnippetConfig {
    /// Maximum snippet length in characters.
    #[serde(default = "default_fragment_limit")]
    pub fragment_char_limit: usize,
    /// `plain` or `html` highlight markers.
    #[serde(default = "default_snippet_style")]
    pub style: String,
    /// Highlighted fragments per snippet.
    #[serde(default = "default_max_fragments")]
    pub max_fragments: usize,
}

const fn default_fragment_limit() -> usize {
    DEFAULT_MAX_CHARS
}

fn default_snippet_style() -> String {
    "plain".to_string()
}

const fn default_max_fragments() -> usize {
    3
}

impl Default for SnippetConfig {
    fn default() -> Self {
        Self {
            fragment_char_limit: default_fragment_limit(),
            style: default_snippet_style(),
            max_fragments: default_max_fragments(),
        }
    }
}

impl SnippetConfig {
    /// Resolved highlight style.
    #[must_use]
    pub fn resolved_style(&self) -> SnippetStyle {
        SnippetStyle::from_name(&self.style)
    }

    /// Context budget used for sentence boundary search.
    #[must_use]
    pub const fn surrounding_context(&self) -> usize {
        DEFAULT_SURROUNDING_CONTEXT
    }
}

/// Per-tenant search settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Whether search is available for the tenant.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Engine name; the canonical engine is `bm25`.
    #[serde(default = "default_engine")]
    pub engine: String,
    /// Analyzer profile override for the body field.
    #[serde(default)]
    pub analyzer_profile: Option<String>,
    /// Field boost overrides; unlisted fields use schema boosts.
    #[serde(default)]
    pub boosts: std::collections::HashMap<String, f64>,
    /// Ranking constants and toggles.
    #[serde(default)]
    pub ranking: RankingConfig,
    /// Snippet rendering settings.
    #[serde(default)]
    pub snippet: SnippetConfig,
}

fn default_engine() -> String {
    "bm25".to_string()
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            engine: default_engine(),
            analyzer_profile: None,
            boosts: std::collections::HashMap::new(),
            ranking: RankingConfig::default(),
            snippet: SnippetConfig::default(),
        }
    }
}

impl SearchConfig {
    /// Translate into engine options.
    #[must_use]
    pub fn ranking_options(&self) -> RankingOptions {
        RankingOptions {
            k1: self.ranking.bm25_k1,
            b: self.ranking.bm25_b,
            enable_synonyms: self.ranking.enable_synonyms,
            enable_phrase_bonus: self.ranking.enable_proximity_bonus,
            enable_fuzzy: self.ranking.enable_fuzzy,
            enable_language_boost: self.ranking.enable_language_boost,
            enable_text_proximity_bonus: self.ranking.enable_proximity_bonus,
            field_boosts: self.boosts.clone(),
        }
    }
}

/// A single tenant: one documentation corpus and how to ingest it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    /// Unique lowercase/dash identifier.
    pub codename: String,
    /// Human-readable corpus name.
    pub docs_name: String,
    /// Ingestion source kind.
    pub source_type: SourceType,
    /// Explicit document root; defaults to `<data_root>/<codename>`.
    #[serde(default)]
    pub docs_root_dir: Option<PathBuf>,
    /// Sitemap URL for online tenants.
    #[serde(default)]
    pub docs_sitemap_url: Option<String>,
    /// Crawl entry URL for online tenants.
    #[serde(default)]
    pub docs_entry_url: Option<String>,
    /// Only URLs under one of these prefixes are ingested.
    #[serde(default)]
    pub url_whitelist_prefixes: Vec<String>,
    /// URLs under any of these prefixes are dropped.
    #[serde(default)]
    pub url_blacklist_prefixes: Vec<String>,
    /// Optional markdown mirror suffix (e.g. `.md`) tried before HTML
    /// extraction.
    #[serde(default)]
    pub markdown_mirror_suffix: Option<String>,
    /// Git repository URL for git tenants.
    #[serde(default)]
    pub git_repo_url: Option<String>,
    /// Git branch; defaults to `main`.
    #[serde(default = "default_git_branch")]
    pub git_branch: String,
    /// Sparse checkout subpaths for git tenants.
    #[serde(default)]
    pub git_subpaths: Vec<String>,
    /// Leading path prefix stripped when copying from the checkout.
    #[serde(default)]
    pub strip_prefix: Option<String>,
    /// Environment variable holding the git auth token.
    #[serde(default)]
    pub auth_token_env: Option<String>,
    /// Standard 5-field cron; absent means manual-only syncs.
    #[serde(default)]
    pub refresh_schedule: Option<String>,
    /// Search settings.
    #[serde(default)]
    pub search: SearchConfig,
}

fn default_git_branch() -> String {
    "main".to_string()
}

impl TenantConfig {
    /// Resolve the tenant's document root.
    #[must_use]
    pub fn docs_root(&self, infrastructure: &InfrastructureConfig) -> PathBuf {
        self.docs_root_dir
            .clone()
            .unwrap_or_else(|| infrastructure.data_root_dir.join(&self.codename))
    }

    fn validate(&self) -> Result<()> {
        if self.codename.is_empty()
            || !self
                .codename
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(Error::Config(format!(
                "Invalid codename '{}': only [a-z0-9-] are allowed",
                self.codename
            )));
        }

        match self.source_type {
            SourceType::Online => {
                if self.docs_sitemap_url.is_none() && self.docs_entry_url.is_none() {
                    return Err(Error::Config(format!(
                        "Tenant '{}': online source needs a sitemap or entry URL",
                        self.codename
                    )));
                }
            },
            SourceType::Git => {
                if self.git_repo_url.is_none() {
                    return Err(Error::Config(format!(
                        "Tenant '{}': git source needs git_repo_url",
                        self.codename
                    )));
                }
                if self.git_subpaths.is_empty() {
                    return Err(Error::Config(format!(
                        "Tenant '{}': git source needs at least one subpath",
                        self.codename
                    )));
                }
            },
            SourceType::Filesystem => {
                if self.docs_root_dir.is_none() {
                    return Err(Error::Config(format!(
                        "Tenant '{}': filesystem source needs docs_root_dir",
                        self.codename
                    )));
                }
            },
        }

        if let Some(expr) = &self.refresh_schedule {
            crate::scheduler::parse_cron(expr).map_err(|e| {
                Error::Config(format!(
                    "Tenant '{}': invalid refresh_schedule '{expr}': {e}",
                    self.codename
                ))
            })?;
        }
        Ok(())
    }
}

/// The whole deployment: infrastructure plus tenants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Process-wide settings.
    #[serde(default)]
    pub infrastructure: InfrastructureConfig,
    /// Tenant definitions.
    #[serde(default)]
    pub tenants: Vec<TenantConfig>,
}

impl DeploymentConfig {
    /// Load and validate a deployment file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    /// Parse and validate deployment JSON.
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| Error::Config(format!("Invalid deployment JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all invariants; duplicate codenames are an error.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for tenant in &self.tenants {
            tenant.validate()?;
            if !seen.insert(tenant.codename.as_str()) {
                return Err(Error::Config(format!(
                    "Duplicate tenant codename '{}'",
                    tenant.codename
                )));
            }
        }
        Ok(())
    }

    /// Look up a tenant by codename.
    #[must_use]
    pub fn tenant(&self, codename: &str) -> Option<&TenantConfig> {
        self.tenants.iter().find(|t| t.codename == codename)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn online_tenant_json(codename: &str) -> String {
        format!(
            r#"{{
                "codename": "{codename}",
                "docs_name": "Example Docs",
                "source_type": "online",
                "docs_sitemap_url": "https://ex.com/sitemap.xml"
            }}"#
        )
    }

    #[test]
    fn minimal_online_tenant_loads_with_defaults() {
        let raw = format!(
            r#"{{ "tenants": [ {} ] }}"#,
            online_tenant_json("example-docs")
        );
        let config = DeploymentConfig::from_json(&raw).unwrap();

        assert_eq!(config.tenants.len(), 1);
        let tenant = &config.tenants[0];
        assert_eq!(tenant.codename, "example-docs");
        assert!(tenant.search.enabled);
        assert_eq!(tenant.search.ranking.bm25_k1, 1.2);
        assert_eq!(tenant.search.snippet.fragment_char_limit, 300);
        assert_eq!(config.infrastructure.http_timeout, 30);
        assert_eq!(
            tenant.docs_root(&config.infrastructure),
            PathBuf::from("./data/example-docs")
        );
    }

    #[test]
    fn duplicate_codenames_are_rejected() {
        let raw = format!(
            r#"{{ "tenants": [ {}, {} ] }}"#,
            online_tenant_json("dup"),
            online_tenant_json("dup")
        );
        let err = DeploymentConfig::from_json(&raw).unwrap_err();
        assert!(err.to_string().contains("Duplicate tenant codename"));
    }

    #[test]
    fn online_tenant_needs_a_discovery_url() {
        let raw = r#"{ "tenants": [ {
            "codename": "no-urls",
            "docs_name": "Broken",
            "source_type": "online"
        } ] }"#;
        let err = DeploymentConfig::from_json(raw).unwrap_err();
        assert!(err.to_string().contains("sitemap or entry URL"));
    }

    #[test]
    fn git_tenant_needs_repo_and_subpaths() {
        let raw = r#"{ "tenants": [ {
            "codename": "git-docs",
            "docs_name": "Git Docs",
            "source_type": "git",
            "git_repo_url": "https://github.com/example/docs.git"
        } ] }"#;
        let err = DeploymentConfig::from_json(raw).unwrap_err();
        assert!(err.to_string().contains("at least one subpath"));
    }

    #[test]
    fn invalid_codename_is_rejected() {
        let raw = format!(
            r#"{{ "tenants": [ {} ] }}"#,
            online_tenant_json("Bad_Name")
        );
        let err = DeploymentConfig::from_json(&raw).unwrap_err();
        assert!(err.to_string().contains("Invalid codename"));
    }

    #[test]
    fn invalid_cron_fails_at_load() {
        let raw = r#"{ "tenants": [ {
            "codename": "cron-docs",
            "docs_name": "Cron Docs",
            "source_type": "online",
            "docs_entry_url": "https://ex.com/docs/",
            "refresh_schedule": "not a cron"
        } ] }"#;
        let err = DeploymentConfig::from_json(raw).unwrap_err();
        assert!(err.to_string().contains("invalid refresh_schedule"));
    }

    #[test]
    fn valid_cron_is_accepted() {
        let raw = r#"{ "tenants": [ {
            "codename": "cron-docs",
            "docs_name": "Cron Docs",
            "source_type": "online",
            "docs_entry_url": "https://ex.com/docs/",
            "refresh_schedule": "0 3 * * *"
        } ] }"#;
        assert!(DeploymentConfig::from_json(raw).is_ok());
    }

    #[test]
    fn ranking_options_reflect_overrides() {
        let raw = r#"{ "tenants": [ {
            "codename": "tuned",
            "docs_name": "Tuned",
            "source_type": "online",
            "docs_entry_url": "https://ex.com/docs/",
            "search": {
                "boosts": { "title": 4.0 },
                "ranking": { "bm25_k1": 1.5, "enable_proximity_bonus": false }
            }
        } ] }"#;
        let config = DeploymentConfig::from_json(raw).unwrap();
        let options = config.tenants[0].search.ranking_options();

        assert_eq!(options.k1, 1.5);
        assert_eq!(options.b, 0.75);
        assert!(!options.enable_phrase_bonus);
        assert_eq!(options.field_boosts.get("title"), Some(&4.0));
    }

    #[test]
    fn offline_mode_parses() {
        let raw = r#"{ "infrastructure": { "operation_mode": "offline" }, "tenants": [] }"#;
        let config = DeploymentConfig::from_json(raw).unwrap();
        assert_eq!(config.infrastructure.operation_mode, OperationMode::Offline);
    }

    #[test]
    fn snippet_style_resolves() {
        let config = SnippetConfig {
            style: "html".to_string(),
            ..SnippetConfig::default()
        };
        assert_eq!(config.resolved_style(), SnippetStyle::Html);
        assert_eq!(SnippetConfig::default().resolved_style(), SnippetStyle::Plain);
    }
}
