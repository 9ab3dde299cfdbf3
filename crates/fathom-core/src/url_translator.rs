//! URL normalization and deterministic URL-to-path translation.
//!
//! Every document is identified by its normalized URL. The translator maps
//! that identity onto the tenant's on-disk layout:
//!
//! ```text
//! <docs_root>/<sha256(normalized_url)>.md
//! <docs_root>/__docs_metadata/<sha256(normalized_url)>.meta.json
//! ```
//!
//! Normalization strips fragments and the `rg` query parameter, sorts the
//! remaining query parameters, and appends a trailing slash to
//! directory-looking paths (those whose last segment carries no file
//! extension). Two URLs are equal iff their normalized forms are
//! byte-equal, so the hash-based path is deterministic across runs and
//! platforms.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use url::Url;

use crate::{Error, Result};

/// Directory under `docs_root` mirroring the markdown tree with
/// `.meta.json` side-cars.
pub const METADATA_DIR: &str = "__docs_metadata";

/// Directory under `docs_root` holding index segments and the manifest.
pub const SEGMENTS_DIR: &str = "__search_segments";

/// Prefix for unit-of-work staging directories under `docs_root`.
pub const STAGING_PREFIX: &str = ".staging-";

/// Query parameter stripped during normalization (search-result referrer
/// tag that must not fork document identity).
const STRIPPED_QUERY_PARAM: &str = "rg";

/// Return the canonical form of a URL.
///
/// The canonical form is what gets hashed; see the module docs for the
/// exact rules.
pub fn normalize_url(raw: &str) -> Result<String> {
    let mut url = Url::parse(raw).map_err(|e| Error::InvalidUrl(format!("{raw}: {e}")))?;

    url.set_fragment(None);

    // Strip `rg`, sort the rest for determinism.
    let kept: Vec<(String, String)> = {
        let mut pairs: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != STRIPPED_QUERY_PARAM)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        pairs.sort();
        pairs
    };
    if kept.is_empty() {
        url.set_query(None);
    } else {
        let query = kept
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    k.clone()
                } else {
                    format!("{k}={v}")
                }
            })
            .collect::<Vec<_>>()
            .join("&");
        url.set_query(Some(&query));
    }

    // Directory-looking paths get a trailing slash so `/docs` and `/docs/`
    // hash identically.
    let path = url.path().to_string();
    if !path.ends_with('/') {
        let last_segment = path.rsplit('/').next().unwrap_or("");
        if !last_segment.contains('.') {
            url.set_path(&format!("{path}/"));
        }
    }

    Ok(url.to_string())
}

/// True when two raw URLs share a canonical form.
pub fn urls_equivalent(a: &str, b: &str) -> Result<bool> {
    Ok(normalize_url(a)? == normalize_url(b)?)
}

/// Maps public URLs onto a tenant's on-disk document layout.
#[derive(Debug, Clone)]
pub struct UrlTranslator {
    docs_root: PathBuf,
}

impl UrlTranslator {
    /// Create a translator rooted at the tenant's `docs_root`.
    pub fn new(docs_root: impl Into<PathBuf>) -> Self {
        Self {
            docs_root: docs_root.into(),
        }
    }

    /// The tenant's document root.
    #[must_use]
    pub fn docs_root(&self) -> &Path {
        &self.docs_root
    }

    /// Relative markdown path for a URL: `<sha256(normalized)>.md`.
    pub fn relative_markdown_path(&self, raw_url: &str) -> Result<PathBuf> {
        let canonical = normalize_url(raw_url)?;
        Ok(PathBuf::from(format!("{}.md", sha256_hex(&canonical))))
    }

    /// Absolute markdown path for a URL under `docs_root`.
    pub fn markdown_path(&self, raw_url: &str) -> Result<PathBuf> {
        Ok(self.docs_root.join(self.relative_markdown_path(raw_url)?))
    }

    /// Absolute metadata side-car path for a URL, mirroring the markdown
    /// layout under [`METADATA_DIR`].
    pub fn metadata_path(&self, raw_url: &str) -> Result<PathBuf> {
        let canonical = normalize_url(raw_url)?;
        Ok(self
            .docs_root
            .join(METADATA_DIR)
            .join(format!("{}.meta.json", sha256_hex(&canonical))))
    }

    /// Metadata side-car path for an already-relative markdown path.
    ///
    /// `abc.md` maps to `__docs_metadata/abc.meta.json`.
    #[must_use]
    pub fn metadata_path_for_relative(&self, rel_markdown: &Path) -> PathBuf {
        let stem = rel_markdown
            .file_stem()
            .map_or_else(String::new, |s| s.to_string_lossy().into_owned());
        self.docs_root
            .join(METADATA_DIR)
            .join(format!("{stem}.meta.json"))
    }

    /// The tenant's segment directory.
    #[must_use]
    pub fn segments_dir(&self) -> PathBuf {
        self.docs_root.join(SEGMENTS_DIR)
    }
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}
