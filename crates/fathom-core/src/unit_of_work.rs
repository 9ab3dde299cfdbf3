//! Unit of work: transactional writes of markdown + metadata files.
//!
//! Each unit of work owns a uuid-suffixed staging directory under the
//! tenant's `docs_root`. Documents are written into staging first; commit
//! moves every staged file into its final location (overwriting only the
//! paths it staged) and removes the staging directory. Rollback, drop
//! without commit, and process crashes leave at most an orphan staging
//! directory, which the sweeper removes once it exceeds a maximum age.
//!
//! Staging lives under `docs_root` so the commit moves stay on one
//! filesystem and `rename` is atomic per file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::document::{Document, DocumentSidecar};
use crate::url_translator::{UrlTranslator, METADATA_DIR, STAGING_PREFIX};
use crate::{Error, Result};

/// Default maximum age before an orphan staging directory is swept.
pub const DEFAULT_STAGING_MAX_AGE: Duration = Duration::from_secs(60 * 60);

/// A staging-directory transaction for document writes.
#[derive(Debug)]
pub struct UnitOfWork {
    docs_root: PathBuf,
    staging_dir: PathBuf,
    translator: UrlTranslator,
    staged: Vec<PathBuf>,
    committed: bool,
}

impl UnitOfWork {
    /// Begin a unit of work, creating a fresh staging directory.
    pub fn begin(docs_root: impl Into<PathBuf>) -> Result<Self> {
        let docs_root = docs_root.into();
        let staging_dir = docs_root.join(format!("{STAGING_PREFIX}{}", Uuid::new_v4()));
        fs::create_dir_all(staging_dir.join(METADATA_DIR))
            .map_err(|e| Error::Storage(format!("Failed to create staging directory: {e}")))?;
        debug!(staging = %staging_dir.display(), "Unit of work started");
        Ok(Self {
            translator: UrlTranslator::new(&docs_root),
            docs_root,
            staging_dir,
            staged: Vec::new(),
            committed: false,
        })
    }

    /// The staging directory this unit of work owns.
    #[must_use]
    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Stage a document's markdown and metadata side-car.
    ///
    /// Paths are the deterministic URL translation, so re-adding the same
    /// URL overwrites the staged copy rather than duplicating it.
    pub fn add_document(&mut self, document: &Document) -> Result<()> {
        let rel_md = self.translator.relative_markdown_path(&document.url)?;
        let rel_meta = PathBuf::from(METADATA_DIR).join(format!(
            "{}.meta.json",
            rel_md
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default()
        ));

        let staged_md = self.staging_dir.join(&rel_md);
        fs::write(&staged_md, &document.content.markdown)
            .map_err(|e| Error::Storage(format!("Failed to stage markdown: {e}")))?;

        let sidecar = DocumentSidecar::from_document(document);
        let staged_meta = self.staging_dir.join(&rel_meta);
        fs::write(&staged_meta, serde_json::to_string_pretty(&sidecar)?)
            .map_err(|e| Error::Storage(format!("Failed to stage metadata: {e}")))?;

        for rel in [rel_md, rel_meta] {
            if !self.staged.contains(&rel) {
                self.staged.push(rel);
            }
        }
        Ok(())
    }

    /// Relative markdown path a document will land at after commit.
    pub fn relative_markdown_path(&self, url: &str) -> Result<PathBuf> {
        self.translator.relative_markdown_path(url)
    }

    /// Promote every staged file into `docs_root` and remove the staging
    /// directory. Returns the number of files moved.
    ///
    /// Only the staged paths are touched; sibling documents are left
    /// alone.
    pub fn commit(mut self) -> Result<usize> {
        let mut moved = 0;
        for rel in &self.staged {
            let source = self.staging_dir.join(rel);
            let target = self.docs_root.join(rel);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .map_err(|e| Error::Storage(format!("Failed to create target dir: {e}")))?;
            }
            fs::rename(&source, &target)
                .map_err(|e| Error::Storage(format!("Failed to promote staged file: {e}")))?;
            moved += 1;
        }
        self.committed = true;
        remove_staging(&self.staging_dir);
        debug!(moved, "Unit of work committed");
        Ok(moved)
    }

    /// Discard all staged writes.
    pub fn rollback(mut self) {
        self.committed = true; // suppress the drop-path cleanup doing it twice
        remove_staging(&self.staging_dir);
        debug!("Unit of work rolled back");
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if !self.committed {
            remove_staging(&self.staging_dir);
        }
    }
}

fn remove_staging(staging_dir: &Path) {
    if staging_dir.exists() {
        if let Err(e) = fs::remove_dir_all(staging_dir) {
            warn!(staging = %staging_dir.display(), error = %e, "Failed to remove staging directory");
        }
    }
}

/// Remove orphan staging directories older than `max_age`.
///
/// Crash recovery: a process that died mid-transaction leaves its staging
/// directory behind; anything past the age threshold is fair game.
/// Returns the number of directories removed.
pub fn sweep_stale_staging(docs_root: &Path, max_age: Duration) -> Result<usize> {
    if !docs_root.exists() {
        return Ok(0);
    }
    let now = SystemTime::now();
    let mut removed = 0;
    for entry in fs::read_dir(docs_root)
        .map_err(|e| Error::Storage(format!("Failed to read docs root: {e}")))?
    {
        let entry = entry.map_err(|e| Error::Storage(e.to_string()))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(STAGING_PREFIX) || !entry.path().is_dir() {
            continue;
        }
        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|mtime| now.duration_since(mtime).ok());
        if age.is_some_and(|a| a > max_age) {
            remove_staging(&entry.path());
            removed += 1;
        }
    }
    if removed > 0 {
        debug!(removed, "Swept stale staging directories");
    }
    Ok(removed)
}
