//! Segment builder: walks a tenant's markdown + metadata tree and turns
//! it into an immutable index segment.
//!
//! The segment id is a fingerprint over the schema digest and the sorted
//! `(url, last_fetched_at, content hash)` triples of the input set, so an
//! unchanged corpus always produces the same id and a rebuild becomes a
//! no-op against the manifest.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::analyzers::Analyzer;
use crate::config::SourceType;
use crate::document::DocumentSidecar;
use crate::extract::first_prose_paragraph;
use crate::search::schema::{schema_for_profile, FieldType, Schema};
use crate::search::storage::{FieldPostings, Posting, SegmentData, SegmentStore};
use crate::url_translator::{METADATA_DIR, SEGMENTS_DIR, STAGING_PREFIX};
use crate::Result;

/// Stored title ceiling in bytes.
const MAX_STORED_TITLE: usize = 1024;

/// Stored body ceiling in bytes.
const MAX_STORED_BODY: usize = 64 * 1024;

/// What the indexer needs to know about its tenant.
#[derive(Debug, Clone)]
pub struct IndexerContext {
    /// Tenant codename, for logging.
    pub codename: String,
    /// Markdown tree root.
    pub docs_root: PathBuf,
    /// Segment directory (usually `docs_root/__search_segments`).
    pub segments_dir: PathBuf,
    /// Tenant source kind; URL filtering only applies to online tenants.
    pub source_type: SourceType,
    /// Whitelist prefixes for online tenants.
    pub url_whitelist_prefixes: Vec<String>,
    /// Blacklist prefixes for online tenants.
    pub url_blacklist_prefixes: Vec<String>,
    /// Body analyzer profile override.
    pub analyzer_profile: Option<String>,
    /// Segment retention cap.
    pub max_segments: usize,
}

/// Outcome of a fingerprint audit.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FingerprintAudit {
    /// Fingerprint of the on-disk corpus.
    pub fingerprint: String,
    /// Active segment id per the manifest.
    pub current_segment_id: Option<String>,
    /// Whether the corpus and the active segment disagree.
    pub needs_rebuild: bool,
}

/// Options for a segment build.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Restrict the build to these relative markdown paths.
    pub changed_paths: Option<Vec<PathBuf>>,
    /// Only rebuild when `changed_paths` selects something.
    pub changed_only: bool,
    /// Cap on documents indexed.
    pub limit: Option<usize>,
    /// Persist the segment (false builds in memory only).
    pub persist: bool,
}

/// Build report.
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    /// Documents written into the segment.
    pub documents_indexed: usize,
    /// Documents filtered or skipped (including no-op rebuilds).
    pub documents_skipped: usize,
    /// Per-document errors; never fatal.
    pub errors: Vec<String>,
    /// Segment ids produced or reused.
    pub segment_ids: Vec<String>,
    /// Paths of persisted segments.
    pub segment_paths: Vec<PathBuf>,
}

/// A markdown file paired with its metadata side-car.
#[derive(Debug, Clone)]
struct SourceDoc {
    rel_path: PathBuf,
    url: String,
    last_fetched_at: Option<String>,
    content: String,
    sidecar: Option<DocumentSidecar>,
}

/// Walks the corpus and builds segments.
pub struct Indexer {
    context: IndexerContext,
    schema: Schema,
    store: SegmentStore,
}

impl Indexer {
    /// Build an indexer for a tenant context.
    pub fn new(context: IndexerContext) -> Result<Self> {
        let schema = schema_for_profile(context.analyzer_profile.as_deref());
        let store = SegmentStore::with_max_segments(&context.segments_dir, context.max_segments)?;
        Ok(Self {
            context,
            schema,
            store,
        })
    }

    /// The segment store the indexer writes to.
    #[must_use]
    pub fn store(&self) -> &SegmentStore {
        &self.store
    }

    /// Compare the corpus fingerprint against the active segment.
    ///
    /// Applies the same URL filtering as a build so the two always agree
    /// on the input set.
    pub fn fingerprint_audit(&self) -> Result<FingerprintAudit> {
        let mut report = BuildReport::default();
        let docs = self.discover_with_errors(&mut report)?;
        let fingerprint = self.fingerprint(&docs)?;
        let current_segment_id = self.store.latest_segment_id()?;
        let needs_rebuild = current_segment_id.as_deref() != Some(fingerprint.as_str());
        Ok(FingerprintAudit {
            fingerprint,
            current_segment_id,
            needs_rebuild,
        })
    }

    /// Build (and optionally persist) a segment from the corpus.
    #[instrument(skip(self), fields(tenant = %self.context.codename))]
    pub fn build_segment(&self, options: &BuildOptions) -> Result<BuildReport> {
        let mut report = BuildReport::default();
        let mut docs = self.discover_with_errors(&mut report)?;

        if options.changed_only || options.changed_paths.is_some() {
            if let Some(changed) = &options.changed_paths {
                let before = docs.len();
                docs.retain(|doc| changed.contains(&doc.rel_path));
                report.documents_skipped += before - docs.len();
            }
        }
        if let Some(limit) = options.limit {
            if docs.len() > limit {
                report.documents_skipped += docs.len() - limit;
                docs.truncate(limit);
            }
        }

        let fingerprint = self.fingerprint(&docs)?;
        if options.persist {
            if let Some(current) = self.store.latest_segment_id()? {
                if current == fingerprint {
                    debug!(segment_id = %fingerprint, "Corpus unchanged; skipping rebuild");
                    report.documents_skipped += docs.len();
                    report.segment_ids.push(fingerprint);
                    return Ok(report);
                }
            }
        }

        let data = self.build_segment_data(&fingerprint, &docs, &mut report);
        report.documents_indexed = data.doc_count();
        report.segment_ids.push(fingerprint);

        if options.persist {
            let path = self.store.save(&data, &[])?;
            report.segment_paths.push(path);
        }
        info!(
            indexed = report.documents_indexed,
            skipped = report.documents_skipped,
            errors = report.errors.len(),
            "Segment build complete"
        );
        Ok(report)
    }

    fn discover_with_errors(&self, report: &mut BuildReport) -> Result<Vec<SourceDoc>> {
        let mut docs = self.discover_documents()?;
        let before = docs.len();
        if matches!(self.context.source_type, SourceType::Online) {
            docs.retain(|doc| self.url_allowed(&doc.url));
            report.documents_skipped += before - docs.len();
        }
        Ok(docs)
    }

    fn url_allowed(&self, url: &str) -> bool {
        if self
            .context
            .url_blacklist_prefixes
            .iter()
            .any(|p| url.starts_with(p.as_str()))
        {
            return false;
        }
        if self.context.url_whitelist_prefixes.is_empty() {
            return true;
        }
        self.context
            .url_whitelist_prefixes
            .iter()
            .any(|p| url.starts_with(p.as_str()))
    }

    /// Walk `docs_root` for markdown files, pairing each with its
    /// metadata side-car. Files without metadata still index under a
    /// path-derived URL.
    fn discover_documents(&self) -> Result<Vec<SourceDoc>> {
        let mut docs = Vec::new();
        if !self.context.docs_root.exists() {
            return Ok(docs);
        }
        for entry in walkdir::WalkDir::new(&self.context.docs_root)
            .into_iter()
            .filter_entry(|e| !is_excluded_dir(e.path(), &self.context.docs_root))
            .filter_map(std::result::Result::ok)
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let Ok(rel_path) = path.strip_prefix(&self.context.docs_root) else {
                continue;
            };
            let content = match fs::read_to_string(path) {
                Ok(content) => content,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Unreadable markdown file");
                    continue;
                },
            };

            let sidecar = self.load_sidecar(rel_path);
            let url = sidecar
                .as_ref()
                .map(|s| s.url.clone())
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| rel_path.to_string_lossy().replace('\\', "/"));
            let last_fetched_at = sidecar.as_ref().and_then(|s| s.last_fetched_at.clone());

            docs.push(SourceDoc {
                rel_path: rel_path.to_path_buf(),
                url,
                last_fetched_at,
                content,
                sidecar,
            });
        }
        docs.sort_by(|a, b| a.url.cmp(&b.url));
        Ok(docs)
    }

    fn load_sidecar(&self, rel_md: &Path) -> Option<DocumentSidecar> {
        let stem = rel_md.file_stem()?.to_string_lossy().into_owned();
        let path = self
            .context
            .docs_root
            .join(METADATA_DIR)
            .join(format!("{stem}.meta.json"));
        let raw = fs::read_to_string(path).ok()?;
        serde_json::from_str(&raw).ok()
    }

    /// Deterministic fingerprint over the schema and the input set.
    fn fingerprint(&self, docs: &[SourceDoc]) -> Result<String> {
        let mut lines: Vec<String> = docs
            .iter()
            .map(|doc| {
                let content_hash = sha256_hex(&doc.content);
                format!(
                    "{}\t{}\t{}",
                    doc.url,
                    doc.last_fetched_at.as_deref().unwrap_or(""),
                    content_hash
                )
            })
            .collect();
        lines.sort();

        let mut hasher = Sha256::new();
        hasher.update(self.schema.digest()?.as_bytes());
        for line in &lines {
            hasher.update(line.as_bytes());
            hasher.update(b"\n");
        }
        Ok(format!("{:x}", hasher.finalize()))
    }

    fn build_segment_data(
        &self,
        segment_id: &str,
        docs: &[SourceDoc],
        report: &mut BuildReport,
    ) -> SegmentData {
        let mut postings: BTreeMap<String, FieldPostings> = BTreeMap::new();
        let mut stored_fields = BTreeMap::new();
        let mut field_lengths: BTreeMap<String, BTreeMap<String, u64>> = BTreeMap::new();

        for doc in docs {
            match self.index_document(doc, &mut postings, &mut field_lengths) {
                Ok(bag) => {
                    stored_fields.insert(doc.url.clone(), bag);
                },
                Err(e) => {
                    report
                        .errors
                        .push(format!("{}: {e}", doc.rel_path.display()));
                },
            }
        }

        SegmentData {
            segment_id: segment_id.to_string(),
            schema: self.schema.clone(),
            created_at: Utc::now(),
            postings,
            stored_fields,
            field_lengths,
        }
    }

    fn index_document(
        &self,
        doc: &SourceDoc,
        postings: &mut BTreeMap<String, FieldPostings>,
        field_lengths: &mut BTreeMap<String, BTreeMap<String, u64>>,
    ) -> Result<serde_json::Map<String, serde_json::Value>> {
        let fields = extract_fields(doc);
        let mut bag = serde_json::Map::new();

        for spec in &self.schema.fields {
            let value = fields.get(spec.name.as_str());

            // `tags` is indexed but deliberately not stored in the bag.
            if spec.stored && spec.name != "tags" {
                if spec.name == "timestamp" {
                    let timestamp = doc
                        .last_fetched_at
                        .as_deref()
                        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                        .map_or(0, |t| t.timestamp());
                    bag.insert(spec.name.clone(), serde_json::json!(timestamp));
                } else if let Some(value) = value {
                    let stored_value = match spec.name.as_str() {
                        "title" => truncate_utf8(value, MAX_STORED_TITLE),
                        "body" => truncate_utf8(value, MAX_STORED_BODY),
                        _ => value.clone(),
                    };
                    bag.insert(spec.name.clone(), serde_json::json!(stored_value));
                }
            }

            if !spec.indexed || matches!(spec.field_type, FieldType::Numeric | FieldType::Stored)
            {
                continue;
            }
            let Some(value) = value else { continue };

            let analyzer = match spec.field_type {
                FieldType::Keyword => Analyzer::Keyword,
                _ => Analyzer::from_name(spec.analyzer_name.as_deref())?,
            };
            let tokens = if spec.name == "tags" {
                // Each tag is one keyword token.
                fields
                    .get("tags_list")
                    .map(|joined| {
                        joined
                            .split('\u{1f}')
                            .filter(|t| !t.is_empty())
                            .enumerate()
                            .map(|(position, tag)| crate::analyzers::Token {
                                text: tag.to_string(),
                                position,
                                start_char: 0,
                                end_char: tag.len(),
                            })
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default()
            } else {
                analyzer.analyze(value)
            };
            if tokens.is_empty() {
                continue;
            }

            field_lengths
                .entry(spec.name.clone())
                .or_default()
                .insert(doc.url.clone(), tokens.len() as u64);

            let field_postings = postings.entry(spec.name.clone()).or_default();
            for token in tokens {
                let list = field_postings.entry(token.text).or_default();
                let position = u32::try_from(token.position).unwrap_or(u32::MAX);
                match list.iter_mut().find(|p| p.doc_id == doc.url) {
                    Some(posting) => posting.positions.push(position),
                    None => list.push(Posting {
                        doc_id: doc.url.clone(),
                        positions: vec![position],
                    }),
                }
            }
        }
        Ok(bag)
    }
}

/// Extract indexable field values from a markdown document.
fn extract_fields(doc: &SourceDoc) -> BTreeMap<&'static str, String> {
    let mut fields = BTreeMap::new();
    fields.insert("url", doc.url.clone());

    let url_path = Url::parse(&doc.url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| doc.url.clone());
    fields.insert("url_path", url_path);

    let mut headings_h1 = Vec::new();
    let mut headings_h2 = Vec::new();
    let mut headings_rest = Vec::new();
    let mut in_code_fence = false;
    for line in doc.content.lines() {
        if line.trim_start().starts_with("```") {
            in_code_fence = !in_code_fence;
            continue;
        }
        if in_code_fence {
            continue;
        }
        if let Some(h) = line.strip_prefix("# ") {
            headings_h1.push(h.trim().to_string());
        } else if let Some(h) = line.strip_prefix("## ") {
            headings_h2.push(h.trim().to_string());
        } else if line.starts_with("###") {
            if let Some(rest) = line.trim_start_matches('#').strip_prefix(' ') {
                headings_rest.push(rest.trim().to_string());
            }
        }
    }

    let title = headings_h1
        .first()
        .cloned()
        .or_else(|| {
            doc.sidecar
                .as_ref()
                .map(|s| s.title.clone())
                .filter(|t| !t.is_empty())
        })
        .unwrap_or_else(|| {
            doc.rel_path
                .file_stem()
                .map_or_else(|| doc.url.clone(), |s| s.to_string_lossy().into_owned())
        });
    fields.insert("title", title);

    if !headings_h1.is_empty() {
        fields.insert("headings_h1", headings_h1.join(" "));
    }
    if !headings_h2.is_empty() {
        fields.insert("headings_h2", headings_h2.join(" "));
    }
    if !headings_rest.is_empty() {
        fields.insert("headings", headings_rest.join(" "));
    }

    fields.insert("body", doc.content.clone());
    fields.insert(
        "path",
        doc.rel_path.to_string_lossy().replace('\\', "/"),
    );

    if let Some(sidecar) = &doc.sidecar {
        if !sidecar.tags.is_empty() {
            fields.insert("tags", sidecar.tags.join(" "));
            fields.insert("tags_list", sidecar.tags.join("\u{1f}"));
        }
        fields.insert(
            "language",
            sidecar.language.clone().unwrap_or_else(|| "en".to_string()),
        );
        let excerpt = if sidecar.excerpt.is_empty() {
            first_prose_paragraph(&doc.content)
        } else {
            sidecar.excerpt.clone()
        };
        fields.insert("excerpt", excerpt);
    } else {
        fields.insert("language", "en".to_string());
        fields.insert("excerpt", first_prose_paragraph(&doc.content));
    }

    fields
}

fn is_excluded_dir(path: &Path, docs_root: &Path) -> bool {
    if path == docs_root {
        return false;
    }
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| {
            name == METADATA_DIR
                || name == SEGMENTS_DIR
                || name.starts_with(STAGING_PREFIX)
                || (path.is_dir() && name.starts_with('.'))
        })
}

fn truncate_utf8(value: &str, max_bytes: usize) -> String {
    if value.len() <= max_bytes {
        return value.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::search::bm25::{Bm25Engine, RankingOptions};
    use crate::url_translator::UrlTranslator;
    use tempfile::TempDir;

    fn write_doc(root: &Path, url: &str, markdown: &str, language: Option<&str>) {
        let translator = UrlTranslator::new(root);
        let md_path = translator.markdown_path(url).unwrap();
        fs::create_dir_all(md_path.parent().unwrap()).unwrap();
        fs::write(&md_path, markdown).unwrap();

        let meta_path = translator.metadata_path(url).unwrap();
        fs::create_dir_all(meta_path.parent().unwrap()).unwrap();
        let sidecar = DocumentSidecar {
            url: url.to_string(),
            title: "Sidecar Title".to_string(),
            language: language.map(str::to_string),
            last_fetched_at: Some("2024-06-01T12:00:00+00:00".to_string()),
            ..DocumentSidecar::default()
        };
        fs::write(meta_path, serde_json::to_string(&sidecar).unwrap()).unwrap();
    }

    fn indexer(root: &Path) -> Indexer {
        Indexer::new(IndexerContext {
            codename: "test-docs".to_string(),
            docs_root: root.to_path_buf(),
            segments_dir: root.join(SEGMENTS_DIR),
            source_type: SourceType::Online,
            url_whitelist_prefixes: Vec::new(),
            url_blacklist_prefixes: Vec::new(),
            analyzer_profile: None,
            max_segments: 8,
        })
        .unwrap()
    }

    #[test]
    fn builds_a_searchable_segment() {
        let dir = TempDir::new().unwrap();
        write_doc(
            dir.path(),
            "https://ex.com/docs/settings/",
            "# Settings\n\nThe settings module controls behavior.\n\n## Defaults\n\nDefaults exist.",
            Some("en"),
        );
        write_doc(
            dir.path(),
            "https://ex.com/docs/routing/",
            "# Routing\n\nRouting dispatches requests to handlers.",
            Some("en"),
        );

        let indexer = indexer(dir.path());
        let report = indexer
            .build_segment(&BuildOptions {
                persist: true,
                ..BuildOptions::default()
            })
            .unwrap();

        assert_eq!(report.documents_indexed, 2);
        assert!(report.errors.is_empty());
        assert_eq!(report.segment_ids.len(), 1);

        let segment = indexer.store().latest().unwrap().unwrap();
        assert_eq!(segment.doc_count, 2);

        let engine = Bm25Engine::new(segment.schema.clone(), RankingOptions::default());
        let tokens = engine.tokenize_query("settings").unwrap();
        let ranked = engine.score(&segment, &tokens, 10).unwrap();
        assert_eq!(ranked[0].doc_id, "https://ex.com/docs/settings/");

        let stored = segment.get_document("https://ex.com/docs/settings/").unwrap().unwrap();
        assert_eq!(stored.get("title").unwrap(), "Settings");
        assert_eq!(stored.get("language").unwrap(), "en");
        assert!(stored.get("timestamp").unwrap().as_i64().unwrap() > 0);
    }

    #[test]
    fn rebuild_of_unchanged_corpus_is_a_noop() {
        let dir = TempDir::new().unwrap();
        write_doc(
            dir.path(),
            "https://ex.com/docs/",
            "# Docs\n\nSome body content.",
            None,
        );
        let indexer = indexer(dir.path());
        let options = BuildOptions {
            persist: true,
            ..BuildOptions::default()
        };

        let first = indexer.build_segment(&options).unwrap();
        let manifest_before = indexer.store().read_manifest().unwrap();
        let second = indexer.build_segment(&options).unwrap();
        let manifest_after = indexer.store().read_manifest().unwrap();

        assert_eq!(first.segment_ids, second.segment_ids);
        assert_eq!(second.documents_indexed, 0);
        assert_eq!(second.documents_skipped, 1);
        assert_eq!(manifest_before.segments, manifest_after.segments);
        assert_eq!(manifest_after.segments.len(), 1);
    }

    #[test]
    fn fingerprint_tracks_content_changes() {
        let dir = TempDir::new().unwrap();
        write_doc(
            dir.path(),
            "https://ex.com/docs/",
            "# Docs\n\nOriginal content.",
            None,
        );
        let indexer = indexer(dir.path());
        let options = BuildOptions {
            persist: true,
            ..BuildOptions::default()
        };
        let first = indexer.build_segment(&options).unwrap();

        let audit = indexer.fingerprint_audit().unwrap();
        assert!(!audit.needs_rebuild);
        assert_eq!(audit.current_segment_id.as_deref(), Some(first.segment_ids[0].as_str()));

        write_doc(
            dir.path(),
            "https://ex.com/docs/",
            "# Docs\n\nUpdated content entirely.",
            None,
        );
        let audit = indexer.fingerprint_audit().unwrap();
        assert!(audit.needs_rebuild);

        let second = indexer.build_segment(&options).unwrap();
        assert_ne!(first.segment_ids, second.segment_ids);
        assert_eq!(
            indexer.store().latest_segment_id().unwrap(),
            Some(second.segment_ids[0].clone())
        );
    }

    #[test]
    fn whitelist_and_blacklist_filter_online_corpora() {
        let dir = TempDir::new().unwrap();
        write_doc(dir.path(), "https://ex.com/docs/keep/", "# Keep\n\nKept.", None);
        write_doc(dir.path(), "https://ex.com/blog/drop/", "# Drop\n\nDropped.", None);

        let mut context = IndexerContext {
            codename: "test-docs".to_string(),
            docs_root: dir.path().to_path_buf(),
            segments_dir: dir.path().join(SEGMENTS_DIR),
            source_type: SourceType::Online,
            url_whitelist_prefixes: vec!["https://ex.com/docs/".to_string()],
            url_blacklist_prefixes: Vec::new(),
            analyzer_profile: None,
            max_segments: 8,
        };
        let report = Indexer::new(context.clone())
            .unwrap()
            .build_segment(&BuildOptions {
                persist: false,
                ..BuildOptions::default()
            })
            .unwrap();
        assert_eq!(report.documents_indexed, 1);
        assert_eq!(report.documents_skipped, 1);

        context.url_whitelist_prefixes = Vec::new();
        context.url_blacklist_prefixes = vec!["https://ex.com/blog/".to_string()];
        let report = Indexer::new(context)
            .unwrap()
            .build_segment(&BuildOptions {
                persist: false,
                ..BuildOptions::default()
            })
            .unwrap();
        assert_eq!(report.documents_indexed, 1);
    }

    #[test]
    fn missing_metadata_still_indexes_under_path_url() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("guides")).unwrap();
        fs::write(
            dir.path().join("guides/setup.md"),
            "# Setup\n\nInstallation steps.",
        )
        .unwrap();

        let indexer = indexer(dir.path());
        let report = indexer
            .build_segment(&BuildOptions {
                persist: true,
                ..BuildOptions::default()
            })
            .unwrap();
        assert_eq!(report.documents_indexed, 1);

        let segment = indexer.store().latest().unwrap().unwrap();
        let stored = segment.get_document("guides/setup.md").unwrap().unwrap();
        assert_eq!(stored.get("title").unwrap(), "Setup");
        assert_eq!(stored.get("language").unwrap(), "en");
    }

    #[test]
    fn stored_title_and_body_are_truncated() {
        let dir = TempDir::new().unwrap();
        let long_title = "t".repeat(5000);
        let long_body = format!("# {long_title}\n\n{}", "body ".repeat(40_000));
        write_doc(dir.path(), "https://ex.com/long/", &long_body, None);

        let indexer = indexer(dir.path());
        indexer
            .build_segment(&BuildOptions {
                persist: true,
                ..BuildOptions::default()
            })
            .unwrap();

        let segment = indexer.store().latest().unwrap().unwrap();
        let stored = segment.get_document("https://ex.com/long/").unwrap().unwrap();
        assert!(stored.get("title").unwrap().as_str().unwrap().len() <= MAX_STORED_TITLE);
        assert!(stored.get("body").unwrap().as_str().unwrap().len() <= MAX_STORED_BODY);
    }

    #[test]
    fn changed_paths_build_replaces_the_active_segment() {
        let dir = TempDir::new().unwrap();
        write_doc(dir.path(), "https://ex.com/a/", "# A\n\nAlpha body.", None);
        write_doc(dir.path(), "https://ex.com/b/", "# B\n\nBeta body.", None);
        let indexer = indexer(dir.path());
        indexer
            .build_segment(&BuildOptions {
                persist: true,
                ..BuildOptions::default()
            })
            .unwrap();

        let translator = UrlTranslator::new(dir.path());
        let rel = translator
            .relative_markdown_path("https://ex.com/a/")
            .unwrap();
        let report = indexer
            .build_segment(&BuildOptions {
                changed_only: true,
                changed_paths: Some(vec![rel]),
                persist: true,
                ..BuildOptions::default()
            })
            .unwrap();

        assert_eq!(report.documents_indexed, 1);
        let segment = indexer.store().latest().unwrap().unwrap();
        assert_eq!(segment.doc_count, 1);
        assert_eq!(segment.segment_id, report.segment_ids[0]);
    }

    #[test]
    fn staging_and_internal_dirs_are_excluded() {
        let dir = TempDir::new().unwrap();
        write_doc(dir.path(), "https://ex.com/real/", "# Real\n\nReal doc.", None);
        let staging = dir.path().join(format!("{STAGING_PREFIX}abc"));
        fs::create_dir_all(&staging).unwrap();
        fs::write(staging.join("ghost.md"), "# Ghost\n\nShould not index.").unwrap();

        let indexer = indexer(dir.path());
        let report = indexer
            .build_segment(&BuildOptions {
                persist: false,
                ..BuildOptions::default()
            })
            .unwrap();
        assert_eq!(report.documents_indexed, 1);
    }
}
