//! On-disk segment store for the inverted index.
//!
//! A segment is an immutable SQLite database produced by the indexer:
//!
//! ```text
//! <segments_dir>/
//!   manifest.json
//!   <segment_id>.db          # postings, documents, field lengths
//!   <segment_id>.meta.json   # optional side-car(s)
//! ```
//!
//! Segments are never mutated after being sealed; new data produces a new
//! segment and the manifest points at the new id. The manifest is the
//! authority on which segment is active and is rewritten atomically
//! (write-temp + rename). Posting positions are packed as little-endian
//! `u32` blobs.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::search::schema::Schema;
use crate::{Error, Result};

/// Manifest filename within the segment directory.
pub const MANIFEST_FILENAME: &str = "manifest.json";

/// Suffix for segment database files.
pub const DB_SUFFIX: &str = ".db";

/// Default retention cap on stored segments.
pub const DEFAULT_MAX_SEGMENTS: usize = 32;

/// A posting for a `(field, term)` pair: the document and the token
/// positions of the term within that field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    /// Document id (the unique-field value).
    pub doc_id: String,
    /// Dense token positions of the term in the field.
    pub positions: Vec<u32>,
}

impl Posting {
    /// Term frequency, derived from the positions list.
    #[must_use]
    pub fn frequency(&self) -> usize {
        self.positions.len()
    }

    /// Pack positions as a little-endian `u32` blob.
    #[must_use]
    pub fn positions_blob(&self) -> Vec<u8> {
        let mut blob = Vec::with_capacity(self.positions.len() * 4);
        for pos in &self.positions {
            blob.extend_from_slice(&pos.to_le_bytes());
        }
        blob
    }

    /// Decode a little-endian `u32` blob back into positions.
    #[must_use]
    pub fn positions_from_blob(blob: &[u8]) -> Vec<u32> {
        blob.chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }
}

/// Per-field posting lists keyed by term.
pub type FieldPostings = BTreeMap<String, Vec<Posting>>;

/// In-memory segment contents produced by the indexer, consumed by
/// [`SegmentStore::save`].
#[derive(Debug, Clone)]
pub struct SegmentData {
    /// Fingerprint-derived segment id.
    pub segment_id: String,
    /// Schema the segment was built with.
    pub schema: Schema,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// `field -> term -> postings`.
    pub postings: BTreeMap<String, FieldPostings>,
    /// `doc_id -> stored field bag` (JSON object per document).
    pub stored_fields: BTreeMap<String, serde_json::Map<String, serde_json::Value>>,
    /// `field -> doc_id -> token count`, used by BM25 length
    /// normalization.
    pub field_lengths: BTreeMap<String, BTreeMap<String, u64>>,
}

impl SegmentData {
    /// Number of documents in the segment.
    #[must_use]
    pub fn doc_count(&self) -> usize {
        self.stored_fields.len()
    }
}

/// A sealed, read-only segment backed by its SQLite file.
///
/// Lookups open a short-lived read-only connection per call; segment files
/// never change after seal, so there is no cache invalidation to manage.
#[derive(Debug, Clone)]
pub struct Segment {
    /// Segment id (hex fingerprint).
    pub segment_id: String,
    /// Schema recorded in the segment metadata.
    pub schema: Schema,
    /// Path to the segment database.
    pub db_path: PathBuf,
    /// Creation timestamp recorded in the segment metadata.
    pub created_at: DateTime<Utc>,
    /// Number of documents stored.
    pub doc_count: usize,
}

impl Segment {
    fn reader(&self) -> Result<Connection> {
        // WAL databases cannot always be opened with O_RDONLY; a normal
        // open with query_only gives the same read-only contract.
        let conn = Connection::open(&self.db_path)?;
        conn.execute_batch(
            "PRAGMA query_only = ON;
             PRAGMA cache_size = -64000;
             PRAGMA mmap_size = 268435456;
             PRAGMA temp_store = MEMORY;
             PRAGMA cache_spill = OFF;",
        )?;
        Ok(conn)
    }

    /// Retrieve the stored field bag for a document.
    pub fn get_document(
        &self,
        doc_id: &str,
    ) -> Result<Option<serde_json::Map<String, serde_json::Value>>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare("SELECT field_data FROM documents WHERE doc_id = ?1")?;
        let row: Option<String> = stmt
            .query_row(params![doc_id], |row| row.get(0))
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        match row {
            Some(encoded) => {
                let value: serde_json::Value = serde_json::from_str(&encoded)?;
                match value {
                    serde_json::Value::Object(map) => Ok(Some(map)),
                    _ => Ok(None),
                }
            },
            None => Ok(None),
        }
    }

    /// All document ids with their stored field bags.
    pub fn all_documents(
        &self,
    ) -> Result<BTreeMap<String, serde_json::Map<String, serde_json::Value>>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare("SELECT doc_id, field_data FROM documents")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut out = BTreeMap::new();
        for row in rows {
            let (doc_id, encoded) = row?;
            if let serde_json::Value::Object(map) = serde_json::from_str(&encoded)? {
                out.insert(doc_id, map);
            }
        }
        Ok(out)
    }

    /// Postings for a specific term in a field.
    pub fn get_postings(&self, field: &str, term: &str) -> Result<Vec<Posting>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT doc_id, positions_blob FROM postings WHERE field = ?1 AND term = ?2",
        )?;
        let rows = stmt.query_map(params![field, term], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;
        let mut postings = Vec::new();
        for row in rows {
            let (doc_id, blob) = row?;
            postings.push(Posting {
                doc_id,
                positions: Posting::positions_from_blob(&blob),
            });
        }
        Ok(postings)
    }

    /// All postings for a field, keyed by term.
    ///
    /// One query per field per search; the BM25 engine also uses the key
    /// set as the field vocabulary for fuzzy fallback.
    pub fn get_field_postings(&self, field: &str) -> Result<FieldPostings> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT term, doc_id, positions_blob FROM postings WHERE field = ?1",
        )?;
        let rows = stmt.query_map(params![field], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        })?;
        let mut out: FieldPostings = BTreeMap::new();
        for row in rows {
            let (term, doc_id, blob) = row?;
            out.entry(term).or_default().push(Posting {
                doc_id,
                positions: Posting::positions_from_blob(&blob),
            });
        }
        Ok(out)
    }

    /// `doc_id -> token count` for a field.
    pub fn field_lengths(&self, field: &str) -> Result<HashMap<String, u64>> {
        let conn = self.reader()?;
        let mut stmt =
            conn.prepare("SELECT doc_id, length FROM field_lengths WHERE field = ?1")?;
        let rows = stmt.query_map(params![field], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut out = HashMap::new();
        for row in rows {
            let (doc_id, length) = row?;
            out.insert(doc_id, u64::try_from(length).unwrap_or(0));
        }
        Ok(out)
    }

    /// All field lengths, grouped by field.
    pub fn all_field_lengths(&self) -> Result<HashMap<String, HashMap<String, u64>>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare("SELECT field, doc_id, length FROM field_lengths")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;
        let mut out: HashMap<String, HashMap<String, u64>> = HashMap::new();
        for row in rows {
            let (field, doc_id, length) = row?;
            out.entry(field)
                .or_default()
                .insert(doc_id, u64::try_from(length).unwrap_or(0));
        }
        Ok(out)
    }
}

/// One manifest entry per stored segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Segment id.
    pub segment_id: String,
    /// Creation timestamp (RFC 3339).
    pub created_at: String,
    /// Document count at seal time.
    pub doc_count: usize,
    /// Filenames belonging to the segment (database plus side-cars).
    pub files: Vec<String>,
}

/// The manifest listing stored segments; the last-saved entry is active.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// When the manifest was last rewritten (RFC 3339).
    #[serde(default)]
    pub updated_at: String,
    /// Active segment id, if any segment exists.
    #[serde(default)]
    pub latest_segment_id: Option<String>,
    /// Ordered entries, oldest first.
    #[serde(default)]
    pub segments: Vec<ManifestEntry>,
}

/// SQLite-backed segment store with manifest-driven retention.
#[derive(Debug, Clone)]
pub struct SegmentStore {
    directory: PathBuf,
    max_segments: usize,
}

impl SegmentStore {
    /// Open (creating if needed) a store in `directory` with the default
    /// retention cap.
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self> {
        Self::with_max_segments(directory, DEFAULT_MAX_SEGMENTS)
    }

    /// Open a store with an explicit retention cap (minimum 1).
    pub fn with_max_segments(directory: impl Into<PathBuf>, max_segments: usize) -> Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory)
            .map_err(|e| Error::Storage(format!("Failed to create segment directory: {e}")))?;
        Ok(Self {
            directory,
            max_segments: max_segments.max(1),
        })
    }

    /// The directory the store manages.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn manifest_path(&self) -> PathBuf {
        self.directory.join(MANIFEST_FILENAME)
    }

    fn db_path(&self, segment_id: &str) -> PathBuf {
        self.directory.join(format!("{segment_id}{DB_SUFFIX}"))
    }

    /// Read the manifest, treating a missing file as empty.
    pub fn read_manifest(&self) -> Result<Manifest> {
        let path = self.manifest_path();
        if !path.exists() {
            return Ok(Manifest::default());
        }
        let raw = fs::read_to_string(&path)
            .map_err(|e| Error::Storage(format!("Failed to read manifest: {e}")))?;
        let manifest = serde_json::from_str(&raw)?;
        Ok(manifest)
    }

    fn write_manifest(&self, manifest: &Manifest) -> Result<()> {
        let path = self.manifest_path();
        let tmp = path.with_extension("json.tmp");
        let encoded = serde_json::to_string_pretty(manifest)?;
        fs::write(&tmp, encoded)
            .map_err(|e| Error::Storage(format!("Failed to write manifest: {e}")))?;
        fs::rename(&tmp, &path)
            .map_err(|e| Error::Storage(format!("Failed to commit manifest: {e}")))?;
        Ok(())
    }

    /// Save a segment, returning the database path.
    ///
    /// Saving an id that is already present in the manifest is a no-op:
    /// the existing entry is reused. Saves append exactly one manifest
    /// entry and prune segments beyond the retention cap.
    pub fn save(&self, data: &SegmentData, related_files: &[PathBuf]) -> Result<PathBuf> {
        let db_path = self.db_path(&data.segment_id);
        let mut manifest = self.read_manifest()?;

        if manifest
            .segments
            .iter()
            .any(|entry| entry.segment_id == data.segment_id)
        {
            debug!(segment_id = %data.segment_id, "Segment already stored; save is a no-op");
            return Ok(db_path);
        }

        self.write_segment_db(&db_path, data)?;

        let mut files = vec![format!("{}{}", data.segment_id, DB_SUFFIX)];
        for related in related_files {
            if let Some(name) = related.file_name() {
                files.push(name.to_string_lossy().into_owned());
            }
        }

        manifest.segments.push(ManifestEntry {
            segment_id: data.segment_id.clone(),
            created_at: data.created_at.to_rfc3339(),
            doc_count: data.doc_count(),
            files,
        });
        manifest.latest_segment_id = Some(data.segment_id.clone());
        manifest.updated_at = Utc::now().to_rfc3339();

        // Retention: drop the oldest entries beyond the cap along with
        // their files.
        while manifest.segments.len() > self.max_segments {
            let removed = manifest.segments.remove(0);
            self.delete_entry_files(&removed);
        }

        self.write_manifest(&manifest)?;
        debug!(segment_id = %data.segment_id, docs = data.doc_count(), "Segment saved");
        Ok(db_path)
    }

    fn write_segment_db(&self, db_path: &Path, data: &SegmentData) -> Result<()> {
        if db_path.exists() {
            fs::remove_file(db_path)
                .map_err(|e| Error::Storage(format!("Failed to replace segment file: {e}")))?;
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "PRAGMA page_size = 4096;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA mmap_size = 268435456;
             PRAGMA temp_store = MEMORY;
             PRAGMA cache_spill = OFF;",
        )?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS metadata (
                 key TEXT PRIMARY KEY,
                 value TEXT
             );
             CREATE TABLE IF NOT EXISTS postings (
                 field TEXT NOT NULL,
                 term TEXT NOT NULL,
                 doc_id TEXT NOT NULL,
                 positions_blob BLOB,
                 PRIMARY KEY (field, term, doc_id)
             ) WITHOUT ROWID;
             CREATE TABLE IF NOT EXISTS documents (
                 doc_id TEXT PRIMARY KEY,
                 field_data TEXT
             );
             CREATE TABLE IF NOT EXISTS field_lengths (
                 field TEXT NOT NULL,
                 doc_id TEXT NOT NULL,
                 length INTEGER NOT NULL,
                 PRIMARY KEY (field, doc_id)
             );
             CREATE INDEX IF NOT EXISTS idx_postings_field_term
                 ON postings(field, term);
             CREATE INDEX IF NOT EXISTS idx_field_lengths_field
                 ON field_lengths(field);",
        )?;

        let tx = conn.unchecked_transaction()?;
        {
            let schema_json = serde_json::to_string(&data.schema)?;
            let mut meta = tx.prepare(
                "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
            )?;
            meta.execute(params!["segment_id", data.segment_id])?;
            meta.execute(params!["schema", schema_json])?;
            meta.execute(params!["created_at", data.created_at.to_rfc3339()])?;

            let mut insert_posting = tx.prepare(
                "INSERT OR REPLACE INTO postings (field, term, doc_id, positions_blob)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (field, terms) in &data.postings {
                for (term, postings) in terms {
                    for posting in postings {
                        insert_posting.execute(params![
                            field,
                            term,
                            posting.doc_id,
                            posting.positions_blob()
                        ])?;
                    }
                }
            }

            let mut insert_doc = tx.prepare(
                "INSERT OR REPLACE INTO documents (doc_id, field_data) VALUES (?1, ?2)",
            )?;
            for (doc_id, fields) in &data.stored_fields {
                insert_doc.execute(params![
                    doc_id,
                    serde_json::to_string(&serde_json::Value::Object(fields.clone()))?
                ])?;
            }

            let mut insert_len = tx.prepare(
                "INSERT OR REPLACE INTO field_lengths (field, doc_id, length)
                 VALUES (?1, ?2, ?3)",
            )?;
            for (field, lengths) in &data.field_lengths {
                for (doc_id, length) in lengths {
                    insert_len.execute(params![
                        field,
                        doc_id,
                        i64::try_from(*length).unwrap_or(i64::MAX)
                    ])?;
                }
            }
        }
        tx.commit()?;

        // Refresh planner statistics once the segment is fully written.
        conn.execute_batch("ANALYZE")?;
        Ok(())
    }

    /// Load a segment by id if its database exists.
    pub fn load(&self, segment_id: &str) -> Result<Option<Segment>> {
        let db_path = self.db_path(segment_id);
        if !db_path.exists() {
            return Ok(None);
        }

        let conn = Connection::open(&db_path)?;
        conn.execute_batch("PRAGMA query_only = ON;")?;
        let mut stmt = conn.prepare("SELECT key, value FROM metadata")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut metadata = HashMap::new();
        for row in rows {
            let (key, value) = row?;
            metadata.insert(key, value);
        }

        let schema: Schema = metadata
            .get("schema")
            .map(|raw| serde_json::from_str(raw))
            .transpose()?
            .ok_or_else(|| Error::Index(format!("Segment '{segment_id}' missing schema")))?;

        let created_at = metadata
            .get("created_at")
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map_or_else(Utc::now, |dt| dt.with_timezone(&Utc));

        let doc_count: usize = conn
            .query_row("SELECT COUNT(*) FROM documents", [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|n| usize::try_from(n).unwrap_or(0))?;

        Ok(Some(Segment {
            segment_id: segment_id.to_string(),
            schema,
            db_path,
            created_at,
            doc_count,
        }))
    }

    /// Load the active segment, if any.
    pub fn latest(&self) -> Result<Option<Segment>> {
        match self.latest_segment_id()? {
            Some(id) => self.load(&id),
            None => Ok(None),
        }
    }

    /// Active segment id per the manifest.
    pub fn latest_segment_id(&self) -> Result<Option<String>> {
        Ok(self.read_manifest()?.latest_segment_id)
    }

    /// All manifest entries, oldest first.
    pub fn list_segments(&self) -> Result<Vec<ManifestEntry>> {
        Ok(self.read_manifest()?.segments)
    }

    /// Path to a stored segment database, if present on disk.
    #[must_use]
    pub fn segment_path(&self, segment_id: &str) -> Option<PathBuf> {
        let path = self.db_path(segment_id);
        path.exists().then_some(path)
    }

    /// Delete every segment whose id is not in `keep`, updating the
    /// manifest.
    pub fn prune_to_segment_ids(&self, keep: &[String]) -> Result<()> {
        let mut manifest = self.read_manifest()?;
        let (kept, dropped): (Vec<ManifestEntry>, Vec<ManifestEntry>) = manifest
            .segments
            .into_iter()
            .partition(|entry| keep.contains(&entry.segment_id));

        for entry in &dropped {
            self.delete_entry_files(entry);
        }

        manifest.segments = kept;
        if let Some(latest) = &manifest.latest_segment_id {
            if !keep.contains(latest) {
                manifest.latest_segment_id = manifest
                    .segments
                    .last()
                    .map(|entry| entry.segment_id.clone());
            }
        }
        manifest.updated_at = Utc::now().to_rfc3339();
        self.write_manifest(&manifest)
    }

    fn delete_entry_files(&self, entry: &ManifestEntry) {
        for file in &entry.files {
            let path = self.directory.join(file);
            if path.exists() {
                if let Err(e) = fs::remove_file(&path) {
                    warn!(file = %path.display(), error = %e, "Failed to delete segment file");
                }
            }
        }
        // WAL side files linger when a segment was never checkpointed.
        for suffix in ["-wal", "-shm"] {
            let path = self
                .directory
                .join(format!("{}{}{}", entry.segment_id, DB_SUFFIX, suffix));
            if path.exists() {
                let _ = fs::remove_file(path);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::search::schema::default_schema;
    use tempfile::TempDir;

    fn sample_segment(id: &str, doc_id: &str) -> SegmentData {
        let mut postings = BTreeMap::new();
        let mut body: FieldPostings = BTreeMap::new();
        body.insert(
            "django".to_string(),
            vec![Posting {
                doc_id: doc_id.to_string(),
                positions: vec![0, 7, 42],
            }],
        );
        postings.insert("body".to_string(), body);

        let mut stored = BTreeMap::new();
        let mut fields = serde_json::Map::new();
        fields.insert(
            "title".to_string(),
            serde_json::Value::String("Django Models".to_string()),
        );
        fields.insert(
            "language".to_string(),
            serde_json::Value::String("en".to_string()),
        );
        stored.insert(doc_id.to_string(), fields);

        let mut lengths = BTreeMap::new();
        let mut body_lengths = BTreeMap::new();
        body_lengths.insert(doc_id.to_string(), 120_u64);
        lengths.insert("body".to_string(), body_lengths);

        SegmentData {
            segment_id: id.to_string(),
            schema: default_schema(),
            created_at: Utc::now(),
            postings,
            stored_fields: stored,
            field_lengths: lengths,
        }
    }

    #[test]
    fn posting_blob_round_trips() {
        let posting = Posting {
            doc_id: "doc".to_string(),
            positions: vec![0, 1, 250, 65_536, u32::MAX],
        };
        let blob = posting.positions_blob();
        assert_eq!(blob.len(), posting.positions.len() * 4);
        assert_eq!(Posting::positions_from_blob(&blob), posting.positions);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = SegmentStore::new(dir.path()).unwrap();
        let data = sample_segment("seg-a", "https://ex.com/docs/");

        let db_path = store.save(&data, &[]).unwrap();
        assert!(db_path.exists());

        let segment = store.load("seg-a").unwrap().unwrap();
        assert_eq!(segment.segment_id, "seg-a");
        assert_eq!(segment.doc_count, 1);
        assert_eq!(segment.schema, data.schema);

        let postings = segment.get_postings("body", "django").unwrap();
        assert_eq!(postings.len(), 1);
        assert_eq!(postings[0].doc_id, "https://ex.com/docs/");
        assert_eq!(postings[0].positions, vec![0, 7, 42]);
        assert_eq!(postings[0].frequency(), 3);

        let doc = segment.get_document("https://ex.com/docs/").unwrap().unwrap();
        assert_eq!(doc.get("title").unwrap(), "Django Models");

        let lengths = segment.field_lengths("body").unwrap();
        assert_eq!(lengths.get("https://ex.com/docs/"), Some(&120));
    }

    #[test]
    fn duplicate_save_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let store = SegmentStore::new(dir.path()).unwrap();
        let data = sample_segment("seg-a", "https://ex.com/docs/");

        store.save(&data, &[]).unwrap();
        let manifest_before = store.read_manifest().unwrap();
        store.save(&data, &[]).unwrap();
        let manifest_after = store.read_manifest().unwrap();

        assert_eq!(manifest_after.segments.len(), 1);
        assert_eq!(manifest_before.segments, manifest_after.segments);
    }

    #[test]
    fn latest_follows_the_manifest() {
        let dir = TempDir::new().unwrap();
        let store = SegmentStore::new(dir.path()).unwrap();
        assert!(store.latest().unwrap().is_none());

        store
            .save(&sample_segment("seg-a", "https://ex.com/a/"), &[])
            .unwrap();
        store
            .save(&sample_segment("seg-b", "https://ex.com/b/"), &[])
            .unwrap();

        assert_eq!(store.latest_segment_id().unwrap().as_deref(), Some("seg-b"));
        assert_eq!(store.latest().unwrap().unwrap().segment_id, "seg-b");
    }

    #[test]
    fn retention_cap_prunes_oldest() {
        let dir = TempDir::new().unwrap();
        let store = SegmentStore::with_max_segments(dir.path(), 2).unwrap();

        for id in ["seg-a", "seg-b", "seg-c"] {
            store.save(&sample_segment(id, "https://ex.com/x/"), &[]).unwrap();
        }

        let manifest = store.read_manifest().unwrap();
        let ids: Vec<&str> = manifest
            .segments
            .iter()
            .map(|e| e.segment_id.as_str())
            .collect();
        assert_eq!(ids, vec!["seg-b", "seg-c"]);
        assert!(store.segment_path("seg-a").is_none());
        assert!(store.segment_path("seg-b").is_some());
    }

    #[test]
    fn prune_to_segment_ids_removes_files_and_entries() {
        let dir = TempDir::new().unwrap();
        let store = SegmentStore::new(dir.path()).unwrap();
        store
            .save(&sample_segment("seg-a", "https://ex.com/a/"), &[])
            .unwrap();
        store
            .save(&sample_segment("seg-b", "https://ex.com/b/"), &[])
            .unwrap();

        store
            .prune_to_segment_ids(&["seg-b".to_string()])
            .unwrap();

        assert!(store.segment_path("seg-a").is_none());
        assert!(store.segment_path("seg-b").is_some());
        let manifest = store.read_manifest().unwrap();
        assert_eq!(manifest.segments.len(), 1);
        assert_eq!(manifest.latest_segment_id.as_deref(), Some("seg-b"));
    }

    #[test]
    fn field_postings_expose_vocabulary() {
        let dir = TempDir::new().unwrap();
        let store = SegmentStore::new(dir.path()).unwrap();
        store
            .save(&sample_segment("seg-a", "https://ex.com/a/"), &[])
            .unwrap();

        let segment = store.load("seg-a").unwrap().unwrap();
        let by_term = segment.get_field_postings("body").unwrap();
        assert_eq!(by_term.keys().collect::<Vec<_>>(), vec!["django"]);
        assert!(segment.get_field_postings("title").unwrap().is_empty());
    }
}
