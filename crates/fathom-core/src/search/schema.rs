//! Index schema: an ordered list of typed fields.
//!
//! The schema travels with every segment (serialized into the segment's
//! metadata table) so a segment can be scored without consulting tenant
//! configuration. One field is declared unique and becomes the document
//! identity.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// Types of fields supported in the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// Analyzed text field for full-text search.
    Text,
    /// Exact-match field (tags, paths, URLs).
    Keyword,
    /// Numeric field for sorting.
    Numeric,
    /// Stored with the document but not searchable.
    Stored,
}

/// A single field definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field name (e.g. `body`, `title`).
    pub name: String,
    /// Field type.
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Whether the raw value is stored for retrieval.
    #[serde(default = "default_true")]
    pub stored: bool,
    /// Whether the field is searchable.
    #[serde(default = "default_true")]
    pub indexed: bool,
    /// Field weight in BM25F scoring.
    #[serde(default = "default_boost")]
    pub boost: f64,
    /// Analyzer profile for text fields; `None` means the standard
    /// analyzer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyzer_name: Option<String>,
    /// Whether a numeric field supports sorting.
    #[serde(default = "default_true")]
    pub sortable: bool,
}

const fn default_true() -> bool {
    true
}

const fn default_boost() -> f64 {
    1.0
}

impl FieldSpec {
    /// An analyzed text field.
    #[must_use]
    pub fn text(name: &str, boost: f64, analyzer_name: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            field_type: FieldType::Text,
            stored: true,
            indexed: true,
            boost,
            analyzer_name: analyzer_name.map(str::to_string),
            sortable: true,
        }
    }

    /// An exact-match keyword field.
    #[must_use]
    pub fn keyword(name: &str, boost: f64) -> Self {
        Self {
            name: name.to_string(),
            field_type: FieldType::Keyword,
            stored: true,
            indexed: true,
            boost,
            analyzer_name: None,
            sortable: true,
        }
    }

    /// A stored-only field (never indexed).
    #[must_use]
    pub fn stored(name: &str) -> Self {
        Self {
            name: name.to_string(),
            field_type: FieldType::Stored,
            stored: true,
            indexed: false,
            boost: 0.0,
            analyzer_name: None,
            sortable: true,
        }
    }

    /// A numeric field.
    #[must_use]
    pub fn numeric(name: &str, sortable: bool) -> Self {
        Self {
            name: name.to_string(),
            field_type: FieldType::Numeric,
            stored: true,
            indexed: true,
            boost: 1.0,
            analyzer_name: None,
            sortable,
        }
    }
}

/// Schema definition for a search index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// Schema name, recorded in the segment metadata.
    #[serde(default = "default_schema_name")]
    pub name: String,
    /// Name of the unique field carrying document identity.
    #[serde(default = "default_unique_field")]
    pub unique_field: String,
    /// Ordered field definitions.
    pub fields: Vec<FieldSpec>,
}

fn default_schema_name() -> String {
    "default".to_string()
}

fn default_unique_field() -> String {
    "url".to_string()
}

impl Schema {
    /// Build a schema, validating that the unique field exists.
    pub fn new(name: &str, unique_field: &str, fields: Vec<FieldSpec>) -> Result<Self> {
        if !fields.iter().any(|f| f.name == unique_field) {
            return Err(Error::Config(format!(
                "Unique field '{unique_field}' not found in schema"
            )));
        }
        Ok(Self {
            name: name.to_string(),
            unique_field: unique_field.to_string(),
            fields,
        })
    }

    /// Get a field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Check whether a field exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// All indexed text fields, in schema order.
    #[must_use]
    pub fn text_fields(&self) -> Vec<&FieldSpec> {
        self.fields
            .iter()
            .filter(|f| f.field_type == FieldType::Text && f.indexed)
            .collect()
    }

    /// All indexed fields (text and keyword), in schema order.
    #[must_use]
    pub fn indexed_fields(&self) -> Vec<&FieldSpec> {
        self.fields
            .iter()
            .filter(|f| {
                f.indexed && matches!(f.field_type, FieldType::Text | FieldType::Keyword)
            })
            .collect()
    }

    /// Boost factor for a field; unknown fields score at 1.0.
    #[must_use]
    pub fn boost(&self, name: &str) -> f64 {
        self.field(name).map_or(1.0, |f| f.boost)
    }

    /// Stable digest over the serialized schema, folded into segment
    /// fingerprints so schema changes force a rebuild.
    pub fn digest(&self) -> Result<String> {
        let encoded = serde_json::to_string(self)?;
        let mut hasher = Sha256::new();
        hasher.update(encoded.as_bytes());
        Ok(format!("{:x}", hasher.finalize()))
    }
}

/// The default schema for documentation search.
///
/// Titles and H1 headings carry the highest boost, H2 medium, remaining
/// headings and path fields a light boost over body text. `language` is
/// stored only (filtering, never searched); `excerpt` is display-only.
#[must_use]
pub fn default_schema() -> Schema {
    Schema {
        name: "docs".to_string(),
        unique_field: "url".to_string(),
        fields: vec![
            FieldSpec::keyword("url", 1.0),
            FieldSpec::text("url_path", 1.5, Some("path")),
            FieldSpec::text("title", 2.5, None),
            FieldSpec::text("headings_h1", 2.5, None),
            FieldSpec::text("headings_h2", 2.0, None),
            FieldSpec::text("headings", 1.5, None),
            FieldSpec::text("body", 1.0, Some("english")),
            FieldSpec::keyword("path", 1.5),
            FieldSpec::keyword("tags", 1.5),
            FieldSpec {
                name: "language".to_string(),
                field_type: FieldType::Keyword,
                stored: true,
                indexed: false,
                boost: 0.0,
                analyzer_name: None,
                sortable: true,
            },
            FieldSpec::stored("excerpt"),
            FieldSpec::numeric("timestamp", true),
        ],
    }
}

/// Schema for a tenant, honoring an analyzer profile override on the body
/// field.
#[must_use]
pub fn schema_for_profile(analyzer_profile: Option<&str>) -> Schema {
    let mut schema = default_schema();
    if let Some(profile) = analyzer_profile {
        for field in &mut schema.fields {
            if field.name == "body" {
                field.analyzer_name = Some(profile.to_string());
            }
        }
    }
    schema
}
