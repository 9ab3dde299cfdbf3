//! The document aggregate: a single documentation page identified by its
//! URL.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state_store::FetchStatus;
use crate::{Error, Result};

/// Document content views.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentContent {
    /// Markdown rendition, what gets stored and indexed.
    pub markdown: String,
    /// Optional plain-text view.
    pub text: Option<String>,
}

impl DocumentContent {
    /// At least one view must carry non-whitespace content.
    #[must_use]
    pub fn is_substantive(&self) -> bool {
        !self.markdown.trim().is_empty()
            || self.text.as_deref().is_some_and(|t| !t.trim().is_empty())
    }
}

/// Fetch bookkeeping carried alongside a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentMetadata {
    /// Outcome of the fetch that produced this document.
    pub status: FetchStatus,
    /// Consecutive failures before this fetch.
    pub retry_count: u32,
    /// When the document was fetched.
    pub last_fetched_at: Option<DateTime<Utc>>,
    /// Which extractor produced the content (`mirror`, `article`,
    /// `fallback`).
    pub extraction_method: Option<String>,
    /// Document language code; defaults to `en` downstream.
    pub language: Option<String>,
    /// Free-form tags carried into the index.
    pub tags: Vec<String>,
}

impl Default for DocumentMetadata {
    fn default() -> Self {
        Self {
            status: FetchStatus::Success,
            retry_count: 0,
            last_fetched_at: None,
            extraction_method: None,
            language: None,
            tags: Vec::new(),
        }
    }
}

/// A documentation page. Identity is the URL alone: two documents with the
/// same URL compare equal regardless of content.
#[derive(Debug, Clone)]
pub struct Document {
    /// Public identity of the page.
    pub url: String,
    /// Non-empty title.
    pub title: String,
    /// Content views.
    pub content: DocumentContent,
    /// Short prose excerpt for display.
    pub excerpt: String,
    /// Fetch bookkeeping.
    pub metadata: DocumentMetadata,
}

impl Document {
    /// Build a document, enforcing the title and content invariants.
    pub fn new(
        url: impl Into<String>,
        title: impl Into<String>,
        content: DocumentContent,
        excerpt: impl Into<String>,
        metadata: DocumentMetadata,
    ) -> Result<Self> {
        let url = url.into();
        let title = title.into();
        if title.trim().is_empty() {
            return Err(Error::Other(format!("Document '{url}' has an empty title")));
        }
        if !content.is_substantive() {
            return Err(Error::Other(format!(
                "Document '{url}' has no substantive content"
            )));
        }
        Ok(Self {
            url,
            title,
            content,
            excerpt: excerpt.into(),
            metadata,
        })
    }
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl Eq for Document {}

impl std::hash::Hash for Document {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.url.hash(state);
    }
}

/// The `.meta.json` side-car written next to each markdown file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DocumentSidecar {
    /// Public URL of the document.
    pub url: String,
    /// Document title.
    #[serde(default)]
    pub title: String,
    /// Display excerpt.
    #[serde(default)]
    pub excerpt: String,
    /// Fetch status label.
    #[serde(default)]
    pub status: Option<FetchStatus>,
    /// Consecutive failures before this fetch.
    #[serde(default)]
    pub retry_count: u32,
    /// Fetch time (RFC 3339).
    #[serde(default)]
    pub last_fetched_at: Option<String>,
    /// Extractor that produced the content.
    #[serde(default)]
    pub extraction_method: Option<String>,
    /// Language code.
    #[serde(default)]
    pub language: Option<String>,
    /// Index tags.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl DocumentSidecar {
    /// Build the side-car payload for a document.
    #[must_use]
    pub fn from_document(document: &Document) -> Self {
        Self {
            url: document.url.clone(),
            title: document.title.clone(),
            excerpt: document.excerpt.clone(),
            status: Some(document.metadata.status),
            retry_count: document.metadata.retry_count,
            last_fetched_at: document.metadata.last_fetched_at.map(|t| t.to_rfc3339()),
            extraction_method: document.metadata.extraction_method.clone(),
            language: document.metadata.language.clone(),
            tags: document.metadata.tags.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn content(markdown: &str) -> DocumentContent {
        DocumentContent {
            markdown: markdown.to_string(),
            text: None,
        }
    }

    #[test]
    fn identity_is_url_only() {
        let a = Document::new(
            "https://ex.com/docs/",
            "Title A",
            content("# A"),
            "",
            DocumentMetadata::default(),
        )
        .unwrap();
        let b = Document::new(
            "https://ex.com/docs/",
            "Completely Different",
            content("# B with other text"),
            "other",
            DocumentMetadata::default(),
        )
        .unwrap();
        let c = Document::new(
            "https://ex.com/other/",
            "Title A",
            content("# A"),
            "",
            DocumentMetadata::default(),
        )
        .unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn empty_title_is_rejected() {
        let result = Document::new(
            "https://ex.com/docs/",
            "   ",
            content("# Body"),
            "",
            DocumentMetadata::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn whitespace_only_content_is_rejected() {
        let result = Document::new(
            "https://ex.com/docs/",
            "Title",
            content("   \n  "),
            "",
            DocumentMetadata::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn text_view_alone_satisfies_content_invariant() {
        let doc = Document::new(
            "https://ex.com/docs/",
            "Title",
            DocumentContent {
                markdown: String::new(),
                text: Some("plain text view".to_string()),
            },
            "",
            DocumentMetadata::default(),
        );
        assert!(doc.is_ok());
    }

    #[test]
    fn sidecar_serializes_round_trip() {
        let doc = Document::new(
            "https://ex.com/docs/",
            "Title",
            content("# Body"),
            "An excerpt",
            DocumentMetadata {
                language: Some("en".to_string()),
                tags: vec!["guide".to_string()],
                last_fetched_at: Some(Utc::now()),
                ..DocumentMetadata::default()
            },
        )
        .unwrap();

        let sidecar = DocumentSidecar::from_document(&doc);
        let encoded = serde_json::to_string(&sidecar).unwrap();
        let decoded: DocumentSidecar = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded.url, doc.url);
        assert_eq!(decoded.title, "Title");
        assert_eq!(decoded.language.as_deref(), Some("en"));
        assert_eq!(decoded.tags, vec!["guide".to_string()]);
        assert_eq!(decoded.status, Some(FetchStatus::Success));
    }
}
