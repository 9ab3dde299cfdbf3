//! In-process article extraction: HTML to title + markdown + text.
//!
//! Extraction picks the most article-like content root (main/article/
//! content containers, falling back to body), drops chrome elements, and
//! converts what remains to markdown. The excerpt is the first non-empty
//! prose paragraph of the markdown.

use scraper::{Html, Selector};
use tracing::debug;

use crate::{Error, Result};

/// Tags never worth carrying into markdown.
const SKIPPED_TAGS: &[&str] = &["script", "style", "nav", "footer", "header", "aside", "noscript"];

/// Content-root candidates, most specific first.
const CONTENT_SELECTORS: &[&str] = &[
    "main",
    "article",
    "div[role='main']",
    "#content",
    ".content",
    "body",
];

/// Output of the in-process extractor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedArticle {
    /// Page title from `<title>` or the first `<h1>`.
    pub title: String,
    /// Markdown rendition of the content root.
    pub markdown: String,
    /// Plain-text view of the content root.
    pub text: String,
    /// First prose paragraph of the markdown.
    pub excerpt: String,
}

impl ExtractedArticle {
    /// Whether extraction produced anything worth keeping.
    #[must_use]
    pub fn is_substantive(&self) -> bool {
        !self.markdown.trim().is_empty() || !self.text.trim().is_empty()
    }
}

/// Extract an article from an HTML page.
pub fn extract_article(html: &str, url: &str) -> Result<ExtractedArticle> {
    let document = Html::parse_document(html);

    let title = extract_title(&document).unwrap_or_else(|| title_from_url(url));

    let content_html = select_content_root(&document)
        .ok_or_else(|| Error::Fetch {
            url: url.to_string(),
            reason: "no_content_root".to_string(),
        })?;

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(SKIPPED_TAGS.to_vec())
        .build();
    let markdown = converter
        .convert(&content_html)
        .map_err(|e| Error::Fetch {
            url: url.to_string(),
            reason: format!("markdown_conversion: {e}"),
        })?
        .trim()
        .to_string();

    let text = plain_text(&content_html);
    let excerpt = first_prose_paragraph(&markdown);

    debug!(url, markdown_len = markdown.len(), "Article extracted");
    Ok(ExtractedArticle {
        title,
        markdown,
        text,
        excerpt,
    })
}

fn extract_title(document: &Html) -> Option<String> {
    for selector in ["title", "h1"] {
        let Ok(parsed) = Selector::parse(selector) else {
            continue;
        };
        if let Some(element) = document.select(&parsed).next() {
            let text: String = element.text().collect::<Vec<_>>().join(" ");
            let trimmed = text.split_whitespace().collect::<Vec<_>>().join(" ");
            if !trimmed.is_empty() {
                return Some(trimmed);
            }
        }
    }
    None
}

/// Fall back to the last meaningful URL path segment.
fn title_from_url(url: &str) -> String {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty() && !s.contains("://"))
        .map_or_else(|| url.to_string(), str::to_string)
}

fn select_content_root(document: &Html) -> Option<String> {
    for selector in CONTENT_SELECTORS {
        let Ok(parsed) = Selector::parse(selector) else {
            continue;
        };
        if let Some(element) = document.select(&parsed).next() {
            return Some(element.html());
        }
    }
    None
}

fn plain_text(content_html: &str) -> String {
    let fragment = Html::parse_fragment(content_html);
    let mut pieces: Vec<String> = Vec::new();
    collect_text(&fragment, &mut pieces);
    pieces.join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

fn collect_text(fragment: &Html, pieces: &mut Vec<String>) {
    let Ok(any) = Selector::parse("*") else {
        return;
    };
    // Walk text through element refs, skipping chrome tags.
    for element in fragment.select(&any) {
        let name = element.value().name();
        if SKIPPED_TAGS.contains(&name) {
            continue;
        }
        for text in element.children().filter_map(|c| c.value().as_text()) {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                pieces.push(trimmed.to_string());
            }
        }
    }
}

/// First non-empty paragraph that is not a heading, list item, or code
/// fence.
#[must_use]
pub fn first_prose_paragraph(markdown: &str) -> String {
    for block in markdown.split("\n\n") {
        let trimmed = block.trim();
        if trimmed.is_empty() {
            continue;
        }
        let first = trimmed.lines().next().unwrap_or("").trim_start();
        if first.starts_with('#')
            || first.starts_with("```")
            || first.starts_with('-')
            || first.starts_with('*')
            || first.starts_with('|')
            || first.starts_with('>')
        {
            continue;
        }
        return trimmed.split_whitespace().collect::<Vec<_>>().join(" ");
    }
    String::new()
}
