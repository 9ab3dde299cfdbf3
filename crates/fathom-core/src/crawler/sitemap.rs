//! Sitemap XML parsing for URL discovery.
//!
//! Handles standard `<urlset>` sitemaps and `<sitemapindex>` files, whose
//! child sitemaps are fetched recursively with bounded depth and fan-out.

use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Maximum recursion depth through sitemap index files.
const MAX_INDEX_DEPTH: u8 = 2;

/// Maximum child sitemaps fetched from one index.
const MAX_CHILD_SITEMAPS: usize = 50;

/// A URL entry from a sitemap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SitemapEntry {
    /// The page URL.
    pub url: String,
    /// Raw `lastmod` value when present.
    pub lastmod: Option<String>,
}

enum SitemapContent {
    Entries(Vec<SitemapEntry>),
    Index(Vec<String>),
}

/// True when the XML is a sitemap index rather than a urlset.
#[must_use]
pub fn is_sitemap_index(xml: &str) -> bool {
    xml.contains("<sitemapindex") || xml.contains("sitemapindex>")
}

/// Parse a standard sitemap into entries.
///
/// Returns an error for sitemap indices; use [`fetch_sitemap`] to follow
/// those.
pub fn parse_sitemap(xml: &str) -> Result<Vec<SitemapEntry>> {
    match parse_content(xml)? {
        SitemapContent::Entries(entries) => Ok(entries),
        SitemapContent::Index(_) => Err(Error::Other(
            "XML is a sitemap index, not a standard sitemap".to_string(),
        )),
    }
}

/// Fetch and parse a sitemap, following index files recursively.
pub async fn fetch_sitemap(client: &Client, url: &str) -> Result<Vec<SitemapEntry>> {
    fetch_recursive(client.clone(), url.to_string(), 0).await
}

fn fetch_recursive(
    client: Client,
    url: String,
    depth: u8,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<SitemapEntry>>> + Send>> {
    Box::pin(async move {
        if depth > MAX_INDEX_DEPTH {
            return Err(Error::Other(format!(
                "Sitemap index recursion depth exceeded (max: {MAX_INDEX_DEPTH})"
            )));
        }
        debug!(url, depth, "Fetching sitemap");
        let response = client
            .get(&url)
            .send()
            .await
            .map_err(Error::Network)?
            .error_for_status()
            .map_err(Error::Network)?;
        let xml = response.text().await.map_err(Error::Network)?;

        match parse_content(&xml)? {
            SitemapContent::Entries(entries) => Ok(entries),
            SitemapContent::Index(children) => {
                let mut all = Vec::new();
                for child in children.into_iter().take(MAX_CHILD_SITEMAPS) {
                    match fetch_recursive(client.clone(), child, depth + 1).await {
                        Ok(entries) => all.extend(entries),
                        Err(e) => warn!(error = %e, "Failed to fetch child sitemap"),
                    }
                }
                Ok(all)
            },
        }
    })
}

fn parse_content(xml: &str) -> Result<SitemapContent> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entries: Vec<SitemapEntry> = Vec::new();
    let mut index_children: Vec<String> = Vec::new();
    let is_index = is_sitemap_index(xml);

    let mut in_item = false;
    let mut current_element: Option<String> = None;
    let mut current_loc: Option<String> = None;
    let mut current_lastmod: Option<String> = None;
    let item_tag = if is_index { "sitemap" } else { "url" };

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                if name == item_tag {
                    in_item = true;
                    current_loc = None;
                    current_lastmod = None;
                } else if in_item && (name == "loc" || name == "lastmod") {
                    current_element = Some(name);
                }
            },
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                if name == item_tag && in_item {
                    if let Some(loc) = current_loc.take() {
                        if is_index {
                            index_children.push(loc);
                        } else {
                            entries.push(SitemapEntry {
                                url: loc,
                                lastmod: current_lastmod.take(),
                            });
                        }
                    }
                    in_item = false;
                }
                current_element = None;
            },
            Ok(Event::Text(e)) => {
                if let Some(element) = &current_element {
                    let text = e
                        .unescape()
                        .map_err(|e| Error::Other(format!("XML parse error: {e}")))?;
                    let text = text.trim();
                    match element.as_str() {
                        "loc" => current_loc = Some(text.to_string()),
                        "lastmod" => current_lastmod = Some(text.to_string()),
                        _ => {},
                    }
                }
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Other(format!("XML parse error: {e}"))),
            _ => {},
        }
        buf.clear();
    }

    if is_index {
        Ok(SitemapContent::Index(index_children))
    } else {
        Ok(SitemapContent::Entries(entries))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn parses_basic_sitemap() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
        <urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
          <url>
            <loc>https://example.com/page1</loc>
            <lastmod>2024-01-15</lastmod>
          </url>
          <url>
            <loc>https://example.com/page2</loc>
          </url>
        </urlset>"#;

        let entries = parse_sitemap(xml).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].url, "https://example.com/page1");
        assert_eq!(entries[0].lastmod.as_deref(), Some("2024-01-15"));
        assert!(entries[1].lastmod.is_none());
    }

    #[test]
    fn skips_urls_without_loc() {
        let xml = r#"<?xml version="1.0"?>
        <urlset>
          <url><lastmod>2024-01-15</lastmod></url>
          <url><loc>https://example.com/page1</loc></url>
        </urlset>"#;
        let entries = parse_sitemap(xml).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn index_detection_and_rejection() {
        let xml = r#"<?xml version="1.0"?>
        <sitemapindex>
          <sitemap><loc>https://example.com/sitemap-1.xml</loc></sitemap>
        </sitemapindex>"#;
        assert!(is_sitemap_index(xml));
        assert!(parse_sitemap(xml).is_err());
    }

    #[test]
    fn xml_entities_are_unescaped() {
        let xml = r#"<urlset><url><loc>https://ex.com/page?a=1&amp;b=2</loc></url></urlset>"#;
        let entries = parse_sitemap(xml).unwrap();
        assert_eq!(entries[0].url, "https://ex.com/page?a=1&b=2");
    }

    #[tokio::test]
    async fn fetch_follows_index_files() {
        let server = MockServer::start().await;
        let index = format!(
            r#"<sitemapindex>
              <sitemap><loc>{0}/sitemap-1.xml</loc></sitemap>
              <sitemap><loc>{0}/sitemap-2.xml</loc></sitemap>
            </sitemapindex>"#,
            server.uri()
        );
        Mock::given(method("GET"))
            .and(path("/sitemap.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(index))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/sitemap-1.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<urlset><url><loc>https://example.com/a</loc></url></urlset>",
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/sitemap-2.xml"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = Client::new();
        let entries = fetch_sitemap(&client, &format!("{}/sitemap.xml", server.uri()))
            .await
            .unwrap();

        // The failing child is skipped, not fatal.
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].url, "https://example.com/a");
    }

    #[tokio::test]
    async fn fetch_errors_on_missing_sitemap() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let client = Client::new();
        let result = fetch_sitemap(&client, &format!("{}/sitemap.xml", server.uri())).await;
        assert!(result.is_err());
    }
}
