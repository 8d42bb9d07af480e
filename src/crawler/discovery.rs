//! URL discovery from configured start URLs and sitemaps
//!
//! Discovery only feeds the state store; it never fetches documents. A
//! source whose sitemap cannot be read still contributes its start URLs.

use crate::config::{Config, SourceConfig};
use crate::politeness::PolitenessEngine;
use crate::storage::Storage;
use crate::url::normalize_url;
use crate::HarvestError;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// A parsed sitemap document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sitemap {
    /// `<urlset>`: document URLs
    UrlSet(Vec<String>),
    /// `<sitemapindex>`: locations of further sitemaps
    Index(Vec<String>),
}

/// Parses a sitemap or sitemap index, collecting every `<loc>` value
///
/// Namespace prefixes are ignored.
pub fn parse_sitemap(xml: &str) -> Result<Sitemap, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut is_index = false;
    let mut locations = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"sitemapindex" => is_index = true,
                b"loc" => {
                    let loc = read_loc(&mut reader)?;
                    if !loc.is_empty() {
                        locations.push(loc);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(if is_index {
        Sitemap::Index(locations)
    } else {
        Sitemap::UrlSet(locations)
    })
}

fn read_loc(reader: &mut Reader<&[u8]>) -> Result<String, quick_xml::Error> {
    let mut buf = Vec::new();
    let mut text = String::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Text(e) => text.push_str(&e.unescape()?),
            Event::CData(e) => text.push_str(&String::from_utf8_lossy(&e.into_inner())),
            Event::End(_) | Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(text.trim().to_string())
}

/// Discovers URLs for every configured source and adds them to the store
///
/// # Returns
///
/// Newly added URL counts per source name
pub async fn discover_all(
    config: &Config,
    client: &Client,
    politeness: &PolitenessEngine,
    storage: Arc<dyn Storage>,
) -> Result<BTreeMap<String, usize>, HarvestError> {
    let mut added = BTreeMap::new();

    for source in &config.sources {
        let urls = discover_source(source, client, politeness).await;
        let count = urls.len();

        let store = Arc::clone(&storage);
        let name = source.name.clone();
        let new = tokio::task::spawn_blocking(move || store.add_urls(&urls, &name))
            .await
            .map_err(|e| HarvestError::Task(e.to_string()))??;

        tracing::info!(
            "Discovered {} URLs for source {} ({} new)",
            count,
            source.name,
            new
        );
        added.insert(source.name.clone(), new);
    }

    Ok(added)
}

/// Collects the normalized, de-duplicated URLs of one source
pub async fn discover_source(
    source: &SourceConfig,
    client: &Client,
    politeness: &PolitenessEngine,
) -> Vec<String> {
    let mut candidates: Vec<String> = source.start_urls.clone();

    if let Some(sitemap_url) = &source.sitemap_url {
        candidates.extend(read_sitemap_tree(sitemap_url, client, politeness).await);
    }

    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter_map(|raw| match normalize_url(&raw) {
            Ok(url) => Some(url.to_string()),
            Err(e) => {
                tracing::debug!("Skipping unusable URL {} for {}: {}", raw, source.name, e);
                None
            }
        })
        .filter(|url| seen.insert(url.clone()))
        .collect()
}

/// Reads a sitemap, following one level of sitemap index nesting
async fn read_sitemap_tree(
    sitemap_url: &str,
    client: &Client,
    politeness: &PolitenessEngine,
) -> Vec<String> {
    match fetch_sitemap(sitemap_url, client, politeness).await {
        Some(Sitemap::UrlSet(urls)) => urls,
        Some(Sitemap::Index(children)) => {
            let mut urls = Vec::new();
            for child in children {
                match fetch_sitemap(&child, client, politeness).await {
                    Some(Sitemap::UrlSet(found)) => urls.extend(found),
                    Some(Sitemap::Index(_)) => {
                        tracing::debug!("Ignoring nested sitemap index {}", child)
                    }
                    None => {}
                }
            }
            urls
        }
        None => Vec::new(),
    }
}

async fn fetch_sitemap(
    location: &str,
    client: &Client,
    politeness: &PolitenessEngine,
) -> Option<Sitemap> {
    let url = match normalize_url(location) {
        Ok(url) => url,
        Err(e) => {
            tracing::warn!("Invalid sitemap URL {}: {}", location, e);
            return None;
        }
    };

    if let Ok(domain) = crate::url::domain_of(&url) {
        politeness.await_turn(&domain).await;
    }

    let identity = politeness.current_identity();
    let response = client
        .get(url.clone())
        .header(reqwest::header::USER_AGENT, identity.user_agent)
        .send()
        .await
        .and_then(|r| r.error_for_status());

    let body = match response {
        Ok(response) => response.text().await,
        Err(e) => Err(e),
    };

    let body = match body {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!("Failed to fetch sitemap {}: {}", url, e);
            return None;
        }
    };

    match parse_sitemap(&body) {
        Ok(sitemap) => Some(sitemap),
        Err(e) => {
            tracing::warn!("Failed to parse sitemap {}: {}", url, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_urlset() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>https://news.example.com/a</loc><lastmod>2024-01-01</lastmod></url>
  <url><loc> https://news.example.com/b?x=1&amp;y=2 </loc></url>
  <url><loc><![CDATA[https://news.example.com/c]]></loc></url>
</urlset>"#;

        assert_eq!(
            parse_sitemap(xml).unwrap(),
            Sitemap::UrlSet(vec![
                "https://news.example.com/a".to_string(),
                "https://news.example.com/b?x=1&y=2".to_string(),
                "https://news.example.com/c".to_string(),
            ])
        );
    }

    #[test]
    fn test_parse_index() {
        let xml = r#"<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <sitemap><loc>https://news.example.com/sitemap-1.xml</loc></sitemap>
  <sitemap><loc>https://news.example.com/sitemap-2.xml</loc></sitemap>
</sitemapindex>"#;

        assert_eq!(
            parse_sitemap(xml).unwrap(),
            Sitemap::Index(vec![
                "https://news.example.com/sitemap-1.xml".to_string(),
                "https://news.example.com/sitemap-2.xml".to_string(),
            ])
        );
    }

    #[test]
    fn test_parse_prefixed_elements() {
        let xml = r#"<sm:urlset xmlns:sm="http://www.sitemaps.org/schemas/sitemap/0.9">
  <sm:url><sm:loc>https://news.example.com/a</sm:loc></sm:url>
</sm:urlset>"#;

        assert_eq!(
            parse_sitemap(xml).unwrap(),
            Sitemap::UrlSet(vec!["https://news.example.com/a".to_string()])
        );
    }

    #[test]
    fn test_parse_malformed() {
        assert!(parse_sitemap("<urlset><url><loc>x</url></urlset>").is_err());
    }
}
