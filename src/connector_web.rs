//! Web connector.
//!
//! A bounded-depth crawler starting from `start_url`, following same-origin
//! `<a href>` links up to `max_depth` hops or `max_pages` pages, whichever
//! comes first. Produces one [`SourceItem`] (destined for the `WebPage`
//! entity) per page, with the raw HTML's text content left for the
//! ingestion engine to normalize.
//!
//! Link extraction is a plain regex scan rather than a full HTML parser —
//! good enough for `href="..."` attributes and consistent with this crate's
//! other connectors not depending on a DOM library.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use crate::config::WebConnectorConfig;
use crate::models::SourceItem;
use crate::traits::Connector;

pub struct WebConnector {
    name: String,
    config: WebConnectorConfig,
}

impl WebConnector {
    pub fn new(name: String, config: WebConnectorConfig) -> Self {
        Self { name, config }
    }
}

#[async_trait]
impl Connector for WebConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Crawl a website to a bounded depth and page count"
    }

    fn connector_type(&self) -> &str {
        "web"
    }

    async fn scan(&self) -> Result<Vec<SourceItem>> {
        crawl(&self.name, &self.config).await
    }
}

fn extract_links(html: &str, base: &url_lite::Url) -> Vec<url_lite::Url> {
    let re = Regex::new(r#"(?i)href\s*=\s*["']([^"']+)["']"#).unwrap();
    re.captures_iter(html)
        .filter_map(|c| base.join(&c[1]))
        .filter(|u| u.host == base.host)
        .collect()
}

fn strip_tags(html: &str) -> String {
    let tag_re = Regex::new(r"(?s)<script.*?</script>|<style.*?</style>|<[^>]+>").unwrap();
    let collapsed = tag_re.replace_all(html, " ");
    let ws_re = Regex::new(r"\s+").unwrap();
    ws_re.replace_all(collapsed.trim(), " ").to_string()
}

async fn crawl(name: &str, config: &WebConnectorConfig) -> Result<Vec<SourceItem>> {
    let start = url_lite::Url::parse(&config.start_url)?;
    let client = reqwest::Client::builder().timeout(Duration::from_secs(30)).build()?;

    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back((start.clone(), 0usize));
    visited.insert(start.to_string());

    let mut items = Vec::new();
    let source_label = format!("web:{}", name);

    while let Some((url, depth)) = queue.pop_front() {
        if items.len() >= config.max_pages {
            break;
        }

        let resp = match client.get(url.to_string()).send().await {
            Ok(r) => r,
            Err(_) => continue,
        };
        if !resp.status().is_success() {
            continue;
        }
        let html = match resp.text().await {
            Ok(h) => h,
            Err(_) => continue,
        };

        let text = strip_tags(&html);
        items.push(SourceItem {
            source: source_label.clone(),
            source_id: url.to_string(),
            source_url: Some(url.to_string()),
            title: None,
            content_type: "text/html".to_string(),
            body: text,
            updated_at: Utc::now(),
        });

        if depth < config.max_depth {
            for link in extract_links(&html, &url) {
                let key = link.to_string();
                if visited.insert(key) {
                    queue.push_back((link, depth + 1));
                }
            }
        }
    }

    Ok(items)
}

/// Minimal same-origin URL join/parse, avoiding a dependency on a full
/// URL crate for what this connector needs: scheme+host equality and
/// relative-link resolution.
mod url_lite {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Url {
        pub scheme: String,
        pub host: String,
        pub path: String,
    }

    impl Url {
        pub fn parse(raw: &str) -> anyhow::Result<Self> {
            let (scheme, rest) = raw
                .split_once("://")
                .ok_or_else(|| anyhow::anyhow!("missing scheme in URL: {}", raw))?;
            let (host, path) = rest.split_once('/').unwrap_or((rest, ""));
            Ok(Self {
                scheme: scheme.to_string(),
                host: host.to_string(),
                path: format!("/{path}"),
            })
        }

        pub fn join(&self, href: &str) -> Option<Self> {
            if href.starts_with("http://") || href.starts_with("https://") {
                return Self::parse(href).ok();
            }
            if href.starts_with('#') || href.starts_with("mailto:") || href.starts_with("javascript:") {
                return None;
            }
            if let Some(stripped) = href.strip_prefix("//") {
                return Self::parse(&format!("{}://{}", self.scheme, stripped)).ok();
            }
            if href.starts_with('/') {
                return Some(Self { scheme: self.scheme.clone(), host: self.host.clone(), path: href.to_string() });
            }
            let base_dir = self.path.rsplit_once('/').map(|(d, _)| d).unwrap_or("");
            Some(Self {
                scheme: self.scheme.clone(),
                host: self.host.clone(),
                path: format!("{base_dir}/{href}"),
            })
        }

        pub fn to_string(&self) -> String {
            format!("{}://{}{}", self.scheme, self.host, self.path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_tags_removes_markup_and_scripts() {
        let html = "<html><head><script>evil()</script></head><body><p>Hello <b>world</b></p></body></html>";
        let text = strip_tags(html);
        assert_eq!(text, "Hello world");
    }

    #[test]
    fn url_lite_joins_relative_and_absolute_links() {
        let base = url_lite::Url::parse("https://example.com/docs/intro").unwrap();
        assert_eq!(base.join("/about").unwrap().to_string(), "https://example.com/about");
        assert_eq!(base.join("guide").unwrap().to_string(), "https://example.com/docs/guide");
        assert_eq!(base.join("https://other.com/x").unwrap().to_string(), "https://other.com/x");
        assert!(base.join("mailto:a@b.com").is_none());
    }

    #[test]
    fn extract_links_filters_to_same_host() {
        let base = url_lite::Url::parse("https://example.com/").unwrap();
        let html = r#"<a href="/a">A</a><a href="https://other.com/b">B</a>"#;
        let links = extract_links(html, &base);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].host, "example.com");
    }
}
