//! Seller page fetching and visible-text extraction.
//!
//! Evidence gathering is best-effort: a page that cannot be fetched or parsed
//! contributes an empty string and a warning, never an error.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use scraper::{Html, Node, Selector};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Elements whose text is never visible.
const HIDDEN_ELEMENTS: &[&str] = &["script", "style", "noscript", "template", "svg", "head"];

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub timeout: Duration,
    pub user_agent: String,
    /// Characters kept per page after flattening.
    pub max_chars_per_page: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: concat!("isq-harness/", env!("CARGO_PKG_VERSION")).to_string(),
            max_chars_per_page: 20_000,
        }
    }
}

/// Visible text of one seller page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageText {
    pub url: String,
    pub text: String,
}

impl PageText {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Source of page text. Implementations must not fail: any problem is `""`.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_text(&self, url: &str) -> String;
}

#[derive(Debug, Clone)]
pub struct HttpPageFetcher {
    client: reqwest::Client,
    max_chars: usize,
}

impl HttpPageFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .gzip(true)
            .build()?;
        Ok(Self {
            client,
            max_chars: config.max_chars_per_page,
        })
    }

    async fn try_fetch(&self, url: &str) -> Result<String, reqwest::Error> {
        let resp = self.client.get(url).send().await?.error_for_status()?;
        resp.text().await
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch_text(&self, url: &str) -> String {
        match self.try_fetch(url).await {
            Ok(html) => {
                let text = truncate_chars(&visible_text(&html), self.max_chars).to_string();
                debug!(url, chars = text.len(), "fetched page");
                text
            }
            Err(e) => {
                warn!(url, error = %e, "page fetch failed; using empty text");
                String::new()
            }
        }
    }
}

/// Fetch every URL concurrently. Output order matches `urls`.
pub async fn fetch_all(fetcher: &dyn PageFetcher, urls: &[String]) -> Vec<PageText> {
    let texts = join_all(urls.iter().map(|url| fetcher.fetch_text(url))).await;
    urls.iter()
        .cloned()
        .zip(texts)
        .map(|(url, text)| PageText { url, text })
        .collect()
}

/// Visible text of an HTML document, one line per text run.
///
/// Text under hidden elements is skipped; whitespace inside a run is
/// collapsed; empty runs are dropped.
pub fn visible_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let root = match Selector::parse("body") {
        Ok(body) => document.select(&body).next(),
        Err(_) => None,
    };
    let root = match root {
        Some(body) => *body,
        None => document.tree.root(),
    };

    let mut lines: Vec<String> = Vec::new();
    for node in root.descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .map(|e| HIDDEN_ELEMENTS.contains(&e.name()))
                .unwrap_or(false)
        });
        if hidden {
            continue;
        }
        let line = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if !line.is_empty() {
            lines.push(line);
        }
    }
    lines.join("\n")
}

/// First `max` characters of `s`, cut on a char boundary.
pub(crate) fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
