//! Page fetching and HTML-to-text: `fetch(url) -> text`.

use std::sync::Arc;
use anyhow::Result;
use async_trait::async_trait;
use log::{debug, warn};
use scraper::{Html, Node};
use serde_json::Value;

use crate::pipeline::errors::PipelineError;
use crate::pipeline::{as_record, Transform};
use crate::utils::token::{count_tokens_by_chars, truncate_to_tokens};

#[async_trait]
pub trait Fetch: Send + Sync {
    /// The visible text of the page at `url`.
    async fn fetch(&self, url: &str) -> Result<String>;
}

#[async_trait]
impl<T: Fetch + ?Sized> Fetch for Arc<T> {
    async fn fetch(&self, url: &str) -> Result<String> {
        (**self).fetch(url).await
    }
}

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) pipeprompt";

/// The client behind web search and page fetches: a browser-like user agent, reqwest defaults otherwise.
pub fn default_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().user_agent(USER_AGENT).build()?)
}

/// Fetches pages over HTTP and strips the markup.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub fn with_defaults() -> Result<Self> {
        Ok(Self::new(default_client()?))
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        debug!("fetching {}", url);
        let service = format!("fetching {}", url);
        let response = self.client.get(url).send().await
            .map_err(|e| PipelineError::upstream(service.as_str(), e))?;
        let status = response.status();
        if !status.is_success() {
            warn!("{} returned HTTP {}", url, status);
            return Err(PipelineError::upstream(service, format!("HTTP {}", status)).into());
        }
        let html = response.text().await.map_err(|e| PipelineError::upstream(service.as_str(), e))?;
        Ok(html_to_text(&html))
    }
}

/// Visible text of an HTML document: text nodes outside `script`/`style`/`noscript`/`template`,
/// each trimmed, joined with single spaces.
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut pieces = Vec::new();
    for node in document.tree.root().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| match ancestor.value() {
            Node::Element(element) => matches!(element.name(), "script" | "style" | "noscript" | "template" | "head"),
            _ => false,
        });
        if hidden {
            continue;
        }
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if !text.is_empty() {
            pieces.push(text);
        }
    }
    pieces.join(" ")
}

/// Stage: `{url, ..}` → `{url, text, ..}`, the page text cut to `max_chars` characters.
pub fn scrape(fetcher: Arc<dyn Fetch>, max_chars: usize) -> Transform {
    Transform::new("scrape", move |value| {
        let fetcher = fetcher.clone();
        async move {
            let mut record = as_record(value, "scrape")?;
            let url = match record.get("url") {
                Some(Value::String(url)) => url.clone(),
                _ => return Err(PipelineError::InvalidRecord {
                    stage: "scrape".to_string(),
                    detail: "missing text field `url`".to_string(),
                }.into()),
            };
            let text = fetcher.fetch(&url).await?;
            let text = truncate_to_tokens(&text, max_chars, &count_tokens_by_chars).to_string();
            record.insert("text".to_string(), Value::String(text));
            Ok(Value::Object(record))
        }
    })
}
