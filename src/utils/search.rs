//! Web search: `search(query) -> [url]`.

use std::sync::Arc;
use anyhow::Result;
use async_trait::async_trait;
use log::debug;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

use crate::pipeline::errors::PipelineError;
use crate::pipeline::{as_record, Transform};
use crate::utils::scrape::default_client;

/// A hit of a web search. Only the url is used downstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub url: String,
    pub title: String,
}

#[async_trait]
pub trait Search: Send + Sync {
    /// At most `limit` results for `query`, best first.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>>;
}

#[async_trait]
impl<T: Search + ?Sized> Search for Arc<T> {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        (**self).search(query, limit).await
    }
}

const DUCKDUCKGO_HTML_ENDPOINT: &str = "https://html.duckduckgo.com/html/";

/// Searches the HTML version of DuckDuckGo, which needs no API key.
#[derive(Debug, Clone)]
pub struct DuckDuckGoSearch {
    client: reqwest::Client,
    endpoint: String,
}

impl DuckDuckGoSearch {
    /// Uses the same client settings as [HttpFetcher](crate::utils::scrape::HttpFetcher::with_defaults).
    pub fn with_defaults() -> Result<Self> {
        Ok(Self::new(default_client()?))
    }

    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            endpoint: DUCKDUCKGO_HTML_ENDPOINT.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl Search for DuckDuckGoSearch {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        debug!("searching DuckDuckGo for {:?}", query);
        let response = self.client
            .get(self.endpoint.as_str())
            .query(&[("q", query)])
            .header(reqwest::header::USER_AGENT, "Mozilla/5.0 (X11; Linux x86_64) pipeprompt")
            .send()
            .await
            .map_err(|e| PipelineError::upstream("web search", e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::upstream("web search", format!("HTTP {}", status)).into());
        }
        let html = response.text().await.map_err(|e| PipelineError::upstream("web search", e))?;
        let mut results = parse_duckduckgo_results(&html);
        results.truncate(limit);
        Ok(results)
    }
}

/// Extracts result links from a DuckDuckGo HTML result page.
pub fn parse_duckduckgo_results(html: &str) -> Vec<SearchResult> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("a.result__a") else {
        return Vec::new();
    };
    document.select(&selector)
        .filter_map(|anchor| {
            let href = anchor.value().attr("href")?;
            let url = resolve_redirect(href)?;
            let title = anchor.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ");
            Some(SearchResult { url, title })
        })
        .collect()
}

/// DuckDuckGo wraps result links as `//duckduckgo.com/l/?uddg=<encoded url>`. Links that stay on DuckDuckGo,
/// such as ads behind `y.js`, are dropped.
fn resolve_redirect(href: &str) -> Option<String> {
    let absolute = if href.starts_with("//") {
        format!("https:{}", href)
    } else {
        href.to_string()
    };
    let url = Url::parse(&absolute).ok()?;
    let target = url.query_pairs()
        .find(|(key, _)| key == "uddg")
        .map(|(_, value)| value.into_owned())
        .unwrap_or_else(|| url.to_string());
    match Url::parse(&target) {
        Ok(target) if matches!(target.scheme(), "http" | "https") && !is_duckduckgo(&target) => Some(target.to_string()),
        _ => None,
    }
}

fn is_duckduckgo(url: &Url) -> bool {
    url.host_str().is_some_and(|host| host == "duckduckgo.com" || host.ends_with(".duckduckgo.com"))
}

/// Stage: `{question, ..}` → `[{url, question}, ..]` with up to `num_results` links per question.
pub fn search_links(searcher: Arc<dyn Search>, num_results: usize) -> Transform {
    Transform::new("search_links", move |value| {
        let searcher = searcher.clone();
        async move {
            let record = as_record(value, "search_links")?;
            let question = match record.get("question") {
                Some(Value::String(question)) => question.clone(),
                _ => return Err(PipelineError::InvalidRecord {
                    stage: "search_links".to_string(),
                    detail: "missing text field `question`".to_string(),
                }.into()),
            };
            let results = searcher.search(&question, num_results).await?;
            debug!("{} links for {:?}", results.len(), question);
            Ok(Value::Array(results.into_iter()
                .map(|r| json!({"url": r.url, "question": question}))
                .collect()))
        }
    })
}
