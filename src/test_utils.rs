//! Test doubles for the external collaborators.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::pipeline::errors::PipelineError;
use crate::pipeline::Transform;
use crate::utils::llm::{ChatMessage, Complete, Role};
use crate::utils::scrape::Fetch;
use crate::utils::search::{Search, SearchResult};

type Responder = dyn Fn(&[ChatMessage]) -> Result<String> + Send + Sync;

/// A chat model that answers from a script and records every prompt it receives.
pub struct ScriptedModel {
    responder: Box<Responder>,
    pub calls: AtomicUsize,
    prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedModel {
    /// Replies with `replies` in order, then fails.
    pub fn new(replies: Vec<&str>) -> Self {
        let replies = Mutex::new(replies.into_iter().map(String::from).rev().collect::<Vec<_>>());
        Self::from_fn(move |_| {
            replies.lock().unwrap().pop()
                .ok_or_else(|| PipelineError::upstream("scripted model", "script exhausted").into())
        })
    }

    /// Replies with the content of the last user message.
    pub fn echo() -> Self {
        Self::from_fn(|messages| {
            Ok(messages.iter().rev()
                .find(|m| m.role == Role::User)
                .map(|m| m.content.clone())
                .unwrap_or_default())
        })
    }

    pub fn from_fn(responder: impl Fn(&[ChatMessage]) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<Vec<ChatMessage>> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Complete for ScriptedModel {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(messages.to_vec());
        (self.responder)(messages)
    }
}

/// Search results keyed by query.
#[derive(Default)]
pub struct StaticSearch {
    results: HashMap<String, Vec<String>>,
    pub calls: AtomicUsize,
}

impl StaticSearch {
    pub fn with_urls(mut self, query: &str, urls: &[&str]) -> Self {
        self.results.insert(query.to_string(), urls.iter().map(|u| u.to_string()).collect());
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Search for StaticSearch {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.results.get(query)
            .map(|urls| urls.iter()
                .take(limit)
                .map(|url| SearchResult { url: url.clone(), title: format!("page at {}", url) })
                .collect())
            .unwrap_or_default())
    }
}

/// Pages keyed by url. Unknown urls fail like an unreachable host.
#[derive(Default)]
pub struct StaticFetcher {
    pages: HashMap<String, String>,
    pub calls: AtomicUsize,
}

impl StaticFetcher {
    pub fn with_page(mut self, url: &str, text: &str) -> Self {
        self.pages.insert(url.to_string(), text.to_string());
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetch for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.pages.get(url)
            .cloned()
            .ok_or_else(|| PipelineError::upstream(format!("fetching {}", url), "connection refused").into())
    }
}

/// Passes values through, but fails with an upstream error on the string `target`.
pub fn fail_on(target: &str) -> Transform {
    let target = target.to_string();
    Transform::sync("fail_on", move |value| {
        if value == Value::String(target.clone()) {
            Err(PipelineError::upstream(format!("fetching {}", target), "HTTP 500").into())
        } else {
            Ok(value)
        }
    })
}
