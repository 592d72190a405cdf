use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::model::Category;

/// What the analyzer knows about a site: short card copy plus a category
/// already coerced into the fixed enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Analysis {
    pub title: String,
    pub description: String,
    pub category: Category,
}

#[async_trait]
pub trait ContentAnalyzer: Send + Sync {
    async fn analyze(&self, url: &Url) -> anyhow::Result<Analysis>;
}

pub fn chat_completions_endpoint(base_url: &str) -> String {
    let base_url = base_url.trim_end_matches('/');
    format!("{base_url}/chat/completions")
}

/// Analyzer backed by an OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiAnalyzer {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiAnalyzer {
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("build analyzer http client")?;
        Ok(Self {
            client,
            endpoint: chat_completions_endpoint(base_url),
            api_key: api_key.into(),
            model: model.into(),
        })
    }
}

const SYSTEM_PROMPT: &str = "You are a website analysis assistant. Given a URL, \
you describe the site for a link-directory card. Always answer with a single JSON object.";

fn user_prompt(url: &Url) -> String {
    format!(
        "Analyze the website at {url}.\n\
         Answer with one JSON object and nothing else:\n\
         {{\n\
           \"title\": \"short site title (at most 60 characters)\",\n\
           \"description\": \"one sentence on what the site offers\",\n\
           \"category\": \"one of: social, tech, news, tools, resources, learning, others\"\n\
         }}"
    )
}

#[async_trait]
impl ContentAnalyzer for OpenAiAnalyzer {
    async fn analyze(&self, url: &Url) -> anyhow::Result<Analysis> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": user_prompt(url) },
            ],
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("POST {}", self.endpoint))?;

        let status = response.status();
        let raw = response.text().await.context("read analyzer response body")?;
        if !status.is_success() {
            let message = parse_error_message(&raw).unwrap_or_else(|| raw.clone());
            anyhow::bail!("analyzer API error ({status}): {message}");
        }

        let value: serde_json::Value =
            serde_json::from_str(&raw).context("parse analyzer response")?;
        let text = value
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|t| t.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing message content in analyzer response"))?;

        parse_analysis(text)
    }
}

fn parse_error_message(raw_json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw_json).ok()?;
    let message = value.get("error")?.get("message")?.as_str()?.to_owned();
    Some(message)
}

#[derive(Debug, Deserialize)]
struct RawAnalysis {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    category: Option<String>,
}

/// Pull the JSON object out of the model reply. Models wrap the object in
/// prose or code fences often enough that we match from the first `{` to
/// the last `}` instead of trusting the whole reply to be JSON.
pub fn parse_analysis(text: &str) -> anyhow::Result<Analysis> {
    let start = text
        .find('{')
        .ok_or_else(|| anyhow::anyhow!("no JSON object in analyzer reply"))?;
    let end = text
        .rfind('}')
        .ok_or_else(|| anyhow::anyhow!("no JSON object in analyzer reply"))?;
    if end < start {
        anyhow::bail!("no JSON object in analyzer reply");
    }

    let raw: RawAnalysis =
        serde_json::from_str(&text[start..=end]).context("parse analyzer reply JSON")?;

    let title = raw.title.trim().to_string();
    if title.is_empty() {
        anyhow::bail!("analyzer reply has an empty title");
    }

    Ok(Analysis {
        title,
        description: raw.description.trim().to_string(),
        category: raw
            .category
            .as_deref()
            .map(Category::from_raw)
            .unwrap_or_default(),
    })
}

/// Analyzer that never succeeds. Selected when no API key is configured;
/// every create falls back to host-derived card copy.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAnalyzer;

#[async_trait]
impl ContentAnalyzer for NoopAnalyzer {
    async fn analyze(&self, _url: &Url) -> anyhow::Result<Analysis> {
        anyhow::bail!("no content analyzer configured")
    }
}
