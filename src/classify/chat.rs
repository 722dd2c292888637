//! Chat-completion classifier
//!
//! Asks an OpenAI-compatible chat endpoint for a JSON verdict on the page.

use crate::classify::{ClassificationResult, Classifier, ClassifierError};
use crate::config::ClassifierConfig;
use crate::crawler::PageLink;
use crate::ConfigError;
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use url::Url;

const SYSTEM_PROMPT: &str = "You review pages of company websites for a job-listing crawler. \
Decide whether the page itself lists multiple job postings (a careers index or job board), \
not a single posting and not a generic page that merely mentions careers. \
From the numbered links, pick the ones most likely to lead to job listings. \
Only pick links from the list. \
Answer with a JSON object: {\"is_target\": bool, \"confidence\": integer 0-100, \
\"reasoning\": string, \"suggested_urls\": [string]}.";

pub struct ChatClassifier {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
    max_text_chars: usize,
    max_prompt_links: usize,
    timeout: Duration,
}

impl ChatClassifier {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        max_text_chars: usize,
        max_prompt_links: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: api_key.into(),
            max_text_chars,
            max_prompt_links,
            timeout,
        }
    }

    /// Builds the classifier from a `chat` section, reading the key from the environment
    pub fn from_config(config: &ClassifierConfig, timeout: Duration) -> Result<Self, ConfigError> {
        let ClassifierConfig::Chat {
            endpoint,
            model,
            api_key_env,
            max_text_chars,
            max_prompt_links,
        } = config
        else {
            return Err(ConfigError::Validation(
                "chat classifier requires kind = \"chat\"".to_string(),
            ));
        };

        let api_key = std::env::var(api_key_env)
            .map_err(|_| ConfigError::MissingEnv(api_key_env.clone()))?;

        Ok(Self::new(
            endpoint.clone(),
            model.clone(),
            api_key,
            *max_text_chars,
            *max_prompt_links,
            timeout,
        ))
    }

    fn user_prompt(&self, url: &Url, text: &str, links: &[PageLink]) -> String {
        let text: String = text.chars().take(self.max_text_chars).collect();

        let mut prompt = format!("URL: {}\n\nPage text:\n{}\n\nLinks:\n", url, text);
        for (i, link) in links.iter().take(self.max_prompt_links).enumerate() {
            prompt.push_str(&format!("{}. {} [{}]\n", i + 1, link.url, link.text));
        }
        prompt
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// The JSON object the model is asked to produce
#[derive(Debug, Deserialize)]
struct ChatVerdict {
    is_target: bool,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    suggested_urls: Vec<Suggestion>,
}

/// Models answer with bare strings or with `{"url": ...}` objects
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Suggestion {
    Url(String),
    Object { url: String },
}

impl Suggestion {
    fn into_url(self) -> String {
        match self {
            Suggestion::Url(url) | Suggestion::Object { url } => url,
        }
    }
}

/// Parses the model's message content into a result
fn parse_verdict(content: &str) -> Result<ClassificationResult, ClassifierError> {
    let verdict: ChatVerdict = serde_json::from_str(strip_code_fence(content))
        .map_err(|e| ClassifierError::MalformedResponse(e.to_string()))?;

    let confidence = if verdict.confidence.is_finite() {
        verdict.confidence.round().clamp(0.0, 100.0) as u8
    } else {
        0
    };

    Ok(ClassificationResult {
        is_target: verdict.is_target,
        confidence,
        reasoning: verdict.reasoning,
        suggested_links: verdict
            .suggested_urls
            .into_iter()
            .map(Suggestion::into_url)
            .collect(),
    })
}

/// Removes a surrounding Markdown code fence, if any
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

#[async_trait]
impl Classifier for ChatClassifier {
    async fn classify(
        &self,
        url: &Url,
        text: &str,
        links: &[PageLink],
    ) -> Result<ClassificationResult, ClassifierError> {
        let body = json!({
            "model": self.model,
            "temperature": 0,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": self.user_prompt(url, text, links) },
            ],
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.api_key))
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ClassifierError::Timeout(self.timeout)
                } else {
                    ClassifierError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(ClassifierError::Unavailable(format!("HTTP {}", status.as_u16())));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ClassifierError::Request(format!(
                "HTTP {}: {}",
                status.as_u16(),
                detail.chars().take(200).collect::<String>()
            )));
        }

        let reply: ChatResponse = response
            .json()
            .await
            .map_err(|e| ClassifierError::MalformedResponse(e.to_string()))?;

        let content = reply
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ClassifierError::MalformedResponse("empty completion".to_string()))?;

        let result = parse_verdict(&content)?;
        tracing::debug!(
            url = %url,
            is_target = result.is_target,
            confidence = result.confidence,
            suggestions = result.suggested_links.len(),
            "chat classification"
        );
        Ok(result)
    }
}
