//! LLM Connector - hosted text completion used for coaching phrases

use crate::config::{CoachConfig, Credentials};
use crate::error::CoachError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Sends a prompt and returns the generated text
#[async_trait]
pub trait TextCompletion: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, CoachError>;
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

/// Pull the text out of a `generateContent` response body
pub fn extract_text(body: &str) -> Result<String, CoachError> {
    let response: GenerateResponse = serde_json::from_str(body)?;
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(CoachError::MalformedResponse("completion has no text".to_string()));
    }
    Ok(text)
}

pub struct LLMConnector {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl LLMConnector {
    pub fn new(config: &CoachConfig, credentials: &Credentials) -> Result<Self, CoachError> {
        log::info!("Initializing LLM Connector with model {}", config.model_name);
        let client = reqwest::Client::builder()
            .timeout(config.completion_timeout())
            .build()
            .map_err(|e| CoachError::Configuration(format!("http client: {e}")))?;
        let endpoint = format!(
            "{}/models/{}:generateContent",
            config.completion_base_url.trim_end_matches('/'),
            config.model_name
        );
        Ok(Self {
            client,
            endpoint,
            api_key: credentials.api_key.clone(),
        })
    }
}

#[async_trait]
impl TextCompletion for LLMConnector {
    async fn generate(&self, prompt: &str) -> Result<String, CoachError> {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(CoachError::Transport(format!("completion returned {status}")));
        }
        let body = resp.text().await?;
        extract_text(&body)
    }
}
