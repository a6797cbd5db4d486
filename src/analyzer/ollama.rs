//! Ollama chat analyzer.

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::{http_client, parse_analysis_response, post_json_with_retry, AnalysisRequest, Analyzer};
use crate::config::AnalyzerConfig;
use context_sweep_core::models::AnalysisOutput;

const DEFAULT_URL: &str = "http://localhost:11434";

/// Analyzer backed by a local Ollama instance's `POST /api/chat`.
///
/// Requires Ollama to be running with the configured model pulled
/// (e.g. `ollama pull llama3.1`).
pub struct OllamaAnalyzer {
    model: String,
    url: String,
    temperature: f32,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaAnalyzer {
    pub fn new(config: &AnalyzerConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("analyzer.model required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            model,
            url,
            temperature: config.temperature,
            max_retries: config.max_retries,
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl Analyzer for OllamaAnalyzer {
    fn name(&self) -> &str {
        &self.model
    }

    async fn analyze(&self, request: AnalysisRequest<'_>) -> Result<AnalysisOutput> {
        let body = serde_json::json!({
            "model": self.model,
            "stream": false,
            "format": "json",
            "options": { "temperature": self.temperature },
            "messages": [
                { "role": "system", "content": request.instructions },
                { "role": "user", "content": request.user_message() },
            ],
        });

        let endpoint = format!("{}/api/chat", self.url);
        let json = post_json_with_retry(
            "Ollama",
            || self.client.post(&endpoint),
            &body,
            self.max_retries,
        )
        .await
        .map_err(|e| anyhow!("{} (is Ollama running at {}?)", e, self.url))?;

        let content = json
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| anyhow!("Invalid Ollama response: missing message.content"))?;
        parse_analysis_response(content)
    }
}
