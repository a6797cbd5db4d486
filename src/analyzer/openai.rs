//! OpenAI chat-completions analyzer.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use super::{http_client, parse_analysis_response, post_json_with_retry, AnalysisRequest, Analyzer};
use crate::config::AnalyzerConfig;
use context_sweep_core::models::AnalysisOutput;

const DEFAULT_URL: &str = "https://api.openai.com/v1";

/// Analyzer backed by `POST /chat/completions`.
///
/// Requires the `OPENAI_API_KEY` environment variable. The reply is
/// requested in JSON object mode and parsed into an [`AnalysisOutput`].
pub struct OpenAiAnalyzer {
    model: String,
    url: String,
    api_key: String,
    temperature: f32,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiAnalyzer {
    pub fn new(config: &AnalyzerConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("analyzer.model required for OpenAI provider"))?;

        let api_key = match std::env::var("OPENAI_API_KEY") {
            Ok(key) if !key.is_empty() => key,
            _ => bail!("OPENAI_API_KEY environment variable not set"),
        };

        Ok(Self {
            model,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| DEFAULT_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            temperature: config.temperature,
            max_retries: config.max_retries,
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl Analyzer for OpenAiAnalyzer {
    fn name(&self) -> &str {
        &self.model
    }

    async fn analyze(&self, request: AnalysisRequest<'_>) -> Result<AnalysisOutput> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": request.instructions },
                { "role": "user", "content": request.user_message() },
            ],
        });

        let endpoint = format!("{}/chat/completions", self.url);
        let json = post_json_with_retry(
            "OpenAI",
            || {
                self.client
                    .post(&endpoint)
                    .header("Authorization", format!("Bearer {}", self.api_key))
            },
            &body,
            self.max_retries,
        )
        .await?;

        let content = reply_content(&json)?;
        parse_analysis_response(content)
    }
}

/// Extract `choices[0].message.content`.
fn reply_content(json: &serde_json::Value) -> Result<&str> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
}
