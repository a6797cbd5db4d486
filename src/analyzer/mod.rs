//! Analyzer capability and its providers.
//!
//! An [`Analyzer`] evaluates one chunk against the query and returns a
//! structured [`AnalysisOutput`]. The engine treats it as an opaque,
//! possibly slow, possibly failing collaborator: every call is bounded by
//! the engine's chunk timeout and retried at most once.
//!
//! | Provider | Type | Notes |
//! |----------|------|-------|
//! | `disabled` | [`DisabledAnalyzer`] | Always errors |
//! | `keyword` | [`KeywordAnalyzer`] | Offline term matching, deterministic |
//! | `openai` | [`OpenAiAnalyzer`] | Chat completions, needs `OPENAI_API_KEY` |
//! | `ollama` | [`OllamaAnalyzer`] | Local `/api/chat` |
//!
//! Use [`create_analyzer`] to build the provider named in the config.
//!
//! # Retry Strategy
//!
//! Network providers retry HTTP 429, 5xx, and connection errors with
//! exponential backoff (1s, 2s, 4s, ...) up to `analyzer.max_retries`.
//! Other 4xx responses fail immediately. These retries happen inside a
//! single engine attempt and count against its timeout.

mod keyword;
mod ollama;
mod openai;
pub mod prompt;

pub use keyword::KeywordAnalyzer;
pub use ollama::OllamaAnalyzer;
pub use openai::OpenAiAnalyzer;
pub use prompt::{extract_json_object, instructions_for, parse_analysis_response};

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::AnalyzerConfig;
use context_sweep_core::models::{AnalysisOutput, ContentType};

/// Everything an analyzer sees about one chunk.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisRequest<'a> {
    pub chunk_id: usize,
    pub content_type: ContentType,
    /// Byte offset of `text` within the document.
    pub offset: usize,
    pub text: &'a str,
    pub query: &'a str,
    pub instructions: &'a str,
}

impl AnalysisRequest<'_> {
    /// User message for chat-style providers.
    pub fn user_message(&self) -> String {
        format!(
            "Query: {}\n\nChunk {} ({}, bytes {}..{}):\n<<<\n{}\n>>>",
            self.query,
            self.chunk_id,
            self.content_type,
            self.offset,
            self.offset + self.text.len(),
            self.text
        )
    }
}

/// Evaluates a chunk against a query.
///
/// # Example
///
/// ```rust
/// use anyhow::Result;
/// use async_trait::async_trait;
/// use context_sweep::analyzer::{AnalysisRequest, Analyzer};
/// use context_sweep::models::AnalysisOutput;
///
/// struct Silent;
///
/// #[async_trait]
/// impl Analyzer for Silent {
///     fn name(&self) -> &str { "silent" }
///
///     async fn analyze(&self, _request: AnalysisRequest<'_>) -> Result<AnalysisOutput> {
///         Ok(AnalysisOutput::default())
///     }
/// }
/// ```
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Provider or model identifier, for logs and reports.
    fn name(&self) -> &str;

    /// Analyze one chunk. Errors are absorbed by the scheduler.
    ///
    /// Not assumed to be idempotent: a retry may return different output.
    async fn analyze(&self, request: AnalysisRequest<'_>) -> Result<AnalysisOutput>;
}

/// Build the analyzer named by `config.provider`.
pub fn create_analyzer(config: &AnalyzerConfig) -> Result<Arc<dyn Analyzer>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledAnalyzer)),
        "keyword" => Ok(Arc::new(KeywordAnalyzer::new())),
        "openai" => Ok(Arc::new(OpenAiAnalyzer::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaAnalyzer::new(config)?)),
        other => bail!("Unknown analyzer provider: {}", other),
    }
}

// ============ Disabled Analyzer ============

/// Fails every chunk. Used when `analyzer.provider = "disabled"`.
pub struct DisabledAnalyzer;

#[async_trait]
impl Analyzer for DisabledAnalyzer {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn analyze(&self, _request: AnalysisRequest<'_>) -> Result<AnalysisOutput> {
        bail!("Analyzer provider is disabled")
    }
}

// ============ HTTP helpers ============

pub(crate) fn http_client(config: &AnalyzerConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

/// POST `body` to `url`, retrying rate limits, server errors, and
/// connection failures with exponential backoff.
pub(crate) async fn post_json_with_retry(
    label: &str,
    request: impl Fn() -> reqwest::RequestBuilder,
    body: &serde_json::Value,
    max_retries: u32,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!(provider = label, attempt, ?delay, "retrying analyzer request");
            tokio::time::sleep(delay).await;
        }

        match request().json(body).send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return Ok(response.json().await?);
                }

                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(anyhow::anyhow!("{} API error {}: {}", label, status, body_text));
                    continue;
                }

                bail!("{} API error {}: {}", label, status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow::anyhow!("{} connection error: {}", label, e));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} request failed after retries", label)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request<'a>(text: &'a str, query: &'a str) -> AnalysisRequest<'a> {
        AnalysisRequest {
            chunk_id: 2,
            content_type: ContentType::Code,
            offset: 100,
            text,
            query,
            instructions: "",
        }
    }

    #[test]
    fn test_create_known_providers() {
        let mut config = AnalyzerConfig::default();
        assert_eq!(create_analyzer(&config).unwrap().name(), "keyword");
        config.provider = "disabled".to_string();
        assert_eq!(create_analyzer(&config).unwrap().name(), "disabled");
        config.provider = "ollama".to_string();
        config.model = Some("llama3.1".to_string());
        assert_eq!(create_analyzer(&config).unwrap().name(), "llama3.1");
        config.provider = "nope".to_string();
        assert!(create_analyzer(&config).is_err());
    }

    #[tokio::test]
    async fn test_disabled_analyzer_errors() {
        let result = DisabledAnalyzer.analyze(request("fn main() {}", "entry point")).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_user_message_carries_range() {
        let message = request("fn main() {}", "entry point").user_message();
        assert!(message.starts_with("Query: entry point"));
        assert!(message.contains("Chunk 2 (code, bytes 100..112)"));
    }
}
