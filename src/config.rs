//! TOML configuration.
//!
//! ```toml
//! [engine]
//! wave_size = 4
//! min_chunk_size = 50000
//! max_chunk_size = 200000
//!
//! [analyzer]
//! provider = "openai"
//! model = "gpt-4o-mini"
//! ```
//!
//! Every key has a default, so an empty file (or no file at all) is a
//! valid configuration using the offline `keyword` analyzer.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::engine::EngineConfig;
use context_sweep_core::feedback::{SizeBounds, DEFAULT_MAX_CHUNK_SIZE, DEFAULT_MIN_CHUNK_SIZE};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineSection {
    #[serde(default = "default_wave_size")]
    pub wave_size: usize,
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
    #[serde(default)]
    pub overlap: usize,
    #[serde(default)]
    pub max_chunks: Option<usize>,
    #[serde(default = "default_completeness_threshold")]
    pub completeness_threshold: f64,
    #[serde(default = "default_min_findings")]
    pub min_findings: usize,
    #[serde(default = "default_chunk_timeout_secs")]
    pub chunk_timeout_secs: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            wave_size: default_wave_size(),
            min_chunk_size: default_min_chunk_size(),
            max_chunk_size: default_max_chunk_size(),
            overlap: 0,
            max_chunks: None,
            completeness_threshold: default_completeness_threshold(),
            min_findings: default_min_findings(),
            chunk_timeout_secs: default_chunk_timeout_secs(),
        }
    }
}

fn default_wave_size() -> usize {
    4
}
fn default_min_chunk_size() -> usize {
    DEFAULT_MIN_CHUNK_SIZE
}
fn default_max_chunk_size() -> usize {
    DEFAULT_MAX_CHUNK_SIZE
}
fn default_completeness_threshold() -> f64 {
    0.8
}
fn default_min_findings() -> usize {
    3
}
fn default_chunk_timeout_secs() -> u64 {
    60
}

impl EngineSection {
    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            wave_size: self.wave_size,
            bounds: SizeBounds {
                min: self.min_chunk_size,
                max: self.max_chunk_size,
            },
            overlap: self.overlap,
            max_chunks: self.max_chunks,
            completeness_threshold: self.completeness_threshold,
            min_findings: self.min_findings,
            chunk_timeout: Duration::from_secs(self.chunk_timeout_secs),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalyzerConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Base URL override. Defaults per provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub temperature: f32,
    /// HTTP-level retries for 429 and 5xx responses.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            timeout_secs: default_timeout_secs(),
            temperature: 0.0,
            max_retries: default_max_retries(),
        }
    }
}

fn default_provider() -> String {
    "keyword".to_string()
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_max_retries() -> u32 {
    2
}

impl AnalyzerConfig {
    pub fn is_network(&self) -> bool {
        matches!(self.provider.as_str(), "openai" | "ollama")
    }

    pub fn validate(&self) -> Result<()> {
        match self.provider.as_str() {
            "disabled" | "keyword" | "openai" | "ollama" => {}
            other => bail!(
                "Unknown analyzer provider: '{}'. Must be disabled, keyword, openai, or ollama.",
                other
            ),
        }
        if self.is_network() && self.model.as_deref().map_or(true, str::is_empty) {
            bail!(
                "analyzer.model must be specified when provider is '{}'",
                self.provider
            );
        }
        if self.timeout_secs == 0 {
            bail!("analyzer.timeout_secs must be > 0");
        }
        Ok(())
    }
}

/// Parse and validate a configuration from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.engine.to_engine_config().validate()?;
    config.analyzer.validate()?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Load `path`, falling back to defaults when it does not exist and
/// `required` is false.
pub fn load_config_or_default(path: &Path, required: bool) -> Result<Config> {
    if !required && !path.exists() {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        return Ok(Config::default());
    }
    load_config(path)
}
