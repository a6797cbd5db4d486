//! Core data models used throughout Context Sweep.
//!
//! These types represent the document, the chunks carved from it, and the
//! per-chunk analysis results that flow from the wave scheduler into the
//! synthesizer.

use anyhow::{bail, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::boundary::infer_content_type;

/// The closed set of content types the boundary detector understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentType {
    /// JSON arrays of records or JSON Lines streams.
    StructuredRecord,
    /// Markdown-style documents split by headings.
    HeadingSectioned,
    /// Log files whose entries start with a timestamp.
    TimestampedLog,
    /// Source code split at top-level items.
    Code,
    /// Prose split at paragraph breaks.
    PlainText,
}

impl ContentType {
    pub const ALL: [ContentType; 5] = [
        ContentType::StructuredRecord,
        ContentType::HeadingSectioned,
        ContentType::TimestampedLog,
        ContentType::Code,
        ContentType::PlainText,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::StructuredRecord => "structured-record",
            ContentType::HeadingSectioned => "heading-sectioned",
            ContentType::TimestampedLog => "timestamped-log",
            ContentType::Code => "code",
            ContentType::PlainText => "plain-text",
        }
    }

    /// Guess a content type from a file extension (without the dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "json" | "jsonl" | "ndjson" => Some(ContentType::StructuredRecord),
            "md" | "markdown" | "mdx" | "rst" => Some(ContentType::HeadingSectioned),
            "log" => Some(ContentType::TimestampedLog),
            "rs" | "py" | "js" | "jsx" | "ts" | "tsx" | "go" | "java" | "kt" | "c" | "h"
            | "cc" | "cpp" | "hpp" | "cs" | "rb" | "php" | "swift" | "scala" => {
                Some(ContentType::Code)
            }
            "txt" | "text" => Some(ContentType::PlainText),
            _ => None,
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "structured-record" | "structured" | "json" => Ok(ContentType::StructuredRecord),
            "heading-sectioned" | "headings" | "markdown" => Ok(ContentType::HeadingSectioned),
            "timestamped-log" | "log" => Ok(ContentType::TimestampedLog),
            "code" => Ok(ContentType::Code),
            "plain-text" | "plain" | "text" => Ok(ContentType::PlainText),
            other => bail!(
                "Unknown content type: '{}'. Must be structured-record, heading-sectioned, timestamped-log, code, or plain-text.",
                other
            ),
        }
    }
}

/// The input document. Created once per query and read-only thereafter.
#[derive(Debug, Clone)]
pub struct Document {
    text: String,
    content_type: ContentType,
}

impl Document {
    pub fn new(text: impl Into<String>, content_type: ContentType) -> Self {
        Self {
            text: text.into(),
            content_type,
        }
    }

    /// Build a document whose content type is inferred from the text.
    pub fn inferred(text: impl Into<String>) -> Self {
        let text = text.into();
        let content_type = infer_content_type(&text);
        Self { text, content_type }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn content_type(&self) -> ContentType {
        self.content_type
    }

    /// Total length in bytes.
    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn slice(&self, start: usize, end: usize) -> &str {
        &self.text[start..end]
    }
}

/// How a chunk's end was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BoundaryKind {
    /// Ended on a detected structural boundary.
    Explicit,
    /// Cut at the target size because no boundary was available.
    Forced,
    /// Ran to the end of the document.
    EndOfDocument,
}

/// A contiguous slice of the document. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    pub id: usize,
    /// Byte offset where the chunk's text starts (including overlap).
    pub start: usize,
    /// Exclusive byte offset where the chunk ends.
    pub end: usize,
    /// Bytes at the front of the chunk that repeat the previous chunk's tail.
    pub overlap: usize,
    pub content_type: ContentType,
    /// Target size in effect when the chunk was planned.
    pub target_size: usize,
    pub boundary: BoundaryKind,
    /// SHA-256 of the chunk text.
    pub hash: String,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    /// Offset where this chunk's own (non-overlapping) span begins.
    pub fn core_start(&self) -> usize {
        self.start + self.overlap
    }

    pub fn text<'a>(&self, document: &'a Document) -> &'a str {
        document.slice(self.start, self.end)
    }
}

/// Confidence level attached to a finding. Ordered `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Confidence {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Confidence::High),
            "medium" | "med" => Ok(Confidence::Medium),
            "low" => Ok(Confidence::Low),
            other => bail!("Unknown confidence level: '{}'", other),
        }
    }
}

impl<'de> Deserialize<'de> for Confidence {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A single observation an analyzer made about one chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub point: String,
    #[serde(default)]
    pub evidence: String,
    pub confidence: Confidence,
    #[serde(default)]
    pub location: String,
}

/// The structured answer an analyzer returns for one chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisOutput {
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub missing: Vec<String>,
    #[serde(default)]
    pub suggested_next_queries: Vec<String>,
    #[serde(default)]
    pub answer_if_complete: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_confidence: Option<Confidence>,
}

/// Why a chunk produced no analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "kebab-case")]
pub enum FailureKind {
    Timeout,
    Error(String),
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Timeout => f.write_str("timed out"),
            FailureKind::Error(msg) => write!(f, "failed: {}", msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChunkStatus {
    Succeeded,
    Failed(FailureKind),
}

/// Outcome of analyzing one chunk, attributed by chunk id.
#[derive(Debug, Clone)]
pub struct ChunkResult {
    pub chunk_id: usize,
    pub start: usize,
    pub end: usize,
    pub content_type: ContentType,
    pub findings: Vec<Finding>,
    pub missing: Vec<String>,
    pub suggested_next_queries: Vec<String>,
    pub answer_if_complete: Option<String>,
    pub answer_confidence: Option<Confidence>,
    /// Wall time across all attempts.
    pub latency: Duration,
    /// 1 when the first attempt settled the chunk, 2 after a retry.
    pub attempts: u8,
    pub status: ChunkStatus,
}

impl ChunkResult {
    pub fn succeeded(chunk: &Chunk, output: AnalysisOutput, latency: Duration, attempts: u8) -> Self {
        Self {
            chunk_id: chunk.id,
            start: chunk.start,
            end: chunk.end,
            content_type: chunk.content_type,
            findings: output.findings,
            missing: output.missing,
            suggested_next_queries: output.suggested_next_queries,
            answer_if_complete: output
                .answer_if_complete
                .filter(|answer| !answer.trim().is_empty()),
            answer_confidence: output.answer_confidence,
            latency,
            attempts,
            status: ChunkStatus::Succeeded,
        }
    }

    /// A failed-empty result: no findings, whole range reported as a gap.
    pub fn failed(chunk: &Chunk, failure: FailureKind, latency: Duration, attempts: u8) -> Self {
        Self {
            chunk_id: chunk.id,
            start: chunk.start,
            end: chunk.end,
            content_type: chunk.content_type,
            findings: Vec::new(),
            missing: Vec::new(),
            suggested_next_queries: Vec::new(),
            answer_if_complete: None,
            answer_confidence: None,
            latency,
            attempts,
            status: ChunkStatus::Failed(failure),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, ChunkStatus::Succeeded)
    }

    /// The chunk's complete answer and its confidence, if it claimed one.
    ///
    /// Analyzers that omit `answer_confidence` are taken at their word.
    pub fn complete_answer(&self) -> Option<(&str, Confidence)> {
        self.answer_if_complete
            .as_deref()
            .map(|answer| (answer, self.answer_confidence.unwrap_or(Confidence::High)))
    }

    /// Wire-level record for interop and logging.
    pub fn to_record(&self) -> ResultRecord {
        ResultRecord {
            chunk_id: self.chunk_id,
            chunk_size: self.end - self.start,
            processing_time_ms: self.latency.as_millis() as u64,
            content_type: self.content_type,
            findings: self.findings.clone(),
            missing: self.missing.clone(),
            suggested_next_queries: self.suggested_next_queries.clone(),
            answer_if_complete: self.answer_if_complete.clone(),
            status: self.status.clone(),
            attempts: self.attempts,
        }
    }
}

/// Serialized shape of a [`ChunkResult`].
#[derive(Debug, Clone, Serialize)]
pub struct ResultRecord {
    pub chunk_id: usize,
    pub chunk_size: usize,
    pub processing_time_ms: u64,
    pub content_type: ContentType,
    pub findings: Vec<Finding>,
    pub missing: Vec<String>,
    pub suggested_next_queries: Vec<String>,
    pub answer_if_complete: Option<String>,
    pub status: ChunkStatus,
    pub attempts: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_round_trips_through_str() {
        for ct in ContentType::ALL {
            assert_eq!(ct.as_str().parse::<ContentType>().unwrap(), ct);
        }
        assert!("spreadsheet".parse::<ContentType>().is_err());
    }

    #[test]
    fn test_content_type_from_extension() {
        assert_eq!(
            ContentType::from_extension("JSONL"),
            Some(ContentType::StructuredRecord)
        );
        assert_eq!(ContentType::from_extension("rs"), Some(ContentType::Code));
        assert_eq!(ContentType::from_extension("bin"), None);
    }

    #[test]
    fn test_confidence_parses_case_insensitively() {
        let finding: Finding =
            serde_json::from_str(r#"{"point":"p","confidence":"HIGH"}"#).unwrap();
        assert_eq!(finding.confidence, Confidence::High);
        assert!(Confidence::Low < Confidence::Medium && Confidence::Medium < Confidence::High);
    }

    #[test]
    fn test_analysis_output_defaults_missing_fields() {
        let out: AnalysisOutput = serde_json::from_str(r#"{"answer_if_complete":null}"#).unwrap();
        assert!(out.findings.is_empty());
        assert!(out.answer_if_complete.is_none());
    }

    #[test]
    fn test_blank_answer_is_not_complete() {
        let chunk = Chunk {
            id: 0,
            start: 0,
            end: 4,
            overlap: 0,
            content_type: ContentType::PlainText,
            target_size: 4,
            boundary: BoundaryKind::EndOfDocument,
            hash: String::new(),
        };
        let output = AnalysisOutput {
            answer_if_complete: Some("  ".to_string()),
            ..Default::default()
        };
        let result = ChunkResult::succeeded(&chunk, output, Duration::from_secs(1), 1);
        assert!(result.complete_answer().is_none());
    }
}
