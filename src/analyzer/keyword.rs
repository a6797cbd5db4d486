//! Offline keyword analyzer.
//!
//! Scores each line of the chunk by how many query terms it contains and
//! reports the best lines as findings. It never claims a complete answer.
//! Useful for dry runs, CI, and exercising the pipeline without a model.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeSet;

use super::{AnalysisRequest, Analyzer};
use context_sweep_core::models::{AnalysisOutput, Confidence, Finding};

const MAX_FINDINGS: usize = 5;
const MAX_POINT_CHARS: usize = 160;
const MAX_EVIDENCE_CHARS: usize = 240;

const QUERY_STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "was", "were", "what", "which", "when", "where", "who", "why",
    "how", "does", "did", "with", "from", "that", "this", "there", "their", "about", "into",
    "any", "all", "has", "have", "had", "can", "could", "should", "would", "will", "its", "not",
];

#[derive(Debug, Default, Clone)]
pub struct KeywordAnalyzer;

impl KeywordAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Analyzer for KeywordAnalyzer {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn analyze(&self, request: AnalysisRequest<'_>) -> Result<AnalysisOutput> {
        Ok(analyze_text(request.text, request.offset, request.query))
    }
}

/// Distinct significant terms of a query, in order of appearance.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    words(query)
        .filter(|w| w.chars().count() >= 3 && !QUERY_STOPWORDS.contains(&w.as_str()))
        .filter(|w| seen.insert(w.clone()))
        .collect()
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

fn term_matches(term: &str, word: &str) -> bool {
    word == term || (term.len() >= 4 && word.starts_with(term))
}

fn analyze_text(text: &str, offset: usize, query: &str) -> AnalysisOutput {
    let terms = query_terms(query);
    if terms.is_empty() {
        return AnalysisOutput::default();
    }

    let mut seen_terms = BTreeSet::new();
    let mut scored = Vec::new();
    let mut line_start = 0;
    for line in text.split_inclusive('\n') {
        let line_words: Vec<String> = words(line).collect();
        let matched: BTreeSet<&str> = terms
            .iter()
            .filter(|t| line_words.iter().any(|w| term_matches(t, w)))
            .map(String::as_str)
            .collect();
        if !matched.is_empty() {
            seen_terms.extend(matched.iter().copied());
            let score = matched.len() as f64 / terms.len() as f64;
            scored.push((score, line_start, line));
        }
        line_start += line.len();
    }

    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
    let findings = scored
        .into_iter()
        .take(MAX_FINDINGS)
        .map(|(score, start, line)| Finding {
            point: truncate(line.trim(), MAX_POINT_CHARS),
            evidence: truncate(line.trim(), MAX_EVIDENCE_CHARS),
            confidence: confidence_for(score),
            location: format!(
                "bytes {}..{}",
                offset + start,
                offset + start + line.trim_end().len()
            ),
        })
        .collect();

    let missing = terms
        .iter()
        .filter(|t| !seen_terms.contains(t.as_str()))
        .map(|t| format!("no mention of \"{}\"", t))
        .collect();

    AnalysisOutput {
        findings,
        missing,
        ..Default::default()
    }
}

fn confidence_for(score: f64) -> Confidence {
    if score >= 1.0 {
        Confidence::High
    } else if score >= 0.5 {
        Confidence::Medium
    } else {
        Confidence::Low
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}
