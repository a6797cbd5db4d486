//! Result synthesis across waves.
//!
//! The [`Synthesizer`] owns the run's mutable accumulator. It ingests each
//! wave's [`ChunkResult`]s, merges findings that make the same point,
//! records conflicts between findings that disagree, tracks gaps, and
//! decides when enough evidence has accumulated to stop early.
//!
//! # Point matching
//!
//! Points are compared on a normalized key: lowercase alphanumeric
//! tokens without stopwords, negations, or numerals. Two points match
//! when their keys are equal or their token Jaccard similarity reaches
//! [`POINT_SIMILARITY`]. Matching points whose polarity or numbers differ
//! ("retries 3 times" / "retries 5 times") are a conflict, not a merge.
//!
//! # Consensus
//!
//! An aggregated finding's confidence is the highest confidence any
//! source reported. Its reported sources are the chunks that support it
//! at that level, and its representative wording is the variant with the
//! highest (confidence, source count).

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::feedback::SizingStats;
use crate::models::{ChunkResult, ChunkStatus, Confidence, ContentType, Finding};

/// Jaccard similarity at which two point keys are the same point.
pub const POINT_SIMILARITY: f64 = 0.8;
/// Share of a gap's tokens a finding must cover to resolve it.
pub const GAP_COVERAGE: f64 = 0.6;

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "of", "to", "in", "on", "for",
    "and", "or", "it", "its", "this", "that", "with", "by", "as", "at", "from", "do", "does",
    "did", "has", "have", "had", "will", "can",
];
const NEGATIONS: &[&str] = &["not", "no", "never", "none", "cannot", "without", "neither", "nor"];
const GAP_FILLER: &[&str] = &[
    "missing", "unknown", "unclear", "information", "info", "about", "mention", "mentioned",
    "details", "detail", "data", "found", "whether",
];

/// When the synthesizer considers the query answered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopPolicy {
    /// Stop once the high-confidence share of findings exceeds this.
    pub completeness_threshold: f64,
    /// Aggregate completeness is not judged on fewer findings than this.
    pub min_findings: usize,
}

impl Default for StopPolicy {
    fn default() -> Self {
        Self {
            completeness_threshold: 0.8,
            min_findings: 3,
        }
    }
}

/// Why the run stopped before exhausting the document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum StopReason {
    /// A chunk answered the query outright with high confidence.
    AnswerComplete { chunk_id: usize },
    /// Enough aggregated findings are high confidence.
    Completeness { high_ratio: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum GapKind {
    /// An analyzer reported it could not find something.
    Declared,
    /// The chunk could not be analyzed at all.
    AnalysisFailed,
    /// The range was never dispatched because the run was cancelled.
    NotAnalyzed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ByteRange {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Gap {
    pub description: String,
    pub kind: GapKind,
    pub chunk_ids: Vec<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<ByteRange>,
}

/// A point supported by one or more chunks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedFinding {
    pub point: String,
    pub evidence: String,
    pub location: String,
    pub confidence: Confidence,
    /// Chunks supporting the point at `confidence`.
    pub source_chunk_ids: Vec<usize>,
    /// Every chunk that mentioned the point.
    pub mentioned_in: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictSide {
    pub point: String,
    pub confidence: Confidence,
    pub source_chunk_ids: Vec<usize>,
}

/// Two findings on the same point with incompatible content.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conflict {
    pub point: String,
    pub sides: [ConflictSide; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnswerSource {
    /// Taken from a chunk's `answer_if_complete`.
    Complete,
    /// Composed from aggregated findings.
    Composed,
    /// Nothing to answer with.
    None,
}

/// Run-level facts the synthesizer does not track itself.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub run_id: String,
    pub query: String,
    pub content_type: ContentType,
    pub total_chunks: usize,
    pub wave_count: usize,
    pub terminated_early: bool,
    pub sizing: SizingStats,
}

/// The final synthesis record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesisResult {
    pub run_id: String,
    pub query: String,
    pub content_type: ContentType,
    pub total_chunks: usize,
    pub chunks_processed: usize,
    pub failed_chunks: usize,
    pub wave_count: usize,
    pub terminated_early: bool,
    pub stop_reason: Option<StopReason>,
    pub answer: String,
    pub answer_source: AnswerSource,
    pub findings: Vec<AggregatedFinding>,
    pub gaps: Vec<Gap>,
    pub conflicts: Vec<Conflict>,
    pub suggested_next_queries: Vec<String>,
    /// How latency feedback sized the chunks.
    pub sizing: SizingStats,
}

/// Comparison key for a point.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PointKey {
    subject: BTreeSet<String>,
    negated: bool,
    numbers: Vec<String>,
}

impl PointKey {
    fn new(point: &str) -> Self {
        let mut subject = BTreeSet::new();
        let mut negated = false;
        let mut numbers = Vec::new();
        for token in tokenize(point) {
            if NEGATIONS.contains(&token.as_str()) {
                negated = !negated;
            } else if token.chars().any(|c| c.is_ascii_digit()) {
                numbers.push(token);
            } else if !STOPWORDS.contains(&token.as_str()) {
                subject.insert(stem(&token).to_string());
            }
        }
        numbers.sort();
        Self {
            subject,
            negated,
            numbers,
        }
    }

    fn similarity(&self, other: &PointKey) -> f64 {
        if self.subject == other.subject {
            return 1.0;
        }
        jaccard(&self.subject, &other.subject)
    }

    fn compatible(&self, other: &PointKey) -> bool {
        self.negated == other.negated && self.numbers == other.numbers
    }
}

/// One wording of an aggregated point.
#[derive(Debug, Clone)]
struct Variant {
    point: String,
    evidence: String,
    location: String,
    best: Confidence,
    chunks: BTreeSet<usize>,
}

#[derive(Debug, Clone)]
struct Aggregate {
    key: PointKey,
    variants: BTreeMap<String, Variant>,
    support: BTreeMap<Confidence, BTreeSet<usize>>,
}

impl Aggregate {
    fn new(key: PointKey) -> Self {
        Self {
            key,
            variants: BTreeMap::new(),
            support: BTreeMap::new(),
        }
    }

    fn add(&mut self, chunk_id: usize, finding: &Finding) {
        self.support
            .entry(finding.confidence)
            .or_default()
            .insert(chunk_id);
        let variant = self
            .variants
            .entry(normalize(&finding.point))
            .or_insert_with(|| Variant {
                point: finding.point.trim().to_string(),
                evidence: finding.evidence.clone(),
                location: finding.location.clone(),
                best: finding.confidence,
                chunks: BTreeSet::new(),
            });
        if finding.confidence > variant.best {
            variant.best = finding.confidence;
            variant.evidence = finding.evidence.clone();
            variant.location = finding.location.clone();
        }
        variant.chunks.insert(chunk_id);
    }

    fn consensus(&self) -> Confidence {
        self.support
            .keys()
            .next_back()
            .copied()
            .unwrap_or(Confidence::Low)
    }

    fn mentioned_in(&self) -> BTreeSet<usize> {
        self.support.values().flatten().copied().collect()
    }

    fn representative(&self) -> Option<&Variant> {
        self.variants.values().max_by(|a, b| {
            (a.best, a.chunks.len(), std::cmp::Reverse(a.chunks.first()))
                .cmp(&(b.best, b.chunks.len(), std::cmp::Reverse(b.chunks.first())))
        })
    }

    fn to_finding(&self) -> AggregatedFinding {
        let consensus = self.consensus();
        let (point, evidence, location) = self
            .representative()
            .map(|v| (v.point.clone(), v.evidence.clone(), v.location.clone()))
            .unwrap_or_default();
        AggregatedFinding {
            point,
            evidence,
            location,
            confidence: consensus,
            source_chunk_ids: self
                .support
                .get(&consensus)
                .map(|ids| ids.iter().copied().collect())
                .unwrap_or_default(),
            mentioned_in: self.mentioned_in().into_iter().collect(),
        }
    }

    fn tokens(&self) -> BTreeSet<String> {
        self.variants
            .values()
            .flat_map(|v| tokenize(&v.point).chain(tokenize(&v.evidence)))
            .collect()
    }
}

#[derive(Debug, Clone)]
struct DeclaredGap {
    description: String,
    tokens: BTreeSet<String>,
    chunks: BTreeSet<usize>,
}

/// Mutable accumulator for one run. Mutated only between waves.
#[derive(Debug, Clone)]
pub struct Synthesizer {
    policy: StopPolicy,
    aggregates: Vec<Aggregate>,
    conflicts: BTreeSet<(usize, usize)>,
    declared_gaps: BTreeMap<String, DeclaredGap>,
    hard_gaps: Vec<Gap>,
    complete_answers: Vec<(usize, String, Confidence)>,
    suggested: Vec<String>,
    processed: usize,
    failed: usize,
}

impl Synthesizer {
    pub fn new(policy: StopPolicy) -> Self {
        Self {
            policy,
            aggregates: Vec::new(),
            conflicts: BTreeSet::new(),
            declared_gaps: BTreeMap::new(),
            hard_gaps: Vec::new(),
            complete_answers: Vec::new(),
            suggested: Vec::new(),
            processed: 0,
            failed: 0,
        }
    }

    pub fn chunks_processed(&self) -> usize {
        self.processed
    }

    pub fn failed_chunks(&self) -> usize {
        self.failed
    }

    /// Ingest one wave's results. Order within the wave does not matter.
    pub fn ingest(&mut self, results: &[ChunkResult]) {
        let mut ordered: Vec<&ChunkResult> = results.iter().collect();
        ordered.sort_by_key(|r| r.chunk_id);
        for result in ordered {
            self.ingest_one(result);
        }
    }

    fn ingest_one(&mut self, result: &ChunkResult) {
        self.processed += 1;

        if let ChunkStatus::Failed(failure) = &result.status {
            self.failed += 1;
            self.hard_gaps.push(Gap {
                description: format!(
                    "chunk {} (bytes {}..{}) could not be analyzed: {}",
                    result.chunk_id, result.start, result.end, failure
                ),
                kind: GapKind::AnalysisFailed,
                chunk_ids: vec![result.chunk_id],
                range: Some(ByteRange {
                    start: result.start,
                    end: result.end,
                }),
            });
            return;
        }

        for finding in &result.findings {
            if !finding.point.trim().is_empty() {
                self.add_finding(result.chunk_id, finding);
            }
        }

        for missing in &result.missing {
            let normalized = normalize(missing);
            if normalized.is_empty() {
                continue;
            }
            self.declared_gaps
                .entry(normalized)
                .or_insert_with(|| DeclaredGap {
                    description: missing.trim().to_string(),
                    tokens: gap_tokens(missing),
                    chunks: BTreeSet::new(),
                })
                .chunks
                .insert(result.chunk_id);
        }

        for query in &result.suggested_next_queries {
            let query = query.trim();
            if !query.is_empty() && !self.suggested.iter().any(|q| q == query) {
                self.suggested.push(query.to_string());
            }
        }

        if let Some((answer, confidence)) = result.complete_answer() {
            self.complete_answers
                .push((result.chunk_id, answer.trim().to_string(), confidence));
        }
    }

    fn add_finding(&mut self, chunk_id: usize, finding: &Finding) {
        let key = PointKey::new(&finding.point);

        let mut best_match: Option<(usize, f64)> = None;
        let mut disagreeing = Vec::new();
        for (idx, aggregate) in self.aggregates.iter().enumerate() {
            let similarity = key.similarity(&aggregate.key);
            if similarity < POINT_SIMILARITY {
                continue;
            }
            if key.compatible(&aggregate.key) {
                if best_match.map_or(true, |(_, s)| similarity > s) {
                    best_match = Some((idx, similarity));
                }
            } else {
                disagreeing.push(idx);
            }
        }

        let idx = match best_match {
            Some((idx, _)) => idx,
            None => {
                self.aggregates.push(Aggregate::new(key));
                self.aggregates.len() - 1
            }
        };
        self.aggregates[idx].add(chunk_id, finding);
        for other in disagreeing {
            self.conflicts.insert((other.min(idx), other.max(idx)));
        }
    }

    /// Why the run should stop now, if it should.
    ///
    /// A high-confidence complete answer takes precedence over aggregate
    /// completeness.
    pub fn stop_reason(&self) -> Option<StopReason> {
        if let Some((chunk_id, _, _)) = self
            .complete_answers
            .iter()
            .filter(|(_, _, confidence)| *confidence == Confidence::High)
            .min_by_key(|(chunk_id, _, _)| *chunk_id)
        {
            return Some(StopReason::AnswerComplete {
                chunk_id: *chunk_id,
            });
        }

        let total = self.aggregates.len();
        if total == 0 || total < self.policy.min_findings {
            return None;
        }
        let high = self
            .aggregates
            .iter()
            .filter(|a| a.consensus() == Confidence::High)
            .count();
        let high_ratio = high as f64 / total as f64;
        if high_ratio > self.policy.completeness_threshold {
            return Some(StopReason::Completeness { high_ratio });
        }
        None
    }

    pub fn should_stop(&self) -> bool {
        self.stop_reason().is_some()
    }

    /// Record a byte range that was never dispatched.
    pub fn add_unanalyzed_range(&mut self, start: usize, end: usize, reason: &str) {
        self.hard_gaps.push(Gap {
            description: format!("bytes {}..{} were not analyzed: {}", start, end, reason),
            kind: GapKind::NotAnalyzed,
            chunk_ids: Vec::new(),
            range: Some(ByteRange { start, end }),
        });
    }

    /// Current aggregated findings, strongest first.
    pub fn findings(&self) -> Vec<AggregatedFinding> {
        let mut findings: Vec<AggregatedFinding> =
            self.aggregates.iter().map(Aggregate::to_finding).collect();
        findings.sort_by(|a, b| {
            b.confidence
                .cmp(&a.confidence)
                .then(b.source_chunk_ids.len().cmp(&a.source_chunk_ids.len()))
                .then(a.mentioned_in.first().cmp(&b.mentioned_in.first()))
        });
        findings
    }

    pub fn conflicts(&self) -> Vec<Conflict> {
        self.conflicts
            .iter()
            .map(|&(a, b)| {
                let left = self.aggregates[a].to_finding();
                let right = self.aggregates[b].to_finding();
                Conflict {
                    point: left.point.clone(),
                    sides: [side(&left), side(&right)],
                }
            })
            .collect()
    }

    /// Gaps still open: unresolved declared gaps plus failures.
    pub fn gaps(&self) -> Vec<Gap> {
        let mut gaps: Vec<Gap> = self
            .declared_gaps
            .values()
            .filter(|gap| !self.is_resolved(gap))
            .map(|gap| Gap {
                description: gap.description.clone(),
                kind: GapKind::Declared,
                chunk_ids: gap.chunks.iter().copied().collect(),
                range: None,
            })
            .collect();
        gaps.sort_by(|a, b| a.chunk_ids.cmp(&b.chunk_ids));
        gaps.extend(self.hard_gaps.iter().cloned());
        gaps
    }

    fn is_resolved(&self, gap: &DeclaredGap) -> bool {
        if gap.tokens.is_empty() {
            return false;
        }
        self.aggregates.iter().any(|aggregate| {
            let from_elsewhere = aggregate
                .mentioned_in()
                .iter()
                .any(|chunk| !gap.chunks.contains(chunk));
            if !from_elsewhere {
                return false;
            }
            let tokens = aggregate.tokens();
            let covered = gap.tokens.iter().filter(|t| tokens.contains(*t)).count();
            covered as f64 / gap.tokens.len() as f64 >= GAP_COVERAGE
        })
    }

    /// Produce the final synthesis record.
    pub fn finalize(&self, run: RunSummary) -> SynthesisResult {
        let findings = self.findings();
        let conflicts = self.conflicts();
        let (answer, answer_source) = self.compose_answer(&findings, &conflicts);

        SynthesisResult {
            run_id: run.run_id,
            query: run.query,
            content_type: run.content_type,
            total_chunks: run.total_chunks.max(self.processed),
            chunks_processed: self.processed,
            failed_chunks: self.failed,
            wave_count: run.wave_count,
            terminated_early: run.terminated_early,
            stop_reason: if run.terminated_early {
                self.stop_reason()
            } else {
                None
            },
            answer,
            answer_source,
            findings,
            gaps: self.gaps(),
            conflicts,
            suggested_next_queries: self.suggested.clone(),
            sizing: run.sizing,
        }
    }

    fn compose_answer(
        &self,
        findings: &[AggregatedFinding],
        conflicts: &[Conflict],
    ) -> (String, AnswerSource) {
        if let Some((_, answer, _)) = self
            .complete_answers
            .iter()
            .max_by(|a, b| a.2.cmp(&b.2).then(b.0.cmp(&a.0)))
        {
            return (answer.clone(), AnswerSource::Complete);
        }

        let disputed: BTreeSet<&str> = conflicts
            .iter()
            .flat_map(|c| c.sides.iter().map(|s| s.point.as_str()))
            .collect();
        let usable: Vec<&AggregatedFinding> = findings
            .iter()
            .filter(|f| f.confidence >= Confidence::Medium)
            .filter(|f| !disputed.contains(f.point.as_str()))
            .collect();

        if usable.is_empty() && conflicts.is_empty() {
            let answer = if self.processed > 0 && self.failed == self.processed {
                "No evidence could be obtained: every analyzed chunk failed."
            } else {
                "No evidence relevant to the query was found."
            };
            return (answer.to_string(), AnswerSource::None);
        }

        let mut lines: Vec<String> = usable
            .iter()
            .map(|f| {
                format!(
                    "- {} [{}; chunks {}]",
                    f.point,
                    f.confidence,
                    join_ids(&f.source_chunk_ids)
                )
            })
            .collect();
        if !conflicts.is_empty() {
            lines.push("Disputed:".to_string());
            for conflict in conflicts {
                lines.push(format!(
                    "- \"{}\" vs \"{}\"",
                    conflict.sides[0].point, conflict.sides[1].point
                ));
            }
        }
        (lines.join("\n"), AnswerSource::Composed)
    }
}

impl Default for Synthesizer {
    fn default() -> Self {
        Self::new(StopPolicy::default())
    }
}

fn side(finding: &AggregatedFinding) -> ConflictSide {
    ConflictSide {
        point: finding.point.clone(),
        confidence: finding.confidence,
        source_chunk_ids: finding.source_chunk_ids.clone(),
    }
}

fn join_ids(ids: &[usize]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Lowercase alphanumeric tokens; `n't` contractions become `not`.
fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|t| !t.is_empty())
        .flat_map(|raw| {
            let lower = raw.to_lowercase();
            let mut out = Vec::with_capacity(2);
            if let Some(stem) = lower.strip_suffix("n't") {
                if stem == "can" || stem == "won" {
                    out.push(if stem == "can" { "can" } else { "will" }.to_string());
                } else if !stem.is_empty() {
                    out.push(stem.to_string());
                }
                out.push("not".to_string());
            } else {
                let cleaned = lower.trim_matches('\'').to_string();
                if !cleaned.is_empty() {
                    out.push(cleaned);
                }
            }
            out
        })
}

/// Strip a plural or third-person `s`.
fn stem(token: &str) -> &str {
    match token.strip_suffix('s') {
        Some(rest) if rest.len() >= 3 && !rest.ends_with('s') => rest,
        _ => token,
    }
}

fn normalize(text: &str) -> String {
    tokenize(text).collect::<Vec<_>>().join(" ")
}

fn gap_tokens(text: &str) -> BTreeSet<String> {
    tokenize(text)
        .filter(|t| {
            !STOPWORDS.contains(&t.as_str())
                && !NEGATIONS.contains(&t.as_str())
                && !GAP_FILLER.contains(&t.as_str())
        })
        .collect()
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 1.0;
    }
    a.intersection(b).count() as f64 / union as f64
}
