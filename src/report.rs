//! Rendering the synthesis and exporting per-chunk records.
//!
//! - [`render_text`]: human-readable report for the terminal.
//! - [`render_json`]: the full [`SynthesisResult`] as pretty JSON.
//! - [`write_records`]: one wire-level [`ResultRecord`] per line (JSONL).
//!
//! [`ResultRecord`]: context_sweep_core::models::ResultRecord

use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::io::Write;
use std::path::Path;

use context_sweep_core::models::ChunkResult;
use context_sweep_core::synthesis::{GapKind, StopReason, SynthesisResult};

/// Render a synthesis result for people.
pub fn render_text(result: &SynthesisResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Query: {}", result.query);
    let _ = writeln!(
        out,
        "Chunks: {} of {} analyzed ({} failed) in {} waves [{}]",
        result.chunks_processed,
        result.total_chunks,
        result.failed_chunks,
        result.wave_count,
        result.content_type
    );
    if result.terminated_early {
        let reason = match &result.stop_reason {
            Some(StopReason::AnswerComplete { chunk_id }) => {
                format!("chunk {} answered the query", chunk_id)
            }
            Some(StopReason::Completeness { high_ratio }) => {
                format!("{:.0}% of findings are high confidence", high_ratio * 100.0)
            }
            None => "stop policy satisfied".to_string(),
        };
        let _ = writeln!(out, "Stopped early: {}", reason);
    }

    let sizing = &result.sizing;
    let _ = writeln!(
        out,
        "Sizing: target {} bytes (bounds {}..{}), {} observations, {} size changes, mean latency {} ms",
        sizing.current_size,
        sizing.min_size,
        sizing.max_size,
        sizing.observations,
        sizing.size_changes,
        sizing.mean_latency_ms
    );

    let _ = writeln!(out, "\nAnswer:\n{}", result.answer);

    if !result.findings.is_empty() {
        let _ = writeln!(out, "\nFindings:");
        for (i, finding) in result.findings.iter().enumerate() {
            let _ = writeln!(
                out,
                "{}. [{}] {}  (chunks {:?})",
                i + 1,
                finding.confidence,
                finding.point,
                finding.source_chunk_ids
            );
            if !finding.evidence.is_empty() {
                let _ = writeln!(out, "    evidence: {}", finding.evidence);
            }
            if !finding.location.is_empty() {
                let _ = writeln!(out, "    location: {}", finding.location);
            }
        }
    }

    if !result.conflicts.is_empty() {
        let _ = writeln!(out, "\nConflicts:");
        for conflict in &result.conflicts {
            let [left, right] = &conflict.sides;
            let _ = writeln!(
                out,
                "- \"{}\" (chunks {:?}) vs \"{}\" (chunks {:?})",
                left.point, left.source_chunk_ids, right.point, right.source_chunk_ids
            );
        }
    }

    if !result.gaps.is_empty() {
        let _ = writeln!(out, "\nGaps:");
        for gap in &result.gaps {
            let tag = match gap.kind {
                GapKind::Declared => "missing",
                GapKind::AnalysisFailed => "failed",
                GapKind::NotAnalyzed => "skipped",
            };
            let _ = writeln!(out, "- [{}] {}", tag, gap.description);
        }
    }

    if !result.suggested_next_queries.is_empty() {
        let _ = writeln!(out, "\nSuggested next queries:");
        for query in &result.suggested_next_queries {
            let _ = writeln!(out, "- {}", query);
        }
    }

    out
}

pub fn render_json(result: &SynthesisResult) -> Result<String> {
    serde_json::to_string_pretty(result).with_context(|| "Failed to serialize synthesis result")
}

/// Write one JSON record per chunk result to `writer`.
pub fn write_records_to<W: Write>(writer: &mut W, results: &[ChunkResult]) -> Result<()> {
    for result in results {
        let line = serde_json::to_string(&result.to_record())?;
        writeln!(writer, "{}", line)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write per-chunk records to a JSONL file at `path`.
pub fn write_records(path: &Path, results: &[ChunkResult]) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create records file: {}", path.display()))?;
    let mut writer = std::io::BufWriter::new(file);
    write_records_to(&mut writer, results)
        .with_context(|| format!("Failed to write records to {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use context_sweep_core::models::{
        AnalysisOutput, BoundaryKind, Chunk, Confidence, ContentType, FailureKind, Finding,
    };
    use context_sweep_core::feedback::SizingStats;
    use context_sweep_core::synthesis::{RunSummary, Synthesizer};
    use std::time::Duration;

    fn chunk(id: usize) -> Chunk {
        Chunk {
            id,
            start: id * 10,
            end: id * 10 + 10,
            overlap: 0,
            content_type: ContentType::TimestampedLog,
            target_size: 10,
            boundary: BoundaryKind::Explicit,
            hash: String::new(),
        }
    }

    fn results() -> Vec<ChunkResult> {
        vec![
            ChunkResult::succeeded(
                &chunk(0),
                AnalysisOutput {
                    findings: vec![Finding {
                        point: "Disk filled at 03:12".into(),
                        evidence: "ENOSPC".into(),
                        confidence: Confidence::High,
                        location: "03:12:44".into(),
                    }],
                    missing: vec!["root cause".into()],
                    ..Default::default()
                },
                Duration::from_millis(1_500),
                1,
            ),
            ChunkResult::failed(&chunk(1), FailureKind::Timeout, Duration::from_secs(40), 2),
        ]
    }

    fn synthesis() -> SynthesisResult {
        let mut synth = Synthesizer::default();
        synth.ingest(&results());
        synth.finalize(RunSummary {
            run_id: "r1".into(),
            query: "why did the job fail".into(),
            content_type: ContentType::TimestampedLog,
            total_chunks: 5,
            wave_count: 1,
            terminated_early: false,
            sizing: SizingStats {
                content_type: ContentType::TimestampedLog,
                current_size: 60_000,
                min_size: 50_000,
                max_size: 200_000,
                observations: 2,
                size_changes: 1,
                mean_latency_ms: 20_750,
            },
        })
    }

    #[test]
    fn test_text_report_sections() {
        let text = render_text(&synthesis());
        assert!(text.starts_with("Query: why did the job fail"));
        assert!(text.contains("Chunks: 2 of 5 analyzed (1 failed) in 1 waves [timestamped-log]"));
        assert!(text.contains("1. [high] Disk filled at 03:12  (chunks [0])"));
        assert!(text.contains("- [missing] root cause"));
        assert!(text.contains("- [failed] chunk 1 (bytes 10..20) could not be analyzed: timed out"));
        assert!(!text.contains("Stopped early"));
    }

    #[test]
    fn test_text_report_shows_sizing() {
        let text = render_text(&synthesis());
        assert!(text.contains(
            "Sizing: target 60000 bytes (bounds 50000..200000), 2 observations, 1 size changes, mean latency 20750 ms"
        ));
    }

    #[test]
    fn test_json_report_round_trips_fields() {
        let json: serde_json::Value = serde_json::from_str(&render_json(&synthesis()).unwrap()).unwrap();
        assert_eq!(json["run_id"], "r1");
        assert_eq!(json["content_type"], "timestamped-log");
        assert_eq!(json["findings"][0]["confidence"], "high");
        assert_eq!(json["gaps"][1]["kind"], "analysis-failed");
        assert_eq!(json["sizing"]["current_size"], 60_000);
        assert_eq!(json["sizing"]["observations"], 2);
        assert_eq!(json["sizing"]["content_type"], "timestamped-log");
    }

    #[test]
    fn test_records_are_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.jsonl");
        write_records(&path, &results()).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["chunk_size"], 10);
        assert_eq!(lines[0]["processing_time_ms"], 1500);
        assert_eq!(lines[0]["answer_if_complete"], serde_json::Value::Null);
        assert_eq!(lines[1]["attempts"], 2);
    }
}
