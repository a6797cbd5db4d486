//! Engine entry point: `process(document, query, config)`.
//!
//! Wires the pieces of one run together:
//!
//! 1. Validate the [`EngineConfig`] (fatal before any dispatch).
//! 2. Plan chunks lazily with a [`ChunkPlanner`] sized by a
//!    [`FeedbackController`], so each wave's latencies shape the next.
//! 3. Drive the [`WaveScheduler`] until the document is exhausted, the
//!    stop policy is met, or the run is cancelled.
//! 4. Record any range left unplanned by `max_chunks` as a gap and
//!    finalize the [`Synthesizer`].

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::analyzer::Analyzer;
use crate::error::{EngineError, Result};
use crate::progress::{NoProgress, WaveProgressEvent, WaveProgressReporter};
use crate::scheduler::WaveScheduler;
use context_sweep_core::feedback::{FeedbackController, SizeBounds};
use context_sweep_core::models::{ChunkResult, Document};
use context_sweep_core::planner::ChunkPlanner;
use context_sweep_core::synthesis::{RunSummary, StopPolicy, SynthesisResult, Synthesizer};
use context_sweep_core::wave::{AdaptivePlan, Wave, WaveSource};

/// Tunables for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Maximum chunks in flight per wave.
    pub wave_size: usize,
    pub bounds: SizeBounds,
    /// Bytes each chunk repeats from the end of the previous one.
    pub overlap: usize,
    /// Cover the document in at most this many chunks, growing them as
    /// needed.
    pub max_chunks: Option<usize>,
    pub completeness_threshold: f64,
    pub min_findings: usize,
    /// Bound on a single analyzer attempt.
    pub chunk_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let policy = StopPolicy::default();
        Self {
            wave_size: 4,
            bounds: SizeBounds::default(),
            overlap: 0,
            max_chunks: None,
            completeness_threshold: policy.completeness_threshold,
            min_findings: policy.min_findings,
            chunk_timeout: Duration::from_secs(60),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.wave_size == 0 {
            return Err(EngineError::Config("wave_size must be > 0".into()));
        }
        if self.bounds.min == 0 {
            return Err(EngineError::Config("min_chunk_size must be > 0".into()));
        }
        if self.bounds.min > self.bounds.max {
            return Err(EngineError::Config(format!(
                "min_chunk_size ({}) must not exceed max_chunk_size ({})",
                self.bounds.min, self.bounds.max
            )));
        }
        if self.overlap >= self.bounds.min {
            return Err(EngineError::Config(format!(
                "overlap ({}) must be smaller than min_chunk_size ({})",
                self.overlap, self.bounds.min
            )));
        }
        if self.max_chunks == Some(0) {
            return Err(EngineError::Config("max_chunks must be > 0 when set".into()));
        }
        if !(0.0..=1.0).contains(&self.completeness_threshold) {
            return Err(EngineError::Config(
                "completeness_threshold must be in [0.0, 1.0]".into(),
            ));
        }
        if self.chunk_timeout.is_zero() {
            return Err(EngineError::Config("chunk_timeout must be > 0".into()));
        }
        Ok(())
    }

    pub fn stop_policy(&self) -> StopPolicy {
        StopPolicy {
            completeness_threshold: self.completeness_threshold,
            min_findings: self.min_findings,
        }
    }
}

/// Everything a run produced: the synthesis plus the raw per-chunk
/// results and wave bookkeeping, for record export.
#[derive(Debug)]
pub struct EngineRun {
    pub synthesis: SynthesisResult,
    pub results: Vec<ChunkResult>,
    pub waves: Vec<Wave>,
}

pub struct Engine {
    config: EngineConfig,
    analyzer: Arc<dyn Analyzer>,
    progress: Box<dyn WaveProgressReporter>,
    cancel: CancellationToken,
}

impl Engine {
    pub fn new(config: EngineConfig, analyzer: Arc<dyn Analyzer>) -> Self {
        Self {
            config,
            analyzer,
            progress: Box::new(NoProgress),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_progress(mut self, progress: Box<dyn WaveProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Use `token` to cancel runs. Cancelling stops dispatch after the
    /// wave in flight drains.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Analyze `document` against `query` and return the synthesis.
    pub async fn process(&self, document: &Document, query: &str) -> Result<SynthesisResult> {
        self.run(document, query).await.map(|run| run.synthesis)
    }

    /// Like [`process`](Engine::process), but keeps per-chunk results.
    pub async fn run(&self, document: &Document, query: &str) -> Result<EngineRun> {
        self.config.validate()?;
        if query.trim().is_empty() {
            return Err(EngineError::Config("query must not be empty".into()));
        }

        let run_id = uuid::Uuid::new_v4().to_string();
        tracing::info!(
            run_id = %run_id,
            content_type = %document.content_type(),
            bytes = document.len(),
            analyzer = self.analyzer.name(),
            "starting sweep"
        );

        let planner = ChunkPlanner::new(document).with_overlap(self.config.overlap);
        let feedback = FeedbackController::new(self.config.bounds);
        let mut source = AdaptivePlan::new(planner, feedback).with_max_chunks(self.config.max_chunks);
        let mut synthesizer = Synthesizer::new(self.config.stop_policy());

        let scheduler = WaveScheduler::new(
            self.analyzer.as_ref(),
            self.config.wave_size,
            self.config.chunk_timeout,
            self.progress.as_ref(),
        )
        .with_cancellation(self.cancel.clone());
        let outcome = scheduler
            .run(&mut source, document, query, &mut synthesizer)
            .await;

        if outcome.cancelled() {
            if let Some((start, end)) = source.remaining_range() {
                tracing::warn!(start, end, "run cancelled, remainder not analyzed");
                synthesizer.add_unanalyzed_range(start, end, "run cancelled");
            }
        }

        let synthesis = synthesizer.finalize(RunSummary {
            run_id,
            query: query.to_string(),
            content_type: document.content_type(),
            total_chunks: source.estimated_total(),
            wave_count: outcome.waves.len(),
            terminated_early: outcome.terminated_early(),
            sizing: source.feedback().stats_for(document.content_type()),
        });

        self.progress.report(WaveProgressEvent::Finished {
            processed: synthesis.chunks_processed,
            total: synthesis.total_chunks,
            terminated_early: synthesis.terminated_early,
        });
        tracing::info!(
            run_id = %synthesis.run_id,
            processed = synthesis.chunks_processed,
            total = synthesis.total_chunks,
            failed = synthesis.failed_chunks,
            waves = synthesis.wave_count,
            terminated_early = synthesis.terminated_early,
            "sweep finished"
        );

        if outcome.cancelled() {
            return Err(EngineError::Cancelled {
                partial: Box::new(synthesis),
            });
        }

        Ok(EngineRun {
            synthesis,
            results: outcome.results,
            waves: outcome.waves,
        })
    }
}

/// One-shot convenience wrapper around [`Engine::process`].
pub async fn process(
    document: &Document,
    query: &str,
    config: EngineConfig,
    analyzer: Arc<dyn Analyzer>,
) -> Result<SynthesisResult> {
    Engine::new(config, analyzer).process(document, query).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let cases = [
            EngineConfig {
                wave_size: 0,
                ..Default::default()
            },
            EngineConfig {
                bounds: SizeBounds { min: 10, max: 5 },
                ..Default::default()
            },
            EngineConfig {
                bounds: SizeBounds { min: 0, max: 5 },
                ..Default::default()
            },
            EngineConfig {
                overlap: 50_000,
                ..Default::default()
            },
            EngineConfig {
                max_chunks: Some(0),
                ..Default::default()
            },
            EngineConfig {
                completeness_threshold: 1.5,
                ..Default::default()
            },
            EngineConfig {
                chunk_timeout: Duration::ZERO,
                ..Default::default()
            },
        ];
        for config in cases {
            assert!(
                matches!(config.validate(), Err(EngineError::Config(_))),
                "{:?} should be rejected",
                config
            );
        }
    }
}
