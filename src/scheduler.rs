//! Wave scheduler.
//!
//! Dispatches chunks to the [`Analyzer`] in waves of at most `wave_size`
//! and never starts a wave before the previous one has fully drained.
//!
//! # State machine
//!
//! ```text
//! Idle ─▶ DispatchingWave ─▶ AwaitingWave ─▶ CheckingStop ─┬─▶ DispatchingWave
//!               │                                          ├─▶ Done
//!               ├─▶ Done (nothing left)                    └─▶ DoneEarly
//!               └─▶ Cancelled (token fired between waves)
//! ```
//!
//! # Per-chunk attempts
//!
//! Each attempt is bounded by `chunk_timeout`. A timeout or an analyzer
//! error triggers exactly one retry of the same chunk; a second failure
//! yields a failed-empty [`ChunkResult`] and the wave carries on.
//!
//! Results are fed to the wave source and the synthesizer in chunk-id
//! order once the whole wave has settled, so completion order inside a
//! wave never affects the outcome.

use chrono::Utc;
use futures::future::join_all;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;

use crate::analyzer::{instructions_for, AnalysisRequest, Analyzer};
use crate::progress::{WaveProgressEvent, WaveProgressReporter};
use context_sweep_core::models::{Chunk, ChunkResult, Document, FailureKind};
use context_sweep_core::synthesis::Synthesizer;
use context_sweep_core::wave::{Wave, WaveSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    DispatchingWave,
    AwaitingWave,
    CheckingStop,
    /// Every chunk was dispatched.
    Done,
    /// The synthesizer's stop policy was satisfied with chunks remaining.
    DoneEarly,
    /// Cancelled between waves.
    Cancelled,
}

impl SchedulerState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SchedulerState::Done | SchedulerState::DoneEarly | SchedulerState::Cancelled
        )
    }
}

/// Which try this is for a chunk. There is no third.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    First,
    Retry,
}

impl Attempt {
    fn number(self) -> u8 {
        match self {
            Attempt::First => 1,
            Attempt::Retry => 2,
        }
    }

    fn next(self) -> Option<Attempt> {
        match self {
            Attempt::First => Some(Attempt::Retry),
            Attempt::Retry => None,
        }
    }
}

/// What a scheduler run produced.
#[derive(Debug)]
pub struct ScheduleOutcome {
    /// Every chunk result, in dispatch order.
    pub results: Vec<ChunkResult>,
    pub waves: Vec<Wave>,
    pub state: SchedulerState,
}

impl ScheduleOutcome {
    pub fn terminated_early(&self) -> bool {
        self.state == SchedulerState::DoneEarly
    }

    pub fn cancelled(&self) -> bool {
        self.state == SchedulerState::Cancelled
    }
}

pub struct WaveScheduler<'a> {
    analyzer: &'a dyn Analyzer,
    wave_size: usize,
    chunk_timeout: Duration,
    cancel: CancellationToken,
    progress: &'a dyn WaveProgressReporter,
}

impl<'a> WaveScheduler<'a> {
    pub fn new(
        analyzer: &'a dyn Analyzer,
        wave_size: usize,
        chunk_timeout: Duration,
        progress: &'a dyn WaveProgressReporter,
    ) -> Self {
        Self {
            analyzer,
            wave_size: wave_size.max(1),
            chunk_timeout,
            cancel: CancellationToken::new(),
            progress,
        }
    }

    /// Stop dispatching once `token` fires. A wave in flight always drains.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Drive `source` to completion, early stop, or cancellation.
    pub async fn run<S: WaveSource + ?Sized>(
        &self,
        source: &mut S,
        document: &Document,
        query: &str,
        synthesizer: &mut Synthesizer,
    ) -> ScheduleOutcome {
        let instructions = instructions_for(document.content_type());
        let mut results: Vec<ChunkResult> = Vec::new();
        let mut waves: Vec<Wave> = Vec::new();
        let mut state = transition(SchedulerState::Idle, SchedulerState::DispatchingWave);

        loop {
            if self.cancel.is_cancelled() {
                state = transition(state, SchedulerState::Cancelled);
                break;
            }

            let chunks = source.next_wave(self.wave_size);
            if chunks.is_empty() {
                state = transition(state, SchedulerState::Done);
                break;
            }

            let mut wave = Wave::new(waves.len(), &chunks);
            self.progress.report(WaveProgressEvent::WaveStarted {
                wave: wave.index + 1,
                chunks: chunks.len(),
                processed: results.len(),
                estimated_total: source.estimated_total(),
            });
            tracing::info!(
                wave = wave.index,
                chunks = chunks.len(),
                first_chunk = chunks[0].id,
                target_size = chunks[0].target_size,
                "dispatching wave"
            );
            state = transition(state, SchedulerState::AwaitingWave);

            let started = Instant::now();
            let mut wave_results = join_all(
                chunks
                    .iter()
                    .map(|chunk| self.analyze_chunk(chunk, document, query, &instructions)),
            )
            .await;
            wave.duration_ms = started.elapsed().as_millis() as u64;
            wave.completed_at = Some(Utc::now());

            wave_results.sort_by_key(|r| r.chunk_id);
            for result in &wave_results {
                source.observe(result);
            }
            synthesizer.ingest(&wave_results);

            let failed = wave_results.iter().filter(|r| !r.is_success()).count();
            results.extend(wave_results);
            self.progress.report(WaveProgressEvent::WaveFinished {
                wave: wave.index + 1,
                succeeded: chunks.len() - failed,
                failed,
                processed: results.len(),
                estimated_total: source.estimated_total(),
                elapsed_ms: wave.duration_ms,
            });
            tracing::info!(
                wave = wave.index,
                failed,
                duration_ms = wave.duration_ms,
                processed = results.len(),
                "wave drained"
            );
            waves.push(wave);

            state = transition(state, SchedulerState::CheckingStop);
            if source.is_exhausted() {
                state = transition(state, SchedulerState::Done);
                break;
            }
            if let Some(reason) = synthesizer.stop_reason() {
                tracing::info!(?reason, "stop policy satisfied");
                state = transition(state, SchedulerState::DoneEarly);
                break;
            }
            state = transition(state, SchedulerState::DispatchingWave);
        }

        ScheduleOutcome {
            results,
            waves,
            state,
        }
    }

    async fn analyze_chunk(
        &self,
        chunk: &Chunk,
        document: &Document,
        query: &str,
        instructions: &str,
    ) -> ChunkResult {
        let request = AnalysisRequest {
            chunk_id: chunk.id,
            content_type: chunk.content_type,
            offset: chunk.start,
            text: chunk.text(document),
            query,
            instructions,
        };

        let started = Instant::now();
        let mut attempt = Attempt::First;
        loop {
            let failure = match timeout(self.chunk_timeout, self.analyzer.analyze(request)).await {
                Ok(Ok(output)) => {
                    return ChunkResult::succeeded(chunk, output, started.elapsed(), attempt.number())
                }
                Ok(Err(e)) => FailureKind::Error(format!("{:#}", e)),
                Err(_) => FailureKind::Timeout,
            };

            match attempt.next() {
                Some(next) => {
                    tracing::warn!(chunk = chunk.id, %failure, "chunk analysis failed, retrying once");
                    attempt = next;
                }
                None => {
                    tracing::warn!(
                        chunk = chunk.id,
                        start = chunk.start,
                        end = chunk.end,
                        %failure,
                        "chunk analysis failed twice, recording gap"
                    );
                    return ChunkResult::failed(chunk, failure, started.elapsed(), attempt.number());
                }
            }
        }
    }
}

fn transition(from: SchedulerState, to: SchedulerState) -> SchedulerState {
    tracing::debug!(?from, ?to, "scheduler state");
    to
}
