//! Errors surfaced by the engine.
//!
//! Per-chunk analysis failures never appear here: they are absorbed into
//! the synthesis as gaps. Only problems that stop a run before or between
//! waves reach the caller.

use thiserror::Error;

use context_sweep_core::synthesis::SynthesisResult;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Rejected before any chunk was dispatched.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The run was cancelled between waves. Carries what was synthesized
    /// from the waves that completed.
    #[error("Run cancelled after {} of {} chunks", .partial.chunks_processed, .partial.total_chunks)]
    Cancelled { partial: Box<SynthesisResult> },
}

impl EngineError {
    /// The partial synthesis of a cancelled run.
    pub fn partial(&self) -> Option<&SynthesisResult> {
        match self {
            EngineError::Cancelled { partial } => Some(partial),
            EngineError::Config(_) => None,
        }
    }
}
