//! # Context Sweep
//!
//! Analyze documents far larger than a model's context window against a
//! single query.
//!
//! The document is cut into boundary-respecting chunks, the chunks are
//! analyzed in small concurrent waves, chunk sizes adapt to observed
//! latency between waves, and per-chunk findings are merged into one
//! answer with explicit gaps and conflicts. The run stops early once the
//! accumulated evidence answers the query.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌────────────────┐   ┌─────────────┐
//! │ Document │──▶│   Boundary   │──▶│  Chunk Planner  │──▶│    Wave     │
//! │ + query  │   │   Detector   │   │ (sized by the   │   │  Scheduler  │
//! └──────────┘   └──────────────┘   │  feedback loop) │   └──────┬──────┘
//!                                   └───────▲────────┘          │ analyze
//!                                           │ latency    ┌──────▼──────┐
//!                                           └────────────│  Analyzer   │
//!                                                        └──────┬──────┘
//!                                   ┌──────────────┐            │ results
//!                                   │ Synthesizer  │◀───────────┘
//!                                   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! sweep detect ./server.log
//! sweep plan ./handbook.md
//! sweep run ./handbook.md --query "How are secrets rotated?"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`engine`] | `process(document, query, config)` entry point |
//! | [`scheduler`] | Wave dispatch, timeouts, and the single retry |
//! | [`analyzer`] | Analyzer trait and providers |
//! | [`progress`] | Progress reporting on stderr |
//! | [`report`] | Text/JSON rendering and JSONL record export |
//! | [`error`] | Engine errors |
//!
//! Runtime-free logic (models, boundary detection, planning, feedback,
//! synthesis) lives in `context-sweep-core` and is re-exported here.

pub mod analyzer;
pub mod config;
pub mod engine;
pub mod error;
pub mod progress;
pub mod report;
pub mod scheduler;

pub use context_sweep_core::{boundary, feedback, models, planner, synthesis, wave};

pub use engine::{process, Engine, EngineConfig, EngineRun};
pub use error::EngineError;
