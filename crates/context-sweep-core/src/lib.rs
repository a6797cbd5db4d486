//! # Context Sweep Core
//!
//! Runtime-free logic for Context Sweep: the document and chunk model,
//! content-aware boundary detection, incremental chunk planning, the
//! latency feedback controller, and result synthesis.
//!
//! This crate contains no tokio, network, or filesystem dependencies. The
//! async wave scheduler and analyzer providers live in the `context-sweep`
//! crate and drive the types defined here.

pub mod boundary;
pub mod feedback;
pub mod models;
pub mod planner;
pub mod synthesis;
pub mod wave;
