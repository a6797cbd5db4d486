//! Latency-driven chunk sizing.
//!
//! The [`FeedbackController`] keeps one running target size per
//! [`ContentType`] and nudges it after every completed chunk:
//!
//! | Observed latency | Effect on the next target |
//! |------------------|---------------------------|
//! | `< 5s` | × 1.2, capped at `max` |
//! | `5s ..= 15s` | unchanged (target band) |
//! | `> 15s` | × 0.7, floored at `min` |
//!
//! Adjustments are scoped to a wave: [`FeedbackController::begin_wave`]
//! fixes a base size, and each observation in that wave recomputes the
//! target from the base using the strongest signal seen so far (shrink
//! beats hold beats grow). The outcome is therefore independent of the
//! order in which a wave's chunks complete, and a wave of uniformly fast
//! chunks moves the target by exactly one step.
//!
//! The controller knows nothing about chunk content, only timing. It does
//! keep a per-type history ([`SizingStats`]) that is reported with the
//! final synthesis.

use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::models::{ChunkResult, ContentType};
use crate::planner::chunk_size_for;

/// Latency below which chunks are considered cheap.
pub const FAST_LATENCY: Duration = Duration::from_secs(5);
/// Latency above which chunks are considered too expensive.
pub const SLOW_LATENCY: Duration = Duration::from_secs(15);
pub const GROW_FACTOR: f64 = 1.2;
pub const SHRINK_FACTOR: f64 = 0.7;

pub const DEFAULT_MIN_CHUNK_SIZE: usize = 50_000;
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 200_000;

/// Inclusive bounds for any target chunk size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeBounds {
    pub min: usize,
    pub max: usize,
}

impl Default for SizeBounds {
    fn default() -> Self {
        Self {
            min: DEFAULT_MIN_CHUNK_SIZE,
            max: DEFAULT_MAX_CHUNK_SIZE,
        }
    }
}

impl SizeBounds {
    pub fn clamp(&self, size: usize) -> usize {
        size.clamp(self.min, self.max.max(self.min))
    }
}

/// What a single latency observation asks for. Ordered by strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Signal {
    Grow,
    Hold,
    Shrink,
}

impl Signal {
    pub fn from_latency(latency: Duration) -> Self {
        if latency < FAST_LATENCY {
            Signal::Grow
        } else if latency > SLOW_LATENCY {
            Signal::Shrink
        } else {
            Signal::Hold
        }
    }

    fn factor(&self) -> f64 {
        match self {
            Signal::Grow => GROW_FACTOR,
            Signal::Hold => 1.0,
            Signal::Shrink => SHRINK_FACTOR,
        }
    }
}

/// Sizing history for one content type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SizingStats {
    pub content_type: ContentType,
    /// Target the next chunk of this type would be planned at.
    pub current_size: usize,
    pub min_size: usize,
    pub max_size: usize,
    /// Chunk latencies observed.
    pub observations: usize,
    /// Observations that moved the target.
    pub size_changes: usize,
    pub mean_latency_ms: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct History {
    observations: usize,
    size_changes: usize,
    total_latency: Duration,
}

#[derive(Debug, Clone, Copy)]
struct Epoch {
    base: usize,
    signal: Signal,
}

/// Running target size per content type, clamped to [`SizeBounds`].
#[derive(Debug, Clone)]
pub struct FeedbackController {
    bounds: SizeBounds,
    targets: BTreeMap<ContentType, usize>,
    epochs: BTreeMap<ContentType, Epoch>,
    history: BTreeMap<ContentType, History>,
}

impl FeedbackController {
    pub fn new(bounds: SizeBounds) -> Self {
        Self {
            bounds,
            targets: BTreeMap::new(),
            epochs: BTreeMap::new(),
            history: BTreeMap::new(),
        }
    }

    /// Override the starting size for one content type.
    pub fn with_initial_size(mut self, content_type: ContentType, size: usize) -> Self {
        self.targets.insert(content_type, self.bounds.clamp(size));
        self
    }

    /// Target size for the next chunk of `content_type`.
    pub fn next_size(&self, content_type: ContentType) -> usize {
        self.targets
            .get(&content_type)
            .copied()
            .unwrap_or_else(|| self.bounds.clamp(chunk_size_for(content_type)))
    }

    /// Open a new adjustment window. Called before a wave is planned.
    pub fn begin_wave(&mut self) {
        self.epochs.clear();
    }

    /// Fold one completed chunk's latency into the target for its type.
    pub fn observe(&mut self, result: &ChunkResult) {
        let content_type = result.content_type;
        let history = self.history.entry(content_type).or_default();
        history.observations += 1;
        history.total_latency += result.latency;

        let signal = Signal::from_latency(result.latency);
        // A fast failure says nothing about what larger chunks cost.
        if !result.is_success() && signal == Signal::Grow {
            return;
        }

        let current = self.next_size(content_type);
        let epoch = self.epochs.entry(content_type).or_insert(Epoch {
            base: current,
            signal: Signal::Grow,
        });
        epoch.signal = epoch.signal.max(signal);

        let proposed = (epoch.base as f64 * epoch.signal.factor()).round() as usize;
        let next = self.bounds.clamp(proposed);
        if next != current {
            self.history.entry(content_type).or_default().size_changes += 1;
        }
        self.targets.insert(content_type, next);
    }

    /// Sizing history for `content_type`, including its current target.
    pub fn stats_for(&self, content_type: ContentType) -> SizingStats {
        let history = self.history.get(&content_type).copied().unwrap_or_default();
        let mean_latency_ms = if history.observations == 0 {
            0
        } else {
            (history.total_latency.as_millis() / history.observations as u128) as u64
        };
        SizingStats {
            content_type,
            current_size: self.next_size(content_type),
            min_size: self.bounds.min,
            max_size: self.bounds.max,
            observations: history.observations,
            size_changes: history.size_changes,
            mean_latency_ms,
        }
    }
}

impl Default for FeedbackController {
    fn default() -> Self {
        Self::new(SizeBounds::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnalysisOutput, BoundaryKind, Chunk, FailureKind};

    fn chunk(id: usize, content_type: ContentType) -> Chunk {
        Chunk {
            id,
            start: 0,
            end: 10,
            overlap: 0,
            content_type,
            target_size: 10,
            boundary: BoundaryKind::Explicit,
            hash: String::new(),
        }
    }

    fn ok(content_type: ContentType, secs: f64) -> ChunkResult {
        ChunkResult::succeeded(
            &chunk(0, content_type),
            AnalysisOutput::default(),
            Duration::from_secs_f64(secs),
            1,
        )
    }

    #[test]
    fn test_initial_sizes_follow_content_type() {
        let fc = FeedbackController::default();
        assert_eq!(fc.next_size(ContentType::HeadingSectioned), 50_000);
        assert_eq!(fc.next_size(ContentType::StructuredRecord), 100_000);
        assert_eq!(fc.next_size(ContentType::PlainText), 200_000);
        assert_eq!(fc.next_size(ContentType::TimestampedLog), 150_000);
        assert_eq!(fc.next_size(ContentType::Code), 50_000);
    }

    #[test]
    fn test_fast_wave_grows_by_one_step() {
        let mut fc = FeedbackController::default();
        let ct = ContentType::HeadingSectioned;
        fc.begin_wave();
        for _ in 0..3 {
            fc.observe(&ok(ct, 1.0));
        }
        assert_eq!(fc.next_size(ct), 60_000);
        fc.begin_wave();
        fc.observe(&ok(ct, 2.0));
        assert_eq!(fc.next_size(ct), 72_000);
    }

    #[test]
    fn test_slow_chunk_dominates_wave() {
        let mut fc = FeedbackController::default().with_initial_size(ContentType::Code, 100_000);
        fc.begin_wave();
        fc.observe(&ok(ContentType::Code, 1.0));
        fc.observe(&ok(ContentType::Code, 20.0));
        fc.observe(&ok(ContentType::Code, 1.0));
        assert_eq!(fc.next_size(ContentType::Code), 70_000);
    }

    #[test]
    fn test_in_band_latency_holds() {
        let mut fc = FeedbackController::default().with_initial_size(ContentType::Code, 80_000);
        fc.begin_wave();
        fc.observe(&ok(ContentType::Code, 10.0));
        fc.observe(&ok(ContentType::Code, 1.0));
        assert_eq!(fc.next_size(ContentType::Code), 80_000);
        fc.observe(&ok(ContentType::Code, 5.0));
        fc.observe(&ok(ContentType::Code, 15.0));
        assert_eq!(fc.next_size(ContentType::Code), 80_000);
    }

    #[test]
    fn test_order_within_wave_does_not_matter() {
        let latencies = [1.0, 20.0, 8.0, 2.0];
        let mut forward = FeedbackController::default();
        let mut backward = FeedbackController::default();
        forward.begin_wave();
        backward.begin_wave();
        for l in latencies {
            forward.observe(&ok(ContentType::PlainText, l));
        }
        for l in latencies.iter().rev() {
            backward.observe(&ok(ContentType::PlainText, *l));
        }
        assert_eq!(
            forward.next_size(ContentType::PlainText),
            backward.next_size(ContentType::PlainText)
        );
    }

    #[test]
    fn test_fast_failure_does_not_grow() {
        let mut fc = FeedbackController::default();
        fc.begin_wave();
        let failed = ChunkResult::failed(
            &chunk(0, ContentType::Code),
            FailureKind::Error("bad json".into()),
            Duration::from_millis(100),
            2,
        );
        fc.observe(&failed);
        assert_eq!(fc.next_size(ContentType::Code), 50_000);
    }

    #[test]
    fn test_content_types_are_tracked_separately() {
        let mut fc = FeedbackController::default();
        fc.begin_wave();
        fc.observe(&ok(ContentType::Code, 1.0));
        assert_eq!(fc.next_size(ContentType::Code), 60_000);
        assert_eq!(fc.next_size(ContentType::HeadingSectioned), 50_000);
    }

    #[test]
    fn test_target_never_leaves_bounds() {
        let bounds = SizeBounds {
            min: 50_000,
            max: 200_000,
        };
        let mut fc = FeedbackController::new(bounds);
        // Deterministic pseudo-random latency stream.
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        for wave in 0..500 {
            fc.begin_wave();
            for _ in 0..(wave % 5 + 1) {
                seed ^= seed << 13;
                seed ^= seed >> 7;
                seed ^= seed << 17;
                let latency = (seed % 30_000) as f64 / 1000.0;
                fc.observe(&ok(ContentType::TimestampedLog, latency));
                let size = fc.next_size(ContentType::TimestampedLog);
                assert!(size >= bounds.min && size <= bounds.max, "size {} out of bounds", size);
            }
        }
    }

    #[test]
    fn test_repeated_growth_caps_at_max() {
        let mut fc = FeedbackController::default();
        for _ in 0..20 {
            fc.begin_wave();
            fc.observe(&ok(ContentType::Code, 0.5));
        }
        assert_eq!(fc.next_size(ContentType::Code), DEFAULT_MAX_CHUNK_SIZE);
        for _ in 0..20 {
            fc.begin_wave();
            fc.observe(&ok(ContentType::Code, 30.0));
        }
        assert_eq!(fc.next_size(ContentType::Code), DEFAULT_MIN_CHUNK_SIZE);
    }

    #[test]
    fn test_stats_track_observations_and_changes() {
        let mut fc = FeedbackController::default();
        let ct = ContentType::HeadingSectioned;
        let fresh = fc.stats_for(ct);
        assert_eq!(fresh.current_size, 50_000);
        assert_eq!(fresh.observations, 0);
        assert_eq!(fresh.mean_latency_ms, 0);

        fc.begin_wave();
        fc.observe(&ok(ct, 1.0));
        fc.observe(&ok(ct, 3.0));
        fc.begin_wave();
        fc.observe(&ok(ct, 10.0));

        let stats = fc.stats_for(ct);
        assert_eq!(stats.observations, 3);
        // The first fast chunk grows the target, the second repeats it and
        // the in-band chunk holds.
        assert_eq!(stats.size_changes, 1);
        assert_eq!(stats.current_size, 60_000);
        assert_eq!(stats.mean_latency_ms, 4_666);
        assert_eq!((stats.min_size, stats.max_size), (50_000, 200_000));
    }

    #[test]
    fn test_fast_failure_counts_as_observation_only() {
        let mut fc = FeedbackController::default();
        fc.begin_wave();
        fc.observe(&ChunkResult::failed(
            &chunk(0, ContentType::Code),
            FailureKind::Timeout,
            Duration::from_millis(200),
            2,
        ));
        let stats = fc.stats_for(ContentType::Code);
        assert_eq!(stats.observations, 1);
        assert_eq!(stats.size_changes, 0);
        assert_eq!(stats.mean_latency_ms, 200);
    }
}
