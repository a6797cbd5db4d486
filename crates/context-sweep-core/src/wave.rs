//! Wave bookkeeping and chunk sources for the wave scheduler.
//!
//! A [`WaveSource`] hands the scheduler the next wave's chunks on demand
//! and hears about every completed [`ChunkResult`] before the following
//! wave is requested. Two sources are provided:
//!
//! - [`PlannedChunks`] replays a pre-materialized chunk sequence.
//! - [`AdaptivePlan`] plans chunks lazily with a [`ChunkPlanner`] sized by
//!   a [`FeedbackController`], so wave *k* latencies shape wave *k+1*. With
//!   a chunk cap, targets grow as needed for the capped plan to still reach
//!   the end of the document.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;

use crate::feedback::FeedbackController;
use crate::models::{Chunk, ChunkResult, ContentType};
use crate::planner::ChunkPlanner;

/// A batch of chunks dispatched together.
#[derive(Debug, Clone, Serialize)]
pub struct Wave {
    pub index: usize,
    pub chunk_ids: Vec<usize>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Wall time from dispatch until the last chunk settled.
    pub duration_ms: u64,
}

impl Wave {
    pub fn new(index: usize, chunks: &[Chunk]) -> Self {
        Self {
            index,
            chunk_ids: chunks.iter().map(|c| c.id).collect(),
            completed_at: None,
            duration_ms: 0,
        }
    }
}

/// Supplies chunks to the scheduler one wave at a time.
pub trait WaveSource {
    /// Materialize up to `max_chunks` chunks for the next wave.
    ///
    /// An empty vector means there is nothing left to dispatch.
    fn next_wave(&mut self, max_chunks: usize) -> Vec<Chunk>;

    /// Called once per completed chunk, in chunk-id order, after its wave
    /// drains and before the next wave is requested.
    fn observe(&mut self, _result: &ChunkResult) {}

    /// True once nothing further will be dispatched.
    fn is_exhausted(&self) -> bool;

    /// Chunks materialized so far.
    fn materialized(&self) -> usize;

    /// Materialized chunks plus an estimate for whatever remains.
    fn estimated_total(&self) -> usize;

    /// Byte range not yet handed out, if any.
    fn remaining_range(&self) -> Option<(usize, usize)>;
}

/// A fixed, pre-planned chunk sequence.
#[derive(Debug, Clone)]
pub struct PlannedChunks {
    queue: VecDeque<Chunk>,
    total: usize,
}

impl From<Vec<Chunk>> for PlannedChunks {
    fn from(chunks: Vec<Chunk>) -> Self {
        let total = chunks.len();
        Self {
            queue: chunks.into(),
            total,
        }
    }
}

impl WaveSource for PlannedChunks {
    fn next_wave(&mut self, max_chunks: usize) -> Vec<Chunk> {
        let take = max_chunks.min(self.queue.len());
        self.queue.drain(..take).collect()
    }

    fn is_exhausted(&self) -> bool {
        self.queue.is_empty()
    }

    fn materialized(&self) -> usize {
        self.total
    }

    fn estimated_total(&self) -> usize {
        self.total
    }

    fn remaining_range(&self) -> Option<(usize, usize)> {
        let first = self.queue.front()?;
        let last = self.queue.back()?;
        Some((first.core_start(), last.end))
    }
}

/// Lazily planned chunks sized by latency feedback.
#[derive(Debug, Clone)]
pub struct AdaptivePlan<'a> {
    planner: ChunkPlanner<'a>,
    feedback: FeedbackController,
    max_chunks: Option<usize>,
}

impl<'a> AdaptivePlan<'a> {
    pub fn new(planner: ChunkPlanner<'a>, feedback: FeedbackController) -> Self {
        Self {
            planner,
            feedback,
            max_chunks: None,
        }
    }

    /// Cover the document in at most `max_chunks` chunks.
    pub fn with_max_chunks(mut self, max_chunks: Option<usize>) -> Self {
        self.max_chunks = max_chunks;
        self
    }

    pub fn feedback(&self) -> &FeedbackController {
        &self.feedback
    }

    fn content_type(&self) -> ContentType {
        self.planner.document().content_type()
    }

    /// Chunks still allowed under the cap.
    fn slots_left(&self) -> Option<usize> {
        self.max_chunks
            .map(|cap| cap.saturating_sub(self.planner.planned()))
    }

    fn cap_reached(&self) -> bool {
        self.slots_left() == Some(0)
    }

    /// Feedback target, raised when the remaining slots could not otherwise
    /// reach the end of the document. The last slot always takes the rest.
    fn next_target(&self) -> usize {
        let target = self.feedback.next_size(self.content_type());
        let Some(slots) = self.slots_left().filter(|&slots| slots > 0) else {
            return target;
        };
        if self.planner.estimate_remaining(target) <= slots {
            return target;
        }
        let remaining = self.planner.document().len() - self.planner.cursor();
        target.max(remaining.div_ceil(slots))
    }
}

impl WaveSource for AdaptivePlan<'_> {
    fn next_wave(&mut self, max_chunks: usize) -> Vec<Chunk> {
        self.feedback.begin_wave();
        let mut chunks = Vec::with_capacity(max_chunks);
        while chunks.len() < max_chunks && !self.cap_reached() {
            let target = self.next_target();
            match self.planner.next_chunk(target) {
                Some(chunk) => chunks.push(chunk),
                None => break,
            }
        }
        chunks
    }

    fn observe(&mut self, result: &ChunkResult) {
        self.feedback.observe(result);
    }

    fn is_exhausted(&self) -> bool {
        self.planner.is_exhausted() || self.cap_reached()
    }

    fn materialized(&self) -> usize {
        self.planner.planned()
    }

    fn estimated_total(&self) -> usize {
        let target = self.feedback.next_size(self.content_type());
        let remaining = self.planner.estimate_remaining(target);
        let remaining = match self.slots_left() {
            Some(slots) => remaining.min(slots),
            None => remaining,
        };
        self.planner.planned() + remaining
    }

    fn remaining_range(&self) -> Option<(usize, usize)> {
        if self.planner.is_exhausted() {
            None
        } else {
            Some((self.planner.cursor(), self.planner.document().len()))
        }
    }
}
