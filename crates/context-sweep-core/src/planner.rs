//! Boundary-respecting chunk planner.
//!
//! Turns a [`Document`] and its detected boundaries into an ordered,
//! gap-free sequence of [`Chunk`]s. Planning is incremental: each call to
//! [`ChunkPlanner::next_chunk`] materializes exactly one chunk at the size
//! the caller asks for, so latency feedback from one wave can shape the
//! chunks of the next.
//!
//! # Algorithm
//!
//! 1. The boundary list splits the document into units.
//! 2. Starting at the cursor, accumulate whole units while the chunk stays
//!    within the target size.
//! 3. Close the chunk at the last boundary that fits. A unit that alone
//!    exceeds the target becomes its own oversized chunk; it is never cut.
//! 4. Without any boundaries, cut at the target size, preferring the last
//!    newline or space in the window, always on a UTF-8 char boundary.
//! 5. With overlap, extend each chunk's start backwards, clamped to the
//!    document start and kept after the previous chunk's own span start.
//!
//! # Guarantees
//!
//! - Chunk ends strictly increase and the last chunk ends at the document
//!   length.
//! - With zero overlap, concatenating chunk texts reproduces the document.

use sha2::{Digest, Sha256};

use crate::boundary::{find_boundaries, snap_to_char_boundary};
use crate::models::{BoundaryKind, Chunk, ContentType, Document};

/// Default initial target size for a content type.
///
/// Dense technical material (headings, code) starts small; sparse
/// material (prose, logs) starts large.
pub fn chunk_size_for(content_type: ContentType) -> usize {
    match content_type {
        ContentType::StructuredRecord => 100_000,
        ContentType::HeadingSectioned => 50_000,
        ContentType::PlainText => 200_000,
        ContentType::TimestampedLog => 150_000,
        ContentType::Code => 50_000,
    }
}

/// Plan the whole document at a fixed size, without overlap.
///
/// Uses `initial_size_hint`, or [`chunk_size_for`] the document's type.
pub fn plan(document: &Document, initial_size_hint: Option<usize>) -> Vec<Chunk> {
    let target = initial_size_hint.unwrap_or_else(|| chunk_size_for(document.content_type()));
    ChunkPlanner::new(document).plan_all(target)
}

/// Incremental planner over one document.
#[derive(Debug, Clone)]
pub struct ChunkPlanner<'a> {
    document: &'a Document,
    boundaries: Vec<usize>,
    /// Start of the next chunk's own span.
    cursor: usize,
    /// Index of the first boundary strictly after `cursor`.
    next_boundary: usize,
    next_id: usize,
    overlap: usize,
    previous_core_start: Option<usize>,
}

impl<'a> ChunkPlanner<'a> {
    /// Create a planner using the boundaries detected for the document's type.
    pub fn new(document: &'a Document) -> Self {
        let boundaries = find_boundaries(document.text(), document.content_type());
        Self::with_boundaries(document, boundaries)
    }

    /// Create a planner with caller-supplied boundaries.
    ///
    /// Offsets outside the document, off char boundaries, or out of order
    /// are dropped.
    pub fn with_boundaries(document: &'a Document, mut boundaries: Vec<usize>) -> Self {
        let text = document.text();
        boundaries.retain(|&o| o > 0 && o < text.len() && text.is_char_boundary(o));
        boundaries.sort_unstable();
        boundaries.dedup();
        Self {
            document,
            boundaries,
            cursor: 0,
            next_boundary: 0,
            next_id: 0,
            overlap: 0,
            previous_core_start: None,
        }
    }

    pub fn with_overlap(mut self, overlap: usize) -> Self {
        self.overlap = overlap;
        self
    }

    pub fn document(&self) -> &'a Document {
        self.document
    }

    /// Offset where the next chunk's own span will start.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Number of chunks materialized so far.
    pub fn planned(&self) -> usize {
        self.next_id
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.document.len()
    }

    /// Materialize the next chunk at `target` bytes, or `None` at the end.
    pub fn next_chunk(&mut self, target: usize) -> Option<Chunk> {
        let len = self.document.len();
        if self.cursor >= len {
            return None;
        }
        let target = target.max(1);
        let core_start = self.cursor;

        let (end, boundary) = if self.boundaries.is_empty() {
            self.forced_end(core_start, target)
        } else {
            self.boundary_end(core_start, target)
        };

        let start = self.overlapped_start(core_start);
        let text = self.document.slice(start, end);
        let chunk = Chunk {
            id: self.next_id,
            start,
            end,
            overlap: core_start - start,
            content_type: self.document.content_type(),
            target_size: target,
            boundary,
            hash: hash_text(text),
        };

        self.next_id += 1;
        self.previous_core_start = Some(core_start);
        self.cursor = end;
        while self.next_boundary < self.boundaries.len()
            && self.boundaries[self.next_boundary] <= end
        {
            self.next_boundary += 1;
        }

        Some(chunk)
    }

    /// Drain the rest of the document at a fixed size.
    pub fn plan_all(mut self, target: usize) -> Vec<Chunk> {
        std::iter::from_fn(|| self.next_chunk(target)).collect()
    }

    /// Chunks a fixed-size plan of the unplanned remainder would need.
    pub fn estimate_remaining(&self, target: usize) -> usize {
        let mut lookahead = self.clone();
        let mut count = 0;
        while lookahead.next_chunk(target).is_some() {
            count += 1;
        }
        count
    }

    /// Accumulate whole units while the chunk stays within `target`.
    fn boundary_end(&self, start: usize, target: usize) -> (usize, BoundaryKind) {
        let len = self.document.len();
        let mut idx = self.next_boundary;
        let mut end = self.boundaries.get(idx).copied().unwrap_or(len);

        while end < len {
            let next_end = self.boundaries.get(idx + 1).copied().unwrap_or(len);
            if next_end - start > target {
                break;
            }
            end = next_end;
            idx += 1;
        }

        let kind = if end == len {
            BoundaryKind::EndOfDocument
        } else {
            BoundaryKind::Explicit
        };
        (end, kind)
    }

    /// Fixed-size cut for boundary-free text.
    fn forced_end(&self, start: usize, target: usize) -> (usize, BoundaryKind) {
        let text = self.document.text();
        let len = text.len();
        if start.saturating_add(target) >= len {
            return (len, BoundaryKind::EndOfDocument);
        }

        let hard = snap_to_char_boundary(text, start + target);
        let window = &text[start..hard];
        let soft = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .map(|pos| start + pos + 1)
            .filter(|&cut| cut > start + target / 2);
        let cut = soft.unwrap_or(hard);

        if cut > start {
            return (cut, BoundaryKind::Forced);
        }
        // Target smaller than one character: take the character.
        let one_char = text[start..]
            .chars()
            .next()
            .map(|c| start + c.len_utf8())
            .unwrap_or(len);
        (one_char, BoundaryKind::Forced)
    }

    fn overlapped_start(&self, core_start: usize) -> usize {
        if self.overlap == 0 {
            return core_start;
        }
        let Some(previous) = self.previous_core_start else {
            return core_start;
        };
        let text = self.document.text();
        let floor = (previous + 1).min(core_start);
        let mut start = core_start.saturating_sub(self.overlap).max(floor);
        while start < core_start && !text.is_char_boundary(start) {
            start += 1;
        }
        start
    }
}

fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
