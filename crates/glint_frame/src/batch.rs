//! Batch classification and merging
//!
//! Two baked operations may share one draw call when they agree on kind,
//! texture identity and paint configuration, and nothing differently
//! classified was deferred between them. Merging never reorders: a batch
//! accumulates strictly adjacent ops and is flushed the moment the next
//! op fails any criterion, the layer context changes, or the scene ends.

use glint_core::{DrawOp, Rect, TextureId};

use crate::baked::{BakedState, ClipSides};

/// Coarse operation class, the first merge criterion
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BatchKind {
    Rect,
    SimpleRects,
    Bitmap,
    Text,
    Shadow,
    Layer,
}

impl BatchKind {
    pub fn of(op: &DrawOp) -> BatchKind {
        match op {
            DrawOp::Rect(_) => BatchKind::Rect,
            DrawOp::SimpleRects(_) => BatchKind::SimpleRects,
            DrawOp::Bitmap(_) => BatchKind::Bitmap,
            DrawOp::TextRun(_) => BatchKind::Text,
            DrawOp::Shadow(_) => BatchKind::Shadow,
            DrawOp::Layer(_) => BatchKind::Layer,
        }
    }
}

/// Full coalescing key. Two ops with equal keys are drawable with one
/// shared fill and transform configuration; only per-vertex data varies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MergeKey {
    pub kind: BatchKind,
    pub texture: TextureId,
    pub paint: u64,
    pub alpha_bits: u32,
}

/// Derive the merge key for an op, or `None` when the op can never be
/// merged (untextured kinds, non-translation transforms, round-rect or
/// projection masks).
pub fn merge_key(op: &DrawOp, state: &BakedState) -> Option<MergeKey> {
    if !state.is_pure_translate()
        || state.round_clip.is_some()
        || state.projection_mask.is_some()
    {
        return None;
    }
    let (kind, texture, paint) = match op {
        DrawOp::Bitmap(b) => (BatchKind::Bitmap, b.texture.id, &b.paint),
        DrawOp::TextRun(t) => (BatchKind::Text, t.atlas.id, &t.paint),
        _ => return None,
    };
    Some(MergeKey {
        kind,
        texture,
        paint: paint.merge_fingerprint(),
        alpha_bits: state.alpha.to_bits(),
    })
}

/// A single deferred operation with its baked state
#[derive(Clone, Debug)]
pub struct OpEntry {
    pub op: DrawOp,
    pub state: BakedState,
}

/// Ordered group of merge-compatible operations emitted as one draw call
#[derive(Clone, Debug)]
pub struct MergedBatch {
    pub kind: BatchKind,
    pub ops: Vec<OpEntry>,
    /// Union of the members' clipped bounds; the combined scissor
    pub clip: Rect,
    /// OR of the members' clip side flags
    pub clip_sides: ClipSides,
    pub bounds: Rect,
}

impl MergedBatch {
    pub fn new(kind: BatchKind, first: OpEntry) -> Self {
        let clip = first.state.clipped_bounds;
        let clip_sides = first.state.clip_sides;
        Self {
            kind,
            clip,
            clip_sides,
            bounds: clip,
            ops: vec![first],
        }
    }

    pub fn push(&mut self, entry: OpEntry) {
        debug_assert_eq!(
            self.kind,
            BatchKind::of(&entry.op),
            "merged batch built from incompatible members"
        );
        self.clip = self.clip.union(&entry.state.clipped_bounds);
        self.clip_sides = self.clip_sides.union(entry.state.clip_sides);
        self.bounds = self.bounds.union(&entry.state.clipped_bounds);
        self.ops.push(entry);
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// One entry of a target's ordered output, appended in final draw order
/// and never reordered afterwards.
#[derive(Clone, Debug)]
pub enum FrameEntry {
    Op(OpEntry),
    Merged(MergedBatch),
}

impl FrameEntry {
    /// Device bounds used by the overdraw filter.
    pub fn bounds(&self) -> Rect {
        match self {
            FrameEntry::Op(entry) => entry.state.clipped_bounds,
            FrameEntry::Merged(batch) => batch.bounds,
        }
    }
}
