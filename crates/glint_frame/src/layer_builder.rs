//! Per-target deferral list
//!
//! Every render target active during a frame (the primary frame, each
//! temporary save-layer, each damaged persistent layer) accumulates its
//! own ordered entry list. Batching and overdraw avoidance are local to
//! a target: changing targets always flushes the open batch, and opaque
//! coverage never leaks across targets.

use glint_core::{DrawOp, Rect};

use crate::baked::BakedState;
use crate::batch::{merge_key, BatchKind, FrameEntry, MergeKey, MergedBatch, OpEntry};
use crate::frame_builder::FrameStats;
use crate::layer::OffscreenLayer;
use crate::occlusion::{opaque_coverage, OpaqueCoverage};

#[derive(Debug)]
pub(crate) enum TargetKind {
    Root {
        width: u32,
        height: u32,
        repaint: Rect,
    },
    /// Save-layer scope; owns its layer until replay recycles it.
    Temporary { layer: Option<OffscreenLayer> },
    /// Damaged persistent layer; the pool owns the authoritative object.
    Persistent { layer: OffscreenLayer, damage: Rect },
}

#[derive(Debug)]
pub(crate) struct LayerBuilder {
    pub kind: TargetKind,
    entries: Vec<FrameEntry>,
    open: Option<(MergeKey, MergedBatch)>,
    coverage: OpaqueCoverage,
    /// Device origin of this target in window space; shadows resolve the
    /// light position against it.
    pub window_offset: (f32, f32),
}

impl LayerBuilder {
    pub fn root(width: u32, height: u32, repaint: Rect) -> Self {
        Self::with_kind(TargetKind::Root {
            width,
            height,
            repaint,
        })
    }

    pub fn temporary(layer: OffscreenLayer, window_offset: (f32, f32)) -> Self {
        let mut builder = Self::with_kind(TargetKind::Temporary { layer: Some(layer) });
        builder.window_offset = window_offset;
        builder
    }

    pub fn persistent(layer: OffscreenLayer, damage: Rect) -> Self {
        let (ox, oy) = layer.window_transform.translation_xy();
        let mut builder = Self::with_kind(TargetKind::Persistent { layer, damage });
        builder.window_offset = (ox, oy);
        builder
    }

    fn with_kind(kind: TargetKind) -> Self {
        Self {
            kind,
            entries: Vec::new(),
            open: None,
            coverage: OpaqueCoverage::new(),
            window_offset: (0.0, 0.0),
        }
    }

    /// Defer one baked operation into this target.
    pub fn defer(
        &mut self,
        op: DrawOp,
        state: BakedState,
        avoid_overdraw: bool,
        stats: &mut FrameStats,
    ) {
        stats.deferred += 1;
        let entry = OpEntry { op, state };

        let key = merge_key(&entry.op, &entry.state);
        let joins_open = matches!(
            (&self.open, &key),
            (Some((open_key, _)), Some(new_key)) if open_key == new_key
        );
        if !joins_open {
            self.flush_open(stats);
        }

        // Later opaque content drops earlier covered entries, never the
        // reverse: coverage accumulation is monotonic within the frame.
        if avoid_overdraw {
            if let Some(covered) = opaque_coverage(&entry.op, &entry.state) {
                let before = self.entries.len();
                self.entries.retain(|e| !covered.contains_rect(&e.bounds()));
                let dropped = before - self.entries.len();
                if dropped > 0 {
                    stats.occluded += dropped;
                    tracing::trace!(dropped, ?covered, "opaque content occluded earlier entries");
                }
                self.coverage.add(covered);
            }
        }

        match key {
            Some(_) if joins_open => {
                let (_, batch) = self.open.as_mut().expect("open batch joined");
                batch.push(entry);
            }
            Some(new_key) => {
                let kind = BatchKind::of(&entry.op);
                self.open = Some((new_key, MergedBatch::new(kind, entry)));
            }
            None => self.entries.push(FrameEntry::Op(entry)),
        }
    }

    /// Finalize the open batch into an entry. Single-member batches are
    /// demoted to plain single-op entries.
    pub fn flush_open(&mut self, stats: &mut FrameStats) {
        if let Some((_, mut batch)) = self.open.take() {
            if batch.len() == 1 {
                let entry = batch.ops.pop().expect("batch has one member");
                self.entries.push(FrameEntry::Op(entry));
            } else {
                stats.merged += batch.len();
                self.entries.push(FrameEntry::Merged(batch));
            }
        }
    }

    pub fn entries(&self) -> &[FrameEntry] {
        &self.entries
    }

    pub fn take_layer(&mut self) -> Option<OffscreenLayer> {
        match &mut self.kind {
            TargetKind::Temporary { layer } => layer.take(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baked::bake;
    use crate::state::AmbientFrame;
    use glint_core::{BitmapOp, Color, Paint, RectOp, TextureId, TextureInfo};

    fn frame() -> AmbientFrame {
        AmbientFrame::root(Rect::from_wh(200.0, 200.0))
    }

    fn rect_op(rect: Rect, color: Color) -> (DrawOp, BakedState) {
        let op = DrawOp::Rect(RectOp {
            rect,
            paint: Paint::from_color(color),
        });
        let state = bake(rect, &frame(), None).unwrap();
        (op, state)
    }

    fn bitmap_op(dst: Rect) -> (DrawOp, BakedState) {
        let op = DrawOp::Bitmap(BitmapOp {
            texture: TextureInfo {
                id: TextureId(1),
                width: 16,
                height: 16,
                opaque: false,
            },
            src: None,
            dst,
            paint: Paint::from_color(Color::WHITE),
        });
        let state = bake(dst, &frame(), None).unwrap();
        (op, state)
    }

    #[test]
    fn adjacent_bitmaps_merge() {
        let mut builder = LayerBuilder::root(200, 200, Rect::from_wh(200.0, 200.0));
        let mut stats = FrameStats::default();
        let (op_a, state_a) = bitmap_op(Rect::from_wh(16.0, 16.0));
        let (op_b, state_b) = bitmap_op(Rect::new(20.0, 0.0, 36.0, 16.0));
        builder.defer(op_a, state_a, true, &mut stats);
        builder.defer(op_b, state_b, true, &mut stats);
        builder.flush_open(&mut stats);
        assert_eq!(builder.entries().len(), 1);
        match &builder.entries()[0] {
            FrameEntry::Merged(batch) => assert_eq!(batch.len(), 2),
            other => panic!("expected merged batch, got {other:?}"),
        }
    }

    #[test]
    fn intervening_rect_splits_batches() {
        let mut builder = LayerBuilder::root(200, 200, Rect::from_wh(200.0, 200.0));
        let mut stats = FrameStats::default();
        let (a, sa) = bitmap_op(Rect::from_wh(16.0, 16.0));
        let (r, sr) = rect_op(Rect::new(100.0, 100.0, 110.0, 110.0), Color::RED.with_alpha(0.5));
        let (b, sb) = bitmap_op(Rect::new(20.0, 0.0, 36.0, 16.0));
        builder.defer(a, sa, true, &mut stats);
        builder.defer(r, sr, true, &mut stats);
        builder.defer(b, sb, true, &mut stats);
        builder.flush_open(&mut stats);
        // two single bitmaps and one rect, no merged batches
        assert_eq!(builder.entries().len(), 3);
        assert!(builder
            .entries()
            .iter()
            .all(|e| matches!(e, FrameEntry::Op(_))));
    }

    #[test]
    fn later_opaque_rect_drops_covered_earlier_entry() {
        let mut builder = LayerBuilder::root(200, 200, Rect::from_wh(200.0, 200.0));
        let mut stats = FrameStats::default();
        let (a, sa) = rect_op(Rect::new(10.0, 10.0, 50.0, 50.0), Color::RED);
        let (b, sb) = rect_op(Rect::from_wh(200.0, 200.0), Color::WHITE);
        builder.defer(a, sa, true, &mut stats);
        builder.defer(b, sb, true, &mut stats);
        assert_eq!(builder.entries().len(), 1);
        assert_eq!(stats.occluded, 1);
        assert_eq!(builder.entries()[0].bounds(), Rect::from_wh(200.0, 200.0));
    }

    #[test]
    fn translucent_content_never_drops() {
        let mut builder = LayerBuilder::root(200, 200, Rect::from_wh(200.0, 200.0));
        let mut stats = FrameStats::default();
        let (a, sa) = rect_op(Rect::new(10.0, 10.0, 50.0, 50.0), Color::RED);
        let (b, sb) = rect_op(Rect::from_wh(200.0, 200.0), Color::WHITE.with_alpha(0.9));
        builder.defer(a, sa, true, &mut stats);
        builder.defer(b, sb, true, &mut stats);
        assert_eq!(builder.entries().len(), 2);
        assert_eq!(stats.occluded, 0);
    }
}
