//! Scene nodes and recorded display lists
//!
//! A `RenderNode` pairs immutable per-node properties (position, transform,
//! alpha, elevation, clipping, projection flags) with the display list the
//! recorder produced for it. Nodes form a tree through `CanvasOp::Node`
//! references; the deferral pipeline walks that tree read-only once per
//! frame.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use smallvec::SmallVec;

use crate::geometry::Rect;
use crate::matrix::Mat4;
use crate::ops::{
    BitmapOp, CanvasOp, DrawOp, PlacedGlyph, RectOp, SimpleRectsOp, TextRunOp, TextureInfo,
};
use crate::paint::Paint;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a node, used to key persistent layers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(pub u64);

impl NodeId {
    fn next() -> Self {
        NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Rounded-rect outline of a node. Casts shadows when elevated and can
/// clip the node's content.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Outline {
    pub bounds: Rect,
    pub radius: f32,
    pub alpha: f32,
    pub should_clip: bool,
}

impl Outline {
    pub fn casts_shadow(&self) -> bool {
        self.alpha > 0.0 && !self.bounds.is_empty()
    }
}

/// Circular reveal animation clip
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RevealClip {
    pub x: f32,
    pub y: f32,
    pub radius: f32,
}

/// Whether a node renders through a persistent offscreen layer
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LayerKind {
    #[default]
    None,
    /// Content is cached in a persistent layer and re-baked only on
    /// damage.
    Render,
}

/// Per-node properties set by the recorder
#[derive(Clone, Debug)]
pub struct NodeProperties {
    /// Node rect in the parent's coordinate space
    pub bounds: Rect,
    /// Additional transform applied after positioning at `bounds` origin
    pub transform: Mat4,
    /// Elevation used by reorder barriers and shadow casting
    pub translation_z: f32,
    pub alpha: f32,
    /// False when the node promises its content never self-overlaps, so
    /// alpha can be applied per-op instead of through a layer.
    pub overlapping_rendering: bool,
    pub clip_to_bounds: bool,
    /// Extra clip intersected with the node bounds when set
    pub clip_bounds: Option<Rect>,
    pub outline: Option<Outline>,
    pub reveal_clip: Option<RevealClip>,
    pub project_backwards: bool,
    pub projection_receiver: bool,
    pub layer: LayerKind,
}

impl NodeProperties {
    pub fn new(bounds: Rect) -> Self {
        Self {
            bounds,
            transform: Mat4::IDENTITY,
            translation_z: 0.0,
            alpha: 1.0,
            overlapping_rendering: true,
            clip_to_bounds: true,
            clip_bounds: None,
            outline: None,
            reveal_clip: None,
            project_backwards: false,
            projection_receiver: false,
            layer: LayerKind::None,
        }
    }

    pub fn width(&self) -> f32 {
        self.bounds.width()
    }

    pub fn height(&self) -> f32 {
        self.bounds.height()
    }
}

/// A recorded scene node
#[derive(Clone, Debug)]
pub struct RenderNode {
    pub id: NodeId,
    pub props: NodeProperties,
    pub display_list: DisplayList,
}

impl RenderNode {
    /// Record a node the way tests and the external recorder build them:
    /// the callback mutates fresh properties and records into a canvas.
    pub fn build(
        bounds: Rect,
        record: impl FnOnce(&mut NodeProperties, &mut Recorder),
    ) -> Arc<RenderNode> {
        let mut props = NodeProperties::new(bounds);
        let mut recorder = Recorder::new();
        record(&mut props, &mut recorder);
        Arc::new(RenderNode {
            id: NodeId::next(),
            props,
            display_list: recorder.finish(),
        })
    }

    /// Whether the node produces any content at all this frame
    pub fn is_drawable(&self) -> bool {
        self.props.alpha > 0.0 && !self.display_list.ops.is_empty()
    }
}

/// Ordered list of recorded operations for one node
#[derive(Clone, Debug, Default)]
pub struct DisplayList {
    pub ops: Vec<CanvasOp>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Scope {
    Save,
    Layer,
}

/// Recording canvas: push/pop state tracking plus draw-op emission.
///
/// `restore` closes whichever scope is innermost, so a save-layer scope
/// records a matching `EndLayer` instead of a bare `Restore`.
#[derive(Debug, Default)]
pub struct Recorder {
    ops: Vec<CanvasOp>,
    scopes: SmallVec<[Scope; 8]>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save(&mut self) -> usize {
        self.scopes.push(Scope::Save);
        self.ops.push(CanvasOp::Save);
        self.scopes.len()
    }

    pub fn restore(&mut self) {
        match self.scopes.pop() {
            Some(Scope::Save) => self.ops.push(CanvasOp::Restore),
            Some(Scope::Layer) => self.ops.push(CanvasOp::EndLayer),
            None => panic!("restore without a matching save"),
        }
    }

    pub fn restore_to_count(&mut self, count: usize) {
        while self.scopes.len() >= count.max(1) {
            self.restore();
        }
    }

    pub fn translate(&mut self, dx: f32, dy: f32) {
        self.ops.push(CanvasOp::Translate(dx, dy));
    }

    pub fn concat(&mut self, matrix: Mat4) {
        self.ops.push(CanvasOp::Concat(matrix));
    }

    pub fn scale(&mut self, sx: f32, sy: f32) {
        self.concat(Mat4::scale(sx, sy, 1.0));
    }

    pub fn clip_rect(&mut self, rect: Rect) {
        self.ops.push(CanvasOp::ClipRect(rect));
    }

    /// Toggle the elevation reorder barrier.
    pub fn barrier(&mut self, enabled: bool) {
        self.ops.push(CanvasOp::Barrier(enabled));
    }

    /// Open a save-layer scope; closed by `restore`.
    pub fn save_layer(&mut self, bounds: Rect, paint: Paint) -> usize {
        self.scopes.push(Scope::Layer);
        self.ops.push(CanvasOp::BeginLayer { bounds, paint });
        self.scopes.len()
    }

    /// Convenience for the common alpha-only save-layer.
    pub fn save_layer_alpha(&mut self, bounds: Rect, alpha: f32) -> usize {
        let paint = Paint {
            color: crate::color::Color::WHITE.with_alpha(alpha),
            ..Default::default()
        };
        self.save_layer(bounds, paint)
    }

    pub fn draw_rect(&mut self, rect: Rect, paint: Paint) {
        self.ops.push(CanvasOp::Draw(DrawOp::Rect(RectOp { rect, paint })));
    }

    pub fn draw_rects(&mut self, rects: impl Into<Arc<[Rect]>>, paint: Paint) {
        self.ops.push(CanvasOp::Draw(DrawOp::SimpleRects(SimpleRectsOp {
            rects: rects.into(),
            paint,
        })));
    }

    pub fn draw_bitmap(&mut self, texture: TextureInfo, dst: Rect, paint: Paint) {
        self.ops.push(CanvasOp::Draw(DrawOp::Bitmap(BitmapOp {
            texture,
            src: None,
            dst,
            paint,
        })));
    }

    pub fn draw_bitmap_rect(
        &mut self,
        texture: TextureInfo,
        src: Rect,
        dst: Rect,
        paint: Paint,
    ) {
        self.ops.push(CanvasOp::Draw(DrawOp::Bitmap(BitmapOp {
            texture,
            src: Some(src),
            dst,
            paint,
        })));
    }

    pub fn draw_text_run(
        &mut self,
        atlas: TextureInfo,
        glyphs: impl Into<Arc<[PlacedGlyph]>>,
        bounds: Rect,
        paint: Paint,
    ) {
        self.ops.push(CanvasOp::Draw(DrawOp::TextRun(TextRunOp {
            atlas,
            glyphs: glyphs.into(),
            bounds,
            paint,
        })));
    }

    pub fn draw_node(&mut self, node: Arc<RenderNode>) {
        self.ops.push(CanvasOp::Node(node));
    }

    pub fn finish(mut self) -> DisplayList {
        // Close dangling scopes so the walker never sees an unbalanced
        // list; recorders that forget a restore still produce a valid
        // scene.
        if !self.scopes.is_empty() {
            tracing::warn!(
                open_scopes = self.scopes.len(),
                "display list finished with unbalanced save scopes"
            );
            while !self.scopes.is_empty() {
                self.restore();
            }
        }
        DisplayList { ops: self.ops }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Color;

    #[test]
    fn recorder_balances_scopes() {
        let mut rec = Recorder::new();
        rec.save();
        rec.save_layer_alpha(Rect::from_wh(10.0, 10.0), 0.5);
        rec.draw_rect(Rect::from_wh(5.0, 5.0), Paint::from_color(Color::RED));
        let list = rec.finish();
        // save, begin_layer, draw, end_layer, restore
        assert_eq!(list.ops.len(), 5);
        assert!(matches!(list.ops[3], CanvasOp::EndLayer));
        assert!(matches!(list.ops[4], CanvasOp::Restore));
    }

    #[test]
    fn node_ids_are_unique() {
        let a = RenderNode::build(Rect::from_wh(1.0, 1.0), |_, _| {});
        let b = RenderNode::build(Rect::from_wh(1.0, 1.0), |_, _| {});
        assert_ne!(a.id, b.id);
    }

    #[test]
    #[should_panic(expected = "restore without a matching save")]
    fn unbalanced_restore_panics() {
        let mut rec = Recorder::new();
        rec.restore();
    }
}
