//! Recorded drawing operations
//!
//! Operations are closed tagged variants; the walker and the draw-call
//! dispatcher match on them exhaustively, so an unsupported kind is a
//! compile error rather than a runtime discovery. The recorder owns the
//! operation payloads; the deferral pipeline only reads them. Bulky
//! payloads (glyph runs, rect lists) sit behind `Arc` so that deferred
//! entries clone in O(1).

use std::sync::Arc;

use crate::geometry::{Rect, Vec3};
use crate::matrix::Mat4;
use crate::paint::Paint;

/// Opaque identity of a texture or atlas owned by the external caches
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u64);

/// Opaque identity of an offscreen composition layer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LayerId(pub u64);

/// Opaque handle to a GPU surface created by the external allocator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SurfaceHandle(pub u64);

/// Texture identity plus the metadata the pipeline needs without ever
/// touching pixel data (decoding is an external collaborator).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TextureInfo {
    pub id: TextureId,
    pub width: u32,
    pub height: u32,
    /// True when every texel has full alpha; feeds the overdraw filter
    /// and the no-blend fast path.
    pub opaque: bool,
}

/// One positioned glyph in a text run. `uv` is the atlas sub-rect in
/// normalized coordinates; `x`/`y` are the glyph quad origin in the run's
/// local space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlacedGlyph {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub uv: [f32; 4],
}

/// Light parameters resolved against the current layer target, carried by
/// synthesized shadow operations.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResolvedLight {
    pub center: Vec3,
    pub radius: f32,
}

/// Solid rectangle fill
#[derive(Clone, Debug)]
pub struct RectOp {
    pub rect: Rect,
    pub paint: Paint,
}

/// Multiple untextured rectangles sharing one paint, drawn as a single
/// vertex buffer.
#[derive(Clone, Debug)]
pub struct SimpleRectsOp {
    pub rects: Arc<[Rect]>,
    pub paint: Paint,
}

impl SimpleRectsOp {
    pub fn bounds(&self) -> Rect {
        self.rects
            .iter()
            .fold(Rect::EMPTY, |acc, r| acc.union(r))
    }
}

/// Textured quad sourced from a decoded bitmap
#[derive(Clone, Debug)]
pub struct BitmapOp {
    pub texture: TextureInfo,
    /// Source sub-rect in texels; `None` samples the whole texture.
    pub src: Option<Rect>,
    pub dst: Rect,
    pub paint: Paint,
}

/// A shaped glyph run against one atlas texture
#[derive(Clone, Debug)]
pub struct TextRunOp {
    pub atlas: TextureInfo,
    pub glyphs: Arc<[PlacedGlyph]>,
    /// Conservative local bounds of the run, computed at record time.
    pub bounds: Rect,
    pub paint: Paint,
}

/// Synthesized by the walker ahead of an elevated caster; never recorded.
#[derive(Clone, Debug)]
pub struct ShadowOp {
    /// Caster outline in the caster's local space
    pub outline: Rect,
    pub corner_radius: f32,
    pub caster_alpha: f32,
    /// Caster's total XY transform at its draw position
    pub transform_xy: Mat4,
    pub elevation: f32,
    pub light: ResolvedLight,
}

/// Synthesized reference that composites a finished layer into its
/// parent target; never recorded.
#[derive(Clone, Debug)]
pub struct LayerDrawOp {
    pub layer: LayerId,
    pub surface: SurfaceHandle,
    /// Destination rect in the parent's space
    pub dst: Rect,
    /// Normalized texture sub-rect holding the layer content
    pub uv: [f32; 4],
    pub paint: Paint,
}

/// Drawable operation kinds
#[derive(Clone, Debug)]
pub enum DrawOp {
    Rect(RectOp),
    SimpleRects(SimpleRectsOp),
    Bitmap(BitmapOp),
    TextRun(TextRunOp),
    Shadow(ShadowOp),
    Layer(LayerDrawOp),
}

impl DrawOp {
    /// Local-space bounds before any ambient transform.
    pub fn local_bounds(&self) -> Rect {
        match self {
            DrawOp::Rect(op) => op.rect,
            DrawOp::SimpleRects(op) => op.bounds(),
            DrawOp::Bitmap(op) => op.dst,
            DrawOp::TextRun(op) => op.bounds,
            DrawOp::Shadow(op) => {
                // Shadow geometry spills past the caster outline by an
                // amount proportional to elevation and light radius.
                let spread = op.elevation + op.light.radius * 0.25;
                op.transform_xy.map_rect(op.outline.outset(spread))
            }
            DrawOp::Layer(op) => op.dst,
        }
    }

    /// True for variants the walker synthesizes itself. Finding one in a
    /// recorded display list is a recorder contract violation.
    pub fn is_synthesized_kind(&self) -> bool {
        matches!(self, DrawOp::Shadow(_) | DrawOp::Layer(_))
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            DrawOp::Rect(_) => "rect",
            DrawOp::SimpleRects(_) => "simple_rects",
            DrawOp::Bitmap(_) => "bitmap",
            DrawOp::TextRun(_) => "text_run",
            DrawOp::Shadow(_) => "shadow",
            DrawOp::Layer(_) => "layer",
        }
    }
}

/// One entry in a recorded display list: either a drawable operation, an
/// ambient-state pseudo-operation, or a reference to a child node.
#[derive(Clone, Debug)]
pub enum CanvasOp {
    Save,
    Restore,
    ClipRect(Rect),
    Concat(Mat4),
    Translate(f32, f32),
    /// Reorder barrier: `true` enters elevation-sorted mode, `false`
    /// returns to strict recording order.
    Barrier(bool),
    /// Opens a save-layer scope over the given bounds; closed by
    /// `EndLayer`.
    BeginLayer { bounds: Rect, paint: Paint },
    EndLayer,
    Node(Arc<crate::node::RenderNode>),
    Draw(DrawOp),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Color;

    #[test]
    fn simple_rects_bounds_union() {
        let op = SimpleRectsOp {
            rects: Arc::from(vec![
                Rect::from_wh(10.0, 10.0),
                Rect::new(50.0, 50.0, 60.0, 60.0),
            ]),
            paint: Paint::from_color(Color::BLACK),
        };
        assert_eq!(op.bounds(), Rect::from_wh(60.0, 60.0));
    }

    #[test]
    fn synthesized_kinds() {
        let rect = DrawOp::Rect(RectOp {
            rect: Rect::from_wh(1.0, 1.0),
            paint: Paint::default(),
        });
        assert!(!rect.is_synthesized_kind());
    }
}
