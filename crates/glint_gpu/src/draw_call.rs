//! Draw call assembly
//!
//! A `DrawCall` is the flat, fully-resolved unit handed to the GPU
//! executor: mesh, transform pair, fill, and blend, plus the optional
//! scissor and round-rect mask. It is produced fresh per entry and
//! immediately consumed, never retained.
//!
//! `DrawCallBuilder` enforces the staged contract `mesh -> transform ->
//! fill -> (round_rect_clip) -> build()` with a bitmask of completed
//! stages: setting a stage twice, or building with a required stage
//! missing, is a programmer error and panics rather than producing a
//! half-configured call.

use glint_core::{BlendMode, Color, ColorFilter, Mat4, Rect, SurfaceHandle, TextureId};
use glint_frame::RoundRectClip;

use crate::blend::{resolve_blend, Blend};
use crate::vertex::{QuadVertex, ShadowVertex, TexturedVertex};

/// Primitive topology of a mesh
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Primitive {
    Triangles,
    TriangleStrip,
}

/// Vertex source for one draw call
#[derive(Clone, Debug)]
pub enum Mesh {
    /// The shared static unit quad, positioned by the model transform
    UnitQuad,
    /// One textured quad per merged member, drawn with the shared quad
    /// index buffer
    IndexedQuads {
        vertices: Vec<TexturedVertex>,
        quad_count: u32,
    },
    /// Caller-supplied solid geometry (simple-rects)
    Rects {
        vertices: Vec<QuadVertex>,
        indices: Vec<u16>,
    },
    /// Caller-supplied shadow geometry with per-vertex coverage
    Shadow {
        vertices: Vec<ShadowVertex>,
        indices: Vec<u16>,
    },
}

impl Mesh {
    pub fn vertex_count(&self) -> u32 {
        match self {
            Mesh::UnitQuad => 4,
            Mesh::IndexedQuads { vertices, .. } => vertices.len() as u32,
            Mesh::Rects { vertices, .. } => vertices.len() as u32,
            Mesh::Shadow { vertices, .. } => vertices.len() as u32,
        }
    }

    pub fn stride(&self) -> u32 {
        match self {
            Mesh::UnitQuad | Mesh::Rects { .. } => std::mem::size_of::<QuadVertex>() as u32,
            Mesh::IndexedQuads { .. } => std::mem::size_of::<TexturedVertex>() as u32,
            Mesh::Shadow { .. } => std::mem::size_of::<ShadowVertex>() as u32,
        }
    }

    pub fn primitive(&self) -> Primitive {
        match self {
            Mesh::UnitQuad => Primitive::TriangleStrip,
            _ => Primitive::Triangles,
        }
    }
}

/// Where a texture binding resolves from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureSource {
    /// External texture/atlas cache
    Cache(TextureId),
    /// An offscreen layer surface
    Surface(SurfaceHandle),
}

/// Resolved texture binding with sampling policy
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TextureBinding {
    pub source: TextureSource,
    pub filter: wgpu::FilterMode,
    pub address: wgpu::AddressMode,
}

/// Texture input to the fill stage
#[derive(Clone, Copy, Debug)]
pub struct TextureFill {
    pub binding: TextureBinding,
    /// True when the texture has no alpha channel
    pub opaque: bool,
}

/// Color filter forwarded to the executor's shader
#[derive(Clone, Debug, PartialEq)]
pub enum ColorFilterSpec {
    Blend { color: [f32; 4], mode: BlendMode },
    Matrix { matrix: [f32; 16], offset: [f32; 4] },
}

impl ColorFilterSpec {
    fn from_filter(filter: &ColorFilter) -> Self {
        match filter {
            ColorFilter::Blend { color, mode } => ColorFilterSpec::Blend {
                color: color.premultiplied(),
                mode: *mode,
            },
            ColorFilter::Matrix { matrix, offset } => ColorFilterSpec::Matrix {
                matrix: *matrix,
                offset: *offset,
            },
        }
    }
}

/// Resolved fill configuration
#[derive(Clone, Debug)]
pub struct Fill {
    /// Premultiplied color, coverage alpha already folded in
    pub color: [f32; 4],
    pub texture: Option<TextureBinding>,
    pub color_filter: Option<ColorFilterSpec>,
}

/// The transform pair applied by the vertex stage
#[derive(Clone, Copy, Debug)]
pub struct TransformPair {
    /// Frame-global orthographic projection for the current target
    pub ortho: Mat4,
    /// Combined ambient and local model-view matrix
    pub model_view: Mat4,
    /// True when the translation was snapped to integer pixels
    pub snapped: bool,
}

/// Round-rect mask forwarded for the executor to apply
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RoundClipSpec {
    pub inner_rect: Rect,
    pub radius: f32,
    pub high_priority: bool,
}

impl From<&RoundRectClip> for RoundClipSpec {
    fn from(clip: &RoundRectClip) -> Self {
        Self {
            inner_rect: clip.inner_rect,
            radius: clip.radius,
            high_priority: clip.high_priority,
        }
    }
}

/// One fully-resolved GPU draw
#[derive(Clone, Debug)]
pub struct DrawCall {
    pub mesh: Mesh,
    pub transform: TransformPair,
    pub fill: Fill,
    pub blend: Blend,
    pub scissor: Option<Rect>,
    pub round_clip: Option<RoundClipSpec>,
}

const STAGE_MESH: u8 = 1;
const STAGE_TRANSFORM: u8 = 1 << 1;
const STAGE_FILL: u8 = 1 << 2;
const STAGE_ROUND_CLIP: u8 = 1 << 3;
const STAGE_SCISSOR: u8 = 1 << 4;

/// Staged builder for `DrawCall`
#[derive(Debug, Default)]
pub struct DrawCallBuilder {
    stages: u8,
    mesh: Option<Mesh>,
    transform: Option<TransformPair>,
    fill: Option<Fill>,
    blend_mode: BlendMode,
    opaque_content: bool,
    scissor: Option<Rect>,
    round_clip: Option<RoundClipSpec>,
}

impl DrawCallBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn mark_stage(&mut self, stage: u8, name: &str) {
        assert!(
            self.stages & stage == 0,
            "draw call stage `{name}` set twice"
        );
        self.stages |= stage;
    }

    pub fn mesh(mut self, mesh: Mesh) -> Self {
        self.mark_stage(STAGE_MESH, "mesh");
        self.mesh = Some(mesh);
        self
    }

    /// Combine the target projection with the model matrix. When `snap`
    /// is set and the model is a pure translation, the fractional part
    /// of the translation is eliminated exactly; otherwise it is
    /// preserved exactly.
    pub fn transform(mut self, ortho: Mat4, model_view: Mat4, snap: bool) -> Self {
        self.mark_stage(STAGE_TRANSFORM, "transform");
        let (model_view, snapped) = if snap && model_view.is_pure_translate() {
            let (tx, ty) = model_view.translation_xy();
            let tz = model_view.cols[3][2];
            (Mat4::translation(tx.round(), ty.round(), tz), true)
        } else {
            (model_view, false)
        };
        self.transform = Some(TransformPair {
            ortho,
            model_view,
            snapped,
        });
        self
    }

    /// Resolve the fill: effective color is the paint color with the
    /// coverage alpha folded in. Blend factors are derived at `build`
    /// once the round-rect clip state is known.
    pub fn fill(
        mut self,
        color: Color,
        coverage_alpha: f32,
        blend: BlendMode,
        texture: Option<TextureFill>,
        color_filter: Option<&ColorFilter>,
    ) -> Self {
        self.mark_stage(STAGE_FILL, "fill");
        let effective = color.with_alpha(color.a * coverage_alpha);
        self.opaque_content = effective.is_opaque()
            && texture.map_or(true, |t| t.opaque)
            && color_filter.is_none();
        self.blend_mode = blend;
        self.fill = Some(Fill {
            color: effective.premultiplied(),
            texture: texture.map(|t| t.binding),
            color_filter: color_filter.map(ColorFilterSpec::from_filter),
        });
        self
    }

    /// Optional round-rect mask; masked edges are partially covered, so
    /// this also forces blending.
    pub fn round_rect_clip(mut self, clip: &RoundRectClip) -> Self {
        self.mark_stage(STAGE_ROUND_CLIP, "round_rect_clip");
        self.round_clip = Some(RoundClipSpec::from(clip));
        self
    }

    /// Optional scissor rect, set when the ambient clip actually cut the
    /// operation.
    pub fn scissor(mut self, rect: Rect) -> Self {
        self.mark_stage(STAGE_SCISSOR, "scissor");
        self.scissor = Some(rect);
        self
    }

    pub fn build(self) -> DrawCall {
        assert!(
            self.stages & STAGE_MESH != 0,
            "draw call built without a mesh stage"
        );
        assert!(
            self.stages & STAGE_TRANSFORM != 0,
            "draw call built without a transform stage"
        );
        assert!(
            self.stages & STAGE_FILL != 0,
            "draw call built without a fill stage"
        );
        // Per-vertex coverage meshes and masked draws are partially
        // transparent regardless of the fill color.
        let opaque = self.opaque_content
            && self.round_clip.is_none()
            && !matches!(self.mesh, Some(Mesh::Shadow { .. }));
        DrawCall {
            mesh: self.mesh.expect("mesh stage recorded"),
            transform: self.transform.expect("transform stage recorded"),
            fill: self.fill.expect("fill stage recorded"),
            blend: resolve_blend(self.blend_mode, opaque),
            scissor: self.scissor,
            round_clip: self.round_clip,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_builder() -> DrawCallBuilder {
        DrawCallBuilder::new()
            .mesh(Mesh::UnitQuad)
            .transform(Mat4::ortho(100.0, 100.0), Mat4::IDENTITY, false)
    }

    #[test]
    fn snapping_eliminates_fractional_translation() {
        let call = DrawCallBuilder::new()
            .mesh(Mesh::UnitQuad)
            .transform(
                Mat4::ortho(100.0, 100.0),
                Mat4::translation(10.3, 20.3, 0.0),
                true,
            )
            .fill(Color::WHITE, 1.0, BlendMode::SrcOver, None, None)
            .build();
        assert!(call.transform.snapped);
        assert_eq!(call.transform.model_view.translation_xy(), (10.0, 20.0));
    }

    #[test]
    fn no_snap_preserves_fraction_exactly() {
        let call = DrawCallBuilder::new()
            .mesh(Mesh::UnitQuad)
            .transform(
                Mat4::ortho(100.0, 100.0),
                Mat4::translation(10.3, 20.3, 0.0),
                false,
            )
            .fill(Color::WHITE, 1.0, BlendMode::SrcOver, None, None)
            .build();
        assert!(!call.transform.snapped);
        assert_eq!(call.transform.model_view.translation_xy(), (10.3, 20.3));
    }

    #[test]
    fn snap_request_on_general_transform_is_ignored() {
        let call = DrawCallBuilder::new()
            .mesh(Mesh::UnitQuad)
            .transform(
                Mat4::ortho(100.0, 100.0),
                Mat4::rotation_z(0.5).mul(&Mat4::translation(10.3, 0.0, 0.0)),
                true,
            )
            .fill(Color::WHITE, 1.0, BlendMode::SrcOver, None, None)
            .build();
        assert!(!call.transform.snapped);
    }

    #[test]
    fn opaque_fill_disables_blending() {
        let call = base_builder()
            .fill(Color::WHITE, 1.0, BlendMode::SrcOver, None, None)
            .build();
        assert!(call.blend.is_disabled());
    }

    #[test]
    fn coverage_alpha_enables_blending() {
        let call = base_builder()
            .fill(Color::WHITE, 0.5, BlendMode::SrcOver, None, None)
            .build();
        assert!(!call.blend.is_disabled());
        assert_eq!(call.fill.color[3], 0.5);
    }

    #[test]
    fn round_clip_forces_blending_even_when_opaque() {
        let clip = RoundRectClip {
            inner_rect: Rect::from_wh(10.0, 10.0),
            radius: 4.0,
            high_priority: false,
        };
        let call = base_builder()
            .fill(Color::WHITE, 1.0, BlendMode::SrcOver, None, None)
            .round_rect_clip(&clip)
            .build();
        assert!(!call.blend.is_disabled());
        assert_eq!(call.round_clip.unwrap().radius, 4.0);
    }

    #[test]
    #[should_panic(expected = "stage `mesh` set twice")]
    fn double_mesh_stage_panics() {
        let _ = DrawCallBuilder::new().mesh(Mesh::UnitQuad).mesh(Mesh::UnitQuad);
    }

    #[test]
    #[should_panic(expected = "built without a fill stage")]
    fn missing_fill_stage_panics() {
        let _ = DrawCallBuilder::new()
            .mesh(Mesh::UnitQuad)
            .transform(Mat4::ortho(10.0, 10.0), Mat4::IDENTITY, false)
            .build();
    }

    #[test]
    #[should_panic(expected = "built without a mesh stage")]
    fn missing_mesh_stage_panics() {
        let _ = DrawCallBuilder::new()
            .transform(Mat4::ortho(10.0, 10.0), Mat4::IDENTITY, false)
            .fill(Color::WHITE, 1.0, BlendMode::SrcOver, None, None)
            .build();
    }
}
