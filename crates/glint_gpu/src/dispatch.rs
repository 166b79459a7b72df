//! Entry dispatch
//!
//! `DrawCallEmitter` sits on the frame pipeline's output: it receives
//! ordered entries through `CommandSink`, builds one draw call per
//! single entry or merged batch through the staged builder, and hands
//! the calls to the external `GpuExecutor` in emission order. The
//! executor issues them verbatim; all compositing decisions are already
//! resolved here.

use glint_core::{
    BitmapOp, Color, DrawOp, LayerDrawOp, Mat4, Rect, RectOp, ShadowOp, SimpleRectsOp,
    SurfaceHandle, TextRunOp, TextureInfo,
};
use glint_frame::{BakedState, BatchKind, CommandSink, MergedBatch, OpEntry};

use crate::draw_call::{
    DrawCall, DrawCallBuilder, Mesh, TextureBinding, TextureFill, TextureSource,
};
use crate::shadow::tessellate_shadow;
use crate::vertex::{QuadVertex, TexturedVertex};

/// The render target a run of draw calls is issued against
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RenderTarget {
    Frame {
        width: u32,
        height: u32,
        repaint: Rect,
    },
    Surface {
        surface: SurfaceHandle,
        width: u32,
        height: u32,
        /// Region the executor clears before the target's draws
        clear: Rect,
    },
}

impl RenderTarget {
    fn dimensions(&self) -> (f32, f32) {
        match self {
            RenderTarget::Frame { width, height, .. }
            | RenderTarget::Surface { width, height, .. } => (*width as f32, *height as f32),
        }
    }
}

/// External GPU command executor. Receives targets and fully-resolved
/// draw calls in the exact order they must be issued.
pub trait GpuExecutor {
    fn begin_target(&mut self, target: RenderTarget);
    fn end_target(&mut self);
    fn submit(&mut self, call: DrawCall);
    /// A temporary layer's surface returned to the pool; any cached
    /// bindings for it should be dropped.
    fn recycle_surface(&mut self, _surface: SurfaceHandle) {}
}

/// Builds draw calls from deferred entries
pub struct DrawCallEmitter<'e, E: GpuExecutor> {
    executor: &'e mut E,
    ortho: Option<Mat4>,
    submitted: usize,
}

impl<'e, E: GpuExecutor> DrawCallEmitter<'e, E> {
    pub fn new(executor: &'e mut E) -> Self {
        Self {
            executor,
            ortho: None,
            submitted: 0,
        }
    }

    pub fn submitted(&self) -> usize {
        self.submitted
    }

    fn open_target(&mut self, target: RenderTarget) {
        let (w, h) = target.dimensions();
        self.ortho = Some(Mat4::ortho(w, h));
        self.executor.begin_target(target);
    }

    fn ortho(&self) -> Mat4 {
        self.ortho
            .expect("draw dispatched outside an active render target")
    }

    fn submit(&mut self, call: DrawCall) {
        self.submitted += 1;
        self.executor.submit(call);
    }

    fn builder_for(&self, state: &BakedState) -> DrawCallBuilder {
        let mut builder = DrawCallBuilder::new();
        if !state.clip_sides.is_none() {
            builder = builder.scissor(state.clipped_bounds);
        }
        builder
    }

    /// Finish the optional stages shared by every single-entry call.
    fn finish(&mut self, builder: DrawCallBuilder, state: &BakedState) {
        let builder = match &state.round_clip {
            Some(clip) => builder.round_rect_clip(clip),
            None => builder,
        };
        self.submit(builder.build());
    }

    fn rect(&mut self, op: &RectOp, state: &BakedState) {
        let model = state.transform.mul(&rect_model(op.rect));
        let builder = self
            .builder_for(state)
            .mesh(Mesh::UnitQuad)
            .transform(self.ortho(), model, false)
            .fill(
                op.paint.color,
                state.alpha,
                op.paint.blend,
                None,
                op.paint.color_filter.as_ref(),
            );
        self.finish(builder, state);
    }

    fn simple_rects(&mut self, op: &SimpleRectsOp, state: &BakedState) {
        let mut vertices = Vec::with_capacity(op.rects.len() * 4);
        for rect in op.rects.iter() {
            vertices.extend_from_slice(&[
                QuadVertex::new(rect.left, rect.top),
                QuadVertex::new(rect.right, rect.top),
                QuadVertex::new(rect.left, rect.bottom),
                QuadVertex::new(rect.right, rect.bottom),
            ]);
        }
        let indices = crate::vertex::quad_indices(op.rects.len() as u32);
        let builder = self
            .builder_for(state)
            .mesh(Mesh::Rects { vertices, indices })
            .transform(self.ortho(), state.transform, false)
            .fill(
                op.paint.color,
                state.alpha,
                op.paint.blend,
                None,
                op.paint.color_filter.as_ref(),
            );
        self.finish(builder, state);
    }

    fn bitmap(&mut self, op: &BitmapOp, state: &BakedState) {
        let uv = bitmap_uv(&op.texture, op.src);
        let vertices = quad_vertices(op.dst, uv);
        let binding = TextureBinding {
            source: TextureSource::Cache(op.texture.id),
            filter: texture_filter(&state.transform, op.paint.filter),
            address: wgpu::AddressMode::ClampToEdge,
        };
        let builder = self
            .builder_for(state)
            .mesh(Mesh::IndexedQuads {
                vertices: vertices.to_vec(),
                quad_count: 1,
            })
            .transform(self.ortho(), state.transform, true)
            .fill(
                Color::WHITE.with_alpha(op.paint.color.a),
                state.alpha,
                op.paint.blend,
                Some(TextureFill {
                    binding,
                    opaque: op.texture.opaque,
                }),
                op.paint.color_filter.as_ref(),
            );
        self.finish(builder, state);
    }

    fn text_run(&mut self, op: &TextRunOp, state: &BakedState) {
        let mut vertices = Vec::with_capacity(op.glyphs.len() * 4);
        for glyph in op.glyphs.iter() {
            push_glyph_quad(&mut vertices, glyph, 0.0, 0.0);
        }
        let quad_count = op.glyphs.len() as u32;
        let binding = TextureBinding {
            source: TextureSource::Cache(op.atlas.id),
            filter: texture_filter(&state.transform, op.paint.filter),
            address: wgpu::AddressMode::ClampToEdge,
        };
        let builder = self
            .builder_for(state)
            .mesh(Mesh::IndexedQuads {
                vertices,
                quad_count,
            })
            .transform(self.ortho(), state.transform, true)
            .fill(
                op.paint.color,
                state.alpha,
                op.paint.blend,
                // glyph atlases carry coverage, never full color
                Some(TextureFill {
                    binding,
                    opaque: false,
                }),
                op.paint.color_filter.as_ref(),
            );
        self.finish(builder, state);
    }

    fn shadow(&mut self, op: &ShadowOp, state: &BakedState) {
        let (vertices, indices) = tessellate_shadow(op);
        if vertices.is_empty() {
            return;
        }
        let builder = self
            .builder_for(state)
            .mesh(Mesh::Shadow { vertices, indices })
            .transform(self.ortho(), state.transform, false)
            .fill(
                Color::BLACK,
                state.alpha,
                glint_core::BlendMode::SrcOver,
                None,
                None,
            );
        self.finish(builder, state);
    }

    fn layer(&mut self, op: &LayerDrawOp, state: &BakedState) {
        let [u0, v0, u1, v1] = op.uv;
        let vertices = vec![
            TexturedVertex::new(op.dst.left, op.dst.top, u0, v0),
            TexturedVertex::new(op.dst.right, op.dst.top, u1, v0),
            TexturedVertex::new(op.dst.left, op.dst.bottom, u0, v1),
            TexturedVertex::new(op.dst.right, op.dst.bottom, u1, v1),
        ];
        let binding = TextureBinding {
            source: TextureSource::Surface(op.surface),
            // layer content may have been scaled to fit the surface
            filter: wgpu::FilterMode::Linear,
            address: wgpu::AddressMode::ClampToEdge,
        };
        let builder = self
            .builder_for(state)
            .mesh(Mesh::IndexedQuads {
                vertices,
                quad_count: 1,
            })
            .transform(self.ortho(), state.transform, true)
            .fill(
                Color::WHITE.with_alpha(op.paint.color.a),
                state.alpha,
                op.paint.blend,
                Some(TextureFill {
                    binding,
                    opaque: false,
                }),
                op.paint.color_filter.as_ref(),
            );
        self.finish(builder, state);
    }

    fn merged_bitmaps(&mut self, batch: &MergedBatch) {
        let mut vertices = Vec::with_capacity(batch.ops.len() * 4);
        let mut first: Option<(&BitmapOp, &BakedState)> = None;
        for entry in &batch.ops {
            let DrawOp::Bitmap(op) = &entry.op else {
                panic!("merged bitmap batch contains a non-bitmap member");
            };
            let (tx, ty) = entry.state.transform.translation_xy();
            let dst = op.dst.translated(tx, ty);
            vertices.extend_from_slice(&quad_vertices(dst, bitmap_uv(&op.texture, op.src)));
            first.get_or_insert((op, &entry.state));
        }
        let (op, state) = first.expect("merged batch is never empty");
        let binding = TextureBinding {
            source: TextureSource::Cache(op.texture.id),
            filter: wgpu::FilterMode::Nearest,
            address: wgpu::AddressMode::ClampToEdge,
        };
        let quad_count = batch.ops.len() as u32;
        let mut builder = DrawCallBuilder::new();
        if !batch.clip_sides.is_none() {
            builder = builder.scissor(batch.clip);
        }
        // merged positions are pre-baked into device space
        let builder = builder
            .mesh(Mesh::IndexedQuads {
                vertices,
                quad_count,
            })
            .transform(self.ortho(), Mat4::IDENTITY, true)
            .fill(
                Color::WHITE.with_alpha(op.paint.color.a),
                state.alpha,
                op.paint.blend,
                Some(TextureFill {
                    binding,
                    opaque: op.texture.opaque,
                }),
                op.paint.color_filter.as_ref(),
            );
        self.submit(builder.build());
    }

    fn merged_text(&mut self, batch: &MergedBatch) {
        let mut vertices = Vec::new();
        let mut first: Option<(&TextRunOp, &BakedState)> = None;
        for entry in &batch.ops {
            let DrawOp::TextRun(op) = &entry.op else {
                panic!("merged text batch contains a non-text member");
            };
            let (tx, ty) = entry.state.transform.translation_xy();
            for glyph in op.glyphs.iter() {
                push_glyph_quad(&mut vertices, glyph, tx, ty);
            }
            first.get_or_insert((op, &entry.state));
        }
        let (op, state) = first.expect("merged batch is never empty");
        let quad_count = (vertices.len() / 4) as u32;
        let binding = TextureBinding {
            source: TextureSource::Cache(op.atlas.id),
            filter: wgpu::FilterMode::Nearest,
            address: wgpu::AddressMode::ClampToEdge,
        };
        let mut builder = DrawCallBuilder::new();
        if !batch.clip_sides.is_none() {
            builder = builder.scissor(batch.clip);
        }
        let builder = builder
            .mesh(Mesh::IndexedQuads {
                vertices,
                quad_count,
            })
            .transform(self.ortho(), Mat4::IDENTITY, true)
            .fill(
                op.paint.color,
                state.alpha,
                op.paint.blend,
                Some(TextureFill {
                    binding,
                    opaque: false,
                }),
                op.paint.color_filter.as_ref(),
            );
        self.submit(builder.build());
    }
}

impl<E: GpuExecutor> CommandSink for DrawCallEmitter<'_, E> {
    fn begin_frame(&mut self, width: u32, height: u32, repaint: Rect) {
        self.open_target(RenderTarget::Frame {
            width,
            height,
            repaint,
        });
    }

    fn end_frame(&mut self, _repaint: Rect) {
        self.executor.end_target();
        self.ortho = None;
        tracing::debug!(calls = self.submitted, "frame dispatched");
    }

    fn begin_temporary_layer(&mut self, layer: &glint_frame::OffscreenLayer) {
        self.open_target(RenderTarget::Surface {
            surface: layer.surface,
            width: layer.viewport_width,
            height: layer.viewport_height,
            clear: Rect::from_wh(layer.viewport_width as f32, layer.viewport_height as f32),
        });
    }

    fn begin_layer_repaint(&mut self, layer: &glint_frame::OffscreenLayer, damage: Rect) {
        self.open_target(RenderTarget::Surface {
            surface: layer.surface,
            width: layer.viewport_width,
            height: layer.viewport_height,
            clear: damage,
        });
    }

    fn end_layer(&mut self) {
        self.executor.end_target();
        self.ortho = None;
    }

    fn draw(&mut self, entry: &OpEntry) {
        match &entry.op {
            DrawOp::Rect(op) => self.rect(op, &entry.state),
            DrawOp::SimpleRects(op) => self.simple_rects(op, &entry.state),
            DrawOp::Bitmap(op) => self.bitmap(op, &entry.state),
            DrawOp::TextRun(op) => self.text_run(op, &entry.state),
            DrawOp::Shadow(op) => self.shadow(op, &entry.state),
            DrawOp::Layer(op) => self.layer(op, &entry.state),
        }
    }

    fn draw_merged(&mut self, batch: &MergedBatch) {
        match batch.kind {
            BatchKind::Bitmap => self.merged_bitmaps(batch),
            BatchKind::Text => self.merged_text(batch),
            kind => panic!("merged batch of unmergeable kind {kind:?}"),
        }
    }

    fn recycle_temporary_layer(&mut self, layer: &glint_frame::OffscreenLayer) {
        self.executor.recycle_surface(layer.surface);
    }
}

fn rect_model(rect: Rect) -> Mat4 {
    Mat4::translation(rect.left, rect.top, 0.0).mul(&Mat4::scale(
        rect.width(),
        rect.height(),
        1.0,
    ))
}

fn bitmap_uv(texture: &TextureInfo, src: Option<Rect>) -> [f32; 4] {
    match src {
        None => [0.0, 0.0, 1.0, 1.0],
        Some(src) => {
            let w = texture.width as f32;
            let h = texture.height as f32;
            [src.left / w, src.top / h, src.right / w, src.bottom / h]
        }
    }
}

fn quad_vertices(dst: Rect, uv: [f32; 4]) -> [TexturedVertex; 4] {
    let [u0, v0, u1, v1] = uv;
    [
        TexturedVertex::new(dst.left, dst.top, u0, v0),
        TexturedVertex::new(dst.right, dst.top, u1, v0),
        TexturedVertex::new(dst.left, dst.bottom, u0, v1),
        TexturedVertex::new(dst.right, dst.bottom, u1, v1),
    ]
}

fn push_glyph_quad(
    vertices: &mut Vec<TexturedVertex>,
    glyph: &glint_core::PlacedGlyph,
    dx: f32,
    dy: f32,
) {
    let dst = Rect::from_xywh(glyph.x + dx, glyph.y + dy, glyph.width, glyph.height);
    vertices.extend_from_slice(&quad_vertices(dst, glyph.uv));
}

/// Nearest sampling for pixel-aligned content, linear for everything
/// else or when the paint forces filtering.
fn texture_filter(transform: &Mat4, request: glint_core::FilterRequest) -> wgpu::FilterMode {
    if request == glint_core::FilterRequest::Force {
        return wgpu::FilterMode::Linear;
    }
    if transform.is_pure_translate() {
        // destination snapping aligns pure translations to pixels
        wgpu::FilterMode::Nearest
    } else {
        wgpu::FilterMode::Linear
    }
}
