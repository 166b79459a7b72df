//! Glint GPU
//!
//! Draw-call construction for the deferral pipeline: the staged
//! `DrawCallBuilder`, mesh/vertex layouts, blend and filter resolution,
//! shadow tessellation, and the `DrawCallEmitter` that turns deferred
//! entries into fully-resolved calls for an external executor.
//!
//! No GPU device lives here. Draw calls speak wgpu's vocabulary (blend
//! factors, sampler modes) and reference textures and surfaces through
//! opaque handles; the executor that owns the device issues them in the
//! order received, with no further compositing inference.
//!
//! ```ignore
//! use glint_gpu::DrawCallEmitter;
//!
//! let mut emitter = DrawCallEmitter::new(&mut executor);
//! frame_builder.replay(&mut emitter);
//! ```

pub mod blend;
pub mod dispatch;
pub mod draw_call;
pub mod shadow;
pub mod vertex;

pub use blend::{resolve_blend, Blend};
pub use dispatch::{DrawCallEmitter, GpuExecutor, RenderTarget};
pub use draw_call::{
    ColorFilterSpec, DrawCall, DrawCallBuilder, Fill, Mesh, Primitive, RoundClipSpec,
    TextureBinding, TextureFill, TextureSource, TransformPair,
};
pub use shadow::tessellate_shadow;
pub use vertex::{quad_indices, QuadVertex, ShadowVertex, TexturedVertex, UNIT_QUAD};
