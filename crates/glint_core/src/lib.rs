//! Glint Core
//!
//! Foundational types for the Glint rendering pipeline:
//!
//! - **Geometry**: points, rects, and 4x4 transforms tuned for
//!   device-space clipping math
//! - **Paint state**: colors, blend modes, color filters
//! - **Recorded scenes**: closed operation variants, display lists, and
//!   the node tree the deferral pipeline walks once per frame
//!
//! The recorder that produces scenes and the GPU executor that consumes
//! draw calls live outside this workspace; everything here is plain data
//! plus the small amount of math the pipeline needs to resolve it.

pub mod color;
pub mod geometry;
pub mod matrix;
pub mod node;
pub mod ops;
pub mod paint;

pub use color::Color;
pub use geometry::{Point, Rect, Size, Vec3};
pub use matrix::Mat4;
pub use node::{
    DisplayList, LayerKind, NodeId, NodeProperties, Outline, Recorder, RenderNode, RevealClip,
};
pub use ops::{
    BitmapOp, CanvasOp, DrawOp, LayerDrawOp, LayerId, PlacedGlyph, RectOp, ResolvedLight,
    ShadowOp, SimpleRectsOp, SurfaceHandle, TextRunOp, TextureId, TextureInfo,
};
pub use paint::{BlendMode, ColorFilter, FilterRequest, Paint};
