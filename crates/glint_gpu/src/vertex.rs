//! GPU vertex layouts
//!
//! All structures are `#[repr(C)]` and implement `bytemuck::Pod` so they
//! can be copied into GPU buffers directly.

/// Position-only vertex for solid geometry
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct QuadVertex {
    pub position: [f32; 2],
}

impl QuadVertex {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { position: [x, y] }
    }
}

/// Vertex with texture coordinates, used for bitmap/glyph/layer quads
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct TexturedVertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
}

impl TexturedVertex {
    pub const fn new(x: f32, y: f32, u: f32, v: f32) -> Self {
        Self {
            position: [x, y],
            uv: [u, v],
        }
    }
}

/// Vertex with per-vertex coverage, used for shadow penumbra meshes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ShadowVertex {
    pub position: [f32; 2],
    pub alpha: f32,
}

impl ShadowVertex {
    pub const fn new(x: f32, y: f32, alpha: f32) -> Self {
        Self {
            position: [x, y],
            alpha,
        }
    }
}

/// The shared unit quad, instanced by the model transform
pub const UNIT_QUAD: [QuadVertex; 4] = [
    QuadVertex::new(0.0, 0.0),
    QuadVertex::new(1.0, 0.0),
    QuadVertex::new(0.0, 1.0),
    QuadVertex::new(1.0, 1.0),
];

/// Triangle-list indices for `quad_count` quads laid out as 4 vertices
/// each, matching the shared index buffer the executor keeps.
pub fn quad_indices(quad_count: u32) -> Vec<u16> {
    let mut indices = Vec::with_capacity(quad_count as usize * 6);
    for q in 0..quad_count {
        let base = (q * 4) as u16;
        indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 1, base + 3]);
    }
    indices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pod_layouts_are_tight() {
        assert_eq!(std::mem::size_of::<QuadVertex>(), 8);
        assert_eq!(std::mem::size_of::<TexturedVertex>(), 16);
        assert_eq!(std::mem::size_of::<ShadowVertex>(), 12);
    }

    #[test]
    fn quad_indices_cover_all_quads() {
        let indices = quad_indices(3);
        assert_eq!(indices.len(), 18);
        assert_eq!(indices[6..12], [4, 5, 6, 6, 5, 7]);
        assert_eq!(*indices.iter().max().unwrap(), 11);
    }
}
