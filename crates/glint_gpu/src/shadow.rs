//! Shadow mesh generation
//!
//! Turns a resolved shadow operation into an umbra/penumbra ring mesh
//! with per-vertex coverage: the umbra quad carries the full shadow
//! alpha, the penumbra ring fades to zero at its outer edge. Positions
//! are emitted in device space; the shadow draw uses an identity model
//! matrix.

use glint_core::{Point, Rect, ShadowOp};

use crate::vertex::ShadowVertex;

/// Peak alpha of an ambient shadow before caster alpha is applied.
const UMBRA_ALPHA: f32 = 0.28;
/// Alpha lost per unit of elevation; taller casters throw softer
/// shadows.
const ALPHA_FALLOFF_PER_DP: f32 = 0.015;

/// Umbra translation and penumbra width for an elevation under a light.
fn projection_params(op: &ShadowOp) -> (f32, f32, f32) {
    let light_z = op.light.center.z.max(op.elevation + 1.0);
    let scale = op.elevation / light_z;
    let outline_center = op.transform_xy.map_point(op.outline.center());
    let offset_x = (outline_center.x - op.light.center.x) * scale;
    let offset_y = (outline_center.y - op.light.center.y) * scale;
    let penumbra = (op.light.radius * scale).max(1.0);
    (offset_x, offset_y, penumbra)
}

/// Build the ring mesh for one shadow op. Returns vertices and
/// triangle-list indices; empty when the shadow would be invisible.
pub fn tessellate_shadow(op: &ShadowOp) -> (Vec<ShadowVertex>, Vec<u16>) {
    let alpha = (UMBRA_ALPHA - op.elevation * ALPHA_FALLOFF_PER_DP).max(0.05)
        * op.caster_alpha.clamp(0.0, 1.0);
    if alpha <= 0.0 || op.elevation <= 0.0 {
        return (Vec::new(), Vec::new());
    }

    let (dx, dy, penumbra) = projection_params(op);
    let corners = |r: Rect| -> [Point; 4] {
        [
            op.transform_xy.map_point(Point::new(r.left, r.top)),
            op.transform_xy.map_point(Point::new(r.right, r.top)),
            op.transform_xy.map_point(Point::new(r.right, r.bottom)),
            op.transform_xy.map_point(Point::new(r.left, r.bottom)),
        ]
    };
    let umbra = corners(op.outline.translated(dx, dy));
    let outer = corners(op.outline.translated(dx, dy).outset(penumbra));

    let mut vertices = Vec::with_capacity(8);
    for p in umbra {
        vertices.push(ShadowVertex::new(p.x, p.y, alpha));
    }
    for p in outer {
        vertices.push(ShadowVertex::new(p.x, p.y, 0.0));
    }

    // Umbra fill (two triangles) plus the penumbra ring (eight).
    let mut indices: Vec<u16> = vec![0, 1, 2, 0, 2, 3];
    for edge in 0u16..4 {
        let inner_a = edge;
        let inner_b = (edge + 1) % 4;
        let outer_a = edge + 4;
        let outer_b = (edge + 1) % 4 + 4;
        indices.extend_from_slice(&[inner_a, outer_a, inner_b, inner_b, outer_a, outer_b]);
    }
    (vertices, indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glint_core::{Mat4, ResolvedLight, Vec3};

    fn shadow(elevation: f32) -> ShadowOp {
        ShadowOp {
            outline: Rect::from_wh(100.0, 100.0),
            corner_radius: 0.0,
            caster_alpha: 1.0,
            transform_xy: Mat4::IDENTITY,
            elevation,
            light: ResolvedLight {
                center: Vec3::new(50.0, -200.0, 600.0),
                radius: 50.0,
            },
        }
    }

    #[test]
    fn ring_mesh_shape() {
        let (vertices, indices) = tessellate_shadow(&shadow(8.0));
        assert_eq!(vertices.len(), 8);
        assert_eq!(indices.len(), 6 + 24);
        assert!(indices.iter().all(|&i| (i as usize) < vertices.len()));
    }

    #[test]
    fn umbra_carries_alpha_and_penumbra_fades_out() {
        let (vertices, _) = tessellate_shadow(&shadow(8.0));
        assert!(vertices[..4].iter().all(|v| v.alpha > 0.0));
        assert!(vertices[4..].iter().all(|v| v.alpha == 0.0));
    }

    #[test]
    fn umbra_shifts_away_from_light() {
        // light is above (negative y), so the shadow falls below
        let (vertices, _) = tessellate_shadow(&shadow(8.0));
        assert!(vertices[0].position[1] > 0.0);
    }

    #[test]
    fn caster_alpha_scales_shadow_alpha() {
        let mut op = shadow(8.0);
        let (full, _) = tessellate_shadow(&op);
        op.caster_alpha = 0.5;
        let (half, _) = tessellate_shadow(&op);
        assert!((half[0].alpha - full[0].alpha * 0.5).abs() < 1e-6);
    }

    #[test]
    fn zero_elevation_casts_nothing() {
        let (vertices, indices) = tessellate_shadow(&shadow(0.0));
        assert!(vertices.is_empty());
        assert!(indices.is_empty());
    }
}
