//! 4x4 transformation matrix (column-major)
//!
//! The pipeline composes node and canvas transforms into a single model
//! matrix per operation. Pure translations are detected explicitly so the
//! draw-call stage can snap geometry to pixel boundaries without a general
//! matrix decomposition.

use crate::geometry::{Point, Rect};

const EPSILON: f32 = 1e-5;

/// 4x4 transformation matrix, column-major (`cols[column][row]`)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Mat4 {
    pub cols: [[f32; 4]; 4],
}

impl Default for Mat4 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Mat4 {
    pub const IDENTITY: Mat4 = Mat4 {
        cols: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ],
    };

    pub fn translation(x: f32, y: f32, z: f32) -> Self {
        Self {
            cols: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [x, y, z, 1.0],
            ],
        }
    }

    pub fn scale(x: f32, y: f32, z: f32) -> Self {
        Self {
            cols: [
                [x, 0.0, 0.0, 0.0],
                [0.0, y, 0.0, 0.0],
                [0.0, 0.0, z, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
        }
    }

    pub fn rotation_z(angle: f32) -> Self {
        let c = angle.cos();
        let s = angle.sin();
        Self {
            cols: [
                [c, s, 0.0, 0.0],
                [-s, c, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
        }
    }

    /// Orthographic projection mapping `(0,0)..(width,height)` onto clip
    /// space with y pointing down, the convention for render targets.
    pub fn ortho(width: f32, height: f32) -> Self {
        Self {
            cols: [
                [2.0 / width, 0.0, 0.0, 0.0],
                [0.0, -2.0 / height, 0.0, 0.0],
                [0.0, 0.0, -1.0, 0.0],
                [-1.0, 1.0, 0.0, 1.0],
            ],
        }
    }

    /// Multiply two matrices (`self * other`)
    pub fn mul(&self, other: &Mat4) -> Mat4 {
        let mut result = [[0.0f32; 4]; 4];
        for i in 0..4 {
            for j in 0..4 {
                for k in 0..4 {
                    result[i][j] += self.cols[k][j] * other.cols[i][k];
                }
            }
        }
        Mat4 { cols: result }
    }

    pub fn map_point(&self, p: Point) -> Point {
        Point::new(
            self.cols[0][0] * p.x + self.cols[1][0] * p.y + self.cols[3][0],
            self.cols[0][1] * p.x + self.cols[1][1] * p.y + self.cols[3][1],
        )
    }

    /// Axis-aligned bounding box of the transformed rect corners.
    pub fn map_rect(&self, r: Rect) -> Rect {
        if self.is_pure_translate() {
            return r.translated(self.cols[3][0], self.cols[3][1]);
        }
        let corners = [
            self.map_point(Point::new(r.left, r.top)),
            self.map_point(Point::new(r.right, r.top)),
            self.map_point(Point::new(r.left, r.bottom)),
            self.map_point(Point::new(r.right, r.bottom)),
        ];
        let mut out = Rect::new(corners[0].x, corners[0].y, corners[0].x, corners[0].y);
        for c in &corners[1..] {
            out.left = out.left.min(c.x);
            out.top = out.top.min(c.y);
            out.right = out.right.max(c.x);
            out.bottom = out.bottom.max(c.y);
        }
        out
    }

    pub fn is_identity(&self) -> bool {
        self.approx_eq(&Mat4::IDENTITY)
    }

    /// True when the matrix only translates (within epsilon).
    pub fn is_pure_translate(&self) -> bool {
        let i = Mat4::IDENTITY;
        for c in 0..3 {
            for r in 0..4 {
                if (self.cols[c][r] - i.cols[c][r]).abs() > EPSILON {
                    return false;
                }
            }
        }
        (self.cols[3][3] - 1.0).abs() <= EPSILON
    }

    /// True when the matrix maps axis-aligned rects to axis-aligned rects
    /// (translation and scale only, no rotation/skew/perspective).
    pub fn is_rect_to_rect(&self) -> bool {
        self.cols[0][1].abs() <= EPSILON
            && self.cols[1][0].abs() <= EPSILON
            && self.cols[0][3].abs() <= EPSILON
            && self.cols[1][3].abs() <= EPSILON
            && (self.cols[3][3] - 1.0).abs() <= EPSILON
    }

    /// The x/y translation components.
    pub fn translation_xy(&self) -> (f32, f32) {
        (self.cols[3][0], self.cols[3][1])
    }

    /// Inverse of an affine matrix. Returns `None` for singular or
    /// perspective matrices; the pipeline only inverts node transforms,
    /// which are affine by construction.
    pub fn invert(&self) -> Option<Mat4> {
        let m = &self.cols;
        if m[0][3].abs() > EPSILON
            || m[1][3].abs() > EPSILON
            || m[2][3].abs() > EPSILON
            || (m[3][3] - 1.0).abs() > EPSILON
        {
            return None;
        }

        // Invert the upper-left 3x3 by adjugate.
        let a = [
            [m[0][0], m[1][0], m[2][0]],
            [m[0][1], m[1][1], m[2][1]],
            [m[0][2], m[1][2], m[2][2]],
        ];
        let det = a[0][0] * (a[1][1] * a[2][2] - a[1][2] * a[2][1])
            - a[0][1] * (a[1][0] * a[2][2] - a[1][2] * a[2][0])
            + a[0][2] * (a[1][0] * a[2][1] - a[1][1] * a[2][0]);
        if det.abs() < 1e-10 {
            return None;
        }
        let inv_det = 1.0 / det;
        let inv = [
            [
                (a[1][1] * a[2][2] - a[1][2] * a[2][1]) * inv_det,
                (a[0][2] * a[2][1] - a[0][1] * a[2][2]) * inv_det,
                (a[0][1] * a[1][2] - a[0][2] * a[1][1]) * inv_det,
            ],
            [
                (a[1][2] * a[2][0] - a[1][0] * a[2][2]) * inv_det,
                (a[0][0] * a[2][2] - a[0][2] * a[2][0]) * inv_det,
                (a[0][2] * a[1][0] - a[0][0] * a[1][2]) * inv_det,
            ],
            [
                (a[1][0] * a[2][1] - a[1][1] * a[2][0]) * inv_det,
                (a[0][1] * a[2][0] - a[0][0] * a[2][1]) * inv_det,
                (a[0][0] * a[1][1] - a[0][1] * a[1][0]) * inv_det,
            ],
        ];

        let t = [m[3][0], m[3][1], m[3][2]];
        let mut out = Mat4::IDENTITY;
        for c in 0..3 {
            for r in 0..3 {
                out.cols[c][r] = inv[r][c];
            }
        }
        out.cols[3][0] = -(inv[0][0] * t[0] + inv[0][1] * t[1] + inv[0][2] * t[2]);
        out.cols[3][1] = -(inv[1][0] * t[0] + inv[1][1] * t[1] + inv[1][2] * t[2]);
        out.cols[3][2] = -(inv[2][0] * t[0] + inv[2][1] * t[1] + inv[2][2] * t[2]);
        Some(out)
    }

    pub fn approx_eq(&self, other: &Mat4) -> bool {
        for c in 0..4 {
            for r in 0..4 {
                if (self.cols[c][r] - other.cols[c][r]).abs() > 1e-4 {
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translation_is_pure() {
        let m = Mat4::translation(5.0, -3.0, 0.0);
        assert!(m.is_pure_translate());
        assert!(m.is_rect_to_rect());
        assert_eq!(m.translation_xy(), (5.0, -3.0));
    }

    #[test]
    fn scale_is_rect_to_rect_but_not_translate() {
        let m = Mat4::scale(2.0, 0.5, 1.0);
        assert!(!m.is_pure_translate());
        assert!(m.is_rect_to_rect());
    }

    #[test]
    fn rotation_is_not_rect_to_rect() {
        let m = Mat4::rotation_z(0.3);
        assert!(!m.is_rect_to_rect());
    }

    #[test]
    fn map_rect_translate() {
        let m = Mat4::translation(10.0, 20.0, 0.0);
        assert_eq!(
            m.map_rect(Rect::from_wh(5.0, 5.0)),
            Rect::new(10.0, 20.0, 15.0, 25.0)
        );
    }

    #[test]
    fn map_rect_rotation_bounds() {
        // 45 degree rotation of a unit square centered at origin covers
        // sqrt(2) in each axis.
        let m = Mat4::rotation_z(std::f32::consts::FRAC_PI_4);
        let r = m.map_rect(Rect::new(-0.5, -0.5, 0.5, 0.5));
        let h = std::f32::consts::SQRT_2 / 2.0;
        assert!((r.left + h).abs() < 1e-5 && (r.right - h).abs() < 1e-5);
    }

    #[test]
    fn invert_composes_to_identity() {
        let m = Mat4::translation(100.0, 100.0, 0.0).mul(&Mat4::scale(2.0, 3.0, 1.0));
        let inv = m.invert().unwrap();
        assert!(m.mul(&inv).is_identity());
    }

    #[test]
    fn relative_transform_between_translations() {
        // receiver at (100,100), projector at (150,150): the relative
        // transform translates by (50,50).
        let receiver = Mat4::translation(100.0, 100.0, 0.0);
        let projector = Mat4::translation(150.0, 150.0, 0.0);
        let relative = receiver.invert().unwrap().mul(&projector);
        assert!(relative.approx_eq(&Mat4::translation(50.0, 50.0, 0.0)));
    }
}
