//! Paint configuration attached to recorded draw operations

use crate::color::Color;

/// Compositing modes.
///
/// The first group maps directly onto fixed-function blend factors. The
/// advanced group needs shader support the executor does not promise, so
/// the draw-call stage degrades each advanced mode to the nearest
/// standard mode instead of failing the frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BlendMode {
    Clear,
    Src,
    #[default]
    SrcOver,
    DstOver,
    SrcIn,
    DstIn,
    SrcOut,
    DstOut,
    SrcAtop,
    DstAtop,
    Xor,
    Plus,
    Modulate,
    Screen,
    // Advanced modes
    Overlay,
    Darken,
    Lighten,
}

impl BlendMode {
    pub fn is_advanced(&self) -> bool {
        matches!(self, BlendMode::Overlay | BlendMode::Darken | BlendMode::Lighten)
    }

    /// Nearest standard mode for an advanced mode; identity otherwise.
    pub fn standard_fallback(&self) -> BlendMode {
        if self.is_advanced() {
            BlendMode::SrcOver
        } else {
            *self
        }
    }
}

/// Color filter applied by the executor after fill resolution
#[derive(Clone, Debug, PartialEq)]
pub enum ColorFilter {
    /// Blend the fragment with a flat color using the given mode
    Blend { color: Color, mode: BlendMode },
    /// 4x4 color matrix plus offset, applied to unpremultiplied RGBA
    Matrix { matrix: [f32; 16], offset: [f32; 4] },
}

/// Texture sampling policy requested at record time
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FilterRequest {
    /// Pick nearest vs. linear from the resolved transform
    #[default]
    Auto,
    /// Always sample linearly
    Force,
}

/// Immutable paint attributes carried by a draw operation
#[derive(Clone, Debug, PartialEq)]
pub struct Paint {
    pub color: Color,
    pub blend: BlendMode,
    pub color_filter: Option<ColorFilter>,
    pub filter: FilterRequest,
}

impl Default for Paint {
    fn default() -> Self {
        Self {
            color: Color::BLACK,
            blend: BlendMode::SrcOver,
            color_filter: None,
            filter: FilterRequest::Auto,
        }
    }
}

impl Paint {
    pub fn from_color(color: Color) -> Self {
        Self {
            color,
            ..Default::default()
        }
    }

    pub fn with_blend(mut self, blend: BlendMode) -> Self {
        self.blend = blend;
        self
    }

    pub fn with_color_filter(mut self, filter: ColorFilter) -> Self {
        self.color_filter = Some(filter);
        self
    }

    /// Whether content drawn with this paint fully covers its geometry.
    /// Used by the overdraw filter; conservative on purpose.
    pub fn is_opaque(&self) -> bool {
        self.color.is_opaque()
            && matches!(self.blend, BlendMode::Src | BlendMode::SrcOver)
            && self.color_filter.is_none()
    }

    /// Stable fingerprint of everything that must match for two ops to
    /// share one fill configuration. Per-op position is excluded.
    pub fn merge_fingerprint(&self) -> u64 {
        let mut h: u64 = 0xcbf29ce484222325;
        let mut mix = |v: u32| {
            h ^= v as u64;
            h = h.wrapping_mul(0x100000001b3);
        };
        mix(self.blend as u32);
        mix(self.color.a.to_bits());
        mix(self.color.r.to_bits());
        mix(self.color.g.to_bits());
        mix(self.color.b.to_bits());
        mix(self.filter as u32);
        match &self.color_filter {
            None => mix(0),
            Some(ColorFilter::Blend { color, mode }) => {
                mix(1);
                mix(*mode as u32);
                mix(color.a.to_bits());
                mix(color.r.to_bits());
                mix(color.g.to_bits());
                mix(color.b.to_bits());
            }
            Some(ColorFilter::Matrix { matrix, offset }) => {
                mix(2);
                for v in matrix {
                    mix(v.to_bits());
                }
                for v in offset {
                    mix(v.to_bits());
                }
            }
        }
        h
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advanced_modes_fall_back() {
        assert_eq!(BlendMode::Overlay.standard_fallback(), BlendMode::SrcOver);
        assert_eq!(BlendMode::Screen.standard_fallback(), BlendMode::Screen);
    }

    #[test]
    fn opaque_paint() {
        assert!(Paint::from_color(Color::WHITE).is_opaque());
        assert!(!Paint::from_color(Color::WHITE.with_alpha(0.5)).is_opaque());
        assert!(!Paint::from_color(Color::WHITE)
            .with_blend(BlendMode::DstIn)
            .is_opaque());
    }

    #[test]
    fn fingerprint_ignores_nothing_relevant() {
        let a = Paint::from_color(Color::RED);
        let b = Paint::from_color(Color::RED);
        assert_eq!(a.merge_fingerprint(), b.merge_fingerprint());
        let c = Paint::from_color(Color::RED).with_blend(BlendMode::Plus);
        assert_ne!(a.merge_fingerprint(), c.merge_fingerprint());
    }
}
