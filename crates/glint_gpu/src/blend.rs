//! Blend state resolution
//!
//! Compositing modes resolve to explicit source/destination factor pairs.
//! Disabled blending is representable only as the Zero/Zero pair, never
//! as a missing value: the executor performs no inference of its own.

use glint_core::BlendMode;

/// Resolved blend factors for one draw call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Blend {
    pub src: wgpu::BlendFactor,
    pub dst: wgpu::BlendFactor,
}

impl Blend {
    /// The explicit "blending off" encoding.
    pub const DISABLED: Blend = Blend {
        src: wgpu::BlendFactor::Zero,
        dst: wgpu::BlendFactor::Zero,
    };

    pub fn is_disabled(&self) -> bool {
        *self == Self::DISABLED
    }
}

/// Resolve a compositing mode to blend factors. Fully opaque SrcOver
/// content takes the no-blend fast path; advanced modes fall back to the
/// nearest standard mode rather than failing the frame.
pub fn resolve_blend(mode: BlendMode, opaque_content: bool) -> Blend {
    let mode = if mode.is_advanced() {
        let fallback = mode.standard_fallback();
        tracing::debug!(?mode, ?fallback, "advanced blend mode degraded");
        fallback
    } else {
        mode
    };

    if opaque_content && matches!(mode, BlendMode::SrcOver | BlendMode::Src) {
        return Blend::DISABLED;
    }

    use wgpu::BlendFactor as F;
    let (src, dst) = match mode {
        BlendMode::Clear => (F::Zero, F::Zero),
        BlendMode::Src => (F::One, F::Zero),
        BlendMode::SrcOver => (F::One, F::OneMinusSrcAlpha),
        BlendMode::DstOver => (F::OneMinusDstAlpha, F::One),
        BlendMode::SrcIn => (F::DstAlpha, F::Zero),
        BlendMode::DstIn => (F::Zero, F::SrcAlpha),
        BlendMode::SrcOut => (F::OneMinusDstAlpha, F::Zero),
        BlendMode::DstOut => (F::Zero, F::OneMinusSrcAlpha),
        BlendMode::SrcAtop => (F::DstAlpha, F::OneMinusSrcAlpha),
        BlendMode::DstAtop => (F::OneMinusDstAlpha, F::SrcAlpha),
        BlendMode::Xor => (F::OneMinusDstAlpha, F::OneMinusSrcAlpha),
        BlendMode::Plus => (F::One, F::One),
        BlendMode::Modulate => (F::Zero, F::Src),
        BlendMode::Screen => (F::One, F::OneMinusSrc),
        BlendMode::Overlay | BlendMode::Darken | BlendMode::Lighten => {
            unreachable!("advanced modes degrade before factor resolution")
        }
    };
    Blend { src, dst }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opaque_srcover_disables_blending() {
        assert!(resolve_blend(BlendMode::SrcOver, true).is_disabled());
    }

    #[test]
    fn translucent_srcover_blends() {
        let blend = resolve_blend(BlendMode::SrcOver, false);
        assert_eq!(blend.src, wgpu::BlendFactor::One);
        assert_eq!(blend.dst, wgpu::BlendFactor::OneMinusSrcAlpha);
    }

    #[test]
    fn clear_and_disabled_share_factors_intentionally() {
        // Clear writes zeroes; disabled skips the blend unit. The factor
        // pair is the same, the executor keys off the fill alpha.
        assert_eq!(resolve_blend(BlendMode::Clear, false), Blend::DISABLED);
    }

    #[test]
    fn advanced_mode_degrades_to_srcover() {
        let blend = resolve_blend(BlendMode::Overlay, false);
        assert_eq!(blend, resolve_blend(BlendMode::SrcOver, false));
    }

    #[test]
    fn plus_is_additive() {
        let blend = resolve_blend(BlendMode::Plus, true);
        assert_eq!(blend.src, wgpu::BlendFactor::One);
        assert_eq!(blend.dst, wgpu::BlendFactor::One);
    }
}
