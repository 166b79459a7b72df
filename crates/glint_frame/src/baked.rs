//! Baked operation state
//!
//! Baking resolves an operation's ambient-relative clip, transform and
//! alpha into an immutable frame-local snapshot. A baked state is created
//! at most once per operation per frame and never mutated afterwards; its
//! device bounds are always a subset of the ambient clip in effect at
//! bake time.

use std::sync::Arc;

use glint_core::{Mat4, Rect};

use crate::state::{AmbientFrame, RoundRectClip};

/// Which edges of an operation were cut by the ambient clip. Merge logic
/// uses these to decide whether a combined scissor is needed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClipSides(u8);

impl ClipSides {
    pub const NONE: ClipSides = ClipSides(0);
    pub const LEFT: ClipSides = ClipSides(1);
    pub const TOP: ClipSides = ClipSides(1 << 1);
    pub const RIGHT: ClipSides = ClipSides(1 << 2);
    pub const BOTTOM: ClipSides = ClipSides(1 << 3);

    pub fn union(self, other: ClipSides) -> ClipSides {
        ClipSides(self.0 | other.0)
    }

    pub fn contains(self, other: ClipSides) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

/// Round-rect mask applied to backward-projected content, expressed in
/// the projected node's local space.
#[derive(Clone, Debug, PartialEq)]
pub struct ProjectionMask {
    pub bounds: Rect,
    pub radius: f32,
}

/// Immutable snapshot of an operation's resolved drawing state
#[derive(Clone, Debug)]
pub struct BakedState {
    /// Resolved model transform (ambient at bake time)
    pub transform: Mat4,
    /// Device-space clip rect in effect
    pub clip: Rect,
    /// Device-space operation bounds, reduced to the clip
    pub clipped_bounds: Rect,
    pub clip_sides: ClipSides,
    /// Resolved opacity, the product of the ambient alpha chain
    pub alpha: f32,
    /// Round-rect clip mask carried for the executor, never intersected
    pub round_clip: Option<Arc<RoundRectClip>>,
    /// Outline mask for backward-projected content
    pub projection_mask: Option<Arc<ProjectionMask>>,
}

impl BakedState {
    /// True when downstream stages may snap this op's geometry to integer
    /// pixels without a matrix decomposition.
    pub fn is_pure_translate(&self) -> bool {
        self.transform.is_pure_translate()
    }
}

/// Resolve `local_bounds` against the ambient frame. Returns `None` when
/// the op can contribute nothing: empty clip intersection or zero alpha.
/// Rejection is the expected common case, not an error.
pub fn bake(
    local_bounds: Rect,
    frame: &AmbientFrame,
    projection_mask: Option<Arc<ProjectionMask>>,
) -> Option<BakedState> {
    if frame.alpha <= 0.0 {
        return None;
    }
    let device = frame.transform.map_rect(local_bounds);
    let clipped = device.intersection(&frame.clip);
    if clipped.is_empty() {
        return None;
    }

    let mut sides = ClipSides::NONE;
    if device.left < frame.clip.left {
        sides = sides.union(ClipSides::LEFT);
    }
    if device.top < frame.clip.top {
        sides = sides.union(ClipSides::TOP);
    }
    if device.right > frame.clip.right {
        sides = sides.union(ClipSides::RIGHT);
    }
    if device.bottom > frame.clip.bottom {
        sides = sides.union(ClipSides::BOTTOM);
    }

    Some(BakedState {
        transform: frame.transform,
        clip: frame.clip,
        clipped_bounds: clipped,
        clip_sides: sides,
        alpha: frame.alpha,
        round_clip: frame.round_clip.clone(),
        projection_mask,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(clip: Rect) -> AmbientFrame {
        AmbientFrame::root(clip)
    }

    #[test]
    fn empty_intersection_rejects() {
        let f = frame(Rect::from_wh(100.0, 100.0));
        assert!(bake(Rect::new(200.0, 200.0, 300.0, 300.0), &f, None).is_none());
    }

    #[test]
    fn zero_alpha_rejects() {
        let mut f = frame(Rect::from_wh(100.0, 100.0));
        f.alpha = 0.0;
        assert!(bake(Rect::from_wh(10.0, 10.0), &f, None).is_none());
    }

    #[test]
    fn clip_sides_reflect_cut_edges() {
        let mut f = frame(Rect::new(10.0, 10.0, 90.0, 90.0));
        f.transform = Mat4::IDENTITY;
        let state = bake(Rect::from_wh(100.0, 100.0), &f, None).unwrap();
        assert_eq!(state.clipped_bounds, Rect::new(10.0, 10.0, 90.0, 90.0));
        assert!(state.clip_sides.contains(ClipSides::LEFT));
        assert!(state.clip_sides.contains(ClipSides::TOP));
        assert!(state.clip_sides.contains(ClipSides::RIGHT));
        assert!(state.clip_sides.contains(ClipSides::BOTTOM));
    }

    #[test]
    fn unclipped_op_has_no_side_flags() {
        let f = frame(Rect::from_wh(100.0, 100.0));
        let state = bake(Rect::new(10.0, 10.0, 20.0, 20.0), &f, None).unwrap();
        assert!(state.clip_sides.is_none());
        assert_eq!(state.clipped_bounds, Rect::new(10.0, 10.0, 20.0, 20.0));
    }

    #[test]
    fn bounds_are_subset_of_clip() {
        let mut f = frame(Rect::new(5.0, 10.0, 55.0, 60.0));
        f.transform = Mat4::translation(5.0, 10.0, 0.0);
        let state = bake(Rect::from_wh(100.0, 100.0), &f, None).unwrap();
        assert!(f.clip.contains_rect(&state.clipped_bounds));
        assert_eq!(state.clipped_bounds, Rect::new(5.0, 10.0, 55.0, 60.0));
        assert!(state.clip_sides.contains(ClipSides::RIGHT));
        assert!(state.clip_sides.contains(ClipSides::BOTTOM));
        assert!(!state.clip_sides.contains(ClipSides::LEFT));
    }
}
