//! Overdraw avoidance
//!
//! The coverage set accumulates, per target and per frame, the device
//! rects known to be filled by fully opaque content. Rejection only runs
//! paint-order-outward: an opaque op deferred later drops earlier entries
//! it completely covers, never the reverse. Coverage accumulation is
//! monotonic within a frame and starts empty at frame start.

use glint_core::{DrawOp, Rect};

use crate::baked::BakedState;

/// Device rect an op is guaranteed to fill with opaque pixels, when one
/// exists. Conservative: anything uncertain returns `None`.
///
/// Requirements: opaque paint (full alpha, SrcOver/Src, no color filter),
/// full ambient alpha, no round-rect or projection mask, a transform
/// that keeps rects axis-aligned, and for bitmaps a texture without an
/// alpha channel.
pub fn opaque_coverage(op: &DrawOp, state: &BakedState) -> Option<Rect> {
    if state.alpha < 1.0
        || state.round_clip.is_some()
        || state.projection_mask.is_some()
        || !state.transform.is_rect_to_rect()
    {
        return None;
    }
    let opaque = match op {
        DrawOp::Rect(r) => r.paint.is_opaque(),
        DrawOp::Bitmap(b) => b.texture.opaque && b.paint.is_opaque(),
        // A rect list covers its union only if the members tile it, which
        // is not worth proving here.
        DrawOp::SimpleRects(_)
        | DrawOp::TextRun(_)
        | DrawOp::Shadow(_)
        | DrawOp::Layer(_) => false,
    };
    opaque.then_some(state.clipped_bounds)
}

/// Monotonic record of opaque-covered regions for one target
#[derive(Debug, Default)]
pub struct OpaqueCoverage {
    rects: Vec<Rect>,
}

impl OpaqueCoverage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, rect: Rect) {
        if rect.is_empty() {
            return;
        }
        // Keep the set small: skip rects already covered, and absorb
        // rects the new one covers.
        if self.rects.iter().any(|r| r.contains_rect(&rect)) {
            return;
        }
        self.rects.retain(|r| !rect.contains_rect(r));
        self.rects.push(rect);
    }

    pub fn covers(&self, rect: &Rect) -> bool {
        self.rects.iter().any(|r| r.contains_rect(rect))
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baked::bake;
    use crate::state::AmbientFrame;
    use glint_core::{Color, Paint, RectOp};

    #[test]
    fn opaque_rect_reports_coverage() {
        let frame = AmbientFrame::root(Rect::from_wh(100.0, 100.0));
        let op = DrawOp::Rect(RectOp {
            rect: Rect::from_wh(50.0, 50.0),
            paint: Paint::from_color(Color::WHITE),
        });
        let state = bake(Rect::from_wh(50.0, 50.0), &frame, None).unwrap();
        assert_eq!(opaque_coverage(&op, &state), Some(Rect::from_wh(50.0, 50.0)));
    }

    #[test]
    fn translucent_rect_reports_nothing() {
        let frame = AmbientFrame::root(Rect::from_wh(100.0, 100.0));
        let op = DrawOp::Rect(RectOp {
            rect: Rect::from_wh(50.0, 50.0),
            paint: Paint::from_color(Color::WHITE.with_alpha(0.5)),
        });
        let state = bake(Rect::from_wh(50.0, 50.0), &frame, None).unwrap();
        assert_eq!(opaque_coverage(&op, &state), None);
    }

    #[test]
    fn ambient_alpha_defeats_coverage() {
        let mut frame = AmbientFrame::root(Rect::from_wh(100.0, 100.0));
        frame.alpha = 0.5;
        let op = DrawOp::Rect(RectOp {
            rect: Rect::from_wh(50.0, 50.0),
            paint: Paint::from_color(Color::WHITE),
        });
        let state = bake(Rect::from_wh(50.0, 50.0), &frame, None).unwrap();
        assert_eq!(opaque_coverage(&op, &state), None);
    }

    #[test]
    fn coverage_set_absorbs_subsets() {
        let mut cov = OpaqueCoverage::new();
        cov.add(Rect::from_wh(10.0, 10.0));
        cov.add(Rect::from_wh(100.0, 100.0));
        assert!(cov.covers(&Rect::from_wh(10.0, 10.0)));
        assert!(cov.covers(&Rect::new(50.0, 50.0, 100.0, 100.0)));
        assert!(!cov.covers(&Rect::new(50.0, 50.0, 101.0, 100.0)));
    }
}
