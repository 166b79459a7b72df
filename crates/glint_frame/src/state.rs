//! Ambient state stack
//!
//! The walker mutates one of these per target during a single
//! top-to-bottom pass. It is an explicit arena of frames rather than
//! language recursion so save-layer and barrier handling can be exercised
//! independently of tree depth, and so a chunk pre-scan can run on a
//! cheap clone.

use std::sync::Arc;

use smallvec::SmallVec;

use glint_core::{Mat4, Rect};

/// Round-rect clip carried alongside the rectangular clip. It is never
/// intersected here; the executor applies the mask. High-priority masks
/// come from reveal-clip animations and win over outline clips.
#[derive(Clone, Debug, PartialEq)]
pub struct RoundRectClip {
    /// Device-space rect inset by the corner radius
    pub inner_rect: Rect,
    pub radius: f32,
    pub high_priority: bool,
}

/// One frame of ambient state: everything an operation inherits from its
/// position in the scene.
#[derive(Clone, Debug)]
pub struct AmbientFrame {
    pub transform: Mat4,
    /// Device-space clip rect
    pub clip: Rect,
    pub alpha: f32,
    pub round_clip: Option<Arc<RoundRectClip>>,
}

impl AmbientFrame {
    pub fn root(clip: Rect) -> Self {
        Self {
            transform: Mat4::IDENTITY,
            clip,
            alpha: 1.0,
            round_clip: None,
        }
    }
}

/// Explicit save/restore stack of ambient frames
#[derive(Clone, Debug)]
pub struct StateStack {
    frames: SmallVec<[AmbientFrame; 16]>,
}

impl StateStack {
    pub fn new(clip: Rect) -> Self {
        let mut frames = SmallVec::new();
        frames.push(AmbientFrame::root(clip));
        Self { frames }
    }

    pub fn current(&self) -> &AmbientFrame {
        self.frames.last().expect("state stack is never empty")
    }

    pub fn current_mut(&mut self) -> &mut AmbientFrame {
        self.frames.last_mut().expect("state stack is never empty")
    }

    /// Push a copy of the current frame; returns the count to pass to
    /// `restore_to_count` to unwind this save.
    pub fn save(&mut self) -> usize {
        let count = self.frames.len();
        let top = self.current().clone();
        self.frames.push(top);
        count
    }

    pub fn restore(&mut self) {
        if self.frames.len() <= 1 {
            panic!("restore would pop the root ambient frame");
        }
        self.frames.pop();
    }

    pub fn restore_to_count(&mut self, count: usize) {
        while self.frames.len() > count.max(1) {
            self.frames.pop();
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn translate(&mut self, dx: f32, dy: f32) {
        let top = self.current_mut();
        top.transform = top.transform.mul(&Mat4::translation(dx, dy, 0.0));
    }

    pub fn concat(&mut self, matrix: &Mat4) {
        let top = self.current_mut();
        top.transform = top.transform.mul(matrix);
    }

    /// Intersect the clip with a rect given in the current local space.
    pub fn clip_rect(&mut self, local: Rect) {
        let top = self.current_mut();
        let device = top.transform.map_rect(local);
        top.clip = top.clip.intersection(&device);
    }

    pub fn multiply_alpha(&mut self, alpha: f32) {
        self.current_mut().alpha *= alpha;
    }

    pub fn set_round_clip(&mut self, clip: RoundRectClip) {
        self.current_mut().round_clip = Some(Arc::new(clip));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_restore_round_trip() {
        let mut stack = StateStack::new(Rect::from_wh(100.0, 100.0));
        let count = stack.save();
        stack.translate(10.0, 20.0);
        stack.clip_rect(Rect::from_wh(10.0, 10.0));
        assert_eq!(stack.current().clip, Rect::new(10.0, 20.0, 20.0, 30.0));
        stack.restore_to_count(count);
        assert_eq!(stack.depth(), 1);
        assert_eq!(stack.current().clip, Rect::from_wh(100.0, 100.0));
        assert!(stack.current().transform.is_identity());
    }

    #[test]
    fn clip_is_monotonic() {
        let mut stack = StateStack::new(Rect::from_wh(100.0, 100.0));
        stack.clip_rect(Rect::new(200.0, 200.0, 400.0, 400.0));
        assert!(stack.current().clip.is_empty());
        // clipping never grows back
        stack.clip_rect(Rect::from_wh(100.0, 100.0));
        assert!(stack.current().clip.is_empty());
    }

    #[test]
    #[should_panic(expected = "root ambient frame")]
    fn restore_past_root_panics() {
        let mut stack = StateStack::new(Rect::from_wh(1.0, 1.0));
        stack.restore();
    }
}
