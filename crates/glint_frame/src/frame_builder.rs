//! Scene walker and batch scheduler
//!
//! `FrameBuilder` turns a recorded scene into an ordered list of draw
//! entries, once per frame, on a single render context. The walk applies
//! save/restore to an explicit ambient-state stack, resolves each op into
//! a baked state, coalesces compatible adjacent ops, drops occluded work,
//! synthesizes shadows under reorder barriers, and threads save-layer and
//! persistent-layer content through per-target builders. `replay` then
//! hands the entries to a `CommandSink` in the exact order the GPU
//! executor must issue them.

use std::sync::Arc;

use glint_core::{
    CanvasOp, DrawOp, LayerDrawOp, LayerKind, Mat4, NodeId, Outline, Paint, Point, Rect,
    RenderNode, ResolvedLight, ShadowOp, Vec3,
};

use crate::baked::{bake, ProjectionMask};
use crate::batch::{FrameEntry, MergedBatch, OpEntry};
use crate::layer::{
    clamp_layer_size, LayerPool, LayerState, LayerUpdateQueue, OffscreenLayer, SurfaceAllocator,
};
use crate::layer_builder::{LayerBuilder, TargetKind};
use crate::state::{AmbientFrame, RoundRectClip, StateStack};

/// Elevations within this range of zero stay in recording order.
const Z_EPSILON: f32 = 1e-3;

/// Scene light used to project shadows for elevated content
#[derive(Clone, Copy, Debug)]
pub struct LightGeometry {
    /// Light position in window space
    pub center: Vec3,
    pub radius: f32,
}

impl LightGeometry {
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }
}

impl Default for LightGeometry {
    fn default() -> Self {
        Self {
            center: Vec3::new(0.0, 0.0, 600.0),
            radius: 50.0,
        }
    }
}

/// Pipeline tuning knobs
#[derive(Clone, Debug)]
pub struct FrameConfig {
    /// Largest supported surface dimension; bigger save-layer requests
    /// are satisfied by scaling content to fit.
    pub max_layer_dimension: u32,
    pub avoid_overdraw: bool,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_layer_dimension: 4096,
            avoid_overdraw: true,
        }
    }
}

impl FrameConfig {
    /// Defaults with environment overrides applied, clamped to sane
    /// ranges. `GLINT_MAX_LAYER_DIM` sets the surface limit,
    /// `GLINT_AVOID_OVERDRAW=0` disables the occlusion filter.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_u32("GLINT_MAX_LAYER_DIM") {
            config.max_layer_dimension = v.clamp(256, 16384);
        }
        if let Ok(v) = std::env::var("GLINT_AVOID_OVERDRAW") {
            config.avoid_overdraw = !matches!(v.as_str(), "0" | "false");
        }
        tracing::debug!(
            max_layer_dimension = config.max_layer_dimension,
            avoid_overdraw = config.avoid_overdraw,
            "frame config"
        );
        config
    }
}

fn env_u32(name: &str) -> Option<u32> {
    std::env::var(name).ok()?.parse().ok()
}

/// Walk counters for one frame
#[derive(Clone, Debug, Default)]
pub struct FrameStats {
    /// Ops that survived baking and were deferred
    pub deferred: usize,
    /// Ops rejected by empty clip or zero alpha
    pub rejected: usize,
    /// Previously deferred entries dropped by later opaque content
    pub occluded: usize,
    /// Ops that ended up inside merged batches
    pub merged: usize,
    /// Entries handed to the sink at replay
    pub entries: usize,
}

/// Receiver of the final ordered output. Lifecycle methods default to
/// no-ops so sinks that only care about draws stay small.
pub trait CommandSink {
    fn begin_frame(&mut self, _width: u32, _height: u32, _repaint: Rect) {}
    fn end_frame(&mut self, _repaint: Rect) {}
    fn begin_temporary_layer(&mut self, _layer: &OffscreenLayer) {}
    fn begin_layer_repaint(&mut self, _layer: &OffscreenLayer, _damage: Rect) {}
    fn end_layer(&mut self) {}
    fn draw(&mut self, entry: &OpEntry);
    fn draw_merged(&mut self, batch: &MergedBatch);
    fn recycle_temporary_layer(&mut self, _layer: &OffscreenLayer) {}
}

/// Projection bookkeeping for one display list that owns a receiver
struct ListScope {
    receiver: NodeId,
    receiver_outline: Option<Outline>,
    receiver_frame: Option<AmbientFrame>,
    /// Projecting descendants with the total transform of their recorded
    /// draw site, in encounter order
    projectors: Vec<(Arc<RenderNode>, Mat4)>,
}

/// An elevated child inside a reorder chunk, captured by the pre-scan
struct ChunkChild {
    index: usize,
    z: f32,
    frame: AmbientFrame,
    node: Arc<RenderNode>,
}

/// Deferred frame building pipeline. One instance per frame; holds the
/// layer pool and surface allocator exclusively for its lifetime
/// (single-writer access per the shared-resource policy).
pub struct FrameBuilder<'a> {
    config: FrameConfig,
    light: LightGeometry,
    stack: StateStack,
    builders: Vec<LayerBuilder>,
    /// Stack of active target indices; the top receives deferred ops
    active: Vec<usize>,
    has_root: bool,
    stats: FrameStats,
    list_scopes: Vec<ListScope>,
    projection_mask: Option<Arc<ProjectionMask>>,
    pool: &'a mut LayerPool,
    alloc: &'a mut dyn SurfaceAllocator,
}

impl<'a> FrameBuilder<'a> {
    /// Frame with a primary target. `damage` is both the repaint region
    /// and the root clip.
    pub fn new(
        damage: Rect,
        width: u32,
        height: u32,
        light: LightGeometry,
        config: FrameConfig,
        pool: &'a mut LayerPool,
        alloc: &'a mut dyn SurfaceAllocator,
    ) -> Self {
        Self {
            config,
            light,
            stack: StateStack::new(damage),
            builders: vec![LayerBuilder::root(width, height, damage)],
            active: vec![0],
            has_root: true,
            stats: FrameStats::default(),
            list_scopes: Vec::new(),
            projection_mask: None,
            pool,
            alloc,
        }
    }

    /// Frame that only re-bakes persistent layers; no primary-target
    /// work is enqueued.
    pub fn layers_only(
        light: LightGeometry,
        config: FrameConfig,
        pool: &'a mut LayerPool,
        alloc: &'a mut dyn SurfaceAllocator,
    ) -> Self {
        Self {
            config,
            light,
            stack: StateStack::new(Rect::EMPTY),
            builders: Vec::new(),
            active: Vec::new(),
            has_root: false,
            stats: FrameStats::default(),
            list_scopes: Vec::new(),
            projection_mask: None,
            pool,
            alloc,
        }
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    // ─────────────────────────────────────────────────────────────────
    // Persistent layer updates
    // ─────────────────────────────────────────────────────────────────

    /// Defer re-bakes for every damaged persistent layer. Entries are
    /// processed in reverse queue order so that a layer consumed by a
    /// later-enqueued layer replays first.
    pub fn defer_layers(&mut self, queue: &LayerUpdateQueue) {
        for update in queue.entries().iter().rev() {
            self.defer_layer_update(&update.node, update.damage);
        }
    }

    fn defer_layer_update(&mut self, node: &Arc<RenderNode>, damage: Rect) {
        if node.props.layer != LayerKind::Render {
            tracing::warn!(node = node.id.0, "layer update for a node without a render layer");
            return;
        }
        let width = node.props.width().ceil() as u32;
        let height = node.props.height().ceil() as u32;
        let window_transform =
            Mat4::translation(node.props.bounds.left, node.props.bounds.top, 0.0);
        let layer_meta = match self
            .pool
            .begin_persistent(self.alloc, node.id, width, height, window_transform)
        {
            Ok(layer) => layer.clone(),
            Err(err) => {
                tracing::warn!(node = node.id.0, %err, "persistent layer unavailable, skipping update");
                return;
            }
        };

        let index = self.builders.len();
        self.builders
            .push(LayerBuilder::persistent(layer_meta, damage));
        self.active.push(index);

        // Layer content replays against identity with the damage rect as
        // clip; node properties apply when the layer itself is drawn.
        let count = self.stack.save();
        *self.stack.current_mut() = AmbientFrame::root(damage);
        self.defer_list(node);
        self.finish_target();
        self.stack.restore_to_count(count);
        self.active.pop();

        if let Some(layer) = self.pool.persistent_mut(node.id) {
            layer.state = LayerState::Ready;
        }
    }

    // ─────────────────────────────────────────────────────────────────
    // Node deferral
    // ─────────────────────────────────────────────────────────────────

    /// Defer a whole scene in order.
    pub fn defer_scene(&mut self, nodes: &[Arc<RenderNode>]) {
        for node in nodes {
            self.defer_node(node);
        }
    }

    /// Defer one root node into the primary target.
    pub fn defer_node(&mut self, node: &RenderNode) {
        assert!(
            self.has_root,
            "defer_node requires a frame built with a primary target"
        );
        self.defer_node_impl(node);
        self.finish_target();
    }

    /// Defer a root node behind an extra translate and clip, the way a
    /// windowing system positions a surface's content.
    pub fn defer_node_clipped(&mut self, dx: f32, dy: f32, clip: Rect, node: &RenderNode) {
        assert!(
            self.has_root,
            "defer_node_clipped requires a frame built with a primary target"
        );
        let count = self.stack.save();
        self.stack.translate(dx, dy);
        self.stack.clip_rect(clip);
        self.defer_node_impl(node);
        self.stack.restore_to_count(count);
        self.finish_target();
    }

    fn defer_node_impl(&mut self, node: &RenderNode) {
        let props = &node.props;
        if props.alpha <= 0.0 {
            self.stats.rejected += 1;
            return;
        }

        let count = self.stack.save();
        if props.bounds.left != 0.0 || props.bounds.top != 0.0 {
            self.stack.translate(props.bounds.left, props.bounds.top);
        }
        if !props.transform.is_identity() {
            self.stack.concat(&props.transform);
        }

        let local_bounds = Rect::from_wh(props.width(), props.height());
        if props.clip_to_bounds {
            let device = self.stack.current().transform.map_rect(local_bounds);
            if !device.intersects(&self.stack.current().clip) {
                self.stats.rejected += 1;
                self.stack.restore_to_count(count);
                return;
            }
            self.stack.clip_rect(local_bounds);
            if let Some(clip_bounds) = props.clip_bounds {
                self.stack.clip_rect(clip_bounds);
            }
        }

        // Reveal clips take priority over outline clips.
        if let Some(reveal) = props.reveal_clip {
            let center = self
                .stack
                .current()
                .transform
                .map_point(Point::new(reveal.x, reveal.y));
            self.stack.set_round_clip(RoundRectClip {
                inner_rect: Rect::new(center.x, center.y, center.x, center.y),
                radius: reveal.radius,
                high_priority: true,
            });
        } else if let Some(outline) = props.outline {
            if outline.should_clip {
                let inner = self
                    .stack
                    .current()
                    .transform
                    .map_rect(outline.bounds.inset(outline.radius));
                self.stack.set_round_clip(RoundRectClip {
                    inner_rect: inner,
                    radius: outline.radius,
                    high_priority: false,
                });
            }
        }

        // A projection receiver exposes its resolved frame to the scope
        // that owns it, so projected content inherits clip and alpha.
        if props.projection_receiver {
            if let Some(scope) = self.list_scopes.last_mut() {
                if scope.receiver == node.id {
                    scope.receiver_frame = Some(self.stack.current().clone());
                }
            }
        }

        // A node cached in a valid persistent layer is drawn from the
        // layer instead of replaying its subtree.
        if props.layer == LayerKind::Render {
            let cached = self.pool.persistent(node.id).and_then(|layer| {
                matches!(layer.state, LayerState::Ready | LayerState::Recording).then(|| {
                    (layer.id, layer.surface, layer.uv(), layer.paint.clone())
                })
            });
            if let Some((layer_id, surface, uv, mut paint)) = cached {
                paint.color.a *= props.alpha;
                let op = DrawOp::Layer(LayerDrawOp {
                    layer: layer_id,
                    surface,
                    dst: local_bounds,
                    uv,
                    paint,
                });
                self.defer_draw(op);
                self.stack.restore_to_count(count);
                return;
            }
            tracing::debug!(
                node = node.id.0,
                "render layer missing or unready, replaying subtree"
            );
        }

        if props.alpha < 1.0 {
            if props.overlapping_rendering {
                // Overlapping translucent content composites through a
                // synthesized save-layer so self-overlap blends once.
                let paint = Paint {
                    color: glint_core::Color::WHITE.with_alpha(props.alpha),
                    ..Default::default()
                };
                self.defer_save_layer(&node.display_list.ops, local_bounds, paint);
                self.stack.restore_to_count(count);
                return;
            }
            self.stack.multiply_alpha(props.alpha);
        }

        self.defer_list(node);
        self.stack.restore_to_count(count);
    }

    /// Walk one node's display list, wiring up backward projection when
    /// the list owns a projection receiver.
    fn defer_list(&mut self, node: &RenderNode) {
        let ops = &node.display_list.ops;
        let receiver = ops.iter().find_map(|op| match op {
            CanvasOp::Node(child) if child.props.projection_receiver => Some(child.clone()),
            _ => None,
        });
        match receiver {
            Some(receiver) => {
                let mut projectors = Vec::new();
                collect_projectors(
                    ops,
                    self.stack.current().transform,
                    receiver.id,
                    &mut projectors,
                );
                self.list_scopes.push(ListScope {
                    receiver: receiver.id,
                    receiver_outline: receiver.props.outline,
                    receiver_frame: None,
                    projectors,
                });
                self.defer_op_stream(ops);
                // Projectors not claimed by the receiver (it was
                // rejected) are dropped silently with it.
                self.list_scopes.pop();
            }
            None => self.defer_op_stream(ops),
        }
    }

    fn defer_op_stream(&mut self, ops: &[CanvasOp]) {
        let mut i = 0;
        while i < ops.len() {
            i = match &ops[i] {
                CanvasOp::Barrier(true) => self.defer_chunk(ops, i + 1),
                _ => self.defer_one(ops, i),
            };
        }
    }

    /// Defer the op at `i`, returning the index of the next op.
    fn defer_one(&mut self, ops: &[CanvasOp], i: usize) -> usize {
        match &ops[i] {
            CanvasOp::Save => {
                self.stack.save();
            }
            CanvasOp::Restore => self.stack.restore(),
            CanvasOp::ClipRect(rect) => self.stack.clip_rect(*rect),
            CanvasOp::Concat(matrix) => self.stack.concat(matrix),
            CanvasOp::Translate(dx, dy) => self.stack.translate(*dx, *dy),
            CanvasOp::Barrier(enabled) => {
                // A lone disable is a no-op; enables are handled by the
                // stream loop.
                debug_assert!(!*enabled, "barrier enable must be handled by defer_op_stream");
            }
            CanvasOp::BeginLayer { bounds, paint } => {
                let end = find_layer_end(ops, i);
                self.defer_save_layer(&ops[i + 1..end], *bounds, paint.clone());
                return end + 1;
            }
            CanvasOp::EndLayer => panic!("unmatched EndLayer in display list"),
            CanvasOp::Node(child) => self.defer_child(child),
            CanvasOp::Draw(op) => {
                assert!(
                    !op.is_synthesized_kind(),
                    "synthesized op kind `{}` found in a recorded display list",
                    op.kind_name()
                );
                self.defer_draw(op.clone());
            }
        }
        i + 1
    }

    fn defer_child(&mut self, child: &Arc<RenderNode>) {
        if child.props.project_backwards {
            // Drawn behind its receiver, never at the natural position.
            return;
        }
        let is_receiver = self
            .list_scopes
            .last()
            .is_some_and(|scope| scope.receiver == child.id);
        self.defer_node_impl(child);
        if is_receiver {
            self.defer_projected();
        }
    }

    /// Re-insert collected projectors immediately after the receiver's
    /// own content, masked by the receiver's outline.
    fn defer_projected(&mut self) {
        let Some(scope) = self.list_scopes.last_mut() else {
            return;
        };
        let projectors = std::mem::take(&mut scope.projectors);
        let Some(receiver_frame) = scope.receiver_frame.clone() else {
            return;
        };
        let receiver_outline = scope.receiver_outline;

        for (projector, site_transform) in projectors {
            let count = self.stack.save();
            {
                let top = self.stack.current_mut();
                // site_transform is receiver_total * (receiver_total⁻¹ *
                // projector_total): the projector keeps its own device
                // position while inheriting the receiver's clip chain.
                top.transform = site_transform;
                top.clip = receiver_frame.clip;
                top.alpha = receiver_frame.alpha;
                top.round_clip = receiver_frame.round_clip.clone();
            }

            let mask = receiver_outline.and_then(|outline| {
                let device = receiver_frame.transform.map_rect(outline.bounds);
                let content_total = site_transform
                    .mul(&Mat4::translation(
                        projector.props.bounds.left,
                        projector.props.bounds.top,
                        0.0,
                    ))
                    .mul(&projector.props.transform);
                content_total.invert().map(|inverse| {
                    Arc::new(ProjectionMask {
                        bounds: inverse.map_rect(device),
                        radius: outline.radius,
                    })
                })
            });

            let previous_mask = self.projection_mask.take();
            self.projection_mask = mask;
            self.defer_node_impl(&projector);
            self.projection_mask = previous_mask;
            self.stack.restore_to_count(count);
        }
    }

    // ─────────────────────────────────────────────────────────────────
    // Reorder chunks
    // ─────────────────────────────────────────────────────────────────

    /// Defer a barrier-delimited chunk: negative elevations first, then
    /// in-order content, then positive elevations, ties stable by
    /// recording index. Returns the index after the chunk.
    fn defer_chunk(&mut self, ops: &[CanvasOp], start: usize) -> usize {
        let mut end = start;
        while end < ops.len() && !matches!(ops[end], CanvasOp::Barrier(false)) {
            end += 1;
        }

        // Pre-scan on a cloned stack: capture each elevated child's
        // recorded ambient frame without emitting anything. Save-layer
        // spans are opaque to reordering, so the scan jumps over them.
        let mut elevated: Vec<ChunkChild> = Vec::new();
        {
            let mut dry = self.stack.clone();
            let entry_depth = dry.depth();
            let mut k = start;
            while k < end {
                match &ops[k] {
                    CanvasOp::BeginLayer { .. } => {
                        k = find_layer_end(ops, k) + 1;
                        continue;
                    }
                    CanvasOp::Save => {
                        dry.save();
                    }
                    CanvasOp::Restore | CanvasOp::EndLayer => {
                        if dry.depth() > entry_depth {
                            dry.restore();
                        }
                    }
                    CanvasOp::ClipRect(rect) => dry.clip_rect(*rect),
                    CanvasOp::Concat(matrix) => dry.concat(matrix),
                    CanvasOp::Translate(dx, dy) => dry.translate(*dx, *dy),
                    CanvasOp::Node(child) => {
                        let z = child.props.translation_z;
                        if z.abs() > Z_EPSILON {
                            elevated.push(ChunkChild {
                                index: k,
                                z,
                                frame: dry.current().clone(),
                                node: child.clone(),
                            });
                        }
                    }
                    _ => {}
                }
                k += 1;
            }
        }

        let mut negatives: Vec<usize> = (0..elevated.len())
            .filter(|&k| elevated[k].z < -Z_EPSILON)
            .collect();
        negatives.sort_by(|&a, &b| elevated[a].z.total_cmp(&elevated[b].z));
        let mut positives: Vec<usize> = (0..elevated.len())
            .filter(|&k| elevated[k].z > Z_EPSILON)
            .collect();
        positives.sort_by(|&a, &b| elevated[a].z.total_cmp(&elevated[b].z));

        for &k in &negatives {
            self.defer_elevated(&elevated[k], false);
        }

        let reordered: rustc_hash::FxHashSet<usize> =
            elevated.iter().map(|child| child.index).collect();
        let mut i = start;
        while i < end {
            match &ops[i] {
                CanvasOp::Node(_) if reordered.contains(&i) => i += 1,
                CanvasOp::Barrier(true) => {
                    // Nested enables are flattened into the current
                    // chunk; only exact behavior at chunk boundaries is
                    // contractual.
                    tracing::debug!("nested reorder barrier ignored");
                    i += 1;
                }
                _ => i = self.defer_one(ops, i),
            }
        }

        for &k in &positives {
            self.defer_elevated(&elevated[k], true);
        }

        let after = if end < ops.len() { end + 1 } else { end };
        after.max(i)
    }

    fn defer_elevated(&mut self, child: &ChunkChild, casts_shadow: bool) {
        let count = self.stack.save();
        *self.stack.current_mut() = child.frame.clone();
        if casts_shadow {
            if let Some(outline) = child.node.props.outline {
                if outline.casts_shadow() && child.node.props.alpha > 0.0 {
                    self.defer_shadow(&child.node, &child.frame, outline);
                }
            }
        }
        self.defer_child(&child.node);
        self.stack.restore_to_count(count);
    }

    /// Synthesize the shadow drawn beneath an elevated caster. The light
    /// position is resolved against the current layer target so shadows
    /// inside offscreen layers stay consistent.
    fn defer_shadow(&mut self, node: &RenderNode, frame: &AmbientFrame, outline: Outline) {
        let props = &node.props;
        let caster_transform = frame
            .transform
            .mul(&Mat4::translation(props.bounds.left, props.bounds.top, 0.0))
            .mul(&props.transform);
        let (offset_x, offset_y) = self.current_builder().window_offset;
        let light = ResolvedLight {
            center: Vec3::new(
                self.light.center.x - offset_x,
                self.light.center.y - offset_y,
                self.light.center.z,
            ),
            radius: self.light.radius,
        };
        let op = DrawOp::Shadow(ShadowOp {
            outline: outline.bounds,
            corner_radius: outline.radius,
            caster_alpha: props.alpha * outline.alpha,
            transform_xy: caster_transform,
            elevation: props.translation_z,
            light,
        });
        // Shadow geometry is produced in device space; bake against an
        // identity transform but the recorded clip chain, which is the
        // pre-barrier clip.
        let shadow_frame = AmbientFrame {
            transform: Mat4::IDENTITY,
            clip: frame.clip,
            alpha: frame.alpha,
            round_clip: frame.round_clip.clone(),
        };
        self.defer_draw_with_frame(op, &shadow_frame);
    }

    // ─────────────────────────────────────────────────────────────────
    // Save-layers
    // ─────────────────────────────────────────────────────────────────

    /// Defer a save-layer scope: acquire a sized temporary layer, walk
    /// the content into it, then defer a single layer reference into the
    /// parent target at the save point.
    fn defer_save_layer(&mut self, content: &[CanvasOp], bounds: Rect, paint: Paint) {
        if paint.color.a <= 0.0 {
            self.stats.rejected += 1;
            return;
        }
        let frame = self.stack.current().clone();
        let device = frame.transform.map_rect(bounds);
        let clipped = device.intersection(&frame.clip).round_out();
        if clipped.is_empty() {
            // The scope's content cannot appear anywhere; skip it whole.
            self.stats.rejected += 1;
            return;
        }

        let natural_w = clipped.width() as u32;
        let natural_h = clipped.height() as u32;
        let sizing = clamp_layer_size(natural_w, natural_h, self.config.max_layer_dimension);
        if sizing.scale != (1.0, 1.0) {
            tracing::debug!(
                natural_w,
                natural_h,
                width = sizing.width,
                height = sizing.height,
                "save-layer exceeds max surface size, scaling content to fit"
            );
        }

        let mut layer = match self
            .pool
            .acquire_temporary(self.alloc, sizing.width, sizing.height)
        {
            Ok(layer) => layer,
            Err(err) => {
                // Degraded pass-through: draw the children directly into
                // the parent rather than losing the subtree.
                tracing::warn!(%err, "save-layer degraded to pass-through");
                let count = self.stack.save();
                self.stack.multiply_alpha(paint.color.a);
                self.defer_op_stream(content);
                self.stack.restore_to_count(count);
                return;
            }
        };
        layer.paint = paint.clone();
        layer.content_scale = sizing.scale;
        let (layer_id, surface, uv) = (layer.id, layer.surface, layer.uv());

        let parent_offset = self.current_builder().window_offset;
        let window_offset = (
            parent_offset.0 + clipped.left,
            parent_offset.1 + clipped.top,
        );
        let index = self.builders.len();
        self.builders
            .push(LayerBuilder::temporary(layer, window_offset));
        self.active.push(index);

        let count = self.stack.save();
        let content_transform = Mat4::scale(sizing.scale.0, sizing.scale.1, 1.0)
            .mul(&Mat4::translation(-clipped.left, -clipped.top, 0.0))
            .mul(&frame.transform);
        *self.stack.current_mut() = AmbientFrame {
            transform: content_transform,
            clip: Rect::from_wh(sizing.width as f32, sizing.height as f32),
            alpha: 1.0,
            round_clip: None,
        };
        self.defer_op_stream(content);
        self.finish_target();
        self.stack.restore_to_count(count);
        self.active.pop();

        // The finished layer composites at its device rect with an
        // identity local transform; the paint snapshot carries alpha,
        // blend mode and color filter.
        let op = DrawOp::Layer(LayerDrawOp {
            layer: layer_id,
            surface,
            dst: clipped,
            uv,
            paint,
        });
        let draw_frame = AmbientFrame {
            transform: Mat4::IDENTITY,
            clip: frame.clip,
            alpha: frame.alpha,
            round_clip: frame.round_clip.clone(),
        };
        self.defer_draw_with_frame(op, &draw_frame);
    }

    // ─────────────────────────────────────────────────────────────────
    // Op deferral
    // ─────────────────────────────────────────────────────────────────

    fn defer_draw(&mut self, op: DrawOp) {
        let frame = self.stack.current().clone();
        self.defer_draw_with_frame(op, &frame);
    }

    fn defer_draw_with_frame(&mut self, op: DrawOp, frame: &AmbientFrame) {
        let local = op.local_bounds();
        match bake(local, frame, self.projection_mask.clone()) {
            Some(state) => {
                let index = *self.active.last().expect("no active target");
                self.builders[index].defer(op, state, self.config.avoid_overdraw, &mut self.stats);
            }
            None => self.stats.rejected += 1,
        }
    }

    fn current_builder(&mut self) -> &mut LayerBuilder {
        let index = *self.active.last().expect("no active target");
        &mut self.builders[index]
    }

    fn finish_target(&mut self) {
        let index = *self.active.last().expect("no active target");
        self.builders[index].flush_open(&mut self.stats);
    }

    // ─────────────────────────────────────────────────────────────────
    // Replay
    // ─────────────────────────────────────────────────────────────────

    /// Emit the frame's ordered output: each offscreen target in reverse
    /// creation order (inner layers before the layers that consume
    /// them), then the primary frame, then temporary-layer recycling.
    pub fn replay<S: CommandSink>(mut self, sink: &mut S) -> FrameStats {
        debug_assert!(
            self.active.len() <= usize::from(self.has_root),
            "replay with unbalanced layer targets"
        );
        for builder in &mut self.builders {
            builder.flush_open(&mut self.stats);
        }
        self.stats.entries = self.builders.iter().map(|b| b.entries().len()).sum();

        let first_layer = usize::from(self.has_root);
        let mut temporaries: Vec<OffscreenLayer> = Vec::new();
        for index in (first_layer..self.builders.len()).rev() {
            let builder = &mut self.builders[index];
            match &builder.kind {
                TargetKind::Temporary { layer } => {
                    let layer = layer.as_ref().expect("temporary layer present until replay");
                    sink.begin_temporary_layer(layer);
                }
                TargetKind::Persistent { layer, damage, .. } => {
                    sink.begin_layer_repaint(layer, *damage);
                }
                TargetKind::Root { .. } => unreachable!("root target is never a layer"),
            }
            dispatch_entries(sink, builder.entries());
            sink.end_layer();
            if let Some(layer) = builder.take_layer() {
                temporaries.push(layer);
            }
        }

        if self.has_root {
            let builder = &self.builders[0];
            let (width, height, repaint) = match &builder.kind {
                TargetKind::Root {
                    width,
                    height,
                    repaint,
                } => (*width, *height, *repaint),
                _ => unreachable!("builder 0 is the root target"),
            };
            sink.begin_frame(width, height, repaint);
            dispatch_entries(sink, builder.entries());
            sink.end_frame(repaint);
        }

        for layer in temporaries {
            sink.recycle_temporary_layer(&layer);
            self.pool.release(self.alloc, layer);
        }

        self.stats.clone()
    }
}

impl Drop for FrameBuilder<'_> {
    fn drop(&mut self) {
        // An abandoned frame (superseded before replay) must release its
        // temporary layers; persistent layers keep their content and
        // their damage is not cleared.
        for builder in &mut self.builders {
            if let Some(layer) = builder.take_layer() {
                tracing::debug!(id = layer.id.0, "abandoned frame released temporary layer");
                self.pool.release(self.alloc, layer);
            }
        }
    }
}

fn dispatch_entries<S: CommandSink>(sink: &mut S, entries: &[FrameEntry]) {
    for entry in entries {
        match entry {
            FrameEntry::Op(op) => sink.draw(op),
            FrameEntry::Merged(batch) => sink.draw_merged(batch),
        }
    }
}

/// Index of the `EndLayer` matching the `BeginLayer` at `begin`.
fn find_layer_end(ops: &[CanvasOp], begin: usize) -> usize {
    let mut depth = 0usize;
    for (i, op) in ops.iter().enumerate().skip(begin + 1) {
        match op {
            CanvasOp::BeginLayer { .. } => depth += 1,
            CanvasOp::EndLayer => {
                if depth == 0 {
                    return i;
                }
                depth -= 1;
            }
            _ => {}
        }
    }
    panic!("BeginLayer without a matching EndLayer");
}

/// Transform-only scan collecting backward-projecting descendants and
/// their draw-site transforms. Record-time clips along the path are
/// ignored, matching how projected content escapes its parent's clip.
/// Subtrees owning their own receiver keep their projectors (nearest
/// enclosing receiver wins).
fn collect_projectors(
    ops: &[CanvasOp],
    base: Mat4,
    receiver_id: NodeId,
    out: &mut Vec<(Arc<RenderNode>, Mat4)>,
) {
    let mut transforms: Vec<Mat4> = vec![base];
    for op in ops {
        match op {
            CanvasOp::Save | CanvasOp::BeginLayer { .. } => {
                let top = *transforms.last().expect("transform stack seeded");
                transforms.push(top);
            }
            CanvasOp::Restore | CanvasOp::EndLayer => {
                if transforms.len() > 1 {
                    transforms.pop();
                }
            }
            CanvasOp::Translate(dx, dy) => {
                let top = transforms.last_mut().expect("transform stack seeded");
                *top = top.mul(&Mat4::translation(*dx, *dy, 0.0));
            }
            CanvasOp::Concat(matrix) => {
                let top = transforms.last_mut().expect("transform stack seeded");
                *top = top.mul(matrix);
            }
            CanvasOp::Node(child) => {
                if child.id == receiver_id {
                    continue;
                }
                let site = *transforms.last().expect("transform stack seeded");
                if child.props.project_backwards {
                    out.push((child.clone(), site));
                    continue;
                }
                let owns_receiver = child.display_list.ops.iter().any(|op| {
                    matches!(op, CanvasOp::Node(grandchild) if grandchild.props.projection_receiver)
                });
                if owns_receiver {
                    continue;
                }
                let child_base = site
                    .mul(&Mat4::translation(
                        child.props.bounds.left,
                        child.props.bounds.top,
                        0.0,
                    ))
                    .mul(&child.props.transform);
                collect_projectors(&child.display_list.ops, child_base, receiver_id, out);
            }
            _ => {}
        }
    }
}
