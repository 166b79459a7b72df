//! Offscreen layer lifecycle
//!
//! Temporary layers back save-layer scopes for one frame; persistent
//! layers cache a node subtree across frames and re-bake only damaged
//! regions. Surfaces are created and destroyed by an external allocator
//! behind opaque handles; this module owns sizing, pooling and the
//! `Idle -> Recording -> Ready -> Recycled` state machine. Pool access is
//! confined to the single render context (the pool is passed in `&mut`
//! for the duration of a frame).

use rustc_hash::FxHashMap;
use thiserror::Error;

use glint_core::{LayerId, Mat4, NodeId, Paint, Rect, SurfaceHandle};

/// Lifecycle of an offscreen layer
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LayerState {
    #[default]
    Idle,
    Recording,
    Ready,
    Recycled,
}

/// Failure of the external surface allocator. Never fatal to a frame:
/// the caller degrades the enclosing save-layer to a pass-through.
#[derive(Debug, Error)]
pub enum AllocError {
    #[error("surface allocation of {width}x{height} failed")]
    SurfaceUnavailable { width: u32, height: u32 },
    #[error("requested layer has zero area ({width}x{height})")]
    ZeroArea { width: u32, height: u32 },
}

/// External GPU-surface allocator. Create/bind/destroy of the real
/// surfaces is delegated; only opaque handles cross this boundary.
pub trait SurfaceAllocator {
    fn create_surface(&mut self, width: u32, height: u32) -> Result<SurfaceHandle, AllocError>;
    fn destroy_surface(&mut self, surface: SurfaceHandle);
}

/// A GPU-backable composition surface plus the metadata needed to draw
/// it back into a parent target.
#[derive(Clone, Debug)]
pub struct OffscreenLayer {
    pub id: LayerId,
    pub surface: SurfaceHandle,
    /// Allocated texture dimensions (bucket-rounded)
    pub width: u32,
    pub height: u32,
    /// Dimensions of the content actually rendered into the surface
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub state: LayerState,
    /// Paint snapshot applied when the layer is composited: alpha, blend
    /// mode, color filter
    pub paint: Paint,
    /// Scale applied to content when the natural bounds exceeded the
    /// maximum surface dimension; the layer draw compensates for it.
    pub content_scale: (f32, f32),
    /// Device transform of the layer origin, used to resolve light
    /// positions for shadows drawn inside the layer (persistent layers).
    pub window_transform: Mat4,
}

impl OffscreenLayer {
    /// Normalized texture sub-rect holding the content.
    pub fn uv(&self) -> [f32; 4] {
        [
            0.0,
            0.0,
            self.viewport_width as f32 / self.width as f32,
            self.viewport_height as f32 / self.height as f32,
        ]
    }

    fn memory_bytes(&self) -> u64 {
        // RGBA8
        self.width as u64 * self.height as u64 * 4
    }
}

/// Size class for pooling; reuse searches the layer's own class first,
/// then larger classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SizeBucket {
    Small,  // <= 128
    Medium, // <= 256
    Large,  // <= 512
    XLarge, // > 512
}

impl SizeBucket {
    fn from_size(width: u32, height: u32) -> Self {
        let max_dim = width.max(height);
        if max_dim <= 128 {
            Self::Small
        } else if max_dim <= 256 {
            Self::Medium
        } else if max_dim <= 512 {
            Self::Large
        } else {
            Self::XLarge
        }
    }

    fn rounded_size(&self, width: u32, height: u32) -> (u32, u32) {
        match self {
            Self::Small => (width.max(128), height.max(128)),
            Self::Medium => (width.max(256), height.max(256)),
            Self::Large => (width.max(512), height.max(512)),
            // Round to 64px increments for better reuse
            Self::XLarge => (width.div_ceil(64) * 64, height.div_ceil(64) * 64),
        }
    }
}

/// Pool performance counters
#[derive(Clone, Debug, Default)]
pub struct PoolStats {
    pub hits: u64,
    pub misses: u64,
    pub pool_count: usize,
    pub pool_memory_bytes: u64,
    pub persistent_count: usize,
}

impl PoolStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// The result of clamping a layer request to the maximum surface size
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LayerSizing {
    pub width: u32,
    pub height: u32,
    pub scale: (f32, f32),
}

/// Clamp requested content dimensions to `max_dimension`, scaling the
/// content to fit when it exceeds the limit. Lossy by design; the scale
/// is recorded so the final layer draw compensates.
pub fn clamp_layer_size(width: u32, height: u32, max_dimension: u32) -> LayerSizing {
    let mut sizing = LayerSizing {
        width,
        height,
        scale: (1.0, 1.0),
    };
    if width > max_dimension {
        sizing.scale.0 = max_dimension as f32 / width as f32;
        sizing.width = max_dimension;
    }
    if height > max_dimension {
        sizing.scale.1 = max_dimension as f32 / height as f32;
        sizing.height = max_dimension;
    }
    sizing
}

/// Reuse pool for temporary layers plus the registry of persistent ones.
///
/// Size-class buckets avoid repeated surface allocation during steady
/// rendering; a full bucket destroys the released surface instead of
/// growing without bound.
#[derive(Debug)]
pub struct LayerPool {
    next_id: u64,
    pool_small: Vec<OffscreenLayer>,
    pool_medium: Vec<OffscreenLayer>,
    pool_large: Vec<OffscreenLayer>,
    pool_xlarge: Vec<OffscreenLayer>,
    persistent: FxHashMap<NodeId, OffscreenLayer>,
    max_per_bucket: usize,
    stats: PoolStats,
}

impl Default for LayerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl LayerPool {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            pool_small: Vec::with_capacity(4),
            pool_medium: Vec::with_capacity(4),
            pool_large: Vec::with_capacity(4),
            pool_xlarge: Vec::with_capacity(4),
            persistent: FxHashMap::default(),
            max_per_bucket: 4,
            stats: PoolStats::default(),
        }
    }

    fn pool_mut(&mut self, bucket: SizeBucket) -> &mut Vec<OffscreenLayer> {
        match bucket {
            SizeBucket::Small => &mut self.pool_small,
            SizeBucket::Medium => &mut self.pool_medium,
            SizeBucket::Large => &mut self.pool_large,
            SizeBucket::XLarge => &mut self.pool_xlarge,
        }
    }

    fn take_pooled(&mut self, width: u32, height: u32) -> Option<OffscreenLayer> {
        let primary = SizeBucket::from_size(width, height);
        let search = match primary {
            SizeBucket::Small => vec![SizeBucket::Small, SizeBucket::Medium, SizeBucket::Large],
            SizeBucket::Medium => vec![SizeBucket::Medium, SizeBucket::Large],
            SizeBucket::Large => vec![SizeBucket::Large],
            SizeBucket::XLarge => vec![SizeBucket::XLarge],
        };
        for bucket in search {
            let pool = self.pool_mut(bucket);
            if let Some(index) = pool
                .iter()
                .position(|l| l.width >= width && l.height >= height)
            {
                return Some(pool.swap_remove(index));
            }
        }
        None
    }

    /// Acquire a temporary layer whose content area is `width`x`height`.
    /// Zero-area requests fail; callers treat that as silent rejection.
    pub fn acquire_temporary(
        &mut self,
        alloc: &mut dyn SurfaceAllocator,
        width: u32,
        height: u32,
    ) -> Result<OffscreenLayer, AllocError> {
        if width == 0 || height == 0 {
            return Err(AllocError::ZeroArea { width, height });
        }

        let mut layer = if let Some(pooled) = self.take_pooled(width, height) {
            self.stats.hits += 1;
            pooled
        } else {
            self.stats.misses += 1;
            let bucket = SizeBucket::from_size(width, height);
            let (tex_w, tex_h) = bucket.rounded_size(width, height);
            let surface = alloc.create_surface(tex_w, tex_h)?;
            OffscreenLayer {
                id: LayerId(0),
                surface,
                width: tex_w,
                height: tex_h,
                viewport_width: width,
                viewport_height: height,
                state: LayerState::Idle,
                paint: Paint::default(),
                content_scale: (1.0, 1.0),
                window_transform: Mat4::IDENTITY,
            }
        };
        layer.id = LayerId(self.next_id);
        self.next_id += 1;
        layer.viewport_width = width;
        layer.viewport_height = height;
        layer.state = LayerState::Recording;
        layer.paint = Paint::default();
        layer.content_scale = (1.0, 1.0);
        layer.window_transform = Mat4::IDENTITY;
        self.update_pool_stats();
        tracing::trace!(
            id = layer.id.0,
            width,
            height,
            tex_width = layer.width,
            tex_height = layer.height,
            "acquired temporary layer"
        );
        Ok(layer)
    }

    /// Return a temporary layer to the pool, or destroy it when its
    /// bucket is full.
    pub fn release(&mut self, alloc: &mut dyn SurfaceAllocator, mut layer: OffscreenLayer) {
        layer.state = LayerState::Recycled;
        let bucket = SizeBucket::from_size(layer.width, layer.height);
        let max = self.max_per_bucket;
        let pool = self.pool_mut(bucket);
        if pool.len() < max {
            layer.state = LayerState::Idle;
            pool.push(layer);
        } else {
            tracing::trace!(id = layer.id.0, "layer bucket full, destroying surface");
            alloc.destroy_surface(layer.surface);
        }
        self.update_pool_stats();
    }

    /// Look up the persistent layer cached for a node.
    pub fn persistent(&self, node: NodeId) -> Option<&OffscreenLayer> {
        self.persistent.get(&node)
    }

    pub fn persistent_mut(&mut self, node: NodeId) -> Option<&mut OffscreenLayer> {
        self.persistent.get_mut(&node)
    }

    /// Fetch or create the persistent layer for a node, moving it to
    /// `Recording` for a re-bake.
    pub fn begin_persistent(
        &mut self,
        alloc: &mut dyn SurfaceAllocator,
        node: NodeId,
        width: u32,
        height: u32,
        window_transform: Mat4,
    ) -> Result<&mut OffscreenLayer, AllocError> {
        if width == 0 || height == 0 {
            return Err(AllocError::ZeroArea { width, height });
        }
        let needs_create = match self.persistent.get(&node) {
            Some(layer) => layer.viewport_width != width || layer.viewport_height != height,
            None => true,
        };
        if needs_create {
            if let Some(old) = self.persistent.remove(&node) {
                alloc.destroy_surface(old.surface);
            }
            let surface = alloc.create_surface(width, height)?;
            let layer = OffscreenLayer {
                id: LayerId(self.next_id),
                surface,
                width,
                height,
                viewport_width: width,
                viewport_height: height,
                state: LayerState::Idle,
                paint: Paint::default(),
                content_scale: (1.0, 1.0),
                window_transform,
            };
            self.next_id += 1;
            self.persistent.insert(node, layer);
        }
        self.update_pool_stats();
        let layer = self
            .persistent
            .get_mut(&node)
            .expect("persistent layer just inserted");
        layer.window_transform = window_transform;
        layer.state = LayerState::Recording;
        Ok(layer)
    }

    /// Drop a node's persistent layer, destroying its surface.
    pub fn evict_persistent(&mut self, alloc: &mut dyn SurfaceAllocator, node: NodeId) {
        if let Some(layer) = self.persistent.remove(&node) {
            alloc.destroy_surface(layer.surface);
            self.update_pool_stats();
        }
    }

    /// Destroy every pooled and persistent surface.
    pub fn clear(&mut self, alloc: &mut dyn SurfaceAllocator) {
        for layer in self
            .pool_small
            .drain(..)
            .chain(self.pool_medium.drain(..))
            .chain(self.pool_large.drain(..))
            .chain(self.pool_xlarge.drain(..))
        {
            alloc.destroy_surface(layer.surface);
        }
        let persistent: Vec<_> = self.persistent.drain().map(|(_, l)| l).collect();
        for layer in persistent {
            alloc.destroy_surface(layer.surface);
        }
        self.update_pool_stats();
    }

    pub fn pooled_count(&self) -> usize {
        self.pool_small.len() + self.pool_medium.len() + self.pool_large.len() + self.pool_xlarge.len()
    }

    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    fn update_pool_stats(&mut self) {
        let mut count = 0;
        let mut bytes = 0;
        for pool in [
            &self.pool_small,
            &self.pool_medium,
            &self.pool_large,
            &self.pool_xlarge,
        ] {
            count += pool.len();
            bytes += pool.iter().map(|l| l.memory_bytes()).sum::<u64>();
        }
        self.stats.pool_count = count;
        self.stats.pool_memory_bytes = bytes;
        self.stats.persistent_count = self.persistent.len();
    }
}

/// Per-frame set of persistent layers needing a re-bake, with damage in
/// each layer's own local device space.
#[derive(Debug, Default)]
pub struct LayerUpdateQueue {
    entries: Vec<LayerUpdate>,
}

#[derive(Clone, Debug)]
pub struct LayerUpdate {
    pub node: std::sync::Arc<glint_core::RenderNode>,
    pub damage: Rect,
}

impl LayerUpdateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue damage for a node's layer; repeated damage for the same
    /// node is unioned.
    pub fn enqueue(&mut self, node: std::sync::Arc<glint_core::RenderNode>, damage: Rect) {
        let bounds = Rect::from_wh(node.props.width(), node.props.height());
        let damage = damage.intersection(&bounds);
        if damage.is_empty() {
            return;
        }
        if let Some(existing) = self.entries.iter_mut().find(|e| e.node.id == node.id) {
            existing.damage = existing.damage.union(&damage);
        } else {
            self.entries.push(LayerUpdate { node, damage });
        }
    }

    pub fn entries(&self) -> &[LayerUpdate] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
