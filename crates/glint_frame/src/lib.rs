//! Glint Frame
//!
//! The deferred frame-building pipeline: walks a recorded scene once per
//! frame, resolves each operation's effective clip/transform/alpha into
//! an immutable baked state, coalesces compatible adjacent operations
//! into merged batches, drops occluded work, and interleaves offscreen
//! layer lifecycles into one ordered output consumed by the draw-call
//! stage.
//!
//! The pipeline is single-threaded and synchronous: one `FrameBuilder`
//! per frame, run to completion on the render context before the output
//! is handed on. Scene recording is decoupled from it through immutable
//! scene snapshots and a layer-update queue.
//!
//! ```ignore
//! use glint_frame::{FrameBuilder, FrameConfig, LayerPool, LightGeometry};
//!
//! let mut pool = LayerPool::new();
//! let mut builder = FrameBuilder::new(
//!     damage, width, height,
//!     LightGeometry::default(), FrameConfig::from_env(),
//!     &mut pool, &mut allocator,
//! );
//! builder.defer_layers(&updates);
//! builder.defer_node(&root);
//! builder.replay(&mut sink);
//! ```

pub mod baked;
pub mod batch;
pub mod frame_builder;
pub mod layer;
mod layer_builder;
pub mod occlusion;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use baked::{bake, BakedState, ClipSides, ProjectionMask};
pub use batch::{BatchKind, FrameEntry, MergeKey, MergedBatch, OpEntry};
pub use frame_builder::{
    CommandSink, FrameBuilder, FrameConfig, FrameStats, LightGeometry,
};
pub use layer::{
    clamp_layer_size, AllocError, LayerPool, LayerSizing, LayerState, LayerUpdate,
    LayerUpdateQueue, OffscreenLayer, PoolStats, SurfaceAllocator,
};
pub use occlusion::{opaque_coverage, OpaqueCoverage};
pub use state::{AmbientFrame, RoundRectClip, StateStack};
