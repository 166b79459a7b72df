//! Test doubles shared by the in-crate test suites

use glint_core::SurfaceHandle;

use crate::layer::{AllocError, SurfaceAllocator};

/// Counts live surfaces; the stand-in for the external allocator.
#[derive(Default)]
pub struct TestAllocator {
    pub(crate) next: u64,
    pub live: Vec<SurfaceHandle>,
    pub created: usize,
    pub fail_next: bool,
}

impl SurfaceAllocator for TestAllocator {
    fn create_surface(&mut self, width: u32, height: u32) -> Result<SurfaceHandle, AllocError> {
        if self.fail_next {
            self.fail_next = false;
            return Err(AllocError::SurfaceUnavailable { width, height });
        }
        self.next += 1;
        self.created += 1;
        let handle = SurfaceHandle(self.next);
        self.live.push(handle);
        Ok(handle)
    }

    fn destroy_surface(&mut self, surface: SurfaceHandle) {
        self.live.retain(|s| *s != surface);
    }
}
