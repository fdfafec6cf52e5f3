//! Frames in flight.
//!
//! Each slot owns the objects one frame needs while the GPU executes it. The
//! CPU only blocks when it comes back to a slot whose previous submission
//! has not finished.

use std::sync::Arc;

use tracing::{debug, warn};
use vkr_rhi::{GpuDevice, GpuFence, RhiResult};

/// Synchronization objects of one frame in flight.
pub struct FrameSlot<D: GpuDevice> {
    pub command_buffer: D::CommandBuffer,
    /// Signaled by the presenter when the acquired image can be written.
    pub image_ready: D::Semaphore,
    /// Signaled by the frame's submission, waited on by present.
    pub render_done: D::Semaphore,
    /// Signaled when the frame's submission completes.
    pub fence: Arc<D::Fence>,
}

impl<D: GpuDevice> FrameSlot<D> {
    fn new(device: &D) -> RhiResult<Self> {
        Ok(Self {
            command_buffer: device.allocate_command_buffer()?,
            image_ready: device.create_semaphore()?,
            render_done: device.create_semaphore()?,
            // Signaled so the first wait on the slot returns at once.
            fence: Arc::new(device.create_fence(true)?),
        })
    }
}

/// Ring of [`FrameSlot`]s advanced once per submitted frame.
pub struct FrameSynchronizer<D: GpuDevice> {
    slots: Vec<FrameSlot<D>>,
    current: usize,
}

impl<D: GpuDevice> FrameSynchronizer<D> {
    /// # Panics
    ///
    /// Panics if `frames_in_flight` is zero.
    pub fn new(device: &D, frames_in_flight: u32) -> RhiResult<Self> {
        assert!(frames_in_flight > 0, "at least one frame must be in flight");
        let slots = (0..frames_in_flight)
            .map(|_| FrameSlot::new(device))
            .collect::<RhiResult<Vec<_>>>()?;
        debug!("Created {} frame slots", slots.len());
        Ok(Self { slots, current: 0 })
    }

    #[inline]
    pub fn current_index(&self) -> usize {
        self.current
    }

    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn current(&self) -> &FrameSlot<D> {
        &self.slots[self.current]
    }

    pub fn current_mut(&mut self) -> &mut FrameSlot<D> {
        &mut self.slots[self.current]
    }

    /// The slot submitted just before the current one.
    pub fn previous(&self) -> &FrameSlot<D> {
        let count = self.slots.len();
        &self.slots[(self.current + count - 1) % count]
    }

    /// Blocks until the current slot's last submission has completed.
    pub fn wait_current(&self) -> RhiResult<()> {
        self.current().fence.wait(u64::MAX)
    }

    /// Moves to the next slot.
    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.slots.len();
    }

    /// Installs a fresh signaled fence in the current slot and returns the
    /// old one.
    ///
    /// Called when a submission that would have signaled the old fence did
    /// not happen.
    pub fn replace_fence(&mut self, device: &D) -> RhiResult<Arc<D::Fence>> {
        let fence = Arc::new(device.create_fence(true)?);
        warn!("Replacing fence of frame slot {}", self.current);
        Ok(std::mem::replace(&mut self.current_mut().fence, fence))
    }

    /// Recreates the current slot's image-ready semaphore, dropping any
    /// signal still pending on it. The device must be idle.
    pub fn recreate_image_ready(&mut self, device: &D) -> RhiResult<()> {
        self.current_mut().image_ready = device.create_semaphore()?;
        debug!("Recreated image-ready semaphore of frame slot {}", self.current);
        Ok(())
    }

    /// Recreates every semaphore. The device must be idle.
    pub fn recreate_semaphores(&mut self, device: &D) -> RhiResult<()> {
        for slot in &mut self.slots {
            slot.image_ready = device.create_semaphore()?;
            slot.render_done = device.create_semaphore()?;
        }
        debug!("Recreated semaphores of {} frame slots", self.slots.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use vkr_rhi::headless::HeadlessDevice;

    use super::*;

    #[test]
    fn test_index_wraps_after_slot_count_frames() {
        let device = HeadlessDevice::new();
        let mut frames = FrameSynchronizer::new(&device, 3).unwrap();

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(frames.current_index());
            frames.advance();
        }
        assert_eq!(seen, vec![0, 1, 2, 0]);
    }

    #[test]
    fn test_fresh_slots_do_not_block() {
        let device = HeadlessDevice::new();
        let mut frames = FrameSynchronizer::new(&device, 2).unwrap();
        for _ in 0..2 {
            assert!(frames.current().fence.is_signaled());
            frames.wait_current().unwrap();
            frames.advance();
        }
    }

    #[test]
    fn test_slots_own_distinct_objects() {
        let device = HeadlessDevice::new();
        let mut frames = FrameSynchronizer::new(&device, 2).unwrap();
        let first = frames.current().fence.id();
        frames.advance();
        assert_ne!(frames.current().fence.id(), first);
        assert_eq!(frames.previous().fence.id(), first);
    }

    #[test]
    fn test_replace_fence_returns_old() {
        let device = HeadlessDevice::new();
        let mut frames = FrameSynchronizer::new(&device, 1).unwrap();
        frames.current().fence.reset().unwrap();

        let old = frames.replace_fence(&device).unwrap();
        assert!(!old.is_signaled());
        assert!(frames.current().fence.is_signaled());
        assert!(!Arc::ptr_eq(&old, &frames.current().fence));
    }

    #[test]
    fn test_recreate_image_ready_touches_current_slot_only() {
        let device = HeadlessDevice::new();
        let mut frames = FrameSynchronizer::new(&device, 2).unwrap();
        let image_ready = frames.current().image_ready.id();
        let render_done = frames.current().render_done.id();
        let other = frames.slots[1].image_ready.id();

        frames.recreate_image_ready(&device).unwrap();
        assert_ne!(frames.current().image_ready.id(), image_ready);
        assert_eq!(frames.current().render_done.id(), render_done);
        assert_eq!(frames.slots[1].image_ready.id(), other);
    }

    #[test]
    fn test_recreate_semaphores() {
        let device = HeadlessDevice::new();
        let mut frames = FrameSynchronizer::new(&device, 2).unwrap();
        let before = frames.current().image_ready.id();
        frames.recreate_semaphores(&device).unwrap();
        assert_ne!(frames.current().image_ready.id(), before);
    }
}
