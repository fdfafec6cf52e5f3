//! Headless GPU backend.
//!
//! A CPU-side implementation of [`GpuDevice`] that performs no rendering.
//! Buffers are byte vectors, fences are condition variables and every
//! submitted command buffer is kept as a [`Submission`] so callers can assert
//! on the exact commands a frame produced.
//!
//! Fences complete on submit by default. With
//! [`HeadlessDevice::set_auto_complete(false)`](HeadlessDevice::set_auto_complete)
//! they stay pending until [`HeadlessFence::signal`] or
//! [`HeadlessDevice::complete_all`] is called, which lets tests hold the
//! "GPU" on a frame and observe the CPU blocking on it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use ash::vk::{self, Handle};
use glam::Mat4;
use tracing::{debug, trace, warn};

use crate::backend::{
    BufferDesc, BufferUsage, GpuBuffer, GpuDevice, GpuFence, GpuImage, ImageDesc, ImageUsage,
    PipelineDesc, TargetFormats,
};
use crate::error::{RhiError, RhiResult};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A command recorded into a [`HeadlessCommandBuffer`].
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    BeginScenePass {
        color: vk::Image,
        depth: vk::Image,
        clear_color: [f32; 4],
        extent: vk::Extent2D,
    },
    EndScenePass {
        color: vk::Image,
    },
    BindPipeline {
        pipeline: u64,
    },
    PushTransform(Mat4),
    BindVertexBuffer {
        buffer: u64,
    },
    Draw {
        vertex_count: u32,
        first_vertex: u32,
    },
    Barrier {
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        image: vk::Image,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
    },
    Blit {
        src: vk::Image,
        dst: vk::Image,
        src_extent: vk::Extent2D,
        dst_extent: vk::Extent2D,
    },
}

/// One queue submission as seen by the headless device.
#[derive(Clone, Debug)]
pub struct Submission {
    pub command_buffer: u64,
    pub commands: Vec<Command>,
    pub wait: Option<(u64, vk::PipelineStageFlags)>,
    pub signal: Option<u64>,
    pub fence: HeadlessFence,
}

impl Submission {
    /// `(vertex_count, first_vertex)` of every draw, in recording order.
    pub fn draws(&self) -> Vec<(u32, u32)> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                Command::Draw {
                    vertex_count,
                    first_vertex,
                } => Some((*vertex_count, *first_vertex)),
                _ => None,
            })
            .collect()
    }
}

/// CPU-backed buffer.
#[derive(Debug)]
pub struct HeadlessBuffer {
    id: u64,
    usage: BufferUsage,
    data: Arc<Mutex<Vec<u8>>>,
}

impl HeadlessBuffer {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    /// Copy of the whole buffer.
    pub fn contents(&self) -> Vec<u8> {
        lock(&self.data).clone()
    }

    /// Shared view of the backing bytes that outlives borrows of the buffer.
    pub fn shared_contents(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.data)
    }
}

impl GpuBuffer for HeadlessBuffer {
    fn size(&self) -> u64 {
        lock(&self.data).len() as u64
    }

    fn write(&self, offset: u64, data: &[u8]) -> RhiResult<()> {
        if !self.usage.is_host_visible() {
            return Err(RhiError::Buffer(format!(
                "{} buffer is not host visible",
                self.usage.name()
            )));
        }
        let mut bytes = lock(&self.data);
        let start = offset as usize;
        let end = start + data.len();
        if end > bytes.len() {
            return Err(RhiError::Buffer(format!(
                "Write exceeds buffer size: offset {} + data {} > buffer {}",
                offset,
                data.len(),
                bytes.len()
            )));
        }
        bytes[start..end].copy_from_slice(data);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct FenceState {
    signaled: Mutex<bool>,
    changed: Condvar,
}

/// Condition-variable fence. Clones share state.
#[derive(Clone, Debug)]
pub struct HeadlessFence {
    id: u64,
    state: Arc<FenceState>,
}

impl HeadlessFence {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Marks the fence signaled and wakes every waiter, as the GPU would on completion.
    pub fn signal(&self) {
        *lock(&self.state.signaled) = true;
        self.state.changed.notify_all();
        trace!("Headless fence {} signaled", self.id);
    }
}

impl GpuFence for HeadlessFence {
    fn wait(&self, timeout_ns: u64) -> RhiResult<()> {
        let guard = lock(&self.state.signaled);
        if timeout_ns == u64::MAX {
            let _guard = self
                .state
                .changed
                .wait_while(guard, |signaled| !*signaled)
                .unwrap_or_else(PoisonError::into_inner);
            return Ok(());
        }

        let (_guard, result) = self
            .state
            .changed
            .wait_timeout_while(guard, Duration::from_nanos(timeout_ns), |signaled| {
                !*signaled
            })
            .unwrap_or_else(PoisonError::into_inner);
        if result.timed_out() {
            Err(RhiError::Timeout)
        } else {
            Ok(())
        }
    }

    fn reset(&self) -> RhiResult<()> {
        *lock(&self.state.signaled) = false;
        Ok(())
    }

    fn is_signaled(&self) -> bool {
        *lock(&self.state.signaled)
    }
}

#[derive(Debug)]
pub struct HeadlessSemaphore {
    id: u64,
}

impl HeadlessSemaphore {
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Debug)]
pub struct HeadlessImage {
    raw: vk::Image,
    extent: vk::Extent2D,
    format: vk::Format,
    usage: ImageUsage,
}

impl HeadlessImage {
    pub fn usage(&self) -> ImageUsage {
        self.usage
    }
}

impl GpuImage for HeadlessImage {
    fn raw(&self) -> vk::Image {
        self.raw
    }

    fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn format(&self) -> vk::Format {
        self.format
    }
}

#[derive(Debug)]
pub struct HeadlessPipeline {
    id: u64,
}

impl HeadlessPipeline {
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Debug)]
pub struct HeadlessCommandBuffer {
    id: u64,
    recording: bool,
    commands: Vec<Command>,
}

impl HeadlessCommandBuffer {
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    fn record(&mut self, command: Command) {
        debug_assert!(self.recording, "command recorded outside begin/end");
        self.commands.push(command);
    }
}

/// Headless [`GpuDevice`].
#[derive(Debug)]
pub struct HeadlessDevice {
    next_id: AtomicU64,
    auto_complete: AtomicBool,
    submissions: Mutex<Vec<Submission>>,
    uploads: AtomicU64,
    fail_next_submit: Mutex<Option<vk::Result>>,
    formats: TargetFormats,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            auto_complete: AtomicBool::new(true),
            submissions: Mutex::new(Vec::new()),
            uploads: AtomicU64::new(0),
            fail_next_submit: Mutex::new(None),
            formats: TargetFormats {
                color: vk::Format::R16G16B16A16_SFLOAT,
                depth: vk::Format::D32_SFLOAT,
            },
        }
    }

    /// When `false`, submitted fences stay unsignaled until signaled by hand.
    pub fn set_auto_complete(&self, enabled: bool) {
        self.auto_complete.store(enabled, Ordering::Release);
    }

    /// Makes the next `submit` fail with `result` without recording anything.
    pub fn fail_next_submit(&self, result: vk::Result) {
        *lock(&self.fail_next_submit) = Some(result);
    }

    /// Snapshot of every submission so far, oldest first.
    pub fn submissions(&self) -> Vec<Submission> {
        lock(&self.submissions).clone()
    }

    pub fn submission_count(&self) -> usize {
        lock(&self.submissions).len()
    }

    /// Number of blocking staging copies performed.
    pub fn upload_count(&self) -> u64 {
        self.uploads.load(Ordering::Acquire)
    }

    /// Signals the fence of every submission, as if the queue drained.
    pub fn complete_all(&self) {
        for submission in lock(&self.submissions).iter() {
            submission.fence.signal();
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl GpuDevice for HeadlessDevice {
    type Buffer = HeadlessBuffer;
    type Image = HeadlessImage;
    type Fence = HeadlessFence;
    type Semaphore = HeadlessSemaphore;
    type Pipeline = HeadlessPipeline;
    type CommandBuffer = HeadlessCommandBuffer;

    fn target_formats(&self) -> TargetFormats {
        self.formats
    }

    fn create_buffer(&self, desc: &BufferDesc) -> RhiResult<HeadlessBuffer> {
        if desc.size == 0 {
            return Err(RhiError::Buffer(
                "Buffer size must be greater than 0".to_string(),
            ));
        }
        let id = self.next_id();
        debug!(
            "Created headless {} buffer {}: {} bytes",
            desc.usage.name(),
            id,
            desc.size
        );
        Ok(HeadlessBuffer {
            id,
            usage: desc.usage,
            data: Arc::new(Mutex::new(vec![0; desc.size as usize])),
        })
    }

    fn create_image(&self, desc: &ImageDesc) -> RhiResult<HeadlessImage> {
        Ok(HeadlessImage {
            raw: vk::Image::from_raw(self.next_id()),
            extent: desc.extent,
            format: desc.format,
            usage: desc.usage,
        })
    }

    fn create_fence(&self, signaled: bool) -> RhiResult<HeadlessFence> {
        Ok(HeadlessFence {
            id: self.next_id(),
            state: Arc::new(FenceState {
                signaled: Mutex::new(signaled),
                changed: Condvar::new(),
            }),
        })
    }

    fn create_semaphore(&self) -> RhiResult<HeadlessSemaphore> {
        Ok(HeadlessSemaphore { id: self.next_id() })
    }

    fn create_pipeline(&self, desc: &PipelineDesc<'_>) -> RhiResult<HeadlessPipeline> {
        for (stage, code) in [("vertex", desc.vertex_spirv), ("fragment", desc.fragment_spirv)] {
            if code.is_empty() || !code.len().is_multiple_of(4) {
                return Err(RhiError::Shader(format!(
                    "{} SPIR-V code must be non-empty and 4-byte aligned, got {} bytes",
                    stage,
                    code.len()
                )));
            }
        }
        Ok(HeadlessPipeline { id: self.next_id() })
    }

    fn allocate_command_buffer(&self) -> RhiResult<HeadlessCommandBuffer> {
        Ok(HeadlessCommandBuffer {
            id: self.next_id(),
            recording: false,
            commands: Vec::new(),
        })
    }

    fn copy_buffer_blocking(
        &self,
        src: &HeadlessBuffer,
        dst: &HeadlessBuffer,
        size: u64,
    ) -> RhiResult<()> {
        let size = size as usize;
        let src_bytes = lock(&src.data);
        let mut dst_bytes = lock(&dst.data);
        if size > src_bytes.len() || size > dst_bytes.len() {
            return Err(RhiError::Buffer(format!(
                "Copy of {} bytes exceeds source ({}) or destination ({})",
                size,
                src_bytes.len(),
                dst_bytes.len()
            )));
        }
        dst_bytes[..size].copy_from_slice(&src_bytes[..size]);
        self.uploads.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn begin_commands(&self, cmd: &mut HeadlessCommandBuffer) -> RhiResult<()> {
        cmd.commands.clear();
        cmd.recording = true;
        Ok(())
    }

    fn end_commands(&self, cmd: &mut HeadlessCommandBuffer) -> RhiResult<()> {
        cmd.recording = false;
        Ok(())
    }

    fn cmd_begin_scene_pass(
        &self,
        cmd: &mut HeadlessCommandBuffer,
        color: &HeadlessImage,
        depth: &HeadlessImage,
        clear_color: [f32; 4],
    ) {
        cmd.record(Command::BeginScenePass {
            color: color.raw,
            depth: depth.raw,
            clear_color,
            extent: color.extent,
        });
    }

    fn cmd_end_scene_pass(&self, cmd: &mut HeadlessCommandBuffer, color: &HeadlessImage) {
        cmd.record(Command::EndScenePass { color: color.raw });
    }

    fn cmd_bind_pipeline(&self, cmd: &mut HeadlessCommandBuffer, pipeline: &HeadlessPipeline) {
        cmd.record(Command::BindPipeline {
            pipeline: pipeline.id,
        });
    }

    fn cmd_push_transform(
        &self,
        cmd: &mut HeadlessCommandBuffer,
        _pipeline: &HeadlessPipeline,
        transform: &Mat4,
    ) {
        cmd.record(Command::PushTransform(*transform));
    }

    fn cmd_bind_vertex_buffer(&self, cmd: &mut HeadlessCommandBuffer, buffer: &HeadlessBuffer) {
        cmd.record(Command::BindVertexBuffer { buffer: buffer.id });
    }

    fn cmd_draw(&self, cmd: &mut HeadlessCommandBuffer, vertex_count: u32, first_vertex: u32) {
        cmd.record(Command::Draw {
            vertex_count,
            first_vertex,
        });
    }

    fn cmd_pipeline_barrier(
        &self,
        cmd: &mut HeadlessCommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barrier: &vk::ImageMemoryBarrier<'_>,
    ) {
        cmd.record(Command::Barrier {
            src_stage,
            dst_stage,
            image: barrier.image,
            old_layout: barrier.old_layout,
            new_layout: barrier.new_layout,
            src_access: barrier.src_access_mask,
            dst_access: barrier.dst_access_mask,
        });
    }

    fn cmd_blit_to(
        &self,
        cmd: &mut HeadlessCommandBuffer,
        src: &HeadlessImage,
        dst: vk::Image,
        dst_extent: vk::Extent2D,
    ) {
        cmd.record(Command::Blit {
            src: src.raw,
            dst,
            src_extent: src.extent,
            dst_extent,
        });
    }

    fn submit(
        &self,
        cmd: &HeadlessCommandBuffer,
        wait: Option<(&HeadlessSemaphore, vk::PipelineStageFlags)>,
        signal: Option<&HeadlessSemaphore>,
        fence: &HeadlessFence,
    ) -> RhiResult<()> {
        if let Some(result) = lock(&self.fail_next_submit).take() {
            warn!("Headless submit failing with injected {:?}", result);
            return Err(RhiError::Vulkan(result));
        }
        if fence.is_signaled() {
            // vkQueueSubmit requires an unsignaled fence.
            warn!("Submit with already signaled fence {}", fence.id);
            return Err(RhiError::Vulkan(vk::Result::ERROR_VALIDATION_FAILED_EXT));
        }
        if cmd.recording {
            return Err(RhiError::Vulkan(vk::Result::ERROR_VALIDATION_FAILED_EXT));
        }

        lock(&self.submissions).push(Submission {
            command_buffer: cmd.id,
            commands: cmd.commands.clone(),
            wait: wait.map(|(semaphore, stage)| (semaphore.id, stage)),
            signal: signal.map(|semaphore| semaphore.id),
            fence: fence.clone(),
        });
        trace!(
            "Headless submit of command buffer {} ({} commands)",
            cmd.id,
            cmd.commands.len()
        );

        if self.auto_complete.load(Ordering::Acquire) {
            fence.signal();
        }
        Ok(())
    }

    fn wait_idle(&self) -> RhiResult<()> {
        self.complete_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_headless_types_are_send_sync() {
        assert_send_sync::<HeadlessDevice>();
        assert_send_sync::<HeadlessBuffer>();
        assert_send_sync::<HeadlessFence>();
    }

    #[test]
    fn test_buffer_write_bounds() {
        let device = HeadlessDevice::new();
        let buffer = device
            .create_buffer(&BufferDesc {
                size: 8,
                usage: BufferUsage::Staging,
            })
            .unwrap();

        buffer.write(4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(buffer.contents(), vec![0, 0, 0, 0, 1, 2, 3, 4]);
        assert!(matches!(buffer.write(6, &[0; 4]), Err(RhiError::Buffer(_))));
    }

    #[test]
    fn test_device_local_buffer_rejects_cpu_write() {
        let device = HeadlessDevice::new();
        let buffer = device
            .create_buffer(&BufferDesc {
                size: 4,
                usage: BufferUsage::Vertex,
            })
            .unwrap();
        assert!(buffer.write(0, &[1]).is_err());
    }

    #[test]
    fn test_fence_wait_times_out() {
        let device = HeadlessDevice::new();
        let fence = device.create_fence(false).unwrap();
        assert!(matches!(fence.wait(1_000_000), Err(RhiError::Timeout)));

        fence.signal();
        assert!(fence.wait(1_000_000).is_ok());
        fence.reset().unwrap();
        assert!(!fence.is_signaled());
    }

    #[test]
    fn test_fence_wakes_waiter_on_other_thread() {
        let device = HeadlessDevice::new();
        let fence = device.create_fence(false).unwrap();
        let remote = fence.clone();

        let waiter = std::thread::spawn(move || remote.wait(u64::MAX));
        std::thread::sleep(Duration::from_millis(20));
        fence.signal();
        assert!(waiter.join().unwrap().is_ok());
    }

    #[test]
    fn test_submit_records_commands_and_signals() {
        let device = HeadlessDevice::new();
        let fence = device.create_fence(false).unwrap();
        let mut cmd = device.allocate_command_buffer().unwrap();

        device.begin_commands(&mut cmd).unwrap();
        device.cmd_draw(&mut cmd, 3, 0);
        device.end_commands(&mut cmd).unwrap();
        device.submit(&cmd, None, None, &fence).unwrap();

        assert!(fence.is_signaled());
        let submissions = device.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].draws(), vec![(3, 0)]);
    }

    #[test]
    fn test_submit_with_signaled_fence_is_rejected() {
        let device = HeadlessDevice::new();
        let fence = device.create_fence(true).unwrap();
        let cmd = device.allocate_command_buffer().unwrap();
        assert!(device.submit(&cmd, None, None, &fence).is_err());
        assert_eq!(device.submission_count(), 0);
    }

    #[test]
    fn test_manual_completion() {
        let device = HeadlessDevice::new();
        device.set_auto_complete(false);
        let fence = device.create_fence(false).unwrap();
        let cmd = device.allocate_command_buffer().unwrap();

        device.submit(&cmd, None, None, &fence).unwrap();
        assert!(!fence.is_signaled());
        device.wait_idle().unwrap();
        assert!(fence.is_signaled());
    }

    #[test]
    fn test_invalid_spirv_rejected() {
        let device = HeadlessDevice::new();
        let result = device.create_pipeline(&PipelineDesc {
            vertex_spirv: &[0; 6],
            fragment_spirv: &[0; 8],
            color_format: vk::Format::R16G16B16A16_SFLOAT,
            depth_format: vk::Format::D32_SFLOAT,
        });
        assert!(matches!(result, Err(RhiError::Shader(_))));
    }
}
