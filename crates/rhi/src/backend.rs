//! GPU capability traits.
//!
//! The scene layer never talks to a graphics API directly. It is generic over
//! [`GpuDevice`], which bundles resource creation, command recording and queue
//! submission behind one trait with associated resource types.
//!
//! # Available Backends
//!
//! - [`vulkan::VulkanDevice`](crate::vulkan::VulkanDevice): ash + gpu-allocator
//! - [`headless::HeadlessDevice`](crate::headless::HeadlessDevice): CPU-side
//!   stand-in that records submissions, used by tests
//!
//! Vulkan enums and flags (`vk::Format`, `vk::ImageLayout`,
//! `vk::PipelineStageFlags`, ...) are the shared vocabulary of both backends.

use ash::vk;
use glam::Mat4;

use crate::error::RhiResult;

/// Buffer usage type.
///
/// Determines the memory placement and the Vulkan usage flags of a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Device-local vertex buffer, filled through a staging copy
    Vertex,
    /// Host-visible vertex buffer written by the CPU every frame
    DynamicVertex,
    /// Host-visible transfer source
    Staging,
}

impl BufferUsage {
    /// Returns the Vulkan buffer usage flags for this usage type.
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferUsage::Vertex => {
                vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::DynamicVertex => vk::BufferUsageFlags::VERTEX_BUFFER,
            BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
        }
    }

    /// Whether the CPU can write the buffer directly.
    pub fn is_host_visible(self) -> bool {
        !matches!(self, BufferUsage::Vertex)
    }

    /// Returns a human-readable name for debugging.
    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Vertex => "vertex",
            BufferUsage::DynamicVertex => "dynamic vertex",
            BufferUsage::Staging => "staging",
        }
    }
}

/// Parameters for [`GpuDevice::create_buffer`].
#[derive(Clone, Copy, Debug)]
pub struct BufferDesc {
    pub size: u64,
    pub usage: BufferUsage,
}

/// Role of an offscreen image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageUsage {
    /// Color attachment that is later blitted to the presentable image
    ColorTarget,
    /// Depth attachment
    DepthTarget,
    /// Blit destination standing in for a presentable image
    PresentTarget,
}

impl ImageUsage {
    pub fn to_vk_usage(self) -> vk::ImageUsageFlags {
        match self {
            ImageUsage::ColorTarget => {
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC
            }
            ImageUsage::DepthTarget => vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            ImageUsage::PresentTarget => {
                vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::TRANSFER_SRC
            }
        }
    }

    /// Aspects covered by views and barriers of a `format` image in this role.
    pub fn aspect(self, format: vk::Format) -> vk::ImageAspectFlags {
        match self {
            ImageUsage::DepthTarget if has_stencil(format) => {
                vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
            }
            ImageUsage::DepthTarget => vk::ImageAspectFlags::DEPTH,
            _ => vk::ImageAspectFlags::COLOR,
        }
    }
}

/// Parameters for [`GpuDevice::create_image`].
#[derive(Clone, Copy, Debug)]
pub struct ImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: ImageUsage,
}

/// Formats chosen by the device for offscreen render targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TargetFormats {
    pub color: vk::Format,
    pub depth: vk::Format,
}

/// Parameters for [`GpuDevice::create_pipeline`].
///
/// Every pipeline uses the [`Vertex`](crate::vertex::Vertex) layout, a
/// triangle list, LESS depth testing, dynamic viewport/scissor and a single
/// 64-byte vertex-stage push constant holding the model-view-projection matrix.
#[derive(Clone, Copy, Debug)]
pub struct PipelineDesc<'a> {
    pub vertex_spirv: &'a [u8],
    pub fragment_spirv: &'a [u8],
    pub color_format: vk::Format,
    pub depth_format: vk::Format,
}

/// Size of the per-draw push constant block.
pub const TRANSFORM_PUSH_CONSTANT_SIZE: u32 = std::mem::size_of::<Mat4>() as u32;

/// A GPU buffer.
pub trait GpuBuffer: Send + Sync + 'static {
    /// Size in bytes.
    fn size(&self) -> u64;

    /// Copies `data` into host-visible memory at `offset` and makes the write
    /// visible to the device.
    ///
    /// # Errors
    ///
    /// Fails if the buffer is not host visible or the write exceeds its size.
    fn write(&self, offset: u64, data: &[u8]) -> RhiResult<()>;
}

/// A GPU to CPU completion signal.
pub trait GpuFence: Send + Sync + 'static {
    /// Blocks until the fence is signaled or `timeout_ns` elapses.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Timeout`](crate::RhiError::Timeout) on timeout.
    fn wait(&self, timeout_ns: u64) -> RhiResult<()>;

    /// Returns the fence to the unsignaled state.
    fn reset(&self) -> RhiResult<()>;

    /// Non-blocking status query.
    fn is_signaled(&self) -> bool;
}

/// An image the device can render into or blit from.
pub trait GpuImage: Send + Sync + 'static {
    fn raw(&self) -> vk::Image;
    fn extent(&self) -> vk::Extent2D;
    fn format(&self) -> vk::Format;
}

/// Resource creation, command recording and submission on a single graphics queue.
///
/// Recording methods take the command buffer mutably; the device itself is
/// shared (`&self`) so resources can hold an `Arc` to it.
pub trait GpuDevice: Send + Sync + 'static {
    type Buffer: GpuBuffer;
    type Image: GpuImage;
    type Fence: GpuFence;
    type Semaphore: Send + Sync + 'static;
    type Pipeline: Send + Sync + 'static;
    type CommandBuffer: Send + 'static;

    /// Formats used for offscreen color and depth targets.
    fn target_formats(&self) -> TargetFormats;

    fn create_buffer(&self, desc: &BufferDesc) -> RhiResult<Self::Buffer>;
    fn create_image(&self, desc: &ImageDesc) -> RhiResult<Self::Image>;
    fn create_fence(&self, signaled: bool) -> RhiResult<Self::Fence>;
    fn create_semaphore(&self) -> RhiResult<Self::Semaphore>;
    fn create_pipeline(&self, desc: &PipelineDesc<'_>) -> RhiResult<Self::Pipeline>;
    fn allocate_command_buffer(&self) -> RhiResult<Self::CommandBuffer>;

    /// Records a one-shot copy of `size` bytes from `src` to `dst`, submits it
    /// and blocks until the queue is idle.
    fn copy_buffer_blocking(
        &self,
        src: &Self::Buffer,
        dst: &Self::Buffer,
        size: u64,
    ) -> RhiResult<()>;

    /// Resets `cmd` and starts one-time-submit recording.
    fn begin_commands(&self, cmd: &mut Self::CommandBuffer) -> RhiResult<()>;
    fn end_commands(&self, cmd: &mut Self::CommandBuffer) -> RhiResult<()>;

    /// Starts rendering into `color` and `depth`, clearing color to
    /// `clear_color` and depth to 1.0, with viewport and scissor covering the
    /// color target.
    fn cmd_begin_scene_pass(
        &self,
        cmd: &mut Self::CommandBuffer,
        color: &Self::Image,
        depth: &Self::Image,
        clear_color: [f32; 4],
    );

    /// Ends rendering and leaves `color` in `TRANSFER_SRC_OPTIMAL`.
    fn cmd_end_scene_pass(&self, cmd: &mut Self::CommandBuffer, color: &Self::Image);

    fn cmd_bind_pipeline(&self, cmd: &mut Self::CommandBuffer, pipeline: &Self::Pipeline);

    /// Pushes the model-view-projection matrix for the next draw.
    fn cmd_push_transform(
        &self,
        cmd: &mut Self::CommandBuffer,
        pipeline: &Self::Pipeline,
        transform: &Mat4,
    );

    fn cmd_bind_vertex_buffer(&self, cmd: &mut Self::CommandBuffer, buffer: &Self::Buffer);

    fn cmd_draw(&self, cmd: &mut Self::CommandBuffer, vertex_count: u32, first_vertex: u32);

    fn cmd_pipeline_barrier(
        &self,
        cmd: &mut Self::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barrier: &vk::ImageMemoryBarrier<'_>,
    );

    /// Blits the whole of `src` (in `TRANSFER_SRC_OPTIMAL`) onto the whole of
    /// `dst` (in `TRANSFER_DST_OPTIMAL`) with linear filtering, scaling when
    /// the extents differ.
    fn cmd_blit_to(
        &self,
        cmd: &mut Self::CommandBuffer,
        src: &Self::Image,
        dst: vk::Image,
        dst_extent: vk::Extent2D,
    );

    /// Submits `cmd` to the graphics queue.
    ///
    /// `wait` pairs a semaphore with the stage that waits on it; `signal` is
    /// signaled on completion together with `fence`.
    fn submit(
        &self,
        cmd: &Self::CommandBuffer,
        wait: Option<(&Self::Semaphore, vk::PipelineStageFlags)>,
        signal: Option<&Self::Semaphore>,
        fence: &Self::Fence,
    ) -> RhiResult<()>;

    /// Blocks until all submitted work has finished.
    fn wait_idle(&self) -> RhiResult<()>;
}

fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT
    )
}

/// Full single-mip, single-layer subresource range for `aspect`.
pub fn full_subresource_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(aspect)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_buffer_usage_to_vk() {
        assert!(
            BufferUsage::Vertex
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::TRANSFER_DST)
        );
        assert_eq!(
            BufferUsage::Staging.to_vk_usage(),
            vk::BufferUsageFlags::TRANSFER_SRC
        );
        assert!(
            BufferUsage::DynamicVertex
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::VERTEX_BUFFER)
        );
    }

    #[rstest]
    #[case(BufferUsage::Vertex, false)]
    #[case(BufferUsage::DynamicVertex, true)]
    #[case(BufferUsage::Staging, true)]
    fn test_buffer_usage_host_visibility(#[case] usage: BufferUsage, #[case] host_visible: bool) {
        assert_eq!(usage.is_host_visible(), host_visible);
    }

    #[test]
    fn test_image_usage_aspect() {
        assert_eq!(
            ImageUsage::DepthTarget.aspect(vk::Format::D32_SFLOAT),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            ImageUsage::DepthTarget.aspect(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(
            ImageUsage::ColorTarget.aspect(vk::Format::R16G16B16A16_SFLOAT),
            vk::ImageAspectFlags::COLOR
        );
        assert!(
            ImageUsage::ColorTarget
                .to_vk_usage()
                .contains(vk::ImageUsageFlags::TRANSFER_SRC)
        );
    }

    #[test]
    fn test_transform_push_constant_size() {
        assert_eq!(TRANSFORM_PUSH_CONSTANT_SIZE, 64);
    }
}
