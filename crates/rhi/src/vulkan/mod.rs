//! Vulkan backend built on `ash` and `gpu-allocator`.
//!
//! The wrappers in the submodules own one Vulkan object each and release it
//! on drop. [`VulkanDevice`] ties them together behind [`GpuDevice`].
//!
//! Host-side setup order is instance -> surface -> physical device ->
//! [`Device`] -> [`VulkanDevice`] -> [`Swapchain`]; each step returns an owned
//! value, so a failure part way through drops what was already created.

mod buffer;
mod command;
mod device;
mod image;
mod instance;
mod physical_device;
mod pipeline;
mod shader;
mod swapchain;
mod sync;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ash::vk;
use glam::Mat4;
use tracing::{debug, info};

pub use buffer::Buffer;
pub use command::{CommandBuffer, CommandPool, full_blit_region};
pub use device::Device;
pub use image::Image;
pub use instance::Instance;
pub use physical_device::{PhysicalDeviceInfo, QueueFamilyIndices, select_physical_device};
pub use pipeline::{GraphicsPipelineBuilder, MaterialPipeline, PipelineLayout};
pub use shader::{SHADER_ENTRY_POINT, Shader, spirv_words};
pub use swapchain::{Swapchain, SwapchainSupportDetails};
pub use sync::{Fence, Semaphore};

use crate::backend::{
    BufferDesc, GpuDevice, GpuImage, ImageDesc, PipelineDesc, TargetFormats,
    full_subresource_range,
};
use crate::error::{RhiError, RhiResult};

/// Offscreen color formats, most preferred first.
const COLOR_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::R16G16B16A16_SFLOAT,
    vk::Format::R16G16B16A16_UNORM,
    vk::Format::R8G8B8A8_UNORM,
];

/// Depth formats, most preferred first.
const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D16_UNORM,
];

/// The color target is rendered into, then blitted with linear filtering.
const COLOR_TARGET_FEATURES: vk::FormatFeatureFlags = vk::FormatFeatureFlags::from_raw(
    vk::FormatFeatureFlags::COLOR_ATTACHMENT.as_raw()
        | vk::FormatFeatureFlags::BLIT_SRC.as_raw()
        | vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR.as_raw(),
);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// [`GpuDevice`] over a Vulkan 1.3 logical device.
///
/// All command buffers come from one pool. Allocation goes through the pool
/// mutex; recording happens on the thread driving the frame loop.
pub struct VulkanDevice {
    upload_cmd: Mutex<CommandBuffer>,
    command_pool: Mutex<CommandPool>,
    formats: TargetFormats,
    device: Arc<Device>,
}

impl VulkanDevice {
    /// Creates the command pool and picks offscreen target formats.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::UnsupportedFormat`] if no candidate format fits a
    /// target, or a Vulkan error if pool creation fails.
    pub fn new(instance: &Instance, device: Arc<Device>) -> RhiResult<Self> {
        let formats = TargetFormats {
            color: choose_format(
                instance,
                device.physical_device(),
                &COLOR_FORMAT_CANDIDATES,
                COLOR_TARGET_FEATURES,
            )
            .ok_or(RhiError::UnsupportedFormat("color target"))?,
            depth: choose_format(
                instance,
                device.physical_device(),
                &DEPTH_FORMAT_CANDIDATES,
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            )
            .ok_or(RhiError::UnsupportedFormat("depth target"))?,
        };

        let graphics_family = device
            .queue_families()
            .graphics_family
            .ok_or(RhiError::NoSuitableGpu)?;
        let command_pool = CommandPool::new(device.clone(), graphics_family)?;
        let upload_cmd = command_pool.allocate()?;

        info!(
            "Vulkan device ready: color {:?}, depth {:?}",
            formats.color, formats.depth
        );

        Ok(Self {
            upload_cmd: Mutex::new(upload_cmd),
            command_pool: Mutex::new(command_pool),
            formats,
            device,
        })
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

fn choose_format(
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
    candidates: &[vk::Format],
    required: vk::FormatFeatureFlags,
) -> Option<vk::Format> {
    candidates.iter().copied().find(|&format| {
        let properties = unsafe {
            instance
                .handle()
                .get_physical_device_format_properties(physical_device, format)
        };
        let supported = properties.optimal_tiling_features.contains(required);
        if !supported {
            debug!("Format {:?} lacks {:?}", format, required);
        }
        supported
    })
}

impl GpuDevice for VulkanDevice {
    type Buffer = Buffer;
    type Image = Image;
    type Fence = Fence;
    type Semaphore = Semaphore;
    type Pipeline = MaterialPipeline;
    type CommandBuffer = CommandBuffer;

    fn target_formats(&self) -> TargetFormats {
        self.formats
    }

    fn create_buffer(&self, desc: &BufferDesc) -> RhiResult<Buffer> {
        Buffer::new(self.device.clone(), desc.usage, desc.size)
    }

    fn create_image(&self, desc: &ImageDesc) -> RhiResult<Image> {
        Image::new(self.device.clone(), desc)
    }

    fn create_fence(&self, signaled: bool) -> RhiResult<Fence> {
        Fence::new(self.device.clone(), signaled)
    }

    fn create_semaphore(&self) -> RhiResult<Semaphore> {
        Semaphore::new(self.device.clone())
    }

    fn create_pipeline(&self, desc: &PipelineDesc<'_>) -> RhiResult<MaterialPipeline> {
        MaterialPipeline::new(self.device.clone(), desc)
    }

    fn allocate_command_buffer(&self) -> RhiResult<CommandBuffer> {
        lock(&self.command_pool).allocate()
    }

    fn copy_buffer_blocking(&self, src: &Buffer, dst: &Buffer, size: u64) -> RhiResult<()> {
        let _pool = lock(&self.command_pool);
        let mut cmd = lock(&self.upload_cmd);

        cmd.begin()?;
        cmd.copy_buffer(src.handle(), dst.handle(), size);
        cmd.end()?;

        let command_buffers = [cmd.handle()];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
        unsafe {
            self.device
                .submit_graphics(&[submit_info], vk::Fence::null())?;
        }
        self.device.wait_graphics_idle()?;

        debug!("Uploaded {} bytes through staging buffer", size);
        Ok(())
    }

    fn begin_commands(&self, cmd: &mut CommandBuffer) -> RhiResult<()> {
        cmd.begin()
    }

    fn end_commands(&self, cmd: &mut CommandBuffer) -> RhiResult<()> {
        cmd.end()
    }

    fn cmd_begin_scene_pass(
        &self,
        cmd: &mut CommandBuffer,
        color: &Image,
        depth: &Image,
        clear_color: [f32; 4],
    ) {
        // The previous use of both targets finished before this slot's fence
        // signaled; their contents are discarded.
        let barriers = [
            vk::ImageMemoryBarrier::default()
                .src_access_mask(vk::AccessFlags::empty())
                .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(color.raw())
                .subresource_range(full_subresource_range(
                    color.usage().aspect(color.format()),
                )),
            vk::ImageMemoryBarrier::default()
                .src_access_mask(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
                .dst_access_mask(
                    vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                )
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(depth.raw())
                .subresource_range(full_subresource_range(
                    depth.usage().aspect(depth.format()),
                )),
        ];
        cmd.pipeline_barrier(
            vk::PipelineStageFlags::TRANSFER | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            &barriers,
        );

        let color_attachments = [vk::RenderingAttachmentInfo::default()
            .image_view(color.view())
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: clear_color,
                },
            })];
        let depth_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(depth.view())
            .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .clear_value(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            });

        let extent = color.extent();
        let render_area = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent,
        };
        let rendering_info = vk::RenderingInfo::default()
            .render_area(render_area)
            .layer_count(1)
            .color_attachments(&color_attachments)
            .depth_attachment(&depth_attachment);

        cmd.begin_rendering(&rendering_info);
        cmd.set_viewport(vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        });
        cmd.set_scissor(render_area);
    }

    fn cmd_end_scene_pass(&self, cmd: &mut CommandBuffer, color: &Image) {
        cmd.end_rendering();

        let barrier = vk::ImageMemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .dst_access_mask(vk::AccessFlags::TRANSFER_READ)
            .old_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .new_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(color.raw())
            .subresource_range(full_subresource_range(vk::ImageAspectFlags::COLOR));
        cmd.pipeline_barrier(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::PipelineStageFlags::TRANSFER,
            &[barrier],
        );
    }

    fn cmd_bind_pipeline(&self, cmd: &mut CommandBuffer, pipeline: &MaterialPipeline) {
        cmd.bind_graphics_pipeline(pipeline.handle());
    }

    fn cmd_push_transform(
        &self,
        cmd: &mut CommandBuffer,
        pipeline: &MaterialPipeline,
        transform: &Mat4,
    ) {
        cmd.push_constants(
            pipeline.layout(),
            vk::ShaderStageFlags::VERTEX,
            0,
            transform,
        );
    }

    fn cmd_bind_vertex_buffer(&self, cmd: &mut CommandBuffer, buffer: &Buffer) {
        cmd.bind_vertex_buffer(buffer.handle());
    }

    fn cmd_draw(&self, cmd: &mut CommandBuffer, vertex_count: u32, first_vertex: u32) {
        cmd.draw(vertex_count, first_vertex);
    }

    fn cmd_pipeline_barrier(
        &self,
        cmd: &mut CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barrier: &vk::ImageMemoryBarrier<'_>,
    ) {
        cmd.pipeline_barrier(src_stage, dst_stage, std::slice::from_ref(barrier));
    }

    fn cmd_blit_to(
        &self,
        cmd: &mut CommandBuffer,
        src: &Image,
        dst: vk::Image,
        dst_extent: vk::Extent2D,
    ) {
        cmd.blit_image(
            src.raw(),
            dst,
            full_blit_region(src.extent(), dst_extent),
            vk::Filter::LINEAR,
        );
    }

    fn submit(
        &self,
        cmd: &CommandBuffer,
        wait: Option<(&Semaphore, vk::PipelineStageFlags)>,
        signal: Option<&Semaphore>,
        fence: &Fence,
    ) -> RhiResult<()> {
        let (wait_semaphores, wait_stages): (Vec<_>, Vec<_>) = wait
            .map(|(semaphore, stage)| (semaphore.handle(), stage))
            .into_iter()
            .unzip();
        let signal_semaphores: Vec<_> = signal.map(Semaphore::handle).into_iter().collect();
        let command_buffers = [cmd.handle()];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe { self.device.submit_graphics(&[submit_info], fence.handle()) }
    }

    fn wait_idle(&self) -> RhiResult<()> {
        self.device.wait_idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_candidates_ordered() {
        assert_eq!(COLOR_FORMAT_CANDIDATES[0], vk::Format::R16G16B16A16_SFLOAT);
        assert_eq!(DEPTH_FORMAT_CANDIDATES[0], vk::Format::D32_SFLOAT);
        assert_eq!(
            DEPTH_FORMAT_CANDIDATES.last(),
            Some(&vk::Format::D16_UNORM)
        );
    }

    #[test]
    fn test_color_target_features() {
        assert!(COLOR_TARGET_FEATURES.contains(vk::FormatFeatureFlags::BLIT_SRC));
        assert!(COLOR_TARGET_FEATURES.contains(vk::FormatFeatureFlags::COLOR_ATTACHMENT));
    }

    #[test]
    fn test_vulkan_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<VulkanDevice>();
    }
}
