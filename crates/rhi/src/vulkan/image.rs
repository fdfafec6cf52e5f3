//! Offscreen images used as render targets.
//!
//! The scene is rendered into a device-local color image plus a depth image
//! and then blitted to the presentable image, so neither target depends on the
//! swapchain format or size.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::debug;

use super::device::Device;
use crate::backend::{GpuImage, ImageDesc, ImageUsage, full_subresource_range};
use crate::error::{RhiError, RhiResult};

/// Device-local 2D image with a single view.
pub struct Image {
    device: Arc<Device>,
    image: vk::Image,
    view: vk::ImageView,
    allocation: Option<Allocation>,
    extent: vk::Extent2D,
    format: vk::Format,
    usage: ImageUsage,
}

impl Image {
    /// Creates the image, binds memory and creates its view.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero-sized extent or any Vulkan/allocator failure.
    /// Objects created before the failing step are released.
    pub fn new(device: Arc<Device>, desc: &ImageDesc) -> RhiResult<Self> {
        let extent = desc.extent;
        if extent.width == 0 || extent.height == 0 {
            return Err(RhiError::Image(format!(
                "Image dimensions must be greater than 0, got {}x{}",
                extent.width, extent.height
            )));
        }

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage.to_vk_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.handle().create_image(&image_info, None)? };

        let mut this = Self {
            device,
            image,
            view: vk::ImageView::null(),
            allocation: None,
            extent,
            format: desc.format,
            usage: desc.usage,
        };

        let requirements = unsafe {
            this.device
                .handle()
                .get_image_memory_requirements(this.image)
        };
        let allocation = this.device.allocator().allocate(&AllocationCreateDesc {
            name: "render target",
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;
        let bind = unsafe {
            this.device
                .handle()
                .bind_image_memory(this.image, allocation.memory(), allocation.offset())
        };
        this.allocation = Some(allocation);
        bind?;

        let view_info = vk::ImageViewCreateInfo::default()
            .image(this.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(desc.format)
            .subresource_range(full_subresource_range(desc.usage.aspect(desc.format)));
        this.view = unsafe { this.device.handle().create_image_view(&view_info, None)? };

        debug!(
            "Created {:?} image: {}x{} ({:?})",
            desc.usage, extent.width, extent.height, desc.format
        );
        Ok(this)
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    #[inline]
    pub fn usage(&self) -> ImageUsage {
        self.usage
    }
}

impl GpuImage for Image {
    fn raw(&self) -> vk::Image {
        self.image
    }

    fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn format(&self) -> vk::Format {
        self.format
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.handle().destroy_image_view(self.view, None);
            }
        }
        if let Some(allocation) = self.allocation.take()
            && let Err(e) = self.device.allocator().free(allocation)
        {
            tracing::error!("Failed to free image allocation: {:?}", e);
        }
        unsafe {
            self.device.handle().destroy_image(self.image, None);
        }
        debug!("Destroyed {:?} image", self.usage);
    }
}
