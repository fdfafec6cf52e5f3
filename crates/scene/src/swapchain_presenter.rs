//! WSI presenter backed by a Vulkan swapchain.

use std::sync::Arc;

use tracing::{info, warn};
use vkr_core::PresentModePreference;
use vkr_rhi::vulkan::{Instance, Semaphore, Swapchain, VulkanDevice};
use vkr_rhi::{RhiResult, vk};

use crate::presenter::{AcquiredImage, Presenter};

/// Maps the configured preference onto a Vulkan present mode.
pub fn present_mode_from_preference(preference: PresentModePreference) -> vk::PresentModeKHR {
    match preference {
        PresentModePreference::Fifo => vk::PresentModeKHR::FIFO,
        PresentModePreference::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentModePreference::Immediate => vk::PresentModeKHR::IMMEDIATE,
    }
}

/// Presents through a swapchain created on a host-owned surface.
///
/// The surface must outlive the presenter.
pub struct SwapchainPresenter {
    swapchain: Swapchain,
    device: Arc<VulkanDevice>,
}

impl SwapchainPresenter {
    /// # Errors
    ///
    /// Returns an error if the surface cannot back a blit-target swapchain or
    /// swapchain creation fails.
    pub fn new(
        instance: &Instance,
        device: Arc<VulkanDevice>,
        surface: vk::SurfaceKHR,
        extent: vk::Extent2D,
        preference: PresentModePreference,
    ) -> RhiResult<Self> {
        let swapchain = Swapchain::new(
            instance,
            Arc::clone(device.device()),
            surface,
            extent,
            present_mode_from_preference(preference),
        )?;
        info!(
            "Swapchain presenter ready: {} images, {:?}",
            swapchain.image_count(),
            swapchain.present_mode()
        );
        Ok(Self { swapchain, device })
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.swapchain.present_mode()
    }

    pub fn present_mode_supported(&self, mode: vk::PresentModeKHR) -> RhiResult<bool> {
        self.swapchain.supports_present_mode(mode)
    }

    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    pub fn device(&self) -> &Arc<VulkanDevice> {
        &self.device
    }
}

impl Presenter<VulkanDevice> for SwapchainPresenter {
    fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    fn image_count(&self) -> u32 {
        self.swapchain.image_count()
    }

    fn final_layout(&self) -> vk::ImageLayout {
        vk::ImageLayout::PRESENT_SRC_KHR
    }

    fn acquire(&mut self, image_ready: &Semaphore) -> RhiResult<AcquiredImage> {
        let (index, suboptimal) = self.swapchain.acquire_next_image(image_ready.handle())?;
        Ok(AcquiredImage {
            index,
            image: self.swapchain.images()[index as usize],
            extent: self.swapchain.extent(),
            uses_semaphores: true,
            suboptimal,
        })
    }

    fn present(&mut self, image: &AcquiredImage, render_done: &Semaphore) -> RhiResult<bool> {
        self.swapchain.present(image.index, render_done.handle())
    }

    fn resize(&mut self, extent: vk::Extent2D) -> RhiResult<()> {
        let mode = self.swapchain.present_mode();
        self.swapchain.recreate(extent, mode)
    }

    /// Recreates the swapchain with `mode` at the current size.
    fn set_present_mode(&mut self, mode: vk::PresentModeKHR) -> RhiResult<bool> {
        if !self.present_mode_supported(mode)? {
            warn!("Present mode {:?} not supported by the surface", mode);
            return Ok(false);
        }
        if mode != self.swapchain.present_mode() {
            let extent = self.swapchain.extent();
            self.swapchain.recreate(extent, mode)?;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_present_mode_from_preference() {
        assert_eq!(
            present_mode_from_preference(PresentModePreference::Fifo),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            present_mode_from_preference(PresentModePreference::Mailbox),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            present_mode_from_preference(PresentModePreference::Immediate),
            vk::PresentModeKHR::IMMEDIATE
        );
    }
}
