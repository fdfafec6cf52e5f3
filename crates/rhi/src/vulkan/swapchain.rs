//! Swapchain management.
//!
//! The renderer never draws into swapchain images directly: each frame's
//! offscreen color target is blitted into the acquired image, so the images
//! are created with `TRANSFER_DST` usage and no views.
//!
//! The surface itself is owned by the host; it must outlive the swapchain.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use super::device::Device;
use super::instance::Instance;
use crate::error::{RhiError, RhiResult};

/// Swapchain surface support details.
#[derive(Debug, Clone)]
pub struct SwapchainSupportDetails {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    /// Queries swapchain support details for a physical device and surface.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the surface queries fail.
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)?
        };
        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
        };

        debug!(
            "Swapchain support: {} formats, {} present modes, image count: {}-{}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            if capabilities.max_image_count == 0 {
                "unlimited".to_string()
            } else {
                capabilities.max_image_count.to_string()
            }
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// True if at least one format and one present mode are available and
    /// images can be blitted into.
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty()
            && !self.present_modes.is_empty()
            && self
                .capabilities
                .supported_usage_flags
                .contains(vk::ImageUsageFlags::TRANSFER_DST)
    }
}

/// Handle plus the parameters it was created with.
struct SwapchainState {
    handle: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    format: vk::Format,
    color_space: vk::ColorSpaceKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
}

/// Vulkan swapchain wrapper.
///
/// Not thread-safe: acquire, present and recreate happen on the thread
/// driving the frame loop.
pub struct Swapchain {
    device: Arc<Device>,
    surface_loader: ash::khr::surface::Instance,
    swapchain_loader: ash::khr::swapchain::Device,
    surface: vk::SurfaceKHR,
    state: SwapchainState,
}

impl Swapchain {
    /// Creates a swapchain for `surface`.
    ///
    /// `extent` is only used when the surface leaves the size to the
    /// swapchain. `present_mode` falls back to FIFO when unsupported.
    ///
    /// # Errors
    ///
    /// Returns an error if surface queries fail, the surface cannot be
    /// blitted into, its extent is zero or swapchain creation fails.
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        extent: vk::Extent2D,
        present_mode: vk::PresentModeKHR,
    ) -> RhiResult<Self> {
        let surface_loader = instance.surface_loader();
        let swapchain_loader = ash::khr::swapchain::Device::new(instance.handle(), device.handle());

        let state = create_state(
            &device,
            &surface_loader,
            &swapchain_loader,
            surface,
            extent,
            present_mode,
            vk::SwapchainKHR::null(),
        )?;

        Ok(Self {
            device,
            surface_loader,
            swapchain_loader,
            surface,
            state,
        })
    }

    /// Recreates the swapchain for a new size and/or present mode.
    ///
    /// Waits for the device to go idle, passes the old handle to the driver
    /// for resource reuse, then destroys it. On failure the old swapchain is
    /// kept.
    ///
    /// # Errors
    ///
    /// Returns an error if idling the device or creating the new swapchain fails.
    pub fn recreate(
        &mut self,
        extent: vk::Extent2D,
        present_mode: vk::PresentModeKHR,
    ) -> RhiResult<()> {
        self.device.wait_idle()?;

        info!(
            "Recreating swapchain: {}x{}, {:?}",
            extent.width, extent.height, present_mode
        );

        let state = create_state(
            &self.device,
            &self.surface_loader,
            &self.swapchain_loader,
            self.surface,
            extent,
            present_mode,
            self.state.handle,
        )?;
        let old = std::mem::replace(&mut self.state, state);
        unsafe {
            self.swapchain_loader.destroy_swapchain(old.handle, None);
        }
        Ok(())
    }

    /// Whether the surface supports `mode`.
    ///
    /// # Errors
    ///
    /// Returns an error if the surface query fails.
    pub fn supports_present_mode(&self, mode: vk::PresentModeKHR) -> RhiResult<bool> {
        let modes = unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(
                    self.device.physical_device(),
                    self.surface,
                )?
        };
        Ok(modes.contains(&mode))
    }

    /// Acquires the next image, signaling `semaphore` when it is ready.
    ///
    /// Returns the image index and whether the swapchain is suboptimal.
    ///
    /// # Errors
    ///
    /// `ERROR_OUT_OF_DATE_KHR` is returned as [`RhiError::Vulkan`]; the caller
    /// is expected to recreate.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> RhiResult<(u32, bool)> {
        let acquired = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.state.handle,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )?
        };
        Ok(acquired)
    }

    /// Queues `image_index` for presentation after `wait_semaphore`.
    ///
    /// Returns true if the swapchain is suboptimal.
    ///
    /// # Errors
    ///
    /// Same as [`acquire_next_image`](Self::acquire_next_image).
    pub fn present(&self, image_index: u32, wait_semaphore: vk::Semaphore) -> RhiResult<bool> {
        let swapchains = [self.state.handle];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let suboptimal = unsafe {
            self.swapchain_loader
                .queue_present(self.device.present_queue(), &present_info)?
        };
        Ok(suboptimal)
    }

    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.state.handle
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.state.format
    }

    #[inline]
    pub fn color_space(&self) -> vk::ColorSpaceKHR {
        self.state.color_space
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.state.extent
    }

    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.state.present_mode
    }

    #[inline]
    pub fn images(&self) -> &[vk::Image] {
        &self.state.images
    }

    #[inline]
    pub fn image_count(&self) -> u32 {
        self.state.images.len() as u32
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            self.swapchain_loader
                .destroy_swapchain(self.state.handle, None);
        }
        info!(
            "Swapchain destroyed (was {}x{}, {} images)",
            self.state.extent.width,
            self.state.extent.height,
            self.state.images.len()
        );
    }
}

fn create_state(
    device: &Device,
    surface_loader: &ash::khr::surface::Instance,
    swapchain_loader: &ash::khr::swapchain::Device,
    surface: vk::SurfaceKHR,
    requested_extent: vk::Extent2D,
    preferred_mode: vk::PresentModeKHR,
    old_swapchain: vk::SwapchainKHR,
) -> RhiResult<SwapchainState> {
    let support = SwapchainSupportDetails::query(device.physical_device(), surface, surface_loader)?;
    if !support.is_adequate() {
        return Err(RhiError::Swapchain(
            "Surface offers no format, no present mode or no TRANSFER_DST usage".to_string(),
        ));
    }

    let surface_format = choose_surface_format(&support.formats);
    let present_mode = choose_present_mode(&support.present_modes, preferred_mode);
    let extent = choose_extent(&support.capabilities, requested_extent);
    if extent.width == 0 || extent.height == 0 {
        return Err(RhiError::Swapchain(format!(
            "Surface extent is {}x{}",
            extent.width, extent.height
        )));
    }
    let image_count = determine_image_count(&support.capabilities);

    let queue_families = device.queue_families();
    let (Some(graphics_family), Some(present_family)) =
        (queue_families.graphics_family, queue_families.present_family)
    else {
        return Err(RhiError::Swapchain(
            "Device has no graphics or present queue".to_string(),
        ));
    };
    let family_indices = [graphics_family, present_family];
    let (sharing_mode, family_indices) = if graphics_family != present_family {
        (vk::SharingMode::CONCURRENT, &family_indices[..])
    } else {
        (vk::SharingMode::EXCLUSIVE, &[][..])
    };

    info!(
        "Creating swapchain: {}x{}, format {:?}, present mode {:?}, {} images",
        extent.width, extent.height, surface_format.format, present_mode, image_count
    );

    let create_info = vk::SwapchainCreateInfoKHR::default()
        .surface(surface)
        .min_image_count(image_count)
        .image_format(surface_format.format)
        .image_color_space(surface_format.color_space)
        .image_extent(extent)
        .image_array_layers(1)
        .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
        .image_sharing_mode(sharing_mode)
        .queue_family_indices(family_indices)
        .pre_transform(support.capabilities.current_transform)
        .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
        .present_mode(present_mode)
        .clipped(true)
        .old_swapchain(old_swapchain);

    let handle = unsafe { swapchain_loader.create_swapchain(&create_info, None)? };
    let images = match unsafe { swapchain_loader.get_swapchain_images(handle) } {
        Ok(images) => images,
        Err(e) => {
            unsafe { swapchain_loader.destroy_swapchain(handle, None) };
            return Err(e.into());
        }
    };
    debug!("Swapchain created with {} images", images.len());

    Ok(SwapchainState {
        handle,
        images,
        format: surface_format.format,
        color_space: surface_format.color_space,
        extent,
        present_mode,
    })
}

/// Prefers an sRGB format with the sRGB non-linear color space.
fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    const PREFERRED: [vk::Format; 2] = [vk::Format::B8G8R8A8_SRGB, vk::Format::R8G8B8A8_SRGB];

    let preferred = PREFERRED.iter().find_map(|&wanted| {
        formats.iter().copied().find(|f| {
            f.format == wanted && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
    });
    if let Some(format) = preferred {
        return format;
    }

    let fallback = formats.first().copied().unwrap_or_default();
    warn!("Using first available surface format: {:?}", fallback.format);
    fallback
}

/// FIFO is always available, so it is the fallback for any other mode.
fn choose_present_mode(
    present_modes: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if present_modes.contains(&preferred) {
        return preferred;
    }
    warn!("Present mode {:?} not supported, using FIFO", preferred);
    vk::PresentModeKHR::FIFO
}

/// Uses the surface's current extent unless it is the `u32::MAX` sentinel,
/// in which case the requested size is clamped to the surface limits.
fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, requested: vk::Extent2D) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: requested.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: requested.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// At least three images, never below the surface minimum, never above its
/// maximum (0 means unbounded).
fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count.max(3);
    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn test_choose_surface_format_prefers_srgb() {
        let formats = vec![
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        assert_eq!(
            choose_surface_format(&formats).format,
            vk::Format::R8G8B8A8_SRGB
        );
    }

    #[test]
    fn test_choose_surface_format_fallback() {
        let formats = vec![vk::SurfaceFormatKHR {
            format: vk::Format::A2B10G10R10_UNORM_PACK32,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];
        assert_eq!(
            choose_surface_format(&formats).format,
            vk::Format::A2B10G10R10_UNORM_PACK32
        );
    }

    #[test]
    fn test_choose_present_mode() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_choose_extent_uses_current() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: extent(1920, 1080),
            ..Default::default()
        };
        assert_eq!(choose_extent(&capabilities, extent(800, 600)), extent(1920, 1080));
    }

    #[test]
    fn test_choose_extent_clamps_to_limits() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: extent(u32::MAX, u32::MAX),
            min_image_extent: extent(100, 100),
            max_image_extent: extent(2000, 2000),
            ..Default::default()
        };
        assert_eq!(choose_extent(&capabilities, extent(3000, 3000)), extent(2000, 2000));
        assert_eq!(choose_extent(&capabilities, extent(50, 50)), extent(100, 100));
        assert_eq!(choose_extent(&capabilities, extent(800, 600)), extent(800, 600));
    }

    #[test]
    fn test_determine_image_count() {
        let bounded = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 2,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&bounded), 2);

        let roomy = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 8,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&roomy), 3);

        let high_min = vk::SurfaceCapabilitiesKHR {
            min_image_count: 4,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&high_min), 4);
    }

    #[test]
    fn test_support_requires_transfer_dst() {
        let mut details = SwapchainSupportDetails {
            capabilities: vk::SurfaceCapabilitiesKHR {
                supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT,
                ..Default::default()
            },
            formats: vec![vk::SurfaceFormatKHR::default()],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        assert!(!details.is_adequate());

        details.capabilities.supported_usage_flags |= vk::ImageUsageFlags::TRANSFER_DST;
        assert!(details.is_adequate());

        details.present_modes.clear();
        assert!(!details.is_adequate());
    }
}
