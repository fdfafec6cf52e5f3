//! GPU-layer error types.

use thiserror::Error;

/// Errors reported by a [`GpuDevice`](crate::GpuDevice) implementation.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error, including `ERROR_OUT_OF_DATE_KHR` from acquire/present
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] ash::vk::Result),

    /// Failed to load the Vulkan library
    #[error("Failed to load Vulkan: {0}")]
    Loading(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    Allocator(#[from] gpu_allocator::AllocationError),

    /// No GPU satisfies the renderer's requirements
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// None of the candidate formats supports the requested usage
    #[error("No supported format for {0}")]
    UnsupportedFormat(&'static str),

    /// Shader module creation error
    #[error("Shader error: {0}")]
    Shader(String),

    /// Surface query or creation error
    #[error("Surface error: {0}")]
    Surface(String),

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    Swapchain(String),

    /// Pipeline creation error
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    /// Buffer write or creation outside the buffer's bounds
    #[error("Buffer error: {0}")]
    Buffer(String),

    /// Image creation with unusable parameters
    #[error("Image error: {0}")]
    Image(String),

    /// A fence wait ran out of time
    #[error("Timed out waiting for fence")]
    Timeout,
}

impl RhiError {
    /// True when the presentation surface changed and the swapchain must be recreated.
    pub fn is_out_of_date(&self) -> bool {
        matches!(self, RhiError::Vulkan(ash::vk::Result::ERROR_OUT_OF_DATE_KHR))
    }
}

/// Result type alias for GPU-layer operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_date_detection() {
        assert!(RhiError::Vulkan(ash::vk::Result::ERROR_OUT_OF_DATE_KHR).is_out_of_date());
        assert!(!RhiError::Vulkan(ash::vk::Result::ERROR_DEVICE_LOST).is_out_of_date());
        assert!(!RhiError::Timeout.is_out_of_date());
    }
}
