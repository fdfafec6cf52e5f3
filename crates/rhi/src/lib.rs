//! GPU capability layer (Render Hardware Interface).
//!
//! [`GpuDevice`] is the only surface the scene layer sees. Two backends
//! implement it:
//! - [`vulkan::VulkanDevice`]: Vulkan 1.3 through `ash` and `gpu-allocator`,
//!   with dynamic rendering and a WSI [`vulkan::Swapchain`]
//! - [`headless::HeadlessDevice`]: CPU stand-in recording every submission,
//!   used by tests
//!
//! Vulkan enums and flags are re-exported as [`vk`] and used as the shared
//! vocabulary of both backends.

mod backend;
mod error;
mod vertex;

pub mod headless;
pub mod vulkan;

pub use backend::{
    BufferDesc, BufferUsage, GpuBuffer, GpuDevice, GpuFence, GpuImage, ImageDesc, ImageUsage,
    PipelineDesc, TRANSFORM_PUSH_CONSTANT_SIZE, TargetFormats, full_subresource_range,
};
pub use error::{RhiError, RhiResult};
pub use vertex::Vertex;

pub use ash::vk;
