//! Platform layer for the vkr scene renderer.
//!
//! This crate provides the host side of the renderer:
//! - Window management via winit
//! - Surface extensions and Vulkan surface creation
//! - SPIR-V shader loading

mod shader;
mod window;

pub use shader::{ShaderLibrary, ShaderStage, load_spirv};
pub use window::{Surface, Window};

// Re-export winit types that users might need
pub use winit::event::WindowEvent;
pub use winit::event_loop::EventLoop;
