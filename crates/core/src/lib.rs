//! Core utilities for the vkr scene renderer.
//!
//! This crate provides foundational types used across the workspace:
//! - Error types and result aliases
//! - Logging initialization
//! - Renderer configuration loaded from TOML
//! - Frame clock

mod clock;
pub mod config;
mod error;
mod logging;

pub use clock::FrameClock;
pub use config::{PresentModePreference, RendererConfig};
pub use error::{Error, Result};
pub use logging::init_logging;
