//! Scene resources and frame presentation.
//!
//! This crate provides:
//! - Tagged handles and free-list resource pools
//! - Static and ring-buffered dynamic meshes
//! - Materials, model instances and a perspective camera
//! - Frame-in-flight synchronization
//! - Presenters (WSI swapchain and offscreen) and the [`SceneRenderer`]
//!
//! Everything is generic over [`vkr_rhi::GpuDevice`], so the same renderer
//! drives a Vulkan device or the headless test backend.

pub mod camera;
pub mod error;
pub mod frame;
pub mod handle;
pub mod material;
pub mod mesh;
pub mod model;
pub mod pool;
pub mod presenter;
pub mod renderer;
pub mod swapchain_presenter;

pub use camera::Camera;
pub use error::{SceneError, SceneResult};
pub use frame::{FrameSlot, FrameSynchronizer};
pub use handle::{Handle, MaterialId, MeshId, ModelId, StorageKind};
pub use material::{Material, MaterialStore};
pub use mesh::{DynamicMesh, MeshRef, MeshStore, StaticMesh};
pub use model::{Model, ModelStore};
pub use pool::ResourcePool;
pub use presenter::{AcquiredImage, OffscreenPresenter, Presenter};
pub use renderer::{FrameStatus, SceneRenderer};
pub use swapchain_presenter::{SwapchainPresenter, present_mode_from_preference};
