//! Scene-layer error types.

use thiserror::Error;
use vkr_rhi::RhiError;

use crate::handle::{MaterialId, MeshId, ModelId};

/// Errors returned by scene operations.
///
/// Handle misuse (wrong storage kind, destroyed slot) is a programming error
/// and panics instead.
#[derive(Error, Debug)]
pub enum SceneError {
    /// GPU or driver failure, including an out-of-date swapchain
    #[error(transparent)]
    Gpu(#[from] RhiError),

    /// Invalid renderer configuration
    #[error(transparent)]
    Config(#[from] vkr_core::Error),

    /// More vertices than a dynamic mesh reserved
    #[error("Dynamic mesh write of {requested} vertices exceeds reserved {reserved}")]
    CapacityExceeded { requested: usize, reserved: u32 },

    /// A mesh needs at least one vertex of storage
    #[error("Mesh must hold at least one vertex")]
    EmptyMesh,

    /// The slot ring would address more vertices than fit in a `u32`
    #[error("Dynamic mesh of {reserved} vertices x {slots} slots is too large")]
    MeshTooLarge { reserved: u32, slots: u32 },

    #[error("{0:?} is not a dynamic mesh")]
    NotDynamic(MeshId),

    #[error("Unknown material {0:?}")]
    UnknownMaterial(MaterialId),

    #[error("Unknown mesh {0:?}")]
    UnknownMesh(MeshId),

    #[error("Unknown model {0:?}")]
    UnknownModel(ModelId),
}

impl SceneError {
    /// True when the presenter must be resized before the next frame.
    pub fn is_out_of_date(&self) -> bool {
        matches!(self, SceneError::Gpu(e) if e.is_out_of_date())
    }
}

/// Result type alias for scene operations.
pub type SceneResult<T> = std::result::Result<T, SceneError>;
