//! Materials: one graphics pipeline per vertex/fragment shader pair.

use std::sync::Arc;

use tracing::debug;
use vkr_rhi::{GpuDevice, PipelineDesc, TargetFormats};

use crate::error::SceneResult;
use crate::handle::MaterialId;

/// Compiled pipeline targeting the renderer's offscreen formats.
pub struct Material<D: GpuDevice> {
    pipeline: D::Pipeline,
}

impl<D: GpuDevice> Material<D> {
    #[inline]
    pub fn pipeline(&self) -> &D::Pipeline {
        &self.pipeline
    }
}

/// Append-only material storage.
pub struct MaterialStore<D: GpuDevice> {
    device: Arc<D>,
    formats: TargetFormats,
    materials: Vec<Material<D>>,
}

impl<D: GpuDevice> MaterialStore<D> {
    pub fn new(device: Arc<D>) -> Self {
        let formats = device.target_formats();
        Self {
            device,
            formats,
            materials: Vec::new(),
        }
    }

    /// Builds a pipeline from SPIR-V binaries.
    ///
    /// # Errors
    ///
    /// Returns a GPU error for malformed SPIR-V or pipeline creation failure.
    pub fn create(&mut self, vertex_spirv: &[u8], fragment_spirv: &[u8]) -> SceneResult<MaterialId> {
        let pipeline = self.device.create_pipeline(&PipelineDesc {
            vertex_spirv,
            fragment_spirv,
            color_format: self.formats.color,
            depth_format: self.formats.depth,
        })?;

        let id = MaterialId(self.materials.len() as u32);
        self.materials.push(Material { pipeline });
        debug!("Created material {}", id.index());
        Ok(id)
    }

    pub fn get(&self, id: MaterialId) -> Option<&Material<D>> {
        self.materials.get(id.index() as usize)
    }

    pub fn contains(&self, id: MaterialId) -> bool {
        (id.index() as usize) < self.materials.len()
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use vkr_rhi::RhiError;
    use vkr_rhi::headless::HeadlessDevice;

    use super::*;
    use crate::error::SceneError;

    #[test]
    fn test_materials_are_dense() {
        let mut store = MaterialStore::new(Arc::new(HeadlessDevice::new()));
        let a = store.create(&[0; 4], &[0; 4]).unwrap();
        let b = store.create(&[0; 8], &[0; 4]).unwrap();
        assert_eq!((a.index(), b.index()), (0, 1));
        assert!(store.get(b).is_some());
        assert!(!store.contains(MaterialId(2)));
    }

    #[test]
    fn test_misaligned_spirv_is_gpu_error() {
        let mut store = MaterialStore::new(Arc::new(HeadlessDevice::new()));
        let result = store.create(&[0; 5], &[0; 4]);
        assert!(matches!(result, Err(SceneError::Gpu(RhiError::Shader(_)))));
        assert!(store.is_empty());
    }
}
