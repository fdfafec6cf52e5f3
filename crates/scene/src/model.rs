//! Model instances: a mesh drawn with a material at a transform.

use glam::Mat4;
use tracing::trace;

use crate::handle::{MaterialId, MeshId, ModelId, ModelTag, StorageKind};
use crate::pool::ResourcePool;

/// One drawable instance.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Model {
    pub mesh: MeshId,
    pub material: MaterialId,
    pub transform: Mat4,
}

/// Model pools, one per mesh storage kind.
///
/// A model lives in the pool matching its mesh, and its handle carries that
/// kind.
#[derive(Debug)]
pub struct ModelStore {
    static_models: ResourcePool<Model, ModelTag>,
    dynamic_models: ResourcePool<Model, ModelTag>,
}

impl Default for ModelStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelStore {
    pub fn new() -> Self {
        Self {
            static_models: ResourcePool::new(StorageKind::Static),
            dynamic_models: ResourcePool::new(StorageKind::Dynamic),
        }
    }

    fn pool(&self, kind: StorageKind) -> &ResourcePool<Model, ModelTag> {
        match kind {
            StorageKind::Static => &self.static_models,
            StorageKind::Dynamic => &self.dynamic_models,
        }
    }

    fn pool_mut(&mut self, kind: StorageKind) -> &mut ResourcePool<Model, ModelTag> {
        match kind {
            StorageKind::Static => &mut self.static_models,
            StorageKind::Dynamic => &mut self.dynamic_models,
        }
    }

    pub fn create(&mut self, mesh: MeshId, material: MaterialId, transform: Mat4) -> ModelId {
        let (id, _) = self.pool_mut(mesh.kind()).create(Model {
            mesh,
            material,
            transform,
        });
        trace!("Created model {:?} for mesh {:?}", id, mesh);
        id
    }

    /// # Panics
    ///
    /// Panics if `id` does not name a live model.
    pub fn destroy(&mut self, id: ModelId) -> Model {
        self.pool_mut(id.kind()).destroy(id)
    }

    pub fn contains(&self, id: ModelId) -> bool {
        self.pool(id.kind()).contains(id)
    }

    /// # Panics
    ///
    /// Panics if `id` does not name a live model.
    pub fn get(&self, id: ModelId) -> &Model {
        self.pool(id.kind()).get(id)
    }

    /// # Panics
    ///
    /// Panics if `id` does not name a live model.
    pub fn set_transform(&mut self, id: ModelId, transform: Mat4) {
        self.pool_mut(id.kind()).get_mut(id).transform = transform;
    }

    /// Live models, static pool first.
    pub fn iter(&self) -> impl Iterator<Item = (ModelId, &Model)> + '_ {
        self.static_models.iter().chain(self.dynamic_models.iter())
    }

    pub fn len(&self) -> usize {
        self.static_models.len() + self.dynamic_models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;

    fn mesh(index: u32, kind: StorageKind) -> MeshId {
        MeshId::new(index, kind)
    }

    #[test]
    fn test_model_handle_carries_mesh_kind() {
        let mut models = ModelStore::new();
        let material = MaterialId(0);
        let a = models.create(mesh(0, StorageKind::Static), material, Mat4::IDENTITY);
        let b = models.create(mesh(0, StorageKind::Dynamic), material, Mat4::IDENTITY);

        assert_eq!(a.kind(), StorageKind::Static);
        assert_eq!(b.kind(), StorageKind::Dynamic);
        // Same slot index in separate pools, distinct handles.
        assert_eq!(a.index(), b.index());
        assert_ne!(a, b);
        assert_eq!(models.get(b).mesh.kind(), StorageKind::Dynamic);
    }

    #[test]
    fn test_iteration_visits_static_pool_first() {
        let mut models = ModelStore::new();
        let material = MaterialId(0);
        let d = models.create(mesh(1, StorageKind::Dynamic), material, Mat4::IDENTITY);
        let s = models.create(mesh(2, StorageKind::Static), material, Mat4::IDENTITY);

        let order: Vec<ModelId> = models.iter().map(|(id, _)| id).collect();
        assert_eq!(order, vec![s, d]);
    }

    #[test]
    fn test_destroy_and_reuse() {
        let mut models = ModelStore::new();
        let material = MaterialId(0);
        let a = models.create(mesh(0, StorageKind::Static), material, Mat4::IDENTITY);
        let _b = models.create(mesh(0, StorageKind::Static), material, Mat4::IDENTITY);
        models.destroy(a);
        assert!(!models.contains(a));

        let c = models.create(mesh(1, StorageKind::Static), material, Mat4::IDENTITY);
        assert_eq!(c.index(), a.index());
        assert_eq!(models.len(), 2);
    }

    #[test]
    fn test_set_transform() {
        let mut models = ModelStore::new();
        let id = models.create(mesh(0, StorageKind::Static), MaterialId(0), Mat4::IDENTITY);
        let moved = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        models.set_transform(id, moved);
        assert_eq!(models.get(id).transform, moved);
    }
}
