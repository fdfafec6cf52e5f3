//! Static and dynamic vertex storage.
//!
//! Static meshes are uploaded once into device-local memory through a staging
//! buffer. Dynamic meshes own one host-visible buffer split into `F` equally
//! sized slots; each write goes to the next slot, and a slot is only
//! overwritten once the fence of the last frame that read it has signaled.

use std::sync::Arc;

use tracing::{debug, trace};
use vkr_rhi::{BufferDesc, BufferUsage, GpuBuffer, GpuDevice, GpuFence, Vertex};

use crate::error::{SceneError, SceneResult};
use crate::handle::{MeshId, MeshTag, StorageKind};
use crate::pool::ResourcePool;

/// Device-local mesh, immutable after upload.
pub struct StaticMesh<D: GpuDevice> {
    buffer: D::Buffer,
    vertex_count: u32,
}

impl<D: GpuDevice> StaticMesh<D> {
    /// Uploads `vertices` and blocks until the copy has completed.
    ///
    /// The staging buffer is released before returning, on success and on
    /// failure alike.
    pub fn new(device: &D, vertices: &[Vertex]) -> SceneResult<Self> {
        if vertices.is_empty() {
            return Err(SceneError::EmptyMesh);
        }
        let bytes: &[u8] = bytemuck::cast_slice(vertices);
        let size = bytes.len() as u64;

        let staging = device.create_buffer(&BufferDesc {
            size,
            usage: BufferUsage::Staging,
        })?;
        staging.write(0, bytes)?;

        let buffer = device.create_buffer(&BufferDesc {
            size,
            usage: BufferUsage::Vertex,
        })?;
        device.copy_buffer_blocking(&staging, &buffer, size)?;

        debug!("Uploaded static mesh: {} vertices", vertices.len());
        Ok(Self {
            buffer,
            vertex_count: vertices.len() as u32,
        })
    }

    #[inline]
    pub fn buffer(&self) -> &D::Buffer {
        &self.buffer
    }

    #[inline]
    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }
}

/// Host-visible ring of `F` vertex slots, each guarded by its own fence.
pub struct DynamicMesh<D: GpuDevice> {
    buffer: D::Buffer,
    slot_fences: Vec<Option<Arc<D::Fence>>>,
    reserved: u32,
    vertex_count: u32,
    cursor: usize,
}

impl<D: GpuDevice> DynamicMesh<D> {
    /// Allocates `slots * reserved` vertices. The cursor starts on the last
    /// slot so the first write lands in slot 0.
    pub fn new(device: &D, reserved: u32, slots: u32) -> SceneResult<Self> {
        if reserved == 0 {
            return Err(SceneError::EmptyMesh);
        }
        assert!(slots > 0, "dynamic mesh needs at least one slot");
        // Draw offsets are u32 vertex indices.
        if reserved.checked_mul(slots).is_none() {
            return Err(SceneError::MeshTooLarge { reserved, slots });
        }

        let size = Vertex::STRIDE * u64::from(reserved) * u64::from(slots);
        let buffer = device.create_buffer(&BufferDesc {
            size,
            usage: BufferUsage::DynamicVertex,
        })?;

        debug!(
            "Created dynamic mesh: {} vertices x {} slots",
            reserved, slots
        );
        Ok(Self {
            buffer,
            slot_fences: vec![None; slots as usize],
            reserved,
            vertex_count: 0,
            cursor: slots as usize - 1,
        })
    }

    /// Writes `vertices` into the next slot.
    ///
    /// Blocks while the GPU may still be reading that slot. On error the
    /// cursor and vertex count are left unchanged.
    pub fn write(&mut self, vertices: &[Vertex]) -> SceneResult<()> {
        if vertices.len() > self.reserved as usize {
            return Err(SceneError::CapacityExceeded {
                requested: vertices.len(),
                reserved: self.reserved,
            });
        }

        let next = (self.cursor + 1) % self.slot_fences.len();
        if let Some(fence) = &self.slot_fences[next] {
            trace!("Dynamic mesh waiting on slot {} fence", next);
            fence.wait(u64::MAX)?;
        }
        self.slot_fences[next] = None;

        let offset = self.slot_offset(next);
        self.buffer.write(offset, bytemuck::cast_slice(vertices))?;

        self.cursor = next;
        self.vertex_count = vertices.len() as u32;
        Ok(())
    }

    /// Records the fence of a frame that read the current slot.
    pub fn insert_fence(&mut self, fence: Arc<D::Fence>) {
        self.slot_fences[self.cursor] = Some(fence);
    }

    /// Clears every slot that waits on `fence`.
    ///
    /// Used when the frame that would have signaled `fence` was never submitted.
    pub fn forget_fence(&mut self, fence: &Arc<D::Fence>) {
        for slot in &mut self.slot_fences {
            if slot.as_ref().is_some_and(|f| Arc::ptr_eq(f, fence)) {
                *slot = None;
            }
        }
    }

    /// First vertex of the current slot in the shared buffer.
    #[inline]
    pub fn first_vertex(&self) -> u32 {
        self.reserved * self.cursor as u32
    }

    #[inline]
    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    #[inline]
    pub fn reserved(&self) -> u32 {
        self.reserved
    }

    #[inline]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slot_fences.len()
    }

    #[inline]
    pub fn buffer(&self) -> &D::Buffer {
        &self.buffer
    }

    /// Byte offset of `slot`.
    pub fn slot_offset(&self, slot: usize) -> u64 {
        Vertex::STRIDE * u64::from(self.reserved) * slot as u64
    }
}

/// Borrowed view of either mesh representation.
pub enum MeshRef<'a, D: GpuDevice> {
    Static(&'a StaticMesh<D>),
    Dynamic(&'a DynamicMesh<D>),
}

impl<D: GpuDevice> MeshRef<'_, D> {
    pub fn buffer(&self) -> &D::Buffer {
        match self {
            MeshRef::Static(mesh) => mesh.buffer(),
            MeshRef::Dynamic(mesh) => mesh.buffer(),
        }
    }

    /// `(vertex_count, first_vertex)` of the draw covering this mesh.
    pub fn draw_range(&self) -> (u32, u32) {
        match self {
            MeshRef::Static(mesh) => (mesh.vertex_count(), 0),
            MeshRef::Dynamic(mesh) => (mesh.vertex_count(), mesh.first_vertex()),
        }
    }
}

/// Owns every mesh, split by storage kind.
pub struct MeshStore<D: GpuDevice> {
    device: Arc<D>,
    static_meshes: ResourcePool<StaticMesh<D>, MeshTag>,
    dynamic_meshes: ResourcePool<DynamicMesh<D>, MeshTag>,
    slots: u32,
}

impl<D: GpuDevice> MeshStore<D> {
    /// `slots` is the ring length of every dynamic mesh created by this store.
    pub fn new(device: Arc<D>, slots: u32) -> Self {
        assert!(slots > 0, "dynamic meshes need at least one slot");
        Self {
            device,
            static_meshes: ResourcePool::new(StorageKind::Static),
            dynamic_meshes: ResourcePool::new(StorageKind::Dynamic),
            slots,
        }
    }

    pub fn create_static(&mut self, vertices: &[Vertex]) -> SceneResult<MeshId> {
        let mesh = StaticMesh::new(&*self.device, vertices)?;
        Ok(self.static_meshes.create(mesh).0)
    }

    pub fn create_dynamic(&mut self, reserved_vertices: u32) -> SceneResult<MeshId> {
        let mesh = DynamicMesh::new(&*self.device, reserved_vertices, self.slots)?;
        Ok(self.dynamic_meshes.create(mesh).0)
    }

    /// Writes new vertex data into a dynamic mesh.
    ///
    /// # Errors
    ///
    /// [`SceneError::NotDynamic`] for a static mesh, [`SceneError::UnknownMesh`]
    /// for a handle that does not name a live mesh, and
    /// [`SceneError::CapacityExceeded`] when `vertices` does not fit.
    pub fn update_dynamic(&mut self, id: MeshId, vertices: &[Vertex]) -> SceneResult<()> {
        match id.kind() {
            StorageKind::Static if self.static_meshes.contains(id) => {
                Err(SceneError::NotDynamic(id))
            }
            StorageKind::Dynamic if self.dynamic_meshes.contains(id) => {
                self.dynamic_meshes.get_mut(id).write(vertices)
            }
            _ => Err(SceneError::UnknownMesh(id)),
        }
    }

    pub fn contains(&self, id: MeshId) -> bool {
        match id.kind() {
            StorageKind::Static => self.static_meshes.contains(id),
            StorageKind::Dynamic => self.dynamic_meshes.contains(id),
        }
    }

    /// # Panics
    ///
    /// Panics if `id` does not name a live mesh.
    pub fn get(&self, id: MeshId) -> MeshRef<'_, D> {
        match id.kind() {
            StorageKind::Static => MeshRef::Static(self.static_meshes.get(id)),
            StorageKind::Dynamic => MeshRef::Dynamic(self.dynamic_meshes.get(id)),
        }
    }

    /// # Panics
    ///
    /// Panics if `id` is not a live dynamic mesh.
    pub fn dynamic(&self, id: MeshId) -> &DynamicMesh<D> {
        self.dynamic_meshes.get(id)
    }

    /// Records `fence` into the current slot of dynamic mesh `id`.
    pub fn insert_fence(&mut self, id: MeshId, fence: Arc<D::Fence>) {
        self.dynamic_meshes.get_mut(id).insert_fence(fence);
    }

    /// Drops every dynamic mesh reference to `fence`.
    pub fn forget_fence(&mut self, fence: &Arc<D::Fence>) {
        let ids: Vec<MeshId> = self.dynamic_meshes.iter().map(|(id, _)| id).collect();
        for id in ids {
            self.dynamic_meshes.get_mut(id).forget_fence(fence);
        }
    }

    pub fn slots(&self) -> u32 {
        self.slots
    }

    pub fn len(&self) -> usize {
        self.static_meshes.len() + self.dynamic_meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use vkr_rhi::headless::HeadlessDevice;

    use super::*;

    fn triangle(z: f32) -> [Vertex; 3] {
        [
            Vertex::new(-0.5, -0.5, z),
            Vertex::new(0.5, -0.5, z),
            Vertex::new(0.0, 0.5, z),
        ]
    }

    fn store(slots: u32) -> (Arc<HeadlessDevice>, MeshStore<HeadlessDevice>) {
        let device = Arc::new(HeadlessDevice::new());
        let store = MeshStore::new(Arc::clone(&device), slots);
        (device, store)
    }

    #[test]
    fn test_static_mesh_uploads_once() {
        let (device, mut store) = store(2);
        let id = store.create_static(&triangle(0.0)).unwrap();

        assert_eq!(id.kind(), StorageKind::Static);
        assert_eq!(device.upload_count(), 1);
        let MeshRef::Static(mesh) = store.get(id) else {
            panic!("expected a static mesh");
        };
        assert_eq!(mesh.vertex_count(), 3);
        assert_eq!(
            mesh.buffer().contents(),
            bytemuck::cast_slice::<Vertex, u8>(&triangle(0.0))
        );
    }

    #[test]
    fn test_empty_meshes_rejected() {
        let (_device, mut store) = store(2);
        assert!(matches!(store.create_static(&[]), Err(SceneError::EmptyMesh)));
        assert!(matches!(store.create_dynamic(0), Err(SceneError::EmptyMesh)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_oversized_ring_rejected_before_allocation() {
        let (_device, mut store) = store(8);
        let result = store.create_dynamic(u32::MAX / 4);
        assert!(matches!(
            result,
            Err(SceneError::MeshTooLarge {
                reserved,
                slots: 8
            }) if reserved == u32::MAX / 4
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_dynamic_buffer_sized_for_all_slots() {
        let (_device, mut store) = store(3);
        let id = store.create_dynamic(4).unwrap();
        let mesh = store.dynamic(id);
        assert_eq!(mesh.buffer().size(), 3 * 4 * Vertex::STRIDE);
        assert_eq!(mesh.vertex_count(), 0);
    }

    #[test]
    fn test_writes_rotate_through_slots() {
        let (_device, mut store) = store(3);
        let id = store.create_dynamic(3).unwrap();

        let mut first_vertices = Vec::new();
        for i in 0..4 {
            store.update_dynamic(id, &triangle(i as f32)).unwrap();
            first_vertices.push(store.dynamic(id).first_vertex());
        }
        assert_eq!(first_vertices, vec![0, 3, 6, 0]);

        let mesh = store.dynamic(id);
        let offset = mesh.slot_offset(1) as usize;
        let expected_vertices = triangle(1.0);
        let expected: &[u8] = bytemuck::cast_slice(&expected_vertices);
        assert_eq!(
            &mesh.buffer().contents()[offset..offset + expected.len()],
            expected
        );
    }

    #[test]
    fn test_shorter_write_shrinks_count() {
        let (_device, mut store) = store(2);
        let id = store.create_dynamic(3).unwrap();
        store.update_dynamic(id, &triangle(0.0)).unwrap();
        store.update_dynamic(id, &triangle(0.0)[..1]).unwrap();
        assert_eq!(store.dynamic(id).vertex_count(), 1);
        assert_eq!(store.get(id).draw_range(), (1, 3));
    }

    #[test]
    fn test_over_capacity_write_leaves_mesh_unchanged() {
        let (_device, mut store) = store(2);
        let id = store.create_dynamic(2).unwrap();
        store.update_dynamic(id, &triangle(0.0)[..2]).unwrap();
        let before = store.dynamic(id).buffer().contents();

        let result = store.update_dynamic(id, &triangle(1.0));
        assert!(matches!(
            result,
            Err(SceneError::CapacityExceeded {
                requested: 3,
                reserved: 2
            })
        ));

        let mesh = store.dynamic(id);
        assert_eq!(mesh.cursor(), 0);
        assert_eq!(mesh.vertex_count(), 2);
        assert_eq!(mesh.buffer().contents(), before);
    }

    #[test]
    fn test_update_rejects_static_and_unknown_meshes() {
        let (_device, mut store) = store(2);
        let id = store.create_static(&triangle(0.0)).unwrap();
        assert!(matches!(
            store.update_dynamic(id, &triangle(0.0)),
            Err(SceneError::NotDynamic(_))
        ));

        let missing = MeshId::new(5, StorageKind::Dynamic);
        assert!(matches!(
            store.update_dynamic(missing, &triangle(0.0)),
            Err(SceneError::UnknownMesh(_))
        ));
    }

    #[test]
    fn test_write_blocks_until_slot_fence_signals() {
        let (device, mut store) = store(2);
        let id = store.create_dynamic(3).unwrap();
        let fence = Arc::new(device.create_fence(false).unwrap());

        store.update_dynamic(id, &triangle(0.0)).unwrap();
        store.insert_fence(id, Arc::clone(&fence));
        // Slot 1 has no fence.
        store.update_dynamic(id, &triangle(1.0)).unwrap();

        let released = Arc::new(AtomicBool::new(false));
        let signaler = {
            let fence = (*fence).clone();
            let released = Arc::clone(&released);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                released.store(true, Ordering::SeqCst);
                fence.signal();
            })
        };

        // Slot 0 is still being read by the frame holding `fence`.
        store.update_dynamic(id, &triangle(2.0)).unwrap();
        assert!(released.load(Ordering::SeqCst));
        assert!(fence.is_signaled());
        assert_eq!(store.dynamic(id).first_vertex(), 0);
        signaler.join().unwrap();
    }

    #[test]
    fn test_write_to_signaled_slot_does_not_block() {
        let (device, mut store) = store(1);
        let id = store.create_dynamic(3).unwrap();
        let fence = Arc::new(device.create_fence(true).unwrap());

        store.update_dynamic(id, &triangle(0.0)).unwrap();
        store.insert_fence(id, fence);
        store.update_dynamic(id, &triangle(1.0)).unwrap();
        assert_eq!(store.dynamic(id).vertex_count(), 3);
    }

    #[test]
    fn test_forget_fence_unblocks_slot() {
        let (device, mut store) = store(1);
        let id = store.create_dynamic(3).unwrap();
        let never = Arc::new(device.create_fence(false).unwrap());

        store.update_dynamic(id, &triangle(0.0)).unwrap();
        store.insert_fence(id, Arc::clone(&never));
        store.forget_fence(&never);
        store.update_dynamic(id, &triangle(1.0)).unwrap();
    }
}
