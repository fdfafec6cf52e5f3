//! Frame orchestration.
//!
//! [`SceneRenderer`] owns every scene resource together with the frame
//! synchronization objects and drives one frame per [`render_frame`] call:
//!
//! 1. wait for the current frame slot's fence
//! 2. acquire a presentable image
//! 3. draw every live model into the slot's offscreen color/depth targets
//! 4. blit the color target into the presentable image, with the layout
//!    transitions recorded through the presenter's hooks
//! 5. submit, record the frame fence into every dynamic mesh that was read,
//!    present and move to the next slot
//!
//! [`render_frame`]: SceneRenderer::render_frame

use std::sync::Arc;

use glam::Mat4;
use tracing::{debug, error, info, trace};
use vkr_core::RendererConfig;
use vkr_rhi::{
    GpuDevice, GpuFence, ImageDesc, ImageUsage, RhiError, Vertex, full_subresource_range, vk,
};

use crate::camera::Camera;
use crate::error::{SceneError, SceneResult};
use crate::frame::FrameSynchronizer;
use crate::handle::{MaterialId, MeshId, ModelId, StorageKind};
use crate::material::MaterialStore;
use crate::mesh::MeshStore;
use crate::model::ModelStore;
use crate::presenter::{AcquiredImage, Presenter};

/// Outcome of a presented frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    Presented,
    /// Presented, but the target no longer matches the surface exactly and
    /// should be resized.
    Suboptimal,
}

/// Offscreen attachments of one frame slot.
struct RenderTargets<D: GpuDevice> {
    color: D::Image,
    depth: D::Image,
}

impl<D: GpuDevice> RenderTargets<D> {
    fn new(device: &D, extent: vk::Extent2D) -> SceneResult<Self> {
        let formats = device.target_formats();
        Ok(Self {
            color: device.create_image(&ImageDesc {
                extent,
                format: formats.color,
                usage: ImageUsage::ColorTarget,
            })?,
            depth: device.create_image(&ImageDesc {
                extent,
                format: formats.depth,
                usage: ImageUsage::DepthTarget,
            })?,
        })
    }
}

/// Scene resources plus the per-frame pipeline that draws and presents them.
///
/// Dropping the renderer waits for the device to go idle before any
/// resource is released.
pub struct SceneRenderer<D: GpuDevice, P: Presenter<D>> {
    // Field order is drop order.
    frames: FrameSynchronizer<D>,
    targets: Vec<RenderTargets<D>>,
    models: ModelStore,
    meshes: MeshStore<D>,
    materials: MaterialStore<D>,
    camera: Camera,
    clear_color: [f32; 4],
    extent: vk::Extent2D,
    presenter: P,
    device: Arc<D>,
}

impl<D: GpuDevice, P: Presenter<D>> SceneRenderer<D, P> {
    /// Creates the frame slots and their `render_extent` offscreen targets.
    ///
    /// # Errors
    ///
    /// Returns [`SceneError::Config`] for an invalid configuration and a GPU
    /// error if any object cannot be created; objects created before the
    /// failure are released.
    pub fn new(
        device: Arc<D>,
        presenter: P,
        config: &RendererConfig,
        render_extent: vk::Extent2D,
    ) -> SceneResult<Self> {
        config.validate()?;
        if render_extent.width == 0 || render_extent.height == 0 {
            return Err(RhiError::Image(format!(
                "Render extent must be greater than 0, got {}x{}",
                render_extent.width, render_extent.height
            ))
            .into());
        }

        let frames = FrameSynchronizer::new(&*device, config.frames_in_flight)?;
        let targets = (0..frames.slot_count())
            .map(|_| RenderTargets::new(&*device, render_extent))
            .collect::<SceneResult<Vec<_>>>()?;

        let aspect = render_extent.width as f32 / render_extent.height as f32;
        let camera = Camera::from_config(&config.camera, aspect);

        info!(
            "Scene renderer created: {} frames in flight, {} dynamic mesh slots, {}x{} targets",
            config.frames_in_flight,
            config.dynamic_mesh_slots,
            render_extent.width,
            render_extent.height
        );

        Ok(Self {
            frames,
            targets,
            models: ModelStore::new(),
            meshes: MeshStore::new(Arc::clone(&device), config.dynamic_mesh_slots),
            materials: MaterialStore::new(Arc::clone(&device)),
            camera,
            clear_color: config.clear_color,
            extent: render_extent,
            presenter,
            device,
        })
    }

    /// Uploads an immutable mesh. Blocks until the upload has completed.
    pub fn create_static_mesh(&mut self, vertices: &[Vertex]) -> SceneResult<MeshId> {
        self.meshes.create_static(vertices)
    }

    /// Creates a streaming mesh holding up to `reserved_vertices` per write.
    pub fn create_dynamic_mesh(&mut self, reserved_vertices: u32) -> SceneResult<MeshId> {
        self.meshes.create_dynamic(reserved_vertices)
    }

    /// Replaces the vertices of a dynamic mesh.
    ///
    /// Blocks if the ring slot being written is still read by a frame in
    /// flight.
    pub fn update_dynamic_mesh(&mut self, id: MeshId, vertices: &[Vertex]) -> SceneResult<()> {
        self.meshes.update_dynamic(id, vertices)
    }

    pub fn create_material(
        &mut self,
        vertex_spirv: &[u8],
        fragment_spirv: &[u8],
    ) -> SceneResult<MaterialId> {
        self.materials.create(vertex_spirv, fragment_spirv)
    }

    /// Adds an instance of `mesh` drawn with `material`.
    ///
    /// The returned handle carries the mesh's storage kind.
    pub fn create_model(
        &mut self,
        mesh: MeshId,
        material: MaterialId,
        transform: Mat4,
    ) -> SceneResult<ModelId> {
        if !self.meshes.contains(mesh) {
            return Err(SceneError::UnknownMesh(mesh));
        }
        if !self.materials.contains(material) {
            return Err(SceneError::UnknownMaterial(material));
        }
        Ok(self.models.create(mesh, material, transform))
    }

    /// Removes a model. Its handle must not be used afterwards.
    pub fn destroy_model(&mut self, id: ModelId) -> SceneResult<()> {
        if !self.models.contains(id) {
            return Err(SceneError::UnknownModel(id));
        }
        self.models.destroy(id);
        Ok(())
    }

    pub fn set_model_transform(&mut self, id: ModelId, transform: Mat4) -> SceneResult<()> {
        if !self.models.contains(id) {
            return Err(SceneError::UnknownModel(id));
        }
        self.models.set_transform(id, transform);
        Ok(())
    }

    pub fn model_transform(&self, id: ModelId) -> SceneResult<Mat4> {
        if !self.models.contains(id) {
            return Err(SceneError::UnknownModel(id));
        }
        Ok(self.models.get(id).transform)
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    pub fn set_clear_color(&mut self, clear_color: [f32; 4]) {
        self.clear_color = clear_color;
    }

    /// Size of the offscreen targets, independent of the presentable images.
    pub fn render_extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Index of the frame slot the next [`render_frame`](Self::render_frame) uses.
    pub fn frame_index(&self) -> usize {
        self.frames.current_index()
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames.slot_count()
    }

    pub fn meshes(&self) -> &MeshStore<D> {
        &self.meshes
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    /// Mutable access for presenter-specific operations. Anything that
    /// recreates presentable images must go through [`resize`](Self::resize)
    /// or [`set_present_mode`](Self::set_present_mode) instead.
    pub fn presenter_mut(&mut self) -> &mut P {
        &mut self.presenter
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    /// Recreates the presentable images for a new size.
    ///
    /// Waits for the device to go idle first. Semaphores are recreated too,
    /// since an aborted frame may have left one signaled.
    pub fn resize(&mut self, width: u32, height: u32) -> SceneResult<()> {
        self.device.wait_idle()?;
        self.presenter.resize(vk::Extent2D { width, height })?;
        self.frames.recreate_semaphores(&*self.device)?;
        debug!("Renderer resized presenter to {}x{}", width, height);
        Ok(())
    }

    /// Switches the presenter to `mode`.
    ///
    /// Waits for the device to go idle and recreates the semaphores along with
    /// the presentable images. Returns false, changing nothing, when the
    /// presenter does not support `mode`.
    pub fn set_present_mode(&mut self, mode: vk::PresentModeKHR) -> SceneResult<bool> {
        self.device.wait_idle()?;
        if !self.presenter.set_present_mode(mode)? {
            return Ok(false);
        }
        self.frames.recreate_semaphores(&*self.device)?;
        info!("Present mode switched to {:?}", mode);
        Ok(true)
    }

    /// Draws and presents one frame.
    ///
    /// # Errors
    ///
    /// Any GPU failure aborts the frame and is returned unchanged; an
    /// out-of-date presenter shows up as [`SceneError::is_out_of_date`] and
    /// needs a [`resize`](Self::resize). Resources stay intact, and a failure
    /// after the image was acquired leaves the frame slot ready for a retry.
    pub fn render_frame(&mut self) -> SceneResult<FrameStatus> {
        self.frames.wait_current()?;
        let slot_index = self.frames.current_index();

        let acquired = self.presenter.acquire(&self.frames.current().image_ready)?;

        let dynamic_meshes = match self.record_and_submit(&acquired) {
            Ok(dynamic_meshes) => dynamic_meshes,
            Err(e) => {
                error!("Frame {} aborted: {}", slot_index, e);
                if let Err(cleanup) = self.abort_frame(&acquired) {
                    error!("Failed to clean up aborted frame {}: {}", slot_index, cleanup);
                }
                return Err(e);
            }
        };

        let fence = Arc::clone(&self.frames.current().fence);
        for id in dynamic_meshes {
            self.meshes.insert_fence(id, Arc::clone(&fence));
        }

        let presented = self
            .presenter
            .present(&acquired, &self.frames.current().render_done);
        self.frames.advance();
        let suboptimal = presented? || acquired.suboptimal;

        trace!(
            "Frame {} presented to image {} ({} models)",
            slot_index,
            acquired.index,
            self.models.len()
        );
        Ok(if suboptimal {
            FrameStatus::Suboptimal
        } else {
            FrameStatus::Presented
        })
    }

    /// Records the current slot's command buffer and submits it. Returns the
    /// dynamic meshes the frame reads.
    fn record_and_submit(&mut self, acquired: &AcquiredImage) -> SceneResult<Vec<MeshId>> {
        let device = &*self.device;
        let slot_index = self.frames.current_index();
        let slot = self.frames.current_mut();
        let cmd = &mut slot.command_buffer;
        let targets = &self.targets[slot_index];

        device.begin_commands(cmd)?;
        device.cmd_begin_scene_pass(cmd, &targets.color, &targets.depth, self.clear_color);

        let view_projection = self.camera.view_projection_matrix();
        let mut bound_material = None;
        let mut dynamic_meshes: Vec<MeshId> = Vec::new();
        for (_, model) in self.models.iter() {
            let material = self
                .materials
                .get(model.material)
                .ok_or(SceneError::UnknownMaterial(model.material))?;
            if bound_material != Some(model.material) {
                device.cmd_bind_pipeline(cmd, material.pipeline());
                bound_material = Some(model.material);
            }
            device.cmd_push_transform(cmd, material.pipeline(), &(view_projection * model.transform));

            let mesh = self.meshes.get(model.mesh);
            device.cmd_bind_vertex_buffer(cmd, mesh.buffer());
            let (vertex_count, first_vertex) = mesh.draw_range();
            device.cmd_draw(cmd, vertex_count, first_vertex);

            if model.mesh.kind() == StorageKind::Dynamic && !dynamic_meshes.contains(&model.mesh) {
                dynamic_meshes.push(model.mesh);
            }
        }

        device.cmd_end_scene_pass(cmd, &targets.color);

        let range = full_subresource_range(vk::ImageAspectFlags::COLOR);
        self.presenter.insert_transfer_dst_transition(
            device,
            cmd,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::TRANSFER,
            vk::ImageMemoryBarrier::default()
                .image(acquired.image)
                .subresource_range(range)
                .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE),
        );
        device.cmd_blit_to(cmd, &targets.color, acquired.image, acquired.extent);
        self.presenter.insert_present_transition(
            device,
            cmd,
            vk::PipelineStageFlags::TRANSFER,
            vk::ImageMemoryBarrier::default()
                .image(acquired.image)
                .subresource_range(range)
                .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE),
        );
        device.end_commands(cmd)?;

        slot.fence.reset()?;
        let wait = acquired
            .uses_semaphores
            .then_some((&slot.image_ready, vk::PipelineStageFlags::TRANSFER));
        let signal = acquired.uses_semaphores.then_some(&slot.render_done);
        device.submit(&slot.command_buffer, wait, signal, &slot.fence)?;
        Ok(dynamic_meshes)
    }

    /// Leaves the current slot reusable after a frame failed between acquire
    /// and submit.
    ///
    /// A fence that was reset but never submitted is replaced, and a signal
    /// pending on the image-ready semaphore is dropped with the semaphore.
    fn abort_frame(&mut self, acquired: &AcquiredImage) -> SceneResult<()> {
        let device = &*self.device;
        device.wait_idle()?;
        if !self.frames.current().fence.is_signaled() {
            let stale = self.frames.replace_fence(device)?;
            self.meshes.forget_fence(&stale);
        }
        if acquired.uses_semaphores {
            self.frames.recreate_image_ready(device)?;
        }
        Ok(())
    }
}

impl<D: GpuDevice, P: Presenter<D>> Drop for SceneRenderer<D, P> {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            error!("Failed to wait for device idle during renderer drop: {}", e);
        }
        debug!("Scene renderer destroyed");
    }
}
