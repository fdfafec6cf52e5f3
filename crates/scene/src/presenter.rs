//! Presentation targets.
//!
//! A [`Presenter`] hands out the image a frame is blitted into and queues it
//! for display. The renderer records the layout transitions around the blit
//! through the presenter's transition hooks, so it never needs to know
//! whether the destination is a WSI swapchain image or an ordinary image.

use std::sync::Arc;

use tracing::{debug, trace};
use vkr_rhi::{GpuDevice, GpuImage, ImageDesc, ImageUsage, RhiError, RhiResult, vk};

/// An image handed out by [`Presenter::acquire`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AcquiredImage {
    pub index: u32,
    pub image: vk::Image,
    pub extent: vk::Extent2D,
    /// The presenter signals the image-ready semaphore on acquire and waits
    /// on the render-done semaphore on present.
    pub uses_semaphores: bool,
    pub suboptimal: bool,
}

/// Source of presentable images.
pub trait Presenter<D: GpuDevice> {
    /// Size of the presentable images.
    fn extent(&self) -> vk::Extent2D;

    fn image_count(&self) -> u32;

    /// Layout the image must be in when [`present`](Self::present) is called.
    fn final_layout(&self) -> vk::ImageLayout;

    /// Acquires the next image, signaling `image_ready` once it can be written.
    ///
    /// # Errors
    ///
    /// An out-of-date target is reported as `ERROR_OUT_OF_DATE_KHR`; the
    /// caller must [`resize`](Self::resize) before trying again.
    fn acquire(&mut self, image_ready: &D::Semaphore) -> RhiResult<AcquiredImage>;

    /// Queues `image` for display once `render_done` is signaled. Returns
    /// true if the target is suboptimal.
    fn present(&mut self, image: &AcquiredImage, render_done: &D::Semaphore) -> RhiResult<bool>;

    /// Recreates the presentable images. The device must be idle.
    fn resize(&mut self, extent: vk::Extent2D) -> RhiResult<()>;

    /// Recreates the presentable images with presentation mode `mode`. The
    /// device must be idle.
    ///
    /// Returns false, leaving the presenter untouched, when `mode` is not
    /// supported. Presenters without a display support no mode switch.
    fn set_present_mode(&mut self, _mode: vk::PresentModeKHR) -> RhiResult<bool> {
        Ok(false)
    }

    /// Records the transition of the acquired image into `TRANSFER_DST_OPTIMAL`.
    ///
    /// `barrier` arrives with the image, subresource range, new layout and
    /// destination access set; the presenter fills in the rest.
    fn insert_transfer_dst_transition(
        &self,
        device: &D,
        cmd: &mut D::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barrier: vk::ImageMemoryBarrier<'static>,
    ) {
        let barrier = complete_transfer_dst_barrier(barrier);
        device.cmd_pipeline_barrier(cmd, src_stage, dst_stage, &barrier);
    }

    /// Records the transition of the acquired image into
    /// [`final_layout`](Self::final_layout).
    ///
    /// `barrier` arrives with the image, subresource range, old layout and
    /// source access set.
    fn insert_present_transition(
        &self,
        device: &D,
        cmd: &mut D::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        barrier: vk::ImageMemoryBarrier<'static>,
    ) {
        let barrier = complete_present_barrier(barrier, self.final_layout());
        device.cmd_pipeline_barrier(
            cmd,
            src_stage,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            &barrier,
        );
    }
}

/// Previous contents are discarded: the blit overwrites the whole image.
pub fn complete_transfer_dst_barrier(
    barrier: vk::ImageMemoryBarrier<'static>,
) -> vk::ImageMemoryBarrier<'static> {
    barrier
        .src_access_mask(vk::AccessFlags::empty())
        .old_layout(vk::ImageLayout::UNDEFINED)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
}

pub fn complete_present_barrier(
    barrier: vk::ImageMemoryBarrier<'static>,
    final_layout: vk::ImageLayout,
) -> vk::ImageMemoryBarrier<'static> {
    barrier
        .dst_access_mask(vk::AccessFlags::empty())
        .new_layout(final_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
}

/// Presenter over device-owned images, for runs without a window.
///
/// Images are handed out round-robin and end each frame in
/// `TRANSFER_SRC_OPTIMAL` so they can be read back. No semaphores are used;
/// the frame fence orders everything.
pub struct OffscreenPresenter<D: GpuDevice> {
    device: Arc<D>,
    images: Vec<D::Image>,
    format: vk::Format,
    next: usize,
    presented: Vec<u32>,
}

impl<D: GpuDevice> OffscreenPresenter<D> {
    /// # Errors
    ///
    /// Returns an error if `image_count` is zero or image creation fails.
    pub fn new(
        device: Arc<D>,
        extent: vk::Extent2D,
        format: vk::Format,
        image_count: u32,
    ) -> RhiResult<Self> {
        if image_count == 0 {
            return Err(RhiError::Image(
                "Offscreen presenter needs at least one image".to_string(),
            ));
        }
        let images = create_images(&*device, extent, format, image_count)?;
        debug!(
            "Created offscreen presenter: {} images, {}x{}",
            image_count, extent.width, extent.height
        );
        Ok(Self {
            device,
            images,
            format,
            next: 0,
            presented: Vec::new(),
        })
    }

    pub fn images(&self) -> &[D::Image] {
        &self.images
    }

    /// Indices passed to `present`, oldest first.
    pub fn presented(&self) -> &[u32] {
        &self.presented
    }
}

fn create_images<D: GpuDevice>(
    device: &D,
    extent: vk::Extent2D,
    format: vk::Format,
    count: u32,
) -> RhiResult<Vec<D::Image>> {
    (0..count)
        .map(|_| {
            device.create_image(&ImageDesc {
                extent,
                format,
                usage: ImageUsage::PresentTarget,
            })
        })
        .collect()
}

impl<D: GpuDevice> Presenter<D> for OffscreenPresenter<D> {
    fn extent(&self) -> vk::Extent2D {
        self.images[0].extent()
    }

    fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    fn final_layout(&self) -> vk::ImageLayout {
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL
    }

    fn acquire(&mut self, _image_ready: &D::Semaphore) -> RhiResult<AcquiredImage> {
        let index = self.next;
        self.next = (self.next + 1) % self.images.len();
        let image = &self.images[index];
        Ok(AcquiredImage {
            index: index as u32,
            image: image.raw(),
            extent: image.extent(),
            uses_semaphores: false,
            suboptimal: false,
        })
    }

    fn present(&mut self, image: &AcquiredImage, _render_done: &D::Semaphore) -> RhiResult<bool> {
        trace!("Offscreen image {} presented", image.index);
        self.presented.push(image.index);
        Ok(false)
    }

    fn resize(&mut self, extent: vk::Extent2D) -> RhiResult<()> {
        self.images = create_images(
            &*self.device,
            extent,
            self.format,
            self.images.len() as u32,
        )?;
        self.next = 0;
        debug!(
            "Offscreen presenter resized to {}x{}",
            extent.width, extent.height
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use vkr_rhi::full_subresource_range;
    use vkr_rhi::headless::{Command, HeadlessDevice};

    use super::*;

    const EXTENT: vk::Extent2D = vk::Extent2D {
        width: 64,
        height: 32,
    };

    fn presenter(count: u32) -> (Arc<HeadlessDevice>, OffscreenPresenter<HeadlessDevice>) {
        let device = Arc::new(HeadlessDevice::new());
        let presenter = OffscreenPresenter::new(
            Arc::clone(&device),
            EXTENT,
            vk::Format::B8G8R8A8_UNORM,
            count,
        )
        .unwrap();
        (device, presenter)
    }

    #[test]
    fn test_complete_transfer_dst_barrier() {
        let partial = vk::ImageMemoryBarrier::default()
            .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE);
        let barrier = complete_transfer_dst_barrier(partial);

        assert_eq!(barrier.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(barrier.new_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(barrier.src_access_mask, vk::AccessFlags::empty());
        assert_eq!(barrier.dst_access_mask, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(barrier.src_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
    }

    #[test]
    fn test_complete_present_barrier() {
        let partial = vk::ImageMemoryBarrier::default()
            .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE);
        let barrier = complete_present_barrier(partial, vk::ImageLayout::PRESENT_SRC_KHR);

        assert_eq!(barrier.old_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(barrier.new_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(barrier.dst_access_mask, vk::AccessFlags::empty());
        assert_eq!(barrier.dst_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
    }

    #[test]
    fn test_acquire_is_round_robin() {
        let (device, mut presenter) = presenter(2);
        let semaphore = device.create_semaphore().unwrap();

        let indices: Vec<u32> = (0..3)
            .map(|_| presenter.acquire(&semaphore).unwrap().index)
            .collect();
        assert_eq!(indices, vec![0, 1, 0]);

        let acquired = presenter.acquire(&semaphore).unwrap();
        assert!(!acquired.uses_semaphores);
        assert_eq!(acquired.extent, EXTENT);
        assert_eq!(acquired.image, presenter.images()[1].raw());
    }

    #[test]
    fn test_present_records_index() {
        let (device, mut presenter) = presenter(2);
        let semaphore = device.create_semaphore().unwrap();
        let acquired = presenter.acquire(&semaphore).unwrap();
        assert!(!presenter.present(&acquired, &semaphore).unwrap());
        assert_eq!(presenter.presented(), &[0]);
    }

    #[test]
    fn test_resize_replaces_images() {
        let (_device, mut presenter) = presenter(2);
        let old = presenter.images()[0].raw();
        let extent = vk::Extent2D {
            width: 8,
            height: 8,
        };
        presenter.resize(extent).unwrap();
        assert_eq!(Presenter::<HeadlessDevice>::extent(&presenter), extent);
        assert_ne!(presenter.images()[0].raw(), old);
    }

    #[test]
    fn test_zero_images_rejected() {
        let device = Arc::new(HeadlessDevice::new());
        let result =
            OffscreenPresenter::new(device, EXTENT, vk::Format::B8G8R8A8_UNORM, 0);
        assert!(matches!(result, Err(RhiError::Image(_))));
    }

    #[test]
    fn test_default_hooks_record_completed_barriers() {
        let (device, presenter) = presenter(1);
        let mut cmd = device.allocate_command_buffer().unwrap();
        let image = presenter.images()[0].raw();
        let range = full_subresource_range(vk::ImageAspectFlags::COLOR);

        device.begin_commands(&mut cmd).unwrap();
        presenter.insert_transfer_dst_transition(
            &device,
            &mut cmd,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::TRANSFER,
            vk::ImageMemoryBarrier::default()
                .image(image)
                .subresource_range(range)
                .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE),
        );
        presenter.insert_present_transition(
            &device,
            &mut cmd,
            vk::PipelineStageFlags::TRANSFER,
            vk::ImageMemoryBarrier::default()
                .image(image)
                .subresource_range(range)
                .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE),
        );
        device.end_commands(&mut cmd).unwrap();

        let layouts: Vec<_> = cmd
            .commands()
            .iter()
            .filter_map(|c| match c {
                Command::Barrier {
                    old_layout,
                    new_layout,
                    dst_stage,
                    ..
                } => Some((*old_layout, *new_layout, *dst_stage)),
                _ => None,
            })
            .collect();
        assert_eq!(
            layouts,
            vec![
                (
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::PipelineStageFlags::TRANSFER
                ),
                (
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    vk::PipelineStageFlags::BOTTOM_OF_PIPE
                ),
            ]
        );
    }
}
