//! GPU buffer management.
//!
//! Buffers are backed by gpu-allocator. Device-local vertex buffers are
//! filled through a staging copy; dynamic vertex and staging buffers live in
//! persistently mapped `CpuToGpu` memory.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::debug;

use super::device::Device;
use crate::backend::{BufferUsage, GpuBuffer};
use crate::error::{RhiError, RhiResult};

fn memory_location(usage: BufferUsage) -> MemoryLocation {
    if usage.is_host_visible() {
        MemoryLocation::CpuToGpu
    } else {
        MemoryLocation::GpuOnly
    }
}

/// GPU buffer wrapper with managed memory.
pub struct Buffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
    usage: BufferUsage,
}

impl Buffer {
    /// Creates a new buffer with the specified size.
    ///
    /// # Errors
    ///
    /// Returns an error if `size` is zero or buffer or memory allocation fails.
    pub fn new(device: Arc<Device>, usage: BufferUsage, size: vk::DeviceSize) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::Buffer(
                "Buffer size must be greater than 0".to_string(),
            ));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage.to_vk_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.handle().create_buffer(&buffer_info, None)? };

        // Owned before allocating so a later failure destroys the handle.
        let mut this = Self {
            device,
            buffer,
            allocation: None,
            size,
            usage,
        };

        let requirements = unsafe {
            this.device
                .handle()
                .get_buffer_memory_requirements(this.buffer)
        };
        let allocation = this.device.allocator().allocate(&AllocationCreateDesc {
            name: usage.name(),
            requirements,
            location: memory_location(usage),
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;

        let bind = unsafe {
            this.device
                .handle()
                .bind_buffer_memory(this.buffer, allocation.memory(), allocation.offset())
        };
        this.allocation = Some(allocation);
        bind?;

        debug!("Created {} buffer: {} bytes", usage.name(), size);
        Ok(this)
    }

    /// Returns the Vulkan buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }
}

impl GpuBuffer for Buffer {
    fn size(&self) -> u64 {
        self.size
    }

    /// `CpuToGpu` memory is host-coherent, so the copy needs no explicit flush.
    fn write(&self, offset: u64, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        let end = offset + data.len() as vk::DeviceSize;
        if end > self.size {
            return Err(RhiError::Buffer(format!(
                "Write exceeds buffer size: offset {} + data {} > buffer {}",
                offset,
                data.len(),
                self.size
            )));
        }

        let mapped_ptr = self
            .allocation
            .as_ref()
            .and_then(Allocation::mapped_ptr)
            .ok_or_else(|| {
                RhiError::Buffer(format!("{} buffer memory is not mapped", self.usage.name()))
            })?;

        unsafe {
            let dst = mapped_ptr.as_ptr().cast::<u8>().add(offset as usize);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }

        Ok(())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take()
            && let Err(e) = self.device.allocator().free(allocation)
        {
            tracing::error!("Failed to free buffer allocation: {:?}", e);
        }

        unsafe {
            self.device.handle().destroy_buffer(self.buffer, None);
        }
        debug!("Destroyed {} buffer ({} bytes)", self.usage.name(), self.size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_location() {
        assert_eq!(memory_location(BufferUsage::Vertex), MemoryLocation::GpuOnly);
        assert_eq!(
            memory_location(BufferUsage::DynamicVertex),
            MemoryLocation::CpuToGpu
        );
        assert_eq!(
            memory_location(BufferUsage::Staging),
            MemoryLocation::CpuToGpu
        );
    }
}
