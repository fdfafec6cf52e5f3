//! Shader module creation from SPIR-V bytes.
//!
//! Loading the `.spv` files is the host's job; the device only ever sees the
//! bytes carried in a [`PipelineDesc`](crate::PipelineDesc).

use std::ffi::CStr;
use std::sync::Arc;

use ash::vk;
use tracing::debug;

use super::device::Device;
use crate::error::{RhiError, RhiResult};

/// Entry point every material shader is compiled with.
pub const SHADER_ENTRY_POINT: &CStr = c"main";

/// Shader module for a single pipeline stage. Destroyed on drop, which is
/// safe as soon as the pipeline using it has been created.
pub struct Shader {
    device: Arc<Device>,
    module: vk::ShaderModule,
    stage: vk::ShaderStageFlags,
}

impl Shader {
    /// Creates a shader module from SPIR-V bytes.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Shader`] for empty or misaligned code, or a Vulkan
    /// error if module creation fails.
    pub fn from_spirv_bytes(
        device: Arc<Device>,
        bytes: &[u8],
        stage: vk::ShaderStageFlags,
    ) -> RhiResult<Self> {
        let code = spirv_words(bytes)?;
        let create_info = vk::ShaderModuleCreateInfo::default().code(&code);
        let module = unsafe { device.handle().create_shader_module(&create_info, None)? };

        debug!("Created {:?} shader module ({} words)", stage, code.len());
        Ok(Self {
            device,
            module,
            stage,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    /// Stage create info borrowing this module.
    pub fn stage_create_info(&self) -> vk::PipelineShaderStageCreateInfo<'_> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(self.stage)
            .module(self.module)
            .name(SHADER_ENTRY_POINT)
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_shader_module(self.module, None);
        }
    }
}

/// Decodes little-endian SPIR-V bytes into code words.
///
/// # Errors
///
/// Returns [`RhiError::Shader`] if `bytes` is empty or not a multiple of 4.
pub fn spirv_words(bytes: &[u8]) -> RhiResult<Vec<u32>> {
    if bytes.is_empty() {
        return Err(RhiError::Shader("SPIR-V code is empty".to_string()));
    }
    if !bytes.len().is_multiple_of(4) {
        return Err(RhiError::Shader(format!(
            "SPIR-V code must be 4-byte aligned, got {} bytes",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spirv_words_little_endian() {
        let words = spirv_words(&[0x03, 0x02, 0x23, 0x07, 1, 0, 0, 0]).unwrap();
        assert_eq!(words, vec![0x0723_0203, 1]);
    }

    #[test]
    fn test_spirv_words_rejects_misaligned() {
        assert!(matches!(spirv_words(&[0; 5]), Err(RhiError::Shader(_))));
    }

    #[test]
    fn test_spirv_words_rejects_empty() {
        assert!(matches!(spirv_words(&[]), Err(RhiError::Shader(_))));
    }
}
