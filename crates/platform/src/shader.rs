//! SPIR-V binaries supplied to materials.

use std::path::{Path, PathBuf};

use vkr_core::config::ShaderConfig;
use vkr_core::{Error, Result};

/// Programmable stages a material needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

/// Reads a SPIR-V file and checks that it is a whole number of words.
pub fn load_spirv(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    if bytes.is_empty() || !bytes.len().is_multiple_of(4) {
        return Err(Error::Shader(format!(
            "{} is not SPIR-V: {} bytes",
            path.display(),
            bytes.len()
        )));
    }
    tracing::debug!("Loaded shader {} ({} bytes)", path.display(), bytes.len());
    Ok(bytes)
}

/// Shader files on disk, one per stage.
#[derive(Clone, Debug)]
pub struct ShaderLibrary {
    vertex: PathBuf,
    fragment: PathBuf,
}

impl ShaderLibrary {
    pub fn new(config: &ShaderConfig) -> Self {
        Self {
            vertex: config.vertex.clone(),
            fragment: config.fragment.clone(),
        }
    }

    pub fn path(&self, stage: ShaderStage) -> &Path {
        match stage {
            ShaderStage::Vertex => &self.vertex,
            ShaderStage::Fragment => &self.fragment,
        }
    }

    /// SPIR-V for `stage`.
    pub fn binary(&self, stage: ShaderStage) -> Result<Vec<u8>> {
        load_spirv(self.path(stage))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn spirv_file(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file
    }

    #[test]
    fn test_load_spirv() {
        let file = spirv_file(&[0x03, 0x02, 0x23, 0x07, 0, 0, 1, 0]);
        assert_eq!(load_spirv(file.path()).unwrap().len(), 8);
    }

    #[test]
    fn test_misaligned_spirv_rejected() {
        let file = spirv_file(&[1, 2, 3]);
        assert!(matches!(load_spirv(file.path()), Err(Error::Shader(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = load_spirv("does/not/exist.spv");
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn test_library_maps_stages() {
        let vertex = spirv_file(&[0; 4]);
        let fragment = spirv_file(&[0; 8]);
        let library = ShaderLibrary::new(&ShaderConfig {
            vertex: vertex.path().to_path_buf(),
            fragment: fragment.path().to_path_buf(),
        });
        assert_eq!(library.binary(ShaderStage::Vertex).unwrap().len(), 4);
        assert_eq!(library.binary(ShaderStage::Fragment).unwrap().len(), 8);
    }
}
