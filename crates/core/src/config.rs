//! Renderer configuration.
//!
//! Every field has a default, so a config file only needs the values it
//! changes:
//!
//! ```toml
//! frames_in_flight = 2
//! present_mode = "mailbox"
//!
//! [window]
//! width = 1920
//! height = 1080
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Upper bound for both the frame-in-flight count and dynamic mesh slots.
pub const MAX_FRAME_SLOTS: u32 = 8;

/// Requested presentation mode. Unsupported modes fall back to FIFO.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresentModePreference {
    /// Vsync, always available
    #[default]
    Fifo,
    /// Low-latency triple buffering without tearing
    Mailbox,
    /// No vsync, may tear
    Immediate,
}

/// Window parameters used by the demo host.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            title: "vkr".to_string(),
        }
    }
}

/// Perspective camera defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fov_y_degrees: 60.0,
            near: 0.1,
            far: 100.0,
        }
    }
}

/// SPIR-V binaries handed to `create_material` by the host.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            vertex: PathBuf::from("shaders/mesh.vert.spv"),
            fragment: PathBuf::from("shaders/mesh.frag.spv"),
        }
    }
}

/// Top-level renderer configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Number of frames that may be in flight; one command buffer, fence and
    /// offscreen target per frame.
    pub frames_in_flight: u32,
    /// Ring slots per dynamic mesh.
    pub dynamic_mesh_slots: u32,
    pub present_mode: PresentModePreference,
    pub enable_validation: bool,
    pub clear_color: [f32; 4],
    pub camera: CameraConfig,
    pub window: WindowConfig,
    pub shaders: ShaderConfig,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 3,
            dynamic_mesh_slots: 2,
            present_mode: PresentModePreference::Fifo,
            enable_validation: cfg!(debug_assertions),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            camera: CameraConfig::default(),
            window: WindowConfig::default(),
            shaders: ShaderConfig::default(),
        }
    }
}

impl RendererConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        tracing::info!("Loaded renderer config from {}", path.display());
        Ok(config)
    }

    /// Loads `path` when it exists, otherwise returns the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Serializes the configuration back to TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Checks value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_FRAME_SLOTS).contains(&self.frames_in_flight) {
            return Err(Error::Config(format!(
                "frames_in_flight must be in 1..={}, got {}",
                MAX_FRAME_SLOTS, self.frames_in_flight
            )));
        }
        if !(1..=MAX_FRAME_SLOTS).contains(&self.dynamic_mesh_slots) {
            return Err(Error::Config(format!(
                "dynamic_mesh_slots must be in 1..={}, got {}",
                MAX_FRAME_SLOTS, self.dynamic_mesh_slots
            )));
        }
        if self.window.width == 0 || self.window.height == 0 {
            return Err(Error::Config(format!(
                "window size must be non-zero, got {}x{}",
                self.window.width, self.window.height
            )));
        }
        let camera = &self.camera;
        if !(camera.near > 0.0 && camera.far > camera.near) {
            return Err(Error::Config(format!(
                "camera planes must satisfy 0 < near < far, got near={} far={}",
                camera.near, camera.far
            )));
        }
        if !(camera.fov_y_degrees > 0.0 && camera.fov_y_degrees < 180.0) {
            return Err(Error::Config(format!(
                "camera fov must be in (0, 180) degrees, got {}",
                camera.fov_y_degrees
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RendererConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frames_in_flight, 3);
        assert_eq!(config.dynamic_mesh_slots, 2);
        assert_eq!(config.present_mode, PresentModePreference::Fifo);
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config = RendererConfig::from_toml_str(
            r#"
            frames_in_flight = 2
            present_mode = "mailbox"

            [window]
            width = 640
            "#,
        )
        .unwrap();

        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.present_mode, PresentModePreference::Mailbox);
        assert_eq!(config.window.width, 640);
        assert_eq!(config.window.height, 720);
        assert_eq!(config.dynamic_mesh_slots, 2);
    }

    #[test]
    fn test_zero_frames_rejected() {
        let result = RendererConfig::from_toml_str("frames_in_flight = 0");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_inverted_planes_rejected() {
        let result = RendererConfig::from_toml_str("[camera]\nnear = 10.0\nfar = 1.0");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_unknown_present_mode_is_parse_error() {
        let result = RendererConfig::from_toml_str("present_mode = \"vsync-ish\"");
        assert!(matches!(result, Err(Error::ConfigParse(_))));
    }

    #[test]
    fn test_file_round_trip() {
        let mut config = RendererConfig::default();
        config.dynamic_mesh_slots = 3;
        config.clear_color = [0.1, 0.2, 0.3, 1.0];

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_toml_string().unwrap().as_bytes())
            .unwrap();

        let loaded = RendererConfig::load(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = RendererConfig::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, RendererConfig::default());
    }
}
