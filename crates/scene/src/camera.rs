//! Perspective camera.

use glam::{Mat4, Quat, Vec3};
use vkr_core::config::CameraConfig;

/// Perspective projection parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Perspective {
    /// Vertical field of view in radians
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

/// A camera for rendering the scene.
#[derive(Clone, Debug)]
pub struct Camera {
    /// Camera position in world space
    pub position: Vec3,
    /// Camera rotation
    pub rotation: Quat,
    pub projection: Perspective,
}

impl Default for Camera {
    fn default() -> Self {
        Self::from_config(&CameraConfig::default(), 16.0 / 9.0)
    }
}

impl Camera {
    /// Camera at `(0, 0, 3)` looking down -Z, with the configured lens.
    pub fn from_config(config: &CameraConfig, aspect: f32) -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 3.0),
            rotation: Quat::IDENTITY,
            projection: Perspective {
                fov_y: config.fov_y_degrees.to_radians(),
                aspect,
                near: config.near,
                far: config.far,
            },
        }
    }

    /// Update the aspect ratio.
    pub fn set_aspect(&mut self, aspect: f32) {
        self.projection.aspect = aspect;
    }

    /// Get the view matrix.
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.forward(), self.up())
    }

    /// Get the projection matrix (zero-to-one depth, with Vulkan Y-flip).
    pub fn projection_matrix(&self) -> Mat4 {
        let Perspective {
            fov_y,
            aspect,
            near,
            far,
        } = self.projection;
        let mut proj = Mat4::perspective_rh(fov_y, aspect, near, far);
        // Flip Y for Vulkan coordinate system
        proj.y_axis.y *= -1.0;
        proj
    }

    /// Get the view-projection matrix.
    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// Get the forward direction vector.
    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::NEG_Z
    }

    /// Get the up direction vector.
    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }

    /// Look at a target position.
    pub fn look_at(&mut self, target: Vec3) {
        let forward = (target - self.position).normalize_or_zero();
        if forward.length_squared() > 0.0 {
            self.rotation = Quat::from_rotation_arc(Vec3::NEG_Z, forward);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-5;

    #[test]
    fn test_from_config() {
        let config = CameraConfig {
            fov_y_degrees: 90.0,
            near: 0.5,
            far: 50.0,
        };
        let camera = Camera::from_config(&config, 2.0);
        assert!((camera.projection.fov_y - std::f32::consts::FRAC_PI_2).abs() < EPSILON);
        assert_eq!(camera.projection.aspect, 2.0);
        assert_eq!(camera.projection.near, 0.5);
    }

    #[test]
    fn test_point_ahead_projects_to_center() {
        let camera = Camera::default();
        let clip = camera.view_projection_matrix() * glam::Vec4::new(0.0, 0.0, 0.0, 1.0);
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < EPSILON);
        assert!(ndc.y.abs() < EPSILON);
        assert!(ndc.z > 0.0 && ndc.z < 1.0);
    }

    #[test]
    fn test_y_is_flipped() {
        let camera = Camera::default();
        let clip = camera.view_projection_matrix() * glam::Vec4::new(0.0, 1.0, 0.0, 1.0);
        assert!(clip.y / clip.w < 0.0);
    }

    #[test]
    fn test_look_at() {
        let mut camera = Camera::default();
        camera.position = Vec3::new(5.0, 0.0, 0.0);
        camera.look_at(Vec3::ZERO);
        assert!((camera.forward() - Vec3::NEG_X).length() < EPSILON);
    }

    #[test]
    fn test_set_aspect() {
        let mut camera = Camera::default();
        camera.set_aspect(1.0);
        assert_eq!(camera.projection.aspect, 1.0);
    }
}
