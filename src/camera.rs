use crate::enums::Orientation;

use glam::{Mat4, Vec3};

/// Pitch clamp keeping the orbit camera off the poles.
const MAX_PITCH: f32 = 1.53;

const MIN_PARALLEL_SCALE: f32 = 1e-3;
const MIN_ORBIT_DISTANCE: f32 = 1e-2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    /// Parallel projection; `parallel_scale` is the half-height of the view
    /// in physical units. Slice thickness never distorts apparent size.
    Orthographic { parallel_scale: f32 },
    Perspective { fov_y: f32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub projection: Projection,
}

impl Camera {
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    pub fn forward(&self) -> Vec3 {
        (self.target - self.position).normalize_or_zero()
    }

    /// Fixed-orientation orthographic camera for one re-slice axis, framed on
    /// the volume's in-plane extent.
    pub fn orthographic_for_axis(orientation: Orientation, center: Vec3, size: Vec3) -> Self {
        let distance = size.max_element() * 2.0;
        let (offset, up, half_height) = match orientation {
            Orientation::Axial => (Vec3::Z, Vec3::NEG_Y, size.y * 0.5),
            Orientation::Coronal => (Vec3::NEG_Y, Vec3::NEG_Z, size.z * 0.5),
            Orientation::Sagittal => (Vec3::NEG_X, Vec3::NEG_Z, size.z * 0.5),
        };
        Self {
            position: center + offset * distance,
            target: center,
            up,
            projection: Projection::Orthographic {
                parallel_scale: half_height.max(MIN_PARALLEL_SCALE),
            },
        }
    }

    /// Free-orbit perspective camera placed to frame the full volume bounds.
    pub fn orbit_framing(center: Vec3, size: Vec3) -> Self {
        let fov_y = 30.0_f32.to_radians();
        let radius = size.length() * 0.5;
        let distance = radius / (fov_y * 0.5).tan() * 1.1;
        let direction = Vec3::new(0.0, 0.35, 1.0).normalize();
        Self {
            position: center + direction * distance,
            target: center,
            up: Vec3::Y,
            projection: Projection::Perspective { fov_y },
        }
    }

    /// Rotate the eye about the target by yaw (around the world up axis) and
    /// pitch (elevation), preserving the orbit radius.
    pub fn orbit(&mut self, yaw: f32, pitch: f32) {
        let offset = self.position - self.target;
        let radius = offset.length();
        if radius <= f32::EPSILON {
            return;
        }
        let current_yaw = offset.x.atan2(offset.z);
        let current_pitch = (offset.y / radius).clamp(-1.0, 1.0).asin();

        let new_yaw = current_yaw + yaw;
        let new_pitch = (current_pitch + pitch).clamp(-MAX_PITCH, MAX_PITCH);

        let (sin_yaw, cos_yaw) = new_yaw.sin_cos();
        let (sin_pitch, cos_pitch) = new_pitch.sin_cos();
        self.position = self.target
            + Vec3::new(
                radius * cos_pitch * sin_yaw,
                radius * sin_pitch,
                radius * cos_pitch * cos_yaw,
            );
    }

    /// Factor > 1 zooms in. Orthographic cameras shrink the parallel scale;
    /// perspective cameras move along the view direction.
    pub fn zoom(&mut self, factor: f32) {
        if !(factor.is_finite() && factor > 0.0) {
            return;
        }
        match &mut self.projection {
            Projection::Orthographic { parallel_scale } => {
                *parallel_scale = (*parallel_scale / factor).max(MIN_PARALLEL_SCALE);
            }
            Projection::Perspective { .. } => {
                let offset = self.position - self.target;
                let distance = (offset.length() / factor).max(MIN_ORBIT_DISTANCE);
                self.position = self.target + offset.normalize_or_zero() * distance;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn orbit_preserves_radius() {
        let mut camera = Camera::orbit_framing(Vec3::splat(5.0), Vec3::splat(10.0));
        let before = (camera.position - camera.target).length();
        camera.orbit(0.7, -0.3);
        let after = (camera.position - camera.target).length();
        assert_relative_eq!(before, after, epsilon = 1e-3);
    }

    #[test]
    fn orbit_pitch_is_clamped() {
        let mut camera = Camera::orbit_framing(Vec3::ZERO, Vec3::splat(10.0));
        for _ in 0..100 {
            camera.orbit(0.0, 0.5);
        }
        let offset = camera.position - camera.target;
        let pitch = (offset.y / offset.length()).asin();
        assert!(pitch <= MAX_PITCH + 1e-3);
    }

    #[test]
    fn orthographic_zoom_scales_parallel_extent() {
        let mut camera =
            Camera::orthographic_for_axis(Orientation::Axial, Vec3::splat(5.0), Vec3::splat(10.0));
        let Projection::Orthographic { parallel_scale } = camera.projection else {
            panic!("expected orthographic projection");
        };
        camera.zoom(2.0);
        let Projection::Orthographic { parallel_scale: zoomed } = camera.projection else {
            panic!("expected orthographic projection");
        };
        assert_relative_eq!(zoomed, parallel_scale / 2.0);
    }

    #[test]
    fn perspective_zoom_moves_eye_closer() {
        let mut camera = Camera::orbit_framing(Vec3::ZERO, Vec3::splat(10.0));
        let before = (camera.position - camera.target).length();
        camera.zoom(2.0);
        let after = (camera.position - camera.target).length();
        assert_relative_eq!(after, before / 2.0, epsilon = 1e-4);
    }

    #[test]
    fn bad_zoom_factors_are_ignored() {
        let mut camera = Camera::orbit_framing(Vec3::ZERO, Vec3::splat(10.0));
        let before = camera.clone();
        camera.zoom(0.0);
        camera.zoom(f32::NAN);
        assert_eq!(camera, before);
    }
}
