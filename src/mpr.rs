//! Reformatting engine: orthogonal re-slice viewports over a shared volume.

use crate::camera::Camera;
use crate::enums::Orientation;
use crate::interpolator::Interpolator;
use crate::volume::Volume;

use glam::Vec3;
use image::GrayImage;
use rayon::prelude::*;
use std::sync::Arc;
use tracing::debug;

/// Cutting plane: origin point plus unit normal. For MPR viewports the
/// normal is always one of the principal axes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlicePlane {
    pub origin: Vec3,
    pub normal: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Stepping,
}

/// One re-slice viewport. References the volume, never owns it; all mutation
/// is confined to the plane, camera, and display window.
pub struct MprViewport {
    orientation: Orientation,
    volume: Arc<Volume>,
    plane: SlicePlane,
    pub camera: Camera,
    target: Option<(u32, u32)>,
    /// Display window (low, high) in scalar units.
    window: (f32, f32),
    phase: Phase,
}

impl MprViewport {
    /// Viewport with the plane at the volume's geometric center and a fixed
    /// per-axis orthographic camera.
    pub fn new(volume: Arc<Volume>, orientation: Orientation) -> Self {
        let center = volume.center();
        let size = volume.size();
        let normal = match orientation {
            Orientation::Sagittal => Vec3::X,
            Orientation::Coronal => Vec3::Y,
            Orientation::Axial => Vec3::Z,
        };
        let camera = Camera::orthographic_for_axis(orientation, center, size);
        let window = volume.scalar_range();
        Self {
            orientation,
            volume,
            plane: SlicePlane {
                origin: center,
                normal,
            },
            camera,
            target: None,
            window,
            phase: Phase::Idle,
        }
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub fn plane(&self) -> SlicePlane {
        self.plane
    }

    /// Move the plane origin along its normal by whole spacing steps.
    ///
    /// A step that would land outside the volume's physical bounding box,
    /// even slightly, is rejected and the plane holds its last valid
    /// position. Returns whether the step was accepted.
    pub fn step(&mut self, delta_notches: i32) -> bool {
        self.phase = Phase::Stepping;

        let axis = self.orientation.axis();
        let spacing = self.volume.spacing_along(axis);
        let candidate = self.plane.origin + self.plane.normal * (delta_notches as f32 * spacing);

        let extent = self.volume.size()[axis];
        let along = candidate[axis];
        let accepted = (0.0..=extent).contains(&along);
        if accepted {
            self.plane.origin = candidate;
        } else {
            debug!(
                orientation = ?self.orientation,
                delta_notches,
                along,
                extent,
                "step rejected, plane held at last valid position"
            );
        }

        self.phase = Phase::Idle;
        accepted
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.phase == Phase::Idle
    }

    /// Voxel index of the slice the plane currently cuts through.
    pub fn slice_index(&self) -> usize {
        let axis = self.orientation.axis();
        let spacing = self.volume.spacing_along(axis);
        let len = self.volume.axis_len(self.orientation);
        let index = (self.plane.origin[axis] / spacing - 0.5).round();
        (index.max(0.0) as usize).min(len - 1)
    }

    /// Re-measure the render target. Zero-sized targets park the viewport:
    /// render becomes a no-op instead of an error.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.target = if width == 0 || height == 0 {
            None
        } else {
            Some((width, height))
        };
    }

    pub fn detach(&mut self) {
        self.target = None;
    }

    pub fn is_attached(&self) -> bool {
        self.target.is_some()
    }

    /// Display window in scalar units; values at or below `low` map to
    /// black, at or above `high` to white.
    pub fn set_window(&mut self, low: f32, high: f32) {
        if high > low {
            self.window = (low, high);
        }
    }

    pub fn window(&self) -> (f32, f32) {
        self.window
    }

    pub fn zoom(&mut self, factor: f32) {
        self.camera.zoom(factor);
    }

    pub fn reset_camera(&mut self) {
        self.camera = Camera::orthographic_for_axis(
            self.orientation,
            self.volume.center(),
            self.volume.size(),
        );
    }

    /// Extract, aspect-correct, and window the current cross-section.
    ///
    /// Returns `None` while the render target is unavailable (zero-sized or
    /// detached).
    pub fn render(&self) -> Option<GrayImage> {
        self.target?;

        let slice = self.volume.axis_slice(self.orientation, self.slice_index())?;
        let (out_width, out_height) = self.output_dimensions();
        let (src_height, src_width) = slice.dim();
        let (low, high) = self.window;
        let inv_span = 1.0 / (high - low).max(f32::EPSILON);

        let view = slice.view();
        let pixels: Vec<u8> = (0..out_height)
            .into_par_iter()
            .flat_map_iter(|y| {
                let view = view.clone();
                (0..out_width).map(move |x| {
                    // Normalized coordinates with a half-pixel offset keep the
                    // CPU path aligned with GPU texel sampling.
                    let norm_x = (x as f32 + 0.5) / out_width as f32;
                    let norm_y = (y as f32 + 0.5) / out_height as f32;

                    let src_x = (norm_x * src_width as f32 - 0.5)
                        .clamp(0.0, (src_width - 1) as f32);
                    let src_y = (norm_y * src_height as f32 - 0.5)
                        .clamp(0.0, (src_height - 1) as f32);

                    let value = Interpolator::bilinear_interpolate(&view, src_y, src_x);
                    (((value - low) * inv_span).clamp(0.0, 1.0) * 255.0) as u8
                })
            })
            .collect();

        GrayImage::from_raw(out_width, out_height, pixels)
    }

    /// Isotropic (width, height) of the extracted image for this axis.
    pub(crate) fn output_dimensions(&self) -> (u32, u32) {
        let (iso_z, iso_y, iso_x) =
            Interpolator::isotropic_dimensions(self.volume.spacing(), self.volume.dim());
        match self.orientation {
            Orientation::Axial => (iso_x, iso_y),
            Orientation::Coronal => (iso_x, iso_z),
            Orientation::Sagittal => (iso_y, iso_z),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::VolumeScalars;
    use approx::assert_relative_eq;
    use ndarray::Array3;

    fn test_volume() -> Arc<Volume> {
        // 8 slices of 4x4, value == z
        let data = Array3::from_shape_fn((8, 4, 4), |(z, _, _)| z as u16);
        Arc::new(Volume::new(VolumeScalars::U16(data), (1.0, 1.0, 2.5)))
    }

    #[test]
    fn plane_starts_at_volume_center() {
        let viewport = MprViewport::new(test_volume(), Orientation::Axial);
        assert_eq!(viewport.plane().origin, Vec3::new(2.0, 2.0, 10.0));
        assert_eq!(viewport.plane().normal, Vec3::Z);
    }

    #[test]
    fn step_moves_by_physical_spacing() {
        let mut viewport = MprViewport::new(test_volume(), Orientation::Axial);
        assert!(viewport.step(1));
        assert_relative_eq!(viewport.plane().origin.z, 12.5);
        assert!(viewport.step(-2));
        assert_relative_eq!(viewport.plane().origin.z, 7.5);
        assert!(viewport.is_idle());
    }

    #[test]
    fn overshooting_step_is_rejected_and_plane_holds() {
        let mut viewport = MprViewport::new(test_volume(), Orientation::Axial);
        let before = viewport.plane();
        assert!(!viewport.step(1000));
        assert_eq!(viewport.plane(), before);
        assert!(!viewport.step(-1000));
        assert_eq!(viewport.plane(), before);
    }

    #[test]
    fn stepping_never_leaves_physical_bounds() {
        let mut viewport = MprViewport::new(test_volume(), Orientation::Axial);
        for delta in [3, 3, 3, -20, 20, -3, -3, -3, -3] {
            viewport.step(delta);
            let z = viewport.plane().origin.z;
            assert!((0.0..=20.0).contains(&z), "plane escaped bounds: {z}");
        }
    }

    #[test]
    fn slice_index_tracks_the_plane() {
        let mut viewport = MprViewport::new(test_volume(), Orientation::Axial);
        // Center of a 20-unit extent on 2.5 spacing is between slices 3 and 4.
        assert_eq!(viewport.slice_index(), 4);
        viewport.step(-4);
        assert_eq!(viewport.slice_index(), 0);
    }

    #[test]
    fn render_requires_an_attached_target() {
        let mut viewport = MprViewport::new(test_volume(), Orientation::Axial);
        assert!(viewport.render().is_none());

        viewport.resize(64, 64);
        assert!(viewport.render().is_some());

        viewport.resize(0, 64);
        assert!(viewport.render().is_none());
    }

    #[test]
    fn coronal_output_is_aspect_corrected() {
        let mut viewport = MprViewport::new(test_volume(), Orientation::Coronal);
        viewport.resize(64, 64);
        let image = viewport.render().unwrap();
        // 4 voxels at 1.0 in-plane, 8 slices at 2.5 -> 20 isotropic rows.
        assert_eq!(image.width(), 4);
        assert_eq!(image.height(), 20);
    }

    #[test]
    fn window_controls_display_mapping() {
        let mut viewport = MprViewport::new(test_volume(), Orientation::Axial);
        viewport.resize(8, 8);
        viewport.step(-4);
        viewport.set_window(0.0, 1.0);
        let image = viewport.render().unwrap();
        // Slice 0 has value 0 everywhere -> black under a 0..1 window.
        assert!(image.pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn zoom_does_not_move_the_plane() {
        let mut viewport = MprViewport::new(test_volume(), Orientation::Sagittal);
        let before = viewport.plane();
        viewport.zoom(3.0);
        assert_eq!(viewport.plane(), before);
    }
}
