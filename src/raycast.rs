//! Volumetric viewport: ray-casts the whole volume through the active
//! transfer function with front-to-back compositing, gradient shading, and
//! adaptive sampling during interaction.

use crate::camera::{Camera, Projection};
use crate::enums::RenderMode;
use crate::preset::{DEFAULT_PRESET, PresetDefinition, PresetLibrary};
use crate::transfer::{BlendMode, TransferFunction};
use crate::volume::Volume;

use glam::Vec3;
use image::{Rgba, RgbaImage};
use rayon::prelude::*;
use std::sync::Arc;
use tracing::debug;

/// Opacity beyond which a ray is considered saturated.
const EARLY_TERMINATION: f32 = 0.98;

/// Per-mode lighting and sampling parameters. Step lengths are multiples of
/// the finest voxel spacing.
#[derive(Debug, Clone, Copy)]
struct ModeParams {
    specular_scale: f32,
    fine_step: f32,
    coarse_step: f32,
}

fn mode_params(mode: RenderMode) -> ModeParams {
    match mode {
        RenderMode::Conservative => ModeParams {
            specular_scale: 0.5,
            fine_step: 1.0,
            coarse_step: 2.5,
        },
        RenderMode::HighFidelity => ModeParams {
            specular_scale: 1.0,
            fine_step: 0.5,
            coarse_step: 2.0,
        },
    }
}

/// The single 3-D viewport of a session.
pub struct VolumeViewport {
    volume: Arc<Volume>,
    pub camera: Camera,
    transfer: TransferFunction,
    preset_name: String,
    mode: RenderMode,
    interacting: bool,
    target: Option<(u32, u32)>,
}

impl VolumeViewport {
    pub fn new(volume: Arc<Volume>, presets: &PresetLibrary) -> Self {
        let (min, max) = volume.scalar_range();
        let definition = presets
            .get(DEFAULT_PRESET)
            .or_else(|| presets.names().next().and_then(|name| presets.get(name)));
        let (preset_name, transfer) = match definition {
            Some(definition) => (definition.name.to_string(), definition.build(min, max)),
            None => ("linear".to_string(), neutral_transfer(min, max)),
        };
        let camera = Camera::orbit_framing(volume.center(), volume.size());
        Self {
            volume,
            camera,
            transfer,
            preset_name,
            mode: RenderMode::default(),
            interacting: false,
            target: None,
        }
    }

    pub fn preset_name(&self) -> &str {
        &self.preset_name
    }

    pub fn transfer(&self) -> &TransferFunction {
        &self.transfer
    }

    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    /// Swap the active transfer function. The volume is untouched; applying
    /// the same preset again rebuilds an identical table.
    pub fn apply_preset(&mut self, definition: &PresetDefinition) {
        let (min, max) = self.volume.scalar_range();
        self.transfer = definition.build(min, max);
        self.preset_name = definition.name.to_string();
        debug!(preset = definition.name, "transfer function replaced");
    }

    /// Select the quality profile. Only lighting and sampling parameters
    /// change; neither the volume nor the transfer function is rebuilt.
    pub fn set_render_mode(&mut self, mode: RenderMode) {
        self.mode = mode;
    }

    /// Coarse sampling while a gesture is in flight.
    pub fn begin_interaction(&mut self) {
        self.interacting = true;
    }

    /// Back to fine sampling once gestures settle.
    pub fn end_interaction(&mut self) {
        self.interacting = false;
    }

    pub fn is_interacting(&self) -> bool {
        self.interacting
    }

    /// Current ray-march step in physical units.
    pub fn sampling_step(&self) -> f32 {
        let params = mode_params(self.mode);
        let (sx, sy, sz) = self.volume.spacing();
        let base = sx.min(sy).min(sz);
        let scale = if self.interacting {
            params.coarse_step
        } else {
            params.fine_step
        };
        base * scale
    }

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

    pub fn orbit(&mut self, yaw: f32, pitch: f32) {
        self.camera.orbit(yaw, pitch);
    }

    pub fn zoom(&mut self, factor: f32) {
        self.camera.zoom(factor);
    }

    /// Reframe the full volume bounds.
    pub fn reset_camera(&mut self) {
        self.camera = Camera::orbit_framing(self.volume.center(), self.volume.size());
    }

    /// Ray-cast the volume into an RGBA frame, or `None` while the render
    /// target is unavailable.
    pub fn render(&self) -> Option<RgbaImage> {
        let (width, height) = self.target?;

        let step = self.sampling_step();
        let params = mode_params(self.mode);
        let size = self.volume.size();
        let (scalar_min, scalar_max) = self.volume.scalar_range();
        let span = (scalar_max - scalar_min).max(f32::EPSILON);
        let base_spacing = {
            let (sx, sy, sz) = self.volume.spacing();
            sx.min(sy).min(sz)
        };

        let forward = self.camera.forward();
        let right = forward.cross(self.camera.up).normalize_or_zero();
        let true_up = right.cross(forward);
        let aspect = width as f32 / height as f32;

        let rows: Vec<Vec<Rgba<u8>>> = (0..height)
            .into_par_iter()
            .map(|py| {
                (0..width)
                    .map(|px| {
                        let ndc_x = (px as f32 + 0.5) / width as f32 * 2.0 - 1.0;
                        let ndc_y = 1.0 - (py as f32 + 0.5) / height as f32 * 2.0;

                        let (origin, direction) = match self.camera.projection {
                            Projection::Perspective { fov_y } => {
                                let tan_half = (fov_y * 0.5).tan();
                                let direction = (forward
                                    + right * (ndc_x * tan_half * aspect)
                                    + true_up * (ndc_y * tan_half))
                                    .normalize();
                                (self.camera.position, direction)
                            }
                            Projection::Orthographic { parallel_scale } => {
                                let origin = self.camera.position
                                    + right * (ndc_x * parallel_scale * aspect)
                                    + true_up * (ndc_y * parallel_scale);
                                (origin, forward)
                            }
                        };

                        self.march(origin, direction, size, step, base_spacing, span, params)
                    })
                    .collect()
            })
            .collect();

        let mut image = RgbaImage::new(width, height);
        for (y, row) in rows.into_iter().enumerate() {
            for (x, pixel) in row.into_iter().enumerate() {
                image.put_pixel(x as u32, y as u32, pixel);
            }
        }
        Some(image)
    }

    #[allow(clippy::too_many_arguments)]
    fn march(
        &self,
        origin: Vec3,
        direction: Vec3,
        size: Vec3,
        step: f32,
        base_spacing: f32,
        scalar_span: f32,
        params: ModeParams,
    ) -> Rgba<u8> {
        let Some((t_enter, t_exit)) = intersect_aabb(origin, direction, Vec3::ZERO, size) else {
            return Rgba([0, 0, 0, 0]);
        };
        let t_enter = t_enter.max(0.0);
        if t_exit <= t_enter {
            return Rgba([0, 0, 0, 0]);
        }

        let tf = &self.transfer;
        match tf.blend {
            BlendMode::MaximumIntensity => {
                let mut peak = f32::NEG_INFINITY;
                let mut t = t_enter;
                while t <= t_exit {
                    peak = peak.max(self.volume.sample(origin + direction * t));
                    t += step;
                }
                if peak == f32::NEG_INFINITY {
                    return Rgba([0, 0, 0, 0]);
                }
                let color = tf.color_at(peak);
                let alpha = tf.opacity_at(peak);
                to_rgba(Vec3::from(color) * alpha, alpha)
            }
            BlendMode::Composite => {
                let mut accumulated = Vec3::ZERO;
                let mut alpha = 0.0_f32;
                let light_dir = -direction;

                let mut t = t_enter;
                while t <= t_exit && alpha < EARLY_TERMINATION {
                    let point = origin + direction * t;
                    let scalar = self.volume.sample(point);
                    let sample_alpha = tf.opacity_at(scalar);

                    if sample_alpha > 0.0 {
                        // Opacity correction keeps appearance stable across
                        // step sizes.
                        let corrected =
                            1.0 - (1.0 - sample_alpha.min(1.0)).powf(step / base_spacing);

                        let gradient = self.volume.gradient(point);
                        let magnitude = gradient.length() * base_spacing / scalar_span;
                        let modulated = corrected * tf.gradient_opacity_at(magnitude);

                        if modulated > 0.0 {
                            let mut color = Vec3::from(tf.color_at(scalar));
                            if tf.shade {
                                color = shade(
                                    color,
                                    gradient,
                                    light_dir,
                                    tf.lighting,
                                    params.specular_scale,
                                );
                            }
                            let weight = (1.0 - alpha) * modulated;
                            accumulated += color * weight;
                            alpha += weight;
                        }
                    }
                    t += step;
                }

                to_rgba(accumulated, alpha)
            }
        }
    }
}

/// Grayscale ramp used when the session carries an empty preset library.
fn neutral_transfer(min: f32, max: f32) -> TransferFunction {
    use crate::transfer::{ColorStop, Lighting, OpacityStop};
    TransferFunction {
        color: vec![
            ColorStop {
                scalar: min,
                color: [0.0, 0.0, 0.0],
            },
            ColorStop {
                scalar: max,
                color: [1.0, 1.0, 1.0],
            },
        ],
        opacity: vec![
            OpacityStop {
                scalar: min,
                opacity: 0.0,
            },
            OpacityStop {
                scalar: max,
                opacity: 1.0,
            },
        ],
        gradient_opacity: Vec::new(),
        lighting: Lighting::default(),
        shade: false,
        blend: BlendMode::Composite,
    }
}

fn shade(
    color: Vec3,
    gradient: Vec3,
    light_dir: Vec3,
    lighting: crate::transfer::Lighting,
    specular_scale: f32,
) -> Vec3 {
    let normal = gradient.normalize_or_zero();
    if normal == Vec3::ZERO {
        return color * (lighting.ambient + lighting.diffuse);
    }
    // Headlight: light and view direction coincide.
    let diffuse = normal.dot(light_dir).abs();
    let specular = diffuse.powf(lighting.specular_power)
        * lighting.specular
        * specular_scale;
    color * (lighting.ambient + lighting.diffuse * diffuse) + Vec3::splat(specular)
}

/// Slab intersection of a ray with the volume's bounding box.
fn intersect_aabb(origin: Vec3, direction: Vec3, min: Vec3, max: Vec3) -> Option<(f32, f32)> {
    let mut t_enter = f32::NEG_INFINITY;
    let mut t_exit = f32::INFINITY;

    for axis in 0..3 {
        let d = direction[axis];
        let o = origin[axis];
        if d.abs() < 1e-12 {
            if o < min[axis] || o > max[axis] {
                return None;
            }
            continue;
        }
        let inv = 1.0 / d;
        let t0 = (min[axis] - o) * inv;
        let t1 = (max[axis] - o) * inv;
        let (near, far) = if t0 <= t1 { (t0, t1) } else { (t1, t0) };
        t_enter = t_enter.max(near);
        t_exit = t_exit.min(far);
        if t_enter > t_exit {
            return None;
        }
    }

    Some((t_enter, t_exit))
}

fn to_rgba(premultiplied: Vec3, alpha: f32) -> Rgba<u8> {
    let alpha = alpha.clamp(0.0, 1.0);
    if alpha <= f32::EPSILON {
        return Rgba([0, 0, 0, 0]);
    }
    let color = premultiplied / alpha;
    Rgba([
        (color.x.clamp(0.0, 1.0) * 255.0) as u8,
        (color.y.clamp(0.0, 1.0) * 255.0) as u8,
        (color.z.clamp(0.0, 1.0) * 255.0) as u8,
        (alpha * 255.0) as u8,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::VolumeScalars;
    use ndarray::Array3;

    fn sphere_volume() -> Arc<Volume> {
        // Dense ball in the middle of a 16^3 grid.
        let data = Array3::from_shape_fn((16, 16, 16), |(z, y, x)| {
            let d = ((x as f32 - 7.5).powi(2)
                + (y as f32 - 7.5).powi(2)
                + (z as f32 - 7.5).powi(2))
            .sqrt();
            if d < 5.0 { 1000u16 } else { 0 }
        });
        Arc::new(Volume::new(VolumeScalars::U16(data), (1.0, 1.0, 1.0)))
    }

    #[test]
    fn render_requires_a_target() {
        let viewport = VolumeViewport::new(sphere_volume(), &PresetLibrary::builtin());
        assert!(viewport.render().is_none());
    }

    #[test]
    fn center_ray_hits_the_ball() {
        let mut viewport = VolumeViewport::new(sphere_volume(), &PresetLibrary::builtin());
        viewport.resize(33, 33);
        let image = viewport.render().unwrap();
        let center = image.get_pixel(16, 16);
        assert!(center.0[3] > 0, "center pixel should be covered");
        let corner = image.get_pixel(0, 0);
        assert_eq!(corner.0[3], 0, "corner ray should miss the volume");
    }

    #[test]
    fn interaction_coarsens_sampling() {
        let mut viewport = VolumeViewport::new(sphere_volume(), &PresetLibrary::builtin());
        let fine = viewport.sampling_step();
        viewport.begin_interaction();
        let coarse = viewport.sampling_step();
        assert!(coarse > fine);
        viewport.end_interaction();
        assert_eq!(viewport.sampling_step(), fine);
    }

    #[test]
    fn high_fidelity_mode_samples_finer() {
        let mut viewport = VolumeViewport::new(sphere_volume(), &PresetLibrary::builtin());
        let conservative = viewport.sampling_step();
        viewport.set_render_mode(RenderMode::HighFidelity);
        assert!(viewport.sampling_step() < conservative);
    }

    #[test]
    fn preset_switch_keeps_the_volume_untouched() {
        let volume = sphere_volume();
        let range = volume.scalar_range();
        let library = PresetLibrary::builtin();
        let mut viewport = VolumeViewport::new(volume.clone(), &library);
        viewport.apply_preset(library.get("mip").unwrap());
        assert_eq!(viewport.preset_name(), "mip");
        assert_eq!(volume.scalar_range(), range);
    }

    #[test]
    fn mip_blend_reports_the_peak_value() {
        let library = PresetLibrary::builtin();
        let mut viewport = VolumeViewport::new(sphere_volume(), &library);
        viewport.apply_preset(library.get("mip").unwrap());
        viewport.resize(33, 33);
        let image = viewport.render().unwrap();
        let center = image.get_pixel(16, 16);
        // Peak scalar 1000 out of range [0, 1000] maps to full opacity.
        assert!(center.0[3] > 200);
    }

    #[test]
    fn aabb_intersection_misses_and_hits() {
        let size = Vec3::splat(10.0);
        assert!(
            intersect_aabb(Vec3::new(-5.0, 5.0, 5.0), Vec3::X, Vec3::ZERO, size).is_some()
        );
        assert!(
            intersect_aabb(Vec3::new(-5.0, 50.0, 5.0), Vec3::X, Vec3::ZERO, size).is_none()
        );
    }
}
