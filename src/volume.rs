use crate::enums::{Orientation, ScalarKind};

use glam::Vec3;
use ndarray::{Array2, Array3, s};

/// Typed scalar grid backing a [`Volume`], indexed (depth, height, width).
///
/// The element type is the narrowest integer type that losslessly holds the
/// source samples, falling back to `f32`.
#[derive(Debug, Clone)]
pub enum VolumeScalars {
    U8(Array3<u8>),
    I8(Array3<i8>),
    U16(Array3<u16>),
    I16(Array3<i16>),
    F32(Array3<f32>),
}

impl VolumeScalars {
    pub fn kind(&self) -> ScalarKind {
        match self {
            VolumeScalars::U8(_) => ScalarKind::U8,
            VolumeScalars::I8(_) => ScalarKind::I8,
            VolumeScalars::U16(_) => ScalarKind::U16,
            VolumeScalars::I16(_) => ScalarKind::I16,
            VolumeScalars::F32(_) => ScalarKind::F32,
        }
    }

    /// Dimensions as (depth, height, width).
    pub fn dim(&self) -> (usize, usize, usize) {
        match self {
            VolumeScalars::U8(a) => a.dim(),
            VolumeScalars::I8(a) => a.dim(),
            VolumeScalars::U16(a) => a.dim(),
            VolumeScalars::I16(a) => a.dim(),
            VolumeScalars::F32(a) => a.dim(),
        }
    }

    #[inline]
    pub fn value(&self, z: usize, y: usize, x: usize) -> f32 {
        match self {
            VolumeScalars::U8(a) => a[[z, y, x]] as f32,
            VolumeScalars::I8(a) => a[[z, y, x]] as f32,
            VolumeScalars::U16(a) => a[[z, y, x]] as f32,
            VolumeScalars::I16(a) => a[[z, y, x]] as f32,
            VolumeScalars::F32(a) => a[[z, y, x]],
        }
    }

    fn value_range(&self) -> (f32, f32) {
        fn fold<'a, T: Copy + Into<f64> + 'a>(
            iter: impl Iterator<Item = &'a T>,
        ) -> (f32, f32) {
            let mut min = f64::INFINITY;
            let mut max = f64::NEG_INFINITY;
            for &v in iter {
                let v: f64 = v.into();
                if v.is_nan() {
                    continue;
                }
                min = min.min(v);
                max = max.max(v);
            }
            if min > max {
                (0.0, 0.0)
            } else {
                (min as f32, max as f32)
            }
        }

        match self {
            VolumeScalars::U8(a) => fold(a.iter()),
            VolumeScalars::I8(a) => fold(a.iter()),
            VolumeScalars::U16(a) => fold(a.iter()),
            VolumeScalars::I16(a) => fold(a.iter()),
            VolumeScalars::F32(a) => fold(a.iter()),
        }
    }
}

/// The assembled 3-D scalar field of one tomographic series.
///
/// Built once per loaded series and read-only afterward; both the re-slice
/// viewports and the volumetric viewport reference it, never own it.
#[derive(Debug, Clone)]
pub struct Volume {
    data: VolumeScalars,
    /// Real-world voxel spacing (x, y, z).
    spacing: (f32, f32, f32),
    scalar_range: (f32, f32),
}

impl Volume {
    pub fn new(data: VolumeScalars, spacing: (f32, f32, f32)) -> Self {
        let scalar_range = data.value_range();
        Self {
            data,
            spacing,
            scalar_range,
        }
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn data(&self) -> &VolumeScalars {
        &self.data
    }

    pub fn kind(&self) -> ScalarKind {
        self.data.kind()
    }

    pub fn spacing(&self) -> (f32, f32, f32) {
        self.spacing
    }

    /// Observed (min, max) of the scalar field.
    pub fn scalar_range(&self) -> (f32, f32) {
        self.scalar_range
    }

    /// Physical extent (x, y, z); the volume occupies [0, size] on each axis.
    pub fn size(&self) -> Vec3 {
        let (depth, height, width) = self.dim();
        Vec3::new(
            width as f32 * self.spacing.0,
            height as f32 * self.spacing.1,
            depth as f32 * self.spacing.2,
        )
    }

    /// Geometric center in physical coordinates.
    pub fn center(&self) -> Vec3 {
        self.size() * 0.5
    }

    /// Spacing along a principal axis by index (x = 0, y = 1, z = 2).
    pub fn spacing_along(&self, axis: usize) -> f32 {
        match axis {
            0 => self.spacing.0,
            1 => self.spacing.1,
            _ => self.spacing.2,
        }
    }

    pub fn contains(&self, point: Vec3) -> bool {
        let size = self.size();
        point.x >= 0.0
            && point.y >= 0.0
            && point.z >= 0.0
            && point.x <= size.x
            && point.y <= size.y
            && point.z <= size.z
    }

    #[inline]
    pub fn voxel(&self, z: usize, y: usize, x: usize) -> f32 {
        self.data.value(z, y, x)
    }

    /// Number of voxels along the axis a plane of this orientation steps through.
    pub fn axis_len(&self, orientation: Orientation) -> usize {
        let (depth, height, width) = self.dim();
        match orientation {
            Orientation::Axial => depth,
            Orientation::Coronal => height,
            Orientation::Sagittal => width,
        }
    }

    /// Materialize one axis-aligned cross-section as `f32` samples.
    pub fn axis_slice(&self, orientation: Orientation, index: usize) -> Option<Array2<f32>> {
        if index >= self.axis_len(orientation) {
            return None;
        }

        fn take<T: Copy + Into<f64>>(
            a: &Array3<T>,
            orientation: Orientation,
            index: usize,
        ) -> Array2<f32> {
            let view = match orientation {
                Orientation::Axial => a.slice(s![index, .., ..]),
                Orientation::Coronal => a.slice(s![.., index, ..]),
                Orientation::Sagittal => a.slice(s![.., .., index]),
            };
            view.map(|&v| {
                let v: f64 = v.into();
                v as f32
            })
        }

        Some(match &self.data {
            VolumeScalars::U8(a) => take(a, orientation, index),
            VolumeScalars::I8(a) => take(a, orientation, index),
            VolumeScalars::U16(a) => take(a, orientation, index),
            VolumeScalars::I16(a) => take(a, orientation, index),
            VolumeScalars::F32(a) => take(a, orientation, index),
        })
    }

    /// Trilinear sample at a physical point, clamped to the grid edges.
    ///
    /// Voxel centers sit at `(i + 0.5) * spacing`.
    pub fn sample(&self, point: Vec3) -> f32 {
        let (depth, height, width) = self.dim();

        let fx = (point.x / self.spacing.0 - 0.5).clamp(0.0, (width - 1) as f32);
        let fy = (point.y / self.spacing.1 - 0.5).clamp(0.0, (height - 1) as f32);
        let fz = (point.z / self.spacing.2 - 0.5).clamp(0.0, (depth - 1) as f32);

        let x0 = fx.floor() as usize;
        let y0 = fy.floor() as usize;
        let z0 = fz.floor() as usize;
        let x1 = (x0 + 1).min(width - 1);
        let y1 = (y0 + 1).min(height - 1);
        let z1 = (z0 + 1).min(depth - 1);

        let dx = fx - x0 as f32;
        let dy = fy - y0 as f32;
        let dz = fz - z0 as f32;

        let lerp = |a: f32, b: f32, t: f32| a.mul_add(1.0 - t, b * t);

        let c00 = lerp(self.voxel(z0, y0, x0), self.voxel(z0, y0, x1), dx);
        let c01 = lerp(self.voxel(z0, y1, x0), self.voxel(z0, y1, x1), dx);
        let c10 = lerp(self.voxel(z1, y0, x0), self.voxel(z1, y0, x1), dx);
        let c11 = lerp(self.voxel(z1, y1, x0), self.voxel(z1, y1, x1), dx);

        let c0 = lerp(c00, c01, dy);
        let c1 = lerp(c10, c11, dy);

        lerp(c0, c1, dz)
    }

    /// Central-difference intensity gradient at a physical point,
    /// in scalar units per physical unit.
    pub fn gradient(&self, point: Vec3) -> Vec3 {
        let (sx, sy, sz) = self.spacing;
        let gx = self.sample(point + Vec3::new(sx, 0.0, 0.0))
            - self.sample(point - Vec3::new(sx, 0.0, 0.0));
        let gy = self.sample(point + Vec3::new(0.0, sy, 0.0))
            - self.sample(point - Vec3::new(0.0, sy, 0.0));
        let gz = self.sample(point + Vec3::new(0.0, 0.0, sz))
            - self.sample(point - Vec3::new(0.0, 0.0, sz));
        Vec3::new(gx / (2.0 * sx), gy / (2.0 * sy), gz / (2.0 * sz))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array3;

    fn ramp_volume() -> Volume {
        // 4x4x4, value == x index
        let data = Array3::from_shape_fn((4, 4, 4), |(_, _, x)| x as u16 * 10);
        Volume::new(VolumeScalars::U16(data), (1.0, 1.0, 2.0))
    }

    #[test]
    fn scalar_range_is_observed_min_max() {
        let volume = ramp_volume();
        assert_eq!(volume.scalar_range(), (0.0, 30.0));
    }

    #[test]
    fn physical_size_scales_with_spacing() {
        let volume = ramp_volume();
        assert_eq!(volume.size(), Vec3::new(4.0, 4.0, 8.0));
        assert_eq!(volume.center(), Vec3::new(2.0, 2.0, 4.0));
    }

    #[test]
    fn trilinear_sample_interpolates_between_voxel_centers() {
        let volume = ramp_volume();
        // Halfway between the centers of x = 1 (value 10) and x = 2 (value 20).
        let v = volume.sample(Vec3::new(2.0, 2.0, 4.0));
        assert_relative_eq!(v, 15.0, epsilon = 1e-4);
    }

    #[test]
    fn gradient_points_along_the_ramp() {
        let volume = ramp_volume();
        let g = volume.gradient(Vec3::new(2.0, 2.0, 4.0));
        assert!(g.x > 0.0);
        assert_relative_eq!(g.y, 0.0, epsilon = 1e-4);
        assert_relative_eq!(g.z, 0.0, epsilon = 1e-4);
    }

    #[test]
    fn axis_slice_bounds_checked() {
        let volume = ramp_volume();
        assert!(volume.axis_slice(Orientation::Axial, 3).is_some());
        assert!(volume.axis_slice(Orientation::Axial, 4).is_none());
    }
}
