use crate::enums::ScalarKind;
use crate::slice::{PixelBuffer, SliceImage, sort_slices};
use crate::volume::{Volume, VolumeScalars};

use ndarray::Array3;
use thiserror::Error;
use tracing::{debug, warn};

/// Tuning knobs for volume assembly.
///
/// The plausibility band bounds the measured inter-slice distance; values
/// outside it indicate unreliable position metadata and are discarded in
/// favor of the declared slice thickness. The thresholds are heuristics, not
/// invariants.
#[derive(Debug, Clone)]
pub struct VolumeBuilderConfig {
    /// Hard cap on processed slices, bounding memory and decode time.
    pub max_slices: usize,
    /// Measured spacings at or below this are treated as position noise.
    pub spacing_noise_floor: f32,
    /// Measured spacings at or above this are treated as missing metadata.
    pub spacing_gap_ceiling: f32,
    /// Spacing of last resort when neither positions nor thickness are usable.
    pub fallback_spacing: f32,
}

impl Default for VolumeBuilderConfig {
    fn default() -> Self {
        Self {
            max_slices: 512,
            spacing_noise_floor: 0.1,
            spacing_gap_ceiling: 20.0,
            fallback_spacing: 1.0,
        }
    }
}

#[derive(Debug, Error)]
pub enum VolumeBuilderError {
    #[error("{usable} usable slice(s) — at least two are required to reconstruct a volume")]
    InsufficientData { usable: usize },
}

/// Non-fatal conditions surfaced alongside a successfully built volume.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildWarning {
    /// Input exceeded the slice cap; only the ordered prefix was used.
    CapacityExceeded { used: usize, supplied: usize },
    /// A single slice was dropped; the volume has one layer fewer.
    SliceSkipped { source_name: String, reason: String },
}

#[derive(Debug)]
pub struct VolumeReport {
    pub volume: Volume,
    pub warnings: Vec<BuildWarning>,
}

/// Assembles ordered 2-D slice buffers into one 3-D scalar grid.
pub struct VolumeBuilder {
    config: VolumeBuilderConfig,
}

impl Default for VolumeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl VolumeBuilder {
    pub fn new() -> Self {
        Self::with_config(VolumeBuilderConfig::default())
    }

    pub fn with_config(config: VolumeBuilderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &VolumeBuilderConfig {
        &self.config
    }

    /// Build a volume from decoded slices in any arrival order.
    ///
    /// Slices are sorted by (position, instance number, source name); the
    /// element type and in-plane geometry come from the first ordered slice.
    /// Slices with mismatched geometry are skipped with a warning, not fatal.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeBuilderError::InsufficientData`] when fewer than two
    /// usable slices remain.
    pub fn build(&self, mut slices: Vec<SliceImage>) -> Result<VolumeReport, VolumeBuilderError> {
        sort_slices(&mut slices);

        let mut warnings = Vec::new();
        let supplied = slices.len();
        if supplied > self.config.max_slices {
            slices.truncate(self.config.max_slices);
            warn!(
                supplied,
                used = self.config.max_slices,
                "slice cap exceeded, reconstructing from ordered prefix"
            );
            warnings.push(BuildWarning::CapacityExceeded {
                used: self.config.max_slices,
                supplied,
            });
        }

        let Some(first) = slices.first() else {
            return Err(VolumeBuilderError::InsufficientData { usable: 0 });
        };

        let kind = first.kind();
        let (width, height) = (first.width, first.height);
        let in_plane = first.pixel_spacing;
        let expected_len = width as usize * height as usize;

        let mut buffer = ScalarVec::with_capacity(kind, expected_len * slices.len());
        let mut usable: Vec<&SliceImage> = Vec::with_capacity(slices.len());

        for slice in &slices {
            if slice.width != width || slice.height != height {
                let reason = format!(
                    "dimensions {}x{} differ from first slice {}x{}",
                    slice.width, slice.height, width, height
                );
                warn!(source = %slice.source_name, %reason, "skipping slice");
                warnings.push(BuildWarning::SliceSkipped {
                    source_name: slice.source_name.clone(),
                    reason,
                });
                continue;
            }
            if slice.pixels.len() != expected_len {
                let reason = format!(
                    "pixel buffer holds {} samples, expected {}",
                    slice.pixels.len(),
                    expected_len
                );
                warn!(source = %slice.source_name, %reason, "skipping slice");
                warnings.push(BuildWarning::SliceSkipped {
                    source_name: slice.source_name.clone(),
                    reason,
                });
                continue;
            }

            buffer.extend_from(&slice.pixels);
            usable.push(slice);
        }

        if usable.len() < 2 {
            return Err(VolumeBuilderError::InsufficientData {
                usable: usable.len(),
            });
        }

        let depth = usable.len();
        let z_spacing = self.infer_z_spacing(&usable);
        let spacing = (in_plane.0, in_plane.1, z_spacing);

        let data = buffer.into_scalars((depth, height as usize, width as usize));
        let volume = Volume::new(data, spacing);

        debug!(
            depth,
            width,
            height,
            ?spacing,
            kind = ?volume.kind(),
            "assembled volume"
        );

        Ok(VolumeReport { volume, warnings })
    }

    /// Out-of-plane spacing: measured distance between the first two ordered
    /// slice positions when plausible, else declared thickness, else default.
    fn infer_z_spacing(&self, ordered: &[&SliceImage]) -> f32 {
        if let (Some(a), Some(b)) = (ordered[0].position, ordered[1].position) {
            let measured = (b - a).abs();
            if measured > self.config.spacing_noise_floor
                && measured < self.config.spacing_gap_ceiling
            {
                return measured;
            }
            warn!(
                measured,
                floor = self.config.spacing_noise_floor,
                ceiling = self.config.spacing_gap_ceiling,
                "measured slice distance outside plausibility band, falling back to thickness"
            );
        }

        if let Some(thickness) = ordered.iter().find_map(|s| s.slice_thickness) {
            if thickness > 0.0 {
                return thickness;
            }
        }

        self.config.fallback_spacing
    }
}

/// Accumulation buffer typed to the target element kind.
enum ScalarVec {
    U8(Vec<u8>),
    I8(Vec<i8>),
    U16(Vec<u16>),
    I16(Vec<i16>),
    F32(Vec<f32>),
}

impl ScalarVec {
    fn with_capacity(kind: ScalarKind, capacity: usize) -> Self {
        match kind {
            ScalarKind::U8 => ScalarVec::U8(Vec::with_capacity(capacity)),
            ScalarKind::I8 => ScalarVec::I8(Vec::with_capacity(capacity)),
            ScalarKind::U16 => ScalarVec::U16(Vec::with_capacity(capacity)),
            ScalarKind::I16 => ScalarVec::I16(Vec::with_capacity(capacity)),
            ScalarKind::F32 => ScalarVec::F32(Vec::with_capacity(capacity)),
        }
    }

    fn extend_from(&mut self, pixels: &PixelBuffer) {
        match (&mut *self, pixels) {
            (ScalarVec::U8(dst), PixelBuffer::U8(src)) => dst.extend_from_slice(src),
            (ScalarVec::I8(dst), PixelBuffer::I8(src)) => dst.extend_from_slice(src),
            (ScalarVec::U16(dst), PixelBuffer::U16(src)) => dst.extend_from_slice(src),
            (ScalarVec::I16(dst), PixelBuffer::I16(src)) => dst.extend_from_slice(src),
            (ScalarVec::F32(dst), PixelBuffer::F32(src)) => dst.extend_from_slice(src),
            (dst, src) => {
                for i in 0..src.len() {
                    dst.push_converted(src.value(i));
                }
            }
        }
    }

    #[inline]
    fn push_converted(&mut self, value: f32) {
        match self {
            ScalarVec::U8(v) => v.push(value.round().clamp(0.0, u8::MAX as f32) as u8),
            ScalarVec::I8(v) => {
                v.push(value.round().clamp(i8::MIN as f32, i8::MAX as f32) as i8)
            }
            ScalarVec::U16(v) => v.push(value.round().clamp(0.0, u16::MAX as f32) as u16),
            ScalarVec::I16(v) => {
                v.push(value.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16)
            }
            ScalarVec::F32(v) => v.push(value),
        }
    }

    fn into_scalars(self, dim: (usize, usize, usize)) -> VolumeScalars {
        // Every accepted slice contributed exactly width * height samples.
        match self {
            ScalarVec::U8(v) => {
                VolumeScalars::U8(Array3::from_shape_vec(dim, v).expect("buffer matches dim"))
            }
            ScalarVec::I8(v) => {
                VolumeScalars::I8(Array3::from_shape_vec(dim, v).expect("buffer matches dim"))
            }
            ScalarVec::U16(v) => {
                VolumeScalars::U16(Array3::from_shape_vec(dim, v).expect("buffer matches dim"))
            }
            ScalarVec::I16(v) => {
                VolumeScalars::I16(Array3::from_shape_vec(dim, v).expect("buffer matches dim"))
            }
            ScalarVec::F32(v) => {
                VolumeScalars::F32(Array3::from_shape_vec(dim, v).expect("buffer matches dim"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn slice_with(
        name: &str,
        position: Option<f32>,
        thickness: Option<f32>,
        fill: u16,
    ) -> SliceImage {
        SliceImage {
            pixels: PixelBuffer::U16(vec![fill; 16]),
            width: 4,
            height: 4,
            pixel_spacing: (0.5, 0.5),
            slice_thickness: thickness,
            position,
            instance: None,
            source_name: name.to_string(),
        }
    }

    #[test]
    fn empty_input_is_insufficient() {
        let err = VolumeBuilder::new().build(Vec::new()).unwrap_err();
        assert!(matches!(err, VolumeBuilderError::InsufficientData { usable: 0 }));
    }

    #[test]
    fn single_slice_is_insufficient() {
        let err = VolumeBuilder::new()
            .build(vec![slice_with("a", None, None, 1)])
            .unwrap_err();
        assert!(matches!(err, VolumeBuilderError::InsufficientData { usable: 1 }));
    }

    #[test]
    fn buffer_is_permutation_invariant() {
        let slices = vec![
            slice_with("a", Some(0.0), None, 10),
            slice_with("b", Some(2.0), None, 20),
            slice_with("c", Some(4.0), None, 30),
        ];
        let mut shuffled = slices.clone();
        shuffled.rotate_left(2);

        let builder = VolumeBuilder::new();
        let a = builder.build(slices).unwrap().volume;
        let b = builder.build(shuffled).unwrap().volume;

        assert_eq!(a.dim(), b.dim());
        for z in 0..3 {
            assert_eq!(a.voxel(z, 0, 0), b.voxel(z, 0, 0));
        }
        assert_eq!(a.voxel(0, 0, 0), 10.0);
        assert_eq!(a.voxel(2, 0, 0), 30.0);
    }

    #[test]
    fn plausible_measured_distance_overrides_thickness() {
        let slices = vec![
            slice_with("a", Some(10.0), Some(5.0), 1),
            slice_with("b", Some(12.5), Some(5.0), 2),
        ];
        let report = VolumeBuilder::new().build(slices).unwrap();
        assert_relative_eq!(report.volume.spacing().2, 2.5);
    }

    #[test]
    fn identical_positions_fall_back_to_thickness() {
        let slices = vec![
            slice_with("a", Some(7.0), Some(1.25), 1),
            slice_with("b", Some(7.0), Some(1.25), 2),
        ];
        let report = VolumeBuilder::new().build(slices).unwrap();
        assert_relative_eq!(report.volume.spacing().2, 1.25);
    }

    #[test]
    fn implausible_gap_falls_back_to_thickness() {
        let slices = vec![
            slice_with("a", Some(0.0), Some(3.0), 1),
            slice_with("b", Some(500.0), Some(3.0), 2),
        ];
        let report = VolumeBuilder::new().build(slices).unwrap();
        assert_relative_eq!(report.volume.spacing().2, 3.0);
    }

    #[test]
    fn no_metadata_uses_unit_spacing() {
        let slices = vec![
            slice_with("a", None, None, 1),
            slice_with("b", None, None, 2),
        ];
        let report = VolumeBuilder::new().build(slices).unwrap();
        assert_relative_eq!(report.volume.spacing().2, 1.0);
    }

    #[test]
    fn declared_thickness_used_without_positions() {
        let slices: Vec<_> = (0..50)
            .map(|i| slice_with(&format!("s{i:03}"), None, Some(3.0), i as u16))
            .collect();
        let report = VolumeBuilder::new().build(slices).unwrap();
        assert_eq!(report.volume.dim().0, 50);
        assert_eq!(report.volume.spacing().2, 3.0);
    }

    #[test]
    fn over_cap_input_truncates_and_warns() {
        let config = VolumeBuilderConfig {
            max_slices: 4,
            ..Default::default()
        };
        let slices: Vec<_> = (0..10)
            .map(|i| slice_with(&format!("s{i}"), Some(i as f32), None, i as u16))
            .collect();
        let report = VolumeBuilder::with_config(config).build(slices).unwrap();

        assert_eq!(report.volume.dim().0, 4);
        assert!(report.warnings.contains(&BuildWarning::CapacityExceeded {
            used: 4,
            supplied: 10,
        }));
    }

    #[test]
    fn mismatched_slice_is_skipped_not_fatal() {
        let odd = SliceImage {
            pixels: PixelBuffer::U16(vec![0; 4]),
            width: 2,
            height: 2,
            pixel_spacing: (0.5, 0.5),
            slice_thickness: None,
            position: Some(1.0),
            instance: None,
            source_name: "odd".to_string(),
        };
        let slices = vec![
            slice_with("a", Some(0.0), None, 1),
            odd,
            slice_with("c", Some(2.0), None, 3),
        ];
        let report = VolumeBuilder::new().build(slices).unwrap();
        assert_eq!(report.volume.dim().0, 2);
        assert!(matches!(
            report.warnings.as_slice(),
            [BuildWarning::SliceSkipped { source_name, .. }] if source_name == "odd"
        ));
    }

    #[test]
    fn element_type_follows_first_slice() {
        let first = slice_with("a", Some(0.0), None, 1);
        let second = SliceImage {
            pixels: PixelBuffer::U8(vec![200; 16]),
            width: 4,
            height: 4,
            pixel_spacing: (0.5, 0.5),
            slice_thickness: None,
            position: Some(1.0),
            instance: None,
            source_name: "b".to_string(),
        };
        let report = VolumeBuilder::new().build(vec![first, second]).unwrap();
        assert_eq!(report.volume.kind(), ScalarKind::U16);
        assert_eq!(report.volume.voxel(1, 0, 0), 200.0);
    }
}
