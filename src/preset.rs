//! Named tissue-classification presets.
//!
//! Each preset is a pure function of the volume's observed scalar range; the
//! registry is table-driven so presets can be enumerated, tested uniformly,
//! and extended without touching the renderer.

use crate::transfer::{
    BlendMode, ColorStop, Lighting, OpacityStop, TransferFunction, fraction_of_range,
    window_to_scalar_range,
};

use std::collections::BTreeMap;

pub const DEFAULT_PRESET: &str = "soft-tissue";

type PresetFn = fn(f32, f32) -> TransferFunction;

#[derive(Clone)]
pub struct PresetDefinition {
    pub name: &'static str,
    pub description: &'static str,
    build: PresetFn,
}

impl PresetDefinition {
    /// Instantiate the transfer function for a concrete scalar range.
    ///
    /// Pure and side-effect free: the same (min, max) always yields
    /// bit-identical control points.
    pub fn build(&self, min: f32, max: f32) -> TransferFunction {
        (self.build)(min, max)
    }
}

pub struct PresetLibrary {
    definitions: BTreeMap<&'static str, PresetDefinition>,
}

impl Default for PresetLibrary {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PresetLibrary {
    /// The built-in preset set.
    pub fn builtin() -> Self {
        let mut library = Self {
            definitions: BTreeMap::new(),
        };
        library.register(PresetDefinition {
            name: "soft-tissue",
            description: "General-purpose soft tissue rendering",
            build: soft_tissue,
        });
        library.register(PresetDefinition {
            name: "bone",
            description: "High-density skeletal structures",
            build: bone,
        });
        library.register(PresetDefinition {
            name: "brain",
            description: "Low-density neural tissue with CSF separation",
            build: brain,
        });
        library.register(PresetDefinition {
            name: "mip",
            description: "Maximum intensity projection",
            build: mip,
        });
        library.register(PresetDefinition {
            name: "vascular-highlight",
            description: "Contrast-enhanced vessels over suppressed background",
            build: vascular_highlight,
        });
        library
    }

    pub fn register(&mut self, definition: PresetDefinition) {
        self.definitions.insert(definition.name, definition);
    }

    pub fn get(&self, name: &str) -> Option<&PresetDefinition> {
        self.definitions.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.definitions.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

/// Range-relative default: suppress air/background, render mid intensities as
/// translucent flesh tones.
fn soft_tissue(min: f32, max: f32) -> TransferFunction {
    let at = |f| fraction_of_range(min, max, f);
    TransferFunction {
        color: vec![
            ColorStop { scalar: at(0.0), color: [0.0, 0.0, 0.0] },
            ColorStop { scalar: at(0.25), color: [0.55, 0.25, 0.15] },
            ColorStop { scalar: at(0.55), color: [0.88, 0.60, 0.29] },
            ColorStop { scalar: at(0.85), color: [1.0, 0.94, 0.95] },
            ColorStop { scalar: at(1.0), color: [1.0, 1.0, 1.0] },
        ],
        opacity: vec![
            OpacityStop { scalar: at(0.0), opacity: 0.0 },
            OpacityStop { scalar: at(0.15), opacity: 0.0 },
            OpacityStop { scalar: at(0.4), opacity: 0.15 },
            OpacityStop { scalar: at(0.8), opacity: 0.6 },
            OpacityStop { scalar: at(1.0), opacity: 0.85 },
        ],
        gradient_opacity: vec![
            OpacityStop { scalar: 0.0, opacity: 0.2 },
            OpacityStop { scalar: 0.05, opacity: 1.0 },
        ],
        lighting: Lighting {
            ambient: 0.2,
            diffuse: 0.7,
            specular: 0.2,
            specular_power: 10.0,
        },
        shade: true,
        blend: BlendMode::Composite,
    }
}

/// Density-windowed skeletal preset: sharp cutoff below the bone threshold,
/// near-opaque ivory above it.
fn bone(min: f32, max: f32) -> TransferFunction {
    let (low, high) = window_to_scalar_range(min, max, 300.0, 1500.0);
    let cutoff = low - (high - low) * 0.02;
    TransferFunction {
        color: vec![
            ColorStop { scalar: min, color: [0.0, 0.0, 0.0] },
            ColorStop { scalar: low, color: [0.55, 0.45, 0.33] },
            ColorStop { scalar: (low + high) * 0.5, color: [0.87, 0.82, 0.74] },
            ColorStop { scalar: high, color: [1.0, 0.99, 0.95] },
        ],
        opacity: vec![
            OpacityStop { scalar: min, opacity: 0.0 },
            OpacityStop { scalar: cutoff.max(min), opacity: 0.0 },
            OpacityStop { scalar: low, opacity: 0.65 },
            OpacityStop { scalar: high, opacity: 0.95 },
        ],
        gradient_opacity: vec![
            OpacityStop { scalar: 0.0, opacity: 0.35 },
            OpacityStop { scalar: 0.08, opacity: 1.0 },
        ],
        lighting: Lighting {
            ambient: 0.25,
            diffuse: 0.8,
            specular: 0.3,
            specular_power: 15.0,
        },
        shade: true,
        blend: BlendMode::Composite,
    }
}

/// Low-density neural window with distinct bands for ventricular/CSF-like
/// regions versus parenchyma.
fn brain(min: f32, max: f32) -> TransferFunction {
    let (low, high) = window_to_scalar_range(min, max, 0.0, 90.0);
    let band = |f: f32| low + (high - low) * f;
    TransferFunction {
        color: vec![
            ColorStop { scalar: min, color: [0.0, 0.0, 0.0] },
            // Ventricles / CSF
            ColorStop { scalar: band(0.08), color: [0.22, 0.33, 0.55] },
            ColorStop { scalar: band(0.18), color: [0.30, 0.40, 0.60] },
            // Parenchyma
            ColorStop { scalar: band(0.35), color: [0.75, 0.62, 0.60] },
            ColorStop { scalar: band(0.6), color: [0.85, 0.78, 0.74] },
            ColorStop { scalar: high, color: [0.95, 0.95, 0.95] },
        ],
        opacity: vec![
            OpacityStop { scalar: min, opacity: 0.0 },
            OpacityStop { scalar: band(0.05), opacity: 0.02 },
            OpacityStop { scalar: band(0.2), opacity: 0.12 },
            OpacityStop { scalar: band(0.4), opacity: 0.35 },
            OpacityStop { scalar: high, opacity: 0.5 },
        ],
        gradient_opacity: vec![
            OpacityStop { scalar: 0.0, opacity: 0.3 },
            OpacityStop { scalar: 0.04, opacity: 1.0 },
        ],
        lighting: Lighting {
            ambient: 0.3,
            diffuse: 0.6,
            specular: 0.1,
            specular_power: 8.0,
        },
        shade: true,
        blend: BlendMode::Composite,
    }
}

/// Maximum intensity projection: shading disabled, linear ramp to full
/// opacity across the range.
fn mip(min: f32, max: f32) -> TransferFunction {
    TransferFunction {
        color: vec![
            ColorStop { scalar: min, color: [0.0, 0.0, 0.0] },
            ColorStop { scalar: max, color: [1.0, 1.0, 1.0] },
        ],
        opacity: vec![
            OpacityStop { scalar: min, opacity: 0.0 },
            OpacityStop { scalar: max, opacity: 1.0 },
        ],
        gradient_opacity: Vec::new(),
        lighting: Lighting {
            ambient: 1.0,
            diffuse: 0.0,
            specular: 0.0,
            specular_power: 1.0,
        },
        shade: false,
        blend: BlendMode::MaximumIntensity,
    }
}

/// Suppresses background tissue to near zero and renders a narrow
/// high-density band (contrast-enhanced vessels, focal lesions) opaque and
/// saturated.
fn vascular_highlight(min: f32, max: f32) -> TransferFunction {
    let (low, high) = window_to_scalar_range(min, max, 180.0, 700.0);
    let shoulder = low - (high - low) * 0.1;
    TransferFunction {
        color: vec![
            ColorStop { scalar: min, color: [0.05, 0.05, 0.05] },
            ColorStop { scalar: shoulder.max(min), color: [0.2, 0.05, 0.05] },
            ColorStop { scalar: low, color: [0.8, 0.12, 0.10] },
            ColorStop { scalar: (low + high) * 0.5, color: [1.0, 0.25, 0.15] },
            ColorStop { scalar: high, color: [1.0, 0.85, 0.6] },
        ],
        opacity: vec![
            OpacityStop { scalar: min, opacity: 0.0 },
            OpacityStop { scalar: shoulder.max(min), opacity: 0.01 },
            OpacityStop { scalar: low, opacity: 0.85 },
            OpacityStop { scalar: high, opacity: 1.0 },
        ],
        gradient_opacity: vec![
            OpacityStop { scalar: 0.0, opacity: 0.5 },
            OpacityStop { scalar: 0.06, opacity: 1.0 },
        ],
        lighting: Lighting {
            ambient: 0.2,
            diffuse: 0.75,
            specular: 0.4,
            specular_power: 20.0,
        },
        shade: true,
        blend: BlendMode::Composite,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RANGE: (f32, f32) = (-1024.0, 3071.0);

    #[test]
    fn builtin_library_contains_required_presets() {
        let library = PresetLibrary::builtin();
        for name in ["soft-tissue", "bone", "brain", "mip", "vascular-highlight"] {
            assert!(library.get(name).is_some(), "missing preset {name}");
        }
        assert!(library.get(DEFAULT_PRESET).is_some());
    }

    #[test]
    fn building_twice_is_bit_identical() {
        let library = PresetLibrary::builtin();
        for name in library.names() {
            let def = library.get(name).unwrap();
            let a = def.build(RANGE.0, RANGE.1);
            let b = def.build(RANGE.0, RANGE.1);
            assert_eq!(a, b, "preset {name} is not idempotent");
        }
    }

    #[test]
    fn control_points_are_sorted_ascending() {
        let library = PresetLibrary::builtin();
        for name in library.names() {
            let tf = library.get(name).unwrap().build(RANGE.0, RANGE.1);
            assert!(
                tf.color.windows(2).all(|w| w[0].scalar <= w[1].scalar),
                "unsorted color stops in {name}"
            );
            assert!(
                tf.opacity.windows(2).all(|w| w[0].scalar <= w[1].scalar),
                "unsorted opacity stops in {name}"
            );
        }
    }

    #[test]
    fn mip_disables_shading_and_uses_max_blend() {
        let tf = PresetLibrary::builtin()
            .get("mip")
            .unwrap()
            .build(RANGE.0, RANGE.1);
        assert!(!tf.shade);
        assert_eq!(tf.blend, BlendMode::MaximumIntensity);
        assert!(tf.gradient_opacity.is_empty());
    }

    #[test]
    fn bone_is_transparent_below_the_window() {
        let tf = PresetLibrary::builtin()
            .get("bone")
            .unwrap()
            .build(RANGE.0, RANGE.1);
        assert_eq!(tf.opacity_at(0.0), 0.0);
        assert!(tf.opacity_at(1200.0) > 0.6);
    }

    #[test]
    fn highlight_suppresses_background() {
        let tf = PresetLibrary::builtin()
            .get("vascular-highlight")
            .unwrap()
            .build(RANGE.0, RANGE.1);
        assert!(tf.opacity_at(50.0) < 0.05);
        assert!(tf.opacity_at(650.0) > 0.9);
    }

    #[test]
    fn presets_adapt_to_uncalibrated_ranges() {
        // An 8-bit stack: windowed presets must stay inside the range.
        let tf = PresetLibrary::builtin().get("bone").unwrap().build(0.0, 255.0);
        for stop in &tf.opacity {
            assert!(stop.scalar >= 0.0 && stop.scalar <= 255.0);
        }
    }
}
