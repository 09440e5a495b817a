//! Transfer functions: scalar intensity to color/opacity mappings used by the
//! volumetric renderer, plus the density-window conversion for calibrated data.

/// Color control point in absolute scalar units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorStop {
    pub scalar: f32,
    pub color: [f32; 3],
}

/// Opacity control point. For gradient-opacity curves the `scalar` field is
/// the gradient magnitude normalized to [0, 1] against the scalar range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpacityStop {
    pub scalar: f32,
    pub opacity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lighting {
    pub ambient: f32,
    pub diffuse: f32,
    pub specular: f32,
    pub specular_power: f32,
}

impl Default for Lighting {
    fn default() -> Self {
        Self {
            ambient: 0.2,
            diffuse: 0.7,
            specular: 0.2,
            specular_power: 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendMode {
    #[default]
    Composite,
    MaximumIntensity,
}

/// An immutable scalar-to-appearance table, produced by a preset for one
/// volume's observed scalar range.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferFunction {
    /// Sorted ascending by scalar.
    pub color: Vec<ColorStop>,
    /// Sorted ascending by scalar.
    pub opacity: Vec<OpacityStop>,
    /// Empty when gradient modulation is disabled.
    pub gradient_opacity: Vec<OpacityStop>,
    pub lighting: Lighting,
    pub shade: bool,
    pub blend: BlendMode,
}

impl TransferFunction {
    /// Piecewise-linear color lookup, clamped to the outer stops.
    pub fn color_at(&self, scalar: f32) -> [f32; 3] {
        let stops = &self.color;
        if stops.is_empty() {
            return [1.0, 1.0, 1.0];
        }
        if scalar <= stops[0].scalar {
            return stops[0].color;
        }
        let last = stops[stops.len() - 1];
        if scalar >= last.scalar {
            return last.color;
        }
        for pair in stops.windows(2) {
            let (s0, s1) = (pair[0], pair[1]);
            if scalar >= s0.scalar && scalar <= s1.scalar {
                let t = if s1.scalar > s0.scalar {
                    (scalar - s0.scalar) / (s1.scalar - s0.scalar)
                } else {
                    0.0
                };
                return [
                    lerp(s0.color[0], s1.color[0], t),
                    lerp(s0.color[1], s1.color[1], t),
                    lerp(s0.color[2], s1.color[2], t),
                ];
            }
        }
        last.color
    }

    pub fn opacity_at(&self, scalar: f32) -> f32 {
        eval_opacity(&self.opacity, scalar, 0.0)
    }

    /// Opacity modifier for a normalized gradient magnitude; 1.0 when the
    /// curve is disabled.
    pub fn gradient_opacity_at(&self, magnitude: f32) -> f32 {
        if self.gradient_opacity.is_empty() {
            return 1.0;
        }
        eval_opacity(&self.gradient_opacity, magnitude, 1.0)
    }
}

fn eval_opacity(stops: &[OpacityStop], scalar: f32, empty_default: f32) -> f32 {
    if stops.is_empty() {
        return empty_default;
    }
    if scalar <= stops[0].scalar {
        return stops[0].opacity;
    }
    let last = stops[stops.len() - 1];
    if scalar >= last.scalar {
        return last.opacity;
    }
    for pair in stops.windows(2) {
        let (s0, s1) = (pair[0], pair[1]);
        if scalar >= s0.scalar && scalar <= s1.scalar {
            let t = if s1.scalar > s0.scalar {
                (scalar - s0.scalar) / (s1.scalar - s0.scalar)
            } else {
                0.0
            };
            return lerp(s0.opacity, s1.opacity, t);
        }
    }
    last.opacity
}

#[inline]
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t.clamp(0.0, 1.0)
}

/// Scalar value at a fraction of the observed range.
#[inline]
pub fn fraction_of_range(min: f32, max: f32, fraction: f32) -> f32 {
    min + (max - min) * fraction
}

/// Convert a physical density-unit window into the volume's scalar range.
///
/// Calibrated volumetric data carries density units as raw scalar values, so
/// the window is clamped into [min, max]; a window entirely outside the
/// observed range collapses to its nearest edge.
pub fn window_to_scalar_range(min: f32, max: f32, low_unit: f32, high_unit: f32) -> (f32, f32) {
    let low = low_unit.clamp(min, max);
    let high = high_unit.clamp(min, max);
    if low <= high { (low, high) } else { (high, low) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp() -> TransferFunction {
        TransferFunction {
            color: vec![
                ColorStop {
                    scalar: 0.0,
                    color: [0.0, 0.0, 0.0],
                },
                ColorStop {
                    scalar: 100.0,
                    color: [1.0, 0.5, 0.0],
                },
            ],
            opacity: vec![
                OpacityStop {
                    scalar: 0.0,
                    opacity: 0.0,
                },
                OpacityStop {
                    scalar: 100.0,
                    opacity: 1.0,
                },
            ],
            gradient_opacity: Vec::new(),
            lighting: Lighting::default(),
            shade: true,
            blend: BlendMode::Composite,
        }
    }

    #[test]
    fn lookups_clamp_to_outer_stops() {
        let tf = ramp();
        assert_eq!(tf.color_at(-50.0), [0.0, 0.0, 0.0]);
        assert_eq!(tf.color_at(500.0), [1.0, 0.5, 0.0]);
        assert_relative_eq!(tf.opacity_at(-1.0), 0.0);
        assert_relative_eq!(tf.opacity_at(101.0), 1.0);
    }

    #[test]
    fn lookups_interpolate_between_stops() {
        let tf = ramp();
        let mid = tf.color_at(50.0);
        assert_relative_eq!(mid[0], 0.5, epsilon = 1e-5);
        assert_relative_eq!(mid[1], 0.25, epsilon = 1e-5);
        assert_relative_eq!(tf.opacity_at(25.0), 0.25, epsilon = 1e-5);
    }

    #[test]
    fn missing_gradient_curve_is_transparent_to_opacity() {
        let tf = ramp();
        assert_relative_eq!(tf.gradient_opacity_at(0.0), 1.0);
        assert_relative_eq!(tf.gradient_opacity_at(0.9), 1.0);
    }

    #[test]
    fn window_clamps_into_scalar_range() {
        assert_eq!(window_to_scalar_range(0.0, 255.0, -1024.0, 400.0), (0.0, 255.0));
        assert_eq!(
            window_to_scalar_range(-1024.0, 3071.0, 300.0, 1500.0),
            (300.0, 1500.0)
        );
        // Window entirely above the range collapses to the upper edge.
        assert_eq!(window_to_scalar_range(0.0, 100.0, 300.0, 1500.0), (100.0, 100.0));
    }
}
