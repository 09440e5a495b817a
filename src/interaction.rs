//! Gesture routing.
//!
//! Translates low-level pointer/wheel/touch events into viewport actions:
//! wheel or two-finger scroll on a re-slice viewport steps its plane, drags
//! on the volume viewport orbit the camera, pinch or secondary-drag zooms.
//! Camera motion also drives the renderer's coarse/fine sampling swap via a
//! settle timer.

use crate::enums::ViewportId;

use std::time::Duration;
use web_time::Instant;

/// Radians of orbit per pixel of drag.
const ORBIT_SENSITIVITY: f32 = 0.008;
/// Zoom factor response to vertical secondary-drag.
const DRAG_ZOOM_SENSITIVITY: f32 = 0.004;
/// Camera motion older than this counts as settled.
const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerButton {
    Primary,
    Secondary,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Gesture {
    /// Wheel notches; positive steps forward along the plane normal.
    Wheel { delta: f32 },
    /// Two-finger trackpad scroll, same semantics as the wheel.
    TwoFingerScroll { delta: f32 },
    /// Pointer drag in pixels since the last event.
    Drag { dx: f32, dy: f32, button: PointerButton },
    /// Pinch scale relative to the previous frame (> 1 zooms in).
    Pinch { scale: f32 },
    /// All pointers lifted.
    Release,
}

/// What a gesture means for the viewport it landed on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GestureAction {
    StepSlice(i32),
    Orbit { yaw: f32, pitch: f32 },
    Zoom(f32),
    None,
}

pub struct InteractionController {
    last_motion: Option<Instant>,
    settle_delay: Duration,
}

impl Default for InteractionController {
    fn default() -> Self {
        Self::new()
    }
}

impl InteractionController {
    pub fn new() -> Self {
        Self::with_settle_delay(DEFAULT_SETTLE_DELAY)
    }

    pub fn with_settle_delay(settle_delay: Duration) -> Self {
        Self {
            last_motion: None,
            settle_delay,
        }
    }

    /// Map a gesture on a viewport to an action. Continuous camera motion on
    /// the volume viewport restarts the settle timer.
    pub fn interpret(&mut self, viewport: ViewportId, gesture: Gesture) -> GestureAction {
        let on_volume = viewport == ViewportId::Volume;
        match gesture {
            Gesture::Wheel { delta } | Gesture::TwoFingerScroll { delta } => {
                if on_volume {
                    // Discrete notches: no settle tracking needed.
                    GestureAction::Zoom(1.1_f32.powf(delta))
                } else {
                    GestureAction::StepSlice(notches(delta))
                }
            }
            Gesture::Drag { dx, dy, button } => match (on_volume, button) {
                (true, PointerButton::Primary) => {
                    self.note_motion();
                    GestureAction::Orbit {
                        yaw: -dx * ORBIT_SENSITIVITY,
                        pitch: -dy * ORBIT_SENSITIVITY,
                    }
                }
                (_, PointerButton::Secondary) => {
                    if on_volume {
                        self.note_motion();
                    }
                    GestureAction::Zoom((-dy * DRAG_ZOOM_SENSITIVITY).exp())
                }
                (false, PointerButton::Primary) => GestureAction::None,
            },
            Gesture::Pinch { scale } => {
                if on_volume {
                    self.note_motion();
                }
                GestureAction::Zoom(scale)
            }
            Gesture::Release => GestureAction::None,
        }
    }

    fn note_motion(&mut self) {
        self.last_motion = Some(Instant::now());
    }

    /// Whether volume-camera motion is currently in flight.
    pub fn is_interacting(&self) -> bool {
        self.last_motion
            .is_some_and(|at| at.elapsed() < self.settle_delay)
    }

    /// True exactly once when motion has settled, signalling the renderer to
    /// swap back to fine sampling.
    pub fn poll_settled(&mut self) -> bool {
        match self.last_motion {
            Some(at) if at.elapsed() >= self.settle_delay => {
                self.last_motion = None;
                true
            }
            _ => false,
        }
    }

    pub fn reset(&mut self) {
        self.last_motion = None;
    }
}

/// Whole step notches from a wheel delta; sub-notch deltas still step once.
fn notches(delta: f32) -> i32 {
    if delta == 0.0 {
        return 0;
    }
    let rounded = delta.round() as i32;
    if rounded == 0 { delta.signum() as i32 } else { rounded }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wheel_on_reslice_viewport_steps() {
        let mut controller = InteractionController::new();
        assert_eq!(
            controller.interpret(ViewportId::Axial, Gesture::Wheel { delta: 1.0 }),
            GestureAction::StepSlice(1)
        );
        assert_eq!(
            controller.interpret(ViewportId::Coronal, Gesture::Wheel { delta: -3.0 }),
            GestureAction::StepSlice(-3)
        );
        // Trackpads report fractional notches.
        assert_eq!(
            controller.interpret(ViewportId::Sagittal, Gesture::TwoFingerScroll { delta: -0.2 }),
            GestureAction::StepSlice(-1)
        );
    }

    #[test]
    fn primary_drag_orbits_only_the_volume_viewport() {
        let mut controller = InteractionController::new();
        let on_mpr = controller.interpret(
            ViewportId::Axial,
            Gesture::Drag {
                dx: 10.0,
                dy: 0.0,
                button: PointerButton::Primary,
            },
        );
        assert_eq!(on_mpr, GestureAction::None);

        let on_volume = controller.interpret(
            ViewportId::Volume,
            Gesture::Drag {
                dx: 10.0,
                dy: 0.0,
                button: PointerButton::Primary,
            },
        );
        assert!(matches!(on_volume, GestureAction::Orbit { yaw, .. } if yaw < 0.0));
        assert!(controller.is_interacting());
    }

    #[test]
    fn pinch_zooms_any_viewport() {
        let mut controller = InteractionController::new();
        assert_eq!(
            controller.interpret(ViewportId::Sagittal, Gesture::Pinch { scale: 1.5 }),
            GestureAction::Zoom(1.5)
        );
    }

    #[test]
    fn settle_fires_once_after_the_delay() {
        let mut controller = InteractionController::with_settle_delay(Duration::from_millis(1));
        controller.interpret(
            ViewportId::Volume,
            Gesture::Drag {
                dx: 1.0,
                dy: 1.0,
                button: PointerButton::Primary,
            },
        );
        assert!(!controller.poll_settled());

        std::thread::sleep(Duration::from_millis(5));
        assert!(!controller.is_interacting());
        assert!(controller.poll_settled());
        assert!(!controller.poll_settled());
    }

    #[test]
    fn mpr_stepping_does_not_start_interaction() {
        let mut controller = InteractionController::new();
        controller.interpret(ViewportId::Axial, Gesture::Wheel { delta: 5.0 });
        assert!(!controller.is_interacting());
    }
}
