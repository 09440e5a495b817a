//! Viewer session: the command surface consumed by the surrounding UI.
//!
//! Owns the volume, the three re-slice viewports, the volumetric viewport,
//! the preset library, and the interaction controller. Viewports are
//! addressed by explicit [`ViewportId`] handles passed by reference from the
//! host; there is no ambient command table.

use crate::backend::RenderingBackend;
use crate::decode::{CancelFlag, DecodeOutcome, SliceDecoder, decode_series};
use crate::enums::{Layout, Orientation, RenderMode, ViewportId};
use crate::gpu_slicer::GpuSlicer;
use crate::interaction::{Gesture, GestureAction, InteractionController};
use crate::mpr::MprViewport;
use crate::preset::PresetLibrary;
use crate::raycast::VolumeViewport;
use crate::slice::SliceImage;
use crate::volume::Volume;
use crate::volume_builder::{BuildWarning, VolumeBuilder, VolumeBuilderError};

use image::{GrayImage, RgbaImage};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

pub type ProgressCallback = Box<dyn Fn(usize, usize) + Send + Sync>;
pub type ErrorCallback = Box<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Error)]
pub enum ViewerError {
    #[error("no volume loaded")]
    VolumeNotLoaded,

    #[error("unknown preset: {0}")]
    UnknownPreset(String),

    #[error("viewport {0:?} is not a reformatting viewport")]
    NotReslice(ViewportId),

    #[error("viewport {0:?} is not the volumetric viewport")]
    NotVolumetric(ViewportId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    /// The session was torn down or cancelled mid-decode.
    Cancelled,
}

struct Viewports {
    axial: MprViewport,
    coronal: MprViewport,
    sagittal: MprViewport,
    volumetric: VolumeViewport,
}

impl Viewports {
    fn reslice_mut(&mut self, id: ViewportId) -> Option<&mut MprViewport> {
        match id {
            ViewportId::Axial => Some(&mut self.axial),
            ViewportId::Coronal => Some(&mut self.coronal),
            ViewportId::Sagittal => Some(&mut self.sagittal),
            ViewportId::Volume => None,
        }
    }

    fn reslice(&self, id: ViewportId) -> Option<&MprViewport> {
        match id {
            ViewportId::Axial => Some(&self.axial),
            ViewportId::Coronal => Some(&self.coronal),
            ViewportId::Sagittal => Some(&self.sagittal),
            ViewportId::Volume => None,
        }
    }
}

pub struct ViewerSession {
    backend: RenderingBackend,
    builder: VolumeBuilder,
    presets: PresetLibrary,
    controller: InteractionController,
    volume: Option<Arc<Volume>>,
    viewports: Option<Viewports>,
    gpu_slicer: Option<GpuSlicer>,
    layout: Layout,
    fullscreen: bool,
    cancel: CancelFlag,
    torn_down: bool,
    on_progress: Option<ProgressCallback>,
    on_error: Option<ErrorCallback>,
}

impl ViewerSession {
    pub fn new(backend: RenderingBackend) -> Self {
        Self {
            backend,
            builder: VolumeBuilder::new(),
            presets: PresetLibrary::builtin(),
            controller: InteractionController::new(),
            volume: None,
            viewports: None,
            gpu_slicer: None,
            layout: Layout::default(),
            fullscreen: false,
            cancel: CancelFlag::new(),
            torn_down: false,
            on_progress: None,
            on_error: None,
        }
    }

    /// Session without GPU acceleration; every path renders on the CPU.
    pub fn headless() -> Self {
        Self::new(RenderingBackend::headless())
    }

    pub fn with_builder(mut self, builder: VolumeBuilder) -> Self {
        self.builder = builder;
        self
    }

    pub fn set_on_decode_progress(&mut self, callback: ProgressCallback) {
        self.on_progress = Some(callback);
    }

    pub fn set_on_error(&mut self, callback: ErrorCallback) {
        self.on_error = Some(callback);
    }

    /// Handle the host can use to cancel an in-flight decode from elsewhere.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn presets(&self) -> &PresetLibrary {
        &self.presets
    }

    pub fn volume(&self) -> Option<&Arc<Volume>> {
        self.volume.as_ref()
    }

    pub fn active_preset(&self) -> Option<&str> {
        self.viewports.as_ref().map(|v| v.volumetric.preset_name())
    }

    /// Decode a series sequentially, then assemble and wire the viewports.
    pub async fn load_series<D: SliceDecoder>(
        &mut self,
        decoder: &D,
        inputs: &[D::Input],
    ) -> Result<LoadOutcome, VolumeBuilderError> {
        if self.torn_down {
            return Ok(LoadOutcome::Cancelled);
        }

        let outcome = {
            let callback = self.on_progress.as_ref();
            let mut forward = |done: usize, total: usize| {
                if let Some(callback) = callback {
                    callback(done, total);
                }
            };
            decode_series(decoder, inputs, Some(&mut forward), &self.cancel).await
        };

        let report = match outcome {
            DecodeOutcome::Cancelled => return Ok(LoadOutcome::Cancelled),
            DecodeOutcome::Completed(report) => report,
        };
        for (name, err) in &report.skipped {
            self.report_error(&format!("slice {name} could not be decoded: {err}"));
        }

        match self.build_volume(report.slices) {
            Ok(_) => Ok(LoadOutcome::Loaded),
            Err(err) => {
                self.report_error(&err.to_string());
                Err(err)
            }
        }
    }

    /// Assemble a volume from already-decoded slices and (re)create the four
    /// viewports against it.
    ///
    /// Any previous volume and its GPU-resident copies are released first so
    /// a series reload never leaks native resources.
    pub fn build_volume(
        &mut self,
        slices: Vec<SliceImage>,
    ) -> Result<&Volume, VolumeBuilderError> {
        // Drop GPU texture and viewport references before the rebuild.
        self.gpu_slicer = None;
        self.viewports = None;
        self.volume = None;

        let report = self.builder.build(slices)?;
        for warning in &report.warnings {
            match warning {
                BuildWarning::CapacityExceeded { used, supplied } => {
                    self.report_error(&format!(
                        "series has {supplied} slices, only the first {used} were reconstructed"
                    ));
                }
                BuildWarning::SliceSkipped { source_name, reason } => {
                    self.report_error(&format!("slice {source_name} skipped: {reason}"));
                }
            }
        }

        let volume = Arc::new(report.volume);
        self.viewports = Some(Viewports {
            axial: MprViewport::new(volume.clone(), Orientation::Axial),
            coronal: MprViewport::new(volume.clone(), Orientation::Coronal),
            sagittal: MprViewport::new(volume.clone(), Orientation::Sagittal),
            volumetric: VolumeViewport::new(volume.clone(), &self.presets),
        });
        if let Some(gpu) = self.backend.gpu() {
            self.gpu_slicer = Some(GpuSlicer::new(&volume, gpu));
        }
        self.volume = Some(volume);

        info!(
            dim = ?self.volume.as_ref().map(|v| v.dim()),
            gpu = self.backend.has_gpu(),
            "viewer session ready"
        );
        Ok(self.volume.as_deref().expect("volume was just stored"))
    }

    /// Replace the volumetric viewport's transfer function by preset name.
    pub fn apply_preset(&mut self, viewport: ViewportId, name: &str) -> Result<(), ViewerError> {
        if viewport != ViewportId::Volume {
            return Err(ViewerError::NotVolumetric(viewport));
        }
        let Some(definition) = self.presets.get(name) else {
            self.report_error(&format!("unknown preset: {name}"));
            return Err(ViewerError::UnknownPreset(name.to_string()));
        };
        let Some(viewports) = self.viewports.as_mut() else {
            return Err(ViewerError::VolumeNotLoaded);
        };
        viewports.volumetric.apply_preset(definition);
        Ok(())
    }

    pub fn zoom(&mut self, viewport: ViewportId, factor: f32) -> Result<(), ViewerError> {
        let viewports = self.viewports.as_mut().ok_or(ViewerError::VolumeNotLoaded)?;
        match viewport {
            ViewportId::Volume => viewports.volumetric.zoom(factor),
            id => {
                if let Some(reslice) = viewports.reslice_mut(id) {
                    reslice.zoom(factor);
                }
            }
        }
        Ok(())
    }

    pub fn reset_camera(&mut self, viewport: ViewportId) -> Result<(), ViewerError> {
        let viewports = self.viewports.as_mut().ok_or(ViewerError::VolumeNotLoaded)?;
        match viewport {
            ViewportId::Volume => viewports.volumetric.reset_camera(),
            id => {
                if let Some(reslice) = viewports.reslice_mut(id) {
                    reslice.reset_camera();
                }
            }
        }
        Ok(())
    }

    /// Step a re-slice plane by whole notches. Returns whether the step was
    /// accepted (a step overshooting the volume bounds is rejected).
    pub fn step_slice(
        &mut self,
        viewport: ViewportId,
        delta_notches: i32,
    ) -> Result<bool, ViewerError> {
        let viewports = self.viewports.as_mut().ok_or(ViewerError::VolumeNotLoaded)?;
        let reslice = viewports
            .reslice_mut(viewport)
            .ok_or(ViewerError::NotReslice(viewport))?;
        Ok(reslice.step(delta_notches))
    }

    pub fn set_render_mode(
        &mut self,
        viewport: ViewportId,
        mode: RenderMode,
    ) -> Result<(), ViewerError> {
        if viewport != ViewportId::Volume {
            return Err(ViewerError::NotVolumetric(viewport));
        }
        let viewports = self.viewports.as_mut().ok_or(ViewerError::VolumeNotLoaded)?;
        viewports.volumetric.set_render_mode(mode);
        Ok(())
    }

    /// Route a raw gesture to the viewport it landed on.
    pub fn handle_gesture(&mut self, viewport: ViewportId, gesture: Gesture) {
        let action = self.controller.interpret(viewport, gesture);
        let Some(viewports) = self.viewports.as_mut() else {
            return;
        };

        match action {
            GestureAction::StepSlice(delta) => {
                if let Some(reslice) = viewports.reslice_mut(viewport) {
                    reslice.step(delta);
                }
            }
            GestureAction::Orbit { yaw, pitch } => {
                viewports.volumetric.orbit(yaw, pitch);
            }
            GestureAction::Zoom(factor) => match viewport {
                ViewportId::Volume => viewports.volumetric.zoom(factor),
                id => {
                    if let Some(reslice) = viewports.reslice_mut(id) {
                        reslice.zoom(factor);
                    }
                }
            },
            GestureAction::None => {}
        }

        // Continuous camera motion coarsens sampling until the settle timer
        // in `update` fires.
        if self.controller.is_interacting() {
            viewports.volumetric.begin_interaction();
        }
    }

    /// Periodic tick from the host render loop: swaps the volumetric
    /// renderer back to fine sampling once gestures settle.
    pub fn update(&mut self) {
        if self.controller.poll_settled() {
            if let Some(viewports) = self.viewports.as_mut() {
                viewports.volumetric.end_interaction();
                debug!("interaction settled, fine sampling restored");
            }
        }
    }

    /// Re-measure one viewport's render target. Zero sizes park the
    /// viewport; rendering becomes a no-op rather than an error.
    pub fn resize(&mut self, viewport: ViewportId, width: u32, height: u32) {
        let Some(viewports) = self.viewports.as_mut() else {
            return;
        };
        match viewport {
            ViewportId::Volume => viewports.volumetric.resize(width, height),
            id => {
                if let Some(reslice) = viewports.reslice_mut(id) {
                    reslice.resize(width, height);
                }
            }
        }
    }

    /// Partition the window surface across viewports per the active layout
    /// and re-measure all render targets. Idempotent against zero sizes.
    pub fn resize_surface(&mut self, width: u32, height: u32) {
        let sizes: [(ViewportId, u32, u32); 4] = match self.layout {
            Layout::Grid => {
                let (half_w, half_h) = (width / 2, height / 2);
                [
                    (ViewportId::Axial, half_w, half_h),
                    (ViewportId::Coronal, half_w, half_h),
                    (ViewportId::Sagittal, half_w, half_h),
                    (ViewportId::Volume, half_w, half_h),
                ]
            }
            Layout::Single(focused) => [
                ViewportId::Axial,
                ViewportId::Coronal,
                ViewportId::Sagittal,
                ViewportId::Volume,
            ]
            .map(|id| {
                if id == focused {
                    (id, width, height)
                } else {
                    (id, 0, 0)
                }
            }),
        };
        for (id, w, h) in sizes {
            self.resize(id, w, h);
        }
    }

    pub fn set_layout(&mut self, layout: Layout) {
        self.layout = layout;
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Presentation-only flag; toggling it never touches volume or preset
    /// state. Hosts without a fullscreen API simply leave it unset.
    pub fn set_fullscreen(&mut self, fullscreen: bool) {
        self.fullscreen = fullscreen;
    }

    pub fn is_fullscreen(&self) -> bool {
        self.fullscreen
    }

    /// Render one re-slice viewport on the CPU.
    pub fn render_reslice(&self, viewport: ViewportId) -> Option<GrayImage> {
        let viewports = self.viewports.as_ref()?;
        viewports.reslice(viewport)?.render()
    }

    /// Render one re-slice viewport, extracting on the GPU when available.
    pub async fn render_reslice_accelerated(&self, viewport: ViewportId) -> Option<GrayImage> {
        let viewports = self.viewports.as_ref()?;
        let reslice = viewports.reslice(viewport)?;
        if !reslice.is_attached() {
            return None;
        }
        let Some(slicer) = self.gpu_slicer.as_ref() else {
            return reslice.render();
        };

        let (width, height) = reslice.output_dimensions();
        let pixels = slicer
            .extract_slice(
                reslice.orientation(),
                reslice.slice_index(),
                width,
                height,
                reslice.window(),
            )
            .await;
        GrayImage::from_raw(width, height, pixels)
    }

    /// Ray-cast the volumetric viewport.
    pub fn render_volume(&self) -> Option<RgbaImage> {
        self.viewports.as_ref()?.volumetric.render()
    }

    /// Tear the session down: cancel any in-flight decode, unhook gesture
    /// state, and release the volume along with its GPU-resident copies.
    /// Safe to call more than once; all later render calls are no-ops.
    pub fn teardown(&mut self) {
        self.cancel.cancel();
        self.controller.reset();
        self.gpu_slicer = None;
        self.viewports = None;
        self.volume = None;
        self.torn_down = true;
        info!("viewer session torn down");
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    fn report_error(&self, message: &str) {
        if let Some(callback) = self.on_error.as_ref() {
            callback(message);
        }
    }
}
