//! Two-phase initialization of the rendering backend.
//!
//! GPU availability is asynchronous; [`RenderingBackend::when_ready`]
//! resolves once a device and queue exist (or GPU acceleration is
//! unavailable), and viewport construction is gated on the returned handle
//! instead of polling an ambient readiness flag.

use thiserror::Error;
use tracing::{info, warn};

pub struct WGPU {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("no compatible graphics adapter: {0}")]
    Adapter(String),

    #[error("device request failed: {0}")]
    Device(String),
}

pub struct RenderingBackend {
    gpu: Option<WGPU>,
}

impl RenderingBackend {
    /// Resolve the backend. GPU acquisition failures degrade to the CPU
    /// path; they never fail session construction.
    pub async fn when_ready() -> Self {
        match Self::request_gpu().await {
            Ok(gpu) => {
                info!("rendering backend ready with GPU acceleration");
                Self { gpu: Some(gpu) }
            }
            Err(err) => {
                warn!(%err, "GPU unavailable, rendering on CPU");
                Self { gpu: None }
            }
        }
    }

    async fn request_gpu() -> Result<WGPU, BackendError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions::default())
            .await
            .map_err(|err| BackendError::Adapter(err.to_string()))?;
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor::default())
            .await
            .map_err(|err| BackendError::Device(err.to_string()))?;
        Ok(WGPU { device, queue })
    }

    /// CPU-only backend; the full pipeline works without a GPU.
    pub fn headless() -> Self {
        Self { gpu: None }
    }

    /// Wrap an externally created device and queue.
    pub fn from_parts(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            gpu: Some(WGPU { device, queue }),
        }
    }

    pub fn gpu(&self) -> Option<&WGPU> {
        self.gpu.as_ref()
    }

    pub fn has_gpu(&self) -> bool {
        self.gpu.is_some()
    }
}
