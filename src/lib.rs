//! # tomo-volume
//!
//! This crate is the reconstruction and rendering core of a tomographic
//! image viewer: it assembles an unordered stack of decoded 2-D
//! cross-sections into a single 3-D scalar volume, re-slices that volume
//! into three synchronized orthogonal views, and ray-casts it into a
//! volumetric image under named tissue-classification presets.
//!
//! Slices reach the core already decoded; any producer of [`SliceImage`]
//! records works. Two decoder adapters ship with the crate:
//!  - DICOM files via the dicom-rs ecosystem
//!  - plain raster images (PNG, JPEG, ...) reduced to luminance
//!
//! Slices are ordered by spatial position, instance number, and source name,
//! so the reconstruction is reproducible for any arrival order. Slices are
//! assumed to share dimensions and in-plane spacing with the first ordered
//! slice; mismatches are skipped with a warning. Multiframe sources
//! contribute their first frame.
//!
//! # Examples
//!
//! Reconstruct a series from a directory of DICOM files and render the
//! center slice of every axis plus one volumetric frame:
//!
//! ```no_run
//! # use tomo_volume::dicom_decoder::DicomSliceDecoder;
//! # use tomo_volume::enums::ViewportId;
//! # use tomo_volume::viewer::ViewerSession;
//! # async fn run() {
//! let paths = DicomSliceDecoder::scan("dicom").expect("should list series files");
//! let mut session = ViewerSession::headless();
//! session
//!     .load_series(&DicomSliceDecoder::new(), &paths)
//!     .await
//!     .expect("should have reconstructed a volume");
//!
//! session.resize_surface(1024, 1024);
//! for id in ViewportId::mpr() {
//!     let image = session.render_reslice(id).expect("viewport is attached");
//!     image.save(format!("{id:?}.png")).unwrap();
//! }
//! session.render_volume().expect("viewport is attached").save("volume.png").unwrap();
//! # }
//! ```
//!
//! [`SliceImage`]: crate::slice::SliceImage

pub mod backend;
pub mod camera;
pub mod decode;
pub mod dicom_decoder;
pub mod enums;
pub mod gpu_slicer;
pub mod interaction;
mod interpolator;
pub mod mpr;
pub mod preset;
pub mod raycast;
pub mod slice;
pub mod transfer;
pub mod viewer;
pub mod volume;
pub mod volume_builder;
