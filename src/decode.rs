//! Slice-decoding collaborator interface and the sequential decode driver.
//!
//! The core performs no file-format parsing itself; decoders implement
//! [`SliceDecoder`] and hand back [`SliceImage`] records. Decoding is
//! strictly sequential so progress reports stay monotonic and peak memory is
//! bounded by a single full-resolution slice.

use crate::slice::{PixelBuffer, SliceImage};

use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::{fs, io};
use thiserror::Error;
use tracing::{debug, warn};
use web_time::Instant;

#[derive(Debug, Error)]
pub enum SliceDecodeError {
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("DICOM error: {0}")]
    Dicom(String),

    #[error("malformed slice: {0}")]
    Malformed(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// External collaborator turning one raw input into a decoded slice record.
pub trait SliceDecoder {
    type Input;

    fn decode(&self, input: &Self::Input) -> Result<SliceImage, SliceDecodeError>;

    /// Human-readable name of an input, used in skip reports.
    fn describe(&self, _input: &Self::Input) -> String {
        "<input>".to_string()
    }
}

/// Cooperative cancellation handle shared with an in-flight decode.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

pub struct DecodeReport {
    pub slices: Vec<SliceImage>,
    /// (input name, failure) pairs for slices that were dropped.
    pub skipped: Vec<(String, SliceDecodeError)>,
}

pub enum DecodeOutcome {
    Completed(DecodeReport),
    /// The host view was torn down mid-decode; no further progress callbacks
    /// were issued after the flag was observed.
    Cancelled,
}

/// Decode a series one slice at a time.
///
/// The progress callback receives `(processed, total)` after every input and
/// is monotonic. Individual decode failures are logged and skipped; the
/// caller decides whether the remainder is sufficient.
pub async fn decode_series<D: SliceDecoder>(
    decoder: &D,
    inputs: &[D::Input],
    mut progress: Option<&mut dyn FnMut(usize, usize)>,
    cancel: &CancelFlag,
) -> DecodeOutcome {
    let total = inputs.len();
    let started = Instant::now();
    let mut slices = Vec::with_capacity(total);
    let mut skipped = Vec::new();

    for (processed, input) in inputs.iter().enumerate() {
        if cancel.is_cancelled() {
            debug!(processed, total, "decode cancelled");
            return DecodeOutcome::Cancelled;
        }

        match decoder.decode(input) {
            Ok(slice) => slices.push(slice),
            Err(err) => {
                let name = decoder.describe(input);
                warn!(source = %name, error = %err, "slice failed to decode, skipping");
                skipped.push((name, err));
            }
        }

        if let Some(report) = progress.as_mut() {
            report(processed + 1, total);
        }

        // Keep the host loop responsive between slices.
        tokio::task::yield_now().await;
    }

    debug!(
        decoded = slices.len(),
        skipped = skipped.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "series decoded"
    );
    DecodeOutcome::Completed(DecodeReport { slices, skipped })
}

/// List files in a directory with one of the given extensions, sorted by
/// name for deterministic decode order.
pub fn scan_directory(path: impl AsRef<Path>, extensions: &[&str]) -> io::Result<Vec<PathBuf>> {
    let mut paths: Vec<_> = fs::read_dir(path.as_ref())?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(|s| s.to_str())
                .is_some_and(|ext| extensions.iter().any(|e| ext.eq_ignore_ascii_case(e)))
        })
        .collect();
    paths.sort();
    Ok(paths)
}

/// Adapter for plain raster images (PNG, JPEG, ...) without spatial
/// metadata. Pixels are reduced to single-channel luminance; position and
/// instance default to zero at ordering time.
#[derive(Debug, Default)]
pub struct RasterSliceDecoder;

impl RasterSliceDecoder {
    pub fn new() -> Self {
        Self
    }

    pub fn from_dynamic(name: &str, image: &DynamicImage) -> SliceImage {
        let luma = image.to_luma8();
        let (width, height) = luma.dimensions();
        SliceImage {
            pixels: PixelBuffer::U8(luma.into_raw()),
            width,
            height,
            pixel_spacing: (1.0, 1.0),
            slice_thickness: None,
            position: None,
            instance: None,
            source_name: name.to_string(),
        }
    }
}

impl SliceDecoder for RasterSliceDecoder {
    type Input = PathBuf;

    fn decode(&self, input: &Self::Input) -> Result<SliceImage, SliceDecodeError> {
        let image = image::open(input)?;
        Ok(Self::from_dynamic(&self.describe(input), &image))
    }

    fn describe(&self, input: &Self::Input) -> String {
        input
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("<raster>")
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    struct StubDecoder;

    impl SliceDecoder for StubDecoder {
        type Input = u16;

        fn decode(&self, input: &u16) -> Result<SliceImage, SliceDecodeError> {
            if *input == 13 {
                return Err(SliceDecodeError::Malformed("unlucky".to_string()));
            }
            Ok(SliceImage {
                pixels: PixelBuffer::U16(vec![*input; 4]),
                width: 2,
                height: 2,
                pixel_spacing: (1.0, 1.0),
                slice_thickness: None,
                position: Some(*input as f32),
                instance: None,
                source_name: format!("stub-{input}"),
            })
        }

        fn describe(&self, input: &u16) -> String {
            format!("stub-{input}")
        }
    }

    #[tokio::test]
    async fn progress_is_monotonic_and_complete() {
        let inputs: Vec<u16> = (0..5).collect();
        let mut seen = Vec::new();
        let mut progress = |done: usize, total: usize| seen.push((done, total));

        let outcome = decode_series(
            &StubDecoder,
            &inputs,
            Some(&mut progress),
            &CancelFlag::new(),
        )
        .await;

        assert!(matches!(outcome, DecodeOutcome::Completed(_)));
        assert_eq!(seen, vec![(1, 5), (2, 5), (3, 5), (4, 5), (5, 5)]);
    }

    #[tokio::test]
    async fn failed_slices_are_skipped_not_fatal() {
        let inputs: Vec<u16> = vec![1, 13, 2];
        let outcome = decode_series(&StubDecoder, &inputs, None, &CancelFlag::new()).await;

        let DecodeOutcome::Completed(report) = outcome else {
            panic!("decode should complete");
        };
        assert_eq!(report.slices.len(), 2);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].0, "stub-13");
    }

    #[tokio::test]
    async fn cancellation_stops_progress_callbacks() {
        let inputs: Vec<u16> = (0..10).collect();
        let cancel = CancelFlag::new();
        cancel.cancel();

        let mut calls = 0usize;
        let mut progress = |_: usize, _: usize| calls += 1;
        let outcome = decode_series(&StubDecoder, &inputs, Some(&mut progress), &cancel).await;

        assert!(matches!(outcome, DecodeOutcome::Cancelled));
        assert_eq!(calls, 0);
    }

    #[test]
    fn raster_images_reduce_to_luminance() {
        let mut rgb = RgbImage::new(2, 1);
        rgb.put_pixel(0, 0, Rgb([255, 0, 0]));
        rgb.put_pixel(1, 0, Rgb([255, 255, 255]));

        let slice =
            RasterSliceDecoder::from_dynamic("frame.png", &DynamicImage::ImageRgb8(rgb));
        assert_eq!(slice.width, 2);
        let PixelBuffer::U8(pixels) = &slice.pixels else {
            panic!("raster slices decode to u8 luminance");
        };
        assert_eq!(pixels.len(), 2);
        assert!(pixels[0] < pixels[1], "red is darker than white in luma");
        assert_eq!(slice.position, None);
    }
}
