//! DICOM adapter for the slice-decoding interface.
//!
//! Wraps the dicom-rs ecosystem: pixel data is decoded with the first VOI
//! LUT applied, and the spatial metadata the assembly step orders by
//! (ImagePositionPatient, InstanceNumber, PixelSpacing, SliceThickness) is
//! extracted when present. Multiframe objects contribute their first frame.

use crate::decode::{SliceDecodeError, SliceDecoder, scan_directory};
use crate::slice::{PixelBuffer, SliceImage};

use dicom::object::{FileDicomObject, InMemDicomObject, open_file};
use dicom::pixeldata::{ConvertOptions, PixelDecoder, VoiLutOption};
use dicom_dictionary_std::tags;
use ndarray::s;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Default)]
pub struct DicomSliceDecoder;

impl DicomSliceDecoder {
    pub fn new() -> Self {
        Self
    }

    /// All `.dcm` files under a directory, sorted by name.
    pub fn scan(path: impl AsRef<Path>) -> io::Result<Vec<PathBuf>> {
        scan_directory(path, &["dcm"])
    }

    /// Decode an already-parsed DICOM object into a slice record.
    pub fn from_object(
        name: &str,
        object: &FileDicomObject<InMemDicomObject>,
    ) -> Result<SliceImage, SliceDecodeError> {
        let pixel_data = object
            .decode_pixel_data()
            .map_err(|err| SliceDecodeError::Dicom(err.to_string()))?;
        let options = ConvertOptions::new().with_voi_lut(VoiLutOption::First);
        let array = pixel_data
            .to_ndarray_with_options::<u16>(&options)
            .map_err(|err| SliceDecodeError::Dicom(err.to_string()))?
            .slice_move(s![0, .., .., 0]);

        let (height, width) = array.dim();
        let pixels: Vec<u16> = array.iter().copied().collect();

        // PixelSpacing is (row, column) spacing, i.e. (y, x).
        let pixel_spacing = object
            .element(tags::PIXEL_SPACING)
            .ok()
            .and_then(|e| e.to_multi_float32().ok())
            .map(|ps| {
                (
                    ps.get(1).copied().unwrap_or(1.0),
                    ps.first().copied().unwrap_or(1.0),
                )
            })
            .unwrap_or((1.0, 1.0));

        let slice_thickness = object
            .element(tags::SLICE_THICKNESS)
            .ok()
            .and_then(|e| e.to_float32().ok());

        let position = object
            .element(tags::IMAGE_POSITION_PATIENT)
            .ok()
            .and_then(|e| e.to_multi_float32().ok())
            .and_then(|pos| pos.get(2).copied());

        let instance = object
            .element(tags::INSTANCE_NUMBER)
            .ok()
            .and_then(|e| e.to_int::<i32>().ok());

        Ok(SliceImage {
            pixels: PixelBuffer::U16(pixels),
            width: width as u32,
            height: height as u32,
            pixel_spacing,
            slice_thickness,
            position,
            instance,
            source_name: name.to_string(),
        })
    }
}

impl SliceDecoder for DicomSliceDecoder {
    type Input = PathBuf;

    fn decode(&self, input: &Self::Input) -> Result<SliceImage, SliceDecodeError> {
        let object =
            open_file(input).map_err(|err| SliceDecodeError::Dicom(err.to_string()))?;
        Self::from_object(&self.describe(input), &object)
    }

    fn describe(&self, input: &Self::Input) -> String {
        input
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("<dicom>")
            .to_string()
    }
}
