use std::path::PathBuf;

use tomo_volume::{
    decode::{RasterSliceDecoder, scan_directory},
    dicom_decoder::DicomSliceDecoder,
    enums::ViewportId,
    viewer::ViewerSession,
};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let directory = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("series"));

    let mut session = ViewerSession::headless();
    session.set_on_decode_progress(Box::new(|done, total| {
        eprintln!("decoded {done}/{total}");
    }));
    session.set_on_error(Box::new(|message| {
        eprintln!("warning: {message}");
    }));

    let dicom_paths = DicomSliceDecoder::scan(&directory).expect("should list directory");
    if dicom_paths.is_empty() {
        let raster_paths = scan_directory(&directory, &["png", "jpg", "jpeg"])
            .expect("should list directory");
        session
            .load_series(&RasterSliceDecoder::new(), &raster_paths)
            .await
            .expect("should have reconstructed a volume");
    } else {
        session
            .load_series(&DicomSliceDecoder::new(), &dicom_paths)
            .await
            .expect("should have reconstructed a volume");
    }

    session.resize_surface(1024, 1024);
    for id in ViewportId::mpr() {
        let image = session
            .render_reslice_accelerated(id)
            .await
            .expect("viewport should be attached");
        let name = format!("{id:?}.png").to_lowercase();
        image.save(&name).expect("should save slice image");
        eprintln!("wrote {name}");
    }

    let frame = session
        .render_volume()
        .expect("viewport should be attached");
    frame.save("volume.png").expect("should save volume image");
    eprintln!("wrote volume.png");
}
