//! Upload bytes in, annotated base 64 JPEG out

use crate::imaging::{self, B64Image};
use crate::overlay::Overlay;
use crate::segment::{FundusClass, Segmenter};
use anyhow::Result;
use thiserror::Error;
use tracing::*;

/// Why a fundus image could not be annotated
#[derive(Debug, Error)]
pub enum AnnotateError {
    /// The upload could not be decoded as an image
    #[error("{0:#}")]
    InvalidImage(anyhow::Error),

    /// Inference, compositing or encoding failed
    #[error("{0:#}")]
    Inference(#[from] anyhow::Error),
}

/// Decode, segment, composite and re-encode one photograph
#[tracing::instrument(skip_all, fields(bytes = upload.len()))]
pub fn annotate(
    segmenter: &dyn Segmenter,
    overlay: &Overlay,
    upload: &[u8],
    jpeg_quality: u8,
) -> std::result::Result<B64Image, AnnotateError> {
    let output = annotate_image(segmenter, overlay, upload)?;
    Ok(B64Image::from_rgb(&output, jpeg_quality)?)
}

/// Same as `annotate`, but hands back the composited image unencoded
pub fn annotate_image(
    segmenter: &dyn Segmenter,
    overlay: &Overlay,
    upload: &[u8],
) -> std::result::Result<image::RgbImage, AnnotateError> {
    let image = imaging::decode_rgb(upload).map_err(AnnotateError::InvalidImage)?;
    debug!("decoded {}x{} image", image.width(), image.height());

    Ok(highlight(segmenter, overlay, &image)?)
}

fn highlight(
    segmenter: &dyn Segmenter,
    overlay: &Overlay,
    image: &image::RgbImage,
) -> Result<image::RgbImage> {
    let classes = segmenter.segment(image)?;
    info!(
        disc = classes.count(FundusClass::OpticDisc),
        cup = classes.count(FundusClass::OpticCup),
        "segmented fundus image"
    );
    overlay.composite(image, &classes)
}


#[cfg(test)]
mod tests {
    use super::test::*;
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_annotate_keeps_dimensions() {
        let src = RgbImage::from_pixel(48, 32, Rgb([120, 80, 40]));
        let out = annotate(&StripeSegmenter, &Overlay::default(), &png_bytes(&src), 90).unwrap();
        assert_eq!((out.width, out.height), (48, 32));

        let jpeg = image::load_from_memory(&out.decode().unwrap())
            .unwrap()
            .to_rgb8();
        assert_eq!(jpeg.dimensions(), (48, 32));

        // background stripe is 60% of the original, give or take JPEG noise
        let px = jpeg.get_pixel(44, 20);
        for (got, want) in px.0.iter().zip([72u8, 48, 24]) {
            assert!((*got as i16 - want as i16).abs() <= 6, "{px:?}");
        }
    }

    #[test]
    fn test_annotate_image_is_exact() {
        let src = RgbImage::from_pixel(6, 2, Rgb([100, 100, 100]));
        let out = annotate_image(&StripeSegmenter, &Overlay::default(), &png_bytes(&src)).unwrap();

        assert_eq!(out.get_pixel(0, 1), &Rgb([162, 162, 60]));
        assert_eq!(out.get_pixel(2, 0), &Rgb([162, 60, 60]));
        assert_eq!(out.get_pixel(5, 1), &Rgb([60, 60, 60]));
    }

    #[test]
    fn test_annotate_rejects_garbage() {
        let err = annotate(&StripeSegmenter, &Overlay::default(), b"nope", 75).unwrap_err();
        assert!(matches!(err, AnnotateError::InvalidImage(_)));
    }

    #[test]
    fn test_annotate_surfaces_model_failure() {
        let src = RgbImage::from_pixel(4, 4, Rgb([1, 2, 3]));
        let err = annotate(&FailingSegmenter, &Overlay::default(), &png_bytes(&src), 75).unwrap_err();
        assert!(matches!(err, AnnotateError::Inference(_)));
        assert!(err.to_string().contains("model exploded"));
    }
}
