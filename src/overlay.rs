//! Blend the predicted regions onto the photograph

use crate::segment::{ClassMap, FundusClass};
use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};

/// Mask weight used when none is configured
pub const DEFAULT_ALPHA: f64 = 0.4;

/// Alpha-blends a color mask built from a `ClassMap` over an image
#[derive(Debug, Clone, Copy)]
pub struct Overlay {
    alpha: f64,
}

impl Default for Overlay {
    fn default() -> Self {
        Overlay {
            alpha: DEFAULT_ALPHA,
        }
    }
}

impl Overlay {
    pub fn new(alpha: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&alpha) {
            return Err(anyhow!("overlay alpha must be within [0, 1], got {alpha}"));
        }
        Ok(Overlay { alpha })
    }

    /// Color mask for a class map. Unknown labels stay black.
    pub fn mask(classes: &ClassMap) -> RgbImage {
        RgbImage::from_fn(classes.width(), classes.height(), |x, y| {
            match FundusClass::from_label(classes.get(x, y)) {
                Some(class) => class.color(),
                None => FundusClass::Background.color(),
            }
        })
    }

    /// `(1 - alpha) * image + alpha * mask`, truncated to 8 bits
    pub fn composite(&self, image: &RgbImage, classes: &ClassMap) -> Result<RgbImage> {
        if image.dimensions() != classes.dimensions() {
            return Err(anyhow!(
                "class map is {:?} but the image is {:?}",
                classes.dimensions(),
                image.dimensions()
            ));
        }

        let mask = Self::mask(classes);
        let keep = 1.0 - self.alpha;
        let mut out = RgbImage::new(image.width(), image.height());
        for ((dst, src), color) in out.pixels_mut().zip(image.pixels()).zip(mask.pixels()) {
            *dst = Rgb([
                blend(src[0], color[0], keep, self.alpha),
                blend(src[1], color[1], keep, self.alpha),
                blend(src[2], color[2], keep, self.alpha),
            ]);
        }
        Ok(out)
    }
}

// float -> u8 casts saturate, so this cannot wrap
fn blend(photo: u8, mask: u8, keep: f64, alpha: f64) -> u8 {
    (photo as f64 * keep + mask as f64 * alpha) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray(width: u32, height: u32, v: u8) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([v, v, v]))
    }

    #[test]
    fn test_background_is_darkened_original() {
        let image = RgbImage::from_fn(4, 3, |x, y| Rgb([x as u8 * 50, y as u8 * 80, 201]));
        let classes = ClassMap::filled(4, 3, 0);
        let out = Overlay::default().composite(&image, &classes).unwrap();

        for (src, dst) in image.pixels().zip(out.pixels()) {
            for c in 0..3 {
                assert_eq!(dst[c], (src[c] as f64 * 0.6) as u8);
            }
        }
    }

    #[test]
    fn test_disc_and_cup_colors() {
        let image = gray(3, 1, 100);
        let classes = ClassMap::new(3, 1, vec![0, 1, 2]).unwrap();
        let out = Overlay::default().composite(&image, &classes).unwrap();

        assert_eq!(out.get_pixel(0, 0), &Rgb([60, 60, 60]));
        assert_eq!(out.get_pixel(1, 0), &Rgb([162, 162, 60]));
        assert_eq!(out.get_pixel(2, 0), &Rgb([162, 60, 60]));
    }

    #[test]
    fn test_white_stays_in_range() {
        let image = gray(2, 1, 255);
        let classes = ClassMap::new(2, 1, vec![1, 2]).unwrap();
        let out = Overlay::default().composite(&image, &classes).unwrap();

        assert_eq!(out.get_pixel(0, 0), &Rgb([255, 255, 153]));
        assert_eq!(out.get_pixel(1, 0), &Rgb([255, 153, 153]));
    }

    #[test]
    fn test_unknown_labels_are_background() {
        let image = gray(2, 2, 90);
        let unknown = ClassMap::new(2, 2, vec![3, 9, 200, 255]).unwrap();
        let background = ClassMap::filled(2, 2, 0);
        let overlay = Overlay::default();

        assert_eq!(
            overlay.composite(&image, &unknown).unwrap(),
            overlay.composite(&image, &background).unwrap()
        );
    }

    #[test]
    fn test_dimension_mismatch() {
        let image = gray(4, 4, 10);
        let classes = ClassMap::filled(4, 3, 0);
        assert!(Overlay::default().composite(&image, &classes).is_err());
    }

    #[test]
    fn test_alpha_bounds() {
        assert!(Overlay::new(-0.1).is_err());
        assert!(Overlay::new(1.1).is_err());

        // alpha 0 leaves the photo untouched
        let image = gray(2, 2, 77);
        let classes = ClassMap::new(2, 2, vec![1, 2, 1, 0]).unwrap();
        let out = Overlay::new(0.0).unwrap().composite(&image, &classes).unwrap();
        assert_eq!(out, image);
    }
}
