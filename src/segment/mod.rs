//! Per-pixel class predictions and the models that produce them

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};

mod torch;

pub use self::torch::TorchSegmenter;

/// The regions the fundus model distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FundusClass {
    Background = 0,
    OpticDisc = 1,
    OpticCup = 2,
}

impl FundusClass {
    /// Map a raw label to a class. Labels the model was not trained on
    /// have no class.
    pub fn from_label(label: u8) -> Option<Self> {
        match label {
            0 => Some(FundusClass::Background),
            1 => Some(FundusClass::OpticDisc),
            2 => Some(FundusClass::OpticCup),
            _ => None,
        }
    }

    /// Highlight color of the class in the overlay mask
    pub fn color(self) -> Rgb<u8> {
        match self {
            FundusClass::Background => Rgb([0, 0, 0]),
            FundusClass::OpticDisc => Rgb([255, 255, 0]),
            FundusClass::OpticCup => Rgb([255, 0, 0]),
        }
    }
}

/// Row-major grid of predicted labels, one per pixel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassMap {
    width: u32,
    height: u32,
    labels: Vec<u8>,
}

impl ClassMap {
    pub fn new(width: u32, height: u32, labels: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize;
        if labels.len() != expected {
            return Err(anyhow!(
                "class map of {width}x{height} needs {expected} labels, got {}",
                labels.len()
            ));
        }
        Ok(ClassMap {
            width,
            height,
            labels,
        })
    }

    /// A map where every pixel carries the same label
    pub fn filled(width: u32, height: u32, label: u8) -> Self {
        ClassMap {
            width,
            height,
            labels: vec![label; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Raw label at `(x, y)`. Panics when out of bounds, like `ImageBuffer`
    pub fn get(&self, x: u32, y: u32) -> u8 {
        assert!(x < self.width && y < self.height, "({x}, {y}) out of bounds");
        self.labels[y as usize * self.width as usize + x as usize]
    }

    pub fn labels(&self) -> &[u8] {
        &self.labels
    }

    /// Number of pixels predicted as `class`
    pub fn count(&self, class: FundusClass) -> usize {
        self.labels
            .iter()
            .filter(|&&l| FundusClass::from_label(l) == Some(class))
            .count()
    }
}

/// Anything that can label every pixel of a fundus photograph. The model is
/// loaded once and shared by all request handlers, hence `Send + Sync`.
pub trait Segmenter: Send + Sync {
    /// Predict a class map with the same dimensions as `image`
    fn segment(&self, image: &RgbImage) -> Result<ClassMap>;

    /// Human readable description of where inference runs
    fn device(&self) -> String;
}
