//! Code for loading and running the TorchScript export of the segmentation
//! model

use super::{ClassMap, Segmenter};
use crate::config::{DeviceChoice, ModelSettings};
use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use tch::{no_grad, Device, IValue, Kind, Tensor};
use tracing::*;

/// ImageNet statistics the SegFormer processor normalizes with
const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Load and run a TorchScript segmentation model
#[derive(Debug)]
pub struct TorchSegmenter {
    /// The loaded torch model
    model: tch::CModule,
    device: Device,

    /// Side of the square input the model was trained on
    input_size: u32,
}

impl TorchSegmenter {
    pub fn new(settings: &ModelSettings) -> Result<Self> {
        let device = match settings.device {
            DeviceChoice::Auto => Device::cuda_if_available(),
            DeviceChoice::Cpu => Device::Cpu,
            DeviceChoice::Cuda if tch::Cuda::is_available() => Device::Cuda(0),
            DeviceChoice::Cuda => return Err(anyhow!("model.device is cuda but CUDA is unavailable")),
        };

        let mut model = tch::CModule::load_on_device(&settings.path, device)
            .map_err(|e| anyhow!("failed to load model {}: {e}", settings.path))?;
        model.set_eval();

        info!("loaded model {} on {device:?}", settings.path);
        Ok(TorchSegmenter {
            model,
            device,
            input_size: settings.input_size,
        })
    }

    /// Resize, rescale and normalize into a `[1, 3, size, size]` float tensor
    fn preprocess(&self, image: &RgbImage) -> Tensor {
        let size = self.input_size;
        let resized = imageops::resize(image, size, size, FilterType::Triangle);

        let img = Tensor::from_slice(resized.as_raw().as_slice())
            .view([size as i64, size as i64, 3])
            .permute([2, 0, 1])
            .to_kind(Kind::Float)
            / 255.;
        let mean = Tensor::from_slice(&MEAN).view([3, 1, 1]);
        let std = Tensor::from_slice(&STD).view([3, 1, 1]);

        ((img - mean) / std).unsqueeze(0).to_device(self.device)
    }
}

impl Segmenter for TorchSegmenter {
    #[tracing::instrument(skip_all, fields(width = image.width(), height = image.height()))]
    fn segment(&self, image: &RgbImage) -> Result<ClassMap> {
        let input = IValue::Tensor(self.preprocess(image));

        // Run the model on the image
        let output = no_grad(|| self.model.forward_is(&[input]))?;
        let logits = extract_logits(output)?;
        debug!("model returned logits of shape {:?}", logits.size());

        logits_to_class_map(&logits, image.width(), image.height())
    }

    fn device(&self) -> String {
        format!("{:?}", self.device)
    }
}

/// Pull the logits out of whatever the traced module returns: the tensor
/// itself, a tuple led by it, or a dict keyed `"logits"`
fn extract_logits(output: IValue) -> Result<Tensor> {
    match output {
        IValue::Tensor(t) => Ok(t),
        IValue::Tuple(values) => match values.into_iter().next() {
            Some(IValue::Tensor(t)) => Ok(t),
            _ => Err(anyhow!("model output tuple does not start with a tensor")),
        },
        IValue::GenericDict(entries) => entries
            .into_iter()
            .find_map(|(key, value)| match (key, value) {
                (IValue::String(k), IValue::Tensor(t)) if k == "logits" => Some(t),
                _ => None,
            })
            .ok_or_else(|| anyhow!("model output dict has no \"logits\" tensor")),
        _ => Err(anyhow!("unsupported model output {output:?}")),
    }
}

/// Upsample `[1, C, h, w]` logits to `width x height` and take the argmax
/// over the classes
fn logits_to_class_map(logits: &Tensor, width: u32, height: u32) -> Result<ClassMap> {
    let size = logits.size();
    if size.len() != 4 || size[0] != 1 {
        return Err(anyhow!("expected logits of shape [1, C, h, w], got {size:?}"));
    }

    // Full resolution work stays on the model's device; only labels move
    let predictions = logits
        .to_kind(Kind::Float)
        .upsample_bilinear2d([height as i64, width as i64], false, None::<f64>, None::<f64>)
        .argmax(1, false)
        .clamp(0, u8::MAX as i64)
        .to_kind(Kind::Uint8)
        .to_device(Device::Cpu)
        .view([-1]);

    let labels = Vec::<u8>::try_from(&predictions)?;
    ClassMap::new(width, height, labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::FundusClass;

    #[test]
    fn test_argmax_at_model_resolution() {
        // classes per pixel: [[0, 1], [2, 1]]
        let logits = Tensor::from_slice(&[
            5.0f32, 0.0, 0.0, 0.0, // background
            0.0, 5.0, 0.0, 5.0, // disc
            0.0, 0.0, 5.0, 0.0, // cup
        ])
        .view([1, 3, 2, 2]);

        let map = logits_to_class_map(&logits, 2, 2).unwrap();
        assert_eq!(map.labels(), &[0, 1, 2, 1]);
    }

    #[test]
    fn test_upsample_to_image_size() {
        let mut values = vec![0.0f32; 3 * 4 * 4];
        // cup wins everywhere
        values[2 * 16..].iter_mut().for_each(|v| *v = 3.0);
        let logits = Tensor::from_slice(&values).view([1, 3, 4, 4]);

        let map = logits_to_class_map(&logits, 7, 5).unwrap();
        assert_eq!(map.dimensions(), (7, 5));
        assert_eq!(map.count(FundusClass::OpticCup), 35);
    }

    #[test]
    fn test_class_map_on_accelerator() {
        let device = Device::cuda_if_available();
        let logits = Tensor::from_slice(&[0.0f32, 1.0, 1.0, 0.0])
            .view([1, 2, 1, 2])
            .to_device(device);

        let map = logits_to_class_map(&logits, 4, 1).unwrap();
        assert_eq!(map.labels(), &[1, 1, 0, 0]);
    }

    #[test]
    fn test_rejects_unbatched_logits() {
        let logits = Tensor::zeros([3, 4, 4], (Kind::Float, Device::Cpu));
        assert!(logits_to_class_map(&logits, 4, 4).is_err());
    }

    #[test]
    fn test_extract_logits_variants() {
        let t = || Tensor::zeros([1, 3, 2, 2], (Kind::Float, Device::Cpu));

        assert!(extract_logits(IValue::Tensor(t())).is_ok());
        assert!(extract_logits(IValue::Tuple(vec![IValue::Tensor(t()), IValue::Int(1)])).is_ok());
        assert!(extract_logits(IValue::GenericDict(vec![(
            IValue::String("logits".into()),
            IValue::Tensor(t())
        )]))
        .is_ok());

        assert!(extract_logits(IValue::GenericDict(vec![(
            IValue::String("out".into()),
            IValue::Tensor(t())
        )]))
        .is_err());
        assert!(extract_logits(IValue::Int(3)).is_err());
    }
}
