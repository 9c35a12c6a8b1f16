use std::sync::Mutex;

use tch::nn::{self, ModuleT};
use tch::vision::resnet;
use tch::{Device, Tensor};

use crate::imaging::{DecodedImage, INPUT_SIZE};

/// Number of output classes: spice levels 0 through 5.
pub const SPICE_CLASSES: i64 = 6;

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("failed to load model weights: {0}")]
    WeightLoad(#[from] tch::TchError),
    #[error("forward pass failed: {0}")]
    Forward(String),
}

/// Maps a decoded raster to a spice level. Injected into the handlers as
/// a trait object so tests can substitute a double for the torch engine.
pub trait SpiceClassifier: Send + Sync {
    fn classify(&self, image: &DecodedImage) -> Result<i64, InferenceError>;
}

/// ResNet-18 with a 6-way head, weights loaded once at startup and frozen
/// for the lifetime of the process.
pub struct TorchClassifier {
    // The boxed forward fn is Send but not Sync; the lock is held only
    // for the duration of one forward pass.
    net: Mutex<nn::FuncT<'static>>,
    vs: nn::VarStore,
}

impl TorchClassifier {
    pub fn load(weights_path: &str) -> Result<Self, InferenceError> {
        let device = Device::cuda_if_available();
        let mut vs = nn::VarStore::new(device);
        let net = resnet::resnet18(&vs.root(), SPICE_CLASSES);
        vs.load(weights_path)?;
        vs.freeze();
        Ok(Self {
            net: Mutex::new(net),
            vs,
        })
    }

    /// Randomly initialized network, for exercising the forward pass
    /// without a weight fixture.
    #[cfg(test)]
    fn untrained() -> Self {
        let mut vs = nn::VarStore::new(Device::Cpu);
        let net = resnet::resnet18(&vs.root(), SPICE_CLASSES);
        vs.freeze();
        Self {
            net: Mutex::new(net),
            vs,
        }
    }

    fn forward(&self, image: &DecodedImage) -> i64 {
        let size = i64::from(INPUT_SIZE);
        let input = Tensor::from_slice(image.pixels())
            .view([1, 3, size, size])
            .to_device(self.vs.device());
        let net = self.net.lock().unwrap();
        let output = tch::no_grad(|| net.forward_t(&input, false));
        output.argmax(-1, false).int64_value(&[0])
    }
}

impl SpiceClassifier for TorchClassifier {
    fn classify(&self, image: &DecodedImage) -> Result<i64, InferenceError> {
        Ok(self.forward(image))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::ImageDecoder;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn decoded(color: [u8; 3]) -> DecodedImage {
        let img = RgbImage::from_pixel(64, 64, Rgb(color));
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, ImageFormat::Jpeg)
            .unwrap();
        ImageDecoder::new().decode(&buf.into_inner()).unwrap()
    }

    #[test]
    fn label_is_in_range() {
        let classifier = TorchClassifier::untrained();
        let label = classifier.classify(&decoded([200, 40, 40])).unwrap();
        assert!((0..SPICE_CLASSES).contains(&label));
    }

    #[test]
    fn classify_is_deterministic() {
        let classifier = TorchClassifier::untrained();
        let image = decoded([90, 180, 30]);
        let first = classifier.classify(&image).unwrap();
        for _ in 0..3 {
            assert_eq!(classifier.classify(&image).unwrap(), first);
        }
    }
}
