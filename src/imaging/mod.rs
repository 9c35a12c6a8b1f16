pub mod heif;

use image::DynamicImage;
use image::imageops::FilterType;
use log::{error, info};

use crate::imaging::heif::HeifDecoder;

/// Canonical input resolution expected by the classifier.
pub const INPUT_SIZE: u32 = 224;

/// A validated RGB raster, resized to 224x224 and scaled to [0, 1],
/// flattened in CHW order ready for a forward pass.
pub struct DecodedImage {
    pixels: Vec<f32>,
}

impl DecodedImage {
    pub fn pixels(&self) -> &[f32] {
        &self.pixels
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("not a decodable image: {0}")]
    Unreadable(#[from] image::ImageError),
    #[error("HEIC image but HEIC support is unavailable")]
    HeicUnavailable,
    #[error("HEIC decode failed: {0}")]
    Heic(String),
}

/// Turns raw upload bytes into a `DecodedImage` or rejects them.
///
/// Format detection is content-based; the declared filename and content
/// type of an upload are informational only. HEIC support is probed once
/// at construction and its absence degrades decoding rather than failing
/// the process.
pub struct ImageDecoder {
    heif: Option<HeifDecoder>,
}

impl ImageDecoder {
    pub fn new() -> Self {
        let heif = match HeifDecoder::new() {
            Ok(decoder) => {
                info!("HEIC decoding enabled");
                Some(decoder)
            }
            Err(e) => {
                error!("Failed to initialize HEIC support: {e}; HEIC uploads will be rejected");
                None
            }
        };
        Self { heif }
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<DecodedImage, DecodeError> {
        let raster = if is_heif(bytes) {
            match &self.heif {
                Some(decoder) => DynamicImage::ImageRgb8(decoder.decode_to_rgb(bytes)?),
                None => return Err(DecodeError::HeicUnavailable),
            }
        } else {
            // A full decode doubles as the structural integrity check;
            // truncated or corrupt bitstreams error out here.
            image::load_from_memory(bytes)?
        };
        Ok(normalize(raster))
    }
}

impl Default for ImageDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(raster: DynamicImage) -> DecodedImage {
    let resized = raster
        .resize_exact(INPUT_SIZE, INPUT_SIZE, FilterType::Triangle)
        .to_rgb8();
    let plane = (INPUT_SIZE * INPUT_SIZE) as usize;
    let mut pixels = vec![0f32; 3 * plane];
    for (x, y, pixel) in resized.enumerate_pixels() {
        let offset = (y * INPUT_SIZE + x) as usize;
        for channel in 0..3 {
            pixels[channel * plane + offset] = f32::from(pixel[channel]) / 255.0;
        }
    }
    DecodedImage { pixels }
}

const HEIF_BRANDS: [&[u8; 4]; 8] = [
    b"heic", b"heix", b"hevc", b"hevx", b"heim", b"heis", b"mif1", b"msf1",
];

/// ISO-BMFF sniff: `ftyp` box with a HEIF-family major brand.
pub fn is_heif(bytes: &[u8]) -> bool {
    if bytes.len() < 12 || &bytes[4..8] != b"ftyp" {
        return false;
    }
    let brand: &[u8] = &bytes[8..12];
    HEIF_BRANDS.iter().any(|b| &b[..] == brand)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn solid_png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb(color));
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    #[test]
    fn decodes_png_to_canonical_shape() {
        let decoder = ImageDecoder::new();
        let decoded = decoder.decode(&solid_png(17, 43, [255, 0, 0])).unwrap();
        let plane = (INPUT_SIZE * INPUT_SIZE) as usize;
        assert_eq!(decoded.pixels().len(), 3 * plane);
        assert!(decoded.pixels().iter().all(|p| (0.0..=1.0).contains(p)));
        // Solid red: R plane saturated, G and B planes dark.
        assert!(decoded.pixels()[0] > 0.95);
        assert!(decoded.pixels()[plane] < 0.05);
        assert!(decoded.pixels()[2 * plane] < 0.05);
    }

    #[test]
    fn rejects_non_image_bytes() {
        let decoder = ImageDecoder::new();
        assert!(decoder.decode(b"definitely not an image").is_err());
    }

    #[test]
    fn rejects_truncated_png() {
        let decoder = ImageDecoder::new();
        let png = solid_png(32, 32, [10, 20, 30]);
        assert!(decoder.decode(&png[..png.len() / 2]).is_err());
    }

    #[test]
    fn converts_grayscale_to_rgb() {
        let gray = image::GrayImage::from_pixel(8, 8, image::Luma([128]));
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageLuma8(gray)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();

        let decoder = ImageDecoder::new();
        let decoded = decoder.decode(&buf.into_inner()).unwrap();
        let plane = (INPUT_SIZE * INPUT_SIZE) as usize;
        // All three channels populated from the single gray channel.
        assert!((decoded.pixels()[0] - decoded.pixels()[plane]).abs() < 1e-6);
        assert!((decoded.pixels()[0] - decoded.pixels()[2 * plane]).abs() < 1e-6);
    }

    #[test]
    fn sniffs_heif_ftyp_box() {
        let mut header = vec![0, 0, 0, 24];
        header.extend_from_slice(b"ftypheic");
        header.extend_from_slice(&[0; 16]);
        assert!(is_heif(&header));
        assert!(!is_heif(&solid_png(4, 4, [0, 0, 0])));
        assert!(!is_heif(b"short"));
    }
}
