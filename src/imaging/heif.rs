use libheif_rs::{ColorSpace, HeifContext, HeifError, LibHeif, RgbChroma};

use crate::imaging::DecodeError;

/// HEIC/HEIF decoding via libheif. Constructed once at startup; if the
/// linked library is unusable the service keeps running without HEIC.
pub struct HeifDecoder {
    lib: LibHeif,
}

impl HeifDecoder {
    pub fn new() -> Result<Self, HeifError> {
        Ok(Self {
            lib: LibHeif::new_checked()?,
        })
    }

    pub fn decode_to_rgb(&self, bytes: &[u8]) -> Result<image::RgbImage, DecodeError> {
        let ctx = HeifContext::read_from_bytes(bytes).map_err(heic_err)?;
        let handle = ctx.primary_image_handle().map_err(heic_err)?;
        let decoded = self
            .lib
            .decode(&handle, ColorSpace::Rgb(RgbChroma::Rgb), None)
            .map_err(heic_err)?;

        let planes = decoded.planes();
        let plane = planes
            .interleaved
            .ok_or_else(|| DecodeError::Heic("no interleaved RGB plane".into()))?;

        // Rows may be padded to the stride; copy only the pixel data.
        let width = plane.width as usize;
        let height = plane.height as usize;
        let mut raw = Vec::with_capacity(width * height * 3);
        for row in 0..height {
            let start = row * plane.stride;
            raw.extend_from_slice(&plane.data[start..start + width * 3]);
        }

        image::RgbImage::from_raw(plane.width, plane.height, raw)
            .ok_or_else(|| DecodeError::Heic("decoded plane has unexpected size".into()))
    }
}

fn heic_err(e: HeifError) -> DecodeError {
    DecodeError::Heic(e.to_string())
}
