//! Signature image decoding for embedding as PDF image XObjects

use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::Write;

/// Decoded image split into Flate-compressed RGB and alpha planes
#[derive(Debug, Clone)]
pub struct EmbeddedImage {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
    pub alpha: Vec<u8>,
}

/// Largest side embedded into a page, in pixels
const MAX_IMAGE_DIMENSION: u32 = 4096;

impl EmbeddedImage {
    /// Decode PNG or JPEG bytes
    pub fn decode(bytes: &[u8]) -> Result<Self, String> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| e.to_string())?
            .to_rgba8();
        let (width, height) = img.dimensions();
        if width == 0 || height == 0 {
            return Err("image has no pixels".into());
        }
        if width > MAX_IMAGE_DIMENSION || height > MAX_IMAGE_DIMENSION {
            return Err(format!("image is too large: {}x{}", width, height));
        }

        let pixels = width as usize * height as usize;
        let mut rgb = Vec::with_capacity(pixels * 3);
        let mut alpha = Vec::with_capacity(pixels);
        for pixel in img.pixels() {
            rgb.extend_from_slice(&pixel.0[..3]);
            alpha.push(pixel.0[3]);
        }

        Ok(Self {
            width,
            height,
            rgb: deflate(&rgb)?,
            alpha: deflate(&alpha)?,
        })
    }
}

fn deflate(data: &[u8]) -> Result<Vec<u8>, String> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).map_err(|e| e.to_string())?;
    encoder.finish().map_err(|e| e.to_string())
}


#[cfg(test)]
mod tests {
    use super::fixtures::signature_png;
    use super::*;
    use flate2::read::ZlibDecoder;
    use std::io::Read;

    fn inflate(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        ZlibDecoder::new(data).read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_decode_png_planes() {
        let image = EmbeddedImage::decode(&signature_png(40, 10)).unwrap();
        assert_eq!((image.width, image.height), (40, 10));

        let rgb = inflate(&image.rgb);
        let alpha = inflate(&image.alpha);
        assert_eq!(rgb.len(), 40 * 10 * 3);
        assert_eq!(alpha.len(), 40 * 10);
        // Stroke pixels are opaque, background is transparent
        assert_eq!(alpha[5 * 40], 255);
        assert_eq!(alpha[1], 0);
    }

    #[test]
    fn test_decode_rejects_non_image() {
        assert!(EmbeddedImage::decode(b"definitely not an image").is_err());
    }

    #[test]
    fn test_decode_rejects_oversized_image() {
        let err = EmbeddedImage::decode(&signature_png(MAX_IMAGE_DIMENSION + 1, 1)).unwrap_err();
        assert!(err.contains("too large"), "{}", err);
    }
}
