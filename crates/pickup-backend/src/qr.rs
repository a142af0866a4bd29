//! QR code rendering and still-image decoding

use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use qrcode::{Color, EcLevel, QrCode};
use std::io::Cursor;
use thiserror::Error;

/// Modules of light border around the symbol
const QUIET_ZONE: u32 = 4;

#[derive(Error, Debug)]
pub enum QrCodecError {
    #[error("Failed to encode QR symbol: {0}")]
    Encode(String),

    #[error("Failed to write PNG: {0}")]
    Png(String),

    #[error("Unreadable image: {0}")]
    Image(String),

    #[error("No QR code found in image")]
    NotFound,
}

/// Render `payload` as a greyscale PNG
pub fn render_png(payload: &str, module_size: u32) -> Result<Vec<u8>, QrCodecError> {
    let code = QrCode::with_error_correction_level(payload.as_bytes(), EcLevel::M)
        .map_err(|e| QrCodecError::Encode(e.to_string()))?;

    let width = code.width() as u32;
    let colors = code.to_colors();
    let side = (width + 2 * QUIET_ZONE) * module_size;

    let image = GrayImage::from_fn(side, side, |x, y| {
        let mx = (x / module_size).checked_sub(QUIET_ZONE);
        let my = (y / module_size).checked_sub(QUIET_ZONE);
        let dark = match (mx, my) {
            (Some(mx), Some(my)) if mx < width && my < width => {
                colors[(my * width + mx) as usize] == Color::Dark
            }
            _ => false,
        };
        if dark {
            Luma([0])
        } else {
            Luma([255])
        }
    });

    let mut png = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(image)
        .write_to(&mut png, ImageFormat::Png)
        .map_err(|e| QrCodecError::Png(e.to_string()))?;

    Ok(png.into_inner())
}

/// Decode the first readable QR code in a PNG or JPEG image
pub fn decode_image(bytes: &[u8]) -> Result<String, QrCodecError> {
    let image = image::load_from_memory(bytes)
        .map_err(|e| QrCodecError::Image(e.to_string()))?
        .to_luma8();

    let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
        image.width() as usize,
        image.height() as usize,
        |x, y| image.get_pixel(x as u32, y as u32)[0],
    );

    prepared
        .detect_grids()
        .into_iter()
        .find_map(|grid| grid.decode().ok())
        .map(|(_, content)| content)
        .ok_or(QrCodecError::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rendered_code_decodes_back() {
        let payload = "WT1:101:4f9c2a7d1e0b4c3a9d8e7f6a5b4c3d2e";
        let png = render_png(payload, 8).unwrap();

        assert_eq!(&png[1..4], b"PNG");
        assert_eq!(decode_image(&png).unwrap(), payload);
    }

    #[test]
    fn test_module_size_scales_image() {
        let small = image::load_from_memory(&render_png("WT1:1:abc", 2).unwrap()).unwrap();
        let large = image::load_from_memory(&render_png("WT1:1:abc", 6).unwrap()).unwrap();
        assert_eq!(large.width(), small.width() * 3);
        assert_eq!(small.width(), small.height());
    }

    #[test]
    fn test_blank_image_has_no_code() {
        let blank = GrayImage::from_pixel(64, 64, Luma([255]));
        let mut png = Cursor::new(Vec::new());
        DynamicImage::ImageLuma8(blank)
            .write_to(&mut png, ImageFormat::Png)
            .unwrap();

        assert!(matches!(
            decode_image(&png.into_inner()),
            Err(QrCodecError::NotFound)
        ));
    }

    #[test]
    fn test_garbage_bytes_are_unreadable() {
        assert!(matches!(
            decode_image(b"definitely not an image"),
            Err(QrCodecError::Image(_))
        ));
    }
}
