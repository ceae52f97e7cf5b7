// SPDX-License-Identifier: Apache-2.0
//
// Raster decoding: turns submitted document bytes (PNG/JPEG) into packed
// 1-bit pages sized for a thermal print head.
//
// Thermal label printers are monochrome: pixels are thresholded at
// mid-grey after luma conversion.  Rows are packed MSB-first, one bit per
// dot, 1 = black.  Oversized images are scaled down to the head width
// preserving aspect ratio; landscape orientation rotates the page before
// packing so drivers only ever see portrait raster.

use image::DynamicImage;
use tracing::debug;

use etikett_core::error::{EtikettError, Result};
use etikett_core::types::{DocumentFormat, Orientation};

/// Luma threshold below which a pixel prints black.
const BLACK_THRESHOLD: u8 = 128;

/// One decoded page of 1-bit raster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterPage {
    /// Width in dots.
    pub width: u32,
    /// Height in dots (rows).
    pub height: u32,
    /// Packed row stride: `width.div_ceil(8)`.
    pub bytes_per_row: usize,
    /// `height * bytes_per_row` packed bytes, top row first.
    pub data: Vec<u8>,
}

impl RasterPage {
    /// Borrow one packed row.
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.bytes_per_row;
        &self.data[start..start + self.bytes_per_row]
    }

    /// Total packed size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Decoding parameters derived from the printer's capabilities and the
/// job's requested attributes.
#[derive(Debug, Clone, Copy)]
pub struct RasterOptions {
    /// Head width in dots; wider images are scaled down to fit.
    pub max_width_dots: u32,
    pub orientation: Orientation,
}

/// Decode a document into raster pages.
///
/// PNG and JPEG documents produce exactly one page each.  `Raw` documents
/// are printer-native command streams and never reach the raster path;
/// asking for them here is a driver error.
pub fn decode_pages(
    data: &[u8],
    format: DocumentFormat,
    opts: &RasterOptions,
) -> Result<Vec<RasterPage>> {
    match format {
        DocumentFormat::Png | DocumentFormat::Jpeg => {
            let img = image::load_from_memory(data)
                .map_err(|e| EtikettError::Driver(format!("decode {}: {e}", format.mime_type())))?;
            Ok(vec![rasterize(img, opts)])
        }
        DocumentFormat::Raw => Err(EtikettError::Driver(
            "raw documents bypass the raster path".into(),
        )),
    }
}

/// Convert a decoded image into a packed 1-bit page.
fn rasterize(img: DynamicImage, opts: &RasterOptions) -> RasterPage {
    // Rotate before scaling so the fitted width is the head width.
    let img = match opts.orientation {
        Orientation::Portrait => img,
        Orientation::Landscape => img.rotate90(),
        Orientation::ReversePortrait => img.rotate180(),
        Orientation::ReverseLandscape => img.rotate270(),
    };

    let img = if img.width() > opts.max_width_dots {
        let scale = opts.max_width_dots as f64 / img.width() as f64;
        let height = ((img.height() as f64 * scale).round() as u32).max(1);
        img.resize_exact(
            opts.max_width_dots,
            height,
            image::imageops::FilterType::Lanczos3,
        )
    } else {
        img
    };

    let luma = img.to_luma8();
    let (width, height) = luma.dimensions();
    let bytes_per_row = (width as usize).div_ceil(8);
    let mut data = vec![0u8; height as usize * bytes_per_row];

    for (y, row) in luma.rows().enumerate() {
        let base = y * bytes_per_row;
        for (x, pixel) in row.enumerate() {
            if pixel.0[0] < BLACK_THRESHOLD {
                data[base + x / 8] |= 0x80 >> (x % 8);
            }
        }
    }

    debug!(width, height, bytes_per_row, "rasterized page");

    RasterPage {
        width,
        height,
        bytes_per_row,
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Luma};

    /// Encode a tiny grayscale test image as PNG in memory.
    fn png_bytes(width: u32, height: u32, pixel: impl Fn(u32, u32) -> u8) -> Vec<u8> {
        let img: ImageBuffer<Luma<u8>, Vec<u8>> =
            ImageBuffer::from_fn(width, height, |x, y| Luma([pixel(x, y)]));
        let mut out = std::io::Cursor::new(Vec::new());
        DynamicImage::ImageLuma8(img)
            .write_to(&mut out, image::ImageFormat::Png)
            .expect("encode test png");
        out.into_inner()
    }

    fn opts(max_width: u32) -> RasterOptions {
        RasterOptions {
            max_width_dots: max_width,
            orientation: Orientation::Portrait,
        }
    }

    #[test]
    fn all_black_image_packs_to_ones() {
        let data = png_bytes(8, 2, |_, _| 0);
        let pages = decode_pages(&data, DocumentFormat::Png, &opts(64)).expect("decode");
        assert_eq!(pages.len(), 1);
        let page = &pages[0];
        assert_eq!(page.width, 8);
        assert_eq!(page.height, 2);
        assert_eq!(page.bytes_per_row, 1);
        assert_eq!(page.data, vec![0xFF, 0xFF]);
    }

    #[test]
    fn all_white_image_packs_to_zeroes() {
        let data = png_bytes(8, 2, |_, _| 255);
        let pages = decode_pages(&data, DocumentFormat::Png, &opts(64)).expect("decode");
        assert_eq!(pages[0].data, vec![0x00, 0x00]);
    }

    #[test]
    fn left_half_black_sets_high_bits() {
        let data = png_bytes(8, 1, |x, _| if x < 4 { 0 } else { 255 });
        let pages = decode_pages(&data, DocumentFormat::Png, &opts(64)).expect("decode");
        assert_eq!(pages[0].data, vec![0xF0]);
    }

    #[test]
    fn non_multiple_of_eight_width_pads_row() {
        let data = png_bytes(10, 1, |_, _| 0);
        let pages = decode_pages(&data, DocumentFormat::Png, &opts(64)).expect("decode");
        let page = &pages[0];
        assert_eq!(page.bytes_per_row, 2);
        // 10 black dots: 8 full bits then 2 high bits of the pad byte.
        assert_eq!(page.data, vec![0xFF, 0xC0]);
    }

    #[test]
    fn oversized_image_is_scaled_to_head_width() {
        let data = png_bytes(100, 50, |_, _| 0);
        let pages = decode_pages(&data, DocumentFormat::Png, &opts(32)).expect("decode");
        assert_eq!(pages[0].width, 32);
        assert_eq!(pages[0].height, 16);
    }

    #[test]
    fn landscape_rotates_before_fitting() {
        let data = png_bytes(20, 10, |_, _| 0);
        let mut o = opts(64);
        o.orientation = Orientation::Landscape;
        let pages = decode_pages(&data, DocumentFormat::Png, &o).expect("decode");
        assert_eq!(pages[0].width, 10);
        assert_eq!(pages[0].height, 20);
    }

    #[test]
    fn raw_format_is_rejected() {
        let result = decode_pages(b"\x1b@", DocumentFormat::Raw, &opts(64));
        assert!(result.is_err());
    }

    #[test]
    fn garbage_bytes_are_a_driver_error() {
        let result = decode_pages(b"not an image", DocumentFormat::Png, &opts(64));
        assert!(matches!(result, Err(EtikettError::Driver(_))));
    }
}
