//! Local codec capability: decode, bound, flatten, re-encode; rasterize PDF
//! pages via pdfium.
//!
//! ## Why a trait?
//!
//! The orchestrator never touches pixels. It talks to [`Codec`], which keeps
//! the strategy selector honest (capability presence is data, not a global)
//! and lets tests substitute failing or partial codecs without a single
//! image byte.
//!
//! ## Why probe pdfium once?
//!
//! pdfium is a system shared library that may simply not be installed.
//! [`ImageCodec::new`] attempts a bind once at startup and records the
//! result; a missing library turns `rasterize`/`page_count` into
//! [`CodecError::Unsupported`] — a downgrade, never a crash. Raster work on
//! plain images needs no native library and is always available.

use crate::error::CodecError;
use crate::request::TargetFormat;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::io::Cursor;
use tracing::{debug, warn};

/// The local codec capability surface.
///
/// All operations are synchronous and CPU-bound; the orchestrator wraps
/// calls in `tokio::task::spawn_blocking`.
pub trait Codec: Send + Sync {
    /// Re-encode `bytes` into `target`, downsampling to `max_dim` when the
    /// larger dimension exceeds it (aspect preserved, never upscaled) and
    /// flattening alpha onto white for alpha-less targets. Quality applies
    /// only to lossy targets.
    fn convert(
        &self,
        bytes: &[u8],
        target: TargetFormat,
        quality: u8,
        max_dim: u32,
    ) -> Result<Vec<u8>, CodecError>;

    /// Number of pages in a multi-page document.
    fn page_count(&self, doc: &[u8]) -> Result<usize, CodecError>;

    /// Render one page of a multi-page document to PNG bytes, bounded by
    /// `max_dim` on the longer edge.
    fn rasterize(&self, doc: &[u8], page_index: usize, max_dim: u32) -> Result<Vec<u8>, CodecError>;
}

/// Default codec: the `image` crate for raster work, pdfium for PDF pages.
pub struct ImageCodec {
    pdfium_available: bool,
}

impl ImageCodec {
    /// Probe the pdfium system library once and remember the result.
    pub fn new() -> Self {
        let pdfium_available = Pdfium::bind_to_system_library().is_ok();
        if !pdfium_available {
            warn!("pdfium not found — PDF rasterization disabled, raster formats still available");
        }
        Self { pdfium_available }
    }

    /// Whether PDF rasterization is available in this process.
    pub fn can_rasterize(&self) -> bool {
        self.pdfium_available
    }

    fn bind_pdfium(&self) -> Result<Pdfium, CodecError> {
        if !self.pdfium_available {
            return Err(CodecError::Unsupported(
                "pdfium library not available".into(),
            ));
        }
        let bindings = Pdfium::bind_to_system_library()
            .map_err(|e| CodecError::Unsupported(format!("pdfium bind failed: {e:?}")))?;
        Ok(Pdfium::new(bindings))
    }
}

impl Default for ImageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec for ImageCodec {
    fn convert(
        &self,
        bytes: &[u8],
        target: TargetFormat,
        quality: u8,
        max_dim: u32,
    ) -> Result<Vec<u8>, CodecError> {
        let format = target.image_format().ok_or_else(|| {
            CodecError::Unsupported("document targets are composed, not encoded".into())
        })?;

        let img = image::load_from_memory(bytes)?;
        let img = bound_dimensions(img, max_dim);
        let img = if target.supports_alpha() {
            img
        } else {
            flatten_onto_white(img)
        };

        let mut buf = Cursor::new(Vec::new());
        if target.is_lossy() {
            let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
            img.write_with_encoder(encoder)?;
        } else {
            img.write_to(&mut buf, format)?;
        }

        debug!(
            "converted {} bytes → {} bytes as {}",
            bytes.len(),
            buf.get_ref().len(),
            target.extension()
        );
        Ok(buf.into_inner())
    }

    fn page_count(&self, doc: &[u8]) -> Result<usize, CodecError> {
        let pdfium = self.bind_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(doc, None)
            .map_err(|e| CodecError::Failed(format!("PDF load failed: {e:?}")))?;
        Ok(document.pages().len() as usize)
    }

    fn rasterize(&self, doc: &[u8], page_index: usize, max_dim: u32) -> Result<Vec<u8>, CodecError> {
        // The renderer addresses pages with a 16-bit index.
        let index = u16::try_from(page_index).map_err(|_| {
            CodecError::Failed(format!("page index {page_index} out of renderer range"))
        })?;
        let pdfium = self.bind_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(doc, None)
            .map_err(|e| CodecError::Failed(format!("PDF load failed: {e:?}")))?;

        let pages = document.pages();
        let page = pages
            .get(index)
            .map_err(|e| CodecError::Failed(format!("page {} unavailable: {e:?}", page_index + 1)))?;

        let render_config = PdfRenderConfig::new()
            .set_target_width(max_dim as i32)
            .set_maximum_height(max_dim as i32);

        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| CodecError::Failed(format!("render failed on page {}: {e:?}", page_index + 1)))?;

        let image = bitmap.as_image();
        debug!(
            "rasterized page {} → {}x{} px",
            page_index + 1,
            image.width(),
            image.height()
        );

        let mut buf = Cursor::new(Vec::new());
        image
            .write_to(&mut buf, image::ImageFormat::Png)
            .map_err(|e| CodecError::Failed(format!("PNG encode failed: {e}")))?;
        Ok(buf.into_inner())
    }
}

/// Downsample so the larger dimension fits `max_dim`. Never upscales.
fn bound_dimensions(img: DynamicImage, max_dim: u32) -> DynamicImage {
    let (w, h) = (img.width(), img.height());
    if w.max(h) <= max_dim {
        return img;
    }
    // thumbnail preserves aspect ratio and only ever shrinks here.
    img.thumbnail(max_dim, max_dim)
}

/// Composite any transparency onto a white background.
fn flatten_onto_white(img: DynamicImage) -> DynamicImage {
    if !img.color().has_alpha() {
        return img;
    }
    let rgba = img.to_rgba8();
    let (w, h) = rgba.dimensions();
    let mut flat = image::RgbImage::new(w, h);
    for (x, y, px) in rgba.enumerate_pixels() {
        let a = px[3] as u32;
        let blend = |c: u8| ((c as u32 * a + 255 * (255 - a)) / 255) as u8;
        flat.put_pixel(x, y, image::Rgb([blend(px[0]), blend(px[1]), blend(px[2])]));
    }
    DynamicImage::ImageRgb8(flat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn png_fixture(w: u32, h: u32, px: Rgba<u8>) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, px));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    // Construction without the pdfium probe: image-only paths under test
    // must not depend on a system library.
    fn image_only_codec() -> ImageCodec {
        ImageCodec {
            pdfium_available: false,
        }
    }

    #[test]
    fn convert_downscales_but_never_upscales() {
        let codec = image_only_codec();
        let src = png_fixture(400, 100, Rgba([10, 20, 30, 255]));

        let shrunk = codec
            .convert(&src, TargetFormat::Png, 80, 200)
            .expect("convert");
        let img = image::load_from_memory(&shrunk).unwrap();
        assert_eq!(img.width(), 200);
        assert_eq!(img.height(), 50, "aspect ratio must be preserved");

        let same = codec
            .convert(&src, TargetFormat::Png, 80, 4096)
            .expect("convert");
        let img = image::load_from_memory(&same).unwrap();
        assert_eq!((img.width(), img.height()), (400, 100), "no upscaling");
    }

    #[test]
    fn jpeg_target_flattens_alpha_onto_white() {
        let codec = image_only_codec();
        // Fully transparent source: flattened output must be pure white.
        let src = png_fixture(8, 8, Rgba([255, 0, 0, 0]));
        let out = codec
            .convert(&src, TargetFormat::Jpeg, 90, 100)
            .expect("convert");
        let img = image::load_from_memory(&out).unwrap();
        assert!(!img.color().has_alpha());
        let px = img.to_rgb8()[(4, 4)];
        assert!(px[0] > 240 && px[1] > 240 && px[2] > 240, "got {px:?}");
    }

    #[test]
    fn undecodable_input_is_not_a_hard_failure_kind() {
        let codec = image_only_codec();
        let err = codec
            .convert(b"definitely not an image", TargetFormat::Png, 80, 100)
            .unwrap_err();
        // Garbage bytes may sniff as unsupported or fail to decode; either
        // way it is a CodecError the strategy layer can act on.
        match err {
            CodecError::Unsupported(_) | CodecError::Failed(_) => {}
        }
    }

    #[test]
    fn pdf_target_is_unsupported_for_raster_encode() {
        let codec = image_only_codec();
        let src = png_fixture(4, 4, Rgba([0, 0, 0, 255]));
        let err = codec.convert(&src, TargetFormat::Pdf, 80, 100).unwrap_err();
        assert!(matches!(err, CodecError::Unsupported(_)));
    }

    #[test]
    fn rasterize_without_pdfium_is_unsupported() {
        let codec = image_only_codec();
        let err = codec.rasterize(b"%PDF-1.4", 0, 1000).unwrap_err();
        assert!(matches!(err, CodecError::Unsupported(_)));
        let err = codec.page_count(b"%PDF-1.4").unwrap_err();
        assert!(matches!(err, CodecError::Unsupported(_)));
    }

    #[test]
    fn page_index_beyond_renderer_range_is_a_failure_not_a_wraparound() {
        let codec = image_only_codec();
        let err = codec.rasterize(b"%PDF-1.4", 70_000, 1000).unwrap_err();
        assert!(matches!(err, CodecError::Failed(_)));
    }

    #[test]
    fn lossless_round_trip_preserves_bounded_dimensions() {
        let codec = image_only_codec();
        let src = png_fixture(300, 120, Rgba([1, 2, 3, 255]));

        let as_bmp = codec
            .convert(&src, TargetFormat::Bmp, 80, 256)
            .expect("png → bmp");
        let back = codec
            .convert(&as_bmp, TargetFormat::Png, 80, 256)
            .expect("bmp → png");

        let img = image::load_from_memory(&back).unwrap();
        assert_eq!(img.width(), 256);
        assert_eq!(img.height(), 102); // 120 * 256 / 300, floor
    }
}
