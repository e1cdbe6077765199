//! Page reassembly: build one multi-page PDF from an ordered image sequence.
//!
//! ## The embedding fallback chain
//!
//! Each image runs through an explicit ordered list of embedding strategies,
//! each yielding a typed [`EmbedResult`] rather than cascading catches:
//!
//! 1. **DCTDecode** — re-encode to JPEG via the codec capability and embed
//!    the JPEG stream directly (smallest output, the preferred path);
//! 2. **FlateDecode** — decode to raw RGB and embed a flate-compressed
//!    pixel stream (survives inputs the JPEG encoder rejects);
//! 3. **placeholder** — a fixed-size page carrying a short diagnostic line.
//!
//! The chain guarantees the invariant that matters: the output document has
//! exactly one page per input image, no matter which images are bad.
//!
//! ## Compression path
//!
//! PDF → images → PDF: rasterize every page, feed the sequence back through
//! the assembler. If rasterization itself fails outright, the whole attempt
//! degrades to the original document plus a note — never an error.

use crate::error::{CodecError, ConvertError};
use crate::pipeline::codec::Codec;
use crate::request::{ConversionOutcome, InputFile, TargetFormat};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use tracing::{debug, info, warn};

/// Placeholder page geometry (A4 in points).
const PLACEHOLDER_WIDTH: i64 = 595;
const PLACEHOLDER_HEIGHT: i64 = 842;

/// A finished assembly: the document bytes plus which pages (1-based)
/// degraded to placeholders.
#[derive(Debug)]
pub struct PdfAssembly {
    pub bytes: Vec<u8>,
    pub placeholder_pages: Vec<usize>,
}

impl PdfAssembly {
    /// Advisory note describing degraded pages, if any.
    pub fn note(&self) -> Option<String> {
        if self.placeholder_pages.is_empty() {
            return None;
        }
        let pages: Vec<String> = self.placeholder_pages.iter().map(|p| p.to_string()).collect();
        Some(format!(
            "page(s) {} could not be embedded and were replaced by placeholders",
            pages.join(", ")
        ))
    }
}

/// One embedding attempt's typed result.
enum EmbedResult {
    Embedded {
        xobject: Stream,
        width: u32,
        height: u32,
    },
    Unsupported(String),
    Error(String),
}

/// Assemble an ordered image sequence into a single PDF.
///
/// Never produces fewer pages than `images.len()`; a bad image becomes a
/// placeholder page, not a gap. Fails only when the document itself cannot
/// be serialised.
pub fn images_to_pdf(
    codec: Option<&dyn Codec>,
    images: &[Vec<u8>],
    quality: u8,
    max_dim: u32,
) -> Result<PdfAssembly, ConvertError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let mut kids: Vec<Object> = Vec::with_capacity(images.len());
    let mut placeholder_pages = Vec::new();

    for (index, image) in images.iter().enumerate() {
        let page_num = index + 1;
        let page_id = match try_embed_chain(codec, image, quality, max_dim) {
            Ok((xobject, width, height)) => {
                add_image_page(&mut doc, pages_id, xobject, width, height)
            }
            Err(reason) => {
                warn!("page {}: all embed strategies failed: {}", page_num, reason);
                placeholder_pages.push(page_num);
                add_placeholder_page(
                    &mut doc,
                    pages_id,
                    &format!("Page {page_num}: image could not be embedded ({reason})"),
                )
            }
        };
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buf = Vec::new();
    doc.save_to(&mut std::io::Cursor::new(&mut buf))
        .map_err(|e| ConvertError::Internal(format!("PDF serialisation failed: {e}")))?;

    debug!(
        "assembled {} page(s), {} placeholder(s), {} bytes",
        images.len(),
        placeholder_pages.len(),
        buf.len()
    );

    Ok(PdfAssembly {
        bytes: buf,
        placeholder_pages,
    })
}

/// Run the embed strategies in order, returning the first success or the
/// accumulated reason when all fail.
fn try_embed_chain(
    codec: Option<&dyn Codec>,
    image: &[u8],
    quality: u8,
    max_dim: u32,
) -> Result<(Stream, u32, u32), String> {
    let mut reasons: Vec<String> = Vec::with_capacity(2);

    for attempt in [
        embed_dct(codec, image, quality, max_dim),
        embed_flate(image, max_dim),
    ] {
        match attempt {
            EmbedResult::Embedded {
                xobject,
                width,
                height,
            } => return Ok((xobject, width, height)),
            EmbedResult::Unsupported(r) | EmbedResult::Error(r) => reasons.push(r),
        }
    }
    Err(reasons.join("; "))
}

/// Primary strategy: JPEG re-encode via the codec, embedded as DCTDecode.
fn embed_dct(codec: Option<&dyn Codec>, image: &[u8], quality: u8, max_dim: u32) -> EmbedResult {
    let codec = match codec {
        Some(c) => c,
        None => return EmbedResult::Unsupported("no local codec for JPEG embed".into()),
    };
    let jpeg = match codec.convert(image, TargetFormat::Jpeg, quality, max_dim) {
        Ok(bytes) => bytes,
        Err(CodecError::Unsupported(r)) => return EmbedResult::Unsupported(r),
        Err(CodecError::Failed(r)) => return EmbedResult::Error(r),
    };
    let (width, height) = match image::load_from_memory(&jpeg) {
        Ok(img) => (img.width(), img.height()),
        Err(e) => return EmbedResult::Error(format!("re-encoded JPEG unreadable: {e}")),
    };

    let xobject = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
            "Filter" => "DCTDecode",
        },
        jpeg,
    );
    EmbedResult::Embedded {
        xobject,
        width,
        height,
    }
}

/// Secondary strategy: raw RGB pixels, flate-compressed.
fn embed_flate(image: &[u8], max_dim: u32) -> EmbedResult {
    let img = match image::load_from_memory(image) {
        Ok(img) => img,
        Err(image::ImageError::Unsupported(u)) => return EmbedResult::Unsupported(u.to_string()),
        Err(e) => return EmbedResult::Error(e.to_string()),
    };
    let img = if img.width().max(img.height()) > max_dim {
        img.thumbnail(max_dim, max_dim)
    } else {
        img
    };
    let rgb = img.to_rgb8();
    let (width, height) = rgb.dimensions();

    let mut xobject = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
        },
        rgb.into_raw(),
    );
    // Sets the FlateDecode filter itself; an uncompressed stream is still a
    // valid fallback if compression is refused.
    let _ = xobject.compress();

    EmbedResult::Embedded {
        xobject,
        width,
        height,
    }
}

/// Add a page showing a single full-bleed image. Page size mirrors the
/// pixel dimensions in points.
fn add_image_page(
    doc: &mut Document,
    pages_id: lopdf::ObjectId,
    xobject: Stream,
    width: u32,
    height: u32,
) -> lopdf::ObjectId {
    let image_id = doc.add_object(Object::Stream(xobject));

    let content = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    (width as i64).into(),
                    0.into(),
                    0.into(),
                    (height as i64).into(),
                    0.into(),
                    0.into(),
                ],
            ),
            Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
            Operation::new("Q", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(
        dictionary! {},
        content.encode().unwrap_or_default(),
    ));

    doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), (width as i64).into(), (height as i64).into()],
        "Contents" => content_id,
        "Resources" => dictionary! {
            "XObject" => dictionary! { "Im0" => image_id },
        },
    })
}

/// Add a fixed-size placeholder page carrying a one-line diagnostic.
fn add_placeholder_page(
    doc: &mut Document,
    pages_id: lopdf::ObjectId,
    text: &str,
) -> lopdf::ObjectId {
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let content = Content {
        operations: vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![Object::Name(b"F1".to_vec()), 12.into()]),
            Operation::new("Td", vec![50.into(), (PLACEHOLDER_HEIGHT - 72).into()]),
            Operation::new("Tj", vec![Object::string_literal(text)]),
            Operation::new("ET", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(
        dictionary! {},
        content.encode().unwrap_or_default(),
    ));

    doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), PLACEHOLDER_WIDTH.into(), PLACEHOLDER_HEIGHT.into()],
        "Contents" => content_id,
        "Resources" => dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        },
    })
}

/// The PDF compression path: rasterize every page and rebuild the document.
///
/// Always returns an outcome: a rebuilt document, or the original bytes with
/// a note when rasterization is impossible or fails partway.
pub fn compress_document(
    codec: &dyn Codec,
    file: &InputFile,
    quality: u8,
    max_dim: u32,
) -> ConversionOutcome {
    // Page count first; an undeterminable count falls back to a single-page
    // rasterization attempt.
    let page_count = match codec.page_count(&file.bytes) {
        Ok(n) if n > 0 => n,
        Ok(_) => {
            return ConversionOutcome::degraded(file, "document reports zero pages");
        }
        Err(e) => {
            debug!(
                "page count unavailable for '{}' ({}), trying single-page rasterization",
                file.name, e
            );
            1
        }
    };

    let mut pages = Vec::with_capacity(page_count);
    for index in 0..page_count {
        match codec.rasterize(&file.bytes, index, max_dim) {
            Ok(png) => pages.push(png),
            Err(e) => {
                // Rasterization failing outright degrades the whole attempt;
                // returning a partial document would silently drop pages.
                info!(
                    "compression of '{}' degraded: page {} rasterization failed: {}",
                    file.name,
                    index + 1,
                    e
                );
                return ConversionOutcome::degraded(
                    file,
                    format!("compression skipped: page {} could not be rasterized: {e}", index + 1),
                );
            }
        }
    }

    let assembly = match images_to_pdf(Some(codec), &pages, quality, max_dim) {
        Ok(a) => a,
        Err(e) => {
            return ConversionOutcome::degraded(file, format!("compression skipped: {e}"));
        }
    };

    let note = assembly.note();
    let mut outcome = ConversionOutcome::converted(
        format!("{}-compressed.pdf", file.stem()),
        assembly.bytes,
        TargetFormat::Pdf.content_type(),
    );
    if let Some(note) = note {
        outcome = outcome.with_note(note);
    }
    outcome
}
