//! Integration tests for the batch orchestrator.
//!
//! These run fully offline: local raster paths use the real image codec,
//! PDF paths use mock codecs implementing [`Codec`], and no remote client
//! is configured (remote protocol handling has its own unit tests against
//! wire fixtures).

use filemorph::{
    convert_batch, BatchOutput, Capabilities, CodecError, Codec, ConversionRequest, ConvertConfig,
    ConvertError, InputFile, TargetFormat,
};
use image::{DynamicImage, Rgba, RgbaImage};
use std::io::{Cursor, Read};
use std::sync::Arc;

// ── Test helpers ─────────────────────────────────────────────────────────

/// Route engine logs through the test harness; RUST_LOG selects the level.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn png_bytes(w: u32, h: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([40, 80, 160, 255])));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
    buf.into_inner()
}

fn png_file(name: &str, w: u32, h: u32) -> InputFile {
    InputFile::new(name, png_bytes(w, h))
}

/// Capabilities with the real image codec and no remote path. The raster
/// paths under test need no system library; PDF scenarios use mocks.
fn local_caps() -> Capabilities {
    Capabilities::with_parts(Some(Arc::new(filemorph::ImageCodec::new())), None)
}

fn real_convert(
    bytes: &[u8],
    target: TargetFormat,
    quality: u8,
    max_dim: u32,
) -> Result<Vec<u8>, CodecError> {
    filemorph::ImageCodec::new().convert(bytes, target, quality, max_dim)
}

/// Mock codec treating any PDF input as a fixed number of rasterizable pages.
struct PagedPdfCodec {
    pages: usize,
}

impl Codec for PagedPdfCodec {
    fn convert(
        &self,
        bytes: &[u8],
        target: TargetFormat,
        quality: u8,
        max_dim: u32,
    ) -> Result<Vec<u8>, CodecError> {
        real_convert(bytes, target, quality, max_dim)
    }
    fn page_count(&self, _: &[u8]) -> Result<usize, CodecError> {
        Ok(self.pages)
    }
    fn rasterize(&self, _: &[u8], _: usize, _: u32) -> Result<Vec<u8>, CodecError> {
        Ok(png_bytes(64, 64))
    }
}

/// Mock codec that can render pages but cannot count them.
struct CountlessCodec;

impl Codec for CountlessCodec {
    fn convert(
        &self,
        bytes: &[u8],
        target: TargetFormat,
        quality: u8,
        max_dim: u32,
    ) -> Result<Vec<u8>, CodecError> {
        real_convert(bytes, target, quality, max_dim)
    }
    fn page_count(&self, _: &[u8]) -> Result<usize, CodecError> {
        Err(CodecError::Failed("catalog unreadable".into()))
    }
    fn rasterize(&self, _: &[u8], _: usize, _: u32) -> Result<Vec<u8>, CodecError> {
        Ok(png_bytes(32, 32))
    }
}

/// Mock codec whose rasterizer always fails, for compression degrade tests.
struct BrokenRasterCodec;

impl Codec for BrokenRasterCodec {
    fn convert(
        &self,
        bytes: &[u8],
        target: TargetFormat,
        quality: u8,
        max_dim: u32,
    ) -> Result<Vec<u8>, CodecError> {
        real_convert(bytes, target, quality, max_dim)
    }
    fn page_count(&self, _: &[u8]) -> Result<usize, CodecError> {
        Ok(2)
    }
    fn rasterize(&self, _: &[u8], _: usize, _: u32) -> Result<Vec<u8>, CodecError> {
        Err(CodecError::Failed("render backend crashed".into()))
    }
}

fn zip_entries(bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut zip = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
    (0..zip.len())
        .map(|i| {
            let mut entry = zip.by_index(i).unwrap();
            let mut content = Vec::new();
            entry.read_to_end(&mut content).unwrap();
            (entry.name().to_string(), content)
        })
        .collect()
}

fn pdf_page_count(bytes: &[u8]) -> usize {
    lopdf::Document::load_mem(bytes).expect("valid PDF").get_pages().len()
}

// ── Batch-level errors ───────────────────────────────────────────────────

#[tokio::test]
async fn empty_batch_is_rejected() {
    let config = ConvertConfig::default();
    let request = ConversionRequest::new(TargetFormat::Png, vec![]);
    let err = convert_batch(request, &local_caps(), &config).await.unwrap_err();
    assert!(matches!(err, ConvertError::NoInputFiles));
}

#[tokio::test]
async fn oversized_file_degrades_instead_of_sinking_the_batch() {
    init_tracing();
    let config = ConvertConfig::builder().max_file_bytes(1024).build().unwrap();
    let big = InputFile::new("big.png", vec![0u8; 5000]);
    let request = ConversionRequest::new(
        TargetFormat::Jpeg,
        vec![png_file("small.png", 8, 8), big.clone()],
    );
    let output = convert_batch(request, &local_caps(), &config).await.unwrap();

    let entries = zip_entries(output.bytes());
    assert_eq!(entries.len(), 2, "the sibling must survive");
    assert_eq!(entries[0].0, "small.jpg");
    // The oversized file comes back untouched, under its own name.
    assert_eq!(entries[1].0, "big.png");
    assert_eq!(entries[1].1, big.bytes);
}

#[tokio::test]
async fn oversized_lone_file_is_a_degraded_outcome_not_an_error() {
    let config = ConvertConfig::builder().max_file_bytes(16).build().unwrap();
    let request = ConversionRequest::new(TargetFormat::Jpeg, vec![png_file("big.png", 64, 64)]);
    let output = convert_batch(request, &local_caps(), &config).await.unwrap();

    match output {
        BatchOutput::Single(outcome) => {
            assert!(outcome.degraded);
            assert!(outcome.note.unwrap().contains("ceiling"));
        }
        other => panic!("expected Single degraded outcome, got {other:?}"),
    }
}

// ── Single-file conversion ───────────────────────────────────────────────

#[tokio::test]
async fn single_image_converts_to_single_output() {
    let config = ConvertConfig::default();
    let request =
        ConversionRequest::new(TargetFormat::Jpeg, vec![png_file("photo.png", 30, 20)]);
    let output = convert_batch(request, &local_caps(), &config).await.unwrap();

    match output {
        BatchOutput::Single(outcome) => {
            assert_eq!(outcome.name, "photo.jpg");
            assert_eq!(outcome.content_type, "image/jpeg");
            assert!(!outcome.degraded);
            let img = image::load_from_memory(&outcome.bytes).unwrap();
            assert_eq!((img.width(), img.height()), (30, 20));
        }
        other => panic!("expected Single, got {other:?}"),
    }
}

#[tokio::test]
async fn max_dimension_bounds_output() {
    let config = ConvertConfig::default();
    let request = ConversionRequest::new(TargetFormat::Png, vec![png_file("wide.png", 400, 100)])
        .with_max_dimension(200);
    let output = convert_batch(request, &local_caps(), &config).await.unwrap();

    let img = image::load_from_memory(output.bytes()).unwrap();
    assert_eq!(img.width(), 200);
    assert_eq!(img.height(), 50);
}

#[tokio::test]
async fn bundle_flag_archives_even_one_output() {
    let config = ConvertConfig::default();
    let request = ConversionRequest::new(TargetFormat::Png, vec![png_file("only.png", 8, 8)])
        .with_bundle(true);
    let output = convert_batch(request, &local_caps(), &config).await.unwrap();

    assert!(matches!(output, BatchOutput::Archive { .. }));
    assert_eq!(output.content_type(), "application/zip");
    let entries = zip_entries(output.bytes());
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0, "only.png");
}

// ── Partial-failure isolation ────────────────────────────────────────────

#[tokio::test]
async fn corrupt_file_degrades_without_sinking_the_batch() {
    let config = ConvertConfig::default();
    let corrupt = InputFile::new("broken.png", b"\x89PNG but actually garbage".to_vec());
    let request = ConversionRequest::new(
        TargetFormat::Jpeg,
        vec![
            png_file("first.png", 10, 10),
            corrupt.clone(),
            png_file("third.png", 10, 10),
        ],
    );
    let output = convert_batch(request, &local_caps(), &config).await.unwrap();

    let entries = zip_entries(output.bytes());
    assert_eq!(entries.len(), 3);
    // Healthy neighbours converted; order preserved.
    assert_eq!(entries[0].0, "first.jpg");
    assert_eq!(entries[2].0, "third.jpg");
    // The corrupt file came back under its original name with its original
    // bytes, not an error.
    assert_eq!(entries[1].0, "broken.png");
    assert_eq!(entries[1].1, corrupt.bytes);
}

#[tokio::test]
async fn no_capabilities_degrades_every_file() {
    let config = ConvertConfig::default();
    let caps = Capabilities::with_parts(None, None);
    let file = png_file("photo.png", 10, 10);
    let original = file.bytes.clone();
    let request = ConversionRequest::new(TargetFormat::Jpeg, vec![file]);

    let output = convert_batch(request, &caps, &config).await.unwrap();
    match output {
        BatchOutput::Single(outcome) => {
            assert!(outcome.degraded);
            assert_eq!(outcome.bytes, original);
            assert!(outcome.note.is_some());
        }
        other => panic!("expected Single degraded outcome, got {other:?}"),
    }
}

// ── Image → PDF combination ──────────────────────────────────────────────

#[tokio::test]
async fn image_batch_with_pdf_target_combines_into_one_document() {
    let config = ConvertConfig::default();
    let request = ConversionRequest::new(
        TargetFormat::Pdf,
        vec![
            png_file("a.png", 20, 20),
            png_file("b.png", 30, 10),
            png_file("c.png", 10, 30),
        ],
    );
    let output = convert_batch(request, &local_caps(), &config).await.unwrap();

    match output {
        BatchOutput::Single(outcome) => {
            assert_eq!(outcome.name, "combined.pdf");
            assert_eq!(outcome.content_type, "application/pdf");
            assert_eq!(pdf_page_count(&outcome.bytes), 3);
        }
        other => panic!("expected Single combined PDF, got {other:?}"),
    }
}

#[tokio::test]
async fn combined_document_keeps_one_page_per_image_even_when_one_is_bad() {
    let config = ConvertConfig::default();
    let request = ConversionRequest::new(
        TargetFormat::Pdf,
        vec![
            png_file("a.png", 20, 20),
            InputFile::with_kind("bad.png", "image/png", b"not an image at all".to_vec()),
            png_file("c.png", 20, 20),
        ],
    );
    let output = convert_batch(request, &local_caps(), &config).await.unwrap();

    match output {
        BatchOutput::Single(outcome) => {
            assert_eq!(pdf_page_count(&outcome.bytes), 3);
            assert!(outcome.note.unwrap().contains("placeholder"));
        }
        other => panic!("expected Single combined PDF, got {other:?}"),
    }
}

#[tokio::test]
async fn remote_only_member_never_becomes_a_placeholder_in_the_combined_document() {
    init_tracing();
    // Remote configured but unreachable (.invalid never resolves): the HEIC
    // member must be routed remotely and, when that fails, degrade on its
    // own — not be flattened into a placeholder page of a "successful" PDF.
    let config = ConvertConfig::builder()
        .remote("test-key", "https://remote.invalid/v2")
        .build()
        .unwrap();
    let caps = Capabilities::resolve(&config);

    let mut heic_bytes = vec![0, 0, 0, 24];
    heic_bytes.extend_from_slice(b"ftypheic");
    heic_bytes.extend_from_slice(&[0; 8]);
    let heic = InputFile::new("IMG_0001.heic", heic_bytes);

    let request = ConversionRequest::new(
        TargetFormat::Pdf,
        vec![png_file("a.png", 20, 20), heic.clone()],
    );
    let output = convert_batch(request, &caps, &config).await.unwrap();

    let entries = zip_entries(output.bytes());
    assert_eq!(
        entries.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>(),
        vec!["combined.pdf", "IMG_0001.heic"]
    );
    // Only the embeddable member made it into the document.
    assert_eq!(pdf_page_count(&entries[0].1), 1);
    // The HEIC member survived untouched instead of being destroyed.
    assert_eq!(entries[1].1, heic.bytes);
}

#[tokio::test]
async fn single_image_to_pdf_uses_the_stem_name() {
    let config = ConvertConfig::default();
    let request = ConversionRequest::new(TargetFormat::Pdf, vec![png_file("portrait.png", 12, 16)]);
    let output = convert_batch(request, &local_caps(), &config).await.unwrap();

    assert_eq!(output.filename(), "portrait.pdf");
    assert_eq!(pdf_page_count(output.bytes()), 1);
}

// ── PDF inputs ───────────────────────────────────────────────────────────

#[tokio::test]
async fn pdf_to_images_produces_one_artifact_per_page() {
    let config = ConvertConfig::default();
    let caps = Capabilities::with_parts(Some(Arc::new(PagedPdfCodec { pages: 3 })), None);
    let request = ConversionRequest::new(
        TargetFormat::Png,
        vec![InputFile::new("report.pdf", b"%PDF-1.4 fake".to_vec())],
    );
    let output = convert_batch(request, &caps, &config).await.unwrap();

    let entries = zip_entries(output.bytes());
    assert_eq!(
        entries.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>(),
        vec!["report-page-1.png", "report-page-2.png", "report-page-3.png"]
    );
}

#[tokio::test]
async fn undeterminable_page_count_falls_back_to_a_single_page() {
    init_tracing();
    let config = ConvertConfig::default();
    let caps = Capabilities::with_parts(Some(Arc::new(CountlessCodec)), None);
    let request = ConversionRequest::new(
        TargetFormat::Png,
        vec![InputFile::new("mystery.pdf", b"%PDF-1.4 fake".to_vec())],
    );
    let output = convert_batch(request, &caps, &config).await.unwrap();

    match output {
        BatchOutput::Single(outcome) => {
            assert!(!outcome.degraded, "the single-page attempt must run");
            assert_eq!(outcome.name, "mystery-page-1.png");
        }
        other => panic!("expected Single page artifact, got {other:?}"),
    }
}

#[tokio::test]
async fn pdf_compression_rebuilds_the_document() {
    let config = ConvertConfig::default();
    let caps = Capabilities::with_parts(Some(Arc::new(PagedPdfCodec { pages: 2 })), None);
    let request = ConversionRequest::new(
        TargetFormat::Pdf,
        vec![InputFile::new("scan.pdf", b"%PDF-1.4 fake".to_vec())],
    )
    .with_compress(true);
    let output = convert_batch(request, &caps, &config).await.unwrap();

    match output {
        BatchOutput::Single(outcome) => {
            assert!(!outcome.degraded);
            assert_eq!(outcome.name, "scan-compressed.pdf");
            assert_eq!(pdf_page_count(&outcome.bytes), 2);
        }
        other => panic!("expected Single rebuilt PDF, got {other:?}"),
    }
}

#[tokio::test]
async fn pdf_compression_degrades_when_rasterization_fails() {
    let config = ConvertConfig::default();
    let caps = Capabilities::with_parts(Some(Arc::new(BrokenRasterCodec)), None);
    let original = b"%PDF-1.4 original bytes".to_vec();
    let request = ConversionRequest::new(
        TargetFormat::Pdf,
        vec![InputFile::new("scan.pdf", original.clone())],
    )
    .with_compress(true);
    let output = convert_batch(request, &caps, &config).await.unwrap();

    match output {
        BatchOutput::Single(outcome) => {
            assert!(outcome.degraded);
            assert_eq!(outcome.bytes, original, "original returned unchanged");
            assert!(outcome.note.unwrap().contains("rasterized"));
        }
        other => panic!("expected Single degraded outcome, got {other:?}"),
    }
}

#[tokio::test]
async fn pdf_to_pdf_without_compress_passes_through() {
    let config = ConvertConfig::default();
    let caps = Capabilities::with_parts(Some(Arc::new(PagedPdfCodec { pages: 5 })), None);
    let original = b"%PDF-1.4 untouched".to_vec();
    let request = ConversionRequest::new(
        TargetFormat::Pdf,
        vec![InputFile::new("doc.pdf", original.clone())],
    );
    let output = convert_batch(request, &caps, &config).await.unwrap();

    match output {
        BatchOutput::Single(outcome) => {
            assert!(!outcome.degraded);
            assert_eq!(outcome.bytes, original);
        }
        other => panic!("expected Single pass-through, got {other:?}"),
    }
}

// ── Mixed batches and naming ─────────────────────────────────────────────

#[tokio::test]
async fn mixed_batch_archives_everything_in_input_order() {
    let config = ConvertConfig::default();
    let caps = Capabilities::with_parts(Some(Arc::new(PagedPdfCodec { pages: 2 })), None);
    let request = ConversionRequest::new(
        TargetFormat::Png,
        vec![
            png_file("photo.png", 10, 10),
            InputFile::new("report.pdf", b"%PDF-1.4 fake".to_vec()),
        ],
    );
    let output = convert_batch(request, &caps, &config).await.unwrap();

    let entries = zip_entries(output.bytes());
    assert_eq!(
        entries.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>(),
        vec!["photo.png", "report-page-1.png", "report-page-2.png"]
    );
}

#[tokio::test]
async fn duplicate_output_names_are_deduped_in_the_archive() {
    let config = ConvertConfig::default();
    let request = ConversionRequest::new(
        TargetFormat::Jpeg,
        vec![png_file("scan.png", 8, 8), png_file("scan.png", 9, 9)],
    );
    let output = convert_batch(request, &local_caps(), &config).await.unwrap();

    let entries = zip_entries(output.bytes());
    assert_eq!(
        entries.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>(),
        vec!["scan.jpg", "scan-2.jpg"]
    );
}
