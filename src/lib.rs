//! # filemorph
//!
//! Batch conversion of images and PDFs: raster transcoding, PDF page
//! extraction, image-to-PDF composition, and PDF recompression, with an
//! optional remote conversion service for formats the local codec cannot
//! decode.
//!
//! ## Why this crate?
//!
//! One-format-at-a-time converters push the hard parts onto the caller:
//! what happens when file 7 of 30 is corrupt, when the local decoder has
//! never heard of HEIC, when a 40-page PDF needs to come back as one zip of
//! images. This crate owns those decisions — per-file strategy selection,
//! partial-failure isolation, and output packaging — behind one async entry
//! point.
//!
//! ## Pipeline Overview
//!
//! ```text
//! files
//!  │
//!  ├─ 1. Validate  non-empty batch, per-file size ceiling
//!  ├─ 2. Strategy  local / remote / fallback, chosen per file
//!  ├─ 3. Convert   codec (spawn_blocking) or remote job protocol
//!  ├─ 4. Assemble  rasterised pages → one PDF (embed fallback chain)
//!  └─ 5. Package   single artifact, or zip with name dedupe
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use filemorph::{
//!     convert_batch, Capabilities, ConversionRequest, ConvertConfig, InputFile, TargetFormat,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConvertConfig::builder()
//!         .remote(std::env::var("CONVERT_API_KEY").unwrap_or_default(),
//!                 "https://api.cloudconvert.com/v2")
//!         .build()?;
//!     let caps = Capabilities::resolve(&config);
//!
//!     let files = vec![InputFile::new("photo.png", std::fs::read("photo.png")?)];
//!     let request = ConversionRequest::new(TargetFormat::Jpeg, files).with_quality(85);
//!
//!     let output = convert_batch(request, &caps, &config).await?;
//!     std::fs::write(output.filename(), output.bytes())?;
//!     Ok(())
//! }
//! ```
//!
//! ## Failure model
//!
//! A file that cannot be converted comes back as its original bytes plus an
//! explanatory note ([`ConversionOutcome::degraded`]); the batch as a whole
//! errors only for empty input, an oversized file, or zero producible
//! outputs. Remote jobs are bounded by a poll cap and an upload timeout so a
//! stuck service degrades files instead of hanging requests.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod request;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{convert_batch, BatchOutput};
pub use config::{ConvertConfig, ConvertConfigBuilder, RemoteConfig};
pub use error::{CodecError, ConvertError, RemoteError};
pub use pipeline::codec::{Codec, ImageCodec};
pub use pipeline::package::{ARCHIVE_CONTENT_TYPE, NOTE_HEADER};
pub use pipeline::remote::RemoteClient;
pub use pipeline::strategy::{Capabilities, ConversionStrategy};
pub use request::{
    ConversionOutcome, ConversionRequest, InputFile, TargetFormat, QUALITY_DEFAULT, QUALITY_MAX,
    QUALITY_MIN,
};
