//! Request and outcome data model.
//!
//! [`ConversionRequest`] is what the (out-of-scope) HTTP layer hands to the
//! orchestrator: a target format, bounded knobs, and an ordered list of
//! [`InputFile`]s. The orchestrator owns everything in it for the lifetime
//! of one request; nothing is retained across requests.
//!
//! [`ConversionOutcome`] is the per-file result record. It is always
//! produced — a file whose conversion failed degrades to its original bytes
//! plus an explanatory note instead of erroring the batch.

use serde::{Deserialize, Serialize};

// ── Quality bounds ───────────────────────────────────────────────────────

/// Lowest accepted quality for lossy encodes.
pub const QUALITY_MIN: u8 = 10;
/// Highest accepted quality for lossy encodes.
pub const QUALITY_MAX: u8 = 95;
/// Quality used when the caller supplies nothing (or garbage).
pub const QUALITY_DEFAULT: u8 = 80;

/// Clamp a raw quality value into the accepted range.
pub fn clamp_quality(raw: i64) -> u8 {
    raw.clamp(QUALITY_MIN as i64, QUALITY_MAX as i64) as u8
}

/// Parse a caller-supplied quality string, defaulting on non-numeric input.
pub fn parse_quality(raw: &str) -> u8 {
    match raw.trim().parse::<i64>() {
        Ok(v) => clamp_quality(v),
        Err(_) => QUALITY_DEFAULT,
    }
}

// ── Target formats ───────────────────────────────────────────────────────

/// The closed set of output formats the engine can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetFormat {
    Png,
    Jpeg,
    Webp,
    Gif,
    Bmp,
    Tiff,
    /// Multi-page document output; images combine into one PDF.
    Pdf,
}

impl TargetFormat {
    /// Parse a format name or extension. Returns `None` for anything outside
    /// the closed set.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "webp" => Some(Self::Webp),
            "gif" => Some(Self::Gif),
            "bmp" => Some(Self::Bmp),
            "tif" | "tiff" => Some(Self::Tiff),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    /// Canonical file extension (no dot).
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Webp => "webp",
            Self::Gif => "gif",
            Self::Bmp => "bmp",
            Self::Tiff => "tiff",
            Self::Pdf => "pdf",
        }
    }

    /// MIME type for response headers and archive metadata.
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Webp => "image/webp",
            Self::Gif => "image/gif",
            Self::Bmp => "image/bmp",
            Self::Tiff => "image/tiff",
            Self::Pdf => "application/pdf",
        }
    }

    /// Quality applies only to lossy encodes; it is ignored elsewhere.
    pub fn is_lossy(self) -> bool {
        matches!(self, Self::Jpeg)
    }

    /// Whether the encoded format can carry an alpha channel. Targets
    /// without alpha get transparency flattened onto white.
    pub fn supports_alpha(self) -> bool {
        matches!(self, Self::Png | Self::Webp | Self::Gif | Self::Tiff)
    }

    /// True for the multi-page document format.
    pub fn is_document(self) -> bool {
        matches!(self, Self::Pdf)
    }

    /// Mapping into the image crate's encoder set. `Pdf` has no raster
    /// encoder and returns `None`.
    pub fn image_format(self) -> Option<image::ImageFormat> {
        match self {
            Self::Png => Some(image::ImageFormat::Png),
            Self::Jpeg => Some(image::ImageFormat::Jpeg),
            Self::Webp => Some(image::ImageFormat::WebP),
            Self::Gif => Some(image::ImageFormat::Gif),
            Self::Bmp => Some(image::ImageFormat::Bmp),
            Self::Tiff => Some(image::ImageFormat::Tiff),
            Self::Pdf => None,
        }
    }
}

// ── Input files ──────────────────────────────────────────────────────────

/// One uploaded file: name, sniffed kind, raw bytes.
///
/// Immutable once constructed. The declared kind comes from magic bytes
/// first and the extension second, so a mislabelled upload still routes to
/// the right conversion path.
#[derive(Debug, Clone)]
pub struct InputFile {
    pub name: String,
    /// Declared content kind as a MIME string, e.g. `image/png`.
    pub kind: String,
    pub bytes: Vec<u8>,
}

impl InputFile {
    /// Build an input file, sniffing the content kind from magic bytes with
    /// an extension fallback.
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let name = name.into();
        let kind = sniff_kind(&bytes, &name);
        Self { name, kind, bytes }
    }

    /// Build an input file with a caller-declared kind (e.g. from a
    /// multipart part header), bypassing the sniff.
    pub fn with_kind(name: impl Into<String>, kind: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            bytes,
        }
    }

    /// Lower-cased extension without the dot, or empty.
    pub fn extension(&self) -> String {
        std::path::Path::new(&self.name)
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default()
    }

    /// File name without its extension, used to derive output names.
    pub fn stem(&self) -> String {
        std::path::Path::new(&self.name)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| self.name.clone())
    }

    pub fn is_pdf(&self) -> bool {
        self.kind == "application/pdf"
    }

    pub fn is_image(&self) -> bool {
        self.kind.starts_with("image/")
    }
}

/// Sniff a MIME kind from magic bytes, falling back to the extension.
pub fn sniff_kind(bytes: &[u8], name: &str) -> String {
    if bytes.starts_with(b"%PDF") {
        return "application/pdf".to_string();
    }
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        return "image/png".to_string();
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return "image/jpeg".to_string();
    }
    if bytes.starts_with(b"GIF8") {
        return "image/gif".to_string();
    }
    if bytes.starts_with(b"BM") {
        return "image/bmp".to_string();
    }
    if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return "image/webp".to_string();
    }
    if bytes.starts_with(b"II*\0") || bytes.starts_with(b"MM\0*") {
        return "image/tiff".to_string();
    }
    // ISO BMFF: size + "ftyp" + brand. Covers heic/heif/avif family.
    if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" {
        let brand = String::from_utf8_lossy(&bytes[8..12]).to_ascii_lowercase();
        if brand.starts_with("hei") || brand.starts_with("mif") || brand.starts_with("msf") {
            return "image/heic".to_string();
        }
        if brand.starts_with("avif") || brand.starts_with("avis") {
            return "image/avif".to_string();
        }
    }

    let ext = std::path::Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf".to_string(),
        "png" => "image/png".to_string(),
        "jpg" | "jpeg" => "image/jpeg".to_string(),
        "gif" => "image/gif".to_string(),
        "bmp" => "image/bmp".to_string(),
        "webp" => "image/webp".to_string(),
        "tif" | "tiff" => "image/tiff".to_string(),
        "heic" | "heif" => "image/heic".to_string(),
        "avif" => "image/avif".to_string(),
        _ => "application/octet-stream".to_string(),
    }
}

// ── Requests ─────────────────────────────────────────────────────────────

/// One conversion request: target, knobs, ordered files.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub target: TargetFormat,
    /// Lossy-encode quality, already clamped to [QUALITY_MIN, QUALITY_MAX].
    pub quality: u8,
    /// Requested max dimension; `None` means "use the configured default".
    pub max_dimension: Option<u32>,
    /// Re-encode PDF inputs through the rasterize-and-rebuild path.
    pub compress: bool,
    /// Force an archive even for a single output.
    pub bundle: bool,
    pub files: Vec<InputFile>,
}

impl ConversionRequest {
    pub fn new(target: TargetFormat, files: Vec<InputFile>) -> Self {
        Self {
            target,
            quality: QUALITY_DEFAULT,
            max_dimension: None,
            compress: false,
            bundle: false,
            files,
        }
    }

    /// Set the quality, clamping into the accepted range.
    pub fn with_quality(mut self, raw: i64) -> Self {
        self.quality = clamp_quality(raw);
        self
    }

    /// Set the quality from a raw string; non-numeric input defaults.
    pub fn with_quality_str(mut self, raw: &str) -> Self {
        self.quality = parse_quality(raw);
        self
    }

    pub fn with_max_dimension(mut self, px: u32) -> Self {
        self.max_dimension = Some(px.max(1));
        self
    }

    pub fn with_compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn with_bundle(mut self, bundle: bool) -> Self {
        self.bundle = bundle;
        self
    }

    /// The effective max dimension: the request value bounded by the
    /// process-wide ceiling, or the ceiling itself when unspecified.
    pub fn effective_max_dimension(&self, ceiling: u32) -> u32 {
        match self.max_dimension {
            Some(px) => px.min(ceiling),
            None => ceiling,
        }
    }
}

// ── Outcomes ─────────────────────────────────────────────────────────────

/// The per-file result record: a produced artifact, or the original bytes
/// returned unchanged with a note when conversion failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionOutcome {
    pub name: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub content_type: String,
    /// Remote job identifier, exposed for support diagnosis.
    pub remote_job: Option<String>,
    /// Advisory note: present on degraded outcomes and on cautionary
    /// successes (e.g. placeholder pages inside a rebuilt PDF).
    pub note: Option<String>,
    /// True when the original bytes were returned unchanged.
    pub degraded: bool,
}

impl ConversionOutcome {
    /// A successfully converted artifact.
    pub fn converted(
        name: impl Into<String>,
        bytes: Vec<u8>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            bytes,
            content_type: content_type.into(),
            remote_job: None,
            note: None,
            degraded: false,
        }
    }

    /// A degraded result: the file's original bytes plus an explanation.
    pub fn degraded(file: &InputFile, note: impl Into<String>) -> Self {
        Self {
            name: file.name.clone(),
            bytes: file.bytes.clone(),
            content_type: file.kind.clone(),
            remote_job: None,
            note: Some(note.into()),
            degraded: true,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_remote_job(mut self, job_id: impl Into<String>) -> Self {
        self.remote_job = Some(job_id.into());
        self
    }
}
