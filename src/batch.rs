//! Batch orchestration: validate, pick a strategy per file, convert with
//! bounded concurrency, package.
//!
//! The one rule everything here serves: a single bad file never fails the
//! batch. Per-file failures — codec errors, dead remote jobs, oversized
//! uploads — become degraded outcomes (original bytes plus a note) and the
//! batch keeps going; only an empty batch or zero producible outputs
//! surface as errors.

use crate::config::ConvertConfig;
use crate::error::{CodecError, ConvertError, RemoteError};
use crate::pipeline::assemble;
use crate::pipeline::codec::Codec;
use crate::pipeline::package;
use crate::pipeline::remote::{RemoteClient, RemoteResult};
use crate::pipeline::strategy::{self, Capabilities, ConversionStrategy};
use crate::request::{ConversionOutcome, ConversionRequest, InputFile, TargetFormat};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Files converted in parallel per batch. Local work is CPU-bound in
/// `spawn_blocking`; remote work is poll-dominated. Four keeps both busy
/// without starving other requests.
const CONCURRENT_FILES: usize = 4;

/// Archive name used when the batch packages into a zip.
const ARCHIVE_NAME: &str = "converted.zip";

/// The batch result: one artifact, or a zip of several.
#[derive(Debug)]
pub enum BatchOutput {
    Single(ConversionOutcome),
    Archive { name: String, bytes: Vec<u8> },
}

impl BatchOutput {
    pub fn filename(&self) -> &str {
        match self {
            Self::Single(o) => &o.name,
            Self::Archive { name, .. } => name,
        }
    }

    pub fn content_type(&self) -> &str {
        match self {
            Self::Single(o) => &o.content_type,
            Self::Archive { .. } => package::ARCHIVE_CONTENT_TYPE,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::Single(o) => &o.bytes,
            Self::Archive { bytes, .. } => bytes,
        }
    }

    /// Advisory note for single outputs; archives carry notes per entry.
    pub fn note(&self) -> Option<&str> {
        match self {
            Self::Single(o) => o.note.as_deref(),
            Self::Archive { .. } => None,
        }
    }
}

/// Convert a batch of files.
///
/// Strategy is selected per file from the resolved [`Capabilities`]; files
/// run concurrently and results come back in input order. A batch of images
/// with a PDF target combines into one document; everything else converts
/// per file.
#[instrument(skip_all, fields(files = request.files.len(), target = ?request.target))]
pub async fn convert_batch(
    request: ConversionRequest,
    caps: &Capabilities,
    config: &ConvertConfig,
) -> Result<BatchOutput, ConvertError> {
    if request.files.is_empty() {
        return Err(ConvertError::NoInputFiles);
    }

    let max_dim = request.effective_max_dimension(config.default_max_dimension);
    let quality = request.quality;
    let target = request.target;

    // All-image batch with a document target combines into one PDF instead
    // of one document per file.
    if target.is_document() && request.files.iter().all(|f| f.is_image()) {
        let outcomes = combine_images(&request, caps, config, quality, max_dim).await?;
        return package_outcomes(outcomes, request.bundle);
    }

    let bundle = request.bundle;
    let compress = request.compress;
    let max_bytes = config.max_file_bytes;

    let mut indexed: Vec<(usize, Vec<ConversionOutcome>)> =
        stream::iter(request.files.into_iter().enumerate())
            .map(|(index, file)| {
                let codec = caps.codec.clone();
                let remote = caps.remote.clone();
                let chosen = strategy::select(&file, caps, config);
                async move {
                    if let Some(outcome) = reject_oversized(&file, max_bytes) {
                        return (index, vec![outcome]);
                    }
                    let outcomes =
                        process_file(file, chosen, codec, remote, target, quality, max_dim, compress)
                            .await;
                    (index, outcomes)
                }
            })
            .buffer_unordered(CONCURRENT_FILES)
            .collect()
            .await;
    indexed.sort_by_key(|(index, _)| *index);

    let outcomes: Vec<ConversionOutcome> =
        indexed.into_iter().flat_map(|(_, o)| o).collect();

    let produced = outcomes.iter().filter(|o| !o.degraded).count();
    info!(
        "batch finished: {} outcome(s), {} converted, {} degraded",
        outcomes.len(),
        produced,
        outcomes.len() - produced
    );

    package_outcomes(outcomes, bundle)
}

/// A file over the size ceiling degrades with a note; its siblings still
/// convert.
fn reject_oversized(file: &InputFile, max_bytes: usize) -> Option<ConversionOutcome> {
    if file.bytes.len() <= max_bytes {
        return None;
    }
    info!(
        "'{}' is {} bytes, over the {} byte ceiling; not converted",
        file.name,
        file.bytes.len(),
        max_bytes
    );
    Some(ConversionOutcome::degraded(
        file,
        format!(
            "file is {} bytes, over the {} byte ceiling; not converted",
            file.bytes.len(),
            max_bytes
        ),
    ))
}

/// One file through its chosen strategy. Always yields at least one outcome.
#[allow(clippy::too_many_arguments)]
async fn process_file(
    file: InputFile,
    chosen: ConversionStrategy,
    codec: Option<Arc<dyn Codec>>,
    remote: Option<Arc<RemoteClient>>,
    target: TargetFormat,
    quality: u8,
    max_dim: u32,
    compress: bool,
) -> Vec<ConversionOutcome> {
    let file = Arc::new(file);
    match chosen {
        ConversionStrategy::Unavailable => {
            vec![ConversionOutcome::degraded(
                &file,
                "no conversion path is available for this file",
            )]
        }
        ConversionStrategy::LocalOnly => {
            match run_local(codec, Arc::clone(&file), target, quality, max_dim, compress).await {
                Ok(outcomes) => outcomes,
                Err(e) => {
                    info!("conversion of '{}' degraded: {}", file.name, e);
                    vec![ConversionOutcome::degraded(
                        &file,
                        format!("conversion failed: {e}"),
                    )]
                }
            }
        }
        ConversionStrategy::RemoteOnly => match run_remote(remote, &file, target, quality, max_dim)
            .await
        {
            Ok(outcomes) => outcomes,
            Err(e) => {
                info!("remote conversion of '{}' degraded: {}", file.name, e);
                vec![ConversionOutcome::degraded(
                    &file,
                    format!("remote conversion failed: {e}"),
                )]
            }
        },
        ConversionStrategy::LocalWithRemoteFallback => {
            match run_local(
                codec,
                Arc::clone(&file),
                target,
                quality,
                max_dim,
                compress,
            )
            .await
            {
                Ok(outcomes) => outcomes,
                Err(local_err) => {
                    warn!(
                        "local conversion of '{}' failed ({}), falling back to remote",
                        file.name, local_err
                    );
                    match run_remote(remote, &file, target, quality, max_dim).await {
                        Ok(outcomes) => outcomes,
                        Err(remote_err) => {
                            info!("both paths failed for '{}'", file.name);
                            vec![ConversionOutcome::degraded(
                                &file,
                                format!("local: {local_err}; remote: {remote_err}"),
                            )]
                        }
                    }
                }
            }
        }
    }
}

/// Local conversion on the blocking pool. The codec is synchronous and
/// CPU-bound; pdfium additionally must not run on the async threads.
async fn run_local(
    codec: Option<Arc<dyn Codec>>,
    file: Arc<InputFile>,
    target: TargetFormat,
    quality: u8,
    max_dim: u32,
    compress: bool,
) -> Result<Vec<ConversionOutcome>, CodecError> {
    let codec = codec.ok_or_else(|| CodecError::Unsupported("no local codec".into()))?;
    let handle = tokio::task::spawn_blocking(move || {
        local_outcomes(codec.as_ref(), &file, target, quality, max_dim, compress)
    });
    match handle.await {
        Ok(result) => result,
        Err(e) => Err(CodecError::Failed(format!("conversion task failed: {e}"))),
    }
}

/// Synchronous per-file conversion: dispatch on input kind and target.
fn local_outcomes(
    codec: &dyn Codec,
    file: &InputFile,
    target: TargetFormat,
    quality: u8,
    max_dim: u32,
    compress: bool,
) -> Result<Vec<ConversionOutcome>, CodecError> {
    if file.is_pdf() {
        if target.is_document() {
            if compress {
                return Ok(vec![assemble::compress_document(codec, file, quality, max_dim)]);
            }
            // PDF to PDF without compression is a pass-through.
            return Ok(vec![ConversionOutcome::converted(
                file.name.clone(),
                file.bytes.clone(),
                TargetFormat::Pdf.content_type(),
            )]);
        }
        return pdf_to_pages(codec, file, target, quality, max_dim);
    }

    if target.is_document() {
        // Single image into a one-page document. An image the embed chain
        // cannot place is a failure here, so the fallback path gets its turn
        // instead of shipping a placeholder-only document.
        let assembly = assemble::images_to_pdf(
            Some(codec),
            std::slice::from_ref(&file.bytes),
            quality,
            max_dim,
        )
        .map_err(|e| CodecError::Failed(e.to_string()))?;
        if !assembly.placeholder_pages.is_empty() {
            return Err(CodecError::Unsupported(
                "image could not be embedded into a document".into(),
            ));
        }
        return Ok(vec![ConversionOutcome::converted(
            format!("{}.pdf", file.stem()),
            assembly.bytes,
            TargetFormat::Pdf.content_type(),
        )]);
    }

    let bytes = codec.convert(&file.bytes, target, quality, max_dim)?;
    Ok(vec![ConversionOutcome::converted(
        format!("{}.{}", file.stem(), target.extension()),
        bytes,
        target.content_type(),
    )])
}

/// Rasterize every page of a PDF into one artifact per page, named
/// `{stem}-page-{n}.{ext}`.
fn pdf_to_pages(
    codec: &dyn Codec,
    file: &InputFile,
    target: TargetFormat,
    quality: u8,
    max_dim: u32,
) -> Result<Vec<ConversionOutcome>, CodecError> {
    // An undeterminable page count falls back to a single-page attempt, the
    // same way the compression path does.
    let pages = match codec.page_count(&file.bytes) {
        Ok(0) => return Err(CodecError::Failed("document has no pages".into())),
        Ok(n) => n,
        Err(e) => {
            debug!(
                "page count unavailable for '{}' ({}), trying single-page rasterization",
                file.name, e
            );
            1
        }
    };
    let mut outcomes = Vec::with_capacity(pages);
    for index in 0..pages {
        let png = codec.rasterize(&file.bytes, index, max_dim)?;
        let bytes = if target == TargetFormat::Png {
            png
        } else {
            codec.convert(&png, target, quality, max_dim)?
        };
        outcomes.push(ConversionOutcome::converted(
            format!("{}-page-{}.{}", file.stem(), index + 1, target.extension()),
            bytes,
            target.content_type(),
        ));
    }
    Ok(outcomes)
}

/// Remote conversion: the full job protocol, one outcome per result file,
/// each carrying the job identifier for support diagnosis.
async fn run_remote(
    remote: Option<Arc<RemoteClient>>,
    file: &InputFile,
    target: TargetFormat,
    quality: u8,
    max_dim: u32,
) -> Result<Vec<ConversionOutcome>, RemoteError> {
    let client = remote
        .ok_or_else(|| RemoteError::BadResponse("no remote client configured".into()))?;
    let RemoteResult { job_id, files } = client.convert(file, target, quality, max_dim).await?;
    Ok(files
        .into_iter()
        .map(|rf| {
            ConversionOutcome::converted(rf.filename, rf.bytes, target.content_type())
                .with_remote_job(job_id.clone())
        })
        .collect())
}

/// Combine an all-image batch into one PDF, preserving input order.
///
/// Each member still goes through strategy selection: a remote-only format
/// converts remotely to an embeddable raster before assembly, and a member
/// with no conversion path degrades on its own instead of turning into a
/// placeholder page inside a "successful" document.
async fn combine_images(
    request: &ConversionRequest,
    caps: &Capabilities,
    config: &ConvertConfig,
    quality: u8,
    max_dim: u32,
) -> Result<Vec<ConversionOutcome>, ConvertError> {
    let mut images: Vec<Vec<u8>> = Vec::with_capacity(request.files.len());
    let mut left_out: Vec<ConversionOutcome> = Vec::new();

    for file in &request.files {
        if let Some(outcome) = reject_oversized(file, config.max_file_bytes) {
            left_out.push(outcome);
            continue;
        }
        match strategy::select(file, caps, config) {
            ConversionStrategy::RemoteOnly => {
                match run_remote(caps.remote.clone(), file, TargetFormat::Png, quality, max_dim)
                    .await
                {
                    Ok(outcomes) => match outcomes.into_iter().next() {
                        Some(converted) => images.push(converted.bytes),
                        None => left_out.push(ConversionOutcome::degraded(
                            file,
                            "remote conversion returned no files",
                        )),
                    },
                    Err(e) => {
                        info!("'{}' left out of the combined document: {}", file.name, e);
                        left_out.push(ConversionOutcome::degraded(
                            file,
                            format!("remote conversion failed: {e}"),
                        ));
                    }
                }
            }
            ConversionStrategy::Unavailable => {
                left_out.push(ConversionOutcome::degraded(
                    file,
                    "no conversion path is available for this file",
                ));
            }
            _ => images.push(file.bytes.clone()),
        }
    }

    if images.is_empty() {
        return Ok(left_out);
    }

    let name = match request.files.as_slice() {
        [single] => format!("{}.pdf", single.stem()),
        _ => "combined.pdf".to_string(),
    };
    let codec = caps.codec.clone();
    let handle = tokio::task::spawn_blocking(move || {
        assemble::images_to_pdf(codec.as_deref(), &images, quality, max_dim)
    });
    let assembly = match handle.await {
        Ok(result) => result?,
        Err(e) => return Err(ConvertError::Internal(format!("assembly task failed: {e}"))),
    };

    let note = assembly.note();
    let mut outcome = ConversionOutcome::converted(
        name,
        assembly.bytes,
        TargetFormat::Pdf.content_type(),
    );
    if let Some(note) = note {
        outcome = outcome.with_note(note);
    }

    let mut outcomes = vec![outcome];
    outcomes.extend(left_out);
    Ok(outcomes)
}

/// Package outcomes: a zip when bundling is forced or more than one artifact
/// exists, the lone outcome otherwise.
fn package_outcomes(
    mut outcomes: Vec<ConversionOutcome>,
    bundle: bool,
) -> Result<BatchOutput, ConvertError> {
    if outcomes.is_empty() {
        return Err(ConvertError::NoOutputs {
            detail: "every file produced zero artifacts".into(),
        });
    }
    if bundle || outcomes.len() > 1 {
        let bytes = package::archive(&outcomes)?;
        return Ok(BatchOutput::Archive {
            name: ARCHIVE_NAME.to_string(),
            bytes,
        });
    }
    match outcomes.pop() {
        Some(outcome) => Ok(BatchOutput::Single(outcome)),
        None => Err(ConvertError::NoOutputs {
            detail: "every file produced zero artifacts".into(),
        }),
    }
}
