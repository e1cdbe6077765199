//! Error types for the filemorph library.
//!
//! Three distinct error types reflect three distinct failure scopes:
//!
//! * [`ConvertError`] — **Fatal**: the whole request cannot proceed (no input
//!   files, zero outputs producible). Returned as `Err(ConvertError)` from
//!   [`crate::batch::convert_batch`]. This is the only failure a caller ever
//!   sees as an error.
//!
//! * [`CodecError`] — a local codec operation failed.
//!   [`CodecError::Unsupported`] signals non-fatal unavailability (missing
//!   pdfium, a format the codec cannot decode) and is distinct from
//!   [`CodecError::Failed`], an unexpected error during an operation the
//!   codec claims to support.
//!
//! * [`RemoteError`] — a remote conversion job died. Captured as a per-file
//!   note on the degraded outcome, never propagated to the caller.
//!
//! The separation keeps the recovery scope explicit: single page → single
//! file → whole batch, and only whole-batch-empty escalates.

use thiserror::Error;

/// All fatal errors returned by the filemorph library.
///
/// Per-file failures degrade to original-bytes outcomes with a note and are
/// never represented here.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// The request contained no input files.
    #[error("No files supplied — nothing to convert")]
    NoInputFiles,

    /// Not a single output could be produced across the whole batch.
    #[error("No output could be produced for any file in the batch: {detail}")]
    NoOutputs { detail: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Archive assembly failed.
    #[error("Failed to build output archive: {0}")]
    Archive(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A local codec operation failed.
///
/// `Unsupported` downgrades strategy selection; `Failed` is a genuine error
/// on a supported path. Both degrade the affected file, never the batch.
#[derive(Debug, Clone, Error)]
pub enum CodecError {
    /// The codec cannot perform this operation at all (missing library,
    /// undecodable input format). Not a transient error.
    #[error("Codec unsupported: {0}")]
    Unsupported(String),

    /// The operation is supported but went wrong on this input.
    #[error("Codec failure: {0}")]
    Failed(String),
}

impl From<image::ImageError> for CodecError {
    fn from(e: image::ImageError) -> Self {
        match e {
            image::ImageError::Unsupported(u) => CodecError::Unsupported(u.to_string()),
            other => CodecError::Failed(other.to_string()),
        }
    }
}

/// A remote conversion job failed.
///
/// Every variant is fatal for its job only; the owning file degrades to its
/// original bytes with this error's message as the note.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The job-creation response carried no upload form credentials.
    /// This is a configuration/response error, not a transient one.
    #[error("Remote service returned no upload form for job '{job_id}'")]
    MissingUploadForm { job_id: String },

    /// Streaming the input file to the upload target failed.
    #[error("Upload failed for job '{job_id}': {detail}")]
    UploadFailed { job_id: String, detail: String },

    /// The service reported terminal failure, with its diagnostic payload.
    #[error("Remote job '{job_id}' failed: {detail}")]
    JobFailed { job_id: String, detail: String },

    /// The poll attempt cap was exhausted without a terminal status.
    ///
    /// Deliberately distinct from [`RemoteError::JobFailed`] so callers (and
    /// support logs) can tell a stuck job from a rejected one.
    #[error("Remote job '{job_id}' timed out after {attempts} poll attempts")]
    PollTimedOut { job_id: String, attempts: u32 },

    /// Every downloaded result kept the input's extension — the service
    /// silently did not convert.
    #[error("Remote job '{job_id}' returned files in the original format '{extension}' — conversion did not happen")]
    NothingConverted { job_id: String, extension: String },

    /// The service answered with a non-success HTTP status.
    #[error("Remote service returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    /// A response body could not be decoded as the expected JSON shape.
    #[error("Unexpected remote response: {0}")]
    BadResponse(String),

    /// Network-level failure outside the swallowed polling window.
    #[error("Remote transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Local disk error while staging the upload or download.
    #[error("Remote scratch I/O error: {0}")]
    Io(#[from] std::io::Error),
}
