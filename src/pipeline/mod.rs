//! Pipeline stages for batch file conversion.
//!
//! Each submodule implements exactly one concern. Keeping stages separate
//! makes each independently testable and lets us swap implementations
//! (e.g. a different codec backend) without touching other stages.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ strategy ──▶ codec / remote ──▶ assemble ──▶ package
//! (files)   (per-file)   (local)  (API)     (PDF build)  (zip)
//! ```
//!
//! 1. [`strategy`] — pick the conversion path per file from resolved
//!    capabilities; a closed enum, not exception fallthrough
//! 2. [`codec`]    — decode, bound, flatten and re-encode raster images;
//!    rasterise PDF pages via pdfium in `spawn_blocking`
//! 3. [`remote`]   — drive the remote job protocol (create, upload, poll,
//!    download); the only stage with network I/O
//! 4. [`assemble`] — compose rasterised pages or images into one PDF with
//!    an ordered embed fallback chain
//! 5. [`package`]  — bundle multiple outcomes into a zip archive with
//!    deterministic name dedupe

pub mod assemble;
pub mod codec;
pub mod package;
pub mod remote;
pub mod strategy;
