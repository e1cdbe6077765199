//! Per-file conversion strategy selection.
//!
//! The dual-path dispatch ("try local, on failure try remote") is modelled
//! as an explicit closed enum chosen once per file before any I/O begins, so
//! the control flow is a visible state instead of exception fallthrough.
//! Decisions are not cached across files.

use crate::config::ConvertConfig;
use crate::pipeline::codec::{Codec, ImageCodec};
use crate::pipeline::remote::RemoteClient;
use crate::request::InputFile;
use std::sync::Arc;
use tracing::debug;

/// Which conversion path a file takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionStrategy {
    /// Local codec only; failure degrades to the original bytes.
    LocalOnly,
    /// Remote service only (forced for formats the local codec cannot
    /// decode, or when no local codec exists).
    RemoteOnly,
    /// Local first; any local failure falls back to the remote service.
    LocalWithRemoteFallback,
    /// Neither path exists; the file degrades immediately.
    Unavailable,
}

/// Capability availability, resolved once at process start from
/// [`ConvertConfig`] and passed by reference into the orchestrator.
pub struct Capabilities {
    pub codec: Option<Arc<dyn Codec>>,
    pub remote: Option<Arc<RemoteClient>>,
}

impl Capabilities {
    /// Probe the local codec and construct the remote client from config.
    pub fn resolve(config: &ConvertConfig) -> Self {
        let remote = config
            .remote
            .as_ref()
            .map(|rc| Arc::new(RemoteClient::new(rc.clone(), config)));
        Self {
            codec: Some(Arc::new(ImageCodec::new())),
            remote,
        }
    }

    /// Capabilities with explicit parts, for tests and embedders that bring
    /// their own codec.
    pub fn with_parts(codec: Option<Arc<dyn Codec>>, remote: Option<Arc<RemoteClient>>) -> Self {
        Self { codec, remote }
    }
}

/// Select the strategy for one input file.
pub fn select(file: &InputFile, caps: &Capabilities, config: &ConvertConfig) -> ConversionStrategy {
    let remote_only_source =
        config.is_remote_only_format(&file.name) || config.is_remote_only_format(&file.kind);

    let strategy = match (&caps.codec, &caps.remote) {
        (_, Some(_)) if remote_only_source => ConversionStrategy::RemoteOnly,
        (Some(_), Some(_)) => ConversionStrategy::LocalWithRemoteFallback,
        (Some(_), None) => ConversionStrategy::LocalOnly,
        (None, Some(_)) => ConversionStrategy::RemoteOnly,
        (None, None) => ConversionStrategy::Unavailable,
    };

    debug!("strategy for '{}' ({}): {:?}", file.name, file.kind, strategy);
    strategy
}
