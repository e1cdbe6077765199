//! Process-wide configuration, resolved once at startup.
//!
//! All orchestration behaviour is controlled through [`ConvertConfig`], built
//! via its [`ConvertConfigBuilder`]. Keeping every knob in one immutable
//! struct makes it trivial to share across tasks and to diff two deployments
//! to understand why their behaviour differs.
//!
//! Capability availability (local codec, remote client) is **not** mutable
//! global state: it is resolved once from this config into
//! [`crate::pipeline::strategy::Capabilities`] and passed by reference into
//! the orchestrator.

use crate::error::ConvertError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default ceiling for a single uploaded file, in bytes (50 MiB).
pub const DEFAULT_MAX_FILE_BYTES: usize = 50 * 1024 * 1024;

/// Default ceiling for the larger image dimension, in pixels.
///
/// 4096 px comfortably covers print-resolution scans while bounding the
/// worst-case decode allocation; requests may ask for less but never more
/// unless the deployment raises this.
pub const DEFAULT_MAX_DIMENSION: u32 = 4096;

/// Fixed interval between remote job status polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Maximum number of status polls per remote job (~3 minutes of budget).
pub const POLL_ATTEMPTS: u32 = 90;

/// Timeout for streaming one input file to the remote upload target.
pub const UPLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Credentials and endpoint for the remote conversion service.
///
/// Absence of this whole struct (no credential configured) makes the remote
/// path permanently unavailable — a capability fact, not a per-request error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Bearer credential for the job API.
    pub api_key: String,
    /// Base URL of the job API, e.g. `https://api.cloudconvert.com/v2`.
    pub base_url: String,
}

/// Configuration for the conversion engine.
///
/// Built via [`ConvertConfig::builder()`] or [`ConvertConfig::default()`].
///
/// # Example
/// ```rust
/// use filemorph::ConvertConfig;
///
/// let config = ConvertConfig::builder()
///     .max_file_bytes(10 * 1024 * 1024)
///     .default_max_dimension(2048)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertConfig {
    /// Per-file upload size ceiling in bytes. Default: 50 MiB.
    pub max_file_bytes: usize,

    /// Default for the per-request max dimension when the request leaves it
    /// unspecified; also the hard ceiling a request cannot exceed.
    pub default_max_dimension: u32,

    /// Remote service credentials. `None` disables the remote path entirely.
    pub remote: Option<RemoteConfig>,

    /// Interval between remote job status polls. Default: 2 s.
    pub poll_interval: Duration,

    /// Poll attempt cap per remote job. Default: 90 (~3 min with the 2 s
    /// interval). Network failures during polling count against this cap
    /// rather than failing the job.
    pub poll_attempts: u32,

    /// Timeout for the upload call of a remote job. Default: 120 s.
    ///
    /// Deliberately generous and separate from the polling budget — a slow
    /// upload of a large file is normal, a job stuck in processing is not.
    pub upload_timeout: Duration,

    /// Formats the local codec declares unsupported, matched against the
    /// file extension and the sniffed kind. Files in these formats are
    /// forced onto the remote path when one is configured.
    ///
    /// Configuration data, not hardcoded logic: deployments bundling a
    /// richer codec can empty this list.
    pub remote_only_formats: Vec<String>,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            default_max_dimension: DEFAULT_MAX_DIMENSION,
            remote: None,
            poll_interval: POLL_INTERVAL,
            poll_attempts: POLL_ATTEMPTS,
            upload_timeout: UPLOAD_TIMEOUT,
            remote_only_formats: vec!["heic".to_string(), "heif".to_string()],
        }
    }
}

impl ConvertConfig {
    /// Create a new builder for `ConvertConfig`.
    pub fn builder() -> ConvertConfigBuilder {
        ConvertConfigBuilder {
            config: Self::default(),
        }
    }

    /// True when the named format can only be handled remotely.
    pub fn is_remote_only_format(&self, candidate: &str) -> bool {
        let lower = candidate.to_ascii_lowercase();
        self.remote_only_formats.iter().any(|f| lower.contains(f.as_str()))
    }
}

/// Builder for [`ConvertConfig`].
#[derive(Debug)]
pub struct ConvertConfigBuilder {
    config: ConvertConfig,
}

impl ConvertConfigBuilder {
    pub fn max_file_bytes(mut self, bytes: usize) -> Self {
        self.config.max_file_bytes = bytes.max(1);
        self
    }

    pub fn default_max_dimension(mut self, px: u32) -> Self {
        self.config.default_max_dimension = px.max(16);
        self
    }

    /// Configure the remote conversion service. An empty key is treated as
    /// unconfigured rather than failing validation, so deployments can pass
    /// an optional environment variable straight through.
    pub fn remote(mut self, api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        let api_key = api_key.into();
        if api_key.is_empty() {
            self.config.remote = None;
        } else {
            self.config.remote = Some(RemoteConfig {
                api_key,
                base_url: base_url.into(),
            });
        }
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn poll_attempts(mut self, attempts: u32) -> Self {
        self.config.poll_attempts = attempts.max(1);
        self
    }

    pub fn upload_timeout(mut self, timeout: Duration) -> Self {
        self.config.upload_timeout = timeout;
        self
    }

    pub fn remote_only_formats(mut self, formats: Vec<String>) -> Self {
        self.config.remote_only_formats =
            formats.into_iter().map(|f| f.to_ascii_lowercase()).collect();
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConvertConfig, ConvertError> {
        let c = &self.config;
        if c.default_max_dimension == 0 {
            return Err(ConvertError::InvalidConfig(
                "default_max_dimension must be positive".into(),
            ));
        }
        if let Some(ref remote) = c.remote {
            if remote.base_url.is_empty() {
                return Err(ConvertError::InvalidConfig(
                    "remote base_url must not be empty".into(),
                ));
            }
        }
        Ok(self.config)
    }
}
