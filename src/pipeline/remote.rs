//! Remote conversion client: drives the external service's asynchronous job
//! protocol (create job → upload → poll → download).
//!
//! ## State machine
//!
//! ```text
//! Created ──▶ UploadPending ──▶ Uploaded ──▶ Polling ──▶ Finished
//!                                                │
//!                                                ├──▶ Failed    (service-reported)
//!                                                └──▶ TimedOut  (attempt cap hit)
//! ```
//!
//! ## Retry strategy
//!
//! Polling runs on a fixed interval with a hard attempt cap instead of
//! exponential backoff: the job is already queued server-side, so the only
//! question is "done yet?". A network failure during a poll is swallowed and
//! counted as a no-op attempt — it says nothing about the job itself. The
//! cap (~3 minutes of budget) is deliberately separate from the generous
//! upload timeout; a slow upload of a large file is normal, a job stuck in
//! processing is not.
//!
//! ## Temp files
//!
//! The upload copy lives in a `NamedTempFile` and downloads in a `TempDir`,
//! both owned by the single call that created them. Drop deletes them on
//! every exit path — success, error return, or panic unwinding.

use crate::config::{ConvertConfig, RemoteConfig};
use crate::error::RemoteError;
use crate::request::{InputFile, TargetFormat};
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use std::io::Write;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Remote job status as reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Waiting,
    Processing,
    Finished,
    Failed,
}

impl JobStatus {
    /// Parse the service's status string. Unknown strings are treated as
    /// still-in-flight rather than terminal, so a new intermediate status
    /// on the service side cannot fail jobs spuriously.
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "finished" => Self::Finished,
            "error" | "failed" => Self::Failed,
            "processing" => Self::Processing,
            _ => Self::Waiting,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

/// One downloaded result file.
#[derive(Debug, Clone)]
pub struct RemoteFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// The outcome of one finished remote job.
#[derive(Debug)]
pub struct RemoteResult {
    pub job_id: String,
    pub files: Vec<RemoteFile>,
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct JobEnvelope {
    data: JobData,
}

#[derive(Debug, Deserialize)]
struct JobData {
    id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    tasks: Vec<TaskData>,
}

#[derive(Debug, Deserialize)]
struct TaskData {
    #[serde(default)]
    operation: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    result: Option<TaskResult>,
}

#[derive(Debug, Deserialize)]
struct TaskResult {
    #[serde(default)]
    form: Option<UploadForm>,
    #[serde(default)]
    files: Option<Vec<ResultFileDescriptor>>,
}

/// Upload target credentials returned by the import task.
#[derive(Debug, Clone, Deserialize)]
struct UploadForm {
    url: String,
    #[serde(default)]
    parameters: serde_json::Map<String, serde_json::Value>,
}

/// A result file descriptor (url + filename) from the export task.
#[derive(Debug, Clone, Deserialize)]
struct ResultFileDescriptor {
    filename: String,
    url: String,
}

/// A parsed view of one poll response: status plus whatever terminal data
/// came with it.
#[derive(Debug)]
struct JobSnapshot {
    status: JobStatus,
    /// Service diagnostic, populated from failed task messages.
    message: Option<String>,
    /// Export file descriptors, populated once finished.
    files: Vec<ResultFileDescriptor>,
}

impl JobSnapshot {
    fn from_data(data: &JobData) -> Self {
        let status = data
            .status
            .as_deref()
            .map(JobStatus::parse)
            .unwrap_or(JobStatus::Waiting);

        let message = data
            .tasks
            .iter()
            .filter(|t| t.status.as_deref() == Some("error"))
            .filter_map(|t| t.message.clone())
            .reduce(|a, b| format!("{a}; {b}"));

        let files = data
            .tasks
            .iter()
            .filter(|t| t.operation.as_deref() == Some("export/url"))
            .filter_map(|t| t.result.as_ref())
            .filter_map(|r| r.files.clone())
            .flatten()
            .collect();

        Self {
            status,
            message,
            files,
        }
    }
}

// ── Client ───────────────────────────────────────────────────────────────

/// Client for the remote conversion service's job API.
pub struct RemoteClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    poll_interval: Duration,
    poll_attempts: u32,
    upload_timeout: Duration,
}

impl RemoteClient {
    pub fn new(remote: RemoteConfig, config: &ConvertConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: remote.api_key,
            base_url: remote.base_url.trim_end_matches('/').to_string(),
            poll_interval: config.poll_interval,
            poll_attempts: config.poll_attempts,
            upload_timeout: config.upload_timeout,
        }
    }

    /// Convert one file through the remote service, returning the job id
    /// and all downloaded result files.
    ///
    /// Every error is fatal for this job only; the caller degrades the
    /// owning file and keeps the batch alive.
    pub async fn convert(
        &self,
        file: &InputFile,
        target: TargetFormat,
        quality: u8,
        max_dim: u32,
    ) -> Result<RemoteResult, RemoteError> {
        // ── Created → UploadPending ──────────────────────────────────────
        let (job_id, form) = self.create_job(file, target, quality, max_dim).await?;
        info!("remote job '{}' created for '{}'", job_id, file.name);

        // ── UploadPending → Uploaded ─────────────────────────────────────
        self.upload(&job_id, file, &form).await?;
        debug!("remote job '{}': upload complete", job_id);

        // ── Uploaded → Polling → terminal ────────────────────────────────
        let snapshot = poll_until_terminal(&job_id, self.poll_interval, self.poll_attempts, || {
            self.fetch_job(&job_id)
        })
        .await?;

        // ── Finished → download results ──────────────────────────────────
        let files = self.download_results(&job_id, &snapshot.files).await?;

        let input_ext = normalize_extension(&file.extension());
        if extensions_all_unchanged(files.iter().map(|f| f.filename.as_str()), &input_ext) {
            return Err(RemoteError::NothingConverted {
                job_id,
                extension: input_ext,
            });
        }

        info!("remote job '{}': {} result file(s)", job_id, files.len());
        Ok(RemoteResult { job_id, files })
    }

    /// Submit the job descriptor: import/upload → convert → export/url.
    async fn create_job(
        &self,
        file: &InputFile,
        target: TargetFormat,
        quality: u8,
        max_dim: u32,
    ) -> Result<(String, UploadForm), RemoteError> {
        let body = json!({
            "tasks": {
                "import-file": { "operation": "import/upload" },
                "convert-file": {
                    "operation": "convert",
                    "input": "import-file",
                    "output_format": target.extension(),
                    "filename": format!("{}.{}", file.stem(), target.extension()),
                    "quality": quality,
                    "width": max_dim,
                    "height": max_dim,
                    "fit": "max",
                },
                "export-file": {
                    "operation": "export/url",
                    "input": "convert-file",
                },
            },
        });

        let response = self
            .http
            .post(format!("{}/jobs", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let envelope = decode_envelope(response).await?;
        let job_id = envelope.data.id.clone();

        let form = extract_upload_form(&envelope.data).ok_or(RemoteError::MissingUploadForm {
            job_id: job_id.clone(),
        })?;

        Ok((job_id, form))
    }

    /// Stream the input file to the upload target.
    ///
    /// The bytes are staged to a `NamedTempFile` and streamed from disk so a
    /// large upload never holds a second in-memory copy; the temp file is
    /// deleted when `staged` drops, on every exit path.
    async fn upload(
        &self,
        job_id: &str,
        file: &InputFile,
        form: &UploadForm,
    ) -> Result<(), RemoteError> {
        let mut staged = tempfile::NamedTempFile::new()?;
        staged.write_all(&file.bytes)?;
        staged.flush()?;

        let handle = tokio::fs::File::open(staged.path())
            .await
            .map_err(RemoteError::Io)?;

        let mut multipart = reqwest::multipart::Form::new();
        for (key, value) in &form.parameters {
            let text = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            multipart = multipart.text(key.clone(), text);
        }
        let part = reqwest::multipart::Part::stream_with_length(
            reqwest::Body::from(handle),
            file.bytes.len() as u64,
        )
        .file_name(file.name.clone());
        multipart = multipart.part("file", part);

        let response = self
            .http
            .post(&form.url)
            .timeout(self.upload_timeout)
            .multipart(multipart)
            .send()
            .await
            .map_err(|e| RemoteError::UploadFailed {
                job_id: job_id.to_string(),
                detail: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(RemoteError::UploadFailed {
                job_id: job_id.to_string(),
                detail: format!("HTTP {}", response.status()),
            });
        }
        Ok(())
    }

    /// One status poll. Failures here are transport errors the polling loop
    /// may swallow.
    async fn fetch_job(&self, job_id: &str) -> Result<JobSnapshot, RemoteError> {
        let response = self
            .http
            .get(format!("{}/jobs/{}", self.base_url, job_id))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let envelope = decode_envelope(response).await?;
        Ok(JobSnapshot::from_data(&envelope.data))
    }

    /// Download every result file into a request-scoped temp dir, then read
    /// the bytes back. The dir is deleted when `scratch` drops.
    async fn download_results(
        &self,
        job_id: &str,
        descriptors: &[ResultFileDescriptor],
    ) -> Result<Vec<RemoteFile>, RemoteError> {
        let scratch = tempfile::TempDir::new()?;
        let mut files = Vec::with_capacity(descriptors.len());

        for (index, descriptor) in descriptors.iter().enumerate() {
            let response = self.http.get(&descriptor.url).send().await?;
            if !response.status().is_success() {
                return Err(RemoteError::JobFailed {
                    job_id: job_id.to_string(),
                    detail: format!(
                        "result download '{}' returned HTTP {}",
                        descriptor.filename,
                        response.status()
                    ),
                });
            }
            let bytes = response.bytes().await?;

            // Stage on disk: keeps peak memory at one file and gives the
            // temp pool its single owner.
            let path = scratch.path().join(format!("result-{index}"));
            tokio::fs::write(&path, &bytes).await?;
            let bytes = tokio::fs::read(&path).await?;

            files.push(RemoteFile {
                filename: descriptor.filename.clone(),
                bytes,
            });
        }
        Ok(files)
    }
}

/// Decode a job API response, mapping non-success statuses to [`RemoteError::Api`].
async fn decode_envelope(response: reqwest::Response) -> Result<JobEnvelope, RemoteError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(RemoteError::Api {
            status: status.as_u16(),
            body: truncate(&body, 500),
        });
    }
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| RemoteError::BadResponse(format!("{e}: {}", truncate(&body, 200))))
}

/// Find the upload form on the import task of a freshly created job.
fn extract_upload_form(data: &JobData) -> Option<UploadForm> {
    data.tasks
        .iter()
        .filter(|t| t.operation.as_deref() == Some("import/upload"))
        .filter_map(|t| t.result.as_ref())
        .find_map(|r| r.form.clone())
}

/// The bounded polling loop: fixed interval, hard attempt cap, transport
/// failures swallowed as no-op attempts.
///
/// Generic over the poll function so the loop's semantics (cap exhaustion →
/// timeout, service failure → job error, network blip → keep going) are
/// testable without a server.
async fn poll_until_terminal<F, Fut>(
    job_id: &str,
    interval: Duration,
    attempts: u32,
    mut poll: F,
) -> Result<JobSnapshot, RemoteError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<JobSnapshot, RemoteError>>,
{
    for attempt in 1..=attempts {
        match poll().await {
            Ok(snapshot) => match snapshot.status {
                JobStatus::Finished => {
                    debug!("job '{}' finished after {} poll(s)", job_id, attempt);
                    return Ok(snapshot);
                }
                JobStatus::Failed => {
                    return Err(RemoteError::JobFailed {
                        job_id: job_id.to_string(),
                        detail: snapshot
                            .message
                            .unwrap_or_else(|| "service reported failure without detail".into()),
                    });
                }
                JobStatus::Waiting | JobStatus::Processing => {}
            },
            // A failed poll is a fact about the network, not the job.
            Err(e) => warn!("job '{}': poll attempt {} failed: {}", job_id, attempt, e),
        }
        // Sleep between attempts only; the timeout return should not wait
        // out one more dead interval.
        if attempt < attempts {
            sleep(interval).await;
        }
    }

    Err(RemoteError::PollTimedOut {
        job_id: job_id.to_string(),
        attempts,
    })
}

/// Canonicalize extension aliases so the sanity check cannot be fooled by
/// `jpg` vs `jpeg` spelling differences.
fn normalize_extension(ext: &str) -> String {
    match ext.to_ascii_lowercase().as_str() {
        "jpeg" => "jpg".to_string(),
        "tif" => "tiff".to_string(),
        other => other.to_string(),
    }
}

/// True when every downloaded filename kept the input's extension — the
/// signature of a service that silently did not convert.
fn extensions_all_unchanged<'a>(
    filenames: impl Iterator<Item = &'a str>,
    input_ext: &str,
) -> bool {
    let mut any = false;
    for name in filenames {
        any = true;
        let ext = std::path::Path::new(name)
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if normalize_extension(&ext) != input_ext {
            return false;
        }
    }
    any
}

fn truncate(s: &str, limit: usize) -> String {
    if s.len() <= limit {
        s.to_string()
    } else {
        let mut end = limit;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}
