//! Output packaging: bundle multiple conversion outcomes into one zip
//! archive, or pass a single outcome through untouched.
//!
//! Name collisions inside the archive are resolved deterministically by
//! suffixing a counter before the extension (`scan.png`, `scan-2.png`,
//! `scan-3.png`), so two inputs named alike never clobber each other.

use crate::error::ConvertError;
use crate::request::ConversionOutcome;
use std::collections::HashMap;
use std::io::{Cursor, Write};
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Content type of a packaged archive.
pub const ARCHIVE_CONTENT_TYPE: &str = "application/zip";

/// Response header name a serving layer should use for the advisory note of
/// a single degraded or cautionary outcome.
pub const NOTE_HEADER: &str = "X-Conversion-Note";

/// Build a zip archive holding every outcome's bytes.
pub fn archive(outcomes: &[ConversionOutcome]) -> Result<Vec<u8>, ConvertError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut seen: HashMap<String, u32> = HashMap::new();
    for outcome in outcomes {
        let entry_name = dedupe_name(&mut seen, &outcome.name);
        writer
            .start_file(&entry_name, options)
            .map_err(|e| ConvertError::Archive(format!("entry '{entry_name}': {e}")))?;
        writer
            .write_all(&outcome.bytes)
            .map_err(|e| ConvertError::Archive(format!("entry '{entry_name}': {e}")))?;
    }

    let cursor = writer
        .finish()
        .map_err(|e| ConvertError::Archive(e.to_string()))?;
    let bytes = cursor.into_inner();
    debug!("archived {} entries, {} bytes", outcomes.len(), bytes.len());
    Ok(bytes)
}

/// First occurrence keeps its name; repeats get `-2`, `-3`, ... before the
/// extension. The suffix keeps incrementing past names that already exist
/// as entries in their own right, and generated names are recorded so a
/// later literal occurrence cannot claim them either.
fn dedupe_name(seen: &mut HashMap<String, u32>, name: &str) -> String {
    let count = {
        let entry = seen.entry(name.to_string()).or_insert(0);
        *entry += 1;
        *entry
    };
    if count == 1 {
        return name.to_string();
    }
    let mut suffix = count;
    loop {
        let candidate = match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => format!("{stem}-{suffix}.{ext}"),
            _ => format!("{name}-{suffix}"),
        };
        if !seen.contains_key(&candidate) {
            seen.insert(candidate.clone(), 1);
            return candidate;
        }
        suffix += 1;
    }
}
