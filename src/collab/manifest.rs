//! JSON Lines manifest discovery.
//!
//! Each non-blank line not starting with `#` describes one item:
//!
//! ```text
//! {"key": "https://portal/bid/17", "posted_date": "01/10/2024", "folder": "BID-17",
//!  "fields": {"title": "Road salt"}, "attachments": ["files/spec.pdf"]}
//! ```
//!
//! Relative attachment paths are resolved against the manifest's directory.
//! Malformed lines are logged and skipped.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::cache::parse_date;
use crate::engine::DiscoveredItem;

/// Error type for manifest reading.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The manifest could not be opened or read.
    #[error("cannot read manifest {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Payload of a manifest item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ManifestRecord {
    pub key: String,
    #[serde(default)]
    pub posted_date: Option<String>,
    #[serde(default)]
    pub folder: Option<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    #[serde(default)]
    pub attachments: Vec<PathBuf>,
}

/// Read every item of the manifest at `path`.
///
/// # Errors
///
/// Returns [`ManifestError::Read`] if the file cannot be opened or a line
/// cannot be read.
pub fn read_manifest(path: &Path) -> Result<Vec<DiscoveredItem<ManifestRecord>>, ManifestError> {
    let read_err = |source| ManifestError::Read {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(read_err)?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    parse_lines(BufReader::new(file), base).map_err(read_err)
}

/// Parse manifest lines from any reader.
///
/// # Errors
///
/// Returns the I/O error of the underlying reader.
pub fn parse_lines<R: BufRead>(
    reader: R,
    base: &Path,
) -> io::Result<Vec<DiscoveredItem<ManifestRecord>>> {
    let mut items = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let mut record: ManifestRecord = match serde_json::from_str(trimmed) {
            Ok(record) => record,
            Err(e) => {
                log::warn!("Skipping manifest line {}: {}", number + 1, e);
                continue;
            }
        };
        if record.key.trim().is_empty() {
            log::warn!("Skipping manifest line {}: empty key", number + 1);
            continue;
        }

        let posted = record.posted_date.as_deref().and_then(|raw| {
            let parsed = parse_date(raw);
            if parsed.is_none() {
                log::debug!("Unparseable posted date {:?} for {}", raw, record.key);
            }
            parsed
        });
        for attachment in &mut record.attachments {
            if attachment.is_relative() {
                *attachment = base.join(&*attachment);
            }
        }

        let folder = record.folder.clone();
        let mut item = DiscoveredItem::new(record.key.clone(), posted, record);
        if let Some(folder) = folder {
            item = item.with_folder_name(folder);
        }
        items.push(item);
    }
    log::debug!("Manifest yielded {} item(s)", items.len());
    Ok(items)
}
