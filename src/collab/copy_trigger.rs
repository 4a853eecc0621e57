//! Download trigger that copies local files into staging.
//!
//! Each attachment is written under `<name>.partial` and renamed once the
//! copy finishes, the way a browser stages a download.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};

use super::manifest::ManifestRecord;
use crate::engine::{DiscoveredItem, DownloadTrigger};

/// Suffix used while a copy is in flight.
pub const COPY_PARTIAL_SUFFIX: &str = ".partial";

/// Copies manifest attachments into the staging directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyTrigger;

impl DownloadTrigger<ManifestRecord> for CopyTrigger {
    fn trigger(
        &mut self,
        item: &DiscoveredItem<ManifestRecord>,
        staging: &Path,
    ) -> anyhow::Result<usize> {
        fs::create_dir_all(staging)
            .with_context(|| format!("cannot create staging directory {}", staging.display()))?;

        for source in &item.payload.attachments {
            let Some(name) = source.file_name() else {
                bail!("attachment path has no file name: {}", source.display());
            };
            let target = free_name(&staging.join(name));
            let mut partial = target.clone().into_os_string();
            partial.push(COPY_PARTIAL_SUFFIX);
            let partial = PathBuf::from(partial);

            fs::copy(source, &partial)
                .with_context(|| format!("cannot copy {}", source.display()))?;
            fs::rename(&partial, &target)
                .with_context(|| format!("cannot finalize {}", target.display()))?;
            log::debug!("Staged {}", target.display());
        }
        Ok(item.payload.attachments.len())
    }
}

/// `path`, or `stem (n).ext` when a file of that name is already staged.
fn free_name(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (1u32..)
        .map(|n| path.with_file_name(format!("{stem} ({n}){ext}")))
        .find(|p| !p.exists())
        .unwrap_or_else(|| path.to_path_buf())
}
