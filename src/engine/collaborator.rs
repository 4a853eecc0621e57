//! Seams to the site-specific code.
//!
//! Portal crawlers implement these traits; the engine drives them. Both
//! return `anyhow::Result` because their failures come from code the engine
//! knows nothing about. A failed call fails the current item only.

use std::path::Path;

use super::item::DiscoveredItem;
use crate::lifecycle::RunFolder;

/// Starts the downloads of an item.
pub trait DownloadTrigger<P> {
    /// Start downloading `item`'s attachments into `staging`.
    ///
    /// Returns how many files the engine should wait for. The call may
    /// return before the files are complete; the engine watches `staging`.
    ///
    /// # Errors
    ///
    /// Any error fails the item; it is not recorded in the cache and will be
    /// retried on the next run.
    fn trigger(&mut self, item: &DiscoveredItem<P>, staging: &Path) -> anyhow::Result<usize>;
}

/// Receives one record per processed item.
pub trait RecordSink<P> {
    /// File name of the artifact the sink writes into the run folder.
    ///
    /// The relocator protects this name so it is never moved as a download.
    fn artifact_name(&self) -> Option<String> {
        None
    }

    /// Called once after the run folder exists.
    ///
    /// # Errors
    ///
    /// An error here is fatal for the run.
    fn open(&mut self, _run: &RunFolder) -> anyhow::Result<()> {
        Ok(())
    }

    /// Append `item` with the names of its relocated attachments.
    ///
    /// # Errors
    ///
    /// An error fails the item.
    fn append(&mut self, item: &DiscoveredItem<P>, attachments: &[String]) -> anyhow::Result<()>;

    /// Called once before the run folder is completed.
    ///
    /// # Errors
    ///
    /// Errors are logged; the run still completes.
    fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Trigger for items without attachments.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDownloads;

impl<P> DownloadTrigger<P> for NoDownloads {
    fn trigger(&mut self, _item: &DiscoveredItem<P>, _staging: &Path) -> anyhow::Result<usize> {
        Ok(0)
    }
}

/// Sink that keeps records in memory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemorySink {
    /// `(key, attachments)` in append order.
    pub records: Vec<(String, Vec<String>)>,
}

impl<P> RecordSink<P> for MemorySink {
    fn append(&mut self, item: &DiscoveredItem<P>, attachments: &[String]) -> anyhow::Result<()> {
        self.records.push((item.key.clone(), attachments.to_vec()));
        Ok(())
    }
}
