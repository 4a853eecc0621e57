//! CSV record sink.
//!
//! Writes `<run_folder>/<job>.csv` with the columns
//! `key, posted_date, <field names in sorted order>, attachments`.
//! Attachment names are joined with `", "` into one cell.

use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::path::PathBuf;

use anyhow::{anyhow, Context};

use super::manifest::ManifestRecord;
use crate::engine::{DiscoveredItem, RecordSink};
use crate::lifecycle::RunFolder;

/// Appends one CSV row per processed item.
#[derive(Debug)]
pub struct CsvSink {
    artifact: String,
    fields: Vec<String>,
    path: Option<PathBuf>,
    writer: Option<csv::Writer<File>>,
}

impl CsvSink {
    /// Sink for `job_name` with the given field columns.
    #[must_use]
    pub fn new<I, S>(job_name: &str, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: BTreeSet<String> = fields.into_iter().map(Into::into).collect();
        Self {
            artifact: format!("{job_name}.csv"),
            fields: fields.into_iter().collect(),
            path: None,
            writer: None,
        }
    }

    /// Sink whose columns are the union of the items' field names.
    #[must_use]
    pub fn for_items(job_name: &str, items: &[DiscoveredItem<ManifestRecord>]) -> Self {
        Self::new(
            job_name,
            items
                .iter()
                .flat_map(|item| item.payload.fields.keys().cloned()),
        )
    }

    /// The CSV file, once opened.
    #[must_use]
    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    fn header(&self) -> Vec<&str> {
        let mut header = vec!["key", "posted_date"];
        header.extend(self.fields.iter().map(String::as_str));
        header.push("attachments");
        header
    }
}

impl RecordSink<ManifestRecord> for CsvSink {
    fn artifact_name(&self) -> Option<String> {
        Some(self.artifact.clone())
    }

    fn open(&mut self, run: &RunFolder) -> anyhow::Result<()> {
        let path = run.artifact_path(&self.artifact);
        let resume = path.metadata().is_ok_and(|m| m.len() > 0);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("cannot open {}", path.display()))?;

        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        if resume {
            log::info!("Appending to existing {}", path.display());
        } else {
            writer.write_record(self.header())?;
            writer.flush()?;
        }
        self.path = Some(path);
        self.writer = Some(writer);
        Ok(())
    }

    fn append(
        &mut self,
        item: &DiscoveredItem<ManifestRecord>,
        attachments: &[String],
    ) -> anyhow::Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| anyhow!("CSV sink used before open"))?;

        let mut row = Vec::with_capacity(self.fields.len() + 3);
        row.push(item.key.clone());
        row.push(
            item.posted_date
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
        );
        for field in &self.fields {
            row.push(item.payload.fields.get(field).cloned().unwrap_or_default());
        }
        row.push(attachments.join(", "));

        writer.write_record(&row)?;
        writer.flush()?;
        Ok(())
    }

    fn close(&mut self) -> anyhow::Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }
}
