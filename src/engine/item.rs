//! Items flowing from discovery into the engine.

use chrono::NaiveDate;

/// One item reported by a discovery source.
///
/// `P` is whatever the download trigger and sink need to act on the item
/// (a page handle, a manifest row, ...). The engine never looks inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredItem<P> {
    /// Stable dedup key, usually the detail-page URL.
    pub key: String,
    /// Posting date; `None` when the portal did not show a parseable one.
    pub posted_date: Option<NaiveDate>,
    /// Business identifier used to name the item folder.
    pub folder_name: Option<String>,
    /// Collaborator-specific data.
    pub payload: P,
}

impl<P> DiscoveredItem<P> {
    #[must_use]
    pub fn new(key: impl Into<String>, posted_date: Option<NaiveDate>, payload: P) -> Self {
        Self {
            key: key.into(),
            posted_date,
            folder_name: None,
            payload,
        }
    }

    /// Set the business identifier used for the item folder.
    #[must_use]
    pub fn with_folder_name(mut self, name: impl Into<String>) -> Self {
        self.folder_name = Some(name.into());
        self
    }

    /// Folder name to use: the business identifier, else the key.
    #[must_use]
    pub fn folder_label(&self) -> &str {
        self.folder_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.key)
    }
}
