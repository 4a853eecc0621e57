//! Partial-download naming conventions.

/// Suffixes browsers and download managers use for files still being written.
pub const DEFAULT_PARTIAL_SUFFIXES: &[&str] =
    &[".crdownload", ".tmp", ".part", ".partial", ".download"];

/// Set of reserved suffixes that mark a file as still in flight.
///
/// Matching is case-insensitive (`REPORT.PDF.PART` is in flight).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialMarkers {
    suffixes: Vec<String>,
}

impl Default for PartialMarkers {
    fn default() -> Self {
        Self::new(DEFAULT_PARTIAL_SUFFIXES.iter().copied())
    }
}

impl PartialMarkers {
    /// Build a marker set; a leading dot is added where missing.
    #[must_use]
    pub fn new<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let suffixes = suffixes
            .into_iter()
            .map(|s| {
                let s = s.as_ref().trim().to_lowercase();
                if s.starts_with('.') {
                    s
                } else {
                    format!(".{s}")
                }
            })
            .filter(|s| s.len() > 1)
            .collect();
        Self { suffixes }
    }

    /// Whether `name` is an in-flight download.
    ///
    /// # Example
    ///
    /// ```
    /// use bidstage::download::PartialMarkers;
    ///
    /// let markers = PartialMarkers::default();
    /// assert!(markers.is_partial("report.pdf.crdownload"));
    /// assert!(markers.is_partial("report.pdf.partial"));
    /// assert!(!markers.is_partial("report.pdf"));
    /// ```
    #[must_use]
    pub fn is_partial(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        self.suffixes.iter().any(|s| lower.ends_with(s.as_str()))
    }

    /// The configured suffixes.
    #[must_use]
    pub fn suffixes(&self) -> &[String] {
        &self.suffixes
    }
}
