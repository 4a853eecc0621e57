//! Local collaborators for driving the engine without a browser.
//!
//! - [`manifest`]: items from a JSON Lines file
//! - [`copy_trigger`]: "downloads" by copying local files into staging
//! - [`csv_sink`]: one CSV row per processed item

pub mod copy_trigger;
pub mod csv_sink;
pub mod manifest;

pub use copy_trigger::{CopyTrigger, COPY_PARTIAL_SUFFIX};
pub use csv_sink::CsvSink;
pub use manifest::{parse_lines, read_manifest, ManifestError, ManifestRecord};
