//! Ingestion engine.
//!
//! For each discovered item the engine runs the dedup check, triggers the
//! downloads, waits for them in the staging directory, relocates finished
//! files into the item folder, appends a record to the sink and records the
//! item in the cache. The run folder is completed at the end, including after
//! a Ctrl+C.
//!
//! Portal-specific work lives behind [`DownloadTrigger`] and [`RecordSink`].

pub mod collaborator;
pub mod item;
pub mod report;
pub mod runner;

pub use collaborator::{DownloadTrigger, MemorySink, NoDownloads, RecordSink};
pub use item::DiscoveredItem;
pub use report::{ItemOutcome, ItemReport, RunReport};
pub use runner::{EngineError, EngineOptions, IngestionEngine};
