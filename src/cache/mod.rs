//! Item cache module for bidstage.
//!
//! This module remembers which discovered items have already been handled so
//! that repeated runs of a job do not re-download the same bid.
//!
//! # Architecture
//!
//! * [`store`]: The JSON-backed [`CacheStore`] with load, evict, decide, record and save.
//! * [`entry`]: The per-item [`CacheEntry`] and its lenient date parsing.
//! * [`window`]: Lookback windows, the missing-date policy and dedup decisions.
//!
//! # Eviction
//!
//! Entries are evicted when their discovery date is more than
//! [`RETENTION_DAYS`] before the load date. Entries without a usable
//! discovery date follow [`MissingDatePolicy`].
//!
//! # Example
//!
//! ```no_run
//! use bidstage::cache::{CacheStore, DateWindow, MissingDatePolicy, RETENTION_DAYS};
//! use chrono::NaiveDate;
//! use std::path::Path;
//!
//! let today = NaiveDate::from_ymd_opt(2024, 1, 11).unwrap();
//! let path = Path::new("cache/portal_cache.json");
//!
//! let mut store = CacheStore::load(path);
//! store.evict(today, RETENTION_DAYS, MissingDatePolicy::Evict);
//!
//! let posted = NaiveDate::from_ymd_opt(2024, 1, 10);
//! if store.should_process("bidA", posted, &DateWindow::lookback(today, 2)) {
//!     store.record("bidA", posted, today);
//! }
//! store.save(path).unwrap();
//! ```

pub mod entry;
pub mod store;
pub mod window;

pub use entry::{parse_date, CacheEntry};
pub use store::{CacheError, CacheResult, CacheStore};
pub use window::{days_before, DateWindow, Decision, MissingDatePolicy, RETENTION_DAYS};
