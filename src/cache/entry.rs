//! Cache entry definitions.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

/// Date formats accepted when reading a cache document.
///
/// Older crawlers stored the portal's own `MM/DD/YYYY` posting dates verbatim.
const ACCEPTED_DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"];

/// Parse a date string in any of the accepted formats.
///
/// Returns `None` for empty or unrecognised input.
///
/// # Example
///
/// ```
/// use bidstage::cache::parse_date;
/// use chrono::NaiveDate;
///
/// let expected = NaiveDate::from_ymd_opt(2024, 1, 10);
/// assert_eq!(parse_date("2024-01-10"), expected);
/// assert_eq!(parse_date("01/10/2024"), expected);
/// assert_eq!(parse_date("soon"), None);
/// ```
#[must_use]
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    ACCEPTED_DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
}

/// Metadata kept for one previously handled item.
///
/// The item key itself is the key of the surrounding map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawEntry")]
pub struct CacheEntry {
    /// Date the item was first observed as posted. `None` when the stored
    /// document carried no usable date.
    pub discovered_date: Option<NaiveDate>,
    /// Date this entry was last touched.
    pub last_checked_date: NaiveDate,
}

impl CacheEntry {
    /// Create an entry first seen on `today`.
    ///
    /// `last_checked_date` never precedes `discovered_date`, even when a
    /// portal reports a posting date in the future.
    #[must_use]
    pub fn new(discovered_date: Option<NaiveDate>, today: NaiveDate) -> Self {
        let last_checked_date = match discovered_date {
            Some(d) if d > today => d,
            _ => today,
        };
        Self {
            discovered_date,
            last_checked_date,
        }
    }

    /// Refresh the entry on re-observation.
    ///
    /// The first-seen date is immutable; a missing one may be filled in.
    pub fn touch(&mut self, posted_date: Option<NaiveDate>, today: NaiveDate) {
        if self.discovered_date.is_none() {
            self.discovered_date = posted_date;
        }
        let floor = self.discovered_date.unwrap_or(today);
        self.last_checked_date = today.max(floor).max(self.last_checked_date);
    }
}

/// Lenient on-disk shape; accepts the legacy `posted_date`/`last_checked` keys.
#[derive(Deserialize)]
struct RawEntry {
    #[serde(default, alias = "posted_date", deserialize_with = "lenient_date")]
    discovered_date: Option<NaiveDate>,
    #[serde(default, alias = "last_checked", deserialize_with = "lenient_date")]
    last_checked_date: Option<NaiveDate>,
}

impl From<RawEntry> for CacheEntry {
    fn from(raw: RawEntry) -> Self {
        // Older documents may carry a check date earlier than the posting date.
        let last_checked_date = match (raw.last_checked_date, raw.discovered_date) {
            (Some(checked), Some(discovered)) => checked.max(discovered),
            (Some(checked), None) => checked,
            (None, discovered) => discovered.unwrap_or(NaiveDate::MIN),
        };
        Self {
            discovered_date: raw.discovered_date,
            last_checked_date,
        }
    }
}

fn lenient_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => parse_date(&s),
        _ => None,
    })
}
