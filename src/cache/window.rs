//! Date windows and dedup decisions.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

/// Default retention for cache entries, in days.
pub const RETENTION_DAYS: u32 = 90;

/// Inclusive range of posting dates worth processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    /// First accepted date.
    pub start: NaiveDate,
    /// Last accepted date.
    pub end: NaiveDate,
}

impl DateWindow {
    /// Window covering `[today - days, today]`.
    ///
    /// # Example
    ///
    /// ```
    /// use bidstage::cache::DateWindow;
    /// use chrono::NaiveDate;
    ///
    /// let today = NaiveDate::from_ymd_opt(2024, 1, 11).unwrap();
    /// let window = DateWindow::lookback(today, 2);
    /// assert!(window.contains(NaiveDate::from_ymd_opt(2024, 1, 9).unwrap()));
    /// assert!(!window.contains(NaiveDate::from_ymd_opt(2024, 1, 8).unwrap()));
    /// ```
    #[must_use]
    pub fn lookback(today: NaiveDate, days: u32) -> Self {
        Self {
            start: days_before(today, days),
            end: today,
        }
    }

    /// Window between two explicit dates; the bounds are swapped if reversed.
    #[must_use]
    pub fn between(start: NaiveDate, end: NaiveDate) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self {
                start: end,
                end: start,
            }
        }
    }

    /// Whether `date` falls inside the window.
    #[must_use]
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl std::fmt::Display for DateWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

/// What to do with cache entries whose discovery date is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingDatePolicy {
    /// An unknown date cannot prove freshness, so the entry is dropped.
    #[default]
    Evict,
    /// Keep undated entries indefinitely.
    Keep,
}

/// Outcome of the dedup check for one discovered item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Decision {
    /// Unseen and inside the window.
    Process,
    /// Already handled by this or a previous run.
    AlreadySeen,
    /// Unseen, but posted outside the lookback window.
    OutsideWindow,
    /// Unseen, and the posting date is unknown.
    MissingDate,
}

impl Decision {
    /// Whether the item should be processed.
    #[must_use]
    pub fn should_process(self) -> bool {
        self == Self::Process
    }

    /// Short label for logs and reports.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Process => "process",
            Self::AlreadySeen => "already seen",
            Self::OutsideWindow => "outside window",
            Self::MissingDate => "missing date",
        }
    }
}

/// `date - days`, saturating at the earliest representable date.
#[must_use]
pub fn days_before(date: NaiveDate, days: u32) -> NaiveDate {
    date.checked_sub_days(Days::new(u64::from(days)))
        .unwrap_or(NaiveDate::MIN)
}
