//! Human-readable age of the last update.

use std::fmt;

use time::OffsetDateTime;

/// How long ago the last reading arrived, bucketed for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateAge {
    /// No reading yet.
    Never,
    /// Under 5 seconds.
    JustNow,
    /// Under a minute.
    Seconds(u64),
    /// Under two minutes.
    AboutAMinute,
    /// Under an hour.
    Minutes(u64),
    /// An hour or more.
    Hours(u64),
}

impl UpdateAge {
    /// Bucket an elapsed number of whole seconds.
    pub fn from_secs(secs: u64) -> Self {
        match secs {
            0..5 => UpdateAge::JustNow,
            5..60 => UpdateAge::Seconds(secs),
            60..120 => UpdateAge::AboutAMinute,
            120..3600 => UpdateAge::Minutes(secs / 60),
            _ => UpdateAge::Hours(secs / 3600),
        }
    }
}

impl fmt::Display for UpdateAge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateAge::Never => write!(f, "Never"),
            UpdateAge::JustNow => write!(f, "Just now"),
            UpdateAge::Seconds(n) => write!(f, "{}s ago", n),
            UpdateAge::AboutAMinute => write!(f, "1 min ago"),
            UpdateAge::Minutes(n) => write!(f, "{} mins ago", n),
            UpdateAge::Hours(n) => write!(f, "{} hours ago", n),
        }
    }
}

/// Age of `last_updated` relative to `now`.
///
/// A timestamp in the future (clock skew) counts as just now.
pub fn time_since_update(last_updated: Option<OffsetDateTime>, now: OffsetDateTime) -> UpdateAge {
    let Some(last_updated) = last_updated else {
        return UpdateAge::Never;
    };
    let elapsed = (now - last_updated).whole_seconds().max(0);
    UpdateAge::from_secs(elapsed.unsigned_abs())
}
