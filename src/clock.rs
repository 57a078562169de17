//! Injected clock for deterministic expiry handling
//!
//! Every `expire-after` computation reads time through this trait so lease
//! extension and the expiry sweep can be tested with a fixed clock.

use chrono::{DateTime, SecondsFormat, Utc};

/// Format an instant the way the `expire-after` annotation stores it:
/// RFC-3339, second precision, `Z` suffix.
pub fn to_rfc3339(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Trait for reading the current time
#[cfg_attr(test, mockall::automock)]
pub trait Clock: Send + Sync {
    /// Current instant in UTC
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock implementation used in production
#[derive(Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
