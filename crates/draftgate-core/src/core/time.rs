// crates/draftgate-core/src/core/time.rs
// ============================================================================
// Module: Draftgate Time Model
// Description: Canonical timestamp representation for runs and events.
// Purpose: Persist unix milliseconds and render RFC3339 on API surfaces.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! Timestamps are stored as unix epoch milliseconds everywhere (run rows,
//! event rows, job rows) and rendered as RFC3339 strings only at the API and
//! SSE boundaries. Keeping the stored form integral makes event ordering and
//! SQLite comparisons trivial.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

// ============================================================================
// SECTION: Timestamp
// ============================================================================

/// Canonical timestamp in unix epoch milliseconds.
///
/// # Invariants
/// - Serialized as a plain integer; RFC3339 rendering is explicit via
///   [`Timestamp::to_rfc3339`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from unix epoch milliseconds.
    #[must_use]
    pub const fn from_unix_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
        Self(i64::try_from(nanos / 1_000_000).unwrap_or(i64::MAX))
    }

    /// Returns the timestamp as unix epoch milliseconds.
    #[must_use]
    pub const fn unix_millis(self) -> i64 {
        self.0
    }

    /// Renders the timestamp as an RFC3339 string in UTC.
    ///
    /// Falls back to the raw millisecond value if the timestamp lies outside
    /// the representable datetime range.
    #[must_use]
    pub fn to_rfc3339(self) -> String {
        let nanos = i128::from(self.0) * 1_000_000;
        match OffsetDateTime::from_unix_timestamp_nanos(nanos) {
            Ok(datetime) => datetime.format(&Rfc3339).unwrap_or_else(|_| self.0.to_string()),
            Err(_) => self.0.to_string(),
        }
    }
}
