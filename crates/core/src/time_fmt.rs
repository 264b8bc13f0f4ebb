// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wall-time formatting for wire timestamps.

use chrono::{DateTime, SecondsFormat, Utc};

/// Format epoch milliseconds as the RFC3339 form the control plane
/// expects (millisecond precision, `Z` suffix).
pub fn epoch_ms_to_rfc3339(epoch_ms: u64) -> String {
    DateTime::<Utc>::from_timestamp_millis(epoch_ms as i64)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default()
}

/// Parse an RFC3339 timestamp back to epoch milliseconds.
pub fn rfc3339_to_epoch_ms(raw: &str) -> Option<u64> {
    DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.timestamp_millis().max(0) as u64)
}

#[cfg(test)]
#[path = "time_fmt_tests.rs"]
mod tests;
