// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tests for wire timestamp formatting.

use super::*;

#[test]
fn formats_epoch_ms_with_millis_and_zulu() {
    assert_eq!(epoch_ms_to_rfc3339(0), "1970-01-01T00:00:00.000Z");
    assert_eq!(epoch_ms_to_rfc3339(1_700_000_000_123), "2023-11-14T22:13:20.123Z");
}

#[test]
fn round_trips_through_parse() {
    let ms = 1_700_000_000_123u64;
    let formatted = epoch_ms_to_rfc3339(ms);
    assert_eq!(rfc3339_to_epoch_ms(&formatted), Some(ms));
}

#[test]
fn parses_offset_timestamps() {
    assert_eq!(rfc3339_to_epoch_ms("1970-01-01T01:00:00+01:00"), Some(0));
}

#[test]
fn rejects_garbage() {
    assert_eq!(rfc3339_to_epoch_ms("not a timestamp"), None);
}
