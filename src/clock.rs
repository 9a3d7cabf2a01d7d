//! Timestamp arithmetic. Clients derive countdowns from the stored
//! timestamps; the server only compares them.

use chrono::DateTime;
use spacetimedb::Timestamp;

/// Milliseconds from `earlier` to `later`, zero if `later` is not after `earlier`
pub fn elapsed_ms(earlier: Timestamp, later: Timestamp) -> u64 {
    let micros = later.to_micros_since_unix_epoch() - earlier.to_micros_since_unix_epoch();
    if micros <= 0 {
        0
    } else {
        micros as u64 / 1000
    }
}

/// RFC 3339 rendering for log lines
pub fn rfc3339(ts: Timestamp) -> String {
    let micros = ts.to_micros_since_unix_epoch();
    let secs = micros.div_euclid(1_000_000);
    let nanos = (micros.rem_euclid(1_000_000) * 1000) as u32;
    match DateTime::from_timestamp(secs, nanos) {
        Some(dt) => dt.to_rfc3339(),
        None => format!("{}us", micros),
    }
}

#[cfg(test)]
pub(crate) fn at_ms(ms: i64) -> Timestamp {
    Timestamp::from_micros_since_unix_epoch(ms * 1000)
}
