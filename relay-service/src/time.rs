//! Millisecond-since-epoch helpers shared by the HTTP and WebSocket layers.

use time::{Duration, OffsetDateTime};

/// The current time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    millis(OffsetDateTime::now_utc())
}

/// Converts an [`OffsetDateTime`] into milliseconds since the Unix epoch.
pub fn millis(ts: OffsetDateTime) -> i64 {
    ts.unix_timestamp() * 1000 + i64::from(ts.millisecond())
}

/// Converts milliseconds since the Unix epoch back into an [`OffsetDateTime`].
pub fn from_millis(value: i64) -> OffsetDateTime {
    OffsetDateTime::UNIX_EPOCH + Duration::milliseconds(value)
}

/// Validates a client-reported heartbeat time (§8, testable property 8):
/// a timestamp in the future is clamped to now; one more than 10 minutes in
/// the past is rejected entirely (`None`), producing no state change.
pub fn validate_heartbeat_time(client_time_millis: i64) -> Option<i64> {
    const MAX_STALENESS_MILLIS: i64 = 10 * 60 * 1000;
    let now = now_millis();
    if client_time_millis < now - MAX_STALENESS_MILLIS {
        return None;
    }
    Some(client_time_millis.min(now))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_future_timestamps_to_now() {
        let far_future = now_millis() + 60_000;
        let clamped = validate_heartbeat_time(far_future).expect("future time is accepted");
        assert!(clamped <= now_millis());
    }

    #[test]
    fn rejects_timestamps_older_than_ten_minutes() {
        let stale = now_millis() - (11 * 60 * 1000);
        assert!(validate_heartbeat_time(stale).is_none());
    }

    #[test]
    fn accepts_recent_past_timestamp_unchanged() {
        let recent = now_millis() - 1_000;
        assert_eq!(validate_heartbeat_time(recent), Some(recent));
    }
}
