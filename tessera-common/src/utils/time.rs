use chrono::Utc;

/// Returns the current UNIX timestamp in seconds.
pub fn current_time() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

/// Returns the current UNIX timestamp in milliseconds.
///
/// Used for `TxResult` timestamps, batch seal times and peer heartbeat
/// bookkeeping.
pub fn current_time_millis() -> i64 {
    Utc::now().timestamp_millis()
}
