use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Wall-clock time in milliseconds since the Unix epoch.
pub fn current_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

/// Wall-clock time in microseconds since the Unix epoch.
pub fn current_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_micros() as u64
}

// Absolute difference between two millisecond timestamps
pub fn millis_between(a: u64, b: u64) -> u64 {
    a.abs_diff(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_millis_is_after_2020() {
        assert!(current_millis() > 1_577_836_800_000);
    }

    #[test]
    fn test_millis_between_is_symmetric() {
        assert_eq!(millis_between(10, 4), 6);
        assert_eq!(millis_between(4, 10), 6);
    }
}
