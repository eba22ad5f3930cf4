//! # Link Timing
//!
//! Packet cadence for a given serial baud rate, and the clock discipline
//! applied when the transmitter module reports its own timing.

use std::time::Duration;

/// Interval used for baud rates missing from the table (250 Hz)
pub const DEFAULT_REFRESH_RATE: Duration = Duration::from_millis(4);

/// Shortest interval the sender will ever run at
pub const MIN_SEND_INTERVAL: Duration = Duration::from_micros(500);

/// Expected packet interval for each supported baud rate
const REFRESH_RATES: &[(u32, Duration)] = &[
    (115_200, Duration::from_micros(6_667)),
    (400_000, Duration::from_millis(4)),
    (416_666, Duration::from_millis(4)),
    (420_000, Duration::from_millis(4)),
    (921_600, Duration::from_millis(2)),
    (1_870_000, Duration::from_millis(1)),
    (2_250_000, Duration::from_millis(1)),
    (3_750_000, Duration::from_millis(1)),
    (5_250_000, Duration::from_millis(1)),
];

/// Map a baud rate to the link's expected packet interval
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use elrs_link::crsf::timing::get_refresh_rate;
///
/// assert_eq!(get_refresh_rate(921_600), Duration::from_millis(2));
/// assert_eq!(get_refresh_rate(12_345), Duration::from_millis(4));
/// ```
pub fn get_refresh_rate(baud_rate: u32) -> Duration {
    REFRESH_RATES
        .iter()
        .find(|(baud, _)| *baud == baud_rate)
        .map(|(_, rate)| *rate)
        .unwrap_or(DEFAULT_REFRESH_RATE)
}

/// Compute the corrected transmit interval from a module timing report.
///
/// `rate` and `offset` are in units of 0.1 µs. The result is `rate + offset`,
/// bounded to half and one and a half times `rate`, and never below
/// [`MIN_SEND_INTERVAL`]. Must be recomputed for every report: a phase
/// that has been pulled back in line reports an offset near zero and the
/// interval returns to the nominal rate.
///
/// Returns `None` when `rate` is not positive.
pub fn adjust_send_rate(rate: i32, offset: i32) -> Option<Duration> {
    if rate <= 0 {
        return None;
    }

    let rate = rate as i64;
    let corrected = (rate + offset as i64).clamp(rate / 2, rate * 3 / 2);

    // 0.1 µs units to nanoseconds
    let interval = Duration::from_nanos(corrected as u64 * 100);
    Some(interval.max(MIN_SEND_INTERVAL))
}
