//! Monotonic time helpers shared by the reactor and the telemetry encoder.

use nix::sys::time::TimeSpec;
use nix::time::{clock_gettime, ClockId};

/// Microseconds in one second.
pub const USEC_PER_SEC: u64 = 1_000_000;

/// Nanoseconds in one microsecond.
pub const NSEC_PER_USEC: u64 = 1_000;

/// Converts a `TimeSpec` to microseconds, saturating at `u64::MAX`.
#[must_use]
pub fn timespec_to_usec(ts: &TimeSpec) -> u64 {
    let secs = u64::try_from(ts.tv_sec()).unwrap_or(0);
    let usecs = u64::try_from(ts.tv_nsec()).unwrap_or(0) / NSEC_PER_USEC;

    secs.checked_mul(USEC_PER_SEC)
        .and_then(|us| us.checked_add(usecs))
        .unwrap_or(u64::MAX)
}

/// Current `CLOCK_MONOTONIC` time in microseconds.
///
/// The monotonic clock cannot fail on Linux; should it ever, 0 is returned
/// rather than aborting the send path.
#[must_use]
pub fn now_usec() -> u64 {
    clock_gettime(ClockId::CLOCK_MONOTONIC)
        .map(|ts| timespec_to_usec(&ts))
        .unwrap_or(0)
}
