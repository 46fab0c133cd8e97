//! # Timer Source
//!
//! Periodic wake-ups backed by a non-blocking `timerfd`.
//!
//! The timer first fires after exactly one interval and then repeats every
//! interval. Each read of the descriptor returns how many intervals elapsed
//! since the previous read.

use std::os::fd::{AsFd, BorrowedFd, RawFd};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::time::TimeSpec;
use nix::sys::timerfd::{ClockId, Expiration, TimerFd, TimerFlags, TimerSetTimeFlags};
use nix::unistd;

use crate::error::{DemaRcError, Result};

/// Armed periodic `CLOCK_MONOTONIC` timer.
///
/// Owns its descriptor: dropping the timer closes it.
pub struct PeriodicTimer {
    fd: TimerFd,
    interval: Duration,
}

impl std::fmt::Debug for PeriodicTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicTimer")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl PeriodicTimer {
    /// Creates and arms a periodic timer.
    ///
    /// # Errors
    ///
    /// - `InvalidInterval`: a zero interval would leave the timer disarmed
    /// - `Sys`: `timerfd_create` or `timerfd_settime` failed
    pub fn new(interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(DemaRcError::InvalidInterval(interval));
        }

        let fd = TimerFd::new(
            ClockId::CLOCK_MONOTONIC,
            TimerFlags::TFD_NONBLOCK | TimerFlags::TFD_CLOEXEC,
        )?;

        // Interval arms both it_value and it_interval with the same period.
        fd.set(
            Expiration::Interval(TimeSpec::from_duration(interval)),
            TimerSetTimeFlags::empty(),
        )?;

        Ok(Self { fd, interval })
    }

    /// Returns the period this timer was armed with.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl AsFd for PeriodicTimer {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

/// Reads the expiration counter of a timer descriptor.
///
/// Returns 0 when nothing expired since the last read (spurious wake-up).
///
/// # Errors
///
/// Returns `Sys` for any read failure other than `EAGAIN`.
pub fn read_expirations(fd: RawFd) -> Result<u64> {
    let mut buf = [0u8; 8];

    match unistd::read(fd, &mut buf) {
        Ok(n) if n == buf.len() => Ok(u64::from_ne_bytes(buf)),
        Ok(_) => Ok(0),
        Err(Errno::EAGAIN) => Ok(0),
        Err(e) => Err(e.into()),
    }
}
