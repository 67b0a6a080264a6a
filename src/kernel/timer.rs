// Plain passive timer: a start tick and an interval.
//
// Nothing fires. Callers ask expired(now). etimer and ctimer keep one of
// these per slot and layer event/callback delivery on top.
//
// Expiry is judged on elapsed = now - start (wrapping) against the
// interval, so a timer that straddles the u32 wrap behaves like any
// other. Intervals must stay below half the tick range.

use crate::kernel::clock::ClockTime;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timer {
    start: ClockTime,
    interval: ClockTime,
}

impl Timer {
    pub const fn new(now: ClockTime, interval: ClockTime) -> Self {
        Self {
            start: now,
            interval,
        }
    }

    pub fn set(&mut self, now: ClockTime, interval: ClockTime) {
        self.start = now;
        self.interval = interval;
    }

    /// Re-arm relative to the previous expiration, not to now, so a
    /// periodic timer does not drift when it is serviced late.
    pub fn reset(&mut self) {
        self.start = self.start.wrapping_add(self.interval);
    }

    /// Re-arm relative to now. Drifts by however late the call is.
    pub fn restart(&mut self, now: ClockTime) {
        self.start = now;
    }

    /// Shift the start point; negative values pull expiry earlier.
    pub fn adjust(&mut self, delta: i32) {
        self.start = self.start.wrapping_add_signed(delta);
    }

    #[inline]
    pub fn expired(&self, now: ClockTime) -> bool {
        now.wrapping_sub(self.start) >= self.interval
    }

    pub fn remaining(&self, now: ClockTime) -> ClockTime {
        if self.expired(now) {
            0
        } else {
            self.expiration_time().wrapping_sub(now)
        }
    }

    #[inline]
    pub fn expiration_time(&self) -> ClockTime {
        self.start.wrapping_add(self.interval)
    }

    #[inline]
    pub fn start_time(&self) -> ClockTime {
        self.start
    }

    #[inline]
    pub fn interval(&self) -> ClockTime {
        self.interval
    }
}
