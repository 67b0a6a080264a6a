// Tick source boundary
//
// The core never reads hardware. The platform hands the scheduler a
// Clock; its tick ISR advances the count and then calls
// Scheduler::tick() so owners of expired timers get polled.
// Ticks wrap. Compare with wrapping_sub, never with plain >=.

use core::cell::Cell;

use critical_section::Mutex;

/// Fixed-width tick count. Wraps at `u32::MAX`.
pub type ClockTime = u32;

pub trait Clock {
    fn now(&self) -> ClockTime;
}

// cs: riscv32imc and armv6m have no atomic add
pub struct TickCounter {
    ticks: Mutex<Cell<ClockTime>>,
}

impl TickCounter {
    pub const fn new() -> Self {
        Self::starting_at(0)
    }

    pub const fn starting_at(ticks: ClockTime) -> Self {
        Self {
            ticks: Mutex::new(Cell::new(ticks)),
        }
    }

    /// Called from the tick ISR. Returns the new count.
    pub fn advance(&self, by: ClockTime) -> ClockTime {
        critical_section::with(|cs| {
            let ticks = self.ticks.borrow(cs);
            let next = ticks.get().wrapping_add(by);
            ticks.set(next);
            next
        })
    }

    pub fn set(&self, ticks: ClockTime) {
        critical_section::with(|cs| self.ticks.borrow(cs).set(ticks));
    }
}

impl Clock for TickCounter {
    fn now(&self) -> ClockTime {
        critical_section::with(|cs| self.ticks.borrow(cs).get())
    }
}

impl Default for TickCounter {
    fn default() -> Self {
        Self::new()
    }
}
