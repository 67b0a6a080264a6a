// Compile-time sizing
//
// Everything is statically allocated, so these are the only knobs.
// DefaultScheduler uses them; a board that needs other numbers names
// Scheduler<'_, P, E, T> directly.

use crate::kernel::clock::ClockTime;

/// Capacity of the event ring. At most this many events are ever
/// pending; a post into a full ring is rejected.
pub const NUM_EVENTS: usize = 32;

/// Process descriptor slots. Registration past this fails.
pub const MAX_PROCESSES: usize = 16;

/// Shared etimer + ctimer slots.
pub const MAX_TIMERS: usize = 16;

/// Ticks per second of the reference tick source (10ms tick).
pub const CLOCK_SECOND: ClockTime = 100;
