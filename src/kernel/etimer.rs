// Event timers and callback timers
//
// Both kinds share one slot table owned by the scheduler. A process keeps
// only a small Copy handle (ETimer / CTimer); the slot remembers who
// armed it and what to do when it runs out.
//
// Expiry is detected by Scheduler::tick(), called from the tick ISR:
//   etimer -> slot marked fired, owning process polled
//   ctimer -> slot marked fired, poll pass requested
// The dispatcher then delivers POLL (and TIMER for each fired etimer) to
// the owner, or runs the ctimer callback, at poll priority.
//
// Slots of a process are released when it exits. A slot whose timer was
// delivered or stopped stays bound to its handle, so reset/restart still
// work, until a set needs a slot and no free one is left: then the idle
// slot is reclaimed. Handles carry a generation so a released or
// reclaimed slot is never touched through an old handle; the old handle
// reads as expired from then on.

use core::fmt;

use crate::kernel::batch::Batch;
use crate::kernel::clock::ClockTime;
use crate::kernel::event::{Data, Event, EventKind};
use crate::kernel::process::{Context, ProcessId};
use crate::kernel::timer::Timer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId {
    index: u8,
    generation: u16,
}

impl TimerId {
    #[inline]
    pub const fn index(self) -> usize {
        self.index as usize
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}.{}", self.index, self.generation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerError {
    /// Every slot is armed or has a fired timer waiting for delivery.
    TableFull,
    /// No live process to own the timer.
    NoProcess,
}

impl fmt::Display for TimerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerError::TableFull => write!(f, "timer table full"),
            TimerError::NoProcess => write!(f, "timer has no live owner"),
        }
    }
}

impl core::error::Error for TimerError {}

/// Handle to an event timer. Starts unset; the first `etimer_set` binds
/// it to a slot and later sets reuse that slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ETimer {
    pub(crate) id: Option<TimerId>,
}

impl ETimer {
    pub const fn new() -> Self {
        Self { id: None }
    }

    pub fn id(&self) -> Option<TimerId> {
        self.id
    }

    /// The TIMER event delivered when this timer ran out.
    pub fn is_for(&self, ev: &Event) -> bool {
        match (self.id, ev.data) {
            (Some(id), Data::Timer(fired)) => ev.kind == EventKind::Timer && id == fired,
            _ => false,
        }
    }
}

/// Handle to a callback timer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CTimer {
    pub(crate) id: Option<TimerId>,
}

impl CTimer {
    pub const fn new() -> Self {
        Self { id: None }
    }

    pub fn id(&self) -> Option<TimerId> {
        self.id
    }
}

/// Runs at poll priority with the context of the process that set the
/// timer. Call `cx.ctimer_reset(timer)` from here to make it periodic.
pub type Callback = fn(cx: &mut Context<'_>, timer: CTimer, data: Data);

#[derive(Clone, Copy)]
pub(crate) enum Owner {
    Process(ProcessId),
    Callback {
        callback: Callback,
        data: Data,
        context: Option<ProcessId>,
    },
}

impl Owner {
    fn belongs_to(&self, pid: ProcessId) -> bool {
        match *self {
            Owner::Process(owner) => owner == pid,
            Owner::Callback { context, .. } => context == Some(pid),
        }
    }
}

#[derive(Clone, Copy)]
pub(crate) enum Expired {
    Process(ProcessId),
    Callback,
}

#[derive(Clone, Copy)]
pub(crate) struct FiredCallback {
    pub(crate) timer: CTimer,
    pub(crate) callback: Callback,
    pub(crate) data: Data,
    pub(crate) context: Option<ProcessId>,
}

#[derive(Clone, Copy)]
struct Slot {
    timer: Timer,
    owner: Option<Owner>,
    generation: u16,
    armed: bool,
    // expired and reported, not yet delivered
    fired: bool,
}

impl Slot {
    const FREE: Self = Self {
        timer: Timer::new(0, 0),
        owner: None,
        generation: 0,
        armed: false,
        fired: false,
    };

    /// Bound to a handle but neither running nor owed to anyone.
    fn is_idle(&self) -> bool {
        self.owner.is_some() && !self.armed && !self.fired
    }

    fn free(&mut self) {
        self.owner = None;
        self.armed = false;
        self.fired = false;
        self.generation = self.generation.wrapping_add(1);
    }
}

pub(crate) struct TimerTable<const T: usize> {
    slots: [Slot; T],
}

impl<const T: usize> TimerTable<T> {
    pub(crate) const fn new() -> Self {
        Self {
            slots: [Slot::FREE; T],
        }
    }

    fn get(&self, id: TimerId) -> Option<&Slot> {
        let slot = self.slots.get(id.index())?;
        (slot.owner.is_some() && slot.generation == id.generation).then_some(slot)
    }

    fn get_mut(&mut self, id: TimerId) -> Option<&mut Slot> {
        let slot = self.slots.get_mut(id.index())?;
        (slot.owner.is_some() && slot.generation == id.generation).then_some(slot)
    }

    // free slots first, then one that is bound but idle
    fn alloc(&mut self) -> Result<TimerId, TimerError> {
        let index = match self.slots.iter().position(|s| s.owner.is_none()) {
            Some(index) => index,
            None => {
                let index = self
                    .slots
                    .iter()
                    .position(Slot::is_idle)
                    .ok_or(TimerError::TableFull)?;
                self.slots[index].free();
                index
            }
        };
        Ok(TimerId {
            index: index as u8,
            generation: self.slots[index].generation,
        })
    }

    /// Arm `handle` (or a fresh slot when it is unset or stale) to run out
    /// `interval` ticks after `now`.
    pub(crate) fn arm(
        &mut self,
        handle: Option<TimerId>,
        owner: Owner,
        now: ClockTime,
        interval: ClockTime,
    ) -> Result<TimerId, TimerError> {
        let id = match handle.filter(|id| self.get(*id).is_some()) {
            Some(id) => id,
            None => self.alloc()?,
        };
        let slot = &mut self.slots[id.index()];
        slot.owner = Some(owner);
        slot.timer.set(now, interval);
        slot.armed = true;
        slot.fired = false;
        Ok(id)
    }

    pub(crate) fn reset(&mut self, id: TimerId) {
        if let Some(slot) = self.get_mut(id) {
            slot.timer.reset();
            slot.armed = true;
            slot.fired = false;
        }
    }

    pub(crate) fn restart(&mut self, id: TimerId, now: ClockTime) {
        if let Some(slot) = self.get_mut(id) {
            slot.timer.restart(now);
            slot.armed = true;
            slot.fired = false;
        }
    }

    pub(crate) fn adjust(&mut self, id: TimerId, delta: i32) {
        if let Some(slot) = self.get_mut(id) {
            slot.timer.adjust(delta);
        }
    }

    pub(crate) fn stop(&mut self, id: TimerId) {
        if let Some(slot) = self.get_mut(id) {
            slot.armed = false;
            slot.fired = false;
        }
    }

    /// A timer that is stopped, never set or released counts as expired.
    pub(crate) fn expired(&self, id: TimerId, now: ClockTime) -> bool {
        match self.get(id) {
            Some(slot) if slot.armed => slot.timer.expired(now),
            _ => true,
        }
    }

    pub(crate) fn timer(&self, id: TimerId) -> Option<Timer> {
        self.get(id).map(|slot| slot.timer)
    }

    #[cfg(test)]
    fn is_armed(&self, id: TimerId) -> bool {
        self.get(id).is_some_and(|slot| slot.armed)
    }

    /// Free every slot `pid` owns or provides context for.
    pub(crate) fn release(&mut self, pid: ProcessId) -> usize {
        let mut released = 0;
        for slot in self.slots.iter_mut() {
            if slot.owner.is_some_and(|o| o.belongs_to(pid)) {
                slot.free();
                released += 1;
            }
        }
        released
    }

    /// Mark timers that ran out by `now` as fired. Each is reported once.
    pub(crate) fn expire(&mut self, now: ClockTime) -> Batch<Expired, T> {
        let mut out = Batch::new();
        for slot in self.slots.iter_mut() {
            if !slot.armed || slot.fired || !slot.timer.expired(now) {
                continue;
            }
            let Some(owner) = slot.owner else { continue };
            slot.fired = true;
            out.push(match owner {
                Owner::Process(pid) => Expired::Process(pid),
                Owner::Callback { .. } => Expired::Callback,
            });
        }
        out
    }

    /// Disarm and hand back the fired etimers of `pid`.
    pub(crate) fn take_fired_for(&mut self, pid: ProcessId) -> Batch<TimerId, T> {
        let mut out = Batch::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if !slot.fired || !matches!(slot.owner, Some(Owner::Process(owner)) if owner == pid) {
                continue;
            }
            slot.armed = false;
            slot.fired = false;
            out.push(TimerId {
                index: index as u8,
                generation: slot.generation,
            });
        }
        out
    }

    /// Disarm and hand back every fired ctimer.
    pub(crate) fn take_fired_callbacks(&mut self) -> Batch<FiredCallback, T> {
        let mut out = Batch::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if !slot.fired {
                continue;
            }
            let Some(Owner::Callback {
                callback,
                data,
                context,
            }) = slot.owner
            else {
                continue;
            };
            slot.armed = false;
            slot.fired = false;
            out.push(FiredCallback {
                timer: CTimer {
                    id: Some(TimerId {
                        index: index as u8,
                        generation: slot.generation,
                    }),
                },
                callback,
                data,
                context,
            });
        }
        out
    }

    pub(crate) fn pending(&self) -> bool {
        self.slots.iter().any(|s| s.owner.is_some() && s.armed)
    }

    /// Soonest expiration among armed timers. Fired-but-undelivered ones
    /// count as due now.
    pub(crate) fn next_expiration(&self, now: ClockTime) -> Option<ClockTime> {
        self.slots
            .iter()
            .filter(|s| s.owner.is_some() && s.armed)
            .map(|s| if s.fired { 0 } else { s.timer.remaining(now) })
            .min()
            .map(|remaining| now.wrapping_add(remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &mut Context<'_>, _: CTimer, _: Data) {}

    #[test]
    fn arm_expire_take() {
        let mut table: TimerTable<4> = TimerTable::new();
        let pid = ProcessId::new(0);
        let id = table.arm(None, Owner::Process(pid), 100, 10).unwrap();

        assert!(table.expire(105).is_empty());
        assert!(!table.expired(id, 105));

        let fired = table.expire(110);
        assert_eq!(fired.len(), 1);
        // reported once only
        assert!(table.expire(111).is_empty());

        let taken: Vec<_> = table.take_fired_for(pid).into_iter().collect();
        assert_eq!(taken, vec![id]);
        assert!(!table.is_armed(id));
        assert!(table.expired(id, 111));
    }

    #[test]
    fn rearm_reuses_slot() {
        let mut table: TimerTable<2> = TimerTable::new();
        let pid = ProcessId::new(0);
        let a = table.arm(None, Owner::Process(pid), 0, 5).unwrap();
        let b = table.arm(Some(a), Owner::Process(pid), 3, 5).unwrap();
        assert_eq!(a, b);
        assert_eq!(table.timer(a).unwrap().expiration_time(), 8);
    }

    #[test]
    fn table_full() {
        let mut table: TimerTable<1> = TimerTable::new();
        let pid = ProcessId::new(0);
        table.arm(None, Owner::Process(pid), 0, 5).unwrap();
        assert_eq!(
            table.arm(None, Owner::Process(pid), 0, 5),
            Err(TimerError::TableFull)
        );
    }

    #[test]
    fn release_invalidates_handles() {
        let mut table: TimerTable<1> = TimerTable::new();
        let a = ProcessId::new(0);
        let b = ProcessId::new(1);
        let old = table.arm(None, Owner::Process(a), 0, 5).unwrap();
        assert_eq!(table.release(a), 1);

        let new = table.arm(None, Owner::Process(b), 0, 50).unwrap();
        assert_eq!(new.index(), old.index());
        assert_ne!(new, old);

        // stopping through the stale handle must not touch b's timer
        table.stop(old);
        assert!(table.is_armed(new));
    }

    #[test]
    fn delivered_and_stopped_slots_are_reclaimed_when_full() {
        let mut table: TimerTable<2> = TimerTable::new();
        let cb = Owner::Callback {
            callback: noop,
            data: Data::None,
            context: None,
        };
        let fired = table.arm(None, cb, 0, 1).unwrap();
        let stopped = table.arm(None, Owner::Process(ProcessId::new(0)), 0, 50).unwrap();
        table.expire(1);

        // fired but not yet run: not up for grabs
        assert_eq!(table.arm(None, cb, 1, 5), Err(TimerError::TableFull));
        assert_eq!(table.take_fired_callbacks().into_iter().count(), 1);

        // idle slots keep their handle until someone needs the room
        table.reset(fired);
        assert!(table.is_armed(fired));
        table.stop(fired);
        table.stop(stopped);

        let first = table.arm(None, cb, 2, 5).unwrap();
        let second = table.arm(None, cb, 2, 5).unwrap();
        assert_eq!(table.arm(None, cb, 2, 5), Err(TimerError::TableFull));
        assert_ne!(first, fired);
        assert_ne!(second, stopped);
        // the old handles are stale now
        assert!(table.expired(fired, 2));
        table.restart(stopped, 2);
        assert!(table.is_armed(first) && table.is_armed(second));
        assert_eq!(table.timer(second).unwrap().expiration_time(), 7);
    }

    #[test]
    fn callbacks_released_with_context() {
        let mut table: TimerTable<2> = TimerTable::new();
        let pid = ProcessId::new(3);
        let cb = Owner::Callback {
            callback: noop,
            data: Data::Value(7),
            context: Some(pid),
        };
        let id = table.arm(None, cb, 0, 1).unwrap();
        assert!(matches!(table.expire(1).into_iter().next(), Some(Expired::Callback)));

        let fired: Vec<_> = table.take_fired_callbacks().into_iter().collect();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].timer.id(), Some(id));
        assert_eq!(fired[0].data, Data::Value(7));

        table.release(pid);
        assert!(!table.pending());
    }

    #[test]
    fn next_expiration_picks_soonest() {
        let mut table: TimerTable<3> = TimerTable::new();
        let pid = ProcessId::new(0);
        assert_eq!(table.next_expiration(0), None);
        table.arm(None, Owner::Process(pid), 0, 30).unwrap();
        let soon = table.arm(None, Owner::Process(pid), 0, 10).unwrap();
        assert_eq!(table.next_expiration(4), Some(10));
        table.stop(soon);
        assert_eq!(table.next_expiration(4), Some(30));
    }

    #[test]
    fn etimer_matches_its_timer_event() {
        let mut table: TimerTable<2> = TimerTable::new();
        let pid = ProcessId::new(0);
        let id = table.arm(None, Owner::Process(pid), 0, 1).unwrap();
        let handle = ETimer { id: Some(id) };
        assert!(handle.is_for(&Event::new(EventKind::Timer, Data::Timer(id))));
        assert!(!handle.is_for(&Event::bare(EventKind::Timer)));
        assert!(!ETimer::new().is_for(&Event::new(EventKind::Timer, Data::Timer(id))));
    }
}
