// The dispatcher: process table, event ring, poll flags and timers.
//
// All of it sits behind one critical-section mutex so ISRs can post,
// poll and tick while the main loop runs. The lock is held for
// bookkeeping only. Process code always runs with it released, which is
// what lets a thread call start()/post_synch() and land back in here.
//
// run(), once per main-loop turn:
//   1. if any poll is pending: fire due ctimer callbacks, then give every
//      flagged process a POLL (flags are cleared first, so a poll raised
//      during this pass waits for the next call), each followed by a
//      TIMER per etimer of that process that ran out
//   2. only if nothing was polled: pop one event and deliver it, to its
//      target or to every live process in list order for a broadcast
//
// NOTE: a process that re-polls itself on every POLL keeps step 2 from
// ever running. Nothing here bounds that.

use core::cell::RefCell;
use core::fmt;

use critical_section::Mutex;
use log::{debug, trace, warn};

use crate::config;
use crate::kernel::batch::Batch;
use crate::kernel::clock::{Clock, ClockTime};
use crate::kernel::etimer::{CTimer, Callback, ETimer, Expired, Owner, TimerError, TimerTable};
use crate::kernel::event::{Data, Event, EventKind, EventQueue, FIRST_USER_EVENT, Posted, Target};
use crate::kernel::process::{
    Context, Kernel, PostError, Process, ProcessId, ProcessState, StartError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterError {
    TableFull,
}

impl fmt::Display for RegisterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterError::TableFull => write!(f, "process table full"),
        }
    }
}

impl core::error::Error for RegisterError {}

/// Running totals since the scheduler was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub posted: u32,
    /// Posts rejected because the ring was full.
    pub dropped_full: u32,
    /// Deliveries to a process that had exited (or never started).
    pub dropped_dead: u32,
    /// Deliveries to a process already on the call stack.
    pub dropped_busy: u32,
    pub delivered: u32,
    pub polls: u32,
    /// Most events ever queued at once.
    pub high_water: usize,
}

impl Stats {
    const ZERO: Self = Self {
        posted: 0,
        dropped_full: 0,
        dropped_dead: 0,
        dropped_busy: 0,
        delivered: 0,
        polls: 0,
        high_water: 0,
    };
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "posted {} delivered {} polls {} dropped full/dead/busy {}/{}/{} hwm {}",
            self.posted,
            self.delivered,
            self.polls,
            self.dropped_full,
            self.dropped_dead,
            self.dropped_busy,
            self.high_water
        )
    }
}

pub type DefaultScheduler<'a> = Scheduler<
    'a,
    { config::MAX_PROCESSES },
    { config::NUM_EVENTS },
    { config::MAX_TIMERS },
>;

struct Slot<'a> {
    // None while the dispatcher has it checked out (state Called)
    body: Option<&'a mut (dyn Process + 'a)>,
    name: &'static str,
    state: ProcessState,
    needs_poll: bool,
    no_broadcast: bool,
    // exited while checked out; handler runs when the body comes back
    exit_pending: bool,
    next: Option<ProcessId>,
}

impl<'a> Slot<'a> {
    const EMPTY: Self = Self {
        body: None,
        name: "",
        state: ProcessState::None,
        needs_poll: false,
        no_broadcast: false,
        exit_pending: false,
        next: None,
    };
}

enum Checkout<'a> {
    Run(&'a mut (dyn Process + 'a), &'static str),
    Busy,
    Dead,
}

struct Table<'a, const P: usize, const E: usize, const T: usize> {
    slots: [Slot<'a>; P],
    registered: usize,
    // live processes, most recently started first
    head: Option<ProcessId>,
    events: EventQueue<E>,
    poll_requested: bool,
    timers: TimerTable<T>,
    next_event: u16,
    stats: Stats,
}

impl<'a, const P: usize, const E: usize, const T: usize> Table<'a, P, E, T> {
    fn slot(&self, pid: ProcessId) -> Option<&Slot<'a>> {
        self.slots[..self.registered].get(pid.index())
    }

    fn slot_mut(&mut self, pid: ProcessId) -> Option<&mut Slot<'a>> {
        self.slots[..self.registered].get_mut(pid.index())
    }

    fn is_live(&self, pid: ProcessId) -> bool {
        self.slot(pid).is_some_and(|s| s.state.is_live())
    }

    fn link(&mut self, pid: ProcessId) {
        self.slots[pid.index()].next = self.head;
        self.head = Some(pid);
    }

    fn unlink(&mut self, pid: ProcessId) {
        let next = self.slots[pid.index()].next.take();
        if self.head == Some(pid) {
            self.head = next;
            return;
        }
        let mut cur = self.head;
        while let Some(c) = cur {
            if self.slots[c.index()].next == Some(pid) {
                self.slots[c.index()].next = next;
                return;
            }
            cur = self.slots[c.index()].next;
        }
    }

    fn live(&self) -> Batch<ProcessId, P> {
        let mut out = Batch::new();
        let mut cur = self.head;
        while let Some(pid) = cur {
            out.push(pid);
            cur = self.slots[pid.index()].next;
        }
        out
    }

    fn request_poll(&mut self, pid: ProcessId) -> bool {
        let Some(slot) = self.slot_mut(pid) else {
            return false;
        };
        if !slot.state.is_live() {
            return false;
        }
        slot.needs_poll = true;
        self.poll_requested = true;
        true
    }
}

pub struct Scheduler<'a, const P: usize, const E: usize, const T: usize> {
    clock: &'a (dyn Clock + Sync),
    table: Mutex<RefCell<Table<'a, P, E, T>>>,
}

impl<'a, const P: usize, const E: usize, const T: usize> Scheduler<'a, P, E, T> {
    pub const fn new(clock: &'a (dyn Clock + Sync)) -> Self {
        const {
            assert!(P <= 256, "process ids are u8 indices");
            assert!(T <= 256, "timer ids are u8 indices");
            assert!(E > 0, "event ring needs at least one slot");
        }
        Self {
            clock,
            table: Mutex::new(RefCell::new(Table {
                slots: [Slot::EMPTY; P],
                registered: 0,
                head: None,
                events: EventQueue::new(),
                poll_requested: false,
                timers: TimerTable::new(),
                next_event: FIRST_USER_EVENT as u16,
                stats: Stats::ZERO,
            })),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut Table<'a, P, E, T>) -> R) -> R {
        critical_section::with(|cs| f(&mut self.table.borrow_ref_mut(cs)))
    }

    /// Hand a body to the scheduler. It stays registered for the life of
    /// the scheduler; `start` links it in, exit unlinks it again.
    pub fn register(&self, body: &'a mut (dyn Process + 'a)) -> Result<ProcessId, RegisterError> {
        let name = body.name();
        let no_broadcast = body.no_broadcast();
        let registered = self.with(move |t| {
            if t.registered >= P {
                return Err(RegisterError::TableFull);
            }
            let pid = ProcessId::new(t.registered);
            t.slots[pid.index()] = Slot {
                body: Some(body),
                name,
                no_broadcast,
                ..Slot::EMPTY
            };
            t.registered += 1;
            Ok(pid)
        });
        match registered {
            Ok(pid) => debug!("{}: registered as {}", name, pid),
            Err(e) => warn!("{}: {}", name, e),
        }
        registered
    }

    /// One dispatch step. Returns how much was done: processes polled,
    /// ctimers fired, or the one event taken off the ring (even if its
    /// target had gone). Zero means idle.
    pub fn run(&self) -> usize {
        let mut work = 0;
        if self.with(|t| t.poll_requested) {
            work = self.do_poll();
        }
        if work == 0 {
            work = self.do_event();
        }
        work
    }

    /// Queued events plus one if a poll pass is pending.
    pub fn pending(&self) -> usize {
        self.with(|t| t.events.len() + usize::from(t.poll_requested))
    }

    /// The timer check. Call from the tick ISR after advancing the
    /// clock: etimer owners that ran out are polled, due ctimers
    /// request a poll pass.
    pub fn tick(&self) {
        let now = self.clock.now();
        self.with(|t| {
            for expired in t.timers.expire(now) {
                match expired {
                    Expired::Process(pid) => {
                        t.request_poll(pid);
                    }
                    Expired::Callback => t.poll_requested = true,
                }
            }
        });
    }

    pub fn timers_pending(&self) -> bool {
        self.with(|t| t.timers.pending())
    }

    /// When the soonest armed timer runs out, for programming a one-shot
    /// hardware timer before sleeping.
    pub fn next_expiration(&self) -> Option<ClockTime> {
        let now = self.clock.now();
        self.with(|t| t.timers.next_expiration(now))
    }

    pub fn state(&self, pid: ProcessId) -> Option<ProcessState> {
        self.with(|t| t.slot(pid).map(|s| s.state))
    }

    pub fn name(&self, pid: ProcessId) -> Option<&'static str> {
        self.with(|t| t.slot(pid).map(|s| s.name))
    }

    pub fn stats(&self) -> Stats {
        self.with(|t| t.stats)
    }

    /// Live processes in list order.
    pub fn processes(&self) -> impl Iterator<Item = ProcessId> {
        self.with(|t| t.live()).into_iter()
    }

    fn do_poll(&self) -> usize {
        let (polled, callbacks) = self.with(|t| {
            t.poll_requested = false;
            let mut polled: Batch<ProcessId, P> = Batch::new();
            let mut cur = t.head;
            while let Some(pid) = cur {
                let slot = &mut t.slots[pid.index()];
                if slot.needs_poll {
                    slot.needs_poll = false;
                    polled.push(pid);
                }
                cur = slot.next;
            }
            (polled, t.timers.take_fired_callbacks())
        });

        let mut work = 0;
        for fired in callbacks {
            trace!("ctimer {:?} fired", fired.timer.id());
            let mut cx = Context::new(self, fired.context);
            (fired.callback)(&mut cx, fired.timer, fired.data);
            work += 1;
        }
        for pid in polled {
            if self.call(pid, Event::bare(EventKind::Poll)) {
                self.with(|t| t.stats.polls += 1);
                work += 1;
            }
            // after the POLL, so an owner that re-armed its timer there
            // does not also get a stale TIMER
            for id in self.with(|t| t.timers.take_fired_for(pid)) {
                if self.call(pid, Event::new(EventKind::Timer, Data::Timer(id))) {
                    work += 1;
                }
            }
        }
        work
    }

    fn do_event(&self) -> usize {
        let Some(Posted { event, target }) = self.with(|t| t.events.pop()) else {
            return 0;
        };
        match target {
            Target::Process(pid) => {
                self.call(pid, event);
            }
            Target::Broadcast => {
                // processes started during the broadcast do not get it
                for pid in self.with(|t| t.live()) {
                    let (poll_pending, skip) = self.with(|t| {
                        (
                            t.poll_requested,
                            t.slot(pid).is_none_or(|s| s.no_broadcast),
                        )
                    });
                    if poll_pending {
                        self.do_poll();
                    }
                    if !skip {
                        self.call(pid, event);
                    }
                }
            }
        }
        1
    }

    /// Deliver `ev` to `pid` right now. False if the process is not live
    /// or is already somewhere up the call stack.
    fn call(&self, pid: ProcessId, ev: Event) -> bool {
        let checkout = self.with(|t| {
            let checkout = match t.slot_mut(pid) {
                Some(slot) if slot.state == ProcessState::Called => Checkout::Busy,
                Some(slot) if slot.state.is_live() => match slot.body.take() {
                    Some(body) => {
                        slot.state = ProcessState::Called;
                        Checkout::Run(body, slot.name)
                    }
                    None => Checkout::Busy,
                },
                _ => Checkout::Dead,
            };
            match checkout {
                Checkout::Run(..) => t.stats.delivered += 1,
                Checkout::Busy => t.stats.dropped_busy += 1,
                Checkout::Dead => t.stats.dropped_dead += 1,
            }
            checkout
        });
        let (body, name) = match checkout {
            Checkout::Run(body, name) => (body, name),
            Checkout::Busy => {
                debug!("{}: busy, {} dropped", pid, ev);
                return false;
            }
            Checkout::Dead => {
                debug!("{}: not running, {} dropped", pid, ev);
                return false;
            }
        };
        trace!("{} <- {}", name, ev);

        let mut cx = Context::new(self, Some(pid));
        match ev.kind {
            EventKind::Init => body.init(),
            EventKind::Poll => body.poll_handler(&mut cx),
            _ => {}
        }
        let ret = body.thread(&mut cx, ev);

        let owed = self.with(move |t| {
            let slot = &mut t.slots[pid.index()];
            if slot.exit_pending {
                slot.exit_pending = false;
                return Some(body);
            }
            if slot.state == ProcessState::Called {
                slot.state = ProcessState::Waiting;
            }
            slot.body = Some(body);
            None
        });
        if let Some(body) = owed {
            body.exit_handler(&mut cx);
            self.with(move |t| t.slots[pid.index()].body = Some(body));
        }

        if !ret.is_running() || ev.kind == EventKind::Exit {
            self.exit_process(pid);
        }
        true
    }

    fn exit_process(&self, pid: ProcessId) {
        let unlinked = self.with(|t| {
            let slot = t.slot_mut(pid)?;
            if !slot.state.is_live() {
                return None;
            }
            slot.state = ProcessState::None;
            slot.needs_poll = false;
            let name = slot.name;
            t.unlink(pid);
            Some((name, t.timers.release(pid)))
        });
        let Some((name, timers)) = unlinked else {
            return;
        };
        debug!("{}: exit, {} timer(s) released", name, timers);

        for peer in self.with(|t| t.live()) {
            self.call(peer, Event::new(EventKind::Exited, Data::Process(pid)));
        }

        let body = self.with(|t| {
            let slot = &mut t.slots[pid.index()];
            let body = slot.body.take();
            if body.is_none() {
                slot.exit_pending = true;
            }
            body
        });
        if let Some(body) = body {
            let mut cx = Context::new(self, Some(pid));
            body.exit_handler(&mut cx);
            self.with(move |t| t.slots[pid.index()].body = Some(body));
        }
    }
}

impl<'a, const P: usize, const E: usize, const T: usize> Kernel for Scheduler<'a, P, E, T> {
    fn now(&self) -> ClockTime {
        self.clock.now()
    }

    fn post(&self, target: Target, kind: EventKind, data: Data) -> Result<(), PostError> {
        let event = Event::new(kind, data);
        let posted = self.with(|t| {
            if let Target::Process(pid) = target {
                if t.slot(pid).is_none() {
                    return Err(PostError::NoSuchProcess(pid));
                }
            }
            match t.events.push(Posted { event, target }) {
                Ok(()) => {
                    t.stats.posted += 1;
                    t.stats.high_water = t.stats.high_water.max(t.events.len());
                    Ok(())
                }
                Err(rejected) => {
                    t.stats.dropped_full += 1;
                    Err(PostError::Full(rejected.event))
                }
            }
        });
        if let Err(e) = posted {
            warn!("post: {}", e);
        }
        posted
    }

    fn post_synch(&self, target: ProcessId, kind: EventKind, data: Data) {
        self.call(target, Event::new(kind, data));
    }

    fn poll(&self, pid: ProcessId) {
        self.with(|t| {
            t.request_poll(pid);
        });
    }

    fn start(&self, pid: ProcessId, data: Data) -> Result<(), StartError> {
        let name = self.with(|t| {
            let slot = t.slot_mut(pid).ok_or(StartError::NoSuchProcess(pid))?;
            // body missing means its exit handler is still running
            if slot.state.is_live() || slot.body.is_none() {
                return Err(StartError::AlreadyRunning(pid));
            }
            slot.state = ProcessState::Running;
            slot.needs_poll = false;
            slot.exit_pending = false;
            let name = slot.name;
            t.link(pid);
            Ok(name)
        })?;
        debug!("{}: start", name);
        self.call(pid, Event::new(EventKind::Init, data));
        Ok(())
    }

    fn exit(&self, pid: ProcessId) {
        self.exit_process(pid);
    }

    fn is_running(&self, pid: ProcessId) -> bool {
        self.with(|t| t.is_live(pid))
    }

    fn nevents(&self) -> usize {
        self.with(|t| t.events.len())
    }

    fn alloc_event(&self) -> Option<EventKind> {
        self.with(|t| {
            let code = u8::try_from(t.next_event).ok()?;
            t.next_event += 1;
            Some(EventKind::User(code))
        })
    }

    fn etimer_set(
        &self,
        owner: ProcessId,
        timer: &mut ETimer,
        interval: ClockTime,
    ) -> Result<(), TimerError> {
        let now = self.clock.now();
        let handle = timer.id;
        let armed = self.with(|t| {
            if !t.is_live(owner) {
                return Err(TimerError::NoProcess);
            }
            t.timers.arm(handle, Owner::Process(owner), now, interval)
        });
        match armed {
            Ok(id) => {
                timer.id = Some(id);
                Ok(())
            }
            Err(e) => {
                warn!("etimer for {}: {}", owner, e);
                Err(e)
            }
        }
    }

    fn etimer_reset(&self, timer: ETimer) {
        if let Some(id) = timer.id {
            self.with(|t| t.timers.reset(id));
        }
    }

    fn etimer_restart(&self, timer: ETimer) {
        if let Some(id) = timer.id {
            let now = self.clock.now();
            self.with(|t| t.timers.restart(id, now));
        }
    }

    fn etimer_adjust(&self, timer: ETimer, delta: i32) {
        if let Some(id) = timer.id {
            self.with(|t| t.timers.adjust(id, delta));
        }
    }

    fn etimer_stop(&self, timer: ETimer) {
        if let Some(id) = timer.id {
            self.with(|t| t.timers.stop(id));
        }
    }

    fn etimer_expired(&self, timer: ETimer) -> bool {
        let Some(id) = timer.id else {
            return true;
        };
        let now = self.clock.now();
        self.with(|t| t.timers.expired(id, now))
    }

    fn etimer_expiration_time(&self, timer: ETimer) -> Option<ClockTime> {
        let id = timer.id?;
        self.with(|t| t.timers.timer(id)).map(|tm| tm.expiration_time())
    }

    fn etimer_start_time(&self, timer: ETimer) -> Option<ClockTime> {
        let id = timer.id?;
        self.with(|t| t.timers.timer(id)).map(|tm| tm.start_time())
    }

    fn ctimer_set(
        &self,
        context: Option<ProcessId>,
        timer: &mut CTimer,
        interval: ClockTime,
        callback: Callback,
        data: Data,
    ) -> Result<(), TimerError> {
        let now = self.clock.now();
        let handle = timer.id;
        let owner = Owner::Callback {
            callback,
            data,
            context,
        };
        let armed = self.with(|t| {
            if context.is_some_and(|pid| !t.is_live(pid)) {
                return Err(TimerError::NoProcess);
            }
            t.timers.arm(handle, owner, now, interval)
        });
        match armed {
            Ok(id) => {
                timer.id = Some(id);
                Ok(())
            }
            Err(e) => {
                warn!("ctimer: {}", e);
                Err(e)
            }
        }
    }

    fn ctimer_reset(&self, timer: CTimer) {
        if let Some(id) = timer.id {
            self.with(|t| t.timers.reset(id));
        }
    }

    fn ctimer_restart(&self, timer: CTimer) {
        if let Some(id) = timer.id {
            let now = self.clock.now();
            self.with(|t| t.timers.restart(id, now));
        }
    }

    fn ctimer_stop(&self, timer: CTimer) {
        if let Some(id) = timer.id {
            self.with(|t| t.timers.stop(id));
        }
    }

    fn ctimer_expired(&self, timer: CTimer) -> bool {
        let Some(id) = timer.id else {
            return true;
        };
        let now = self.clock.now();
        self.with(|t| t.timers.expired(id, now))
    }
}
