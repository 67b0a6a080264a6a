// Process descriptors, the Process trait and the per-call Context.
//
// A process is a statically allocated body registered with a scheduler.
// Its ProcessId is the slot index and never changes, so it is the handle
// other processes and ISRs use to post to it and poll it.
//
// Process code never sees the scheduler directly. Each call gets a
// Context that knows which process is running and forwards to the
// Kernel trait, which the scheduler implements.

use core::fmt;

use crate::kernel::clock::ClockTime;
use crate::kernel::etimer::{CTimer, Callback, ETimer, TimerError};
use crate::kernel::event::{Data, Event, EventKind, Target};
use crate::kernel::pt::PtState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(u8);

impl ProcessId {
    pub(crate) const fn new(index: usize) -> Self {
        Self(index as u8)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Lifecycle of a descriptor.
///
/// `None -> Running` on start, `Called` while the dispatcher is inside
/// the thread, `Waiting` once it suspends, back to `None` on exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    None,
    Running,
    Waiting,
    Called,
}

impl ProcessState {
    #[inline]
    pub const fn is_live(self) -> bool {
        !matches!(self, ProcessState::None)
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessState::None => write!(f, "none"),
            ProcessState::Running => write!(f, "running"),
            ProcessState::Waiting => write!(f, "waiting"),
            ProcessState::Called => write!(f, "called"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostError {
    /// Ring full; contains the rejected event.
    Full(Event),
    NoSuchProcess(ProcessId),
}

impl fmt::Display for PostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PostError::Full(ev) => write!(f, "event queue full, rejected {}", ev),
            PostError::NoSuchProcess(pid) => write!(f, "no process {}", pid),
        }
    }
}

impl core::error::Error for PostError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartError {
    AlreadyRunning(ProcessId),
    NoSuchProcess(ProcessId),
}

impl fmt::Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartError::AlreadyRunning(pid) => write!(f, "{} already running", pid),
            StartError::NoSuchProcess(pid) => write!(f, "no process {}", pid),
        }
    }
}

impl core::error::Error for StartError {}

/// A process body.
///
/// `thread` is the protothread: it runs from its saved resume point to
/// the next wait point and returns. It must return; nothing preempts it.
pub trait Process: Send {
    fn name(&self) -> &'static str;

    /// PT_INIT. Called right before INIT is delivered, on every start,
    /// so a restarted process begins from the top of its body.
    fn init(&mut self) {}

    fn thread(&mut self, cx: &mut Context<'_>, ev: Event) -> PtState;

    /// Runs ahead of `thread` whenever a POLL is delivered.
    fn poll_handler(&mut self, _cx: &mut Context<'_>) {}

    /// Runs exactly once per exit, whether the body ended by itself or
    /// something else called exit on it.
    fn exit_handler(&mut self, _cx: &mut Context<'_>) {}

    /// Opt out of broadcast events. Sampled at registration.
    fn no_broadcast(&self) -> bool {
        false
    }
}

/// The scheduler as process code sees it.
///
/// `post`, `poll` and the timer predicates are also what ISRs and
/// drivers use; every method is safe to call from interrupt context
/// except `post_synch`, `start` and `exit`, which run process code.
pub trait Kernel {
    fn now(&self) -> ClockTime;

    /// Queue an event. Never blocks; a full ring is reported, not retried.
    fn post(&self, target: Target, kind: EventKind, data: Data) -> Result<(), PostError>;

    /// Deliver right now, in the caller's context, bypassing the ring.
    fn post_synch(&self, target: ProcessId, kind: EventKind, data: Data);

    /// Ask for a POLL ahead of queued events. Idempotent until serviced.
    fn poll(&self, pid: ProcessId);

    /// Link `pid` in and run its INIT to the first wait point before
    /// returning.
    fn start(&self, pid: ProcessId, data: Data) -> Result<(), StartError>;

    fn exit(&self, pid: ProcessId);

    fn is_running(&self, pid: ProcessId) -> bool;

    /// Events waiting in the ring.
    fn nevents(&self) -> usize;

    /// A fresh application event kind, or `None` once the code space
    /// is used up.
    fn alloc_event(&self) -> Option<EventKind>;

    fn etimer_set(
        &self,
        owner: ProcessId,
        timer: &mut ETimer,
        interval: ClockTime,
    ) -> Result<(), TimerError>;
    fn etimer_reset(&self, timer: ETimer);
    fn etimer_restart(&self, timer: ETimer);
    fn etimer_adjust(&self, timer: ETimer, delta: i32);
    fn etimer_stop(&self, timer: ETimer);
    /// True once the tick count reached the expiration, or if the timer
    /// is not armed. No side effects.
    fn etimer_expired(&self, timer: ETimer) -> bool;
    fn etimer_expiration_time(&self, timer: ETimer) -> Option<ClockTime>;
    fn etimer_start_time(&self, timer: ETimer) -> Option<ClockTime>;

    fn ctimer_set(
        &self,
        context: Option<ProcessId>,
        timer: &mut CTimer,
        interval: ClockTime,
        callback: Callback,
        data: Data,
    ) -> Result<(), TimerError>;
    fn ctimer_reset(&self, timer: CTimer);
    fn ctimer_restart(&self, timer: CTimer);
    fn ctimer_stop(&self, timer: CTimer);
    fn ctimer_expired(&self, timer: CTimer) -> bool;
}

pub struct Context<'k> {
    kernel: &'k dyn Kernel,
    current: Option<ProcessId>,
}

impl<'k> Context<'k> {
    pub fn new(kernel: &'k dyn Kernel, current: Option<ProcessId>) -> Self {
        Self { kernel, current }
    }

    /// The running process. `None` inside a ctimer callback that was set
    /// from outside any process.
    #[inline]
    pub fn current(&self) -> Option<ProcessId> {
        self.current
    }

    #[inline]
    pub fn kernel(&self) -> &'k dyn Kernel {
        self.kernel
    }

    #[inline]
    pub fn now(&self) -> ClockTime {
        self.kernel.now()
    }

    pub fn post(
        &self,
        target: impl Into<Target>,
        kind: EventKind,
        data: Data,
    ) -> Result<(), PostError> {
        self.kernel.post(target.into(), kind, data)
    }

    pub fn broadcast(&self, kind: EventKind, data: Data) -> Result<(), PostError> {
        self.kernel.post(Target::Broadcast, kind, data)
    }

    pub fn post_synch(&self, target: ProcessId, kind: EventKind, data: Data) {
        self.kernel.post_synch(target, kind, data);
    }

    pub fn poll(&self, pid: ProcessId) {
        self.kernel.poll(pid);
    }

    pub fn start(&self, pid: ProcessId, data: Data) -> Result<(), StartError> {
        self.kernel.start(pid, data)
    }

    /// Stop another process.
    pub fn exit_process(&self, pid: ProcessId) {
        self.kernel.exit(pid);
    }

    /// Stop the current process. From a thread, prefer returning
    /// `PtState::Exited`; this is for callbacks and nested helpers.
    pub fn exit(&self) {
        if let Some(pid) = self.current {
            self.kernel.exit(pid);
        }
    }

    pub fn is_running(&self, pid: ProcessId) -> bool {
        self.kernel.is_running(pid)
    }

    pub fn alloc_event(&self) -> Option<EventKind> {
        self.kernel.alloc_event()
    }

    /// PROCESS_PAUSE, first half: queue CONTINUE to ourselves. Follow
    /// with `pt_yield_until!(pt, ev.is(EventKind::Continue))` so other
    /// pending events get their turn first.
    pub fn pause(&self) -> Result<(), PostError> {
        match self.current {
            Some(pid) => self
                .kernel
                .post(Target::Process(pid), EventKind::Continue, Data::None),
            None => Ok(()),
        }
    }

    /// Arm `timer` for the current process: TIMER (and a POLL) arrive
    /// `interval` ticks from now.
    pub fn etimer_set(&self, timer: &mut ETimer, interval: ClockTime) -> Result<(), TimerError> {
        let owner = self.current.ok_or(TimerError::NoProcess)?;
        self.kernel.etimer_set(owner, timer, interval)
    }

    pub fn etimer_reset(&self, timer: ETimer) {
        self.kernel.etimer_reset(timer);
    }

    pub fn etimer_restart(&self, timer: ETimer) {
        self.kernel.etimer_restart(timer);
    }

    pub fn etimer_adjust(&self, timer: ETimer, delta: i32) {
        self.kernel.etimer_adjust(timer, delta);
    }

    pub fn etimer_stop(&self, timer: ETimer) {
        self.kernel.etimer_stop(timer);
    }

    pub fn etimer_expired(&self, timer: ETimer) -> bool {
        self.kernel.etimer_expired(timer)
    }

    pub fn ctimer_set(
        &self,
        timer: &mut CTimer,
        interval: ClockTime,
        callback: Callback,
        data: Data,
    ) -> Result<(), TimerError> {
        self.kernel
            .ctimer_set(self.current, timer, interval, callback, data)
    }

    pub fn ctimer_reset(&self, timer: CTimer) {
        self.kernel.ctimer_reset(timer);
    }

    pub fn ctimer_restart(&self, timer: CTimer) {
        self.kernel.ctimer_restart(timer);
    }

    pub fn ctimer_stop(&self, timer: CTimer) {
        self.kernel.ctimer_stop(timer);
    }

    pub fn ctimer_expired(&self, timer: CTimer) -> bool {
        self.kernel.ctimer_expired(timer)
    }
}
