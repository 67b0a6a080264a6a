// Protothreads: stackless coroutines over one local continuation.
//
// A body is written as
//
//     self.pt.begin();
//     loop {
//         match self.pt.point() {
//             Step::Start => { ...; self.pt.set(Step::Wait); }
//             Step::Wait => {
//                 pt_wait_until!(ready);
//                 ...;
//                 self.pt.set(Step::Done);
//             }
//             Step::Done => return self.pt.end(),
//         }
//     }
//
// set() falls through to the next arm within the same call; the wait
// macros return out of the body and the next call re-enters the arm that
// suspended. Cooperative: a body that never returns a waiting state
// holds the CPU and every other process with it.

use crate::kernel::lc::Lc;

/// What a protothread call reports back to its driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtState {
    Waiting = 0,
    Yielded = 1,
    Exited = 2,
    Ended = 3,
}

impl PtState {
    /// PT_SCHEDULE: the thread will want to be called again.
    #[inline]
    pub const fn is_running(self) -> bool {
        matches!(self, PtState::Waiting | PtState::Yielded)
    }
}

pub struct Pt<S> {
    lc: Lc<S>,
    // begin() ran since the last init: any later call is a resume
    started: bool,
    // true while the current arm was entered by resume, false on the
    // first call and once set() moved us here inside the same call
    resumed: bool,
}

impl<S: Copy> Pt<S> {
    pub const fn new(start: S) -> Self {
        Self {
            lc: Lc::new(start),
            started: false,
            resumed: false,
        }
    }

    /// PT_INIT.
    pub fn init(&mut self) {
        self.lc.init();
        self.started = false;
        self.resumed = false;
    }

    /// PT_BEGIN. Call once at the top of every invocation.
    ///
    /// The first call after `new`/`init` is not a resume, so a yield or
    /// wait-event in the start arm suspends on it.
    pub fn begin(&mut self) -> S {
        self.resumed = self.started;
        self.started = true;
        self.lc.resume()
    }

    /// The arm to run.
    #[inline]
    pub fn point(&self) -> S {
        self.lc.resume()
    }

    /// Move to `point`. Falls through if the caller keeps looping.
    #[inline]
    pub fn set(&mut self, point: S) {
        self.lc.set(point);
        self.resumed = false;
    }

    /// Whether this arm has been suspended in at least once since it was
    /// reached, counting the start arm on the thread's first call. The
    /// yield macros key off this.
    #[inline]
    pub fn resumed(&self) -> bool {
        self.resumed
    }

    /// PT_END.
    pub fn end(&mut self) -> PtState {
        self.lc.end();
        self.init();
        PtState::Ended
    }

    /// PT_EXIT.
    pub fn exit(&mut self) -> PtState {
        self.init();
        PtState::Exited
    }

    /// PT_RESTART: back to the start, resumed on the next call.
    pub fn restart(&mut self) -> PtState {
        self.init();
        PtState::Waiting
    }
}

/// Suspend until `cond` holds. Re-checked on every call, so something
/// has to keep calling (an event, a poll) for it to ever pass.
#[macro_export]
macro_rules! pt_wait_until {
    ($cond:expr) => {
        if !($cond) {
            return $crate::kernel::pt::PtState::Waiting;
        }
    };
}

#[macro_export]
macro_rules! pt_wait_while {
    ($cond:expr) => {
        if $cond {
            return $crate::kernel::pt::PtState::Waiting;
        }
    };
}

/// PT_WAIT_THREAD: drive a child protothread until it finishes.
#[macro_export]
macro_rules! pt_wait_thread {
    ($child:expr) => {
        if ($child).is_running() {
            return $crate::kernel::pt::PtState::Waiting;
        }
    };
}

/// Give up the CPU once, then carry on in this arm.
#[macro_export]
macro_rules! pt_yield {
    ($pt:expr) => {
        if !$pt.resumed() {
            return $crate::kernel::pt::PtState::Yielded;
        }
    };
}

/// Yield at least once, then keep yielding until `cond` holds.
#[macro_export]
macro_rules! pt_yield_until {
    ($pt:expr, $cond:expr) => {
        if !$pt.resumed() || !($cond) {
            return $crate::kernel::pt::PtState::Yielded;
        }
    };
}

/// PROCESS_WAIT_EVENT: suspend until the next event arrives, whatever
/// it is.
#[macro_export]
macro_rules! pt_wait_event {
    ($pt:expr) => {
        $crate::pt_yield!($pt)
    };
}

/// PROCESS_WAIT_EVENT_UNTIL: suspend, then keep suspending until an
/// event arrives for which `cond` holds.
#[macro_export]
macro_rules! pt_wait_event_until {
    ($pt:expr, $cond:expr) => {
        $crate::pt_yield_until!($pt, $cond)
    };
}

/// Counting semaphore for protothreads sharing one cooperative CPU.
///
/// Wait with `pt_wait_until!(sem.try_acquire())`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Semaphore {
    count: u32,
}

impl Semaphore {
    pub const fn new(count: u32) -> Self {
        Self { count }
    }

    pub fn try_acquire(&mut self) -> bool {
        if self.count == 0 {
            return false;
        }
        self.count -= 1;
        true
    }

    pub fn signal(&mut self) {
        self.count = self.count.saturating_add(1);
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Step {
        Start,
        Wait,
        Yield,
        Done,
    }

    // counts how often it got past each point; the counters live in the
    // struct, so they survive suspensions
    struct Waiter {
        pt: Pt<Step>,
        ready: bool,
        passed_wait: u32,
        passed_yield: u32,
    }

    impl Waiter {
        fn new() -> Self {
            Self {
                pt: Pt::new(Step::Start),
                ready: false,
                passed_wait: 0,
                passed_yield: 0,
            }
        }

        fn run(&mut self) -> PtState {
            self.pt.begin();
            loop {
                match self.pt.point() {
                    Step::Start => self.pt.set(Step::Wait),
                    Step::Wait => {
                        pt_wait_until!(self.ready);
                        self.passed_wait += 1;
                        self.pt.set(Step::Yield);
                    }
                    Step::Yield => {
                        pt_yield!(self.pt);
                        self.passed_yield += 1;
                        self.pt.set(Step::Done);
                    }
                    Step::Done => return self.pt.end(),
                }
            }
        }
    }

    #[test]
    fn wait_until_blocks_until_condition() {
        let mut w = Waiter::new();
        assert_eq!(w.run(), PtState::Waiting);
        assert_eq!(w.run(), PtState::Waiting);
        assert_eq!(w.passed_wait, 0);

        w.ready = true;
        // passes the wait, then must give up the CPU at the yield
        assert_eq!(w.run(), PtState::Yielded);
        assert_eq!(w.passed_wait, 1);
        assert_eq!(w.passed_yield, 0);

        assert_eq!(w.run(), PtState::Ended);
        assert_eq!(w.passed_yield, 1);
    }

    #[test]
    fn end_reinitialises() {
        let mut w = Waiter::new();
        w.ready = true;
        w.run();
        assert_eq!(w.run(), PtState::Ended);
        assert_eq!(w.pt.point(), Step::Start);
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Gate {
        Start,
        Until,
        Done,
    }

    struct YieldUntil {
        pt: Pt<Gate>,
        open: bool,
    }

    impl YieldUntil {
        fn run(&mut self) -> PtState {
            self.pt.begin();
            loop {
                match self.pt.point() {
                    Gate::Start => self.pt.set(Gate::Until),
                    Gate::Until => {
                        pt_yield_until!(self.pt, self.open);
                        self.pt.set(Gate::Done);
                    }
                    Gate::Done => return self.pt.end(),
                }
            }
        }
    }

    #[test]
    fn yield_until_suspends_even_if_condition_already_true() {
        let mut y = YieldUntil {
            pt: Pt::new(Gate::Start),
            open: true,
        };
        assert_eq!(y.run(), PtState::Yielded);
        assert_eq!(y.run(), PtState::Ended);
    }

    #[test]
    fn yield_until_keeps_yielding_while_false() {
        let mut y = YieldUntil {
            pt: Pt::new(Gate::Start),
            open: false,
        };
        assert_eq!(y.run(), PtState::Yielded);
        assert_eq!(y.run(), PtState::Yielded);
        y.open = true;
        assert_eq!(y.run(), PtState::Ended);
    }

    // parent drives a child to completion with pt_wait_thread!
    struct Child {
        pt: Pt<Gate>,
        ticks: u32,
    }

    impl Child {
        fn run(&mut self) -> PtState {
            self.pt.begin();
            loop {
                match self.pt.point() {
                    Gate::Start => {
                        self.ticks = 0;
                        self.pt.set(Gate::Until);
                    }
                    Gate::Until => {
                        self.ticks += 1;
                        pt_wait_until!(self.ticks >= 3);
                        self.pt.set(Gate::Done);
                    }
                    Gate::Done => return self.pt.exit(),
                }
            }
        }
    }

    struct Parent {
        pt: Pt<Gate>,
        child: Child,
    }

    impl Parent {
        fn run(&mut self) -> PtState {
            self.pt.begin();
            loop {
                match self.pt.point() {
                    Gate::Start => {
                        self.child.pt.init();
                        self.pt.set(Gate::Until);
                    }
                    Gate::Until => {
                        pt_wait_thread!(self.child.run());
                        self.pt.set(Gate::Done);
                    }
                    Gate::Done => return self.pt.end(),
                }
            }
        }
    }

    #[test]
    fn child_thread_runs_to_completion() {
        let mut p = Parent {
            pt: Pt::new(Gate::Start),
            child: Child {
                pt: Pt::new(Gate::Start),
                ticks: 0,
            },
        };
        assert_eq!(p.run(), PtState::Waiting);
        assert_eq!(p.run(), PtState::Waiting);
        assert_eq!(p.run(), PtState::Ended);
        assert_eq!(p.child.ticks, 3);
    }

    // waits for the third event of kind 7, whatever else arrives
    struct Counter {
        pt: Pt<Gate>,
        seen: u32,
    }

    impl Counter {
        fn run(&mut self, ev: u8) -> PtState {
            self.pt.begin();
            loop {
                match self.pt.point() {
                    Gate::Start => self.pt.set(Gate::Until),
                    Gate::Until => {
                        pt_wait_event_until!(self.pt, ev == 7);
                        self.seen += 1;
                        if self.seen < 3 {
                            self.pt.set(Gate::Until);
                            pt_wait_event!(self.pt);
                        }
                        self.pt.set(Gate::Done);
                    }
                    Gate::Done => return self.pt.end(),
                }
            }
        }
    }

    #[test]
    fn wait_event_until_filters_events() {
        let mut c = Counter {
            pt: Pt::new(Gate::Start),
            seen: 0,
        };
        // the event that started the thread never satisfies the wait
        assert_eq!(c.run(7), PtState::Yielded);
        assert_eq!(c.run(1), PtState::Yielded);
        assert_eq!(c.run(7), PtState::Yielded);
        assert_eq!(c.seen, 1);
        assert_eq!(c.run(7), PtState::Yielded);
        assert_eq!(c.run(7), PtState::Ended);
        assert_eq!(c.seen, 3);
    }

    // PROCESS_BEGIN(); PROCESS_WAIT_EVENT(); ... with nothing in between
    struct FirstWait {
        pt: Pt<Gate>,
        got: Option<u8>,
    }

    impl FirstWait {
        fn run(&mut self, ev: u8) -> PtState {
            self.pt.begin();
            loop {
                match self.pt.point() {
                    Gate::Start => {
                        pt_wait_event!(self.pt);
                        self.got = Some(ev);
                        self.pt.set(Gate::Done);
                    }
                    Gate::Until => self.pt.set(Gate::Done),
                    Gate::Done => return self.pt.end(),
                }
            }
        }
    }

    #[test]
    fn wait_event_in_start_arm_skips_the_first_call() {
        let mut w = FirstWait {
            pt: Pt::new(Gate::Start),
            got: None,
        };
        assert_eq!(w.run(1), PtState::Yielded);
        assert_eq!(w.got, None);
        assert_eq!(w.run(2), PtState::Ended);
        assert_eq!(w.got, Some(2));

        // end() re-initialises, so the next first call suspends again
        w.got = None;
        assert_eq!(w.run(3), PtState::Yielded);
        assert_eq!(w.got, None);
        w.pt.init();
        assert_eq!(w.run(4), PtState::Yielded);
        assert_eq!(w.run(5), PtState::Ended);
        assert_eq!(w.got, Some(5));
    }

    #[test]
    fn restart_goes_back_to_start() {
        let mut pt = Pt::new(Gate::Start);
        pt.set(Gate::Done);
        assert_eq!(pt.restart(), PtState::Waiting);
        assert_eq!(pt.point(), Gate::Start);
    }

    #[test]
    fn semaphore_counts() {
        let mut sem = Semaphore::new(1);
        assert!(sem.try_acquire());
        assert!(!sem.try_acquire());
        sem.signal();
        sem.signal();
        assert_eq!(sem.count(), 2);
        assert!(sem.try_acquire());
        assert!(sem.try_acquire());
        assert!(!sem.try_acquire());
    }

    #[test]
    fn running_states() {
        assert!(PtState::Waiting.is_running());
        assert!(PtState::Yielded.is_running());
        assert!(!PtState::Exited.is_running());
        assert!(!PtState::Ended.is_running());
    }
}
