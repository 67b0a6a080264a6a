// Cooperative process kernel
// Single core, no preemption. Processes are protothreads driven by
// events; ISRs only post, poll and tick, the main loop dispatches.
//
// lc/pt:      resumable control flow for process bodies
// event:      event kinds and the fixed ring
// process:    descriptors, the Process trait, the per-call Context
// scheduler:  dispatch, lifecycle, poll-before-event
// timer:      wrap-safe interval arithmetic
// etimer:     event and callback timers
// clock/wake: tick source and the ISR -> main loop wake flag

pub(crate) mod batch;
pub mod clock;
pub mod etimer;
pub mod event;
pub mod lc;
pub mod process;
pub mod pt;
pub mod scheduler;
pub mod timer;
pub mod wake;

pub use clock::{Clock, ClockTime, TickCounter};
pub use etimer::{CTimer, Callback, ETimer, TimerError, TimerId};
pub use event::{Data, Event, EventKind, EventQueue, Target};
pub use lc::Lc;
pub use process::{Context, Kernel, PostError, Process, ProcessId, ProcessState, StartError};
pub use pt::{Pt, PtState, Semaphore};
pub use scheduler::{DefaultScheduler, RegisterError, Scheduler, Stats};
pub use timer::Timer;
pub use wake::{Wake, wait_for_interrupt};
