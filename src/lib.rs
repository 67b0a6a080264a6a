// event-driven cooperative kernel for small single-core targets
// (protothread processes, event ring, etimer/ctimer)

#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod kernel;

pub use kernel::{
    CTimer, Clock, ClockTime, Context, DefaultScheduler, Data, ETimer, Event, EventKind, Kernel,
    Process, ProcessId, Pt, PtState, Scheduler, Target, TickCounter,
};
