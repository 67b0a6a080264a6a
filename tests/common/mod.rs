#![allow(dead_code)]

use std::sync::Mutex;

use ptos::kernel::{Context, Data, Event, EventKind, Process, PtState, Scheduler};

pub type Seen = (&'static str, EventKind, Data);
pub type Log = Mutex<Vec<Seen>>;

/// Test process: records every delivery, then hands the event to `body`.
pub struct Probe<'l, F> {
    name: &'static str,
    log: &'l Log,
    deaf: bool,
    body: F,
}

impl<'l, F> Probe<'l, F>
where
    F: FnMut(&mut Context<'_>, &Event) -> PtState + Send,
{
    pub fn new(name: &'static str, log: &'l Log, body: F) -> Self {
        Self {
            name,
            log,
            deaf: false,
            body,
        }
    }

    pub fn deaf(mut self) -> Self {
        self.deaf = true;
        self
    }
}

impl<F> Process for Probe<'_, F>
where
    F: FnMut(&mut Context<'_>, &Event) -> PtState + Send,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn thread(&mut self, cx: &mut Context<'_>, ev: Event) -> PtState {
        note(self.log, self.name, ev.kind, ev.data);
        (self.body)(cx, &ev)
    }

    fn no_broadcast(&self) -> bool {
        self.deaf
    }
}

/// A probe that waits forever.
pub fn idle<'l>(
    name: &'static str,
    log: &'l Log,
) -> Probe<'l, impl FnMut(&mut Context<'_>, &Event) -> PtState + Send> {
    Probe::new(name, log, |_, _| PtState::Waiting)
}

pub fn note(log: &Log, name: &'static str, kind: EventKind, data: Data) {
    log.lock().unwrap().push((name, kind, data));
}

pub fn seen(log: &Log) -> Vec<Seen> {
    log.lock().unwrap().clone()
}

pub fn kinds(log: &Log) -> Vec<(&'static str, EventKind)> {
    log.lock().unwrap().iter().map(|(n, k, _)| (*n, *k)).collect()
}

pub fn clear(log: &Log) {
    log.lock().unwrap().clear();
}

/// Run until idle; total work done.
pub fn drain<const P: usize, const E: usize, const T: usize>(
    sched: &Scheduler<'_, P, E, T>,
) -> usize {
    let mut total = 0;
    loop {
        match sched.run() {
            0 => return total,
            n => total += n,
        }
    }
}
