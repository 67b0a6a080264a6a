// Events, their targets, and the fixed ring that queues them.
//
// The ring never grows and never blocks. A push into a full ring hands
// the entry back and leaves everything already queued untouched.

use core::fmt;

use crate::kernel::etimer::TimerId;
use crate::kernel::process::ProcessId;

/// Event kinds. Reserved kinds keep the classic 0x80.. codes so traces
/// line up with existing tooling; anything else is application-defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    None,
    Init,
    Poll,
    Exit,
    ServiceRemoved,
    Continue,
    Msg,
    Exited,
    Timer,
    Com,
    User(u8),
}

/// First code `alloc_event` hands out.
pub const FIRST_USER_EVENT: u8 = 0x8a;

impl EventKind {
    pub const fn code(self) -> u8 {
        match self {
            EventKind::None => 0x80,
            EventKind::Init => 0x81,
            EventKind::Poll => 0x82,
            EventKind::Exit => 0x83,
            EventKind::ServiceRemoved => 0x84,
            EventKind::Continue => 0x85,
            EventKind::Msg => 0x86,
            EventKind::Exited => 0x87,
            EventKind::Timer => 0x88,
            EventKind::Com => 0x89,
            EventKind::User(code) => code,
        }
    }

    pub const fn from_code(code: u8) -> Self {
        match code {
            0x80 => EventKind::None,
            0x81 => EventKind::Init,
            0x82 => EventKind::Poll,
            0x83 => EventKind::Exit,
            0x84 => EventKind::ServiceRemoved,
            0x85 => EventKind::Continue,
            0x86 => EventKind::Msg,
            0x87 => EventKind::Exited,
            0x88 => EventKind::Timer,
            0x89 => EventKind::Com,
            code => EventKind::User(code),
        }
    }

    pub const fn is_reserved(self) -> bool {
        !matches!(self, EventKind::User(_))
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::None => write!(f, "NONE"),
            EventKind::Init => write!(f, "INIT"),
            EventKind::Poll => write!(f, "POLL"),
            EventKind::Exit => write!(f, "EXIT"),
            EventKind::ServiceRemoved => write!(f, "SERVICE_REMOVED"),
            EventKind::Continue => write!(f, "CONTINUE"),
            EventKind::Msg => write!(f, "MSG"),
            EventKind::Exited => write!(f, "EXITED"),
            EventKind::Timer => write!(f, "TIMER"),
            EventKind::Com => write!(f, "COM"),
            EventKind::User(code) => write!(f, "USER({:#04x})", code),
        }
    }
}

/// Payload carried with an event. Plain values only: the ring is shared
/// with interrupt context, so no borrowed data travels through it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Data {
    #[default]
    None,
    Value(usize),
    Process(ProcessId),
    Timer(TimerId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub data: Data,
}

impl Event {
    pub const fn new(kind: EventKind, data: Data) -> Self {
        Self { kind, data }
    }

    pub const fn bare(kind: EventKind) -> Self {
        Self::new(kind, Data::None)
    }

    #[inline]
    pub fn is(&self, kind: EventKind) -> bool {
        self.kind == kind
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.data {
            Data::None => write!(f, "{}", self.kind),
            Data::Value(v) => write!(f, "{}({})", self.kind, v),
            Data::Process(p) => write!(f, "{}({})", self.kind, p),
            Data::Timer(t) => write!(f, "{}({})", self.kind, t),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Every live process except those that opted out of broadcasts.
    Broadcast,
    Process(ProcessId),
}

impl From<ProcessId> for Target {
    fn from(pid: ProcessId) -> Self {
        Target::Process(pid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Posted {
    pub event: Event,
    pub target: Target,
}

/// The pending-event ring: `len` entries starting at `head`, oldest
/// first.
pub struct EventQueue<const N: usize> {
    slots: [Option<Posted>; N],
    head: usize,
    len: usize,
}

impl<const N: usize> EventQueue<N> {
    pub const fn new() -> Self {
        Self {
            slots: [None; N],
            head: 0,
            len: 0,
        }
    }

    /// Queue behind everything already pending. A full ring hands the
    /// entry back.
    pub fn push(&mut self, posted: Posted) -> Result<(), Posted> {
        if self.len == N {
            return Err(posted);
        }
        self.slots[(self.head + self.len) % N] = Some(posted);
        self.len += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Posted> {
        let posted = self.slots.get_mut(self.head)?.take()?;
        self.head = (self.head + 1) % N;
        self.len -= 1;
        Some(posted)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<const N: usize> Default for EventQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn posted(v: usize) -> Posted {
        Posted {
            event: Event::new(EventKind::User(0x90), Data::Value(v)),
            target: Target::Broadcast,
        }
    }

    #[test]
    fn full_ring_rejects_and_keeps_contents() {
        let mut q: EventQueue<3> = EventQueue::new();
        assert!(q.pop().is_none());
        for i in 0..3 {
            q.push(posted(i)).expect("ring should have room");
        }

        let rejected = q.push(posted(99)).unwrap_err();
        assert_eq!(rejected, posted(99));
        assert_eq!(q.len(), 3);

        for i in 0..3 {
            assert_eq!(q.pop(), Some(posted(i)));
        }
        assert!(q.pop().is_none());
        assert!(q.is_empty());
    }

    #[test]
    fn wraps_around_backing_array() {
        let mut q: EventQueue<4> = EventQueue::new();
        // move head off zero, then fill across the seam
        for i in 0..3 {
            q.push(posted(i)).unwrap();
            q.pop().unwrap();
        }
        for i in 10..14 {
            q.push(posted(i)).unwrap();
        }
        assert!(q.push(posted(14)).is_err());
        for i in 10..14 {
            assert_eq!(q.pop(), Some(posted(i)));
        }
    }

    #[test]
    fn codes_round_trip_for_reserved_kinds() {
        for code in 0x80..=0x89u8 {
            let kind = EventKind::from_code(code);
            assert!(kind.is_reserved());
            assert_eq!(kind.code(), code);
        }
        assert_eq!(EventKind::from_code(FIRST_USER_EVENT), EventKind::User(0x8a));
        assert_eq!(EventKind::from_code(0x10), EventKind::User(0x10));
    }
}
