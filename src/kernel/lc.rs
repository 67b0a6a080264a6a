// Local continuation: the single saved resume point of a protothread.
//
// The resume point is a caller-defined Copy enum naming each wait point
// in the body, and the body is one flat match over it. A wait point can
// therefore only sit at the top level of the thread, never inside a
// nested loop or a helper call.
//
// Only what lives in the process struct survives a suspension. Locals in
// a match arm are gone on the next resume.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lc<S> {
    start: S,
    point: S,
}

impl<S: Copy> Lc<S> {
    /// `start` is the point a fresh or re-initialised body resumes at.
    pub const fn new(start: S) -> Self {
        Self {
            start,
            point: start,
        }
    }

    /// LC_INIT: next resume lands at the start of the body.
    #[inline]
    pub fn init(&mut self) {
        self.point = self.start;
    }

    /// LC_SET: record where the next resume lands.
    #[inline]
    pub fn set(&mut self, point: S) {
        self.point = point;
    }

    /// LC_RESUME: the point to jump to.
    #[inline]
    pub fn resume(&self) -> S {
        self.point
    }

    /// LC_END. Nothing to release; kept so bodies read symmetrically.
    #[inline]
    pub fn end(&self) {}
}
