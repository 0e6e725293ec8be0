//! One-shot timer queue: a min-heap of `(deadline, kind)` entries with
//! idempotent cancellation. The embedding loop polls `next_deadline` and
//! calls back in between frames.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum TimerKind {
    DwtKeyboard,
    Trackpoint,
}

const TIMER_KINDS: usize = 2;

fn slot(kind: TimerKind) -> usize {
    match kind {
        TimerKind::DwtKeyboard => 0,
        TimerKind::Trackpoint => 1,
    }
}

/// Stale heap entries are skipped on pop; `armed` holds the authoritative
/// deadline per kind.
#[derive(Debug, Default)]
pub(crate) struct TimerQueue {
    heap: BinaryHeap<Reverse<(u64, TimerKind)>>,
    armed: [Option<u64>; TIMER_KINDS],
}

impl TimerQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Arm or re-arm; a later `set` replaces any pending deadline.
    pub(crate) fn set(&mut self, kind: TimerKind, deadline: u64) {
        self.armed[slot(kind)] = Some(deadline);
        self.heap.push(Reverse((deadline, kind)));
    }

    pub(crate) fn cancel(&mut self, kind: TimerKind) {
        self.armed[slot(kind)] = None;
    }

    pub(crate) fn next_deadline(&mut self) -> Option<u64> {
        self.drop_stale();
        self.heap.peek().map(|Reverse((deadline, _))| *deadline)
    }

    /// Pop one expired timer, oldest deadline first.
    pub(crate) fn pop_expired(&mut self, now: u64) -> Option<TimerKind> {
        self.drop_stale();
        match self.heap.peek() {
            Some(Reverse((deadline, kind))) if *deadline <= now => {
                let kind = *kind;
                self.heap.pop();
                self.armed[slot(kind)] = None;
                Some(kind)
            }
            _ => None,
        }
    }

    fn drop_stale(&mut self) {
        while let Some(Reverse((deadline, kind))) = self.heap.peek() {
            if self.armed[slot(*kind)] == Some(*deadline) {
                break;
            }
            self.heap.pop();
        }
    }
}
