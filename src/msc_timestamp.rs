//! MSC-timestamp jump correction.
//!
//! Some controllers stop reporting while asleep and resume with a large
//! timestamp delta. Left alone, the motion accumulated across the sleep
//! reads as one fast flick. This machine watches the first two timestamps
//! after a counter reset; when the second one arrives late, the per-touch
//! history is re-timed across the gap and the accel filter restarted, so
//! the pending motion becomes one ordinary long-interval delta.

use heapless::Vec;
use statig::{blocking::IntoStateMachineExt as _, prelude::*};

use crate::config::ms2us;

/// Largest credible first-frame interval; anything later means we came in
/// mid-stream and the counter is not worth tracking.
const FIRST_INTERVAL_CUTOFF: u64 = ms2us(20);

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum MscAction {
    /// Re-time every touch's history to `frame_time - tdelta - interval * n`.
    RewriteHistory { tdelta: u64, interval: u64 },
    RestartFilter { time: u64 },
}

pub(crate) type MscActions = Vec<MscAction, 2>;

#[derive(Clone, Copy, Debug)]
enum MscHsmEvent {
    Timestamp { now: u64, frame_time: u64 },
}

#[derive(Default)]
struct DispatchContext {
    actions: MscActions,
}

pub(crate) struct MscTimestampCorrector {
    machine: statig::blocking::StateMachine<MscHsm>,
}

impl MscTimestampCorrector {
    pub(crate) fn new() -> Self {
        Self {
            machine: MscHsm::new().state_machine(),
        }
    }

    /// Feed one frame's MSC timestamp (microseconds) at `frame_time`.
    pub(crate) fn process(&mut self, now: u64, frame_time: u64) -> MscActions {
        let mut context = DispatchContext::default();
        self.machine
            .handle_with_context(&MscHsmEvent::Timestamp { now, frame_time }, &mut context);
        context.actions
    }
}

struct MscHsm {
    interval: u64,
}

impl MscHsm {
    fn new() -> Self {
        Self { interval: 0 }
    }
}

#[state_machine(initial = "State::expect_first()")]
impl MscHsm {
    #[state]
    fn expect_first(&mut self, context: &mut DispatchContext, event: &MscHsmEvent) -> Outcome<State> {
        let _ = context;
        match event {
            MscHsmEvent::Timestamp { now, .. } => {
                if *now == 0 {
                    self.interval = 0;
                    return Handled;
                }
                if *now > FIRST_INTERVAL_CUTOFF {
                    Transition(State::ignore())
                } else {
                    self.interval = *now;
                    Transition(State::expect_delay())
                }
            }
        }
    }

    #[state]
    fn expect_delay(&mut self, context: &mut DispatchContext, event: &MscHsmEvent) -> Outcome<State> {
        match event {
            MscHsmEvent::Timestamp { now, frame_time } => {
                if *now == 0 {
                    self.interval = 0;
                    return Transition(State::expect_first());
                }
                // The second timestamp is due one interval after the first.
                // A doubled delta means the controller slept in between.
                if *now > self.interval * 2 {
                    let tdelta = *now - self.interval;
                    let _ = context.actions.push(MscAction::RewriteHistory {
                        tdelta,
                        interval: self.interval,
                    });
                    let _ = context.actions.push(MscAction::RestartFilter {
                        time: frame_time.saturating_sub(tdelta),
                    });
                }
                Transition(State::ignore())
            }
        }
    }

    #[state]
    fn ignore(&mut self, context: &mut DispatchContext, event: &MscHsmEvent) -> Outcome<State> {
        let _ = context;
        match event {
            MscHsmEvent::Timestamp { now, .. } => {
                if *now == 0 {
                    self.interval = 0;
                    Transition(State::expect_first())
                } else {
                    Handled
                }
            }
        }
    }
}
