//! Collaborator seams. The tap machine, button unit, edge-scroll, and
//! gesture recognizers live outside the engine; the pipeline drives them
//! through these traits with an owned snapshot of the frame, so no
//! collaborator ever borrows engine internals.

use heapless::Vec;

use crate::events::{push_event, EventSink, OutputEvent, PhysButton};
use crate::filter::MotionFilter;
use crate::touch::{Point, TouchState};

pub const MAX_TOUCH_VIEWS: usize = 16;

/// Read-only view of one slot at frame time.
#[derive(Clone, Copy, Debug)]
pub struct TouchView {
    pub slot: usize,
    pub state: TouchState,
    pub point: Point,
    /// Last mutation timestamp in microseconds.
    pub time: u64,
    pub dirty: bool,
    pub was_down: bool,
    pub palm: bool,
    pub thumb: bool,
    pub pinned: bool,
    /// Down, not a palm/thumb, not pinned, and not captured by the button
    /// or edge-scroll areas: eligible for pointer motion and gestures.
    pub active: bool,
    /// Unaccelerated history delta in device units.
    pub delta: (f64, f64),
}

#[derive(Clone, Debug, Default)]
pub struct FrameSnapshot {
    pub time: u64,
    pub nfingers_down: usize,
    /// Two-finger scrolling is the configured scroll method.
    pub two_finger_scroll: bool,
    pub touches: Vec<TouchView, MAX_TOUCH_VIEWS>,
}

impl FrameSnapshot {
    pub fn active_touches(&self) -> impl Iterator<Item = &TouchView> {
        self.touches.iter().filter(|t| t.active)
    }
}

/// Tap state machine hooks. `handle_state` returns true when tapping wants
/// pointer motion suppressed this frame.
pub trait TapHooks {
    fn handle_state(&mut self, snapshot: &FrameSnapshot, out: &mut EventSink) -> bool;
    fn post_process(&mut self, snapshot: &FrameSnapshot);
    fn suspend(&mut self, time: u64, out: &mut EventSink);
    fn resume(&mut self, time: u64);
    fn remove_all(&mut self, time: u64, out: &mut EventSink);
}

/// Physical/software button unit hooks. `post_events` returns true when a
/// button transition should suppress motion for the rest of the frame.
pub trait ButtonHooks {
    fn process_button(&mut self, button: PhysButton, pressed: bool, time: u64);
    fn handle_state(&mut self, snapshot: &FrameSnapshot);
    fn post_events(&mut self, snapshot: &FrameSnapshot, out: &mut EventSink) -> bool;
    fn release_all(&mut self, time: u64, out: &mut EventSink);
    fn is_inside_softbutton_area(&self, point: Point) -> bool;
    /// False when the touch is captured by a button area and unavailable
    /// for pointer motion.
    fn touch_active(&self, view: &TouchView) -> bool;
    /// While suspended with a trackpoint present, the top button area grows
    /// threefold so the trackpoint buttons keep working.
    fn set_top_buttons_enlarged(&mut self, enlarged: bool);
}

pub trait EdgeScrollHooks {
    fn handle_state(&mut self, snapshot: &FrameSnapshot);
    /// Returns true when edge scrolling consumed the frame.
    fn post_events(&mut self, snapshot: &FrameSnapshot, out: &mut EventSink) -> bool;
    fn stop_events(&mut self, time: u64, out: &mut EventSink);
    /// False when the touch is held by an edge-scroll zone.
    fn touch_active(&self, view: &TouchView) -> bool;
}

pub trait GestureHooks {
    fn handle_state(&mut self, snapshot: &FrameSnapshot);
    fn post_events(
        &mut self,
        snapshot: &FrameSnapshot,
        filter: &mut dyn MotionFilter,
        out: &mut EventSink,
    );
    fn cancel(&mut self, time: u64, out: &mut EventSink);
    fn stop_twofinger_scroll(&mut self, time: u64, out: &mut EventSink);
}

/// Tap collaborator that never taps.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopTap;

impl TapHooks for NoopTap {
    fn handle_state(&mut self, _snapshot: &FrameSnapshot, _out: &mut EventSink) -> bool {
        false
    }

    fn post_process(&mut self, _snapshot: &FrameSnapshot) {}

    fn suspend(&mut self, _time: u64, _out: &mut EventSink) {}

    fn resume(&mut self, _time: u64) {}

    fn remove_all(&mut self, _time: u64, _out: &mut EventSink) {}
}

/// Button unit that forwards physical button transitions unchanged. No
/// software-button areas, no click-finger logic.
#[derive(Clone, Debug, Default)]
pub struct PassthroughButtons {
    pending: Vec<(PhysButton, bool), 8>,
    held: [bool; 3],
}

fn button_index(button: PhysButton) -> usize {
    match button {
        PhysButton::Left => 0,
        PhysButton::Middle => 1,
        PhysButton::Right => 2,
    }
}

impl ButtonHooks for PassthroughButtons {
    fn process_button(&mut self, button: PhysButton, pressed: bool, time: u64) {
        let _ = time;
        if self.pending.push((button, pressed)).is_err() {
            tracing::warn!("button backlog full, dropping transition");
        }
    }

    fn handle_state(&mut self, _snapshot: &FrameSnapshot) {}

    fn post_events(&mut self, snapshot: &FrameSnapshot, out: &mut EventSink) -> bool {
        let mut posted = false;
        for &(button, pressed) in self.pending.iter() {
            self.held[button_index(button)] = pressed;
            push_event(
                out,
                OutputEvent::Button {
                    time: snapshot.time,
                    button,
                    pressed,
                },
            );
            posted = true;
        }
        self.pending.clear();
        posted
    }

    fn release_all(&mut self, time: u64, out: &mut EventSink) {
        self.pending.clear();
        for button in [PhysButton::Left, PhysButton::Middle, PhysButton::Right] {
            if self.held[button_index(button)] {
                self.held[button_index(button)] = false;
                push_event(
                    out,
                    OutputEvent::Button {
                        time,
                        button,
                        pressed: false,
                    },
                );
            }
        }
    }

    fn is_inside_softbutton_area(&self, _point: Point) -> bool {
        false
    }

    fn touch_active(&self, _view: &TouchView) -> bool {
        true
    }

    fn set_top_buttons_enlarged(&mut self, enlarged: bool) {
        tracing::debug!(enlarged, "top button area scale change ignored");
    }
}

/// Edge-scroll collaborator that never scrolls and holds no touches.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopEdgeScroll;

impl EdgeScrollHooks for NoopEdgeScroll {
    fn handle_state(&mut self, _snapshot: &FrameSnapshot) {}

    fn post_events(&mut self, _snapshot: &FrameSnapshot, _out: &mut EventSink) -> bool {
        false
    }

    fn stop_events(&mut self, _time: u64, _out: &mut EventSink) {}

    fn touch_active(&self, _view: &TouchView) -> bool {
        true
    }
}
