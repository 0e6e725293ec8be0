//! Default gesture collaborator: single-finger pointer motion and
//! two-finger scrolling. Compositor stacks with richer gesture engines
//! replace this through [`crate::hooks::GestureHooks`].

use crate::events::{push_event, EventSink, OutputEvent, ScrollAxis};
use crate::filter::MotionFilter;
use crate::hooks::{FrameSnapshot, GestureHooks};

/// Accelerated movement needed on an axis before scrolling engages.
const SCROLL_START_THRESHOLD: f64 = 1.0;

/// Pointer motion plus two-finger scroll, scroll state latched per axis.
#[derive(Clone, Copy, Debug, Default)]
pub struct CorePointerGestures {
    scrolling: bool,
    horizontal: bool,
    vertical: bool,
}

impl CorePointerGestures {
    pub fn new() -> Self {
        Self::default()
    }

    fn post_twofinger_scroll(
        &mut self,
        snapshot: &FrameSnapshot,
        filter: &mut dyn MotionFilter,
        out: &mut EventSink,
    ) {
        let mut dx = 0.0;
        let mut dy = 0.0;
        let mut nchanged = 0;
        for view in snapshot.active_touches() {
            if view.dirty {
                dx += view.delta.0;
                dy += view.delta.1;
                nchanged += 1;
            }
        }
        if nchanged == 0 {
            return;
        }
        dx /= nchanged as f64;
        dy /= nchanged as f64;

        let (dx, dy) = filter.dispatch(dx, dy, snapshot.time);

        if !self.scrolling {
            if dx <= -SCROLL_START_THRESHOLD || dx >= SCROLL_START_THRESHOLD {
                self.scrolling = true;
                self.horizontal = true;
            }
            if dy <= -SCROLL_START_THRESHOLD || dy >= SCROLL_START_THRESHOLD {
                self.scrolling = true;
                self.vertical = true;
            }
            if !self.scrolling {
                return;
            }
        }

        if dy != 0.0 && self.vertical {
            push_event(
                out,
                OutputEvent::Scroll {
                    time: snapshot.time,
                    axis: ScrollAxis::Vertical,
                    value: dy,
                },
            );
        }
        if dx != 0.0 && self.horizontal {
            push_event(
                out,
                OutputEvent::Scroll {
                    time: snapshot.time,
                    axis: ScrollAxis::Horizontal,
                    value: dx,
                },
            );
        }
    }

    /// Terminate a running scroll with zero events so consumers see the
    /// axis actually stop.
    fn stop_scroll(&mut self, time: u64, out: &mut EventSink) {
        if !self.scrolling {
            return;
        }
        if self.vertical {
            push_event(
                out,
                OutputEvent::Scroll {
                    time,
                    axis: ScrollAxis::Vertical,
                    value: 0.0,
                },
            );
        }
        if self.horizontal {
            push_event(
                out,
                OutputEvent::Scroll {
                    time,
                    axis: ScrollAxis::Horizontal,
                    value: 0.0,
                },
            );
        }
        self.scrolling = false;
        self.horizontal = false;
        self.vertical = false;
    }
}

impl GestureHooks for CorePointerGestures {
    fn handle_state(&mut self, _snapshot: &FrameSnapshot) {}

    fn post_events(
        &mut self,
        snapshot: &FrameSnapshot,
        filter: &mut dyn MotionFilter,
        out: &mut EventSink,
    ) {
        let nactive = snapshot.active_touches().count();

        if nactive == 2 && snapshot.two_finger_scroll {
            self.post_twofinger_scroll(snapshot, filter, out);
            return;
        }
        self.stop_scroll(snapshot.time, out);

        let Some(view) = snapshot.active_touches().next() else {
            return;
        };
        let (dx, dy) = view.delta;
        if dx == 0.0 && dy == 0.0 {
            return;
        }
        let (dx, dy) = filter.dispatch(dx, dy, snapshot.time);
        if dx != 0.0 || dy != 0.0 {
            push_event(
                out,
                OutputEvent::PointerMotion {
                    time: snapshot.time,
                    dx,
                    dy,
                },
            );
        }
    }

    fn cancel(&mut self, time: u64, out: &mut EventSink) {
        self.stop_scroll(time, out);
    }

    fn stop_twofinger_scroll(&mut self, time: u64, out: &mut EventSink) {
        self.stop_scroll(time, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FlatFilter;
    use crate::hooks::TouchView;
    use crate::touch::{Point, TouchState};

    fn view(slot: usize, delta: (f64, f64), active: bool) -> TouchView {
        TouchView {
            slot,
            state: TouchState::Update,
            point: Point::new(500, 500),
            time: 0,
            dirty: true,
            was_down: true,
            palm: false,
            thumb: false,
            pinned: false,
            active,
            delta,
        }
    }

    fn snapshot(time: u64, views: &[TouchView]) -> FrameSnapshot {
        let mut snapshot = FrameSnapshot {
            time,
            nfingers_down: views.len(),
            two_finger_scroll: true,
            ..FrameSnapshot::default()
        };
        for v in views {
            snapshot.touches.push(*v).unwrap();
        }
        snapshot
    }

    #[test]
    fn single_finger_posts_accelerated_motion() {
        let mut gestures = CorePointerGestures::new();
        let mut filter = FlatFilter;
        let mut out = EventSink::new();

        let snap = snapshot(1_000, &[view(0, (12.0, -3.0), true)]);
        gestures.post_events(&snap, &mut filter, &mut out);
        assert_eq!(
            out.as_slice(),
            [OutputEvent::PointerMotion {
                time: 1_000,
                dx: 12.0,
                dy: -3.0
            }]
        );
    }

    #[test]
    fn palm_views_do_not_move_the_pointer() {
        let mut gestures = CorePointerGestures::new();
        let mut filter = FlatFilter;
        let mut out = EventSink::new();

        let snap = snapshot(1_000, &[view(0, (12.0, 0.0), false)]);
        gestures.post_events(&snap, &mut filter, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn two_fingers_average_into_scroll() {
        let mut gestures = CorePointerGestures::new();
        let mut filter = FlatFilter;
        let mut out = EventSink::new();

        let snap = snapshot(
            2_000,
            &[view(0, (0.0, 10.0), true), view(1, (0.0, 6.0), true)],
        );
        gestures.post_events(&snap, &mut filter, &mut out);
        assert_eq!(
            out.as_slice(),
            [OutputEvent::Scroll {
                time: 2_000,
                axis: ScrollAxis::Vertical,
                value: 8.0
            }]
        );
    }

    #[test]
    fn sub_threshold_scroll_does_not_engage() {
        let mut gestures = CorePointerGestures::new();
        let mut filter = FlatFilter;
        let mut out = EventSink::new();

        let snap = snapshot(
            2_000,
            &[view(0, (0.0, 0.4), true), view(1, (0.0, 0.4), true)],
        );
        gestures.post_events(&snap, &mut filter, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn lifting_a_finger_terminates_scroll_with_zero_event() {
        let mut gestures = CorePointerGestures::new();
        let mut filter = FlatFilter;
        let mut out = EventSink::new();

        let snap = snapshot(
            2_000,
            &[view(0, (0.0, 10.0), true), view(1, (0.0, 10.0), true)],
        );
        gestures.post_events(&snap, &mut filter, &mut out);
        out.clear();

        let snap = snapshot(3_000, &[view(0, (0.0, 10.0), true)]);
        gestures.post_events(&snap, &mut filter, &mut out);
        assert_eq!(
            out[0],
            OutputEvent::Scroll {
                time: 3_000,
                axis: ScrollAxis::Vertical,
                value: 0.0
            }
        );
        // The remaining finger immediately drives the pointer again.
        assert!(matches!(out[1], OutputEvent::PointerMotion { .. }));
    }

    #[test]
    fn unlatched_axis_stays_silent() {
        let mut gestures = CorePointerGestures::new();
        let mut filter = FlatFilter;
        let mut out = EventSink::new();

        // Vertical engages, horizontal wiggle stays below threshold.
        let snap = snapshot(
            2_000,
            &[view(0, (0.3, 10.0), true), view(1, (0.3, 10.0), true)],
        );
        gestures.post_events(&snap, &mut filter, &mut out);
        assert_eq!(out.len(), 1);
        assert!(matches!(
            out[0],
            OutputEvent::Scroll {
                axis: ScrollAxis::Vertical,
                ..
            }
        ));
    }
}
