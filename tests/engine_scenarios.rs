//! End-to-end frame scenarios driven through the public API only.

use std::cell::Cell;
use std::rc::Rc;

use padflow::filter::MotionFilter;
use padflow::{
    AbsAxis, AxisRange, DeviceInfo, EngineConfig, Event, EventKind, FingerTool, KeyboardInfo,
    OutputEvent, PalmState, Quirks, ThumbState, TouchState, TouchpadEngine,
};

const KEY_LEFTCTRL: u32 = 29;
const KEY_A: u32 = 30;

fn base_device() -> DeviceInfo {
    DeviceInfo {
        x: AxisRange::new(0, 3000, 30),
        y: AxisRange::new(0, 2000, 30),
        pressure: None,
        has_touch_size: false,
        has_tool_type: false,
        num_slots: 2,
        btn_tool_max: 5,
        semi_mt: false,
        clickpad: false,
        has_top_software_buttons: false,
        internal: true,
        left_handed_rotation: false,
        vendor: 0x2,
        product: 0x7,
    }
}

fn pressure_device() -> DeviceInfo {
    DeviceInfo {
        pressure: Some(AxisRange::new(0, 255, 0)),
        ..base_device()
    }
}

fn wide_device() -> DeviceInfo {
    DeviceInfo {
        x: AxisRange::new(0, 4000, 30),
        ..base_device()
    }
}

fn tall_clickpad() -> DeviceInfo {
    DeviceInfo {
        clickpad: true,
        ..base_device()
    }
}

/// Drives an engine frame by frame with a running clock.
struct Pad {
    engine: TouchpadEngine,
    time: u64,
}

impl Pad {
    fn new(device: DeviceInfo) -> Self {
        Self::with_quirks(device, Quirks::default())
    }

    fn with_quirks(device: DeviceInfo, quirks: Quirks) -> Self {
        Self {
            engine: TouchpadEngine::new(device, quirks, EngineConfig::default()),
            time: 1_000_000,
        }
    }

    fn frame(&mut self, events: &[EventKind]) -> Vec<OutputEvent> {
        let mut out = Vec::new();
        for kind in events {
            out.extend(
                self.engine
                    .process_event(&Event::new(self.time, *kind))
                    .events,
            );
        }
        out.extend(
            self.engine
                .process_event(&Event::new(self.time, EventKind::FrameEnd))
                .events,
        );
        out
    }

    fn advance_ms(&mut self, ms: u64) {
        self.time += ms * 1_000;
    }

    fn motions(events: &[OutputEvent]) -> Vec<(f64, f64)> {
        events
            .iter()
            .filter_map(|e| match e {
                OutputEvent::PointerMotion { dx, dy, .. } => Some((*dx, *dy)),
                _ => None,
            })
            .collect()
    }
}

fn finger_down(id: i32, x: i32, y: i32) -> Vec<EventKind> {
    vec![
        EventKind::Abs(AbsAxis::MtSlot, 0),
        EventKind::Abs(AbsAxis::MtTrackingId, id),
        EventKind::Abs(AbsAxis::MtPositionX, x),
        EventKind::Abs(AbsAxis::MtPositionY, y),
        EventKind::Touch(true),
        EventKind::Tool(FingerTool::Finger, true),
    ]
}

fn finger_up() -> Vec<EventKind> {
    vec![
        EventKind::Abs(AbsAxis::MtSlot, 0),
        EventKind::Abs(AbsAxis::MtTrackingId, -1),
        EventKind::Touch(false),
        EventKind::Tool(FingerTool::Finger, false),
    ]
}

#[derive(Clone, Default)]
struct CountingFilter {
    restarts: Rc<Cell<usize>>,
}

impl MotionFilter for CountingFilter {
    fn dispatch(&mut self, dx: f64, dy: f64, _time: u64) -> (f64, f64) {
        (dx, dy)
    }

    fn dispatch_constant(&mut self, dx: f64, dy: f64, _time: u64) -> (f64, f64) {
        (dx, dy)
    }

    fn restart(&mut self, _time: u64) {
        self.restarts.set(self.restarts.get() + 1);
    }
}

// Scenario: a short single-finger stroke produces exactly one motion event,
// derived from the second frame's delta.
#[test]
fn single_stroke_moves_cursor_once() {
    let mut pad = Pad::new(base_device());

    let out_a = pad.frame(&finger_down(5, 1000, 1000));
    assert!(Pad::motions(&out_a).is_empty());
    assert_eq!(pad.engine.nfingers_down(), 1);

    pad.advance_ms(12);
    let out_b = pad.frame(&[
        EventKind::Abs(AbsAxis::MtSlot, 0),
        EventKind::Abs(AbsAxis::MtPositionX, 1050),
    ]);
    let motions = Pad::motions(&out_b);
    assert_eq!(motions.len(), 1);
    let (dx, dy) = motions[0];
    assert!(dx > 0.0, "expected rightward motion, got {dx}");
    assert_eq!(dy, 0.0);

    pad.advance_ms(12);
    let out_c = pad.frame(&finger_up());
    assert!(Pad::motions(&out_c).is_empty());
    assert_eq!(pad.engine.nfingers_down(), 0);
    assert_eq!(pad.engine.touch_state(0), Some(TouchState::None));
}

// Scenario: a touch landing in the left exclusion band is an edge palm;
// swiping out horizontally within the grace window releases it.
#[test]
fn edge_palm_released_by_horizontal_exit() {
    // Band width: min(8% of 4000, 8mm * 30/mm) = 240 units.
    let mut pad = Pad::new(wide_device());

    let out = pad.frame(&finger_down(5, 235, 1000));
    assert!(Pad::motions(&out).is_empty());
    assert_eq!(pad.engine.touch_palm_state(0), Some(PalmState::Edge));

    pad.advance_ms(100);
    pad.frame(&[
        EventKind::Abs(AbsAxis::MtSlot, 0),
        EventKind::Abs(AbsAxis::MtPositionX, 840),
    ]);
    assert_eq!(pad.engine.touch_palm_state(0), Some(PalmState::None));
}

// Scenario: an edge palm that stays in the band and drifts along it is
// still suppressed after the grace window.
#[test]
fn edge_palm_drifting_in_band_stays_palm() {
    let mut pad = Pad::new(wide_device());
    pad.frame(&finger_down(5, 235, 1000));

    for _ in 0..30 {
        pad.advance_ms(12);
        let out = pad.frame(&[
            EventKind::Abs(AbsAxis::MtSlot, 0),
            EventKind::Abs(AbsAxis::MtPositionY, 1000 + 10),
        ]);
        assert!(Pad::motions(&out).is_empty());
    }
    assert_eq!(pad.engine.touch_palm_state(0), Some(PalmState::Edge));
}

// Scenario: a second active finger defeats edge-palm detection outright.
#[test]
fn second_finger_defeats_edge_palm() {
    let mut pad = Pad::new(wide_device());

    pad.frame(&[
        EventKind::Abs(AbsAxis::MtSlot, 0),
        EventKind::Abs(AbsAxis::MtTrackingId, 5),
        EventKind::Abs(AbsAxis::MtPositionX, 235),
        EventKind::Abs(AbsAxis::MtPositionY, 1000),
        EventKind::Abs(AbsAxis::MtSlot, 1),
        EventKind::Abs(AbsAxis::MtTrackingId, 6),
        EventKind::Abs(AbsAxis::MtPositionX, 2000),
        EventKind::Abs(AbsAxis::MtPositionY, 1000),
        EventKind::Touch(true),
        EventKind::Tool(FingerTool::Doubletap, true),
    ]);
    assert_eq!(pad.engine.nfingers_down(), 2);
    assert_eq!(pad.engine.touch_palm_state(0), Some(PalmState::None));
    assert_eq!(pad.engine.touch_palm_state(1), Some(PalmState::None));
}

// Scenario: a hovering touch crossing the pressure threshold begins with a
// fresh history, so landing produces no cursor jump.
#[test]
fn pressure_jump_in_does_not_jump_cursor() {
    let mut pad = Pad::new(pressure_device());

    // Below the high threshold (12% of 255 = 30): hovering only.
    let out = pad.frame(&[
        EventKind::Abs(AbsAxis::MtSlot, 0),
        EventKind::Abs(AbsAxis::MtTrackingId, 5),
        EventKind::Abs(AbsAxis::MtPositionX, 1000),
        EventKind::Abs(AbsAxis::MtPositionY, 1000),
        EventKind::Abs(AbsAxis::MtPressure, 20),
        EventKind::Touch(true),
        EventKind::Tool(FingerTool::Finger, true),
    ]);
    assert_eq!(pad.engine.nfingers_down(), 0);
    assert_eq!(pad.engine.touch_state(0), Some(TouchState::Hovering));
    assert!(Pad::motions(&out).is_empty());

    pad.advance_ms(12);
    let out = pad.frame(&[
        EventKind::Abs(AbsAxis::MtSlot, 0),
        EventKind::Abs(AbsAxis::MtPressure, 31),
    ]);
    assert_eq!(pad.engine.nfingers_down(), 1);
    assert!(Pad::motions(&out).is_empty());

    pad.advance_ms(12);
    let out = pad.frame(&[
        EventKind::Abs(AbsAxis::MtSlot, 0),
        EventKind::Abs(AbsAxis::MtPositionX, 1060),
    ]);
    let motions = Pad::motions(&out);
    assert_eq!(motions.len(), 1);
    // 20mm in device units is 600; the 2mm move stays far below it.
    assert!(motions[0].0.abs() < 600.0);
}

// Scenario: pressure dropping below the low threshold ends the touch but
// keeps it hovering while the kernel still tracks the contact.
#[test]
fn pressure_drop_demotes_to_hovering() {
    let mut pad = Pad::new(pressure_device());
    pad.frame(&[
        EventKind::Abs(AbsAxis::MtSlot, 0),
        EventKind::Abs(AbsAxis::MtTrackingId, 5),
        EventKind::Abs(AbsAxis::MtPositionX, 1000),
        EventKind::Abs(AbsAxis::MtPositionY, 1000),
        EventKind::Abs(AbsAxis::MtPressure, 40),
        EventKind::Touch(true),
    ]);
    assert_eq!(pad.engine.nfingers_down(), 1);

    pad.advance_ms(12);
    pad.frame(&[
        EventKind::Abs(AbsAxis::MtSlot, 0),
        EventKind::Abs(AbsAxis::MtPressure, 10),
    ]);
    assert_eq!(pad.engine.nfingers_down(), 0);
    assert_eq!(pad.engine.touch_state(0), Some(TouchState::Hovering));
}

// Scenario: an MSC timestamp gap is absorbed into one long-interval delta;
// the filter restarts exactly once for it and no motion is discarded.
#[test]
fn msc_timestamp_gap_is_absorbed() {
    let mut pad = Pad::new(base_device());
    let restarts = Rc::new(Cell::new(0));
    pad.engine.set_motion_filter(Box::new(CountingFilter {
        restarts: restarts.clone(),
    }));

    let mut events = finger_down(5, 1000, 1000);
    events.push(EventKind::Timestamp(0));
    pad.frame(&events);

    pad.advance_ms(7);
    pad.time += 300; // 7.3ms frame cadence
    pad.frame(&[
        EventKind::Abs(AbsAxis::MtSlot, 0),
        EventKind::Abs(AbsAxis::MtPositionX, 1010),
        EventKind::Timestamp(7_300),
    ]);

    let restarts_before_gap = restarts.get();

    // Controller slept for ~116ms; the finger kept moving meanwhile.
    pad.time += 116_156;
    let out = pad.frame(&[
        EventKind::Abs(AbsAxis::MtSlot, 0),
        EventKind::Abs(AbsAxis::MtPositionX, 1400),
        EventKind::Timestamp(123_456),
    ]);
    let motions = Pad::motions(&out);
    assert_eq!(motions.len(), 1, "gap motion must survive as one delta");
    assert!(motions[0].0 > 0.0);
    assert_eq!(restarts.get(), restarts_before_gap + 1);

    // Back to normal cadence: nothing special happens.
    pad.advance_ms(7);
    let out = pad.frame(&[
        EventKind::Abs(AbsAxis::MtSlot, 0),
        EventKind::Abs(AbsAxis::MtPositionX, 1410),
        EventKind::Timestamp(130_756),
    ]);
    assert_eq!(Pad::motions(&out).len(), 1);
    assert_eq!(restarts.get(), restarts_before_gap + 1);
}

// Scenario: ctrl+key is a shortcut, not typing; the pointer stays live.
#[test]
fn modifier_chord_does_not_trigger_dwt() {
    let mut pad = Pad::new(base_device());
    assert!(pad.engine.pair_keyboard(KeyboardInfo {
        id: 1,
        vendor: 0x1,
        product: 0x1,
    }));

    pad.engine.keyboard_key(1, KEY_LEFTCTRL, true, pad.time);
    pad.engine.keyboard_key(1, KEY_A, true, pad.time + 10_000);
    assert!(!pad.engine.keyboard_active());

    pad.advance_ms(1);
    pad.frame(&finger_down(5, 1000, 1000));
    pad.advance_ms(12);
    let out = pad.frame(&[
        EventKind::Abs(AbsAxis::MtSlot, 0),
        EventKind::Abs(AbsAxis::MtPositionX, 1050),
    ]);
    assert_eq!(Pad::motions(&out).len(), 1);
}

// Scenario: plain typing marks new touches as typing palms until the
// keyboard goes quiet; afterwards the touch recovers.
#[test]
fn typing_palms_touch_until_keyboard_quiet() {
    let mut pad = Pad::new(base_device());
    pad.engine.pair_keyboard(KeyboardInfo {
        id: 1,
        vendor: 0x1,
        product: 0x1,
    });

    pad.engine.keyboard_key(1, KEY_A, true, pad.time);
    pad.engine.keyboard_key(1, KEY_A, false, pad.time + 20_000);
    assert!(pad.engine.keyboard_active());

    pad.advance_ms(50);
    let out = pad.frame(&finger_down(5, 1500, 1000));
    assert!(Pad::motions(&out).is_empty());
    assert_eq!(pad.engine.touch_palm_state(0), Some(PalmState::Typing));

    // Keyboard timeout fires with no keys held.
    let deadline = pad.engine.next_timer_deadline().unwrap();
    pad.engine.dispatch_timers(deadline);
    assert!(!pad.engine.keyboard_active());

    pad.advance_ms(200);
    pad.frame(&[
        EventKind::Abs(AbsAxis::MtSlot, 0),
        EventKind::Abs(AbsAxis::MtPositionX, 1520),
    ]);
    assert_eq!(pad.engine.touch_palm_state(0), Some(PalmState::None));

    pad.advance_ms(12);
    let out = pad.frame(&[
        EventKind::Abs(AbsAxis::MtSlot, 0),
        EventKind::Abs(AbsAxis::MtPositionX, 1560),
    ]);
    assert_eq!(Pad::motions(&out).len(), 1);
}

// Property: the pressure palm latch survives the pressure dropping again
// and only clears when the contact ends.
#[test]
fn pressure_palm_is_sticky_until_touch_end() {
    let quirks = Quirks {
        palm_pressure_threshold: Some(80),
        ..Quirks::default()
    };
    let mut pad = Pad::with_quirks(pressure_device(), quirks);

    pad.frame(&[
        EventKind::Abs(AbsAxis::MtSlot, 0),
        EventKind::Abs(AbsAxis::MtTrackingId, 5),
        EventKind::Abs(AbsAxis::MtPositionX, 1000),
        EventKind::Abs(AbsAxis::MtPositionY, 1000),
        EventKind::Abs(AbsAxis::MtPressure, 100),
        EventKind::Touch(true),
    ]);
    assert_eq!(pad.engine.touch_palm_state(0), Some(PalmState::Pressure));

    // Pressure eases but stays above the hover threshold: still a palm.
    pad.advance_ms(12);
    let out = pad.frame(&[
        EventKind::Abs(AbsAxis::MtSlot, 0),
        EventKind::Abs(AbsAxis::MtPressure, 40),
        EventKind::Abs(AbsAxis::MtPositionX, 1100),
    ]);
    assert_eq!(pad.engine.touch_palm_state(0), Some(PalmState::Pressure));
    assert!(Pad::motions(&out).is_empty());

    // Contact lifts: the latch clears.
    pad.advance_ms(12);
    pad.frame(&[
        EventKind::Abs(AbsAxis::MtSlot, 0),
        EventKind::Abs(AbsAxis::MtPressure, 5),
    ]);
    assert_eq!(pad.engine.touch_palm_state(0), Some(PalmState::None));
}

// Property: a low resting touch on a tall clickpad becomes a thumb after
// the dwell timeout and never reverts.
#[test]
fn resting_thumb_settles_and_stays_settled() {
    let mut pad = Pad::new(tall_clickpad());

    // Lower line sits at 92% of 2000 = 1840.
    pad.frame(&finger_down(5, 1500, 1900));
    assert_eq!(pad.engine.touch_thumb_state(0), Some(ThumbState::Maybe));

    for _ in 0..30 {
        pad.advance_ms(12);
        pad.frame(&[
            EventKind::Abs(AbsAxis::MtSlot, 0),
            EventKind::Abs(AbsAxis::MtPositionX, 1501),
        ]);
    }
    assert_eq!(pad.engine.touch_thumb_state(0), Some(ThumbState::Yes));

    // Thumbs do not move the pointer.
    pad.advance_ms(12);
    let out = pad.frame(&[
        EventKind::Abs(AbsAxis::MtSlot, 0),
        EventKind::Abs(AbsAxis::MtPositionX, 1530),
    ]);
    assert!(Pad::motions(&out).is_empty());
    assert_eq!(pad.engine.touch_thumb_state(0), Some(ThumbState::Yes));
}

// Property: a touch starting above the upper line is never a thumb.
#[test]
fn high_touch_is_ruled_out_as_thumb() {
    let mut pad = Pad::new(tall_clickpad());
    pad.frame(&finger_down(5, 1500, 1000));
    assert_eq!(pad.engine.touch_thumb_state(0), Some(ThumbState::No));
}

// Property: once wobble enables hysteresis, sub-margin deltas produce no
// motion at all.
#[test]
fn hysteresis_swallows_sub_margin_wobble() {
    let mut pad = Pad::new(base_device());
    pad.frame(&finger_down(5, 1000, 1000));

    // Right, left, right at frame cadence: the wobble signature.
    for x in [1002, 1000, 1002] {
        pad.advance_ms(12);
        pad.frame(&[
            EventKind::Abs(AbsAxis::MtSlot, 0),
            EventKind::Abs(AbsAxis::MtPositionX, x),
        ]);
    }

    // Margin is resolution/4 = 7 units; wiggle below it stays swallowed.
    let mut x = 1002;
    for step in [3i32, -3, 3, -3, 2, -2] {
        x += step;
        pad.advance_ms(12);
        let out = pad.frame(&[
            EventKind::Abs(AbsAxis::MtSlot, 0),
            EventKind::Abs(AbsAxis::MtPositionX, x),
        ]);
        assert!(
            Pad::motions(&out).is_empty(),
            "sub-margin wobble leaked motion"
        );
    }
}

// Property: suspending mid-touch releases everything; the pad resumes
// cleanly after the reasons clear.
#[test]
fn suspend_releases_touches_and_resume_restores_service() {
    let mut pad = Pad::new(base_device());
    pad.frame(&finger_down(5, 1000, 1000));
    assert_eq!(pad.engine.nfingers_down(), 1);

    pad.engine.lid_switch(true, pad.time);
    assert!(pad.engine.is_suspended());
    assert_eq!(pad.engine.nfingers_down(), 0);

    // Events while suspended produce nothing.
    pad.advance_ms(12);
    let out = pad.frame(&[
        EventKind::Abs(AbsAxis::MtSlot, 0),
        EventKind::Abs(AbsAxis::MtPositionX, 1200),
    ]);
    assert!(out.is_empty());

    pad.engine.lid_switch(false, pad.time);
    assert!(!pad.engine.is_suspended());

    pad.advance_ms(12);
    pad.frame(&finger_down(9, 1000, 1000));
    pad.advance_ms(12);
    let out = pad.frame(&[
        EventKind::Abs(AbsAxis::MtSlot, 0),
        EventKind::Abs(AbsAxis::MtPositionX, 1050),
    ]);
    assert_eq!(Pad::motions(&out).len(), 1);
}

// Scenario: two fingers moving together scroll and terminate with zero
// events on lift.
#[test]
fn two_finger_scroll_round_trip() {
    let mut pad = Pad::new(base_device());

    pad.frame(&[
        EventKind::Abs(AbsAxis::MtSlot, 0),
        EventKind::Abs(AbsAxis::MtTrackingId, 5),
        EventKind::Abs(AbsAxis::MtPositionX, 1200),
        EventKind::Abs(AbsAxis::MtPositionY, 800),
        EventKind::Abs(AbsAxis::MtSlot, 1),
        EventKind::Abs(AbsAxis::MtTrackingId, 6),
        EventKind::Abs(AbsAxis::MtPositionX, 1600),
        EventKind::Abs(AbsAxis::MtPositionY, 820),
        EventKind::Touch(true),
        EventKind::Tool(FingerTool::Doubletap, true),
    ]);

    let mut scrolled = false;
    for i in 1..6 {
        pad.advance_ms(12);
        let out = pad.frame(&[
            EventKind::Abs(AbsAxis::MtSlot, 0),
            EventKind::Abs(AbsAxis::MtPositionY, 800 + i * 40),
            EventKind::Abs(AbsAxis::MtSlot, 1),
            EventKind::Abs(AbsAxis::MtPositionY, 820 + i * 40),
        ]);
        assert!(Pad::motions(&out).is_empty(), "scroll leaked pointer motion");
        scrolled |= out.iter().any(|e| {
            matches!(
                e,
                OutputEvent::Scroll {
                    axis: padflow::ScrollAxis::Vertical,
                    value,
                    ..
                } if *value > 0.0
            )
        });
    }
    assert!(scrolled);

    pad.advance_ms(12);
    let out = pad.frame(&[
        EventKind::Abs(AbsAxis::MtSlot, 0),
        EventKind::Abs(AbsAxis::MtTrackingId, -1),
        EventKind::Abs(AbsAxis::MtSlot, 1),
        EventKind::Abs(AbsAxis::MtTrackingId, -1),
        EventKind::Touch(false),
        EventKind::Tool(FingerTool::Doubletap, false),
    ]);
    assert!(out.iter().any(|e| matches!(
        e,
        OutputEvent::Scroll {
            axis: padflow::ScrollAxis::Vertical,
            value,
            ..
        } if *value == 0.0
    )));
}

// Scenario: trackpoint activity suppresses new touches as palms until its
// timeout runs dry.
#[test]
fn trackpoint_activity_palms_new_touches() {
    let mut pad = Pad::new(base_device());

    pad.engine.trackpoint_activity(pad.time);
    pad.advance_ms(50);
    let out = pad.frame(&finger_down(5, 1500, 1000));
    assert!(Pad::motions(&out).is_empty());
    assert_eq!(pad.engine.touch_palm_state(0), Some(PalmState::Trackpoint));

    // Trackpoint goes quiet; the touch recovers on its next update.
    let deadline = pad.engine.next_timer_deadline().unwrap();
    pad.engine.dispatch_timers(deadline);
    pad.time = deadline + 12_000;
    pad.frame(&[
        EventKind::Abs(AbsAxis::MtSlot, 0),
        EventKind::Abs(AbsAxis::MtPositionX, 1520),
    ]);
    assert_eq!(pad.engine.touch_palm_state(0), Some(PalmState::None));
}

// Scenario: pen arbitration turns every touch into a palm while active.
#[test]
fn arbitration_palms_all_touches() {
    let mut pad = Pad::new(base_device());
    pad.engine.set_arbitration(true);

    let out = pad.frame(&finger_down(5, 1500, 1000));
    assert!(Pad::motions(&out).is_empty());
    assert_eq!(
        pad.engine.touch_palm_state(0),
        Some(PalmState::Arbitration)
    );

    pad.engine.set_arbitration(false);
    pad.advance_ms(12);
    pad.frame(&[
        EventKind::Abs(AbsAxis::MtSlot, 0),
        EventKind::Abs(AbsAxis::MtPositionX, 1550),
    ]);
    assert_eq!(pad.engine.touch_palm_state(0), Some(PalmState::None));
}
