//! The touchpad engine: frame decoding, per-touch lifecycle, and the
//! four-stage frame pipeline (pre-process, process, post-events,
//! post-process). One instance per physical pad, driven strictly
//! single-threaded.

use std::mem;

use bitflags::bitflags;

use crate::config::{ms2us, EngineConfig, ScrollMethod, SendEventsMode};
use crate::device::{DeviceInfo, Quirks};
use crate::dwt::{Dwt, DwtAction, KeyboardInfo};
use crate::events::{
    push_event, AbsAxis, Event, EventKind, EventSink, FingerTool, FrameOutput, OutputEvent,
    PhysButton, MT_TOOL_PALM,
};
use crate::filter::{MotionFilter, PointerAccelFilter};
use crate::gestures::CorePointerGestures;
use crate::hooks::{
    ButtonHooks, EdgeScrollHooks, FrameSnapshot, GestureHooks, NoopEdgeScroll, NoopTap,
    PassthroughButtons, TapHooks, TouchView, MAX_TOUCH_VIEWS,
};
use crate::hover::HoverMethod;
use crate::motion::{self, hysteresis_margin};
use crate::msc_timestamp::{MscAction, MscTimestampCorrector};
use crate::palm::{PalmConfig, PalmState};
use crate::thumb::{ThumbConfig, ThumbState};
use crate::timers::{TimerKind, TimerQueue};
use crate::touch::{Touch, TouchState};

/// Trackpoint activity keeps palms suppressed for this long after the last
/// event.
const TRACKPOINT_ACTIVITY_TIMEOUT: u64 = ms2us(500);
/// A pinned finger moving this far is a drag, not click jitter.
const PINNED_MOTION_THRESHOLD_MM: f64 = 1.5;
/// A frame with a fast-moving finger plus a fresh second contact marks the
/// newcomer as a thumb once the fast window is this deep.
const SPEED_THUMB_WINDOW: u8 = 5;

const FAKE_FINGER_OVERFLOW: u8 = 0x80;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub(crate) struct QueuedFlags: u8 {
        const MOTION = 0x01;
        const BUTTON_PRESS = 0x02;
        const BUTTON_RELEASE = 0x04;
        const OTHERAXIS = 0x08;
        const TIMESTAMP = 0x10;
    }
}

bitflags! {
    /// Why the pad is (or is about to be) suspended. Suspend/resume come in
    /// from independent sources and only an empty mask resumes the pad.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct SuspendReason: u8 {
        const LID = 0x01;
        const TABLET_MODE = 0x02;
        const EXTERNAL_MOUSE = 0x04;
        const SENDEVENTS = 0x08;
    }
}

/// Finger count derived from `BTN_TOUCH`/`BTN_TOOL_*`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FakeFingers {
    Count(usize),
    /// `BTN_TOOL_QUINTTAP`: five or more, exact count unknown.
    Overflow,
}

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct DeviceHysteresis {
    pub enabled: bool,
    pub margin_x: i32,
    pub margin_y: i32,
}

pub struct TouchpadEngine {
    pub(crate) device: DeviceInfo,
    pub(crate) quirks: Quirks,
    pub(crate) config: EngineConfig,
    pub(crate) scroll_method: ScrollMethod,

    pub(crate) touches: Vec<Touch>,
    /// Real kernel slots; everything past this index is a fake-finger slot.
    pub(crate) num_slots: usize,
    slot: usize,
    pub(crate) nfingers_down: usize,
    pub(crate) old_nfingers_down: usize,
    pub(crate) fake_touches: u8,
    queued: QueuedFlags,

    pub(crate) hysteresis: DeviceHysteresis,
    pub(crate) hover_method: HoverMethod,
    pub(crate) palm_cfg: PalmConfig,
    pub(crate) thumb_cfg: ThumbConfig,

    pub(crate) arbitration_active: bool,
    pub(crate) trackpoint_active: bool,
    pub(crate) trackpoint_last_time: u64,
    suspend_reason: SuspendReason,
    external_mouse_present: bool,

    msc_now: u64,
    msc_corrector: MscTimestampCorrector,
    pub(crate) dwt: Dwt,
    timers: TimerQueue,

    filter: Box<dyn MotionFilter>,
    taps: Box<dyn TapHooks>,
    pub(crate) buttons: Box<dyn ButtonHooks>,
    edge_scroll: Box<dyn EdgeScrollHooks>,
    gestures: Box<dyn GestureHooks>,

    queue: EventSink,
}

impl TouchpadEngine {
    pub fn new(device: DeviceInfo, quirks: Quirks, config: EngineConfig) -> Self {
        let ntouches = device.ntouches();
        let num_slots = if device.has_mt() {
            device.num_slots.min(ntouches)
        } else {
            1
        };

        let mut scroll_method = config
            .scroll_method
            .unwrap_or(if ntouches >= 2 {
                ScrollMethod::TwoFinger
            } else {
                ScrollMethod::Edge
            });
        if scroll_method == ScrollMethod::TwoFinger && ntouches < 2 {
            tracing::warn!("two-finger scroll needs two touches, using edge scrolling");
            scroll_method = ScrollMethod::Edge;
        }

        let mut engine = Self {
            palm_cfg: PalmConfig::new(&device, &quirks),
            thumb_cfg: ThumbConfig::new(&device, &quirks, config.detect_thumbs),
            hover_method: HoverMethod::select(&device, &quirks),
            hysteresis: DeviceHysteresis {
                enabled: false,
                margin_x: hysteresis_margin(device.x.fuzz, device.x.resolution),
                margin_y: hysteresis_margin(device.y.fuzz, device.y.resolution),
            },
            filter: Box::new(PointerAccelFilter::new(&device)),
            touches: (0..ntouches).map(|_| Touch::new()).collect(),
            num_slots,
            slot: 0,
            nfingers_down: 0,
            old_nfingers_down: 0,
            fake_touches: 0,
            queued: QueuedFlags::empty(),
            arbitration_active: false,
            trackpoint_active: false,
            trackpoint_last_time: 0,
            suspend_reason: SuspendReason::empty(),
            external_mouse_present: false,
            msc_now: 0,
            msc_corrector: MscTimestampCorrector::new(),
            dwt: Dwt::new(),
            timers: TimerQueue::new(),
            taps: Box::new(NoopTap),
            buttons: Box::new(PassthroughButtons::default()),
            edge_scroll: Box::new(NoopEdgeScroll),
            gestures: Box::new(CorePointerGestures::new()),
            queue: EventSink::new(),
            scroll_method,
            device,
            quirks,
            config,
        };
        if engine.config.send_events == SendEventsMode::Disabled {
            engine.suspend(SuspendReason::SENDEVENTS, 0);
        }
        engine
    }

    pub fn set_motion_filter(&mut self, filter: Box<dyn MotionFilter>) {
        self.filter = filter;
    }

    pub fn set_tap_hooks(&mut self, taps: Box<dyn TapHooks>) {
        self.taps = taps;
    }

    pub fn set_button_hooks(&mut self, buttons: Box<dyn ButtonHooks>) {
        self.buttons = buttons;
    }

    pub fn set_edge_scroll_hooks(&mut self, edge_scroll: Box<dyn EdgeScrollHooks>) {
        self.edge_scroll = edge_scroll;
    }

    pub fn set_gesture_hooks(&mut self, gestures: Box<dyn GestureHooks>) {
        self.gestures = gestures;
    }

    // ---- inspection --------------------------------------------------

    pub fn nfingers_down(&self) -> usize {
        self.nfingers_down
    }

    pub fn is_suspended(&self) -> bool {
        !self.suspend_reason.is_empty()
    }

    pub fn keyboard_active(&self) -> bool {
        self.dwt.keyboard_active()
    }

    pub fn touch_state(&self, slot: usize) -> Option<TouchState> {
        self.touches.get(slot).map(|t| t.state)
    }

    pub fn touch_palm_state(&self, slot: usize) -> Option<PalmState> {
        self.touches.get(slot).map(|t| t.palm.state)
    }

    pub fn touch_thumb_state(&self, slot: usize) -> Option<ThumbState> {
        self.touches.get(slot).map(|t| t.thumb.state)
    }

    pub fn next_timer_deadline(&mut self) -> Option<u64> {
        self.timers.next_deadline()
    }

    // ---- event intake ------------------------------------------------

    /// Feed one kernel event. Output accumulates across the frame and is
    /// returned on the `FrameEnd` event that closes it.
    pub fn process_event(&mut self, event: &Event) -> FrameOutput {
        let time = event.time;
        match event.kind {
            EventKind::Abs(axis, value) => {
                if self.device.has_mt() {
                    self.process_abs_mt(axis, value, time);
                } else {
                    self.process_abs_st(axis, value, time);
                }
            }
            EventKind::Button(button, pressed) => {
                self.buttons.process_button(button, pressed, time);
                self.queued |= if pressed {
                    QueuedFlags::BUTTON_PRESS
                } else {
                    QueuedFlags::BUTTON_RELEASE
                };
            }
            EventKind::Touch(pressed) => self.fake_finger_set_touch(pressed),
            EventKind::Tool(tool, pressed) => self.fake_finger_set_tool(tool, pressed),
            EventKind::TrackpointButton(index, pressed) => {
                let button = match index {
                    0 => PhysButton::Left,
                    1 => PhysButton::Right,
                    2 => PhysButton::Middle,
                    _ => {
                        tracing::warn!(index, "unknown trackpoint button");
                        return self.take_output();
                    }
                };
                push_event(
                    &mut self.queue,
                    OutputEvent::TrackpointButton {
                        time,
                        button,
                        pressed,
                    },
                );
            }
            EventKind::Timestamp(micros) => {
                self.msc_now = micros as u64;
                self.queued |= QueuedFlags::TIMESTAMP;
            }
            EventKind::FrameEnd => self.handle_frame(time),
        }
        self.take_output()
    }

    /// Run expired timers. Call between frames whenever `next_timer_deadline`
    /// has passed.
    pub fn dispatch_timers(&mut self, now: u64) -> FrameOutput {
        while let Some(kind) = self.timers.pop_expired(now) {
            match kind {
                TimerKind::DwtKeyboard => {
                    let actions = self.dwt.handle_timeout(now);
                    self.apply_dwt_actions(&actions, now);
                }
                TimerKind::Trackpoint => {
                    self.trackpoint_active = false;
                }
            }
        }
        self.take_output()
    }

    fn take_output(&mut self) -> FrameOutput {
        FrameOutput {
            events: mem::take(&mut self.queue),
        }
    }

    fn rotated(&self) -> bool {
        self.config.left_handed && self.device.left_handed_rotation
    }

    fn rotate_x(&self, value: i32) -> i32 {
        if self.rotated() {
            self.device.x.maximum - (value - self.device.x.minimum)
        } else {
            value
        }
    }

    fn rotate_y(&self, value: i32) -> i32 {
        if self.rotated() {
            self.device.y.maximum - (value - self.device.y.minimum)
        } else {
            value
        }
    }

    /// Out-of-range coordinates are a device bug worth a log line, but the
    /// value is used as reported.
    fn check_axis_range(&self, axis: AbsAxis, value: i32) -> i32 {
        let range = match axis {
            AbsAxis::X | AbsAxis::MtPositionX => self.device.x,
            AbsAxis::Y | AbsAxis::MtPositionY => self.device.y,
            _ => return value,
        };
        if value < range.minimum || value > range.maximum {
            tracing::info!(
                ?axis,
                value,
                min = range.minimum,
                max = range.maximum,
                "axis value out of range"
            );
        }
        value
    }

    fn process_abs_mt(&mut self, axis: AbsAxis, value: i32, time: u64) {
        match axis {
            AbsAxis::MtSlot => {
                let slot = value.max(0) as usize;
                if slot >= self.touches.len() {
                    tracing::warn!(slot, "slot beyond touch capacity, clamping");
                }
                self.slot = slot.min(self.touches.len() - 1);
            }
            AbsAxis::MtPositionX => {
                let value = self.rotate_x(self.check_axis_range(axis, value));
                let t = &mut self.touches[self.slot];
                t.point.x = value;
                t.time = time;
                t.dirty = true;
                self.queued |= QueuedFlags::MOTION;
            }
            AbsAxis::MtPositionY => {
                let value = self.rotate_y(self.check_axis_range(axis, value));
                let t = &mut self.touches[self.slot];
                t.point.y = value;
                t.time = time;
                t.dirty = true;
                self.queued |= QueuedFlags::MOTION;
            }
            AbsAxis::MtTrackingId => {
                if value >= 0 {
                    self.new_touch(self.slot, time);
                } else {
                    self.end_sequence(self.slot, time);
                }
            }
            AbsAxis::MtPressure => {
                let t = &mut self.touches[self.slot];
                t.pressure = value;
                t.dirty = true;
                self.queued |= QueuedFlags::OTHERAXIS;
            }
            AbsAxis::MtTouchMajor => {
                let t = &mut self.touches[self.slot];
                t.major = value;
                t.dirty = true;
                self.queued |= QueuedFlags::OTHERAXIS;
            }
            AbsAxis::MtTouchMinor => {
                let t = &mut self.touches[self.slot];
                t.minor = value;
                t.dirty = true;
                self.queued |= QueuedFlags::OTHERAXIS;
            }
            AbsAxis::MtToolType => {
                let t = &mut self.touches[self.slot];
                t.is_tool_palm = value == MT_TOOL_PALM;
                t.dirty = true;
                self.queued |= QueuedFlags::OTHERAXIS;
            }
            // Single-touch mirrors of the slot 0 data; the slots win.
            AbsAxis::X | AbsAxis::Y | AbsAxis::Pressure => {}
        }
    }

    fn process_abs_st(&mut self, axis: AbsAxis, value: i32, time: u64) {
        match axis {
            AbsAxis::X => {
                let value = self.rotate_x(self.check_axis_range(axis, value));
                let t = &mut self.touches[0];
                t.point.x = value;
                t.time = time;
                t.dirty = true;
                self.queued |= QueuedFlags::MOTION;
            }
            AbsAxis::Y => {
                let value = self.rotate_y(self.check_axis_range(axis, value));
                let t = &mut self.touches[0];
                t.point.y = value;
                t.time = time;
                t.dirty = true;
                self.queued |= QueuedFlags::MOTION;
            }
            AbsAxis::Pressure => {
                let t = &mut self.touches[0];
                t.pressure = value;
                t.dirty = true;
                self.queued |= QueuedFlags::OTHERAXIS;
            }
            // Semi-mt bounding-box data is not per-finger; ignore it.
            _ => {}
        }
    }

    // ---- fake fingers (BTN_TOUCH / BTN_TOOL_*) -----------------------

    fn fake_finger_set_touch(&mut self, pressed: bool) {
        if pressed {
            self.fake_touches |= 0x01;
        } else {
            self.fake_touches &= !0x01;
            // Only the tool bits can say "still five down".
            self.fake_touches &= !FAKE_FINGER_OVERFLOW;
        }
    }

    fn fake_finger_set_tool(&mut self, tool: FingerTool, pressed: bool) {
        let shift = match tool {
            FingerTool::Finger => 1,
            FingerTool::Doubletap => 2,
            FingerTool::Tripletap => 3,
            FingerTool::Quadtap => 4,
            FingerTool::Quinttap => {
                if pressed {
                    self.fake_touches |= FAKE_FINGER_OVERFLOW;
                }
                return;
            }
        };
        if pressed {
            if matches!(
                tool,
                FingerTool::Doubletap | FingerTool::Tripletap | FingerTool::Quadtap
            ) {
                // A concrete count supersedes "five or more".
                self.fake_touches &= !FAKE_FINGER_OVERFLOW;
            }
            self.fake_touches |= 1 << shift;
        } else {
            self.fake_touches &= !(1 << shift);
        }
    }

    pub(crate) fn fake_finger_count(&self) -> FakeFingers {
        if self.fake_touches & FAKE_FINGER_OVERFLOW != 0 {
            return FakeFingers::Overflow;
        }
        let tools = (self.fake_touches >> 1) & 0x0f;
        if tools.count_ones() > 1 {
            tracing::warn!(
                "kernel bug: multiple finger-count tools set ({:#04x})",
                self.fake_touches
            );
        }
        if tools != 0 {
            FakeFingers::Count(8 - tools.leading_zeros() as usize)
        } else if self.fake_touches & 0x01 != 0 {
            // BTN_TOUCH without a tool bit still means one finger down.
            FakeFingers::Count(1)
        } else {
            FakeFingers::Count(0)
        }
    }

    pub(crate) fn fake_finger_is_touching(&self) -> bool {
        self.fake_touches & 0x01 != 0
    }

    // ---- touch lifecycle ---------------------------------------------

    /// The kernel opened a contact. It hovers until pressure, size, or the
    /// tool count says the finger is actually down.
    fn new_touch(&mut self, i: usize, time: u64) {
        let t = &mut self.touches[i];
        if matches!(
            t.state,
            TouchState::Begin | TouchState::Update | TouchState::Hovering
        ) {
            return;
        }
        let mut fresh = Touch::new();
        fresh.state = TouchState::Hovering;
        fresh.dirty = true;
        fresh.time = time;
        fresh.point = t.point;
        fresh.pressure = t.pressure;
        fresh.major = t.major;
        fresh.minor = t.minor;
        fresh.thumb.first_touch_time = time;
        *t = fresh;
        self.queued |= QueuedFlags::MOTION;
    }

    pub(crate) fn begin_touch(&mut self, i: usize, time: u64) {
        match self.touches[i].state {
            TouchState::Begin | TouchState::Update | TouchState::End => return,
            TouchState::MaybeEnd => {
                // Scheduled to end this very frame: the contact survived.
                self.recover_ended_touch(i);
                return;
            }
            TouchState::Hovering | TouchState::None => {}
        }
        let t = &mut self.touches[i];
        t.history.reset();
        t.dirty = true;
        t.state = TouchState::Begin;
        t.time = time;
        t.was_down = true;
        t.palm.time = time;
        t.thumb.initial = t.point;
        t.pinned.is_pinned = false;
        self.nfingers_down += 1;
        self.queued |= QueuedFlags::MOTION;
    }

    /// Schedule the touch to end this frame. Recoverable until the frame
    /// closes.
    pub(crate) fn maybe_end_touch(&mut self, i: usize, time: u64) {
        match self.touches[i].state {
            TouchState::None | TouchState::MaybeEnd => return,
            TouchState::End => {
                tracing::warn!(slot = i, "library bug: touch already ending");
                return;
            }
            TouchState::Hovering | TouchState::Begin | TouchState::Update => {}
        }
        let t = &mut self.touches[i];
        if t.state == TouchState::Hovering {
            t.state = TouchState::None;
        } else {
            t.state = TouchState::MaybeEnd;
            self.nfingers_down = self.nfingers_down.saturating_sub(1);
        }
        t.dirty = true;
        t.time = time;
    }

    pub(crate) fn recover_ended_touch(&mut self, i: usize) {
        let t = &mut self.touches[i];
        if t.state != TouchState::MaybeEnd {
            tracing::warn!(slot = i, state = ?t.state, "library bug: recovering touch that is not ending");
            return;
        }
        t.dirty = true;
        t.state = TouchState::Update;
        self.nfingers_down += 1;
    }

    fn end_touch(&mut self, i: usize, time: u64) {
        let t = &mut self.touches[i];
        if t.state != TouchState::MaybeEnd {
            tracing::warn!(slot = i, state = ?t.state, "library bug: ending touch that was not scheduled to end");
            return;
        }
        t.dirty = true;
        t.palm.state = PalmState::None;
        t.state = TouchState::End;
        t.pinned.is_pinned = false;
        t.time = time;
        self.queued |= QueuedFlags::MOTION;
    }

    /// The kernel dropped the tracking id: the contact is gone for good
    /// unless something resurrects it before the frame closes.
    fn end_sequence(&mut self, i: usize, time: u64) {
        self.touches[i].has_ended = true;
        self.maybe_end_touch(i, time);
    }

    // ---- frame pipeline ----------------------------------------------

    fn handle_frame(&mut self, time: u64) {
        self.pre_process(time);
        self.process(time);
        self.post_events(time);
        self.post_process(time);
    }

    fn pre_process(&mut self, time: u64) {
        if self.queued.contains(QueuedFlags::TIMESTAMP) {
            let actions = self.msc_corrector.process(self.msc_now, time);
            for action in actions {
                match action {
                    MscAction::RewriteHistory { tdelta, interval } => {
                        let base = time.saturating_sub(tdelta);
                        for t in &mut self.touches {
                            t.history.rewrite_times(base, interval);
                        }
                    }
                    MscAction::RestartFilter { time } => self.filter.restart(time),
                }
            }
        }

        self.process_fake_touches(time);
        self.unhover_touches(time);

        for i in 0..self.touches.len() {
            if self.touches[i].state == TouchState::MaybeEnd {
                self.end_touch(i, time);
            }
            let t = &mut self.touches[i];
            if t.state == TouchState::End && t.history.count() > 0 {
                // The lift-off coordinate wobbles; report the end where the
                // finger last moved to.
                t.point = t.history.offset(0).point;
            }
        }
    }

    fn process_fake_touches(&mut self, time: u64) {
        let nfake = match self.fake_finger_count() {
            FakeFingers::Overflow => return,
            FakeFingers::Count(n) => n,
        };

        // Serial Synaptics pads drop touch 2 around tool-count changes and
        // reopen it next frame; with three fingers reported the drop was
        // bogus.
        if self.quirks.synaptics_serial
            && nfake >= 3
            && self.device.has_mt()
            && self.touches.len() > 1
            && self.touches[1].state == TouchState::MaybeEnd
        {
            tracing::debug!("resurrecting touch 2");
            self.recover_ended_touch(1);
        }

        let start = if self.device.has_mt() { self.num_slots } else { 0 };
        for i in start..self.touches.len() {
            if i < nfake {
                if !self.touches[i].is_down() {
                    if self.touches[i].state == TouchState::None {
                        // Fake slots never hover; open and begin in one go.
                        self.new_touch(i, time);
                    }
                    self.begin_touch(i, time);
                }
            } else if self.touches[i].state != TouchState::None {
                self.end_sequence(i, time);
            }
        }
    }

    fn process(&mut self, time: u64) {
        let finger_count_changed = self.nfingers_down != self.old_nfingers_down;
        let mut restart_filter = false;
        let mut new_touch_began = false;

        for i in 0..self.touches.len() {
            if i >= self.num_slots {
                // Contacts beyond the slot count have no coordinates of
                // their own; they ride on the tracked slot.
                let first_point = self.touches[0].point;
                let first_pressure = self.touches[0].pressure;
                let first_dirty = self.touches[0].dirty;
                let t = &mut self.touches[i];
                if !matches!(t.state, TouchState::None | TouchState::Hovering) {
                    t.point = first_point;
                    t.pressure = first_pressure;
                    if !t.dirty {
                        t.dirty = first_dirty;
                    }
                }
            }

            if !self.touches[i].dirty || self.touches[i].state == TouchState::None {
                continue;
            }

            if finger_count_changed {
                self.touches[i].history.reset();
            }

            if motion::detect_jump(&mut self.touches[i], &self.device, &self.quirks, time) {
                if self.device.semi_mt {
                    tracing::debug!(slot = i, "discarding bounding-box jump");
                } else {
                    tracing::warn!(slot = i, "kernel bug: discarding pointer jump");
                }
                self.touches[i].history.reset();
            }

            self.thumb_update(i, time);
            self.palm_detect(i, time);
            self.detect_wobbling(i, time);
            self.motion_hysteresis(i);

            let t = &mut self.touches[i];
            t.history.push(t.point, time);
            motion::update_speed(t, &self.device, time);

            self.unpin_finger(i);

            if self.touches[i].state == TouchState::Begin {
                restart_filter = true;
                new_touch_began = true;
            }
        }

        let speed_exceeded = self
            .touches
            .iter()
            .map(|t| t.speed.exceeded_count)
            .max()
            .unwrap_or(0);
        if new_touch_began && self.nfingers_down == 2 && speed_exceeded > SPEED_THUMB_WINDOW {
            self.detect_thumb_while_moving();
        }

        if restart_filter {
            self.filter.restart(time);
        }

        let snapshot = self.snapshot(time);
        self.buttons.handle_state(&snapshot);
        self.edge_scroll.handle_state(&snapshot);

        // A physical click on a clickpad: pin every finger so the clicking
        // finger does not double as pointer motion. Unpinning happens per
        // finger once it travels far enough for a drag.
        if self.queued.contains(QueuedFlags::BUTTON_PRESS) && self.device.clickpad {
            self.pin_fingers();
        }
    }

    fn post_events(&mut self, time: u64) {
        let snapshot = self.snapshot(time);

        if !self.suspend_reason.is_empty() {
            if self.device.has_top_software_buttons {
                let _ = self.buttons.post_events(&snapshot, &mut self.queue);
            }
            return;
        }

        let mut suppress_motion = self.taps.handle_state(&snapshot, &mut self.queue);
        suppress_motion |= self.buttons.post_events(&snapshot, &mut self.queue);

        if suppress_motion || self.trackpoint_active || self.dwt.keyboard_active() {
            self.edge_scroll.stop_events(time, &mut self.queue);
            self.gestures.cancel(time, &mut self.queue);
            return;
        }

        self.gestures.handle_state(&snapshot);
        if self.edge_scroll.post_events(&snapshot, &mut self.queue) {
            return;
        }
        self.gestures
            .post_events(&snapshot, self.filter.as_mut(), &mut self.queue);
    }

    fn post_process(&mut self, time: u64) {
        for t in &mut self.touches {
            if !t.dirty {
                continue;
            }
            match t.state {
                TouchState::End => {
                    if t.has_ended {
                        t.state = TouchState::None;
                        t.has_ended = false;
                        t.was_down = false;
                    } else {
                        // Pressure or size dropped but the kernel still
                        // tracks the contact: back to hovering.
                        t.state = TouchState::Hovering;
                    }
                }
                TouchState::Begin => t.state = TouchState::Update,
                _ => {}
            }
            t.dirty = false;
        }

        let snapshot = self.snapshot(time);
        self.taps.post_process(&snapshot);

        let down = self.touches.iter().filter(|t| t.is_down()).count();
        if down != self.nfingers_down {
            tracing::warn!(
                tracked = self.nfingers_down,
                actual = down,
                "library bug: finger count desync, resyncing"
            );
            self.nfingers_down = down;
        }

        self.old_nfingers_down = self.nfingers_down;
        self.queued = QueuedFlags::empty();
    }

    fn snapshot(&self, time: u64) -> FrameSnapshot {
        let mut snapshot = FrameSnapshot {
            time,
            nfingers_down: self.nfingers_down,
            two_finger_scroll: self.scroll_method == ScrollMethod::TwoFinger,
            touches: heapless::Vec::new(),
        };
        for (i, t) in self.touches.iter().enumerate().take(MAX_TOUCH_VIEWS) {
            let mut view = TouchView {
                slot: i,
                state: t.state,
                point: t.point,
                time: t.time,
                dirty: t.dirty,
                was_down: t.was_down,
                palm: t.is_palm(),
                thumb: t.is_thumb(),
                pinned: t.pinned.is_pinned,
                active: false,
                delta: motion::history_delta(t),
            };
            view.active = t.is_down()
                && !view.palm
                && !view.thumb
                && !view.pinned
                && self.buttons.touch_active(&view)
                && self.edge_scroll.touch_active(&view);
            let _ = snapshot.touches.push(view);
        }
        snapshot
    }

    // ---- per-touch motion steps --------------------------------------

    fn detect_wobbling(&mut self, i: usize, time: u64) {
        if self.hysteresis.enabled || self.nfingers_down != 1 {
            return;
        }
        if motion::track_wobble(&mut self.touches[i], time) {
            tracing::debug!("hysteresis enabled, pad is wobbling");
            self.hysteresis.enabled = true;
        }
    }

    fn motion_hysteresis(&mut self, i: usize) {
        let margin_x = self.hysteresis.margin_x;
        let margin_y = self.hysteresis.margin_y;
        let enabled = self.hysteresis.enabled;
        let t = &mut self.touches[i];
        // The center tracks even while disabled so that enabling mid-touch
        // rounds against the finger's real position.
        if enabled && t.history.count() > 0 {
            t.point.x = motion::hysteresis(t.point.x, t.hysteresis.center.x, margin_x);
            t.point.y = motion::hysteresis(t.point.y, t.hysteresis.center.y, margin_y);
        }
        t.hysteresis.center = t.point;
    }

    fn unpin_finger(&mut self, i: usize) {
        let t = &self.touches[i];
        if !t.pinned.is_pinned {
            return;
        }
        let (dx_mm, dy_mm) = self
            .device
            .delta_mm(t.point.x - t.pinned.center.x, t.point.y - t.pinned.center.y);
        if dx_mm.hypot(dy_mm) >= PINNED_MOTION_THRESHOLD_MM {
            self.touches[i].pinned.is_pinned = false;
        }
    }

    fn pin_fingers(&mut self) {
        for t in &mut self.touches {
            t.pinned.is_pinned = true;
            t.pinned.center = t.point;
        }
    }

    // ---- suspend / resume arbitration --------------------------------

    /// Suspend for one reason. The first reason clears all touch state;
    /// further reasons only accumulate.
    pub fn suspend(&mut self, trigger: SuspendReason, time: u64) {
        if self.suspend_reason.is_empty() {
            self.clear_state(time);
            if self.device.has_top_software_buttons {
                // Keep the trackpoint buttons usable: the button unit takes
                // over a triple-height top strip, everything else is off.
                self.buttons.set_top_buttons_enlarged(true);
                tracing::debug!(?trigger, "suspended, top buttons stay active");
            } else {
                tracing::debug!(?trigger, "suspended");
            }
        }
        self.suspend_reason |= trigger;
    }

    /// Drop one suspend reason; the pad resumes when none remain.
    pub fn resume(&mut self, trigger: SuspendReason, time: u64) {
        if self.suspend_reason.is_empty() {
            return;
        }
        self.suspend_reason -= trigger;
        if self.suspend_reason.is_empty() {
            self.buttons.set_top_buttons_enlarged(false);
            self.reset_slots(time);
            tracing::debug!(?trigger, "resumed");
        }
    }

    /// Release everything and run one empty frame so the downstream state
    /// machines settle before the pad goes quiet.
    fn clear_state(&mut self, time: u64) {
        self.buttons.release_all(time, &mut self.queue);
        self.taps.remove_all(time, &mut self.queue);
        for i in 0..self.touches.len() {
            if self.touches[i].state != TouchState::None {
                self.end_sequence(i, time);
            }
        }
        self.fake_touches = 0;
        self.handle_frame(time);
    }

    /// Forget all slot state; the kernel re-reports contacts after resume.
    fn reset_slots(&mut self, _time: u64) {
        for t in &mut self.touches {
            *t = Touch::new();
        }
        self.slot = 0;
        self.nfingers_down = 0;
        self.old_nfingers_down = 0;
        self.fake_touches = 0;
        self.queued = QueuedFlags::empty();
    }

    // ---- paired-device inputs ----------------------------------------

    /// Lid switch listener.
    pub fn lid_switch(&mut self, closed: bool, time: u64) -> FrameOutput {
        if closed {
            self.suspend(SuspendReason::LID, time);
        } else {
            self.resume(SuspendReason::LID, time);
        }
        self.take_output()
    }

    /// Tablet-mode switch listener.
    pub fn tablet_mode(&mut self, enabled: bool, time: u64) -> FrameOutput {
        if enabled {
            self.suspend(SuspendReason::TABLET_MODE, time);
        } else {
            self.resume(SuspendReason::TABLET_MODE, time);
        }
        self.take_output()
    }

    /// An external pointer device came or went.
    pub fn external_mouse(&mut self, present: bool, time: u64) -> FrameOutput {
        self.external_mouse_present = present;
        if self.config.send_events == SendEventsMode::DisabledOnExternalMouse {
            if present {
                self.suspend(SuspendReason::EXTERNAL_MOUSE, time);
            } else {
                self.resume(SuspendReason::EXTERNAL_MOUSE, time);
            }
        }
        self.take_output()
    }

    /// Pen/digitizer arbitration: while active every touch classifies as a
    /// palm.
    pub fn set_arbitration(&mut self, active: bool) {
        self.arbitration_active = active;
    }

    /// Key event from a paired keyboard.
    pub fn keyboard_key(&mut self, keyboard: u32, key: u32, pressed: bool, time: u64) -> FrameOutput {
        if self.config.dwt && self.dwt.is_paired(keyboard) {
            let actions = self.dwt.handle_key(key, pressed, time);
            self.apply_dwt_actions(&actions, time);
        }
        self.take_output()
    }

    /// Offer a keyboard for dwt pairing.
    pub fn pair_keyboard(&mut self, keyboard: KeyboardInfo) -> bool {
        self.dwt.pair_keyboard(
            keyboard,
            self.device.internal,
            self.device.vendor,
            self.device.product,
        )
    }

    /// A paired keyboard vanished; detach without tearing anything down.
    pub fn keyboard_removed(&mut self, id: u32) {
        self.dwt.unpair_keyboard(id);
    }

    /// Activity on the paired trackpoint.
    pub fn trackpoint_activity(&mut self, time: u64) -> FrameOutput {
        if !self.trackpoint_active {
            self.taps.suspend(time, &mut self.queue);
            self.edge_scroll.stop_events(time, &mut self.queue);
            self.gestures.cancel(time, &mut self.queue);
            self.trackpoint_active = true;
        }
        self.trackpoint_last_time = time;
        self.timers
            .set(TimerKind::Trackpoint, time + TRACKPOINT_ACTIVITY_TIMEOUT);
        self.take_output()
    }

    /// The paired trackpoint vanished.
    pub fn trackpoint_removed(&mut self, time: u64) -> FrameOutput {
        self.timers.cancel(TimerKind::Trackpoint);
        if self.trackpoint_active {
            self.trackpoint_active = false;
            self.taps.resume(time);
        }
        self.take_output()
    }

    fn apply_dwt_actions(&mut self, actions: &[DwtAction], time: u64) {
        for action in actions {
            match action {
                DwtAction::StopActions => {
                    self.taps.suspend(time, &mut self.queue);
                    self.edge_scroll.stop_events(time, &mut self.queue);
                    self.gestures.cancel(time, &mut self.queue);
                }
                DwtAction::ResumeTap => self.taps.resume(time),
                DwtAction::SetTimer(deadline) => {
                    self.timers.set(TimerKind::DwtKeyboard, *deadline)
                }
                DwtAction::CancelTimer => self.timers.cancel(TimerKind::DwtKeyboard),
            }
        }
    }

    // ---- runtime configuration ---------------------------------------

    pub fn set_send_events_mode(&mut self, mode: SendEventsMode, time: u64) -> FrameOutput {
        self.config.send_events = mode;
        match mode {
            SendEventsMode::Disabled => {
                self.suspend(SuspendReason::SENDEVENTS, time);
                self.resume(SuspendReason::EXTERNAL_MOUSE, time);
            }
            SendEventsMode::Enabled => {
                self.resume(SuspendReason::SENDEVENTS, time);
                self.resume(SuspendReason::EXTERNAL_MOUSE, time);
            }
            SendEventsMode::DisabledOnExternalMouse => {
                self.resume(SuspendReason::SENDEVENTS, time);
                if self.external_mouse_present {
                    self.suspend(SuspendReason::EXTERNAL_MOUSE, time);
                }
            }
        }
        self.take_output()
    }

    pub fn set_scroll_method(&mut self, method: ScrollMethod) {
        if method == ScrollMethod::TwoFinger && self.touches.len() < 2 {
            tracing::warn!("two-finger scroll needs two touches, keeping current method");
            return;
        }
        self.scroll_method = method;
    }

    pub fn set_dwt(&mut self, enabled: bool, time: u64) -> FrameOutput {
        self.config.dwt = enabled;
        if !enabled {
            let actions = self.dwt.reset();
            self.apply_dwt_actions(&actions, time);
        }
        self.take_output()
    }

    pub fn set_left_handed(&mut self, enabled: bool) {
        self.config.left_handed = enabled;
    }

    pub fn set_thumb_detection(&mut self, enabled: bool) {
        self.config.detect_thumbs = enabled;
        self.thumb_cfg =
            ThumbConfig::new(&self.device, &self.quirks, enabled);
    }
}
