//! Typed event model: the kernel-style per-frame stream in, pointer/scroll
//! and button events out.

use heapless::Vec;

/// Absolute axes the decoder understands, mirroring the evdev code set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbsAxis {
    X,
    Y,
    Pressure,
    MtSlot,
    MtPositionX,
    MtPositionY,
    MtTrackingId,
    MtPressure,
    MtTouchMajor,
    MtTouchMinor,
    MtToolType,
}

/// `ABS_MT_TOOL_TYPE` value reported for palm-shaped contacts.
pub const MT_TOOL_PALM: i32 = 2;

/// Physical buttons reported by the device itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhysButton {
    Left,
    Middle,
    Right,
}

/// `BTN_TOOL_*` finger-count tools.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FingerTool {
    Finger,
    Doubletap,
    Tripletap,
    Quadtap,
    Quinttap,
}

/// One decoded kernel event. A frame is a run of events sharing a timestamp,
/// terminated by [`EventKind::FrameEnd`] (`SYN_REPORT`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Abs(AbsAxis, i32),
    /// `BTN_LEFT`/`BTN_MIDDLE`/`BTN_RIGHT`.
    Button(PhysButton, bool),
    /// `BTN_TOUCH`.
    Touch(bool),
    /// `BTN_TOOL_FINGER`..`BTN_TOOL_QUINTTAP`.
    Tool(FingerTool, bool),
    /// `BTN_0`/`BTN_1`/`BTN_2`, remapped onto the paired trackpoint.
    TrackpointButton(u8, bool),
    /// `MSC_TIMESTAMP`, microseconds since the controller started reporting.
    Timestamp(u32),
    /// `SYN_REPORT`.
    FrameEnd,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Event {
    /// Kernel timestamp in microseconds. Non-decreasing across frames.
    pub time: u64,
    pub kind: EventKind,
}

impl Event {
    pub fn new(time: u64, kind: EventKind) -> Self {
        Self { time, kind }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScrollAxis {
    Horizontal,
    Vertical,
}

/// High-level events produced by the engine and its default collaborators.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum OutputEvent {
    /// Accelerated pointer delta in device units.
    PointerMotion { time: u64, dx: f64, dy: f64 },
    /// Scroll amount on one axis; a `0.0` value terminates that axis.
    Scroll {
        time: u64,
        axis: ScrollAxis,
        value: f64,
    },
    Button {
        time: u64,
        button: PhysButton,
        pressed: bool,
    },
    /// Button event rerouted to the paired trackpoint device.
    TrackpointButton {
        time: u64,
        button: PhysButton,
        pressed: bool,
    },
}

pub const MAX_EVENTS_PER_FRAME: usize = 32;

/// Fixed-capacity per-frame output buffer. The frame pipeline never produces
/// more than a handful of events; overflow is a logged drop, not a stall.
pub type EventSink = Vec<OutputEvent, MAX_EVENTS_PER_FRAME>;

/// Everything one engine entry point produced.
#[derive(Clone, Debug, Default)]
pub struct FrameOutput {
    pub events: EventSink,
}

pub(crate) fn push_event(sink: &mut EventSink, event: OutputEvent) {
    if sink.push(event).is_err() {
        tracing::warn!(?event, "frame output buffer full, dropping event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_overflow_drops_instead_of_panicking() {
        let mut sink = EventSink::new();
        for i in 0..MAX_EVENTS_PER_FRAME + 4 {
            push_event(
                &mut sink,
                OutputEvent::PointerMotion {
                    time: i as u64,
                    dx: 1.0,
                    dy: 0.0,
                },
            );
        }
        assert_eq!(sink.len(), MAX_EVENTS_PER_FRAME);
    }
}
