//! Motion conditioning: hysteresis, wobble detection, pointer-jump
//! rejection, history deltas, and per-touch speed tracking.

use crate::config::ms2us;
use crate::device::{DeviceInfo, Quirks};
use crate::touch::{Point, Touch, HISTORY_LENGTH};

/// Frame cadence the jump and speed thresholds are calibrated against.
pub(crate) const REFERENCE_INTERVAL: u64 = ms2us(12);
/// Single-frame motion beyond this is discarded as a jump.
const JUMP_THRESHOLD_MM: f64 = 20.0;
/// Frame-over-frame growth beyond this is discarded as a jump.
const JUMP_DELTA_GROWTH_MM: f64 = 7.0;
/// Gaps longer than this interrupt the wobble pattern.
const WOBBLE_MAX_GAP: u64 = ms2us(40);
/// Speed above which a touch counts towards the sustained-speed window.
const SPEED_EXCEEDED_THRESHOLD_MM_S: f64 = 100.0;

/// Per-touch hysteresis state: the rounding center plus the 3-bit
/// left/right window feeding the wobble detector.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct TouchHysteresis {
    pub center: Point,
    pub x_motion_history: u8,
}

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct SpeedTrack {
    /// mm/s over the last two history samples.
    pub last_speed: f64,
    /// Saturating 0..=10 window of consecutive fast frames.
    pub exceeded_count: u8,
}

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct JumpTrack {
    pub last_delta_mm: f64,
}

/// Round `input` towards `center`: deltas inside the margin collapse to
/// zero, the excess carries through. The caller moves the center with the
/// output.
pub(crate) fn hysteresis(input: i32, center: i32, margin: i32) -> i32 {
    let diff = input - center;
    if diff.abs() <= margin {
        return center;
    }
    if diff > margin {
        center + diff - margin
    } else {
        center + diff + margin
    }
}

/// Hysteresis margin for one axis: the kernel fuzz when the device reports
/// one, else a quarter of a millimeter's worth of units.
pub(crate) fn hysteresis_margin(fuzz: i32, resolution: i32) -> i32 {
    if fuzz > 0 {
        fuzz
    } else {
        (resolution.max(1) / 4).max(1)
    }
}

/// Unaccelerated delta between the two most recent history samples, in
/// device units. Zero until the touch has two samples, which keeps landing
/// coordinates from turning into pointer motion.
pub(crate) fn history_delta(t: &Touch) -> (f64, f64) {
    if t.history.count() <= 1 {
        return (0.0, 0.0);
    }
    let a = t.history.offset(0);
    let b = t.history.offset(1);
    (
        (a.point.x - b.point.x) as f64,
        (a.point.y - b.point.y) as f64,
    )
}

/// Detect an implausible single-frame move. Runs on the raw coordinate
/// before the history push; a hit means the frame's motion is discarded by
/// resetting the history.
pub(crate) fn detect_jump(t: &mut Touch, device: &DeviceInfo, quirks: &Quirks, time: u64) -> bool {
    if quirks.wacom_touchpad {
        return false;
    }
    if t.history.count() == 0 {
        t.jumps.last_delta_mm = 0.0;
        return false;
    }

    let last = t.history.offset(0);
    let tdelta = time.saturating_sub(last.time);
    // Irregular frames carry no usable velocity information.
    if tdelta == 0 || tdelta > 2 * REFERENCE_INTERVAL {
        t.jumps.last_delta_mm = 0.0;
        return false;
    }

    let (dx_mm, dy_mm) = device.delta_mm(t.point.x - last.point.x, t.point.y - last.point.y);
    let abs_distance = dx_mm.hypot(dy_mm) * REFERENCE_INTERVAL as f64 / tdelta as f64;
    let rel_distance = abs_distance - t.jumps.last_delta_mm;
    let is_jump = abs_distance > JUMP_THRESHOLD_MM || rel_distance > JUMP_DELTA_GROWTH_MM;
    t.jumps.last_delta_mm = abs_distance;
    is_jump
}

/// Shift the touch's left/right register by one move and report whether the
/// wobble pattern (right, left, right) completed. Gaps and vertical-only
/// motion restart the pattern.
pub(crate) fn track_wobble(t: &mut Touch, time: u64) -> bool {
    if t.history.count() == 0 {
        return false;
    }
    let prev = t.history.offset(0);
    if time.saturating_sub(prev.time) > WOBBLE_MAX_GAP {
        t.hysteresis.x_motion_history = 0;
        return false;
    }

    let dx = t.point.x - prev.point.x;
    let dy = t.point.y - prev.point.y;
    if dx == 0 {
        if dy != 0 {
            t.hysteresis.x_motion_history = 0;
        }
        return false;
    }

    t.hysteresis.x_motion_history >>= 1;
    if dx > 0 {
        t.hysteresis.x_motion_history |= 0b100;
    }
    t.hysteresis.x_motion_history == 0b101
}

/// Track the touch's speed over the last two samples. Only meaningful on
/// true multi-touch devices with a full history window; called after the
/// current frame's push.
pub(crate) fn update_speed(t: &mut Touch, device: &DeviceInfo, time: u64) {
    if !device.has_mt() || device.semi_mt {
        return;
    }
    if t.state != crate::touch::TouchState::Update {
        return;
    }
    if t.history.count() < HISTORY_LENGTH {
        return;
    }

    let last = t.history.offset(1);
    let dt = time.saturating_sub(last.time);
    if dt == 0 {
        return;
    }

    let (dx_mm, dy_mm) = device.delta_mm(t.point.x - last.point.x, t.point.y - last.point.y);
    let speed = dx_mm.hypot(dy_mm) / dt as f64 * 1_000_000.0;
    t.speed.last_speed = speed;
    if speed > SPEED_EXCEEDED_THRESHOLD_MM_S {
        t.speed.exceeded_count = (t.speed.exceeded_count + 1).min(10);
    } else {
        t.speed.exceeded_count = t.speed.exceeded_count.saturating_sub(1);
    }
}
