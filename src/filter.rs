//! Pointer-acceleration filter seam. The engine calls through this trait
//! for every delta it posts; the default is the touchpad velocity profile.

use crate::device::DeviceInfo;
use crate::motion::REFERENCE_INTERVAL;

const DEFAULT_CONSTANT_ACCEL_NUMERATOR: f64 = 100.0;
const DEFAULT_MIN_ACCEL_FACTOR: f64 = 0.20;
const DEFAULT_MAX_ACCEL_FACTOR: f64 = 0.40;

pub trait MotionFilter {
    /// Accelerate a raw delta (device units).
    fn dispatch(&mut self, dx: f64, dy: f64, time: u64) -> (f64, f64);
    /// Constant-speed variant used by scroll-style consumers; no velocity
    /// tracking.
    fn dispatch_constant(&mut self, dx: f64, dy: f64, time: u64) -> (f64, f64);
    /// Forget velocity history, e.g. after a finger lands or after a
    /// timestamp rewrite.
    fn restart(&mut self, time: u64);
}

/// No acceleration at all.
#[derive(Clone, Copy, Debug, Default)]
pub struct FlatFilter;

impl MotionFilter for FlatFilter {
    fn dispatch(&mut self, dx: f64, dy: f64, _time: u64) -> (f64, f64) {
        (dx, dy)
    }

    fn dispatch_constant(&mut self, dx: f64, dy: f64, _time: u64) -> (f64, f64) {
        (dx, dy)
    }

    fn restart(&mut self, _time: u64) {}
}

/// Velocity profile scaled to the pad diagonal: the factor is
/// `velocity * 100 / diagonal`, clamped to `[0.20, 0.40]`.
#[derive(Clone, Copy, Debug)]
pub struct PointerAccelFilter {
    constant_factor: f64,
    min_factor: f64,
    max_factor: f64,
    last_time: Option<u64>,
}

impl PointerAccelFilter {
    pub fn new(device: &DeviceInfo) -> Self {
        Self {
            constant_factor: DEFAULT_CONSTANT_ACCEL_NUMERATOR / device.diagonal_units().max(1.0),
            min_factor: DEFAULT_MIN_ACCEL_FACTOR,
            max_factor: DEFAULT_MAX_ACCEL_FACTOR,
            last_time: None,
        }
    }

    fn factor(&mut self, dx: f64, dy: f64, time: u64) -> f64 {
        let dt = match self.last_time {
            Some(last) if time > last => time - last,
            // First event after a restart has no usable interval.
            _ => REFERENCE_INTERVAL,
        };
        self.last_time = Some(time);

        let velocity = dx.hypot(dy) / (dt as f64 / 1_000.0);
        (velocity * self.constant_factor).clamp(self.min_factor, self.max_factor)
    }
}

impl MotionFilter for PointerAccelFilter {
    fn dispatch(&mut self, dx: f64, dy: f64, time: u64) -> (f64, f64) {
        let factor = self.factor(dx, dy, time);
        (dx * factor, dy * factor)
    }

    fn dispatch_constant(&mut self, dx: f64, dy: f64, _time: u64) -> (f64, f64) {
        (dx * self.min_factor, dy * self.min_factor)
    }

    fn restart(&mut self, time: u64) {
        self.last_time = Some(time);
    }
}
