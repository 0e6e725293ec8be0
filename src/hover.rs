//! Hover resolution: deciding which slots are actually touching. Runs at
//! frame start, after fake-finger reconciliation and before the touch
//! states are finalized.

use crate::engine::{FakeFingers, TouchpadEngine};
use crate::touch::TouchState;

/// How a device tells touching from hovering, fixed at construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum HoverMethod {
    Pressure { low: i32, high: i32 },
    Size { low: i32, high: i32 },
    FakeFingers,
}

/// Default pressure thresholds as fractions of the axis range.
const PRESSURE_HIGH_FRACTION: f64 = 0.12;
const PRESSURE_LOW_FRACTION: f64 = 0.10;
/// Size-based hovering needs enough slots to trust the size data.
pub(crate) const SIZE_HOVER_MIN_SLOTS: usize = 5;

impl HoverMethod {
    pub(crate) fn select(
        device: &crate::device::DeviceInfo,
        quirks: &crate::device::Quirks,
    ) -> Self {
        if let Some(pressure) = device.pressure {
            let (low, high) = quirks.pressure_range.unwrap_or_else(|| {
                let span = pressure.span() as f64;
                (
                    pressure.minimum + (span * PRESSURE_LOW_FRACTION) as i32,
                    pressure.minimum + (span * PRESSURE_HIGH_FRACTION) as i32,
                )
            });
            if low < high {
                return HoverMethod::Pressure { low, high };
            }
            tracing::warn!(low, high, "bad pressure range, falling back to tool counting");
        }
        if device.has_touch_size && device.num_slots >= SIZE_HOVER_MIN_SLOTS {
            if let Some((low, high)) = quirks.touch_size_range {
                return HoverMethod::Size { low, high };
            }
        }
        HoverMethod::FakeFingers
    }
}

impl TouchpadEngine {
    pub(crate) fn unhover_touches(&mut self, time: u64) {
        match self.hover_method {
            HoverMethod::Pressure { low, high } => self.unhover_pressure(time, low, high),
            HoverMethod::Size { low, high } => self.unhover_size(time, low, high),
            HoverMethod::FakeFingers => self.unhover_fake_touches(time),
        }
    }

    fn unhover_pressure(&mut self, time: u64, low: i32, high: i32) {
        for i in 0..self.num_slots.min(self.touches.len()) {
            let t = &self.touches[i];
            if t.state == TouchState::None || !t.dirty {
                continue;
            }
            if t.state == TouchState::Hovering {
                if t.pressure >= high {
                    tracing::debug!(slot = i, pressure = t.pressure, "pressure: begin touch");
                    self.begin_touch(i, time);
                }
            } else if t.is_down() && t.pressure < low {
                tracing::debug!(slot = i, pressure = t.pressure, "pressure: end touch");
                self.maybe_end_touch(i, time);
            }
        }
    }

    fn unhover_size(&mut self, time: u64, low: i32, high: i32) {
        for i in 0..self.num_slots.min(self.touches.len()) {
            let t = &self.touches[i];
            if t.state == TouchState::None || !t.dirty {
                continue;
            }
            if t.state == TouchState::Hovering {
                if (t.major > high && t.minor > low) || (t.major > low && t.minor > high) {
                    tracing::debug!(slot = i, major = t.major, minor = t.minor, "size: begin touch");
                    self.begin_touch(i, time);
                }
            } else if t.is_down() && (t.major < low || t.minor < low) {
                tracing::debug!(slot = i, "size: end touch");
                self.maybe_end_touch(i, time);
            }
        }
    }

    /// No pressure or size data: trust `BTN_TOUCH` plus the tool-count
    /// bits and line the slot states up with them.
    fn unhover_fake_touches(&mut self, time: u64) {
        if self.fake_touches == 0 && self.nfingers_down == 0 {
            return;
        }
        let nfake = match self.fake_finger_count() {
            FakeFingers::Overflow => return,
            FakeFingers::Count(n) => n,
        };
        let touching = self.fake_finger_is_touching();

        if touching && self.nfingers_down < nfake {
            for i in 0..self.touches.len() {
                if self.touches[i].state == TouchState::Hovering {
                    self.begin_touch(i, time);
                    if self.nfingers_down >= nfake {
                        break;
                    }
                }
            }
        }

        if self.nfingers_down > nfake || !touching {
            // Bring the count down ending the most recent slots first.
            for i in (0..self.touches.len()).rev() {
                let state = self.touches[i].state;
                if matches!(
                    state,
                    TouchState::Hovering | TouchState::None | TouchState::MaybeEnd
                ) {
                    continue;
                }
                self.maybe_end_touch(i, time);
                if self.nfingers_down == nfake {
                    break;
                }
            }
        }
    }
}
