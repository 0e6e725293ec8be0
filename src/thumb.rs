//! Thumb classification for tall clickpads. A contact starting low on the
//! pad stays `Maybe` until position, pressure, size, dwell, or speed
//! evidence settles it; once settled it never flips back.

use crate::config::ms2us;
use crate::config::ScrollMethod;
use crate::device::{DeviceInfo, Quirks};
use crate::engine::TouchpadEngine;
use crate::touch::{Point, TouchState};

/// Dwell below the lower line before a resting contact becomes a thumb.
const THUMB_MOVE_TIMEOUT: u64 = ms2us(300);
/// A contact that travels this far is a moving finger, not a thumb.
const THUMB_MOVE_THRESHOLD_MM: f64 = 7.0;
/// Pads shorter than this have no room for a resting thumb.
const THUMB_MIN_HEIGHT_MM: f64 = 50.0;
const UPPER_LINE_FRACTION: f64 = 0.85;
const LOWER_LINE_FRACTION: f64 = 0.92;
/// Two fingers closer than this box are a scroll pair even when one of
/// them is moving fast.
const SPEED_THUMB_BOX_MM: (f64, f64) = (25.0, 15.0);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ThumbState {
    No,
    Yes,
    #[default]
    Maybe,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct Thumb {
    pub state: ThumbState,
    /// Coordinate at touch begin; rule B measures travel from here.
    pub initial: Point,
    pub first_touch_time: u64,
}

impl Thumb {
    pub(crate) fn new() -> Self {
        Self {
            state: ThumbState::Maybe,
            initial: Point::default(),
            first_touch_time: 0,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct ThumbConfig {
    pub detect: bool,
    pub upper_line: i32,
    pub lower_line: i32,
    pub pressure_threshold: Option<i32>,
    pub size_threshold: Option<i32>,
}

impl ThumbConfig {
    pub(crate) fn new(device: &DeviceInfo, quirks: &Quirks, detect_thumbs: bool) -> Self {
        let detect =
            detect_thumbs && device.clickpad && device.height_mm() >= THUMB_MIN_HEIGHT_MM;
        Self {
            detect,
            upper_line: device.y.minimum + (device.y.span() as f64 * UPPER_LINE_FRACTION) as i32,
            lower_line: device.y.minimum + (device.y.span() as f64 * LOWER_LINE_FRACTION) as i32,
            pressure_threshold: quirks.thumb_pressure_threshold,
            size_threshold: if device.has_touch_size {
                quirks.thumb_size_threshold
            } else {
                None
            },
        }
    }
}

impl TouchpadEngine {
    pub(crate) fn thumb_update(&mut self, i: usize, time: u64) {
        if !self.thumb_cfg.detect {
            return;
        }
        // Once a thumb always a thumb; once ruled out stays ruled out.
        if self.touches[i].thumb.state != ThumbState::Maybe {
            return;
        }

        let upper_line = self.thumb_cfg.upper_line;
        let t = &self.touches[i];

        if t.point.y < upper_line {
            self.settle_thumb(i, ThumbState::No, "above thumb zone");
            return;
        }

        if t.state == TouchState::Update {
            let (dx_mm, dy_mm) = self.device.delta_mm(
                t.point.x - t.thumb.initial.x,
                t.point.y - t.thumb.initial.y,
            );
            if dx_mm.hypot(dy_mm) > THUMB_MOVE_THRESHOLD_MM {
                self.settle_thumb(i, ThumbState::No, "moved out");
                return;
            }
        }

        // A second finger in the same band means neither is a thumb.
        if self.nfingers_down > 1 {
            let other = self.touches.iter().enumerate().find_map(|(j, other)| {
                (j != i && other.is_down() && other.point.y > upper_line).then_some(j)
            });
            if let Some(j) = other {
                self.settle_thumb(i, ThumbState::No, "paired in thumb zone");
                if self.touches[j].thumb.state == ThumbState::Maybe {
                    self.settle_thumb(j, ThumbState::No, "paired in thumb zone");
                }
                return;
            }
        }

        let t = &self.touches[i];
        if let Some(threshold) = self.thumb_cfg.pressure_threshold {
            if t.pressure > threshold {
                self.settle_thumb(i, ThumbState::Yes, "pressure");
                return;
            }
        }
        if let Some(threshold) = self.thumb_cfg.size_threshold {
            if t.major > threshold && (t.minor as f64) < threshold as f64 * 0.6 {
                self.settle_thumb(i, ThumbState::Yes, "elongated contact");
                return;
            }
        }
        if t.point.y > self.thumb_cfg.lower_line
            && self.scroll_method != ScrollMethod::Edge
            && t.thumb.first_touch_time + THUMB_MOVE_TIMEOUT < time
        {
            self.settle_thumb(i, ThumbState::Yes, "resting low");
        }
    }

    /// One finger has been moving fast and a second one just landed: the
    /// newcomer is a thumb unless the pair sits close enough to be a
    /// two-finger scroll.
    pub(crate) fn detect_thumb_while_moving(&mut self) {
        let mut moving = None;
        let mut newcomer = None;
        for (i, t) in self.touches.iter().enumerate() {
            if matches!(t.state, TouchState::None | TouchState::Hovering) {
                continue;
            }
            if t.state == TouchState::Begin {
                newcomer = Some(i);
            } else {
                moving = Some(i);
            }
            if moving.is_some() && newcomer.is_some() {
                break;
            }
        }
        // Fewer than two qualifying touches can happen when one of the two
        // contacts is mid-transition; nothing to classify then.
        let (Some(moving), Some(newcomer)) = (moving, newcomer) else {
            return;
        };

        if self.scroll_method == ScrollMethod::TwoFinger {
            let a = self.touches[moving].point;
            let b = self.touches[newcomer].point;
            let (dx_mm, dy_mm) = self.device.delta_mm(a.x - b.x, a.y - b.y);
            if dx_mm.abs() <= SPEED_THUMB_BOX_MM.0 && dy_mm.abs() <= SPEED_THUMB_BOX_MM.1 {
                return;
            }
        }

        if self.touches[newcomer].thumb.state == ThumbState::Maybe {
            self.settle_thumb(newcomer, ThumbState::Yes, "landed beside fast finger");
        }
    }

    fn settle_thumb(&mut self, i: usize, state: ThumbState, why: &'static str) {
        tracing::debug!(slot = i, ?state, why, "thumb settled");
        self.touches[i].thumb.state = state;
    }
}
