//! Palm classification: an ordered chain of predicates evaluated per dirty
//! touch. First match wins, with the pressure latch re-checked last since
//! it overrides every release performed by the rules in between.

use crate::config::ms2us;
use crate::device::{DeviceInfo, Quirks};
use crate::engine::TouchpadEngine;
use crate::touch::{Point, TouchState};

/// A side/top palm that leaves its zone within this window moving in a
/// plausible direction was a finger after all.
const PALM_EDGE_TIMEOUT: u64 = ms2us(200);
/// Side exclusion band: 8% of the width, never wider than this.
const PALM_EDGE_MAX_WIDTH_MM: f64 = 8.0;
const PALM_EDGE_WIDTH_FRACTION: f64 = 0.08;
/// Top band: 5% of the height, only on tall pads without top buttons.
const PALM_TOP_FRACTION: f64 = 0.05;
const PALM_TOP_MIN_HEIGHT_MM: f64 = 55.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PalmState {
    #[default]
    None,
    Edge,
    Typing,
    Trackpoint,
    ToolPalm,
    Pressure,
    TouchSize,
    Arbitration,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct Palm {
    pub state: PalmState,
    /// Coordinate at classification time.
    pub first: Point,
    /// Touch-down time; release rules compare it against keyboard and
    /// trackpoint activity.
    pub time: u64,
}

impl Palm {
    pub(crate) fn new() -> Self {
        Self {
            state: PalmState::None,
            first: Point::default(),
            time: 0,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct PalmConfig {
    pub pressure_threshold: Option<i32>,
    pub size_threshold: Option<i32>,
    pub left_edge: i32,
    pub right_edge: i32,
    pub top_edge: Option<i32>,
    pub use_tool: bool,
    pub monitor_trackpoint: bool,
}

impl PalmConfig {
    pub(crate) fn new(device: &DeviceInfo, quirks: &Quirks) -> Self {
        let band_units = (device.x.span() as f64 * PALM_EDGE_WIDTH_FRACTION)
            .min(device.x.mm_to_units(PALM_EDGE_MAX_WIDTH_MM)) as i32;
        let top_edge = if !device.has_top_software_buttons
            && device.height_mm() > PALM_TOP_MIN_HEIGHT_MM
        {
            Some(device.y.minimum + (device.y.span() as f64 * PALM_TOP_FRACTION) as i32)
        } else {
            None
        };

        Self {
            pressure_threshold: quirks.palm_pressure_threshold,
            size_threshold: if device.has_touch_size {
                quirks.palm_size_threshold
            } else {
                None
            },
            left_edge: device.x.minimum + band_units,
            right_edge: device.x.maximum - band_units,
            top_edge,
            use_tool: device.has_tool_type,
            monitor_trackpoint: true,
        }
    }

    fn in_side_edge(&self, point: Point) -> bool {
        point.x < self.left_edge || point.x > self.right_edge
    }

    fn in_top_edge(&self, point: Point) -> bool {
        self.top_edge.is_some_and(|edge| point.y < edge)
    }

    fn in_edge(&self, point: Point) -> bool {
        self.in_side_edge(point) || self.in_top_edge(point)
    }
}

impl TouchpadEngine {
    pub(crate) fn palm_detect(&mut self, i: usize, time: u64) {
        if self.palm_detect_pressure(i, time) {
            return;
        }
        if self.palm_detect_arbitration(i) {
            return;
        }
        if self.palm_detect_dwt(i) {
            return;
        }
        if self.palm_detect_trackpoint(i) {
            return;
        }
        if self.palm_detect_tool(i) {
            return;
        }
        if self.palm_detect_touch_size(i, time) {
            return;
        }
        if self.palm_detect_edge(i, time) {
            return;
        }
        // The pressure latch outranks any release the rules above made.
        let _ = self.palm_detect_pressure(i, time);
    }

    fn palm_detect_pressure(&mut self, i: usize, _time: u64) -> bool {
        let Some(threshold) = self.palm_cfg.pressure_threshold else {
            return false;
        };
        let t = &mut self.touches[i];
        if t.palm.state == PalmState::Pressure {
            return true;
        }
        if t.pressure > threshold {
            tracing::debug!(slot = i, pressure = t.pressure, "palm: pressure");
            t.palm.state = PalmState::Pressure;
            t.palm.first = t.point;
            return true;
        }
        false
    }

    fn palm_detect_arbitration(&mut self, i: usize) -> bool {
        let t = &mut self.touches[i];
        if self.arbitration_active {
            if t.palm.state != PalmState::Arbitration {
                tracing::debug!(slot = i, "palm: arbitration");
            }
            t.palm.state = PalmState::Arbitration;
            t.palm.first = t.point;
            return true;
        }
        if t.palm.state == PalmState::Arbitration {
            t.palm.state = PalmState::None;
        }
        false
    }

    fn palm_detect_dwt(&mut self, i: usize) -> bool {
        if !self.config.dwt {
            return false;
        }
        let keyboard_active = self.dwt.keyboard_active();
        let last_press = self.dwt.last_press_time();
        let t = &mut self.touches[i];
        if keyboard_active && t.state == TouchState::Begin {
            tracing::debug!(slot = i, "palm: typing");
            t.palm.state = PalmState::Typing;
            t.palm.first = t.point;
            return true;
        }
        if !keyboard_active && t.state == TouchState::Update && t.palm.state == PalmState::Typing {
            // A palm resting since before the typing burst stays a palm
            // until the contact ends; only touches newer than the last
            // press are released.
            if t.palm.time == 0 || t.palm.time > last_press {
                tracing::debug!(slot = i, "palm: typing released");
                t.palm.state = PalmState::None;
            }
        }
        false
    }

    fn palm_detect_trackpoint(&mut self, i: usize) -> bool {
        if !self.palm_cfg.monitor_trackpoint {
            return false;
        }
        let trackpoint_active = self.trackpoint_active;
        let last_event = self.trackpoint_last_time;
        let t = &mut self.touches[i];
        if t.palm.state == PalmState::None && t.state == TouchState::Begin && trackpoint_active {
            tracing::debug!(slot = i, "palm: trackpoint");
            t.palm.state = PalmState::Trackpoint;
            t.palm.first = t.point;
            return true;
        }
        if t.palm.state == PalmState::Trackpoint
            && t.state == TouchState::Update
            && !trackpoint_active
        {
            if t.palm.time == 0 || t.palm.time > last_event {
                tracing::debug!(slot = i, "palm: trackpoint released");
                t.palm.state = PalmState::None;
            }
        }
        false
    }

    fn palm_detect_tool(&mut self, i: usize) -> bool {
        if !self.palm_cfg.use_tool {
            return false;
        }
        let t = &mut self.touches[i];
        if t.is_tool_palm {
            if t.palm.state != PalmState::ToolPalm {
                tracing::debug!(slot = i, "palm: tool type");
                t.palm.first = t.point;
            }
            t.palm.state = PalmState::ToolPalm;
            return true;
        }
        if t.palm.state == PalmState::ToolPalm {
            t.palm.state = PalmState::None;
        }
        false
    }

    fn palm_detect_touch_size(&mut self, i: usize, _time: u64) -> bool {
        let Some(threshold) = self.palm_cfg.size_threshold else {
            return false;
        };
        let t = &mut self.touches[i];
        if t.palm.state == PalmState::TouchSize {
            return true;
        }
        if t.major > threshold || t.minor > threshold {
            tracing::debug!(slot = i, major = t.major, minor = t.minor, "palm: touch size");
            t.palm.state = PalmState::TouchSize;
            t.palm.first = t.point;
            return true;
        }
        false
    }

    fn palm_detect_edge(&mut self, i: usize, time: u64) -> bool {
        if self.touches[i].palm.state == PalmState::Edge {
            if self.palm_multifinger_present(i) {
                tracing::debug!(slot = i, "palm: edge released, second finger present");
                self.touches[i].palm.state = PalmState::None;
                return false;
            }
            let t = &self.touches[i];
            if time < t.palm.time + PALM_EDGE_TIMEOUT && !self.palm_cfg.in_edge(t.point) {
                let dx = t.point.x - t.palm.first.x;
                let dy = t.point.y - t.palm.first.y;
                let released = if self.palm_cfg.in_side_edge(t.palm.first) {
                    // A real finger swipes out of the band roughly
                    // horizontally; a palm drifts along it.
                    dy.abs() <= dx.abs()
                } else {
                    dy > 0 && dx.abs() <= dy
                };
                if released {
                    tracing::debug!(slot = i, "palm: edge released, direction");
                    self.touches[i].palm.state = PalmState::None;
                }
            }
            return self.touches[i].palm.state == PalmState::Edge;
        }

        // Two live fingers means scrolling or a gesture, not a palm brush.
        if self.palm_multifinger_present(i) {
            return false;
        }

        let t = &self.touches[i];
        if t.state != TouchState::Begin {
            return false;
        }
        if !self.palm_cfg.in_edge(t.point) {
            return false;
        }
        if self.buttons.is_inside_softbutton_area(t.point) {
            return false;
        }
        // The right band of a clickpad doubles as the button column.
        if self.device.clickpad && t.point.x > self.palm_cfg.right_edge {
            return false;
        }
        tracing::debug!(slot = i, "palm: edge");
        let t = &mut self.touches[i];
        t.palm.state = PalmState::Edge;
        t.palm.first = t.point;
        true
    }

    fn palm_multifinger_present(&self, i: usize) -> bool {
        if self.nfingers_down < 2 {
            return false;
        }
        let point = self.touches[i].point;
        self.touches.iter().enumerate().any(|(j, other)| {
            j != i
                && other.is_down()
                && !other.is_palm()
                && (other.point.x != point.x || other.point.y != point.y)
        })
    }
}
