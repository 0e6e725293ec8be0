//! Runtime configuration knobs, applied per device.

/// Overall event gating for a device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SendEventsMode {
    #[default]
    Enabled,
    Disabled,
    DisabledOnExternalMouse,
}

/// Which scroll recognizer gets the touches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScrollMethod {
    TwoFinger,
    Edge,
}

/// Per-device runtime options. Everything here may change at runtime through
/// the engine setters; construction-time values are the initial state.
#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    pub send_events: SendEventsMode,
    /// `None` selects two-finger scrolling when the device can track two
    /// touches and edge scrolling otherwise.
    pub scroll_method: Option<ScrollMethod>,
    pub dwt: bool,
    pub left_handed: bool,
    pub detect_thumbs: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            send_events: SendEventsMode::Enabled,
            scroll_method: None,
            dwt: true,
            left_handed: false,
            detect_thumbs: true,
        }
    }
}

pub(crate) const fn ms2us(ms: u64) -> u64 {
    ms * 1_000
}
