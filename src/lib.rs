//! Deterministic multi-touch touchpad input processing.
//!
//! Feed the engine the decoded kernel event stream of one touchpad
//! (absolute axes, touch/tool keys, `MSC_TIMESTAMP`, frame markers) and it
//! produces pointer motion, scroll, and button events, running per-touch
//! lifecycle tracking, hover resolution, palm and thumb classification,
//! jitter hysteresis, jump rejection, disable-while-typing, and
//! suspend/resume arbitration on the way. Tap, button, edge-scroll, and
//! gesture recognizers plug in through the [`hooks`] traits; defaults for
//! pointer motion and two-finger scrolling are built in.
//!
//! Everything is synchronous and single-threaded: one call at a time, one
//! frame pipeline run per `SYN_REPORT`, timers dispatched by the embedding
//! event loop between frames.

pub mod config;
pub mod device;
mod dwt;
mod engine;
pub mod events;
pub mod filter;
pub mod gestures;
pub mod hooks;
mod hover;
mod motion;
mod msc_timestamp;
mod palm;
mod thumb;
mod timers;
mod touch;

pub use config::{EngineConfig, ScrollMethod, SendEventsMode};
pub use device::{AxisRange, DeviceInfo, Quirks, MAX_TOUCHES};
pub use dwt::{KeyboardInfo, MAX_PAIRED_KEYBOARDS};
pub use engine::{SuspendReason, TouchpadEngine};
pub use events::{
    AbsAxis, Event, EventKind, FingerTool, FrameOutput, OutputEvent, PhysButton, ScrollAxis,
};
pub use palm::PalmState;
pub use thumb::ThumbState;
pub use touch::{Point, TouchState, HISTORY_LENGTH};
