//! Disable-while-typing.
//!
//! A paired keyboard's key-down events suspend tapping and cancel scroll
//! and gestures until typing stops. Modifier keys only arm a mask so that
//! ctrl-click and friends keep working; function keys and beyond never
//! count as typing.

use heapless::Vec;
use statig::{blocking::IntoStateMachineExt as _, prelude::*};

use crate::config::ms2us;

/// First non-modifier key press quiets the pad for this long.
const DWT_INITIAL_TIMEOUT: u64 = ms2us(200);
/// Every further press, and every timeout with keys still held, extends by
/// this much.
const DWT_CONTINUED_TIMEOUT: u64 = ms2us(500);

pub const MAX_PAIRED_KEYBOARDS: usize = 3;

const KEY_TAB: u32 = 15;
const KEY_LEFTCTRL: u32 = 29;
const KEY_LEFTSHIFT: u32 = 42;
const KEY_RIGHTSHIFT: u32 = 54;
const KEY_LEFTALT: u32 = 56;
const KEY_CAPSLOCK: u32 = 58;
const KEY_F1: u32 = 59;
const KEY_RIGHTCTRL: u32 = 97;
const KEY_RIGHTALT: u32 = 100;
const KEY_LEFTMETA: u32 = 125;
const KEY_RIGHTMETA: u32 = 126;
const KEY_COMPOSE: u32 = 127;
const KEY_FN: u32 = 464;

const KEY_MASK_WORDS: usize = 8;
type KeyMask = [u64; KEY_MASK_WORDS];

fn mask_set(mask: &mut KeyMask, key: u32) {
    let key = key as usize;
    if key < KEY_MASK_WORDS * 64 {
        mask[key / 64] |= 1 << (key % 64);
    }
}

fn mask_clear(mask: &mut KeyMask, key: u32) {
    let key = key as usize;
    if key < KEY_MASK_WORDS * 64 {
        mask[key / 64] &= !(1 << (key % 64));
    }
}

fn mask_any(mask: &KeyMask) -> bool {
    mask.iter().any(|word| *word != 0)
}

fn is_modifier(key: u32) -> bool {
    matches!(
        key,
        KEY_LEFTCTRL
            | KEY_RIGHTCTRL
            | KEY_LEFTALT
            | KEY_RIGHTALT
            | KEY_LEFTSHIFT
            | KEY_RIGHTSHIFT
            | KEY_LEFTMETA
            | KEY_RIGHTMETA
            | KEY_FN
            | KEY_CAPSLOCK
            | KEY_TAB
            | KEY_COMPOSE
    )
}

/// Keys that never drive typing detection. Modifiers are handled before
/// this check, so the high-keycode modifiers stay effective.
fn ignored_for_dwt(key: u32) -> bool {
    key >= KEY_F1
}

/// Identity of a keyboard offering itself for pairing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyboardInfo {
    pub id: u32,
    pub vendor: u16,
    pub product: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DwtAction {
    /// Typing began: suspend tap, stop edge scroll, cancel gestures.
    StopActions,
    ResumeTap,
    SetTimer(u64),
    CancelTimer,
}

pub(crate) type DwtActions = Vec<DwtAction, 4>;

#[derive(Clone, Copy, Debug)]
enum DwtHsmEvent {
    KeyDown { key: u32, time: u64 },
    KeyUp { key: u32 },
    Timeout { now: u64 },
}

#[derive(Default)]
struct DispatchContext {
    actions: DwtActions,
}

pub(crate) struct Dwt {
    machine: statig::blocking::StateMachine<DwtHsm>,
    paired: Vec<KeyboardInfo, MAX_PAIRED_KEYBOARDS>,
}

impl Dwt {
    pub(crate) fn new() -> Self {
        Self {
            machine: DwtHsm::new().state_machine(),
            paired: Vec::new(),
        }
    }

    /// A keyboard pairs with an internal touchpad unconditionally; an
    /// external touchpad only accepts its own vendor/product sibling.
    pub(crate) fn pair_keyboard(
        &mut self,
        keyboard: KeyboardInfo,
        pad_internal: bool,
        pad_vendor: u16,
        pad_product: u16,
    ) -> bool {
        if !pad_internal && (keyboard.vendor != pad_vendor || keyboard.product != pad_product) {
            return false;
        }
        if self.paired.iter().any(|k| k.id == keyboard.id) {
            return true;
        }
        if self.paired.push(keyboard).is_err() {
            tracing::debug!(id = keyboard.id, "keyboard pairing slots exhausted");
            return false;
        }
        true
    }

    pub(crate) fn unpair_keyboard(&mut self, id: u32) {
        self.paired.retain(|k| k.id != id);
    }

    pub(crate) fn is_paired(&self, id: u32) -> bool {
        self.paired.iter().any(|k| k.id == id)
    }

    pub(crate) fn handle_key(&mut self, key: u32, pressed: bool, time: u64) -> DwtActions {
        let event = if pressed {
            DwtHsmEvent::KeyDown { key, time }
        } else {
            DwtHsmEvent::KeyUp { key }
        };
        self.dispatch(&event)
    }

    pub(crate) fn handle_timeout(&mut self, now: u64) -> DwtActions {
        self.dispatch(&DwtHsmEvent::Timeout { now })
    }

    /// Drop all typing state, e.g. when dwt gets switched off mid-word.
    pub(crate) fn reset(&mut self) -> DwtActions {
        let mut actions = DwtActions::new();
        if self.keyboard_active() {
            let _ = actions.push(DwtAction::ResumeTap);
            let _ = actions.push(DwtAction::CancelTimer);
        }
        self.machine = DwtHsm::new().state_machine();
        actions
    }

    pub(crate) fn keyboard_active(&self) -> bool {
        self.machine.inner().keyboard_active
    }

    pub(crate) fn last_press_time(&self) -> u64 {
        self.machine.inner().last_press_time
    }

    fn dispatch(&mut self, event: &DwtHsmEvent) -> DwtActions {
        let mut context = DispatchContext::default();
        self.machine.handle_with_context(event, &mut context);
        context.actions
    }
}

struct DwtHsm {
    key_mask: KeyMask,
    mod_mask: KeyMask,
    last_press_time: u64,
    keyboard_active: bool,
}

impl DwtHsm {
    fn new() -> Self {
        Self {
            key_mask: [0; KEY_MASK_WORDS],
            mod_mask: [0; KEY_MASK_WORDS],
            last_press_time: 0,
            keyboard_active: false,
        }
    }
}

#[state_machine(initial = "State::idle()")]
impl DwtHsm {
    #[state(superstate = "monitoring")]
    fn idle(&mut self, context: &mut DispatchContext, event: &DwtHsmEvent) -> Outcome<State> {
        match event {
            DwtHsmEvent::KeyDown { key, time } => {
                if is_modifier(*key) {
                    mask_set(&mut self.mod_mask, *key);
                    return Handled;
                }
                if ignored_for_dwt(*key) {
                    return Handled;
                }
                // A held modifier means shortcut, not typing.
                if mask_any(&self.mod_mask) {
                    return Handled;
                }
                mask_set(&mut self.key_mask, *key);
                self.last_press_time = *time;
                self.keyboard_active = true;
                let _ = context.actions.push(DwtAction::StopActions);
                let _ = context
                    .actions
                    .push(DwtAction::SetTimer(*time + DWT_INITIAL_TIMEOUT));
                Transition(State::typing())
            }
            DwtHsmEvent::Timeout { .. } => Handled,
            DwtHsmEvent::KeyUp { .. } => Super,
        }
    }

    #[state(superstate = "monitoring")]
    fn typing(&mut self, context: &mut DispatchContext, event: &DwtHsmEvent) -> Outcome<State> {
        match event {
            DwtHsmEvent::KeyDown { key, time } => {
                if is_modifier(*key) {
                    mask_set(&mut self.mod_mask, *key);
                    return Handled;
                }
                if ignored_for_dwt(*key) {
                    return Handled;
                }
                mask_set(&mut self.key_mask, *key);
                self.last_press_time = *time;
                let _ = context
                    .actions
                    .push(DwtAction::SetTimer(*time + DWT_CONTINUED_TIMEOUT));
                Handled
            }
            DwtHsmEvent::Timeout { now } => {
                if mask_any(&self.key_mask) {
                    // Keys still held: typing has not ended.
                    let _ = context
                        .actions
                        .push(DwtAction::SetTimer(*now + DWT_CONTINUED_TIMEOUT));
                    return Handled;
                }
                self.keyboard_active = false;
                let _ = context.actions.push(DwtAction::ResumeTap);
                Transition(State::idle())
            }
            DwtHsmEvent::KeyUp { .. } => Super,
        }
    }

    #[superstate]
    fn monitoring(&mut self, context: &mut DispatchContext, event: &DwtHsmEvent) -> Outcome<State> {
        let _ = context;
        match event {
            DwtHsmEvent::KeyUp { key } => {
                mask_clear(&mut self.key_mask, *key);
                mask_clear(&mut self.mod_mask, *key);
                Handled
            }
            _ => Handled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_A: u32 = 30;
    const KEY_S: u32 = 31;

    #[test]
    fn first_key_starts_typing_with_short_timeout() {
        let mut dwt = Dwt::new();
        let actions = dwt.handle_key(KEY_A, true, 1_000_000);
        assert_eq!(
            actions.as_slice(),
            [
                DwtAction::StopActions,
                DwtAction::SetTimer(1_000_000 + ms2us(200)),
            ]
        );
        assert!(dwt.keyboard_active());
        assert_eq!(dwt.last_press_time(), 1_000_000);
    }

    #[test]
    fn modifier_held_blocks_typing_detection() {
        let mut dwt = Dwt::new();
        assert!(dwt.handle_key(KEY_LEFTCTRL, true, 0).is_empty());
        // ctrl+a: a shortcut, the pointer stays live.
        assert!(dwt.handle_key(KEY_A, true, ms2us(10)).is_empty());
        assert!(!dwt.keyboard_active());

        // Modifier released: the next press is real typing.
        assert!(dwt.handle_key(KEY_LEFTCTRL, false, ms2us(20)).is_empty());
        assert!(dwt.handle_key(KEY_A, false, ms2us(21)).is_empty());
        let actions = dwt.handle_key(KEY_A, true, ms2us(30));
        assert!(!actions.is_empty());
        assert!(dwt.keyboard_active());
    }

    #[test]
    fn function_keys_are_ignored_entirely() {
        let mut dwt = Dwt::new();
        assert!(dwt.handle_key(KEY_F1, true, 0).is_empty());
        assert!(dwt.handle_key(KEY_F1 + 10, true, 0).is_empty());
        assert!(!dwt.keyboard_active());
    }

    #[test]
    fn release_then_timeout_ends_typing() {
        let mut dwt = Dwt::new();
        dwt.handle_key(KEY_A, true, 0);
        dwt.handle_key(KEY_A, false, ms2us(50));

        let actions = dwt.handle_timeout(ms2us(200));
        assert_eq!(actions.as_slice(), [DwtAction::ResumeTap]);
        assert!(!dwt.keyboard_active());
    }

    #[test]
    fn held_key_extends_timeout() {
        let mut dwt = Dwt::new();
        dwt.handle_key(KEY_A, true, 0);

        let actions = dwt.handle_timeout(ms2us(200));
        assert_eq!(
            actions.as_slice(),
            [DwtAction::SetTimer(ms2us(200) + ms2us(500))]
        );
        assert!(dwt.keyboard_active());

        dwt.handle_key(KEY_A, false, ms2us(300));
        let actions = dwt.handle_timeout(ms2us(700));
        assert_eq!(actions.as_slice(), [DwtAction::ResumeTap]);
    }

    #[test]
    fn continued_typing_refreshes_with_long_timeout() {
        let mut dwt = Dwt::new();
        dwt.handle_key(KEY_A, true, 0);
        dwt.handle_key(KEY_A, false, ms2us(40));
        let actions = dwt.handle_key(KEY_S, true, ms2us(90));
        assert_eq!(
            actions.as_slice(),
            [DwtAction::SetTimer(ms2us(90) + ms2us(500))]
        );
    }

    #[test]
    fn internal_pad_pairs_any_keyboard_up_to_capacity() {
        let mut dwt = Dwt::new();
        for id in 0..3 {
            assert!(dwt.pair_keyboard(
                KeyboardInfo {
                    id,
                    vendor: 0x1111 + id as u16,
                    product: 0x2222,
                },
                true,
                0x9999,
                0x8888,
            ));
        }
        assert!(!dwt.pair_keyboard(
            KeyboardInfo {
                id: 9,
                vendor: 1,
                product: 1
            },
            true,
            0x9999,
            0x8888,
        ));
        assert!(dwt.is_paired(2));
        assert!(!dwt.is_paired(9));
    }

    #[test]
    fn external_pad_requires_matching_identity() {
        let mut dwt = Dwt::new();
        let keyboard = KeyboardInfo {
            id: 1,
            vendor: 0x46d,
            product: 0xc52b,
        };
        assert!(!dwt.pair_keyboard(keyboard, false, 0x46d, 0xbeef));
        assert!(dwt.pair_keyboard(keyboard, false, 0x46d, 0xc52b));
    }

    #[test]
    fn unpair_detaches_without_teardown() {
        let mut dwt = Dwt::new();
        dwt.pair_keyboard(
            KeyboardInfo {
                id: 4,
                vendor: 1,
                product: 2,
            },
            true,
            0,
            0,
        );
        dwt.unpair_keyboard(4);
        assert!(!dwt.is_paired(4));
        // Idempotent, like every detach path.
        dwt.unpair_keyboard(4);
    }

    #[test]
    fn reset_mid_typing_resumes_tap() {
        let mut dwt = Dwt::new();
        dwt.handle_key(KEY_A, true, 0);
        let actions = dwt.reset();
        assert_eq!(
            actions.as_slice(),
            [DwtAction::ResumeTap, DwtAction::CancelTimer]
        );
        assert!(!dwt.keyboard_active());
    }
}
