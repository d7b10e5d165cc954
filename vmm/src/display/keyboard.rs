// Copyright 2024 Cloud Hypervisor Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Medium-raw console keyboard
//!
//! In `K_MEDIUMRAW` mode the console delivers one byte per key event: the
//! high bit flags a release and the low seven bits carry the Linux key code.
//! Codes that do not fit in seven bits are sent as a zero code byte followed
//! by two bytes holding seven bits each, high part first.
//!
//! [`Keyboard`] decodes that stream, tracks which keys are down and turns
//! each event into a [`KeyAction`], intercepting the local Ctrl+Alt hotkeys.

use std::ops::ControlFlow;

use log::debug;

use super::keymap::{
    KEY_1, KEY_9, KEY_CNT, KEY_ESC, KEY_F1, KEY_F10, KEY_LEFTALT, KEY_LEFTCTRL, KEY_LEFTSHIFT,
    KEY_MAX, KEY_RIGHTALT, KEY_RIGHTCTRL, KEY_RIGHTSHIFT, KEY_S, key_name,
};

const RELEASE_BIT: u8 = 0x80;
const CODE_MASK: u8 = 0x7f;

/// A decoded key event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawKey {
    pub code: u16,
    pub down: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Pending {
    /// Zero code byte seen, waiting for the high seven bits.
    High { down: bool },
    /// High bits seen, waiting for the low seven bits.
    Low { down: bool, high: u16 },
}

/// Medium-raw byte stream decoder.
///
/// A multi-byte code split across two reads is completed on the next call.
#[derive(Debug, Default)]
pub struct RawDecoder {
    pending: Option<Pending>,
}

impl RawDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `buf`, handing each key event to `f` until it breaks.
    pub fn decode<B>(
        &mut self,
        buf: &[u8],
        mut f: impl FnMut(RawKey) -> ControlFlow<B>,
    ) -> ControlFlow<B> {
        for &byte in buf {
            let key = match self.pending.take() {
                None => {
                    let down = byte & RELEASE_BIT == 0;
                    let code = u16::from(byte & CODE_MASK);
                    if code == 0 {
                        self.pending = Some(Pending::High { down });
                        continue;
                    }
                    RawKey { code, down }
                }
                Some(Pending::High { down }) => {
                    let high = u16::from(byte & CODE_MASK) << 7;
                    self.pending = Some(Pending::Low { down, high });
                    continue;
                }
                Some(Pending::Low { down, high }) => RawKey {
                    code: high | u16::from(byte & CODE_MASK),
                    down,
                },
            };
            if key.code > KEY_MAX {
                continue;
            }
            f(key)?;
        }
        ControlFlow::Continue(())
    }

    /// Whether a multi-byte code is incomplete.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

/// Pressed keys, one bit per Linux key code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyState {
    bits: [u64; KEY_CNT / 64],
}

impl Default for KeyState {
    fn default() -> Self {
        Self {
            bits: [0; KEY_CNT / 64],
        }
    }
}

impl KeyState {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(code: u16) -> Option<(usize, u64)> {
        let code = code as usize;
        (code < KEY_CNT).then(|| (code / 64, 1u64 << (code % 64)))
    }

    pub fn is_down(&self, code: u16) -> bool {
        Self::slot(code).is_some_and(|(word, bit)| self.bits[word] & bit != 0)
    }

    pub fn press(&mut self, code: u16) {
        if let Some((word, bit)) = Self::slot(code) {
            self.bits[word] |= bit;
        }
    }

    /// Mark `code` released; false if it was not down.
    pub fn release(&mut self, code: u16) -> bool {
        match Self::slot(code) {
            Some((word, bit)) if self.bits[word] & bit != 0 => {
                self.bits[word] &= !bit;
                true
            }
            _ => false,
        }
    }

    pub fn pressed(&self) -> impl Iterator<Item = u16> + '_ {
        (0..KEY_CNT as u16).filter(|&code| self.is_down(code))
    }

    pub fn any_down(&self) -> bool {
        self.bits.iter().any(|&word| word != 0)
    }

    /// Release every key, calling `f` for each one that was down.
    pub fn release_all(&mut self, mut f: impl FnMut(u16)) {
        for code in 0..KEY_CNT as u16 {
            if self.release(code) {
                f(code);
            }
        }
    }

    pub fn modifiers(&self) -> Modifiers {
        Modifiers {
            ctrl: self.is_down(KEY_LEFTCTRL) || self.is_down(KEY_RIGHTCTRL),
            alt: self.is_down(KEY_LEFTALT) || self.is_down(KEY_RIGHTALT),
            shift: self.is_down(KEY_LEFTSHIFT) || self.is_down(KEY_RIGHTSHIFT),
        }
    }
}

/// Modifier keys held, either side.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
}

/// What a key event asks the display to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyAction {
    /// Pass the key on to the guest.
    Forward { code: u16, down: bool, shift: bool },
    /// Ctrl+Alt+Esc: restore the console and terminate.
    EmergencyEscape,
    /// Ctrl+Alt+S
    ToggleScale,
    /// Ctrl+Alt+F1..F10: activate host VT 1..10.
    SwitchVt(i32),
    /// Ctrl+Alt+1..9: select guest console 0..8.
    SelectConsole(usize),
}

/// Console keyboard state.
#[derive(Debug, Default)]
pub struct Keyboard {
    decoder: RawDecoder,
    keys: KeyState,
}

impl Keyboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> &KeyState {
        &self.keys
    }

    pub fn keys_mut(&mut self) -> &mut KeyState {
        &mut self.keys
    }

    /// Process console bytes, handing each resulting action to `f`.
    ///
    /// `f` gets the key table as well, since some actions release keys.
    pub fn feed<B>(
        &mut self,
        buf: &[u8],
        mut f: impl FnMut(&mut KeyState, KeyAction) -> ControlFlow<B>,
    ) -> ControlFlow<B> {
        let keys = &mut self.keys;
        self.decoder.decode(buf, |key| match Self::track(keys, key) {
            Some(action) => f(keys, action),
            None => ControlFlow::Continue(()),
        })
    }

    fn track(keys: &mut KeyState, key: RawKey) -> Option<KeyAction> {
        let RawKey { code, down } = key;
        if down {
            keys.press(code);
        } else if !keys.release(code) {
            return None;
        }
        debug!("Key {} {}", key_name(code), if down { "down" } else { "up" });

        let mods = keys.modifiers();
        if mods.ctrl && mods.alt && down {
            match code {
                KEY_ESC => return Some(KeyAction::EmergencyEscape),
                KEY_S => return Some(KeyAction::ToggleScale),
                KEY_F1..=KEY_F10 => {
                    keys.release(code);
                    return Some(KeyAction::SwitchVt(i32::from(code - KEY_F1) + 1));
                }
                KEY_1..=KEY_9 => return Some(KeyAction::SelectConsole(usize::from(code - KEY_1))),
                _ => {}
            }
        }

        Some(KeyAction::Forward {
            code,
            down,
            shift: mods.shift,
        })
    }
}
