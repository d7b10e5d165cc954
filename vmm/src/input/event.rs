// Copyright 2024 Cloud Hypervisor Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Input Event Types
//!
//! Events the display backend hands to the guest input layer:
//!
//! - Keyboard events as PC/AT set 1 scancodes (graphic consoles)
//! - Keysyms (text consoles)
//! - Pointer buttons, relative and absolute motion, and sync markers

use serde::{Deserialize, Serialize};

// ============================================================================
// Keyboard Events
// ============================================================================

/// Prefix byte announcing an extended scancode.
pub const SCANCODE_EXTENDED: u8 = 0xE0;

/// Standard key codes (PC scancodes Set 1)
///
/// Extended keys carry [`SCANCODE_EXTENDED`] in the high byte.
pub mod keys {
    // Function keys
    pub const ESCAPE: u16 = 0x01;
    pub const F1: u16 = 0x3B;
    pub const F2: u16 = 0x3C;
    pub const F3: u16 = 0x3D;
    pub const F4: u16 = 0x3E;
    pub const F5: u16 = 0x3F;
    pub const F6: u16 = 0x40;
    pub const F7: u16 = 0x41;
    pub const F8: u16 = 0x42;
    pub const F9: u16 = 0x43;
    pub const F10: u16 = 0x44;
    pub const F11: u16 = 0x57;
    pub const F12: u16 = 0x58;

    // Number row
    pub const KEY_1: u16 = 0x02;
    pub const KEY_2: u16 = 0x03;
    pub const KEY_3: u16 = 0x04;
    pub const KEY_4: u16 = 0x05;
    pub const KEY_5: u16 = 0x06;
    pub const KEY_6: u16 = 0x07;
    pub const KEY_7: u16 = 0x08;
    pub const KEY_8: u16 = 0x09;
    pub const KEY_9: u16 = 0x0A;
    pub const KEY_0: u16 = 0x0B;
    pub const MINUS: u16 = 0x0C;
    pub const EQUALS: u16 = 0x0D;
    pub const BACKSPACE: u16 = 0x0E;

    // Top letter row
    pub const TAB: u16 = 0x0F;
    pub const Q: u16 = 0x10;
    pub const W: u16 = 0x11;
    pub const E: u16 = 0x12;
    pub const R: u16 = 0x13;
    pub const T: u16 = 0x14;
    pub const Y: u16 = 0x15;
    pub const U: u16 = 0x16;
    pub const I: u16 = 0x17;
    pub const O: u16 = 0x18;
    pub const P: u16 = 0x19;
    pub const LEFT_BRACKET: u16 = 0x1A;
    pub const RIGHT_BRACKET: u16 = 0x1B;
    pub const ENTER: u16 = 0x1C;

    // Middle letter row
    pub const CAPS_LOCK: u16 = 0x3A;
    pub const A: u16 = 0x1E;
    pub const S: u16 = 0x1F;
    pub const D: u16 = 0x20;
    pub const F: u16 = 0x21;
    pub const G: u16 = 0x22;
    pub const H: u16 = 0x23;
    pub const J: u16 = 0x24;
    pub const K: u16 = 0x25;
    pub const L: u16 = 0x26;
    pub const SEMICOLON: u16 = 0x27;
    pub const APOSTROPHE: u16 = 0x28;
    pub const GRAVE: u16 = 0x29;

    // Bottom letter row
    pub const LEFT_SHIFT: u16 = 0x2A;
    pub const BACKSLASH: u16 = 0x2B;
    pub const Z: u16 = 0x2C;
    pub const X: u16 = 0x2D;
    pub const C: u16 = 0x2E;
    pub const V: u16 = 0x2F;
    pub const B: u16 = 0x30;
    pub const N: u16 = 0x31;
    pub const M: u16 = 0x32;
    pub const COMMA: u16 = 0x33;
    pub const PERIOD: u16 = 0x34;
    pub const SLASH: u16 = 0x35;
    pub const RIGHT_SHIFT: u16 = 0x36;
    pub const NON_US_BACKSLASH: u16 = 0x56;

    // Bottom row
    pub const LEFT_CTRL: u16 = 0x1D;
    pub const LEFT_ALT: u16 = 0x38;
    pub const SPACE: u16 = 0x39;
    pub const RIGHT_ALT: u16 = 0xE038; // Extended
    pub const RIGHT_CTRL: u16 = 0xE01D; // Extended
    pub const LEFT_META: u16 = 0xE05B; // Extended
    pub const RIGHT_META: u16 = 0xE05C; // Extended
    pub const MENU: u16 = 0xE05D; // Extended

    // System
    pub const PRINT_SCREEN: u16 = 0xE037; // Extended
    pub const SCROLL_LOCK: u16 = 0x46;

    // Navigation
    pub const INSERT: u16 = 0xE052;
    pub const DELETE: u16 = 0xE053;
    pub const HOME: u16 = 0xE047;
    pub const END: u16 = 0xE04F;
    pub const PAGE_UP: u16 = 0xE049;
    pub const PAGE_DOWN: u16 = 0xE051;
    pub const UP: u16 = 0xE048;
    pub const DOWN: u16 = 0xE050;
    pub const LEFT: u16 = 0xE04B;
    pub const RIGHT: u16 = 0xE04D;

    // Numpad
    pub const NUM_LOCK: u16 = 0x45;
    pub const KP_DIVIDE: u16 = 0xE035;
    pub const KP_MULTIPLY: u16 = 0x37;
    pub const KP_SUBTRACT: u16 = 0x4A;
    pub const KP_ADD: u16 = 0x4E;
    pub const KP_ENTER: u16 = 0xE01C;
    pub const KP_DECIMAL: u16 = 0x53;
    pub const KP_0: u16 = 0x52;
    pub const KP_1: u16 = 0x4F;
    pub const KP_2: u16 = 0x50;
    pub const KP_3: u16 = 0x51;
    pub const KP_4: u16 = 0x4B;
    pub const KP_5: u16 = 0x4C;
    pub const KP_6: u16 = 0x4D;
    pub const KP_7: u16 = 0x47;
    pub const KP_8: u16 = 0x48;
    pub const KP_9: u16 = 0x49;
}

/// Whether a set 1 code needs the extended prefix.
pub fn is_extended(scancode: u16) -> bool {
    scancode >> 8 == u16::from(SCANCODE_EXTENDED)
}

/// Text console key symbol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Keysym {
    Char(char),
    Backspace,
    Up,
    Down,
    Left,
    Right,
}

// ============================================================================
// Mouse Events
// ============================================================================

/// Mouse button identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    WheelUp,
    WheelDown,
}

/// Pointer axis
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
}

// ============================================================================
// Generic Input Event
// ============================================================================

/// Generic input event (union of all event types)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InputEvent {
    /// One scancode byte pressed or released.
    Key { scancode: u8, down: bool },
    /// A character or editing key typed on a text console.
    Keysym { keysym: Keysym },
    Button { button: MouseButton, down: bool },
    Rel { axis: Axis, delta: i32 },
    Abs { axis: Axis, value: i32, min: i32, max: i32 },
    /// End of one pointer report.
    Sync,
}

impl InputEvent {
    /// Create a key press event
    pub fn key_down(scancode: u8) -> Self {
        InputEvent::Key {
            scancode,
            down: true,
        }
    }

    /// Create a key release event
    pub fn key_up(scancode: u8) -> Self {
        InputEvent::Key {
            scancode,
            down: false,
        }
    }

    /// Create a text console key event
    pub fn keysym(keysym: Keysym) -> Self {
        InputEvent::Keysym { keysym }
    }

    pub fn is_keyboard(&self) -> bool {
        matches!(self, InputEvent::Key { .. } | InputEvent::Keysym { .. })
    }
}
