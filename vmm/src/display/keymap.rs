// Copyright 2024 Cloud Hypervisor Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Linux key code translation
//!
//! Maps Linux input key codes (`KEY_*` from `linux/input-event-codes.h`) to
//! PC/AT set 1 scancodes for graphic guest consoles, and to en-US keysyms
//! for text consoles. Both tables are built at compile time and indexed by
//! key code.

use log::warn;

use crate::input::{InputSink, Keysym, SCANCODE_EXTENDED, is_extended, keys};

pub const KEY_RESERVED: u16 = 0;
pub const KEY_ESC: u16 = 1;
pub const KEY_1: u16 = 2;
pub const KEY_2: u16 = 3;
pub const KEY_3: u16 = 4;
pub const KEY_4: u16 = 5;
pub const KEY_5: u16 = 6;
pub const KEY_6: u16 = 7;
pub const KEY_7: u16 = 8;
pub const KEY_8: u16 = 9;
pub const KEY_9: u16 = 10;
pub const KEY_0: u16 = 11;
pub const KEY_MINUS: u16 = 12;
pub const KEY_EQUAL: u16 = 13;
pub const KEY_BACKSPACE: u16 = 14;
pub const KEY_TAB: u16 = 15;
pub const KEY_Q: u16 = 16;
pub const KEY_W: u16 = 17;
pub const KEY_E: u16 = 18;
pub const KEY_R: u16 = 19;
pub const KEY_T: u16 = 20;
pub const KEY_Y: u16 = 21;
pub const KEY_U: u16 = 22;
pub const KEY_I: u16 = 23;
pub const KEY_O: u16 = 24;
pub const KEY_P: u16 = 25;
pub const KEY_LEFTBRACE: u16 = 26;
pub const KEY_RIGHTBRACE: u16 = 27;
pub const KEY_ENTER: u16 = 28;
pub const KEY_LEFTCTRL: u16 = 29;
pub const KEY_A: u16 = 30;
pub const KEY_S: u16 = 31;
pub const KEY_D: u16 = 32;
pub const KEY_F: u16 = 33;
pub const KEY_G: u16 = 34;
pub const KEY_H: u16 = 35;
pub const KEY_J: u16 = 36;
pub const KEY_K: u16 = 37;
pub const KEY_L: u16 = 38;
pub const KEY_SEMICOLON: u16 = 39;
pub const KEY_APOSTROPHE: u16 = 40;
pub const KEY_GRAVE: u16 = 41;
pub const KEY_LEFTSHIFT: u16 = 42;
pub const KEY_BACKSLASH: u16 = 43;
pub const KEY_Z: u16 = 44;
pub const KEY_X: u16 = 45;
pub const KEY_C: u16 = 46;
pub const KEY_V: u16 = 47;
pub const KEY_B: u16 = 48;
pub const KEY_N: u16 = 49;
pub const KEY_M: u16 = 50;
pub const KEY_COMMA: u16 = 51;
pub const KEY_DOT: u16 = 52;
pub const KEY_SLASH: u16 = 53;
pub const KEY_RIGHTSHIFT: u16 = 54;
pub const KEY_KPASTERISK: u16 = 55;
pub const KEY_LEFTALT: u16 = 56;
pub const KEY_SPACE: u16 = 57;
pub const KEY_CAPSLOCK: u16 = 58;
pub const KEY_F1: u16 = 59;
pub const KEY_F2: u16 = 60;
pub const KEY_F3: u16 = 61;
pub const KEY_F4: u16 = 62;
pub const KEY_F5: u16 = 63;
pub const KEY_F6: u16 = 64;
pub const KEY_F7: u16 = 65;
pub const KEY_F8: u16 = 66;
pub const KEY_F9: u16 = 67;
pub const KEY_F10: u16 = 68;
pub const KEY_NUMLOCK: u16 = 69;
pub const KEY_SCROLLLOCK: u16 = 70;
pub const KEY_KP7: u16 = 71;
pub const KEY_KP8: u16 = 72;
pub const KEY_KP9: u16 = 73;
pub const KEY_KPMINUS: u16 = 74;
pub const KEY_KP4: u16 = 75;
pub const KEY_KP5: u16 = 76;
pub const KEY_KP6: u16 = 77;
pub const KEY_KPPLUS: u16 = 78;
pub const KEY_KP1: u16 = 79;
pub const KEY_KP2: u16 = 80;
pub const KEY_KP3: u16 = 81;
pub const KEY_KP0: u16 = 82;
pub const KEY_KPDOT: u16 = 83;
pub const KEY_102ND: u16 = 86;
pub const KEY_F11: u16 = 87;
pub const KEY_F12: u16 = 88;
pub const KEY_KPENTER: u16 = 96;
pub const KEY_RIGHTCTRL: u16 = 97;
pub const KEY_KPSLASH: u16 = 98;
pub const KEY_SYSRQ: u16 = 99;
pub const KEY_RIGHTALT: u16 = 100;
pub const KEY_HOME: u16 = 102;
pub const KEY_UP: u16 = 103;
pub const KEY_PAGEUP: u16 = 104;
pub const KEY_LEFT: u16 = 105;
pub const KEY_RIGHT: u16 = 106;
pub const KEY_END: u16 = 107;
pub const KEY_DOWN: u16 = 108;
pub const KEY_PAGEDOWN: u16 = 109;
pub const KEY_INSERT: u16 = 110;
pub const KEY_DELETE: u16 = 111;
pub const KEY_PAUSE: u16 = 119;
pub const KEY_LEFTMETA: u16 = 125;
pub const KEY_RIGHTMETA: u16 = 126;
pub const KEY_COMPOSE: u16 = 127;

/// Highest key code the kernel reports.
pub const KEY_MAX: u16 = 0x2ff;
/// Size of key code indexed tables.
pub const KEY_CNT: usize = KEY_MAX as usize + 1;

const SCANCODES: &[(u16, u16)] = &[
    (KEY_ESC, keys::ESCAPE),
    (KEY_1, keys::KEY_1),
    (KEY_2, keys::KEY_2),
    (KEY_3, keys::KEY_3),
    (KEY_4, keys::KEY_4),
    (KEY_5, keys::KEY_5),
    (KEY_6, keys::KEY_6),
    (KEY_7, keys::KEY_7),
    (KEY_8, keys::KEY_8),
    (KEY_9, keys::KEY_9),
    (KEY_0, keys::KEY_0),
    (KEY_MINUS, keys::MINUS),
    (KEY_EQUAL, keys::EQUALS),
    (KEY_BACKSPACE, keys::BACKSPACE),
    (KEY_TAB, keys::TAB),
    (KEY_Q, keys::Q),
    (KEY_W, keys::W),
    (KEY_E, keys::E),
    (KEY_R, keys::R),
    (KEY_T, keys::T),
    (KEY_Y, keys::Y),
    (KEY_U, keys::U),
    (KEY_I, keys::I),
    (KEY_O, keys::O),
    (KEY_P, keys::P),
    (KEY_LEFTBRACE, keys::LEFT_BRACKET),
    (KEY_RIGHTBRACE, keys::RIGHT_BRACKET),
    (KEY_ENTER, keys::ENTER),
    (KEY_A, keys::A),
    (KEY_S, keys::S),
    (KEY_D, keys::D),
    (KEY_F, keys::F),
    (KEY_G, keys::G),
    (KEY_H, keys::H),
    (KEY_J, keys::J),
    (KEY_K, keys::K),
    (KEY_L, keys::L),
    (KEY_SEMICOLON, keys::SEMICOLON),
    (KEY_APOSTROPHE, keys::APOSTROPHE),
    (KEY_GRAVE, keys::GRAVE),
    (KEY_LEFTSHIFT, keys::LEFT_SHIFT),
    (KEY_BACKSLASH, keys::BACKSLASH),
    (KEY_Z, keys::Z),
    (KEY_X, keys::X),
    (KEY_C, keys::C),
    (KEY_V, keys::V),
    (KEY_B, keys::B),
    (KEY_N, keys::N),
    (KEY_M, keys::M),
    (KEY_COMMA, keys::COMMA),
    (KEY_DOT, keys::PERIOD),
    (KEY_SLASH, keys::SLASH),
    (KEY_RIGHTSHIFT, keys::RIGHT_SHIFT),
    (KEY_SPACE, keys::SPACE),
    (KEY_F1, keys::F1),
    (KEY_F2, keys::F2),
    (KEY_F3, keys::F3),
    (KEY_F4, keys::F4),
    (KEY_F5, keys::F5),
    (KEY_F6, keys::F6),
    (KEY_F7, keys::F7),
    (KEY_F8, keys::F8),
    (KEY_F9, keys::F9),
    (KEY_F10, keys::F10),
    (KEY_F11, keys::F11),
    (KEY_F12, keys::F12),
    (KEY_SYSRQ, keys::PRINT_SCREEN),
    (KEY_SCROLLLOCK, keys::SCROLL_LOCK),
    (KEY_CAPSLOCK, keys::CAPS_LOCK),
    (KEY_102ND, keys::NON_US_BACKSLASH),
    (KEY_LEFTCTRL, keys::LEFT_CTRL),
    (KEY_LEFTMETA, keys::LEFT_META),
    (KEY_LEFTALT, keys::LEFT_ALT),
    (KEY_RIGHTALT, keys::RIGHT_ALT),
    (KEY_RIGHTMETA, keys::RIGHT_META),
    (KEY_RIGHTCTRL, keys::RIGHT_CTRL),
    (KEY_COMPOSE, keys::MENU),
    (KEY_INSERT, keys::INSERT),
    (KEY_DELETE, keys::DELETE),
    (KEY_HOME, keys::HOME),
    (KEY_END, keys::END),
    (KEY_PAGEUP, keys::PAGE_UP),
    (KEY_PAGEDOWN, keys::PAGE_DOWN),
    (KEY_UP, keys::UP),
    (KEY_LEFT, keys::LEFT),
    (KEY_RIGHT, keys::RIGHT),
    (KEY_DOWN, keys::DOWN),
    (KEY_NUMLOCK, keys::NUM_LOCK),
    (KEY_KPSLASH, keys::KP_DIVIDE),
    (KEY_KPASTERISK, keys::KP_MULTIPLY),
    (KEY_KP7, keys::KP_7),
    (KEY_KP8, keys::KP_8),
    (KEY_KP9, keys::KP_9),
    (KEY_KPMINUS, keys::KP_SUBTRACT),
    (KEY_KP4, keys::KP_4),
    (KEY_KP5, keys::KP_5),
    (KEY_KP6, keys::KP_6),
    (KEY_KPPLUS, keys::KP_ADD),
    (KEY_KP1, keys::KP_1),
    (KEY_KP2, keys::KP_2),
    (KEY_KP3, keys::KP_3),
    (KEY_KP0, keys::KP_0),
    (KEY_KPDOT, keys::KP_DECIMAL),
    (KEY_KPENTER, keys::KP_ENTER),
];

/// Glyphs produced by a key on an en-US layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeysymEntry {
    pub normal: Keysym,
    pub shifted: Option<Keysym>,
}

const fn chars(normal: char, shifted: char) -> Option<KeysymEntry> {
    Some(KeysymEntry {
        normal: Keysym::Char(normal),
        shifted: Some(Keysym::Char(shifted)),
    })
}

const fn only(normal: Keysym) -> Option<KeysymEntry> {
    Some(KeysymEntry {
        normal,
        shifted: None,
    })
}

const KEYSYMS: &[(u16, Option<KeysymEntry>)] = &[
    (KEY_A, chars('a', 'A')),
    (KEY_B, chars('b', 'B')),
    (KEY_C, chars('c', 'C')),
    (KEY_D, chars('d', 'D')),
    (KEY_E, chars('e', 'E')),
    (KEY_F, chars('f', 'F')),
    (KEY_G, chars('g', 'G')),
    (KEY_H, chars('h', 'H')),
    (KEY_I, chars('i', 'I')),
    (KEY_J, chars('j', 'J')),
    (KEY_K, chars('k', 'K')),
    (KEY_L, chars('l', 'L')),
    (KEY_M, chars('m', 'M')),
    (KEY_N, chars('n', 'N')),
    (KEY_O, chars('o', 'O')),
    (KEY_P, chars('p', 'P')),
    (KEY_Q, chars('q', 'Q')),
    (KEY_R, chars('r', 'R')),
    (KEY_S, chars('s', 'S')),
    (KEY_T, chars('t', 'T')),
    (KEY_U, chars('u', 'U')),
    (KEY_V, chars('v', 'V')),
    (KEY_W, chars('w', 'W')),
    (KEY_X, chars('x', 'X')),
    (KEY_Y, chars('y', 'Y')),
    (KEY_Z, chars('z', 'Z')),
    (KEY_1, chars('1', '!')),
    (KEY_2, chars('2', '@')),
    (KEY_3, chars('3', '#')),
    (KEY_4, chars('4', '$')),
    (KEY_5, chars('5', '%')),
    (KEY_6, chars('6', '^')),
    (KEY_7, chars('7', '&')),
    (KEY_8, chars('8', '*')),
    (KEY_9, chars('9', '(')),
    (KEY_0, chars('0', ')')),
    (KEY_MINUS, chars('-', '_')),
    (KEY_EQUAL, chars('=', '+')),
    (KEY_TAB, only(Keysym::Char('\t'))),
    (KEY_LEFTBRACE, chars('[', '{')),
    (KEY_RIGHTBRACE, chars(']', '}')),
    (KEY_ENTER, only(Keysym::Char('\n'))),
    (KEY_SEMICOLON, chars(';', ':')),
    // en-US: apostrophe unshifted, double quote shifted.
    (KEY_APOSTROPHE, chars('\'', '"')),
    (KEY_BACKSLASH, chars('\\', '|')),
    (KEY_COMMA, chars(',', '<')),
    (KEY_DOT, chars('.', '>')),
    (KEY_SLASH, chars('/', '?')),
    (KEY_SPACE, only(Keysym::Char(' '))),
    (KEY_BACKSPACE, only(Keysym::Backspace)),
    (KEY_UP, only(Keysym::Up)),
    (KEY_DOWN, only(Keysym::Down)),
    (KEY_LEFT, only(Keysym::Left)),
    (KEY_RIGHT, only(Keysym::Right)),
];

const fn build_scancode_table() -> [u16; KEY_CNT] {
    let mut table = [0u16; KEY_CNT];
    let mut i = 0;
    while i < SCANCODES.len() {
        table[SCANCODES[i].0 as usize] = SCANCODES[i].1;
        i += 1;
    }
    table
}

const fn build_keysym_table() -> [Option<KeysymEntry>; KEY_CNT] {
    let mut table = [None; KEY_CNT];
    let mut i = 0;
    while i < KEYSYMS.len() {
        table[KEYSYMS[i].0 as usize] = KEYSYMS[i].1;
        i += 1;
    }
    table
}

static SCANCODE_TABLE: [u16; KEY_CNT] = build_scancode_table();
static KEYSYM_TABLE_EN_US: [Option<KeysymEntry>; KEY_CNT] = build_keysym_table();

/// Set 1 scancode of `key`; extended keys carry `0xE0` in the high byte.
pub fn scancode(key: u16) -> Option<u16> {
    match SCANCODE_TABLE.get(key as usize) {
        Some(&code) if code != 0 => Some(code),
        _ => None,
    }
}

/// Linux key code producing `scancode`.
pub fn key_for_scancode(scancode: u16) -> Option<u16> {
    if scancode == 0 {
        return None;
    }
    SCANCODE_TABLE
        .iter()
        .position(|&code| code == scancode)
        .map(|key| key as u16)
}

/// en-US glyph of `key`, shifted when `shift` is held and a shifted glyph
/// exists.
pub fn keysym(key: u16, shift: bool) -> Option<Keysym> {
    let entry = KEYSYM_TABLE_EN_US.get(key as usize).copied().flatten()?;
    match entry.shifted {
        Some(shifted) if shift => Some(shifted),
        _ => Some(entry.normal),
    }
}

/// Forward `key` to the guest as scancode bytes.
///
/// Returns false and logs when the key has no scancode.
pub fn send_scancode(sink: &mut dyn InputSink, key: u16, down: bool) -> bool {
    let Some(code) = scancode(key) else {
        warn!("Unmapped key: {key:#x} {}", key_name(key));
        return false;
    };
    // The 0xE0 prefix is a press, for key releases too.
    if is_extended(code) {
        sink.key_scancode(SCANCODE_EXTENDED, true);
    }
    sink.key_scancode((code & 0xff) as u8, down);
    true
}

/// Forward `key` to a text console as a keysym.
pub fn send_keysym(sink: &mut dyn InputSink, key: u16, shift: bool) -> bool {
    match keysym(key, shift) {
        Some(sym) => {
            sink.keysym(sym);
            true
        }
        None => {
            warn!("Unmapped key: {key:#x} {}", key_name(key));
            false
        }
    }
}

/// Kernel name of a key code, for diagnostics.
pub fn key_name(key: u16) -> &'static str {
    match key {
        KEY_RESERVED => "KEY_RESERVED",
        KEY_ESC => "KEY_ESC",
        KEY_1 => "KEY_1",
        KEY_2 => "KEY_2",
        KEY_3 => "KEY_3",
        KEY_4 => "KEY_4",
        KEY_5 => "KEY_5",
        KEY_6 => "KEY_6",
        KEY_7 => "KEY_7",
        KEY_8 => "KEY_8",
        KEY_9 => "KEY_9",
        KEY_0 => "KEY_0",
        KEY_MINUS => "KEY_MINUS",
        KEY_EQUAL => "KEY_EQUAL",
        KEY_BACKSPACE => "KEY_BACKSPACE",
        KEY_TAB => "KEY_TAB",
        KEY_Q => "KEY_Q",
        KEY_W => "KEY_W",
        KEY_E => "KEY_E",
        KEY_R => "KEY_R",
        KEY_T => "KEY_T",
        KEY_Y => "KEY_Y",
        KEY_U => "KEY_U",
        KEY_I => "KEY_I",
        KEY_O => "KEY_O",
        KEY_P => "KEY_P",
        KEY_LEFTBRACE => "KEY_LEFTBRACE",
        KEY_RIGHTBRACE => "KEY_RIGHTBRACE",
        KEY_ENTER => "KEY_ENTER",
        KEY_LEFTCTRL => "KEY_LEFTCTRL",
        KEY_A => "KEY_A",
        KEY_S => "KEY_S",
        KEY_D => "KEY_D",
        KEY_F => "KEY_F",
        KEY_G => "KEY_G",
        KEY_H => "KEY_H",
        KEY_J => "KEY_J",
        KEY_K => "KEY_K",
        KEY_L => "KEY_L",
        KEY_SEMICOLON => "KEY_SEMICOLON",
        KEY_APOSTROPHE => "KEY_APOSTROPHE",
        KEY_GRAVE => "KEY_GRAVE",
        KEY_LEFTSHIFT => "KEY_LEFTSHIFT",
        KEY_BACKSLASH => "KEY_BACKSLASH",
        KEY_Z => "KEY_Z",
        KEY_X => "KEY_X",
        KEY_C => "KEY_C",
        KEY_V => "KEY_V",
        KEY_B => "KEY_B",
        KEY_N => "KEY_N",
        KEY_M => "KEY_M",
        KEY_COMMA => "KEY_COMMA",
        KEY_DOT => "KEY_DOT",
        KEY_SLASH => "KEY_SLASH",
        KEY_RIGHTSHIFT => "KEY_RIGHTSHIFT",
        KEY_KPASTERISK => "KEY_KPASTERISK",
        KEY_LEFTALT => "KEY_LEFTALT",
        KEY_SPACE => "KEY_SPACE",
        KEY_CAPSLOCK => "KEY_CAPSLOCK",
        KEY_F1 => "KEY_F1",
        KEY_F2 => "KEY_F2",
        KEY_F3 => "KEY_F3",
        KEY_F4 => "KEY_F4",
        KEY_F5 => "KEY_F5",
        KEY_F6 => "KEY_F6",
        KEY_F7 => "KEY_F7",
        KEY_F8 => "KEY_F8",
        KEY_F9 => "KEY_F9",
        KEY_F10 => "KEY_F10",
        KEY_NUMLOCK => "KEY_NUMLOCK",
        KEY_SCROLLLOCK => "KEY_SCROLLLOCK",
        KEY_KP7 => "KEY_KP7",
        KEY_KP8 => "KEY_KP8",
        KEY_KP9 => "KEY_KP9",
        KEY_KPMINUS => "KEY_KPMINUS",
        KEY_KP4 => "KEY_KP4",
        KEY_KP5 => "KEY_KP5",
        KEY_KP6 => "KEY_KP6",
        KEY_KPPLUS => "KEY_KPPLUS",
        KEY_KP1 => "KEY_KP1",
        KEY_KP2 => "KEY_KP2",
        KEY_KP3 => "KEY_KP3",
        KEY_KP0 => "KEY_KP0",
        KEY_KPDOT => "KEY_KPDOT",
        KEY_102ND => "KEY_102ND",
        KEY_F11 => "KEY_F11",
        KEY_F12 => "KEY_F12",
        KEY_KPENTER => "KEY_KPENTER",
        KEY_RIGHTCTRL => "KEY_RIGHTCTRL",
        KEY_KPSLASH => "KEY_KPSLASH",
        KEY_SYSRQ => "KEY_SYSRQ",
        KEY_RIGHTALT => "KEY_RIGHTALT",
        KEY_HOME => "KEY_HOME",
        KEY_UP => "KEY_UP",
        KEY_PAGEUP => "KEY_PAGEUP",
        KEY_LEFT => "KEY_LEFT",
        KEY_RIGHT => "KEY_RIGHT",
        KEY_END => "KEY_END",
        KEY_DOWN => "KEY_DOWN",
        KEY_PAGEDOWN => "KEY_PAGEDOWN",
        KEY_INSERT => "KEY_INSERT",
        KEY_DELETE => "KEY_DELETE",
        KEY_PAUSE => "KEY_PAUSE",
        KEY_LEFTMETA => "KEY_LEFTMETA",
        KEY_RIGHTMETA => "KEY_RIGHTMETA",
        KEY_COMPOSE => "KEY_COMPOSE",
        _ => "KEY_UNKNOWN",
    }
}
