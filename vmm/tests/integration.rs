// Copyright 2024 Cloud Hypervisor Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Integration tests for the display backend public API
//!
//! - Console key decoding and scancode/keysym translation
//! - View transform, damage regions and compositing into plain memory
//! - Display options and backend registry

use std::ops::ControlFlow;

use vmm::display::keyboard::{KeyAction, Keyboard, RawDecoder, RawKey};
use vmm::display::keymap::{self, KEY_A, KEY_ESC, KEY_LEFTCTRL, KEY_LEFTSHIFT, KEY_RIGHTCTRL, KEY_UP};
use vmm::display::{
    Compositor, DirtyRegion, DisplayOptions, DisplayRegistry, DisplaySurface, DisplayType, FilterMode, FrameTarget,
    PixelLayout, Rect, ViewTransform,
};
use vmm::input::{EventQueue, InputEvent, InputSink, Keysym, SCANCODE_EXTENDED};

// ============================================================================
// Console keyboard
// ============================================================================

fn decode(decoder: &mut RawDecoder, buf: &[u8]) -> Vec<RawKey> {
    let mut keys = Vec::new();
    let _ = decoder.decode::<()>(buf, |key| {
        keys.push(key);
        ControlFlow::Continue(())
    });
    keys
}

#[test]
fn test_decoder_short_and_long_codes() {
    let mut decoder = RawDecoder::new();
    // KEY_A down, then code 0x1ab released in the three byte form.
    let keys = decode(&mut decoder, &[0x1e, 0x80, 0x83, 0x2b]);
    assert_eq!(
        keys,
        vec![
            RawKey { code: KEY_A, down: true },
            RawKey { code: 0x1ab, down: false },
        ]
    );
}

#[test]
fn test_decoder_resumes_split_sequence() {
    let mut decoder = RawDecoder::new();
    assert!(decode(&mut decoder, &[0x00, 0x01]).is_empty());
    assert!(decoder.is_pending());
    let keys = decode(&mut decoder, &[0x00]);
    assert_eq!(keys, vec![RawKey { code: 0x80, down: true }]);
    assert!(!decoder.is_pending());
}

#[test]
fn test_key_table_tracks_last_event() {
    let mut keyboard = Keyboard::new();
    let mut actions = Vec::new();
    let _ = keyboard.feed::<()>(&[0x1e, 0x30, 0x9e, 0x9e], |_, action| {
        actions.push(action);
        ControlFlow::Continue(())
    });

    assert!(!keyboard.keys().is_down(KEY_A));
    assert!(keyboard.keys().is_down(0x30));
    // The second release of A produced nothing.
    assert_eq!(actions.len(), 3);
}

#[test]
fn test_emergency_escape_stops_feeding() {
    let mut keyboard = Keyboard::new();
    let flow = keyboard.feed(&[KEY_LEFTCTRL as u8, 56, KEY_ESC as u8, 0x1e], |_, action| match action {
        KeyAction::EmergencyEscape => ControlFlow::Break(()),
        _ => ControlFlow::Continue(()),
    });
    assert_eq!(flow, ControlFlow::Break(()));
    assert!(!keyboard.keys().is_down(KEY_A));
}

// ============================================================================
// Key translation
// ============================================================================

#[test]
fn test_scancode_round_trip() {
    for key in 0..=keymap::KEY_MAX {
        if let Some(code) = keymap::scancode(key) {
            assert_eq!(keymap::key_for_scancode(code), Some(key), "{}", keymap::key_name(key));
        }
    }
}

#[test]
fn test_send_extended_scancode() {
    let mut queue = EventQueue::default();
    assert!(keymap::send_scancode(&mut queue, KEY_RIGHTCTRL, true));
    assert!(keymap::send_scancode(&mut queue, KEY_UP, false));
    assert_eq!(
        queue.drain(),
        vec![
            InputEvent::key_down(SCANCODE_EXTENDED),
            InputEvent::key_down(0x1d),
            InputEvent::key_down(SCANCODE_EXTENDED),
            InputEvent::key_up(0x48),
        ]
    );
}

#[test]
fn test_keysyms() {
    assert_eq!(keymap::keysym(KEY_A, false), Some(Keysym::Char('a')));
    assert_eq!(keymap::keysym(KEY_A, true), Some(Keysym::Char('A')));
    assert_eq!(keymap::keysym(KEY_UP, true), Some(Keysym::Up));
    assert_eq!(keymap::keysym(KEY_LEFTSHIFT, false), None);

    let mut queue = EventQueue::default();
    assert!(!keymap::send_keysym(&mut queue, KEY_LEFTSHIFT, false));
    queue.keysym(Keysym::Backspace);
    assert_eq!(queue.drain(), vec![InputEvent::keysym(Keysym::Backspace)]);
}

// ============================================================================
// Transform, regions and compositing
// ============================================================================

#[test]
fn test_unscaled_guest_is_centered() {
    let t = ViewTransform::compute(1024, 768, 800, 600, false);
    assert_eq!((t.scale, t.cx, t.cy), (1.0, 112, 84));
}

#[test]
fn test_scaled_guest_fits_screen() {
    let t = ViewTransform::compute(1920, 1080, 1024, 768, true);
    assert_eq!(t.scale, 1080.0 / 768.0);
    assert_eq!(t.cy, 0);
    assert_eq!(t.cx, ((1920.0 - 1024.0 * t.scale) / 2.0) as i32);
}

#[test]
fn test_dirty_region_union_is_idempotent() {
    let mut region = DirtyRegion::new();
    region.union_rect(Rect::new(0, 0, 10, 10));
    region.union_rect(Rect::new(20, 20, 5, 5));
    let once = region.rects().to_vec();
    region.union_rect(Rect::new(0, 0, 10, 10));
    region.union_rect(Rect::new(2, 2, 3, 3));
    assert_eq!(region.rects(), once.as_slice());
    assert_eq!(region.extents(), Rect::new(0, 0, 25, 25));
}

#[test]
fn test_compositor_renders_into_memory() {
    let (width, height) = (16u32, 8u32);
    let mut bytes = vec![0x55u8; (width * height * 4) as usize];
    let mut compositor = Compositor::new(width, height, false, FilterMode::Fast).unwrap();

    let mut surface = DisplaySurface::new(8, 4);
    surface.pixels.fill(0x0012_3456);
    compositor.surface_switch(8, 4);
    compositor.damage(Rect::new(0, 0, 8, 4));

    let mut target = FrameTarget {
        bytes: &mut bytes,
        width,
        height,
        stride: width as usize * 4,
        layout: PixelLayout::XRGB8888,
    };
    compositor.render(&surface, &mut target).unwrap();
    assert!(compositor.dirty().is_empty());
    assert!(!compositor.is_redraw_pending());

    let pixel = |x: u32, y: u32| {
        let i = ((y * width + x) * 4) as usize;
        u32::from_ne_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]])
    };
    assert_eq!(pixel(4, 2), 0x0012_3456);
    assert_eq!(pixel(11, 5), 0x0012_3456);
    assert_eq!(pixel(3, 2), 0);
    assert_eq!(pixel(12, 6), 0);
}

// ============================================================================
// Options and registry
// ============================================================================

#[test]
fn test_options_from_json() {
    let options: DisplayOptions =
        serde_json::from_str(r#"{"device":"/dev/fb1","scale":true,"filter":"best"}"#).unwrap();
    assert_eq!(options.device.as_deref(), Some(std::path::Path::new("/dev/fb1")));
    assert!(options.scale);
    assert_eq!(options.filter, FilterMode::Best);
    assert_eq!(options.refresh_interval_ms, vmm::display::DEFAULT_REFRESH_INTERVAL_MS);
    assert_eq!(options.mouse_device, std::path::PathBuf::from(vmm::display::DEFAULT_MOUSE_DEVICE));
}

#[test]
fn test_registry_selects_fbdev() {
    let registry = DisplayRegistry::default();
    let backend = registry
        .create("fbdev".parse::<DisplayType>().unwrap(), &DisplayOptions::default())
        .unwrap();
    assert_eq!(backend.kind(), DisplayType::Fbdev);
    assert!(!backend.is_initialized());
}
