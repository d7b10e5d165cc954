// Copyright 2024 Cloud Hypervisor Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Guest Input Layer
//!
//! This module defines how host-side input reaches the guest. Producers
//! (the framebuffer display's console keyboard and mouse readers) talk to an
//! [`InputSink`]; the VMM routes what the sink receives into its emulated
//! keyboard and pointer devices.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐     ┌──────────────────────┐
//! │ console (mediumraw)  │     │ /dev/input/mice      │
//! └──────────────────────┘     └──────────────────────┘
//!            │                            │
//!            ▼                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      InputSink                              │
//! │  - key_scancode / keysym                                    │
//! │  - button / rel / abs / sync                                │
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │           guest keyboard / pointer emulation                │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod event;
mod queue;

pub use event::{Axis, InputEvent, Keysym, MouseButton, SCANCODE_EXTENDED, is_extended, keys};
pub use queue::{DEFAULT_QUEUE_CAPACITY, EventQueue, QueueStats};

/// Receiver of guest input.
///
/// Calls never fail; a sink that cannot deliver an event drops it.
pub trait InputSink {
    /// Whether the guest pointer currently wants absolute coordinates.
    fn is_absolute(&self) -> bool {
        false
    }

    /// A pointer button changed state.
    fn button(&mut self, button: MouseButton, down: bool);

    /// Relative pointer motion.
    fn rel(&mut self, axis: Axis, delta: i32);

    /// Absolute pointer position within `[min, max]`.
    fn abs(&mut self, axis: Axis, value: i32, min: i32, max: i32);

    /// Flush the pointer events queued since the last sync.
    fn sync(&mut self);

    /// One scancode byte (set 1) pressed or released.
    fn key_scancode(&mut self, scancode: u8, down: bool);

    /// A key typed on a text console.
    fn keysym(&mut self, keysym: Keysym);
}
