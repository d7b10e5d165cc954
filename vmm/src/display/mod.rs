// Copyright 2024 Cloud Hypervisor Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Display output
//!
//! The guest side of a display is reached through [`GuestDisplay`]; a
//! display backend implements [`DisplayChangeListener`] to receive surface
//! switches, damage and cursor updates from it.
//!
//! The only backend is the Linux framebuffer one ([`FbdevDisplay`]), selected
//! through the [`DisplayRegistry`].

use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::input::InputSink;

mod compositor;
mod console;
pub mod crash;
pub mod event_loop;
mod fbdev;
pub mod keyboard;
pub mod keymap;
mod lifecycle;
mod mouse;
mod options;
pub mod region;
mod registry;
mod session;
pub mod switch;

#[cfg(test)]
pub(crate) mod testing;

pub use compositor::{Compositor, FrameTarget, PixelLayout, ViewTransform};
pub use fbdev::FbdevDisplay;
pub use lifecycle::FbdevBackend;
pub use options::{DEFAULT_MOUSE_DEVICE, DEFAULT_REFRESH_INTERVAL_MS, DisplayOptions, FilterMode};
pub use region::{DirtyRegion, Rect};
pub use registry::{DisplayBackend, DisplayDescriptor, DisplayRegistry, DisplayType, InputSource};
pub use switch::SwitchState;

/// Errors raised by the display backend.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Framebuffer device error")]
    Framebuffer(#[from] devices::fbdev::Error),
    #[error("Console device error")]
    Console(#[from] devices::console::Error),
    #[error("Failed to open display device")]
    Platform(#[from] devices::platform::Error),
    #[error("Unsupported framebuffer type {0}, only packed pixels are handled")]
    UnsupportedType(u32),
    #[error("Unsupported framebuffer depth of {0} bits per pixel")]
    UnsupportedDepth(u32),
    #[error("Framebuffer memory of {len} bytes cannot hold {needed} bytes")]
    FramebufferTooSmall { len: usize, needed: usize },
    #[error("Failed to allocate a {0}x{1} image")]
    Image(u32, u32),
    #[error("Failed to read console input")]
    ConsoleRead(#[source] io::Error),
    #[error("Console input closed")]
    ConsoleEof,
    #[error("Emergency escape requested (ctrl-alt-esc)")]
    EmergencyEscape,
    #[error("Failed to register handler for signal {1}")]
    Signal(#[source] io::Error, i32),
    #[error("Failed to register fatal signal handler for signal {1}")]
    FatalSignal(#[source] vmm_sys_util::errno::Error, i32),
    #[error("Event loop error")]
    Epoll(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A guest framebuffer surface, xRGB8888 pixels.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DisplaySurface {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u32>,
}

impl DisplaySurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize],
        }
    }

    /// Pixel at (`x`, `y`), black when out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> u32 {
        if x >= self.width || y >= self.height {
            return 0;
        }
        self.pixels
            .get(y as usize * self.width as usize + x as usize)
            .copied()
            .unwrap_or(0)
    }
}

/// Pointer image, ARGB8888 non-premultiplied pixels.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Cursor {
    pub width: u32,
    pub height: u32,
    pub hot_x: i32,
    pub hot_y: i32,
    pub pixels: Vec<u32>,
}

/// Handle returned when a listener registers with the guest display.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// The guest display producer and its console selection.
pub trait GuestDisplay {
    /// Push pending guest changes into `listener`.
    ///
    /// Producers report surface switches, damaged rectangles and cursor
    /// changes through the listener callbacks.
    fn update(&mut self, listener: &mut dyn DisplayChangeListener);

    /// The current surface, if the guest has one.
    fn surface(&self) -> Option<&DisplaySurface>;

    /// Whether the active guest console is graphical (as opposed to text).
    fn is_graphic(&self) -> bool;

    fn select_console(&mut self, index: usize);

    fn register_listener(&mut self, name: &str) -> ListenerId;

    fn unregister_listener(&mut self, id: ListenerId);
}

/// Callbacks a display backend receives from the guest display.
pub trait DisplayChangeListener {
    fn name(&self) -> &str;

    /// Guest rectangle (`x`, `y`, `w`, `h`) changed.
    fn gfx_update(&mut self, x: i32, y: i32, w: i32, h: i32);

    /// The guest switched to a new surface.
    fn gfx_switch(&mut self, surface: &DisplaySurface);

    /// Periodic poll: handle console switching and bring the screen up to date.
    fn refresh(&mut self, guest: &mut dyn GuestDisplay, input: &mut dyn InputSink) -> Result<()>;

    /// Guest pointer moved to (`x`, `y`) in surface coordinates.
    fn mouse_set(&mut self, x: i32, y: i32, visible: bool);

    /// Guest pointer image changed; `None` removes it.
    fn cursor_define(&mut self, cursor: Option<Arc<Cursor>>);
}
