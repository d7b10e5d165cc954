// Copyright 2024 Cloud Hypervisor Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Display backend registry
//!
//! The host picks a display by [`DisplayType`]; each backend registers a
//! [`DisplayDescriptor`] pairing its type with a constructor.
//!
//! ```ignore
//! let registry = DisplayRegistry::default();
//! let mut backend = registry.create(DisplayType::Fbdev, &options)?;
//! backend.init(&mut guest)?;
//! ```

use std::fmt;
use std::os::fd::RawFd;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::lifecycle::FbdevBackend;
use super::options::DisplayOptions;
use super::{GuestDisplay, Result};
use crate::input::InputSink;

/// Display backend selection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayType {
    /// No display output
    #[default]
    None,
    /// Linux framebuffer on a virtual terminal
    Fbdev,
}

impl DisplayType {
    pub fn name(&self) -> &'static str {
        match self {
            DisplayType::None => "none",
            DisplayType::Fbdev => "fbdev",
        }
    }
}

impl fmt::Display for DisplayType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DisplayType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(DisplayType::None),
            "fbdev" | "fb" => Ok(DisplayType::Fbdev),
            _ => Err(format!("Unknown display type: {s}")),
        }
    }
}

/// Descriptors an event loop can wait on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InputSource {
    /// Console keyboard
    Console,
    /// Host mouse
    Pointer,
}

/// A display backend as driven by the host.
pub trait DisplayBackend {
    fn kind(&self) -> DisplayType;

    /// Take over the output device and attach to `guest`. A no-op when
    /// already initialized.
    fn init(&mut self, guest: &mut dyn GuestDisplay) -> Result<()>;

    /// Detach from `guest` and restore the output device.
    fn uninit(&mut self, guest: &mut dyn GuestDisplay);

    fn is_initialized(&self) -> bool;

    /// Descriptors to watch for readability.
    fn input_fds(&self) -> Vec<(InputSource, RawFd)>;

    /// `source` is readable.
    fn handle_input(
        &mut self,
        source: InputSource,
        guest: &mut dyn GuestDisplay,
        input: &mut dyn InputSink,
    ) -> Result<()>;

    /// Periodic screen update.
    fn refresh(&mut self, guest: &mut dyn GuestDisplay, input: &mut dyn InputSink) -> Result<()>;

    fn refresh_interval(&self) -> Duration;
}

/// Registration record of a backend type.
#[derive(Clone, Copy)]
pub struct DisplayDescriptor {
    pub kind: DisplayType,
    pub create: fn(&DisplayOptions) -> Box<dyn DisplayBackend>,
}

impl fmt::Debug for DisplayDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisplayDescriptor").field("kind", &self.kind).finish()
    }
}

fn create_fbdev(options: &DisplayOptions) -> Box<dyn DisplayBackend> {
    Box::new(FbdevBackend::new(options.clone()))
}

#[derive(Debug)]
pub struct DisplayRegistry {
    descriptors: Vec<DisplayDescriptor>,
}

impl Default for DisplayRegistry {
    /// Registry with the built-in backends.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(DisplayDescriptor {
            kind: DisplayType::Fbdev,
            create: create_fbdev,
        });
        registry
    }
}

impl DisplayRegistry {
    pub fn empty() -> Self {
        Self {
            descriptors: Vec::new(),
        }
    }

    /// Add `descriptor`, replacing an earlier one of the same type.
    pub fn register(&mut self, descriptor: DisplayDescriptor) {
        self.descriptors.retain(|d| d.kind != descriptor.kind);
        self.descriptors.push(descriptor);
    }

    pub fn find(&self, kind: DisplayType) -> Option<&DisplayDescriptor> {
        self.descriptors.iter().find(|d| d.kind == kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = DisplayType> + '_ {
        self.descriptors.iter().map(|d| d.kind)
    }

    /// Construct an uninitialized backend of type `kind`.
    pub fn create(&self, kind: DisplayType, options: &DisplayOptions) -> Option<Box<dyn DisplayBackend>> {
        self.find(kind).map(|d| (d.create)(options))
    }
}
