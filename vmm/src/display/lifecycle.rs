// Copyright 2024 Cloud Hypervisor Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! fbdev backend lifecycle: init, input dispatch, refresh, uninit.

use std::os::fd::RawFd;
use std::time::Duration;

use devices::{DevicePlatform, LinuxPlatform};
use log::{debug, info};

use super::fbdev::FbdevDisplay;
use super::options::DisplayOptions;
use super::registry::{DisplayBackend, DisplayType, InputSource};
use super::{DisplayChangeListener, GuestDisplay, Result};
use crate::input::InputSink;

pub struct FbdevBackend {
    options: DisplayOptions,
    platform: Box<dyn DevicePlatform>,
    display: Option<FbdevDisplay>,
}

impl FbdevBackend {
    /// Backend on the real Linux devices.
    pub fn new(options: DisplayOptions) -> Self {
        Self::with_platform(options, Box::new(LinuxPlatform::new()))
    }

    pub fn with_platform(options: DisplayOptions, platform: Box<dyn DevicePlatform>) -> Self {
        Self {
            options,
            platform,
            display: None,
        }
    }

    pub fn options(&self) -> &DisplayOptions {
        &self.options
    }

    pub fn display(&self) -> Option<&FbdevDisplay> {
        self.display.as_ref()
    }

    pub fn display_mut(&mut self) -> Option<&mut FbdevDisplay> {
        self.display.as_mut()
    }
}

impl DisplayBackend for FbdevBackend {
    fn kind(&self) -> DisplayType {
        DisplayType::Fbdev
    }

    fn init(&mut self, guest: &mut dyn GuestDisplay) -> Result<()> {
        if self.display.is_some() {
            debug!("fbdev display already initialized");
            return Ok(());
        }
        self.display = Some(FbdevDisplay::start(self.platform.as_mut(), &self.options, guest)?);
        Ok(())
    }

    fn uninit(&mut self, guest: &mut dyn GuestDisplay) {
        if let Some(mut display) = self.display.take() {
            display.stop(guest);
            info!("fbdev display stopped");
        }
    }

    fn is_initialized(&self) -> bool {
        self.display.is_some()
    }

    fn input_fds(&self) -> Vec<(InputSource, RawFd)> {
        let Some(display) = self.display.as_ref() else {
            return Vec::new();
        };
        [
            (InputSource::Console, display.console_fd()),
            (InputSource::Pointer, display.pointer_fd()),
        ]
        .into_iter()
        .filter_map(|(source, fd)| Some((source, fd?)))
        .collect()
    }

    fn handle_input(
        &mut self,
        source: InputSource,
        guest: &mut dyn GuestDisplay,
        input: &mut dyn InputSink,
    ) -> Result<()> {
        let Some(display) = self.display.as_mut() else {
            return Ok(());
        };
        match source {
            InputSource::Console => display.handle_console_input(guest, input),
            InputSource::Pointer => {
                display.handle_pointer_input(input);
                Ok(())
            }
        }
    }

    fn refresh(&mut self, guest: &mut dyn GuestDisplay, input: &mut dyn InputSink) -> Result<()> {
        match self.display.as_mut() {
            Some(display) => display.refresh(guest, input),
            None => Ok(()),
        }
    }

    fn refresh_interval(&self) -> Duration {
        self.options.refresh_interval()
    }
}
