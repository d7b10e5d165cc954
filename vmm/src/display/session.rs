// Copyright 2024 Cloud Hypervisor Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Framebuffer session
//!
//! Owns the framebuffer device, its memory mapping and the console
//! session for the lifetime of the display. Startup acquires them in a
//! fixed order and undoes everything on failure; teardown restores the
//! saved video and terminal modes.

use std::path::Path;

use devices::fbdev::FB_TYPE_PACKED_PIXELS;
use devices::{DevicePlatform, FbFixScreenInfo, FbVarScreenInfo, FramebufferDevice, PixelMemory};
use log::{debug, error, info, warn};

use super::compositor::{FrameTarget, PixelLayout};
use super::console::ConsoleSession;
use super::crash::CrashRecord;
use super::{Error, Result};

/// Only 32 bpp packed pixel framebuffers are supported.
pub const SUPPORTED_BPP: u32 = 32;

/// Visible framebuffer geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
    /// Bytes per scanline.
    pub line_length: u32,
    pub bits_per_pixel: u32,
    pub layout: PixelLayout,
}

impl Geometry {
    fn new(var: &FbVarScreenInfo, fix: &FbFixScreenInfo) -> Self {
        Self {
            width: var.xres,
            height: var.yres,
            line_length: fix.line_length,
            bits_per_pixel: var.bits_per_pixel,
            layout: PixelLayout::from_var(var),
        }
    }

    /// Bytes covered by the visible screen.
    pub fn visible_len(&self) -> usize {
        self.line_length as usize * self.height as usize
    }
}

pub struct FramebufferSession {
    fb: Option<Box<dyn FramebufferDevice>>,
    console: Option<ConsoleSession>,
    saved_var: FbVarScreenInfo,
    var: FbVarScreenInfo,
    fix: FbFixScreenInfo,
    memory: Option<Box<dyn PixelMemory>>,
    /// Offset of the pixels inside the mapping.
    offset: usize,
}

impl FramebufferSession {
    /// Take over the framebuffer at `device` and a VT.
    pub fn open(platform: &mut dyn DevicePlatform, device: &Path) -> Result<Self> {
        let fb = platform.open_framebuffer(device)?;
        let mut console = ConsoleSession::open(platform)?;

        // Nothing was changed yet: dropping the devices is enough on failure.
        let saved_var = fb.var_screeninfo()?;
        console.save_modes()?;

        let mut session = Self {
            fb: Some(fb),
            console: Some(console),
            saved_var,
            var: saved_var,
            fix: FbFixScreenInfo::default(),
            memory: None,
            offset: 0,
        };
        if let Err(e) = session.setup(platform.page_size()) {
            error!("Framebuffer setup failed: {e}");
            session.teardown();
            return Err(e);
        }
        info!(
            "Framebuffer {} ({}): {}x{} {} bpp",
            device.display(),
            session.fix.id(),
            session.var.xres,
            session.var.yres,
            session.var.bits_per_pixel
        );
        Ok(session)
    }

    fn setup(&mut self, page_size: usize) -> Result<()> {
        let (Some(fb), Some(console)) = (self.fb.as_ref(), self.console.as_mut()) else {
            return Ok(());
        };

        self.fix = fb.fix_screeninfo()?;
        self.var = fb.var_screeninfo()?;
        if self.fix.type_ != FB_TYPE_PACKED_PIXELS {
            return Err(Error::UnsupportedType(self.fix.type_));
        }
        if self.var.bits_per_pixel != SUPPORTED_BPP {
            return Err(Error::UnsupportedDepth(self.var.bits_per_pixel));
        }

        self.offset = self.fix.page_offset(page_size);
        let len = self.fix.smem_len as usize + self.offset;
        let memory = fb.map(len)?;
        let needed = self.offset + self.fix.line_length as usize * self.var.yres as usize;
        if memory.bytes().len() < needed {
            return Err(Error::FramebufferTooSmall {
                len: memory.bytes().len(),
                needed,
            });
        }
        self.memory = Some(memory);

        // Move the viewport to the upper left corner.
        if self.var.xoffset != 0 || self.var.yoffset != 0 {
            self.var.xoffset = 0;
            self.var.yoffset = 0;
            fb.pan_display(&self.var)?;
        }

        console.set_graphics()?;
        // Some drivers need the VT activated again after entering graphics mode.
        console.activate_vt(console.vtno(), true);

        self.clear();

        if let Some(console) = self.console.as_mut() {
            console.start_mediumraw()?;
            console.arm_input();
        }
        Ok(())
    }

    pub fn geometry(&self) -> Geometry {
        Geometry::new(&self.var, &self.fix)
    }

    pub fn console(&self) -> Option<&ConsoleSession> {
        self.console.as_ref()
    }

    pub fn console_mut(&mut self) -> Option<&mut ConsoleSession> {
        self.console.as_mut()
    }

    pub fn is_open(&self) -> bool {
        self.fb.is_some()
    }

    /// The visible pixel memory, if mapped.
    pub fn target(&mut self) -> Option<FrameTarget<'_>> {
        let geometry = self.geometry();
        let offset = self.offset;
        let bytes = self.memory.as_mut()?.bytes_mut();
        let end = offset + geometry.visible_len();
        Some(FrameTarget {
            bytes: bytes.get_mut(offset..end)?,
            width: geometry.width,
            height: geometry.height,
            stride: geometry.line_length as usize,
            layout: geometry.layout,
        })
    }

    /// The visible pixel memory, read only.
    pub fn visible_bytes(&self) -> Option<&[u8]> {
        let end = self.offset + self.geometry().visible_len();
        self.memory.as_ref()?.bytes().get(self.offset..end)
    }

    /// Blank the visible screen.
    pub fn clear(&mut self) {
        if let Some(target) = self.target() {
            target.bytes.fill(0);
        }
    }

    /// Everything the fatal signal path needs to restore the console.
    pub fn crash_record(&self) -> Option<CrashRecord> {
        let console = self.console.as_ref()?;
        Some(CrashRecord {
            console_fd: console.device().raw_fd().unwrap_or(-1),
            console: console.raw_restore(),
            fb_fd: self.fb.as_ref().and_then(|fb| fb.raw_fd()).unwrap_or(-1),
            fb_var: self.saved_var,
        })
    }

    /// Restore the console and video mode and release the devices.
    ///
    /// Safe to call repeatedly; each failure is logged and the remaining
    /// steps still run.
    pub fn teardown(&mut self) {
        if self.fb.is_none() && self.console.is_none() {
            return;
        }
        debug!("Tearing down framebuffer session");

        if let Some(console) = self.console.as_mut() {
            console.restore();
        }
        if let Some(fb) = self.fb.as_ref() {
            if let Err(e) = fb.set_var_screeninfo(&self.saved_var) {
                warn!("{e}");
            }
        }
        self.memory = None;
        self.fb = None;
        self.console = None;
    }
}

impl Drop for FramebufferSession {
    fn drop(&mut self) {
        self.teardown();
    }
}
