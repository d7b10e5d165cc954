// Copyright 2024 Cloud Hypervisor Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Linux framebuffer device (`/dev/fbN`)
//!
//! Mirrors the `linux/fb.h` screen info structures and wraps the handful of
//! ioctls a display backend needs: reading and restoring the video mode,
//! reading the fixed layout, panning, and mapping the pixel memory.
//!
//! Memory layout of a mapping:
//! ```text
//! mmap start (page aligned)
//! +------------------+
//! | page offset      |  smem_start & (page_size - 1) bytes
//! +------------------+
//! | line 0           |  line_length bytes
//! | line 1           |
//! | ...              |
//! +------------------+
//! ```

use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, RawFd};

use memmap2::{MmapMut, MmapOptions};
use thiserror::Error;
use vmm_sys_util::ioctl::{ioctl_with_mut_ref, ioctl_with_ref};
use vmm_sys_util::{ioctl_io_nr, ioctl_ioc_nr};

// ============================================================================
// ioctl numbers (linux/fb.h, all `_IO('F', nr)`)
// ============================================================================

ioctl_io_nr!(FBIOGET_VSCREENINFO, 0x46, 0x00);
ioctl_io_nr!(FBIOPUT_VSCREENINFO, 0x46, 0x01);
ioctl_io_nr!(FBIOGET_FSCREENINFO, 0x46, 0x02);
ioctl_io_nr!(FBIOPAN_DISPLAY, 0x46, 0x06);

/// Packed pixels, the only framebuffer type that can be drawn linearly.
pub const FB_TYPE_PACKED_PIXELS: u32 = 0;

/// Errors raised by framebuffer operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("FBIOGET_VSCREENINFO failed")]
    GetVarScreenInfo(#[source] io::Error),
    #[error("FBIOPUT_VSCREENINFO failed")]
    PutVarScreenInfo(#[source] io::Error),
    #[error("FBIOGET_FSCREENINFO failed")]
    GetFixScreenInfo(#[source] io::Error),
    #[error("FBIOPAN_DISPLAY failed")]
    PanDisplay(#[source] io::Error),
    #[error("Failed to map {len} bytes of framebuffer memory")]
    Map {
        len: usize,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// One color channel inside a pixel (`struct fb_bitfield`).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FbBitfield {
    pub offset: u32,
    pub length: u32,
    pub msb_right: u32,
}

impl FbBitfield {
    pub const fn new(offset: u32, length: u32) -> Self {
        Self {
            offset,
            length,
            msb_right: 0,
        }
    }

    /// Place an 8-bit channel value into this field.
    pub fn encode(&self, value: u8) -> u32 {
        if self.length == 0 {
            return 0;
        }
        let value = if self.length >= 8 {
            u32::from(value) << (self.length - 8)
        } else {
            u32::from(value) >> (8 - self.length)
        };
        value << self.offset
    }
}

/// Variable screen information (`struct fb_var_screeninfo`).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FbVarScreenInfo {
    pub xres: u32,
    pub yres: u32,
    pub xres_virtual: u32,
    pub yres_virtual: u32,
    pub xoffset: u32,
    pub yoffset: u32,
    pub bits_per_pixel: u32,
    pub grayscale: u32,
    pub red: FbBitfield,
    pub green: FbBitfield,
    pub blue: FbBitfield,
    pub transp: FbBitfield,
    pub nonstd: u32,
    pub activate: u32,
    pub height: u32,
    pub width: u32,
    pub accel_flags: u32,
    pub pixclock: u32,
    pub left_margin: u32,
    pub right_margin: u32,
    pub upper_margin: u32,
    pub lower_margin: u32,
    pub hsync_len: u32,
    pub vsync_len: u32,
    pub sync: u32,
    pub vmode: u32,
    pub rotate: u32,
    pub colorspace: u32,
    pub reserved: [u32; 4],
}

/// Fixed screen information (`struct fb_fix_screeninfo`).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FbFixScreenInfo {
    pub id: [u8; 16],
    pub smem_start: libc::c_ulong,
    pub smem_len: u32,
    pub type_: u32,
    pub type_aux: u32,
    pub visual: u32,
    pub xpanstep: u16,
    pub ypanstep: u16,
    pub ywrapstep: u16,
    pub line_length: u32,
    pub mmio_start: libc::c_ulong,
    pub mmio_len: u32,
    pub accel: u32,
    pub capabilities: u16,
    pub reserved: [u16; 2],
}

impl FbFixScreenInfo {
    /// Driver identification string, up to the first NUL.
    pub fn id(&self) -> String {
        let end = self.id.iter().position(|&b| b == 0).unwrap_or(self.id.len());
        String::from_utf8_lossy(&self.id[..end]).into_owned()
    }

    /// Offset of the pixel memory inside its first page.
    pub fn page_offset(&self, page_size: usize) -> usize {
        (self.smem_start as usize) & (page_size - 1)
    }
}

/// Memory holding framebuffer pixels.
///
/// Implemented by the real device mapping and by plain vectors, which lets
/// the compositor be exercised without a device.
pub trait PixelMemory {
    fn bytes(&self) -> &[u8];
    fn bytes_mut(&mut self) -> &mut [u8];
}

impl PixelMemory for MmapMut {
    fn bytes(&self) -> &[u8] {
        self
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        self
    }
}

impl PixelMemory for Vec<u8> {
    fn bytes(&self) -> &[u8] {
        self
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        self
    }
}

/// A framebuffer device.
pub trait FramebufferDevice {
    /// Read the current video mode.
    fn var_screeninfo(&self) -> Result<FbVarScreenInfo>;

    /// Program a video mode.
    fn set_var_screeninfo(&self, var: &FbVarScreenInfo) -> Result<()>;

    /// Read the fixed memory layout.
    fn fix_screeninfo(&self) -> Result<FbFixScreenInfo>;

    /// Move the visible window to `var.xoffset`/`var.yoffset`.
    fn pan_display(&self, var: &FbVarScreenInfo) -> Result<()>;

    /// Map `len` bytes of pixel memory, shared and writable.
    fn map(&self, len: usize) -> Result<Box<dyn PixelMemory>>;

    /// Descriptor for raw access from signal context, if backed by one.
    fn raw_fd(&self) -> Option<RawFd> {
        None
    }
}

/// `/dev/fbN` opened read/write.
pub struct LinuxFramebuffer {
    file: File,
}

impl LinuxFramebuffer {
    pub fn new(file: File) -> Self {
        Self { file }
    }
}

impl FramebufferDevice for LinuxFramebuffer {
    fn var_screeninfo(&self) -> Result<FbVarScreenInfo> {
        let mut var = FbVarScreenInfo::default();
        // SAFETY: the fd is valid and var matches the kernel's layout.
        let ret = unsafe { ioctl_with_mut_ref(&self.file, FBIOGET_VSCREENINFO(), &mut var) };
        if ret < 0 {
            return Err(Error::GetVarScreenInfo(io::Error::last_os_error()));
        }
        Ok(var)
    }

    fn set_var_screeninfo(&self, var: &FbVarScreenInfo) -> Result<()> {
        // SAFETY: the fd is valid and var matches the kernel's layout.
        let ret = unsafe { ioctl_with_ref(&self.file, FBIOPUT_VSCREENINFO(), var) };
        if ret < 0 {
            return Err(Error::PutVarScreenInfo(io::Error::last_os_error()));
        }
        Ok(())
    }

    fn fix_screeninfo(&self) -> Result<FbFixScreenInfo> {
        let mut fix = FbFixScreenInfo::default();
        // SAFETY: the fd is valid and fix matches the kernel's layout.
        let ret = unsafe { ioctl_with_mut_ref(&self.file, FBIOGET_FSCREENINFO(), &mut fix) };
        if ret < 0 {
            return Err(Error::GetFixScreenInfo(io::Error::last_os_error()));
        }
        Ok(fix)
    }

    fn pan_display(&self, var: &FbVarScreenInfo) -> Result<()> {
        // SAFETY: the fd is valid and var matches the kernel's layout.
        let ret = unsafe { ioctl_with_ref(&self.file, FBIOPAN_DISPLAY(), var) };
        if ret < 0 {
            return Err(Error::PanDisplay(io::Error::last_os_error()));
        }
        Ok(())
    }

    fn map(&self, len: usize) -> Result<Box<dyn PixelMemory>> {
        // SAFETY: the framebuffer is device memory owned by the kernel; it
        // stays valid for as long as the mapping exists.
        let mmap = unsafe { MmapOptions::new().len(len).map_mut(&self.file) }
            .map_err(|source| Error::Map { len, source })?;
        Ok(Box::new(mmap))
    }

    fn raw_fd(&self) -> Option<RawFd> {
        Some(self.file.as_raw_fd())
    }
}

/// Restore a saved video mode on a raw descriptor.
///
/// Only performs the ioctl, so it may be called from a signal handler.
pub fn restore_var_screeninfo_raw(fd: RawFd, var: &FbVarScreenInfo) -> bool {
    // SAFETY: var matches the kernel's layout; a stale fd only fails.
    unsafe { ioctl_with_ref(&fd, FBIOPUT_VSCREENINFO(), var) >= 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ioctl_numbers() {
        assert_eq!(FBIOGET_VSCREENINFO(), 0x4600);
        assert_eq!(FBIOPUT_VSCREENINFO(), 0x4601);
        assert_eq!(FBIOGET_FSCREENINFO(), 0x4602);
        assert_eq!(FBIOPAN_DISPLAY(), 0x4606);
    }

    #[test]
    fn test_struct_sizes() {
        // Sizes from linux/fb.h on 64-bit targets.
        assert_eq!(std::mem::size_of::<FbVarScreenInfo>(), 160);
        #[cfg(target_pointer_width = "64")]
        assert_eq!(std::mem::size_of::<FbFixScreenInfo>(), 80);
    }

    #[test]
    fn test_bitfield_encode() {
        let red = FbBitfield::new(16, 8);
        assert_eq!(red.encode(0xab), 0x00ab_0000);

        let green565 = FbBitfield::new(5, 6);
        assert_eq!(green565.encode(0xff), 0x3f << 5);

        let none = FbBitfield::new(24, 0);
        assert_eq!(none.encode(0xff), 0);
    }

    #[test]
    fn test_fix_id_and_page_offset() {
        let mut fix = FbFixScreenInfo::default();
        fix.id[..7].copy_from_slice(b"EFI VGA");
        fix.smem_start = 0xe000_0800;
        assert_eq!(fix.id(), "EFI VGA");
        assert_eq!(fix.page_offset(4096), 0x800);
    }

    #[test]
    fn test_vec_pixel_memory() {
        let mut mem: Box<dyn PixelMemory> = Box::new(vec![0u8; 16]);
        mem.bytes_mut()[3] = 7;
        assert_eq!(mem.bytes()[3], 7);
        assert_eq!(mem.bytes().len(), 16);
    }
}
