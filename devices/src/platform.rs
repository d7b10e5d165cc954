// Copyright 2024 Cloud Hypervisor Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Device opening
//!
//! The display backend never touches paths or file descriptors directly;
//! it asks a [`DevicePlatform`] for devices. [`LinuxPlatform`] opens the real
//! ones.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::FromRawFd;
use std::path::{Path, PathBuf};

use log::debug;
use thiserror::Error;

use crate::console::{ConsoleDevice, LinuxConsole};
use crate::fbdev::{FramebufferDevice, LinuxFramebuffer};
use crate::mice::{LinuxMice, PointerDevice};

/// Errors raised while opening devices.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to open {}", .1.display())]
    Open(#[source] io::Error, PathBuf),
    #[error("Failed to duplicate standard input")]
    DupStdin(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Opens the devices a framebuffer display needs.
pub trait DevicePlatform {
    fn open_framebuffer(&mut self, path: &Path) -> Result<Box<dyn FramebufferDevice>>;

    /// The terminal the process was started from (standard input).
    fn controlling_console(&mut self) -> Result<Box<dyn ConsoleDevice>>;

    fn open_console(&mut self, path: &Path) -> Result<Box<dyn ConsoleDevice>>;

    fn open_pointer(&mut self, path: &Path) -> Result<Box<dyn PointerDevice>>;

    fn page_size(&self) -> usize;
}

/// Real devices under `/dev`.
#[derive(Debug, Default)]
pub struct LinuxPlatform;

impl LinuxPlatform {
    pub fn new() -> Self {
        Self
    }

    fn open(path: &Path, write: bool) -> Result<File> {
        debug!("Opening {}", path.display());
        OpenOptions::new()
            .read(true)
            .write(write)
            .open(path)
            .map_err(|e| Error::Open(e, path.to_path_buf()))
    }
}

impl DevicePlatform for LinuxPlatform {
    fn open_framebuffer(&mut self, path: &Path) -> Result<Box<dyn FramebufferDevice>> {
        Ok(Box::new(LinuxFramebuffer::new(Self::open(path, true)?)))
    }

    fn controlling_console(&mut self) -> Result<Box<dyn ConsoleDevice>> {
        // A duplicate keeps standard input open when the console is dropped.
        // SAFETY: dup has no memory safety requirements.
        let fd = unsafe { libc::dup(libc::STDIN_FILENO) };
        if fd < 0 {
            return Err(Error::DupStdin(io::Error::last_os_error()));
        }
        // SAFETY: fd was just returned by dup and is owned by nobody else.
        let file = unsafe { File::from_raw_fd(fd) };
        Ok(Box::new(LinuxConsole::new(file)))
    }

    fn open_console(&mut self, path: &Path) -> Result<Box<dyn ConsoleDevice>> {
        Ok(Box::new(LinuxConsole::new(Self::open(path, true)?)))
    }

    fn open_pointer(&mut self, path: &Path) -> Result<Box<dyn PointerDevice>> {
        Ok(Box::new(LinuxMice::new(Self::open(path, false)?)))
    }

    fn page_size(&self) -> usize {
        // SAFETY: sysconf has no memory safety requirements.
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 { size as usize } else { 4096 }
    }
}
