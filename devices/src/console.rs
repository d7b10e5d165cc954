// Copyright 2024 Cloud Hypervisor Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Linux virtual terminal device (`/dev/ttyN`)
//!
//! Covers the three ioctl families a full screen console client uses:
//!
//! - `VT_*` (linux/vt.h): query, allocate, activate and hand over terminals
//! - `KD*MODE` (linux/kd.h): text versus graphics display mode
//! - `KD*KBMODE` (linux/kd.h): translated versus raw keyboard delivery
//!
//! plus the termios and file status flag calls needed to read raw scancodes
//! without blocking.

use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsRawFd, RawFd};

use thiserror::Error;
use vmm_sys_util::ioctl::{ioctl_with_mut_ref, ioctl_with_ref, ioctl_with_val};
use vmm_sys_util::{ioctl_io_nr, ioctl_ioc_nr};

// ============================================================================
// ioctl numbers
// ============================================================================

ioctl_io_nr!(KDSETMODE, 0x4B, 0x3A);
ioctl_io_nr!(KDGETMODE, 0x4B, 0x3B);
ioctl_io_nr!(KDGKBMODE, 0x4B, 0x44);
ioctl_io_nr!(KDSKBMODE, 0x4B, 0x45);

ioctl_io_nr!(VT_OPENQRY, 0x56, 0x00);
ioctl_io_nr!(VT_GETMODE, 0x56, 0x01);
ioctl_io_nr!(VT_SETMODE, 0x56, 0x02);
ioctl_io_nr!(VT_GETSTATE, 0x56, 0x03);
ioctl_io_nr!(VT_RELDISP, 0x56, 0x05);
ioctl_io_nr!(VT_ACTIVATE, 0x56, 0x06);
ioctl_io_nr!(VT_WAITACTIVE, 0x56, 0x07);

/// `vt_mode.mode`: kernel switches terminals on its own.
pub const VT_AUTO: i8 = 0x00;
/// `vt_mode.mode`: switching is negotiated with the owning process.
pub const VT_PROCESS: i8 = 0x01;
/// `VT_RELDISP` argument acknowledging an acquisition.
pub const VT_ACKACQ: libc::c_ulong = 0x02;
/// `VT_RELDISP` argument allowing a release.
pub const VT_RELEASE: libc::c_ulong = 0x01;

/// Display mode of a terminal (`KD_TEXT`/`KD_GRAPHICS`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KdMode(pub libc::c_int);

impl KdMode {
    pub const TEXT: KdMode = KdMode(0x00);
    pub const GRAPHICS: KdMode = KdMode(0x01);
}

/// Keyboard delivery mode of a terminal (`K_RAW`, `K_XLATE`, ...).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KbMode(pub libc::c_int);

impl KbMode {
    pub const RAW: KbMode = KbMode(0x00);
    pub const XLATE: KbMode = KbMode(0x01);
    pub const MEDIUMRAW: KbMode = KbMode(0x02);
    pub const UNICODE: KbMode = KbMode(0x03);
    pub const OFF: KbMode = KbMode(0x04);
}

/// `struct vt_mode`
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VtMode {
    pub mode: i8,
    pub waitv: i8,
    pub relsig: i16,
    pub acqsig: i16,
    pub frsig: i16,
}

/// `struct vt_stat`
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VtStat {
    pub v_active: u16,
    pub v_signal: u16,
    pub v_state: u16,
}

/// Errors raised by terminal operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("VT_GETSTATE failed")]
    GetState(#[source] io::Error),
    #[error("VT_OPENQRY failed")]
    OpenQuery(#[source] io::Error),
    #[error("VT_ACTIVATE {1} failed")]
    Activate(#[source] io::Error, i32),
    #[error("VT_WAITACTIVE {1} failed")]
    WaitActive(#[source] io::Error, i32),
    #[error("VT_GETMODE failed")]
    GetVtMode(#[source] io::Error),
    #[error("VT_SETMODE failed")]
    SetVtMode(#[source] io::Error),
    #[error("VT_RELDISP failed")]
    ReleaseDisplay(#[source] io::Error),
    #[error("KDGETMODE failed")]
    GetKdMode(#[source] io::Error),
    #[error("KDSETMODE failed")]
    SetKdMode(#[source] io::Error),
    #[error("KDGKBMODE failed")]
    GetKbMode(#[source] io::Error),
    #[error("KDSKBMODE failed")]
    SetKbMode(#[source] io::Error),
    #[error("tcgetattr failed")]
    GetTermios(#[source] io::Error),
    #[error("tcsetattr failed")]
    SetTermios(#[source] io::Error),
    #[error("fcntl on the terminal failed")]
    StatusFlags(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// When a termios change takes effect.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetAttrWhen {
    /// `TCSANOW`
    Now,
    /// `TCSAFLUSH`: after output drained, discarding pending input.
    Flush,
}

impl SetAttrWhen {
    fn as_raw(self) -> libc::c_int {
        match self {
            SetAttrWhen::Now => libc::TCSANOW,
            SetAttrWhen::Flush => libc::TCSAFLUSH,
        }
    }
}

/// A virtual terminal.
pub trait ConsoleDevice {
    fn vt_state(&self) -> Result<VtStat>;

    /// First free terminal number (`VT_OPENQRY`).
    fn open_query(&self) -> Result<i32>;

    fn activate(&self, vtno: i32) -> Result<()>;

    fn wait_active(&self, vtno: i32) -> Result<()>;

    fn vt_mode(&self) -> Result<VtMode>;

    fn set_vt_mode(&self, mode: &VtMode) -> Result<()>;

    /// Answer a pending switch request (`VT_RELDISP`).
    fn release_display(&self, arg: libc::c_ulong) -> Result<()>;

    fn kd_mode(&self) -> Result<KdMode>;

    fn set_kd_mode(&self, mode: KdMode) -> Result<()>;

    fn kb_mode(&self) -> Result<KbMode>;

    fn set_kb_mode(&self, mode: KbMode) -> Result<()>;

    fn termios(&self) -> Result<libc::termios>;

    fn set_termios(&self, termios: &libc::termios, when: SetAttrWhen) -> Result<()>;

    fn status_flags(&self) -> Result<libc::c_int>;

    fn set_status_flags(&self, flags: libc::c_int) -> Result<()>;

    /// Read pending input bytes.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Descriptor for readiness polling and signal context restore.
    fn raw_fd(&self) -> Option<RawFd> {
        None
    }
}

/// A terminal device file.
pub struct LinuxConsole {
    file: File,
}

impl LinuxConsole {
    pub fn new(file: File) -> Self {
        Self { file }
    }

    fn check(ret: libc::c_int, err: impl FnOnce(io::Error) -> Error) -> Result<()> {
        if ret < 0 {
            return Err(err(io::Error::last_os_error()));
        }
        Ok(())
    }
}

impl ConsoleDevice for LinuxConsole {
    fn vt_state(&self) -> Result<VtStat> {
        let mut vts = VtStat::default();
        // SAFETY: the fd is valid and vts matches the kernel's layout.
        let ret = unsafe { ioctl_with_mut_ref(&self.file, VT_GETSTATE(), &mut vts) };
        Self::check(ret, Error::GetState)?;
        Ok(vts)
    }

    fn open_query(&self) -> Result<i32> {
        let mut vtno: libc::c_int = -1;
        // SAFETY: the fd is valid and the kernel writes one int.
        let ret = unsafe { ioctl_with_mut_ref(&self.file, VT_OPENQRY(), &mut vtno) };
        Self::check(ret, Error::OpenQuery)?;
        Ok(vtno)
    }

    fn activate(&self, vtno: i32) -> Result<()> {
        // SAFETY: the fd is valid and the argument is passed by value.
        let ret = unsafe { ioctl_with_val(&self.file, VT_ACTIVATE(), vtno as libc::c_ulong) };
        Self::check(ret, |e| Error::Activate(e, vtno))
    }

    fn wait_active(&self, vtno: i32) -> Result<()> {
        // SAFETY: the fd is valid and the argument is passed by value.
        let ret = unsafe { ioctl_with_val(&self.file, VT_WAITACTIVE(), vtno as libc::c_ulong) };
        Self::check(ret, |e| Error::WaitActive(e, vtno))
    }

    fn vt_mode(&self) -> Result<VtMode> {
        let mut mode = VtMode::default();
        // SAFETY: the fd is valid and mode matches the kernel's layout.
        let ret = unsafe { ioctl_with_mut_ref(&self.file, VT_GETMODE(), &mut mode) };
        Self::check(ret, Error::GetVtMode)?;
        Ok(mode)
    }

    fn set_vt_mode(&self, mode: &VtMode) -> Result<()> {
        // SAFETY: the fd is valid and mode matches the kernel's layout.
        let ret = unsafe { ioctl_with_ref(&self.file, VT_SETMODE(), mode) };
        Self::check(ret, Error::SetVtMode)
    }

    fn release_display(&self, arg: libc::c_ulong) -> Result<()> {
        // SAFETY: the fd is valid and the argument is passed by value.
        let ret = unsafe { ioctl_with_val(&self.file, VT_RELDISP(), arg) };
        Self::check(ret, Error::ReleaseDisplay)
    }

    fn kd_mode(&self) -> Result<KdMode> {
        let mut mode: libc::c_int = 0;
        // SAFETY: the fd is valid and the kernel writes one int.
        let ret = unsafe { ioctl_with_mut_ref(&self.file, KDGETMODE(), &mut mode) };
        Self::check(ret, Error::GetKdMode)?;
        Ok(KdMode(mode))
    }

    fn set_kd_mode(&self, mode: KdMode) -> Result<()> {
        // SAFETY: the fd is valid and the argument is passed by value.
        let ret = unsafe { ioctl_with_val(&self.file, KDSETMODE(), mode.0 as libc::c_ulong) };
        Self::check(ret, Error::SetKdMode)
    }

    fn kb_mode(&self) -> Result<KbMode> {
        let mut mode: libc::c_int = 0;
        // SAFETY: the fd is valid and the kernel writes one int.
        let ret = unsafe { ioctl_with_mut_ref(&self.file, KDGKBMODE(), &mut mode) };
        Self::check(ret, Error::GetKbMode)?;
        Ok(KbMode(mode))
    }

    fn set_kb_mode(&self, mode: KbMode) -> Result<()> {
        // SAFETY: the fd is valid and the argument is passed by value.
        let ret = unsafe { ioctl_with_val(&self.file, KDSKBMODE(), mode.0 as libc::c_ulong) };
        Self::check(ret, Error::SetKbMode)
    }

    fn termios(&self) -> Result<libc::termios> {
        // SAFETY: termios is plain data, zero is a valid bit pattern.
        let mut termios: libc::termios = unsafe { std::mem::zeroed() };
        // SAFETY: the fd is valid and termios is a valid out pointer.
        let ret = unsafe { libc::tcgetattr(self.file.as_raw_fd(), &mut termios) };
        Self::check(ret, Error::GetTermios)?;
        Ok(termios)
    }

    fn set_termios(&self, termios: &libc::termios, when: SetAttrWhen) -> Result<()> {
        // SAFETY: the fd is valid and termios is a valid in pointer.
        let ret = unsafe { libc::tcsetattr(self.file.as_raw_fd(), when.as_raw(), termios) };
        Self::check(ret, Error::SetTermios)
    }

    fn status_flags(&self) -> Result<libc::c_int> {
        // SAFETY: F_GETFL takes no argument.
        let ret = unsafe { libc::fcntl(self.file.as_raw_fd(), libc::F_GETFL) };
        Self::check(ret, Error::StatusFlags)?;
        Ok(ret)
    }

    fn set_status_flags(&self, flags: libc::c_int) -> Result<()> {
        // SAFETY: F_SETFL takes an int argument.
        let ret = unsafe { libc::fcntl(self.file.as_raw_fd(), libc::F_SETFL, flags) };
        Self::check(ret, Error::StatusFlags)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }

    fn raw_fd(&self) -> Option<RawFd> {
        Some(self.file.as_raw_fd())
    }
}

/// Build the termios used for medium-raw scancode reading from `saved`.
pub fn mediumraw_termios(saved: &libc::termios) -> libc::termios {
    let mut tattr = *saved;
    tattr.c_cflag &= !(libc::IXON | libc::IXOFF);
    tattr.c_lflag &= !(libc::ICANON | libc::ECHO | libc::ISIG);
    tattr.c_iflag = 0;
    tattr.c_cc[libc::VMIN] = 1;
    tattr.c_cc[libc::VTIME] = 0;
    tattr
}

/// Saved terminal state restored in signal context.
#[derive(Clone, Copy)]
pub struct RawRestore {
    pub kd_mode: Option<KdMode>,
    pub vt_mode: Option<VtMode>,
    pub kb_mode: Option<KbMode>,
    pub termios: Option<libc::termios>,
    pub status_flags: Option<libc::c_int>,
    pub activate_vt: i32,
}

/// Put a terminal back into `state` using raw syscalls only.
///
/// Safe to call from a signal handler: no allocation, no locking, every
/// failure ignored.
pub fn restore_raw(fd: RawFd, state: &RawRestore) {
    // SAFETY: all calls below only read their arguments; a bad fd fails.
    unsafe {
        if let Some(termios) = state.termios.as_ref() {
            libc::tcsetattr(fd, libc::TCSANOW, termios);
        }
        if let Some(mode) = state.kb_mode {
            ioctl_with_val(&fd, KDSKBMODE(), mode.0 as libc::c_ulong);
        }
        if let Some(flags) = state.status_flags {
            libc::fcntl(fd, libc::F_SETFL, flags);
        }
        if let Some(mode) = state.kd_mode {
            ioctl_with_val(&fd, KDSETMODE(), mode.0 as libc::c_ulong);
        }
        if let Some(mode) = state.vt_mode.as_ref() {
            ioctl_with_ref(&fd, VT_SETMODE(), mode);
        }
        if state.activate_vt > 0 {
            ioctl_with_val(&fd, VT_ACTIVATE(), state.activate_vt as libc::c_ulong);
        }
    }
}
