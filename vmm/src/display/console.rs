// Copyright 2024 Cloud Hypervisor Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Console session: the VT the display runs on and the terminal state
//! saved for restoration.

use std::path::PathBuf;

use devices::console::{KbMode, KdMode, RawRestore, SetAttrWhen, VtMode, mediumraw_termios};
use devices::{ConsoleDevice, DevicePlatform};
use log::{debug, info, warn};

use super::Result;

/// Terminal settings replaced while in medium-raw mode.
#[derive(Clone, Copy)]
struct SavedInput {
    termios: libc::termios,
    kb_mode: KbMode,
    flags: libc::c_int,
}

pub struct ConsoleSession {
    device: Box<dyn ConsoleDevice>,
    vtno: i32,
    /// VT that was active before a fresh one was allocated.
    displaced_vt: Option<i32>,
    kd_mode: Option<KdMode>,
    vt_mode: Option<VtMode>,
    saved_input: Option<SavedInput>,
    input_armed: bool,
}

impl ConsoleSession {
    /// Open the VT to display on and make it active.
    ///
    /// Uses the controlling terminal when it is a VT, otherwise allocates
    /// a free one through `/dev/tty0`.
    pub fn open(platform: &mut dyn DevicePlatform) -> Result<Self> {
        let stdin = platform.controlling_console()?;
        let (device, vtno, displaced_vt) = match stdin.vt_state() {
            Ok(vts) => {
                let vtno = i32::from(vts.v_active);
                info!("Started at vt {vtno}, using it");
                (stdin, vtno, None)
            }
            Err(e) => {
                info!("Not started from a virtual terminal ({e}), trying to open one");
                drop(stdin);
                let tty0 = platform.open_console(&PathBuf::from("/dev/tty0"))?;
                let vtno = tty0.open_query()?;
                let active = i32::from(tty0.vt_state()?.v_active);
                drop(tty0);
                let device = platform.open_console(&PathBuf::from(format!("/dev/tty{vtno}")))?;
                info!("Switching to vt {vtno} (current {active})");
                (device, vtno, Some(active))
            }
        };

        let mut session = Self {
            device,
            vtno,
            displaced_vt,
            kd_mode: None,
            vt_mode: None,
            saved_input: None,
            input_armed: false,
        };
        session.activate_vt(vtno, true);
        Ok(session)
    }

    /// Remember the display and switching modes restored at teardown.
    pub fn save_modes(&mut self) -> Result<()> {
        self.kd_mode = Some(self.device.kd_mode()?);
        self.vt_mode = Some(self.device.vt_mode()?);
        Ok(())
    }

    pub fn device(&self) -> &dyn ConsoleDevice {
        self.device.as_ref()
    }

    pub fn device_mut(&mut self) -> &mut dyn ConsoleDevice {
        self.device.as_mut()
    }

    pub fn vtno(&self) -> i32 {
        self.vtno
    }

    pub fn displaced_vt(&self) -> Option<i32> {
        self.displaced_vt
    }

    /// Ask the kernel to switch to `vtno`, optionally waiting for it.
    ///
    /// Failures are logged; switching is best effort.
    pub fn activate_vt(&self, vtno: i32, wait: bool) -> bool {
        debug!("Activating vt {vtno} (wait {wait})");
        if let Err(e) = self.device.activate(vtno) {
            warn!("{e}");
            return false;
        }
        if wait {
            if let Err(e) = self.device.wait_active(vtno) {
                warn!("{e}");
                return false;
            }
        }
        true
    }

    pub fn set_graphics(&self) -> Result<()> {
        self.device.set_kd_mode(KdMode::GRAPHICS)?;
        Ok(())
    }

    /// Put back the display mode found at startup.
    pub fn restore_kd_mode(&self) {
        if let Some(mode) = self.kd_mode {
            if let Err(e) = self.device.set_kd_mode(mode) {
                warn!("{e}");
            }
        }
    }

    pub fn restore_vt_mode(&self) {
        if let Some(mode) = self.vt_mode.as_ref() {
            if let Err(e) = self.device.set_vt_mode(mode) {
                warn!("{e}");
            }
        }
    }

    pub fn release_display(&self, arg: libc::c_ulong) {
        if let Err(e) = self.device.release_display(arg) {
            warn!("{e}");
        }
    }

    pub fn is_mediumraw(&self) -> bool {
        self.saved_input.is_some()
    }

    /// Switch the keyboard to medium-raw scancodes with non-blocking reads.
    pub fn start_mediumraw(&mut self) -> Result<()> {
        if self.is_mediumraw() {
            return Ok(());
        }
        let saved = SavedInput {
            termios: self.device.termios()?,
            kb_mode: self.device.kb_mode()?,
            flags: self.device.status_flags()?,
        };

        self.device
            .set_termios(&mediumraw_termios(&saved.termios), SetAttrWhen::Flush)?;
        self.saved_input = Some(saved);
        self.device.set_kb_mode(KbMode::MEDIUMRAW)?;
        self.device.set_status_flags(saved.flags | libc::O_NONBLOCK)?;
        debug!("Console keyboard in medium-raw mode");
        Ok(())
    }

    /// Restore the terminal settings replaced by [`Self::start_mediumraw`].
    pub fn stop_mediumraw(&mut self) {
        let Some(saved) = self.saved_input.take() else {
            return;
        };
        if let Err(e) = self.device.set_termios(&saved.termios, SetAttrWhen::Now) {
            warn!("{e}");
        }
        if let Err(e) = self.device.set_kb_mode(saved.kb_mode) {
            warn!("{e}");
        }
        if let Err(e) = self.device.set_status_flags(saved.flags) {
            warn!("{e}");
        }
        debug!("Console keyboard restored");
    }

    pub fn arm_input(&mut self) {
        self.input_armed = true;
    }

    pub fn disarm_input(&mut self) {
        self.input_armed = false;
    }

    pub fn is_input_armed(&self) -> bool {
        self.input_armed
    }

    /// Saved state in a form the fatal signal path can replay.
    pub fn raw_restore(&self) -> RawRestore {
        RawRestore {
            kd_mode: self.kd_mode,
            vt_mode: self.vt_mode,
            kb_mode: self.saved_input.map(|s| s.kb_mode),
            termios: self.saved_input.map(|s| s.termios),
            status_flags: self.saved_input.map(|s| s.flags),
            activate_vt: self.displaced_vt.unwrap_or(0),
        }
    }

    /// Undo everything done to the terminal, best effort.
    pub fn restore(&mut self) {
        self.disarm_input();
        self.stop_mediumraw();
        self.restore_kd_mode();
        self.restore_vt_mode();
        if let Some(vtno) = self.displaced_vt {
            self.activate_vt(vtno, true);
        }
    }
}
