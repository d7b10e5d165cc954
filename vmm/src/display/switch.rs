// Copyright 2024 Cloud Hypervisor Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Virtual terminal switch coordination
//!
//! With `VT_PROCESS` mode the kernel asks the owning process, by signal,
//! to give up or take back the display. The handlers installed here only
//! record the request; the refresh poll performs the device work and
//! completes the transition:
//!
//! ```text
//!   ACTIVE ──release signal──▶ RELEASE_REQUESTED ──poll──▶ INACTIVE
//!     ▲                                                       │
//!     └──poll── ACQUIRE_REQUESTED ◀──acquire signal───────────┘
//! ```

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use devices::ConsoleDevice;
use devices::console::{VT_PROCESS, VtMode};
use log::{debug, warn};
use signal_hook::SigId;

use super::{Error, Result};

/// Display ownership state of the VT.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum SwitchState {
    Active = 0,
    ReleaseRequested = 1,
    Inactive = 2,
    AcquireRequested = 3,
}

impl SwitchState {
    fn from_raw(raw: usize) -> Self {
        match raw {
            1 => SwitchState::ReleaseRequested,
            2 => SwitchState::Inactive,
            3 => SwitchState::AcquireRequested,
            _ => SwitchState::Active,
        }
    }
}

/// Signal the kernel sends to request a release.
pub fn release_signal() -> libc::c_int {
    libc::SIGRTMIN() + 7
}

/// Signal the kernel sends to announce an acquisition.
pub fn acquire_signal() -> libc::c_int {
    libc::SIGRTMIN() + 6
}

/// Switch state shared with the VT signal handlers.
pub struct VtSwitch {
    state: Arc<AtomicUsize>,
    sig_ids: Vec<SigId>,
}

impl Default for VtSwitch {
    fn default() -> Self {
        Self::new()
    }
}

impl VtSwitch {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicUsize::new(SwitchState::Active as usize)),
            sig_ids: Vec::new(),
        }
    }

    pub fn state(&self) -> SwitchState {
        SwitchState::from_raw(self.state.load(Ordering::SeqCst))
    }

    pub fn is_active(&self) -> bool {
        self.state() == SwitchState::Active
    }

    pub fn is_installed(&self) -> bool {
        !self.sig_ids.is_empty()
    }

    /// Hand VT switching over to this process.
    ///
    /// Registers the release and acquire signals, then puts the terminal
    /// in `VT_PROCESS` mode.
    pub fn install(&mut self, console: &dyn ConsoleDevice) -> Result<()> {
        if self.is_installed() {
            return Ok(());
        }
        for (signal, state) in [
            (release_signal(), SwitchState::ReleaseRequested),
            (acquire_signal(), SwitchState::AcquireRequested),
        ] {
            match signal_hook::flag::register_usize(signal, self.state.clone(), state as usize) {
                Ok(id) => self.sig_ids.push(id),
                Err(e) => {
                    self.uninstall();
                    return Err(Error::Signal(e, signal));
                }
            }
        }

        if let Err(e) = Self::set_process_mode(console) {
            self.uninstall();
            return Err(e);
        }
        debug!(
            "VT switching installed (release {}, acquire {})",
            release_signal(),
            acquire_signal()
        );
        Ok(())
    }

    fn set_process_mode(console: &dyn ConsoleDevice) -> Result<()> {
        let mut mode: VtMode = console.vt_mode()?;
        mode.mode = VT_PROCESS;
        mode.waitv = 0;
        mode.relsig = release_signal() as i16;
        mode.acqsig = acquire_signal() as i16;
        console.set_vt_mode(&mode)?;
        Ok(())
    }

    /// Drop the signal actions. The VT mode itself is restored by the
    /// console session.
    pub fn uninstall(&mut self) {
        for id in self.sig_ids.drain(..) {
            if !signal_hook::low_level::unregister(id) {
                warn!("VT switch signal action was already gone");
            }
        }
    }

    /// Record a release request, as the release signal does.
    pub fn signal_release(&self) {
        self.state
            .store(SwitchState::ReleaseRequested as usize, Ordering::SeqCst);
    }

    /// Record an acquire request, as the acquire signal does.
    pub fn signal_acquire(&self) {
        self.state
            .store(SwitchState::AcquireRequested as usize, Ordering::SeqCst);
    }

    /// Move from `from` to `to` unless a signal changed the state meanwhile.
    pub fn complete(&self, from: SwitchState, to: SwitchState) -> bool {
        self.state
            .compare_exchange(from as usize, to as usize, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Raise `signal` in this process; used to exercise the real handlers.
    pub fn raise(signal: libc::c_int) -> io::Result<()> {
        // SAFETY: raise has no memory safety requirements.
        if unsafe { libc::raise(signal) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for VtSwitch {
    fn drop(&mut self) {
        self.uninstall();
    }
}
