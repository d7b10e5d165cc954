// Copyright 2024 Cloud Hypervisor Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Console restoration on fatal signals and process exit
//!
//! A crashed display must not leave the console in graphics mode with the
//! keyboard in medium-raw. While a display is running its saved terminal
//! and video state is published here; the fatal signal handler and the
//! `atexit` hook replay it with raw syscalls only.

use std::os::fd::RawFd;
use std::ptr;
use std::sync::Once;
use std::sync::atomic::{AtomicPtr, Ordering};

use devices::FbVarScreenInfo;
use devices::console::{RawRestore, restore_raw};
use devices::fbdev::restore_var_screeninfo_raw;
use log::debug;
use vmm_sys_util::signal::register_signal_handler;

use super::{Error, Result};

/// Signals that restore the console before the process dies.
pub const FATAL_SIGNALS: [libc::c_int; 6] = [
    libc::SIGQUIT,
    libc::SIGILL,
    libc::SIGABRT,
    libc::SIGFPE,
    libc::SIGSEGV,
    libc::SIGBUS,
];

/// State needed to give the console back without the display objects.
#[derive(Clone, Copy)]
pub struct CrashRecord {
    pub console_fd: RawFd,
    pub console: RawRestore,
    pub fb_fd: RawFd,
    pub fb_var: FbVarScreenInfo,
}

/// Owner of the published record.
pub struct CrashSlot {
    record: AtomicPtr<CrashRecord>,
}

impl CrashSlot {
    pub const fn new() -> Self {
        Self {
            record: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Publish `record`, replacing any earlier one.
    pub fn arm(&self, record: CrashRecord) {
        let new = Box::into_raw(Box::new(record));
        self.release(self.record.swap(new, Ordering::SeqCst));
    }

    /// Withdraw the published record.
    pub fn disarm(&self) {
        self.release(self.record.swap(ptr::null_mut(), Ordering::SeqCst));
    }

    pub fn is_armed(&self) -> bool {
        !self.record.load(Ordering::SeqCst).is_null()
    }

    fn release(&self, old: *mut CrashRecord) {
        if !old.is_null() {
            // SAFETY: non-null values stored in the slot always come from
            // Box::into_raw, and the swap handed ownership back to us.
            drop(unsafe { Box::from_raw(old) });
        }
    }

    /// Replay the published record once.
    ///
    /// Signal safe: no allocation and no locks. The record is leaked.
    pub fn restore(&self) -> bool {
        let record = self.record.swap(ptr::null_mut(), Ordering::SeqCst);
        if record.is_null() {
            return false;
        }
        // SAFETY: the pointer came from Box::into_raw and the swap made this
        // the only owner.
        let record = unsafe { &*record };
        if record.console_fd >= 0 {
            restore_raw(record.console_fd, &record.console);
        }
        if record.fb_fd >= 0 {
            restore_var_screeninfo_raw(record.fb_fd, &record.fb_var);
        }
        true
    }
}

impl Default for CrashSlot {
    fn default() -> Self {
        Self::new()
    }
}

static CRASH_RECORD: CrashSlot = CrashSlot::new();
static EXIT_HOOK: Once = Once::new();

/// Publish `record` for the fatal signal and exit paths.
pub fn arm(record: CrashRecord) {
    CRASH_RECORD.arm(record);
}

/// Withdraw the published record; the exit hook becomes a no-op.
pub fn disarm() {
    CRASH_RECORD.disarm();
}

pub fn is_armed() -> bool {
    CRASH_RECORD.is_armed()
}

extern "C" fn fatal_signal_handler(
    _num: libc::c_int,
    _info: *mut libc::siginfo_t,
    _ctx: *mut libc::c_void,
) {
    CRASH_RECORD.restore();
    // SAFETY: resetting a disposition and aborting have no memory safety
    // requirements.
    unsafe {
        libc::signal(libc::SIGABRT, libc::SIG_DFL);
        libc::abort();
    }
}

extern "C" fn exit_hook() {
    CRASH_RECORD.restore();
}

/// Route the fatal signals to the console restoring handler.
pub fn install_fatal_handlers() -> Result<()> {
    for signal in FATAL_SIGNALS {
        register_signal_handler(signal, fatal_signal_handler)
            .map_err(|e| Error::FatalSignal(e, signal))?;
    }
    debug!("Fatal signal handlers installed");
    Ok(())
}

/// Restore the console at process exit. Registered once per process.
pub fn register_exit_hook() {
    EXIT_HOOK.call_once(|| {
        // SAFETY: exit_hook is a plain extern "C" function without arguments.
        if unsafe { libc::atexit(exit_hook) } != 0 {
            log::warn!("Failed to register console exit hook");
        }
    });
}
