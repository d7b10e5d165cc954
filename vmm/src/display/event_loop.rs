// Copyright 2024 Cloud Hypervisor Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Display event loop
//!
//! Waits on the backend input descriptors with epoll and runs the refresh
//! poll at the backend interval. Runs until the stop flag is raised or a
//! fatal error ends the display; the backend is uninitialized either way.

use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::{debug, error};

use super::registry::{DisplayBackend, InputSource};
use super::{Error, GuestDisplay, Result};
use crate::input::InputSink;

const MAX_EVENTS: usize = 8;

/// Epoll instance watching the backend descriptors.
struct EpollContext {
    fd: RawFd,
    sources: Vec<InputSource>,
}

impl EpollContext {
    fn new() -> io::Result<Self> {
        Ok(Self {
            fd: epoll::create(true)?,
            sources: Vec::new(),
        })
    }

    fn add(&mut self, source: InputSource, fd: RawFd) -> io::Result<()> {
        let token = self.sources.len() as u64;
        epoll::ctl(
            self.fd,
            epoll::ControlOptions::EPOLL_CTL_ADD,
            fd,
            epoll::Event::new(epoll::Events::EPOLLIN, token),
        )?;
        self.sources.push(source);
        Ok(())
    }

    /// Wait up to `timeout` and return the ready sources.
    fn wait(&self, timeout: Duration) -> io::Result<Vec<InputSource>> {
        let mut events = [epoll::Event::new(epoll::Events::empty(), 0); MAX_EVENTS];
        let timeout_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        let count = match epoll::wait(self.fd, timeout_ms, &mut events) {
            Ok(count) => count,
            // VT switch signals interrupt the wait.
            Err(e) if e.kind() == io::ErrorKind::Interrupted => 0,
            Err(e) => return Err(e),
        };
        Ok(events[..count]
            .iter()
            .filter_map(|event| {
                let token = event.data;
                self.sources.get(token as usize).copied()
            })
            .collect())
    }
}

impl Drop for EpollContext {
    fn drop(&mut self) {
        if let Err(e) = epoll::close(self.fd) {
            debug!("Failed to close epoll descriptor: {e}");
        }
    }
}

/// Drive `backend` until `stop` is set or a fatal error occurs.
pub fn run(
    backend: &mut dyn DisplayBackend,
    guest: &mut dyn GuestDisplay,
    input: &mut dyn InputSink,
    stop: &AtomicBool,
) -> Result<()> {
    let result = dispatch(backend, guest, input, stop);
    backend.uninit(guest);
    if let Err(e) = &result {
        error!("Display event loop ended: {e}");
    }
    result
}

fn dispatch(
    backend: &mut dyn DisplayBackend,
    guest: &mut dyn GuestDisplay,
    input: &mut dyn InputSink,
    stop: &AtomicBool,
) -> Result<()> {
    let mut epoll = EpollContext::new().map_err(Error::Epoll)?;
    for (source, fd) in backend.input_fds() {
        epoll.add(source, fd).map_err(Error::Epoll)?;
    }

    let interval = backend.refresh_interval();
    let mut next_refresh = Instant::now();
    while !stop.load(Ordering::SeqCst) {
        let timeout = next_refresh.saturating_duration_since(Instant::now());
        for source in epoll.wait(timeout).map_err(Error::Epoll)? {
            backend.handle_input(source, guest, input)?;
        }

        let now = Instant::now();
        if now >= next_refresh {
            backend.refresh(guest, input)?;
            next_refresh = now + interval;
        }
    }
    debug!("Display event loop stopped");
    Ok(())
}
