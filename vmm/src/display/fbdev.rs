// Copyright 2024 Cloud Hypervisor Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Linux framebuffer display
//!
//! Ties the framebuffer session, VT switching, console keyboard, mouse and
//! compositor together and exposes them as a [`DisplayChangeListener`].

use std::io;
use std::ops::ControlFlow;
use std::sync::Arc;

use devices::DevicePlatform;
use devices::console::{VT_ACKACQ, VT_RELEASE};
use log::{debug, error, info, warn};

use super::compositor::Compositor;
use super::keyboard::{KeyAction, KeyState, Keyboard};
use super::keymap::{send_keysym, send_scancode};
use super::mouse::MouseForwarder;
use super::options::DisplayOptions;
use super::region::Rect;
use super::session::FramebufferSession;
use super::switch::{SwitchState, VtSwitch};
use super::{Cursor, DisplayChangeListener, DisplaySurface, Error, GuestDisplay, ListenerId, Result, crash};
use crate::input::InputSink;

/// Listener name registered with the guest display.
pub const LISTENER_NAME: &str = "fbdev";

/// Console bytes read per input event.
const CONSOLE_READ_SIZE: usize = 32;

pub struct FbdevDisplay {
    session: FramebufferSession,
    switch: VtSwitch,
    keyboard: Keyboard,
    compositor: Compositor,
    mouse: Option<MouseForwarder>,
    listener: Option<ListenerId>,
}

impl FbdevDisplay {
    /// Take over the framebuffer and console and attach to `guest`.
    ///
    /// Anything acquired before a failure is released again.
    pub fn start(
        platform: &mut dyn DevicePlatform,
        options: &DisplayOptions,
        guest: &mut dyn GuestDisplay,
    ) -> Result<Self> {
        let device = options.resolve_device(|key| std::env::var_os(key));
        let session = FramebufferSession::open(platform, &device)?;

        // Armed before VT_PROCESS mode so a crash from here on restores the VT.
        crash::install_fatal_handlers()?;
        if let Some(record) = session.crash_record() {
            crash::arm(record);
        }
        crash::register_exit_hook();

        let mut switch = VtSwitch::new();
        if let Some(console) = session.console() {
            switch.install(console.device()).inspect_err(|_| crash::disarm())?;
        }

        let geometry = session.geometry();
        let compositor = Compositor::new(geometry.width, geometry.height, options.scale, options.filter)
            .inspect_err(|_| crash::disarm())?;

        let mouse = match platform.open_pointer(&options.mouse_device) {
            Ok(device) => Some(MouseForwarder::new(device)),
            Err(e) => {
                warn!("Mouse unavailable: {e}");
                None
            }
        };

        let listener = guest.register_listener(LISTENER_NAME);
        info!(
            "fbdev display started on {} ({}x{}, scaling {}, filter {})",
            device.display(),
            geometry.width,
            geometry.height,
            if options.scale { "on" } else { "off" },
            options.filter
        );

        Ok(Self {
            session,
            switch,
            keyboard: Keyboard::new(),
            compositor,
            mouse,
            listener: Some(listener),
        })
    }

    /// Detach from `guest` and give the console back.
    pub fn stop(&mut self, guest: &mut dyn GuestDisplay) {
        if let Some(id) = self.listener.take() {
            guest.unregister_listener(id);
        }
        self.shutdown();
        self.mouse = None;
    }

    fn shutdown(&mut self) {
        self.switch.uninstall();
        self.session.teardown();
        crash::disarm();
    }

    pub fn is_running(&self) -> bool {
        self.session.is_open()
    }

    pub fn switch(&self) -> &VtSwitch {
        &self.switch
    }

    pub fn keyboard(&self) -> &Keyboard {
        &self.keyboard
    }

    pub fn compositor(&self) -> &Compositor {
        &self.compositor
    }

    pub fn session(&self) -> &FramebufferSession {
        &self.session
    }

    pub fn has_mouse(&self) -> bool {
        self.mouse.is_some()
    }

    pub fn console_fd(&self) -> Option<std::os::fd::RawFd> {
        self.session.console()?.device().raw_fd()
    }

    pub fn pointer_fd(&self) -> Option<std::os::fd::RawFd> {
        self.mouse.as_ref()?.raw_fd()
    }

    /// Console readable: decode keys and act on them.
    ///
    /// Read failures and the emergency hotkey tear the display down and
    /// return the cause.
    pub fn handle_console_input(
        &mut self,
        guest: &mut dyn GuestDisplay,
        input: &mut dyn InputSink,
    ) -> Result<()> {
        let Some(console) = self.session.console_mut() else {
            return Ok(());
        };
        let mut buf = [0u8; CONSOLE_READ_SIZE];
        let len = match console.device_mut().read(&mut buf) {
            Ok(0) => {
                error!("Console input closed");
                self.shutdown();
                return Err(Error::ConsoleEof);
            }
            Ok(len) => len,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::Interrupted => {
                return Ok(());
            }
            Err(e) => {
                error!("Console read failed: {e}");
                self.shutdown();
                return Err(Error::ConsoleRead(e));
            }
        };
        if !self.switch.is_active() || !console.is_input_armed() {
            return Ok(());
        }

        let compositor = &mut self.compositor;
        let flow = self.keyboard.feed(&buf[..len], |keys, action| {
            match action {
                KeyAction::EmergencyEscape => return ControlFlow::Break(Error::EmergencyEscape),
                KeyAction::ToggleScale => compositor.toggle_scale(),
                KeyAction::SwitchVt(vtno) => {
                    console.activate_vt(vtno, false);
                }
                KeyAction::SelectConsole(index) => {
                    debug!("Selecting guest console {index}");
                    guest.select_console(index);
                    reset_keys(keys, guest, input);
                }
                KeyAction::Forward { code, down, shift } => {
                    if guest.is_graphic() {
                        send_scancode(input, code, down);
                    } else if down {
                        send_keysym(input, code, shift);
                    }
                }
            }
            ControlFlow::Continue(())
        });

        if let ControlFlow::Break(e) = flow {
            info!("Emergency escape, restoring the console");
            self.shutdown();
            return Err(e);
        }
        Ok(())
    }

    /// Mouse readable: forward the packet while the display is active.
    pub fn handle_pointer_input(&mut self, input: &mut dyn InputSink) {
        let active = self.switch.is_active() && self.session.is_open();
        let extent = self.compositor.pointer_extent();
        if let Some(mouse) = self.mouse.as_mut() {
            mouse.handle_input(active, extent, input);
        }
    }

    fn release_vt(&mut self) {
        debug!("Releasing vt");
        if let Some(console) = self.session.console_mut() {
            console.stop_mediumraw();
            console.restore_kd_mode();
            console.release_display(VT_RELEASE);
        }
        if !self.switch.complete(SwitchState::ReleaseRequested, SwitchState::Inactive) {
            debug!("Switch request changed during release");
        }
    }

    fn acquire_vt(&mut self, guest: &dyn GuestDisplay, input: &mut dyn InputSink) -> Result<()> {
        debug!("Acquiring vt");
        if let Some(console) = self.session.console_mut() {
            console.release_display(VT_ACKACQ);
            console.start_mediumraw()?;
            reset_keys(self.keyboard.keys_mut(), guest, input);
            console.set_graphics()?;
        }
        self.compositor.request_redraw();
        if !self.switch.complete(SwitchState::AcquireRequested, SwitchState::Active) {
            debug!("Switch request changed during acquire");
        }
        // The saved terminal settings were captured again.
        if let Some(record) = self.session.crash_record() {
            crash::arm(record);
        }
        Ok(())
    }

    fn render(&mut self, guest: &mut dyn GuestDisplay) -> Result<()> {
        guest.update(self);
        let (Some(surface), Some(mut target)) = (guest.surface(), self.session.target()) else {
            return Ok(());
        };
        self.compositor.render(surface, &mut target)
    }
}

/// Release every key still held, telling a graphical guest about it.
fn reset_keys(keys: &mut KeyState, guest: &dyn GuestDisplay, input: &mut dyn InputSink) {
    let graphic = guest.is_graphic();
    keys.release_all(|code| {
        if graphic {
            send_scancode(input, code, false);
        }
    });
}

impl DisplayChangeListener for FbdevDisplay {
    fn name(&self) -> &str {
        LISTENER_NAME
    }

    fn gfx_update(&mut self, x: i32, y: i32, w: i32, h: i32) {
        if !self.switch.is_active() {
            return;
        }
        self.compositor.damage(Rect::new(x, y, w, h));
    }

    fn gfx_switch(&mut self, surface: &DisplaySurface) {
        debug!("Guest surface {}x{}", surface.width, surface.height);
        self.compositor.surface_switch(surface.width, surface.height);
    }

    fn refresh(&mut self, guest: &mut dyn GuestDisplay, input: &mut dyn InputSink) -> Result<()> {
        if !self.session.is_open() {
            return Ok(());
        }
        match self.switch.state() {
            SwitchState::ReleaseRequested => {
                self.release_vt();
                return Ok(());
            }
            SwitchState::Inactive => return Ok(()),
            SwitchState::AcquireRequested => self.acquire_vt(guest, input)?,
            SwitchState::Active => {}
        }
        self.render(guest)
    }

    fn mouse_set(&mut self, x: i32, y: i32, visible: bool) {
        self.compositor.set_pointer(x, y, visible);
    }

    fn cursor_define(&mut self, cursor: Option<Arc<Cursor>>) {
        self.compositor.define_cursor(cursor);
    }
}

impl Drop for FbdevDisplay {
    fn drop(&mut self) {
        if self.session.is_open() {
            self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use devices::{KbMode, KdMode};

    use super::*;
    use crate::display::keymap::{KEY_1, KEY_2, KEY_A, KEY_ESC, KEY_F3, KEY_LEFTALT, KEY_LEFTCTRL, KEY_LEFTSHIFT, KEY_S};
    use crate::display::FilterMode;
    use crate::display::testing::{ConsoleRead, FakeGuest, FakePlatform, GuestChange, SharedState};
    use crate::input::{Axis, EventQueue, InputEvent, Keysym, MouseButton};

    fn options() -> DisplayOptions {
        DisplayOptions {
            device: Some(PathBuf::from("/dev/fb-test")),
            filter: FilterMode::Fast,
            ..Default::default()
        }
    }

    fn start(guest: &mut FakeGuest) -> (FbdevDisplay, SharedState) {
        let (mut platform, state) = FakePlatform::new();
        let display = FbdevDisplay::start(&mut platform, &options(), guest).unwrap();
        (display, state)
    }

    fn type_keys(state: &SharedState, bytes: &[u8]) {
        state
            .borrow_mut()
            .console_input
            .push_back(ConsoleRead::Data(bytes.to_vec()));
    }

    fn down(key: u16) -> u8 {
        key as u8
    }

    fn up(key: u16) -> u8 {
        key as u8 | 0x80
    }

    #[test]
    fn test_start_and_stop() {
        let mut guest = FakeGuest::new(true);
        let (mut display, state) = start(&mut guest);

        assert!(display.is_running());
        assert!(display.switch().is_installed());
        assert!(display.switch().is_active());
        assert!(!display.has_mouse());
        assert_eq!(guest.listeners.len(), 1);
        assert_eq!(guest.listeners[0].1, LISTENER_NAME);
        assert_eq!(state.borrow().vt_mode.mode, devices::console::VT_PROCESS);

        display.stop(&mut guest);
        assert!(!display.is_running());
        assert!(!display.switch().is_installed());
        assert!(guest.listeners.is_empty());
        let state = state.borrow();
        assert_eq!(state.kd_mode, KdMode::TEXT);
        assert_eq!(state.kb_mode, KbMode::XLATE);
        assert_eq!(state.vt_mode.mode, devices::console::VT_AUTO);
    }

    #[test]
    fn test_keys_forwarded_as_scancodes() {
        let mut guest = FakeGuest::new(true);
        let (mut display, state) = start(&mut guest);
        let mut queue = EventQueue::default();

        type_keys(&state, &[down(KEY_A), up(KEY_A), up(KEY_A)]);
        display.handle_console_input(&mut guest, &mut queue).unwrap();
        // Nothing pending.
        display.handle_console_input(&mut guest, &mut queue).unwrap();

        assert_eq!(
            queue.drain(),
            vec![InputEvent::key_down(0x1e), InputEvent::key_up(0x1e)]
        );
    }

    #[test]
    fn test_text_console_gets_keysyms() {
        let mut guest = FakeGuest::new(false);
        let (mut display, state) = start(&mut guest);
        let mut queue = EventQueue::default();

        type_keys(
            &state,
            &[down(KEY_A), up(KEY_A), down(KEY_LEFTSHIFT), down(KEY_A), up(KEY_A)],
        );
        display.handle_console_input(&mut guest, &mut queue).unwrap();

        assert_eq!(
            queue.drain(),
            vec![
                InputEvent::keysym(Keysym::Char('a')),
                InputEvent::keysym(Keysym::Char('A')),
            ]
        );
    }

    #[test]
    fn test_emergency_escape_tears_down() {
        let mut guest = FakeGuest::new(true);
        let (mut display, state) = start(&mut guest);
        let mut queue = EventQueue::default();

        type_keys(&state, &[down(KEY_LEFTCTRL), down(KEY_LEFTALT), down(KEY_ESC), up(KEY_ESC)]);
        let result = display.handle_console_input(&mut guest, &mut queue);
        assert!(matches!(result, Err(Error::EmergencyEscape)));

        let events = queue.drain();
        assert!(!events.contains(&InputEvent::key_down(0x01)));
        assert!(!events.contains(&InputEvent::key_up(0x01)));
        assert!(!display.is_running());
        assert!(display.session().crash_record().is_none());
        let state = state.borrow();
        assert_eq!(state.kd_mode, KdMode::TEXT);
        assert_eq!(state.kb_mode, KbMode::XLATE);
    }

    #[test]
    fn test_console_eof_and_failure() {
        let mut guest = FakeGuest::new(true);
        let mut queue = EventQueue::default();

        let (mut display, state) = start(&mut guest);
        state.borrow_mut().console_input.push_back(ConsoleRead::Eof);
        let result = display.handle_console_input(&mut guest, &mut queue);
        assert!(matches!(result, Err(Error::ConsoleEof)));
        assert!(!display.is_running());

        let (mut display, state) = start(&mut guest);
        state.borrow_mut().console_input.push_back(ConsoleRead::Fail);
        let result = display.handle_console_input(&mut guest, &mut queue);
        assert!(matches!(result, Err(Error::ConsoleRead(_))));
        assert_eq!(state.borrow().kd_mode, KdMode::TEXT);
    }

    #[test]
    fn test_hotkeys() {
        let mut guest = FakeGuest::new(true);
        let (mut display, state) = start(&mut guest);
        let mut queue = EventQueue::default();

        type_keys(
            &state,
            &[
                down(KEY_LEFTCTRL),
                down(KEY_LEFTALT),
                down(KEY_F3),
                down(KEY_S),
                up(KEY_S),
                down(KEY_2),
            ],
        );
        display.handle_console_input(&mut guest, &mut queue).unwrap();

        assert!(state.borrow().called("activate 3"));
        assert!(display.compositor().is_scaling());
        assert_eq!(guest.selected, vec![1]);
        assert!(!display.keyboard().keys().any_down());

        // The hotkey presses are consumed but the S release is not; the
        // console selection releases everything still held.
        assert_eq!(
            queue.drain(),
            vec![
                InputEvent::key_down(0x1d),
                InputEvent::key_down(0x38),
                InputEvent::key_up(0x1f),
                InputEvent::key_up(0x03),
                InputEvent::key_up(0x1d),
                InputEvent::key_up(0x38),
            ]
        );

        // Releases of keys dropped by the selection are not forwarded.
        type_keys(&state, &[up(KEY_2), up(KEY_LEFTALT), down(KEY_1)]);
        display.handle_console_input(&mut guest, &mut queue).unwrap();
        assert_eq!(queue.drain(), vec![InputEvent::key_down(0x02)]);
    }

    #[test]
    fn test_release_and_acquire() {
        let mut guest = FakeGuest::new(true);
        let (mut display, state) = start(&mut guest);
        let mut queue = EventQueue::default();

        type_keys(&state, &[down(KEY_A)]);
        display.handle_console_input(&mut guest, &mut queue).unwrap();
        assert!(display.keyboard().keys().is_down(KEY_A));
        queue.clear();

        display.switch().signal_release();
        display.refresh(&mut guest, &mut queue).unwrap();
        assert_eq!(display.switch().state(), SwitchState::Inactive);
        assert_eq!(guest.updates, 0);
        {
            let state = state.borrow();
            assert!(state.called("release_display 1"));
            assert_eq!(state.kd_mode, KdMode::TEXT);
            assert_eq!(state.kb_mode, KbMode::XLATE);
        }

        // Input and damage are ignored while switched away.
        type_keys(&state, &[down(KEY_S)]);
        display.handle_console_input(&mut guest, &mut queue).unwrap();
        display.gfx_update(0, 0, 4, 4);
        display.refresh(&mut guest, &mut queue).unwrap();
        assert!(queue.is_empty());
        assert!(display.compositor().dirty().is_empty());

        display.switch().signal_acquire();
        display.refresh(&mut guest, &mut queue).unwrap();
        assert!(display.switch().is_active());
        assert!(!display.keyboard().keys().any_down());
        assert!(display.compositor().is_redraw_pending());
        assert_eq!(guest.updates, 1);
        assert_eq!(queue.drain(), vec![InputEvent::key_up(0x1e)]);
        let state = state.borrow();
        assert!(state.called("release_display 2"));
        assert_eq!(state.kd_mode, KdMode::GRAPHICS);
        assert_eq!(state.kb_mode, KbMode::MEDIUMRAW);
    }

    #[test]
    fn test_refresh_renders_guest() {
        let mut guest = FakeGuest::new(true);
        let (mut display, _state) = start(&mut guest);
        let mut queue = EventQueue::default();

        guest.show(32, 24, 0x0000_ff00);
        display.refresh(&mut guest, &mut queue).unwrap();

        let transform = display.compositor().transform();
        assert_eq!((transform.cx, transform.cy), (16, 12));
        let bytes = display.session().visible_bytes().unwrap();
        let pixel = |x: usize, y: usize| {
            let i = (y * 64 + x) * 4;
            u32::from_ne_bytes(bytes[i..i + 4].try_into().unwrap())
        };
        assert_eq!(pixel(16, 12) & 0x00ff_ffff, 0x0000_ff00);
        assert_eq!(pixel(47, 35) & 0x00ff_ffff, 0x0000_ff00);
        assert_eq!(pixel(15, 12), 0);
        assert_eq!(pixel(48, 36), 0);
    }

    #[test]
    fn test_cursor_outside_surface_not_drawn() {
        let mut guest = FakeGuest::new(true);
        let (mut display, _state) = start(&mut guest);
        let mut queue = EventQueue::default();

        guest.show(32, 24, 0);
        let cursor = Cursor {
            width: 2,
            height: 2,
            hot_x: 0,
            hot_y: 0,
            pixels: vec![0xffff_ffff; 4],
        };
        guest.pending.push_back(GuestChange::Cursor(Some(Arc::new(cursor))));
        guest.pending.push_back(GuestChange::Pointer(-1, 0, true));
        display.refresh(&mut guest, &mut queue).unwrap();

        let bytes = display.session().visible_bytes().unwrap();
        assert!(bytes.iter().all(|&b| b == 0 || b == 0xff));
        let white = bytes
            .chunks_exact(4)
            .filter(|px| px[..3] == [0xff, 0xff, 0xff])
            .count();
        assert_eq!(white, 0);

        guest.pending.push_back(GuestChange::Pointer(0, 0, true));
        display.refresh(&mut guest, &mut queue).unwrap();
        let bytes = display.session().visible_bytes().unwrap();
        let white = bytes
            .chunks_exact(4)
            .filter(|px| px[..3] == [0xff, 0xff, 0xff])
            .count();
        assert_eq!(white, 4);
    }

    #[test]
    fn test_cursor_redrawn_after_acquire() {
        let mut guest = FakeGuest::new(true);
        let (mut display, _state) = start(&mut guest);
        let mut queue = EventQueue::default();
        let white_pixels = |display: &FbdevDisplay| {
            display
                .session()
                .visible_bytes()
                .unwrap()
                .chunks_exact(4)
                .filter(|px| px[..3] == [0xff, 0xff, 0xff])
                .count()
        };

        guest.show(32, 24, 0);
        let cursor = Cursor {
            width: 2,
            height: 2,
            hot_x: 0,
            hot_y: 0,
            pixels: vec![0xffff_ffff; 4],
        };
        guest.pending.push_back(GuestChange::Cursor(Some(Arc::new(cursor))));
        guest.pending.push_back(GuestChange::Pointer(4, 4, true));
        display.refresh(&mut guest, &mut queue).unwrap();
        assert_eq!(white_pixels(&display), 4);

        display.switch().signal_release();
        display.refresh(&mut guest, &mut queue).unwrap();
        display.switch().signal_acquire();
        display.refresh(&mut guest, &mut queue).unwrap();

        assert!(display.switch().is_active());
        assert!(!display.compositor().is_redraw_pending());
        assert_eq!(white_pixels(&display), 4);
    }

    #[test]
    fn test_extreme_damage_is_clipped() {
        let mut guest = FakeGuest::new(true);
        let (mut display, _state) = start(&mut guest);
        let mut queue = EventQueue::default();

        guest.show(32, 24, 0x0000_00ff);
        display.refresh(&mut guest, &mut queue).unwrap();

        display.gfx_update(i32::MAX - 1, 0, i32::MAX, i32::MAX);
        display.gfx_update(i32::MIN, i32::MIN, i32::MAX, i32::MAX);
        display.gfx_update(-5, -5, i32::MAX, i32::MAX);
        display.refresh(&mut guest, &mut queue).unwrap();
        assert!(display.compositor().dirty().is_empty());

        let bytes = display.session().visible_bytes().unwrap();
        let i = (12 * 64 + 16) * 4;
        assert_eq!(&bytes[i..i + 3], &[0xff, 0x00, 0x00]);
    }

    #[test]
    fn test_vt_switch_failure_rolls_back() {
        let mut guest = FakeGuest::new(true);
        let (mut platform, state) = FakePlatform::new();
        state.borrow_mut().reject_process_mode = true;

        let result = FbdevDisplay::start(&mut platform, &options(), &mut guest);
        assert!(matches!(result, Err(Error::Console(_))));
        assert!(guest.listeners.is_empty());
        let state = state.borrow();
        assert!(state.called("set_vt_mode 1"));
        assert_eq!(state.kd_mode, KdMode::TEXT);
        assert_eq!(state.kb_mode, KbMode::XLATE);
    }

    #[test]
    fn test_mouse_forwarding() {
        let mut guest = FakeGuest::new(true);
        let (mut platform, state) = FakePlatform::new();
        state.borrow_mut().mouse_packets = Some([vec![0x01, 0x03, 0xfe]].into_iter().collect());
        let mut display = FbdevDisplay::start(&mut platform, &options(), &mut guest).unwrap();
        let mut queue = EventQueue::default();
        assert!(display.has_mouse());

        display.handle_pointer_input(&mut queue);
        assert_eq!(
            queue.drain(),
            vec![
                InputEvent::Button { button: MouseButton::Left, down: true },
                InputEvent::Rel { axis: Axis::X, delta: 3 },
                InputEvent::Rel { axis: Axis::Y, delta: 2 },
                InputEvent::Sync,
            ]
        );
    }
}
