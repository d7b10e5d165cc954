// Copyright 2024 Cloud Hypervisor Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Fake devices and guest display for exercising the backend end to end.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use devices::console::{self, KbMode, KdMode, SetAttrWhen, VT_PROCESS, VtMode, VtStat};
use devices::fbdev::{self, FB_TYPE_PACKED_PIXELS};
use devices::platform;
use devices::{
    ConsoleDevice, DevicePlatform, FbBitfield, FbFixScreenInfo, FbVarScreenInfo, FramebufferDevice, PixelMemory,
    PointerDevice,
};

use super::{Cursor, DisplayChangeListener, DisplaySurface, GuestDisplay, ListenerId};

pub const FB_WIDTH: u32 = 64;
pub const FB_HEIGHT: u32 = 48;

/// What the next console read returns.
pub enum ConsoleRead {
    Data(Vec<u8>),
    Eof,
    Fail,
}

/// Device state shared by every fake opened from one platform.
pub struct FakeState {
    pub calls: Vec<String>,
    pub stdin_is_vt: bool,
    pub active_vt: u16,
    pub free_vt: i32,
    pub kd_mode: KdMode,
    pub vt_mode: VtMode,
    pub kb_mode: KbMode,
    pub flags: libc::c_int,
    pub termios: libc::termios,
    pub var: FbVarScreenInfo,
    pub fix: FbFixScreenInfo,
    pub console_input: VecDeque<ConsoleRead>,
    pub mouse_packets: Option<VecDeque<Vec<u8>>>,
    /// Reject switching the VT to `VT_PROCESS`.
    pub reject_process_mode: bool,
}

fn zeroed_termios() -> libc::termios {
    // SAFETY: termios is plain old data; all zeroes is a valid value.
    unsafe { std::mem::zeroed() }
}

impl FakeState {
    pub fn new() -> Self {
        let line_length = FB_WIDTH * 4;
        let mut fix = FbFixScreenInfo {
            smem_len: line_length * FB_HEIGHT,
            type_: FB_TYPE_PACKED_PIXELS,
            line_length,
            ..Default::default()
        };
        fix.id[..4].copy_from_slice(b"fake");
        let mut termios = zeroed_termios();
        termios.c_lflag = libc::ICANON | libc::ECHO | libc::ISIG;

        Self {
            calls: Vec::new(),
            stdin_is_vt: true,
            active_vt: 1,
            free_vt: 7,
            kd_mode: KdMode::TEXT,
            vt_mode: VtMode::default(),
            kb_mode: KbMode::XLATE,
            flags: libc::O_RDWR,
            termios,
            var: FbVarScreenInfo {
                xres: FB_WIDTH,
                yres: FB_HEIGHT,
                xres_virtual: FB_WIDTH,
                yres_virtual: FB_HEIGHT * 2,
                bits_per_pixel: 32,
                red: FbBitfield::new(16, 8),
                green: FbBitfield::new(8, 8),
                blue: FbBitfield::new(0, 8),
                ..Default::default()
            },
            fix,
            console_input: VecDeque::new(),
            mouse_packets: None,
            reject_process_mode: false,
        }
    }

    pub fn called(&self, call: &str) -> bool {
        self.calls.iter().any(|c| c == call)
    }

    pub fn position(&self, call: &str) -> Option<usize> {
        self.calls.iter().position(|c| c == call)
    }
}

impl Default for FakeState {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedState = Rc<RefCell<FakeState>>;

pub struct FakePlatform {
    pub state: SharedState,
}

impl FakePlatform {
    pub fn new() -> (Self, SharedState) {
        let state = Rc::new(RefCell::new(FakeState::new()));
        (Self { state: state.clone() }, state)
    }

    fn log(&self, call: String) {
        self.state.borrow_mut().calls.push(call);
    }
}

impl DevicePlatform for FakePlatform {
    fn open_framebuffer(&mut self, path: &Path) -> platform::Result<Box<dyn FramebufferDevice>> {
        self.log(format!("open {}", path.display()));
        Ok(Box::new(FakeFramebuffer {
            state: self.state.clone(),
        }))
    }

    fn controlling_console(&mut self) -> platform::Result<Box<dyn ConsoleDevice>> {
        self.log("open stdin".to_string());
        Ok(Box::new(FakeConsole {
            state: self.state.clone(),
            stdin: true,
        }))
    }

    fn open_console(&mut self, path: &Path) -> platform::Result<Box<dyn ConsoleDevice>> {
        self.log(format!("open {}", path.display()));
        Ok(Box::new(FakeConsole {
            state: self.state.clone(),
            stdin: false,
        }))
    }

    fn open_pointer(&mut self, path: &Path) -> platform::Result<Box<dyn PointerDevice>> {
        let packets = self.state.borrow_mut().mouse_packets.take();
        match packets {
            Some(packets) => Ok(Box::new(FakeMouse { packets })),
            None => Err(platform::Error::Open(
                io::Error::from(io::ErrorKind::NotFound),
                PathBuf::from(path),
            )),
        }
    }

    fn page_size(&self) -> usize {
        4096
    }
}

fn fake_error() -> io::Error {
    io::Error::from_raw_os_error(libc::ENOTTY)
}

pub struct FakeConsole {
    state: SharedState,
    stdin: bool,
}

impl FakeConsole {
    fn log(&self, call: String) {
        self.state.borrow_mut().calls.push(call);
    }
}

impl ConsoleDevice for FakeConsole {
    fn vt_state(&self) -> console::Result<VtStat> {
        let state = self.state.borrow();
        if self.stdin && !state.stdin_is_vt {
            return Err(console::Error::GetState(fake_error()));
        }
        Ok(VtStat {
            v_active: state.active_vt,
            ..Default::default()
        })
    }

    fn open_query(&self) -> console::Result<i32> {
        Ok(self.state.borrow().free_vt)
    }

    fn activate(&self, vtno: i32) -> console::Result<()> {
        self.log(format!("activate {vtno}"));
        self.state.borrow_mut().active_vt = vtno as u16;
        Ok(())
    }

    fn wait_active(&self, vtno: i32) -> console::Result<()> {
        self.log(format!("wait_active {vtno}"));
        Ok(())
    }

    fn vt_mode(&self) -> console::Result<VtMode> {
        Ok(self.state.borrow().vt_mode)
    }

    fn set_vt_mode(&self, mode: &VtMode) -> console::Result<()> {
        self.log(format!("set_vt_mode {}", mode.mode));
        if mode.mode == VT_PROCESS && self.state.borrow().reject_process_mode {
            return Err(console::Error::SetVtMode(io::Error::from_raw_os_error(libc::EPERM)));
        }
        self.state.borrow_mut().vt_mode = *mode;
        Ok(())
    }

    fn release_display(&self, arg: libc::c_ulong) -> console::Result<()> {
        self.log(format!("release_display {arg}"));
        Ok(())
    }

    fn kd_mode(&self) -> console::Result<KdMode> {
        Ok(self.state.borrow().kd_mode)
    }

    fn set_kd_mode(&self, mode: KdMode) -> console::Result<()> {
        self.log(format!("set_kd_mode {}", mode.0));
        self.state.borrow_mut().kd_mode = mode;
        Ok(())
    }

    fn kb_mode(&self) -> console::Result<KbMode> {
        Ok(self.state.borrow().kb_mode)
    }

    fn set_kb_mode(&self, mode: KbMode) -> console::Result<()> {
        self.log(format!("set_kb_mode {}", mode.0));
        self.state.borrow_mut().kb_mode = mode;
        Ok(())
    }

    fn termios(&self) -> console::Result<libc::termios> {
        Ok(self.state.borrow().termios)
    }

    fn set_termios(&self, termios: &libc::termios, when: SetAttrWhen) -> console::Result<()> {
        self.log(format!("set_termios {when:?}"));
        self.state.borrow_mut().termios = *termios;
        Ok(())
    }

    fn status_flags(&self) -> console::Result<libc::c_int> {
        Ok(self.state.borrow().flags)
    }

    fn set_status_flags(&self, flags: libc::c_int) -> console::Result<()> {
        self.state.borrow_mut().flags = flags;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.state.borrow_mut().console_input.pop_front() {
            Some(ConsoleRead::Data(data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(n)
            }
            Some(ConsoleRead::Eof) => Ok(0),
            Some(ConsoleRead::Fail) => Err(io::Error::from_raw_os_error(libc::EIO)),
            None => Err(io::Error::from(io::ErrorKind::WouldBlock)),
        }
    }
}

pub struct FakeFramebuffer {
    state: SharedState,
}

impl FramebufferDevice for FakeFramebuffer {
    fn var_screeninfo(&self) -> fbdev::Result<FbVarScreenInfo> {
        Ok(self.state.borrow().var)
    }

    fn set_var_screeninfo(&self, var: &FbVarScreenInfo) -> fbdev::Result<()> {
        let mut state = self.state.borrow_mut();
        state.calls.push(format!("set_var {}", var.bits_per_pixel));
        state.var = *var;
        Ok(())
    }

    fn fix_screeninfo(&self) -> fbdev::Result<FbFixScreenInfo> {
        Ok(self.state.borrow().fix)
    }

    fn pan_display(&self, var: &FbVarScreenInfo) -> fbdev::Result<()> {
        let mut state = self.state.borrow_mut();
        state.calls.push(format!("pan {},{}", var.xoffset, var.yoffset));
        state.var.xoffset = var.xoffset;
        state.var.yoffset = var.yoffset;
        Ok(())
    }

    fn map(&self, len: usize) -> fbdev::Result<Box<dyn PixelMemory>> {
        self.state.borrow_mut().calls.push(format!("map {len}"));
        Ok(Box::new(vec![0xaau8; len]))
    }
}

pub struct FakeMouse {
    packets: VecDeque<Vec<u8>>,
}

impl PointerDevice for FakeMouse {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let packet = self
            .packets
            .pop_front()
            .ok_or_else(|| io::Error::from(io::ErrorKind::WouldBlock))?;
        let n = packet.len().min(buf.len());
        buf[..n].copy_from_slice(&packet[..n]);
        Ok(n)
    }
}

/// A pending change the fake guest pushes on the next update.
pub enum GuestChange {
    Switch,
    Damage(i32, i32, i32, i32),
    Pointer(i32, i32, bool),
    Cursor(Option<Arc<Cursor>>),
}

pub struct FakeGuest {
    pub surface: Option<DisplaySurface>,
    pub graphic: bool,
    pub pending: VecDeque<GuestChange>,
    pub selected: Vec<usize>,
    pub listeners: Vec<(ListenerId, String)>,
    pub updates: usize,
    next_id: u64,
}

impl FakeGuest {
    pub fn new(graphic: bool) -> Self {
        Self {
            surface: None,
            graphic,
            pending: VecDeque::new(),
            selected: Vec::new(),
            listeners: Vec::new(),
            updates: 0,
            next_id: 1,
        }
    }

    /// Switch to a `width`x`height` surface filled with `color`.
    pub fn show(&mut self, width: u32, height: u32, color: u32) {
        let mut surface = DisplaySurface::new(width, height);
        surface.pixels.fill(color);
        self.surface = Some(surface);
        self.pending.push_back(GuestChange::Switch);
        self.pending
            .push_back(GuestChange::Damage(0, 0, width as i32, height as i32));
    }
}

impl GuestDisplay for FakeGuest {
    fn update(&mut self, listener: &mut dyn DisplayChangeListener) {
        self.updates += 1;
        while let Some(change) = self.pending.pop_front() {
            match change {
                GuestChange::Switch => {
                    if let Some(surface) = self.surface.as_ref() {
                        listener.gfx_switch(surface);
                    }
                }
                GuestChange::Damage(x, y, w, h) => listener.gfx_update(x, y, w, h),
                GuestChange::Pointer(x, y, visible) => listener.mouse_set(x, y, visible),
                GuestChange::Cursor(cursor) => listener.cursor_define(cursor),
            }
        }
    }

    fn surface(&self) -> Option<&DisplaySurface> {
        self.surface.as_ref()
    }

    fn is_graphic(&self) -> bool {
        self.graphic
    }

    fn select_console(&mut self, index: usize) {
        self.selected.push(index);
    }

    fn register_listener(&mut self, name: &str) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, name.to_string()));
        id
    }

    fn unregister_listener(&mut self, id: ListenerId) {
        self.listeners.retain(|(l, _)| *l != id);
    }
}
