// Copyright 2024 Cloud Hypervisor Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! `/dev/input/mice` pointer device
//!
//! The kernel multiplexes every mouse into one stream of 3-byte PS/2
//! packets:
//!
//! ```text
//! byte 0: buttons and sign/overflow bits
//! byte 1: X movement, two's complement
//! byte 2: Y movement, two's complement, up is positive
//! ```

use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsRawFd, RawFd};

/// Size of one PS/2 packet.
pub const MOUSE_PACKET_SIZE: usize = 3;

bitflags::bitflags! {
    /// Button bits of the first packet byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PacketButtons: u8 {
        const LEFT = 0x01;
        const RIGHT = 0x02;
        const MIDDLE = 0x04;
        const WHEEL_UP = 0x10;
        const WHEEL_DOWN = 0x20;
    }
}

/// A decoded pointer packet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MousePacket {
    pub buttons: PacketButtons,
    /// Horizontal movement, right is positive.
    pub dx: i32,
    /// Vertical movement in screen orientation, down is positive.
    pub dy: i32,
}

impl MousePacket {
    pub fn parse(buf: &[u8; MOUSE_PACKET_SIZE]) -> Self {
        Self {
            buttons: PacketButtons::from_bits_truncate(buf[0]),
            dx: i32::from(buf[1] as i8),
            dy: -i32::from(buf[2] as i8),
        }
    }
}

/// A source of pointer packets.
pub trait PointerDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn raw_fd(&self) -> Option<RawFd> {
        None
    }
}

/// `/dev/input/mice` opened read-only.
pub struct LinuxMice {
    file: File,
}

impl LinuxMice {
    pub fn new(file: File) -> Self {
        Self { file }
    }
}

impl PointerDevice for LinuxMice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }

    fn raw_fd(&self) -> Option<RawFd> {
        Some(self.file.as_raw_fd())
    }
}
