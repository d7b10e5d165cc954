// Copyright 2024 Cloud Hypervisor Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Host mouse forwarding from `/dev/input/mice`.

use std::io;
use std::os::fd::RawFd;

use devices::mice::MOUSE_PACKET_SIZE;
use devices::{MousePacket, PacketButtons, PointerDevice};
use log::{debug, warn};

use crate::input::{Axis, InputSink, MouseButton};

/// Guest button for each packet button bit, in reporting order.
const BUTTON_MAP: [(MouseButton, PacketButtons); 5] = [
    (MouseButton::Left, PacketButtons::LEFT),
    (MouseButton::Middle, PacketButtons::MIDDLE),
    (MouseButton::Right, PacketButtons::RIGHT),
    (MouseButton::WheelUp, PacketButtons::WHEEL_UP),
    (MouseButton::WheelDown, PacketButtons::WHEEL_DOWN),
];

pub struct MouseForwarder {
    device: Box<dyn PointerDevice>,
    buttons: PacketButtons,
    /// Accumulated position for absolute pointers.
    abs_x: i32,
    abs_y: i32,
}

impl MouseForwarder {
    pub fn new(device: Box<dyn PointerDevice>) -> Self {
        Self {
            device,
            buttons: PacketButtons::empty(),
            abs_x: 0,
            abs_y: 0,
        }
    }

    pub fn raw_fd(&self) -> Option<RawFd> {
        self.device.raw_fd()
    }

    /// Read one packet and forward it.
    ///
    /// `extent` is the on-screen size of the guest surface; packets are
    /// dropped unless `active`.
    pub fn handle_input(&mut self, active: bool, extent: (i32, i32), sink: &mut dyn InputSink) {
        let mut buf = [0u8; MOUSE_PACKET_SIZE];
        match self.device.read(&mut buf) {
            Ok(MOUSE_PACKET_SIZE) => {}
            Ok(n) => {
                debug!("Short mouse read of {n} bytes");
                return;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
            Err(e) => {
                warn!("Mouse read failed: {e}");
                return;
            }
        }
        if !active {
            return;
        }
        self.forward(MousePacket::parse(&buf), extent, sink);
    }

    pub fn forward(&mut self, packet: MousePacket, extent: (i32, i32), sink: &mut dyn InputSink) {
        let changed = self.buttons ^ packet.buttons;
        if !changed.is_empty() {
            for (button, bit) in BUTTON_MAP {
                if changed.contains(bit) {
                    sink.button(button, packet.buttons.contains(bit));
                }
            }
            self.buttons = packet.buttons;
        }

        if sink.is_absolute() {
            let (width, height) = extent;
            self.abs_x = (self.abs_x + packet.dx).clamp(0, (width - 1).max(0));
            self.abs_y = (self.abs_y + packet.dy).clamp(0, (height - 1).max(0));
            sink.abs(Axis::X, self.abs_x, 0, width);
            sink.abs(Axis::Y, self.abs_y, 0, height);
        } else {
            sink.rel(Axis::X, packet.dx);
            sink.rel(Axis::Y, packet.dy);
        }
        sink.sync();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::input::{EventQueue, InputEvent};

    struct Packets(VecDeque<Vec<u8>>);

    impl PointerDevice for Packets {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.pop_front() {
                Some(packet) => {
                    let n = packet.len().min(buf.len());
                    buf[..n].copy_from_slice(&packet[..n]);
                    Ok(n)
                }
                None => Err(io::Error::from(io::ErrorKind::WouldBlock)),
            }
        }
    }

    fn forwarder(packets: &[&[u8]]) -> MouseForwarder {
        MouseForwarder::new(Box::new(Packets(
            packets.iter().map(|p| p.to_vec()).collect(),
        )))
    }

    #[test]
    fn test_relative_motion_and_buttons() {
        let mut mouse = forwarder(&[&[0x01, 0x05, 0x02], &[0x00, 0xff, 0x00]]);
        let mut queue = EventQueue::default();

        mouse.handle_input(true, (800, 600), &mut queue);
        mouse.handle_input(true, (800, 600), &mut queue);

        assert_eq!(
            queue.drain(),
            vec![
                InputEvent::Button { button: MouseButton::Left, down: true },
                InputEvent::Rel { axis: Axis::X, delta: 5 },
                InputEvent::Rel { axis: Axis::Y, delta: -2 },
                InputEvent::Sync,
                InputEvent::Button { button: MouseButton::Left, down: false },
                InputEvent::Rel { axis: Axis::X, delta: -1 },
                InputEvent::Rel { axis: Axis::Y, delta: 0 },
                InputEvent::Sync,
            ]
        );
    }

    #[test]
    fn test_absolute_motion_is_clamped() {
        let mut mouse = forwarder(&[&[0x00, 0x80, 0x00], &[0x00, 0x7f, 0x81]]);
        let mut queue = EventQueue::default();
        queue.set_absolute(true);

        mouse.handle_input(true, (100, 50), &mut queue);
        mouse.handle_input(true, (100, 50), &mut queue);

        assert_eq!(
            queue.drain(),
            vec![
                InputEvent::Abs { axis: Axis::X, value: 0, min: 0, max: 100 },
                InputEvent::Abs { axis: Axis::Y, value: 0, min: 0, max: 50 },
                InputEvent::Sync,
                InputEvent::Abs { axis: Axis::X, value: 99, min: 0, max: 100 },
                InputEvent::Abs { axis: Axis::Y, value: 49, min: 0, max: 50 },
                InputEvent::Sync,
            ]
        );
    }

    #[test]
    fn test_short_reads_and_inactive_dropped() {
        let mut mouse = forwarder(&[&[0x01, 0x05], &[0x01, 0x01, 0x01]]);
        let mut queue = EventQueue::default();

        mouse.handle_input(true, (10, 10), &mut queue);
        mouse.handle_input(false, (10, 10), &mut queue);
        mouse.handle_input(true, (10, 10), &mut queue);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_wheel_buttons() {
        let mut mouse = forwarder(&[]);
        let mut queue = EventQueue::default();
        let packet = MousePacket::parse(&[0x30, 0, 0]);
        mouse.forward(packet, (10, 10), &mut queue);
        let events = queue.drain();
        assert_eq!(events[0], InputEvent::Button { button: MouseButton::WheelUp, down: true });
        assert_eq!(events[1], InputEvent::Button { button: MouseButton::WheelDown, down: true });
    }
}
