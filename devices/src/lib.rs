// Copyright 2024 Cloud Hypervisor Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Linux console device layer
//!
//! Thin, typed access to the kernel devices a framebuffer display needs:
//!
//! - [`fbdev`]: `/dev/fbN` screen info ioctls and the shared memory mapping
//! - [`console`]: virtual terminal, keyboard mode and termios control
//! - [`mice`]: `/dev/input/mice` PS/2 packets
//! - [`platform`]: opening all of the above behind a trait so the display
//!   backend can run against fake devices

pub mod console;
pub mod fbdev;
pub mod mice;
pub mod platform;

pub use console::{ConsoleDevice, KbMode, KdMode, VtMode, VtStat};
pub use fbdev::{FbBitfield, FbFixScreenInfo, FbVarScreenInfo, FramebufferDevice, PixelMemory};
pub use mice::{MousePacket, PacketButtons, PointerDevice};
pub use platform::{DevicePlatform, LinuxPlatform};
