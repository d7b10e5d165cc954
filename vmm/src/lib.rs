// Copyright 2024 Cloud Hypervisor Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Framebuffer display output for the VMM
//!
//! Renders the guest's video output straight onto a Linux framebuffer
//! (`/dev/fbN`) and feeds console keyboard and `/dev/input/mice` events
//! back to the guest.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Guest display producer                      │
//! │  - surface pixels, damage, cursor                           │
//! └─────────────────────────────────────────────────────────────┘
//!                            │ GuestDisplay / DisplayChangeListener
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      FbdevDisplay                            │
//! │  - VT switch coordination                                   │
//! │  - damage tracking and scaled compositing                   │
//! │  - medium-raw keyboard decoding, mouse forwarding           │
//! └─────────────────────────────────────────────────────────────┘
//!              │                               │
//!              ▼                               ▼
//! ┌──────────────────────────┐    ┌──────────────────────────────┐
//! │ /dev/fbN, /dev/ttyN      │    │ InputSink (guest input)      │
//! └──────────────────────────┘    └──────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use vmm::display::{DisplayOptions, DisplayRegistry, DisplayType, event_loop};
//!
//! let registry = DisplayRegistry::default();
//! let mut backend = registry.create(DisplayType::Fbdev, &DisplayOptions::default())?;
//! backend.init(&mut guest)?;
//! event_loop::run(backend.as_mut(), &mut guest, &mut input, &stop)?;
//! ```

pub mod display;
pub mod input;
