// Copyright 2024 Cloud Hypervisor Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Input Event Queue
//!
//! A bounded [`InputSink`] that records what it receives. Pointer events are
//! grouped into reports closed by `sync`; consumers drain the queue between
//! refresh polls.

use std::collections::VecDeque;

use log::warn;

use super::InputSink;
use super::event::{Axis, InputEvent, Keysym, MouseButton};

/// Default queue capacity (events)
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Queue statistics
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Total events accepted
    pub events_queued: u64,
    /// Events dropped because the queue was full
    pub events_dropped: u64,
    /// Completed pointer reports
    pub reports: u64,
}

/// Recording input sink
pub struct EventQueue {
    capacity: usize,
    absolute: bool,
    events: VecDeque<InputEvent>,
    stats: QueueStats,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            absolute: false,
            events: VecDeque::with_capacity(capacity.min(DEFAULT_QUEUE_CAPACITY)),
            stats: QueueStats::default(),
        }
    }

    /// Make the sink request absolute pointer coordinates.
    pub fn set_absolute(&mut self, absolute: bool) {
        self.absolute = absolute;
    }

    fn push(&mut self, event: InputEvent) {
        if self.events.len() >= self.capacity {
            // Oldest events go first; a stuck consumer loses history, not new input.
            self.events.pop_front();
            self.stats.events_dropped += 1;
            if self.stats.events_dropped == 1 {
                warn!("Input queue full, dropping events");
            }
        }
        self.events.push_back(event);
        self.stats.events_queued += 1;
    }

    /// Next queued event
    pub fn pop(&mut self) -> Option<InputEvent> {
        self.events.pop_front()
    }

    /// Take every queued event.
    pub fn drain(&mut self) -> Vec<InputEvent> {
        self.events.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = QueueStats::default();
    }
}

impl InputSink for EventQueue {
    fn is_absolute(&self) -> bool {
        self.absolute
    }

    fn button(&mut self, button: MouseButton, down: bool) {
        self.push(InputEvent::Button { button, down });
    }

    fn rel(&mut self, axis: Axis, delta: i32) {
        self.push(InputEvent::Rel { axis, delta });
    }

    fn abs(&mut self, axis: Axis, value: i32, min: i32, max: i32) {
        self.push(InputEvent::Abs {
            axis,
            value,
            min,
            max,
        });
    }

    fn sync(&mut self) {
        self.push(InputEvent::Sync);
        self.stats.reports += 1;
    }

    fn key_scancode(&mut self, scancode: u8, down: bool) {
        self.push(InputEvent::Key { scancode, down });
    }

    fn keysym(&mut self, keysym: Keysym) {
        self.push(InputEvent::keysym(keysym));
    }
}
