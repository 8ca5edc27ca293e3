// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Async context handed to a callback when its operation is ready.
//!
//! Built fresh by the driver for every invocation. The registry never
//! constructs or keeps one.

use crate::handle::{Handle, RawHandle};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AsyncContext {
    /// Handle the readiness event occurred on.
    pub handle: Handle,
    /// Connection produced by an accept, filled in by the driver.
    pub accept_handle: Option<RawHandle>,
    /// Operation data: bytes read, or the payload captured for a write.
    pub buffer: Vec<u8>,
}

impl AsyncContext {
    pub fn new(handle: impl Into<Handle>) -> Self {
        Self {
            handle: handle.into(),
            accept_handle: None,
            buffer: Vec::new(),
        }
    }

    pub fn with_buffer(handle: impl Into<Handle>, buffer: Vec<u8>) -> Self {
        Self {
            handle: handle.into(),
            accept_handle: None,
            buffer,
        }
    }

    /// Reset to the empty state so the value can be reused.
    pub fn clear(&mut self) {
        self.handle = Handle::default();
        self.accept_handle = None;
        self.buffer.clear();
    }
}
