// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Callback capability and the pending-operation record.

use std::fmt;
use std::sync::Arc;

use crate::action::{ActionKind, Category};
use crate::context::AsyncContext;

/// Something to run once a pending operation is ready.
///
/// The return value is a verdict on the registration: `true` keeps it
/// armed for the next readiness event, `false` releases it. Any
/// `Fn(&mut AsyncContext) -> bool` closure qualifies.
pub trait Completion: Send + Sync {
    fn complete(&self, cx: &mut AsyncContext) -> bool;
}

impl<F> Completion for F
where
    F: Fn(&mut AsyncContext) -> bool + Send + Sync,
{
    fn complete(&self, cx: &mut AsyncContext) -> bool {
        self(cx)
    }
}

/// A registered operation: what it waits on, who to call, and the bytes
/// captured at registration (e.g. data to write).
///
/// Immutable once built. The registry swaps whole records, so a reader
/// never sees the fields of two different registrations mixed.
pub struct PendingOp {
    action: ActionKind,
    callback: Arc<dyn Completion>,
    payload: Vec<u8>,
    generation: u32,
    /// Registry-wide registration counter; a later registration always
    /// carries a larger serial.
    serial: u64,
}

impl PendingOp {
    pub(crate) fn new(
        action: ActionKind,
        callback: Arc<dyn Completion>,
        payload: Vec<u8>,
        generation: u32,
        serial: u64,
    ) -> Self {
        Self {
            action,
            callback,
            payload,
            generation,
            serial,
        }
    }

    pub fn action(&self) -> ActionKind {
        self.action
    }

    pub fn category(&self) -> Category {
        self.action.category()
    }

    /// Empty when nothing was captured.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Generation of the handle this record was registered under.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub(crate) fn serial(&self) -> u64 {
        self.serial
    }

    pub fn callback(&self) -> &Arc<dyn Completion> {
        &self.callback
    }

    /// Run the callback. Does not consult the registry; use
    /// `Registry::invoke` to have the verdict applied.
    pub fn complete(&self, cx: &mut AsyncContext) -> bool {
        self.callback.complete(cx)
    }
}

impl fmt::Debug for PendingOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingOp")
            .field("action", &self.action)
            .field("payload_len", &self.payload.len())
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}
