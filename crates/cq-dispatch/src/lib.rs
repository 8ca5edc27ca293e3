// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Completion dispatch registry.
//!
//! Bookkeeping for pending asynchronous operations on numbered I/O
//! handles. A readiness driver looks up the record registered for a
//! handle and invokes its callback; this crate never polls, never does
//! I/O and never owns the handles it indexes.
//!
//! Components:
//! - `action`     — action kinds and the three categories they share
//! - `handle`     — raw handle values paired with a reuse generation
//! - `context`    — mutable value handed to a callback on invocation
//! - `completion` — callback capability + pending-operation record
//! - `registry`   — per-category slot tables, register/cancel/lookup/dispatch
//! - `config`     — registry tuning

pub mod action;
pub mod completion;
pub mod config;
pub mod context;
pub mod error;
pub mod handle;
pub mod registry;

pub use action::{classify, ActionKind, Category, IntoAction};
pub use completion::{Completion, PendingOp};
pub use config::RegistryConfig;
pub use context::AsyncContext;
pub use error::DispatchError;
pub use handle::{Handle, RawHandle};
pub use registry::{Dispatch, Interest, Readiness, Registry};
