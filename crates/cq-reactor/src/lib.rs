// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Epoll driver for the completion registry.
//!
//! Watches every descriptor that has a pending record, classifies epoll
//! events as read / write / peer-close readiness, performs the small
//! amount of I/O an action implies (accept, read a chunk, drain a timer)
//! and hands the result to the registered callback.
//!
//! Components:
//! - `reactor` — epoll instance, interest reconciliation, dispatch loop
//! - `io`      — non-blocking helpers and an owned timerfd
//! - `config`  — reactor tuning

pub mod config;
pub mod io;
pub mod reactor;

pub use config::ReactorConfig;
pub use io::{set_nonblocking, Timer};
pub use reactor::Reactor;
